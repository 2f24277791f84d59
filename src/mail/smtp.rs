use lettre::message::{header::ContentType, Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::transport::smtp::response::Code;
use lettre::transport::smtp::Error as SmtpError;
use lettre::{Message, SmtpTransport, Transport};
use tracing::{debug, info};

use crate::config::Credentials;
use crate::error::{Error, Result};
use crate::mail::{is_localhost, OutgoingMessage};

/// Submission over implicit TLS. Any other port negotiates STARTTLS.
const SMTPS_PORT: u16 = 465;

pub(crate) fn build_message(msg: &OutgoingMessage, default_from: &str) -> Result<Message> {
    if msg.to.is_empty() {
        return Err(Error::InvalidInput("at least one recipient is required".into()));
    }

    let from: Mailbox = msg.from.as_deref().unwrap_or(default_from).parse()?;
    let mut builder = Message::builder().from(from).subject(msg.subject.as_str());
    for to in &msg.to {
        builder = builder.to(to.parse()?);
    }

    let built = match &msg.body_html {
        Some(html) => builder.multipart(MultiPart::alternative_plain_html(msg.body.clone(), html.clone())),
        None => builder.header(ContentType::TEXT_PLAIN).body(msg.body.clone()),
    };
    built.map_err(|e| Error::InvalidInput(e.to_string()))
}

/// 530/534/535 and friends: the relay refused our login.
fn is_auth_rejection(code: Option<Code>) -> bool {
    code.map(|c| c.to_string().starts_with("53")).unwrap_or(false)
}

fn classify(code: Option<Code>, message: String) -> Error {
    if is_auth_rejection(code) {
        Error::Authentication(message)
    } else {
        Error::Delivery(message)
    }
}

fn send_error(e: SmtpError) -> Error {
    classify(e.status(), e.to_string())
}

/// Sends one message through the account's SMTP relay.
pub fn send(creds: &Credentials, msg: &OutgoingMessage) -> Result<()> {
    let email = build_message(msg, &creds.user)?;

    let host = creds.smtp.host.as_str();
    let port = creds.smtp.port;

    let mut tlsb = TlsParameters::builder(host.to_string());
    if is_localhost(host) {
        tlsb = tlsb
            .dangerous_accept_invalid_certs(true)
            .dangerous_accept_invalid_hostnames(true);
    }
    let tls = tlsb.build().map_err(|e| Error::Transport(e.to_string()))?;
    let tls = if port == SMTPS_PORT { Tls::Wrapper(tls) } else { Tls::Required(tls) };

    let mailer = SmtpTransport::builder_dangerous(host)
        .port(port)
        .credentials(SmtpCredentials::new(creds.user.clone(), creds.password().to_string()))
        .tls(tls)
        .build();

    debug!(host, port, recipients = msg.to.len(), "sending message");
    let response = mailer.send(&email).map_err(send_error)?;
    info!(code = %response.code(), to = ?msg.to, "message accepted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lettre::transport::smtp::response::{Category, Detail, Severity};

    fn code(category: Category, detail: Detail) -> Option<Code> {
        Some(Code::new(Severity::PermanentNegativeCompletion, category, detail))
    }

    fn formatted(msg: &Message) -> String {
        String::from_utf8_lossy(&msg.formatted()).into_owned()
    }

    #[test]
    fn plain_message_defaults_sender_to_user() {
        let msg = OutgoingMessage::new("bob@example.com", "Hello", "Hi Bob");
        let built = build_message(&msg, "alice@example.com").unwrap();
        let text = formatted(&built);
        assert!(text.contains("From: alice@example.com"));
        assert!(text.contains("To: bob@example.com"));
        assert!(text.contains("Subject: Hello"));
        assert!(text.contains("Content-Type: text/plain"));
        assert!(text.contains("Hi Bob"));
    }

    #[test]
    fn html_body_makes_alternative_multipart() {
        let msg = OutgoingMessage::new("bob@example.com", "Hello", "Hi Bob")
            .with_html("<p>Hi Bob</p>")
            .with_from("team@example.com");
        let built = build_message(&msg, "alice@example.com").unwrap();
        let text = formatted(&built);
        assert!(text.contains("From: team@example.com"));
        assert!(text.contains("multipart/alternative"));
        assert!(text.contains("text/html"));
    }

    #[test]
    fn every_recipient_lands_in_the_envelope() {
        let mut msg = OutgoingMessage::new("bob@example.com", "s", "b");
        msg.to.push("carol@example.com".into());
        let built = build_message(&msg, "alice@example.com").unwrap();
        assert_eq!(built.envelope().to().len(), 2);
    }

    #[test]
    fn bad_address_is_invalid_input() {
        let msg = OutgoingMessage::new("not an address", "s", "b");
        let err = build_message(&msg, "alice@example.com").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn no_recipients_is_invalid_input() {
        let msg = OutgoingMessage { subject: "s".into(), ..Default::default() };
        let err = build_message(&msg, "alice@example.com").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn rejected_login_is_authentication() {
        let err = classify(code(Category::Unspecified3, Detail::Five), "535 bad credentials".into());
        assert!(matches!(err, Error::Authentication(_)));
        let err = classify(code(Category::Unspecified3, Detail::Zero), "530 auth required".into());
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[test]
    fn refused_recipient_is_delivery() {
        let err = classify(code(Category::MailSystem, Detail::Zero), "550 no such user".into());
        assert!(matches!(err, Error::Delivery(_)));
    }

    #[test]
    fn failure_without_reply_code_is_delivery() {
        assert!(matches!(classify(None, "connection reset".into()), Error::Delivery(_)));
    }
}
