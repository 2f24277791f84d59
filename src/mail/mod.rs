pub mod imap;
pub mod mime;
pub mod smtp;

use serde::Serialize;

pub use self::imap::{list, mark_read, open};
pub use self::smtp::send;

pub const DEFAULT_FOLDER: &str = "INBOX";
pub const DEFAULT_MAX_COUNT: usize = 50;

/// One row of a folder listing, as the server reported it at fetch time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MailboxEntry {
    pub uid: u32,
    pub subject: String,
    pub from: String,
    pub date: String,
    pub seen: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MessageDetail {
    #[serde(flatten)]
    pub entry: MailboxEntry,
    pub body_plain: String,
    pub body_html: String,
}

/// A message to hand to the SMTP relay.
#[derive(Clone, Debug, Default)]
pub struct OutgoingMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub body_html: Option<String>,
    /// Sender address; the account user when absent.
    pub from: Option<String>,
}

impl OutgoingMessage {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            to: vec![to.into()],
            subject: subject.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.body_html = Some(html.into());
        self
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }
}

fn is_localhost(host: &str) -> bool {
    host == "127.0.0.1" || host == "localhost" || host == "::1"
}
