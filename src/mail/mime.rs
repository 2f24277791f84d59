//! Turns raw RFC 5322 bytes into flat mail records.

use mailparse::{parse_headers, parse_mail, DispositionType, MailHeader, MailHeaderMap, ParsedMail};

use crate::error::Result;
use crate::mail::{MailboxEntry, MessageDetail};

pub fn entry_from_header(uid: u32, raw_header: &[u8], seen: bool) -> Result<MailboxEntry> {
    let (headers, _) = parse_headers(raw_header)?;
    Ok(entry_from_headers(uid, &headers, seen))
}

pub fn detail_from_message(uid: u32, raw: &[u8], seen: bool) -> Result<MessageDetail> {
    let parsed = parse_mail(raw)?;
    let entry = entry_from_headers(uid, &parsed.headers, seen);

    let mut plain = None;
    let mut html = None;
    collect_bodies(&parsed, &mut plain, &mut html);

    Ok(MessageDetail {
        entry,
        body_plain: plain.unwrap_or_default(),
        body_html: html.unwrap_or_default(),
    })
}

fn entry_from_headers(uid: u32, headers: &[MailHeader], seen: bool) -> MailboxEntry {
    let value = |name: &str| {
        headers
            .get_first_value(name)
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    };

    MailboxEntry {
        uid,
        subject: value("Subject"),
        from: value("From"),
        date: value("Date"),
        seen,
    }
}

// First non-attachment text/plain and text/html leaves win.
fn collect_bodies(m: &ParsedMail, plain: &mut Option<String>, html: &mut Option<String>) {
    if !m.subparts.is_empty() {
        for sp in &m.subparts {
            collect_bodies(sp, plain, html);
        }
        return;
    }

    if m.get_content_disposition().disposition == DispositionType::Attachment {
        return;
    }

    let slot = match m.ctype.mimetype.to_lowercase().as_str() {
        "text/plain" => plain,
        "text/html" => html,
        _ => return,
    };
    if slot.is_none() {
        if let Ok(body) = m.get_body() {
            *slot = Some(body);
        }
    }
}
