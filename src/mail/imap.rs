use imap::error::Error as ImapError;
use imap::types::{Fetch, Flag};
use native_tls::{TlsConnector, TlsStream};
use std::collections::{HashMap, HashSet};
use std::net::TcpStream;
use std::ops::{Deref, DerefMut};
use tracing::{debug, info};

use crate::config::Credentials;
use crate::error::{Error, Result};
use crate::mail::{is_localhost, mime, MailboxEntry, MessageDetail, DEFAULT_MAX_COUNT};

/// Plain IMAP port; upgraded with STARTTLS. Every other port is implicit TLS.
const STARTTLS_PORT: u16 = 143;

/// Additive, so storing it on a message that is already read changes nothing.
const MARK_SEEN: &str = "+FLAGS (\\Seen)";

type TlsSession = imap::Session<TlsStream<TcpStream>>;

fn tls_connector_for(host: &str) -> Result<TlsConnector> {
    let mut b = TlsConnector::builder();

    if is_localhost(host) {
        b.danger_accept_invalid_certs(true);
        b.danger_accept_invalid_hostnames(true);
    }

    b.build().map_err(|e| Error::Transport(e.to_string()))
}

/// Logged-in session that logs out when dropped, whatever path the caller
/// leaves by.
struct ImapSession {
    inner: TlsSession,
}

impl ImapSession {
    fn open(creds: &Credentials) -> Result<Self> {
        let host = creds.imap.host.as_str();
        let port = creds.imap.port;
        let tls = tls_connector_for(host)?;

        debug!(host, port, "connecting to IMAP server");
        let client = if port == STARTTLS_PORT {
            imap::connect_starttls((host, port), host, &tls)
        } else {
            imap::connect((host, port), host, &tls)
        }
        .map_err(|e| Error::Transport(format!("{host}:{port}: {e}")))?;

        let inner = client
            .login(&creds.user, creds.password())
            .map_err(|(e, _)| login_error(e))?;
        debug!(user = %creds.user, "IMAP login accepted");

        Ok(Self { inner })
    }
}

impl Deref for ImapSession {
    type Target = TlsSession;

    fn deref(&self) -> &TlsSession {
        &self.inner
    }
}

impl DerefMut for ImapSession {
    fn deref_mut(&mut self) -> &mut TlsSession {
        &mut self.inner
    }
}

impl Drop for ImapSession {
    fn drop(&mut self) {
        if let Err(e) = self.inner.logout() {
            debug!(error = %e, "IMAP logout failed");
        }
    }
}

fn login_error(e: ImapError) -> Error {
    match e {
        ImapError::No(msg) | ImapError::Bad(msg) => Error::Authentication(msg),
        other => Error::Transport(other.to_string()),
    }
}

fn folder_error(e: ImapError, folder: &str) -> Error {
    match e {
        ImapError::No(msg) | ImapError::Bad(msg) => Error::NotFound(format!("folder {folder}: {msg}")),
        other => command_error(other),
    }
}

fn command_error(e: ImapError) -> Error {
    match e {
        ImapError::No(msg) | ImapError::Bad(msg) => Error::Protocol(msg),
        ImapError::Parse(err) => Error::Protocol(err.to_string()),
        other => Error::Transport(other.to_string()),
    }
}

fn has_seen(flags: &[Flag<'_>]) -> bool {
    flags.iter().any(|f| matches!(f, Flag::Seen))
}

/// Highest UIDs first, at most `limit` of them.
fn newest_first(uids: impl IntoIterator<Item = u32>, limit: usize) -> Vec<u32> {
    let mut all: Vec<u32> = uids.into_iter().collect();
    all.sort_unstable_by(|a, b| b.cmp(a));
    all.truncate(limit);
    all
}

fn uid_set(uids: &[u32]) -> String {
    uids.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
}

#[derive(Default)]
struct Fetched<'a> {
    seen: bool,
    data: Option<&'a [u8]>,
}

/// UID, `\Seen` and payload of one FETCH line.
type FetchLine<'a> = (Option<u32>, bool, Option<&'a [u8]>);

fn fetch_lines<'a>(
    fetches: &'a [Fetch],
    data: impl Fn(&'a Fetch) -> Option<&'a [u8]> + 'a,
) -> impl Iterator<Item = FetchLine<'a>> + 'a {
    fetches.iter().map(move |f| (f.uid, has_seen(f.flags()), data(f)))
}

// Some servers (Gmail) answer FLAGS in a separate FETCH line for the same UID.
fn merge_fetches<'a>(lines: impl IntoIterator<Item = FetchLine<'a>>) -> HashMap<u32, Fetched<'a>> {
    let mut out: HashMap<u32, Fetched<'a>> = HashMap::new();
    for (uid, seen, data) in lines {
        let Some(uid) = uid else { continue };
        let slot = out.entry(uid).or_default();
        slot.seen |= seen;
        if slot.data.is_none() {
            slot.data = data;
        }
    }
    out
}

fn fetched_message<'a>(
    merged: &HashMap<u32, Fetched<'a>>,
    uid: u32,
    folder: &str,
) -> Result<(&'a [u8], bool)> {
    merged
        .get(&uid)
        .and_then(|f| f.data.map(|raw| (raw, f.seen)))
        .ok_or_else(|| Error::NotFound(format!("UID {uid} in {folder}")))
}

fn require_uid(found: &HashSet<u32>, uid: u32, folder: &str) -> Result<()> {
    if found.contains(&uid) {
        Ok(())
    } else {
        Err(Error::NotFound(format!("UID {uid} in {folder}")))
    }
}

/// Lists `folder` newest first without touching any read flags.
pub fn list(creds: &Credentials, folder: &str, max_count: Option<usize>) -> Result<Vec<MailboxEntry>> {
    let limit = max_count.unwrap_or(DEFAULT_MAX_COUNT);
    let mut sess = ImapSession::open(creds)?;
    sess.examine(folder).map_err(|e| folder_error(e, folder))?;

    let uids = sess.uid_search("ALL").map_err(command_error)?;
    let picked = newest_first(uids, limit);
    if picked.is_empty() {
        return Ok(vec![]);
    }

    let fetches = sess
        .uid_fetch(uid_set(&picked), "(UID FLAGS RFC822.HEADER)")
        .map_err(command_error)?;
    let mut merged = merge_fetches(fetch_lines(&fetches, Fetch::header));

    let mut out = Vec::with_capacity(picked.len());
    for uid in picked {
        match merged.remove(&uid) {
            Some(Fetched { seen, data: Some(raw) }) => out.push(mime::entry_from_header(uid, raw, seen)?),
            _ => debug!(uid, "no header returned, skipping"),
        }
    }

    info!(folder, count = out.len(), "listed messages");
    Ok(out)
}

/// Fetches one message by UID. Peeks, so the read flag is left alone.
pub fn open(creds: &Credentials, uid: u32, folder: &str) -> Result<MessageDetail> {
    let mut sess = ImapSession::open(creds)?;
    sess.examine(folder).map_err(|e| folder_error(e, folder))?;

    let fetches = sess
        .uid_fetch(uid.to_string(), "(UID FLAGS BODY.PEEK[])")
        .map_err(command_error)?;

    let merged = merge_fetches(fetch_lines(&fetches, Fetch::body));
    let (raw, seen) = fetched_message(&merged, uid, folder)?;

    let detail = mime::detail_from_message(uid, raw, seen)?;
    debug!(uid, folder, bytes = raw.len(), "fetched message");
    Ok(detail)
}

/// Adds `\Seen` to one message. Marking an already read message is a no-op.
pub fn mark_read(creds: &Credentials, uid: u32, folder: &str) -> Result<()> {
    let mut sess = ImapSession::open(creds)?;
    sess.select(folder).map_err(|e| folder_error(e, folder))?;

    let found = sess.uid_search(format!("UID {uid}")).map_err(command_error)?;
    require_uid(&found, uid, folder)?;

    sess.uid_store(uid.to_string(), MARK_SEEN).map_err(command_error)?;

    info!(uid, folder, "marked as read");
    Ok(())
}
