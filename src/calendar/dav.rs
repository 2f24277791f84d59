//! Minimal WebDAV/CalDAV plumbing over blocking HTTP.

use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode, Url};
use tracing::debug;

use crate::config::Credentials;
use crate::error::{Error, Result};

const PRINCIPAL_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:current-user-principal/>
  </d:prop>
</d:propfind>"#;

const HOME_SET_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <c:calendar-home-set/>
  </d:prop>
</d:propfind>"#;

const CALENDARS_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:displayname/>
    <d:resourcetype/>
  </d:prop>
</d:propfind>"#;

/// One `<d:response>` of a multistatus body, reduced to what we read.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct DavResponse {
    pub href: String,
    pub display_name: Option<String>,
    pub principal: Option<String>,
    pub calendar_home: Option<String>,
    pub is_calendar: bool,
    pub calendar_data: Option<String>,
}

pub(crate) struct DavClient {
    http: Client,
    base: Url,
    user: String,
    password: String,
}

impl DavClient {
    pub fn new(creds: &Credentials) -> Result<Self> {
        let base = Url::parse(&creds.caldav_url)
            .map_err(|e| Error::Config(format!("invalid CalDAV URL '{}': {e}", creds.caldav_url)))?;
        let http = Client::builder().build()?;
        Ok(Self {
            http,
            base,
            user: creds.user.clone(),
            password: creds.password().to_string(),
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Resolves an href from a response against the server base.
    pub fn resolve(&self, href: &str) -> Result<Url> {
        self.base
            .join(href)
            .map_err(|e| Error::Protocol(format!("bad href '{href}': {e}")))
    }

    pub fn propfind(&self, url: &Url, depth: &str, body: &str) -> Result<Vec<DavResponse>> {
        let method = Method::from_bytes(b"PROPFIND").map_err(|e| Error::Protocol(e.to_string()))?;
        let text = self.request(method, url, depth, body)?;
        parse_multistatus(&text)
    }

    pub fn report(&self, url: &Url, body: &str) -> Result<Vec<DavResponse>> {
        let method = Method::from_bytes(b"REPORT").map_err(|e| Error::Protocol(e.to_string()))?;
        let text = self.request(method, url, "1", body)?;
        parse_multistatus(&text)
    }

    fn request(&self, method: Method, url: &Url, depth: &str, body: &str) -> Result<String> {
        debug!(%method, %url, depth, "CalDAV request");
        let response = self
            .http
            .request(method, url.clone())
            .basic_auth(&self.user, Some(&self.password))
            .header("Depth", depth)
            .header(CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(body.to_string())
            .send()?;

        let status = response.status();
        let text = response.text()?;
        debug!(%status, bytes = text.len(), "CalDAV response");
        check_status(status, url, &text)?;
        Ok(text)
    }

    /// current-user-principal, falling back to the base URL.
    pub fn find_principal(&self) -> Result<Url> {
        let found = self.propfind(&self.base, "0", PRINCIPAL_BODY)?;
        match found.into_iter().find_map(|r| r.principal) {
            Some(href) => self.resolve(&href),
            None => Ok(self.base.clone()),
        }
    }

    /// calendar-home-set of `principal`, falling back to the principal itself.
    pub fn find_calendar_home(&self, principal: &Url) -> Result<Url> {
        let found = self.propfind(principal, "0", HOME_SET_BODY)?;
        match found.into_iter().find_map(|r| r.calendar_home) {
            Some(href) => self.resolve(&href),
            None => Ok(principal.clone()),
        }
    }

    /// Calendar collections directly below `home`.
    pub fn find_calendars(&self, home: &Url) -> Result<Vec<(Url, Option<String>)>> {
        let found = self.propfind(home, "1", CALENDARS_BODY)?;
        found
            .into_iter()
            .filter(|r| r.is_calendar)
            .map(|r| Ok((self.resolve(&r.href)?, r.display_name)))
            .collect()
    }
}

fn check_status(status: StatusCode, url: &Url, body: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::Authorization(format!(
            "{url} answered {status}; the provider may require OAuth for CalDAV"
        ))),
        StatusCode::NOT_FOUND => Err(Error::NotFound(url.to_string())),
        _ => {
            let snippet: String = body.chars().take(200).collect();
            Err(Error::Protocol(format!("{url} answered {status}: {snippet}")))
        }
    }
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_string()
}

/// Parses a `multistatus` document, namespace prefixes ignored.
pub(crate) fn parse_multistatus(xml: &str) -> Result<Vec<DavResponse>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut out = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut current = DavResponse::default();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(e.local_name().as_ref());
                if name == "response" {
                    current = DavResponse::default();
                }
                if name == "calendar" && stack.last().map(String::as_str) == Some("resourcetype") {
                    current.is_calendar = true;
                }
                stack.push(name);
            }
            Ok(Event::Empty(e)) => {
                let name = local_name(e.local_name().as_ref());
                if name == "calendar" && stack.last().map(String::as_str) == Some("resourcetype") {
                    current.is_calendar = true;
                }
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| Error::Protocol(format!("bad XML text: {e}")))?
                    .into_owned();
                absorb_text(&stack, &mut current, text);
            }
            Ok(Event::CData(c)) => {
                let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                absorb_text(&stack, &mut current, text);
            }
            Ok(Event::End(_)) => {
                if stack.pop().as_deref() == Some("response") {
                    out.push(std::mem::take(&mut current));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Protocol(format!("bad multistatus XML: {e}"))),
            _ => {}
        }
    }

    Ok(out)
}

fn absorb_text(stack: &[String], current: &mut DavResponse, text: String) {
    let Some(top) = stack.last() else { return };
    let parent = stack.len().checked_sub(2).map(|i| stack[i].as_str());

    match (top.as_str(), parent) {
        ("href", Some("response")) => current.href = text,
        ("href", Some("current-user-principal")) => current.principal = Some(text),
        ("href", Some("calendar-home-set")) => current.calendar_home = Some(text),
        ("displayname", _) => current.display_name = Some(text),
        ("calendar-data", _) => current.calendar_data.get_or_insert_with(String::new).push_str(&text),
        _ => {}
    }
}
