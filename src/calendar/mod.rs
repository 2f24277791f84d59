pub(crate) mod dav;
pub mod ical;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use reqwest::Url;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

use crate::config::Credentials;
use crate::error::{Error, Result};

use self::dav::DavClient;

pub const DEFAULT_MAX_RESULTS: usize = 100;
pub(crate) const NO_TITLE: &str = "(no title)";

/// A calendar collection visible to the account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Calendar {
    pub id: String,
    pub name: String,
    pub url: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum EventTime {
    /// All-day value.
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
}

impl EventTime {
    /// Dates are taken at local midnight.
    pub fn instant(&self) -> DateTime<Utc> {
        match self {
            EventTime::Date(d) => ical::local_to_utc(d.and_time(NaiveTime::MIN)),
            EventTime::DateTime(dt) => *dt,
        }
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTime::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            EventTime::DateTime(dt) => write!(f, "{}", dt.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Event {
    pub uid: String,
    pub summary: String,
    pub start: EventTime,
    pub end: EventTime,
    pub location: Option<String>,
    pub description: Option<String>,
    pub calendar_id: String,
}

impl Event {
    /// True when the event intersects the half-open range `[start, end)`.
    /// Zero-length events count when they sit inside the range.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        let ev_start = self.start.instant();
        let ev_end = self.end.instant().max(ev_start);
        if ev_start >= end {
            return false;
        }
        ev_end > start || (ev_end == ev_start && ev_start >= start)
    }
}

/// Parameters for [`list_events`].
#[derive(Clone, Debug)]
pub struct EventQuery {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Restrict to one calendar; all calendars when absent.
    pub calendar_id: Option<String>,
    pub max_results: Option<usize>,
}

/// Id of a calendar collection URL. Google's layout is
/// `.../dav/<CALENDAR_ID>/events/`, so a trailing `events` is skipped.
pub fn calendar_id_from_url(url: &str) -> String {
    let parts: Vec<&str> = url.trim_end_matches('/').split('/').collect();
    match parts.as_slice() {
        [.., id, last] if last.eq_ignore_ascii_case("events") => id.to_string(),
        [.., last] => last.to_string(),
        [] => String::new(),
    }
}

fn discover(client: &DavClient) -> Result<Vec<Calendar>> {
    let principal = client.find_principal()?;
    let home = client.find_calendar_home(&principal)?;
    debug!(%principal, %home, "CalDAV discovery");

    let found = client.find_calendars(&home)?;
    Ok(found
        .into_iter()
        .map(|(url, name)| to_calendar(&url, name))
        .collect())
}

fn to_calendar(url: &Url, name: Option<String>) -> Calendar {
    let raw_id = calendar_id_from_url(url.as_str());
    // Calendar ids are e-mail addresses, which servers send as `%40`.
    let id = match urlencoding::decode(&raw_id) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw_id,
    };
    Calendar {
        id,
        name: name.unwrap_or_default(),
        url: url.to_string(),
    }
}

/// Lists calendars visible over CalDAV. Google only shows shared calendars
/// that were enabled for sync.
pub fn list_calendars(creds: &Credentials) -> Result<Vec<Calendar>> {
    let client = DavClient::new(creds)?;
    let calendars = discover(&client)?;
    info!(count = calendars.len(), base = %client.base(), "listed calendars");
    Ok(calendars)
}

fn select<'a>(calendars: &'a [Calendar], wanted: Option<&str>) -> Result<Vec<&'a Calendar>> {
    let Some(id) = wanted else {
        return Ok(calendars.iter().collect());
    };
    calendars
        .iter()
        .find(|c| c.id == id)
        .or_else(|| calendars.iter().find(|c| c.url.contains(id)))
        .map(|c| vec![c])
        .ok_or_else(|| Error::NotFound(format!("calendar {id}")))
}

fn calendar_query(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let s = start.format("%Y%m%dT%H%M%SZ");
    let e = end.format("%Y%m%dT%H%M%SZ");
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:getetag/>
    <c:calendar-data>
      <c:expand start="{s}" end="{e}"/>
    </c:calendar-data>
  </d:prop>
  <c:filter>
    <c:comp-filter name="VCALENDAR">
      <c:comp-filter name="VEVENT">
        <c:time-range start="{s}" end="{e}"/>
      </c:comp-filter>
    </c:comp-filter>
  </c:filter>
</c:calendar-query>"#
    )
}

/// Filters to `[start, end)`, sorts by start and truncates.
fn finish(mut events: Vec<Event>, start: DateTime<Utc>, end: DateTime<Utc>, max: usize) -> Vec<Event> {
    events.retain(|e| e.overlaps(start, end));
    events.sort_by(|a, b| {
        a.start
            .instant()
            .cmp(&b.start.instant())
            .then_with(|| a.summary.cmp(&b.summary))
    });
    events.truncate(max);
    events
}

/// Lists events overlapping `[query.start, query.end)` across one or all
/// calendars, ordered by start time.
pub fn list_events(creds: &Credentials, query: &EventQuery) -> Result<Vec<Event>> {
    if query.end <= query.start {
        return Err(Error::InvalidInput("event range end must be after start".into()));
    }

    let client = DavClient::new(creds)?;
    let calendars = discover(&client)?;
    let chosen = select(&calendars, query.calendar_id.as_deref())?;
    let body = calendar_query(query.start, query.end);

    let mut events = Vec::new();
    for cal in chosen {
        let url = client.resolve(&cal.url)?;
        for resource in client.report(&url, &body)? {
            let Some(data) = resource.calendar_data else { continue };
            match ical::parse_events(&data, &cal.id) {
                Ok(parsed) => events.extend(parsed),
                Err(e) => debug!(href = %resource.href, error = %e, "skipping unparseable calendar resource"),
            }
        }
    }

    let events = finish(
        events,
        query.start,
        query.end,
        query.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
    );
    info!(count = events.len(), "listed events");
    Ok(events)
}
