//! iCalendar parsing helpers using the `icalendar` crate.

use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use icalendar::{Calendar, CalendarComponent, CalendarDateTime, Component, DatePerhapsTime, EventLike};
use tracing::debug;

use crate::calendar::{Event, EventTime, NO_TITLE};
use crate::error::{Error, Result};

/// Extracts every VEVENT from one calendar object resource.
pub fn parse_events(ical_data: &str, calendar_id: &str) -> Result<Vec<Event>> {
    let calendar: Calendar = ical_data
        .parse()
        .map_err(|e| Error::Protocol(format!("failed to parse iCalendar data: {e}")))?;

    let mut events = Vec::new();
    for component in &calendar.components {
        let CalendarComponent::Event(vevent) = component else { continue };

        let Some(start) = vevent.get_start().map(event_time) else {
            debug!(uid = ?vevent.property_value("UID"), "VEVENT without DTSTART, skipping");
            continue;
        };
        let end = vevent
            .get_end()
            .map(event_time)
            .unwrap_or_else(|| implied_end(start));

        let summary = text(vevent, "SUMMARY").unwrap_or_else(|| NO_TITLE.to_string());

        events.push(Event {
            uid: text(vevent, "UID").unwrap_or_default(),
            summary,
            start,
            end,
            location: text(vevent, "LOCATION"),
            description: text(vevent, "DESCRIPTION"),
            calendar_id: calendar_id.to_string(),
        });
    }

    Ok(events)
}

fn text(vevent: &icalendar::Event, name: &str) -> Option<String> {
    vevent
        .property_value(name)
        .filter(|v| !v.trim().is_empty())
        .map(str::to_string)
}

// RFC 5545 3.6.1: no DTEND means a one-day event for dates, zero length otherwise.
fn implied_end(start: EventTime) -> EventTime {
    match start {
        EventTime::Date(d) => EventTime::Date(d + Duration::days(1)),
        other => other,
    }
}

fn event_time(value: DatePerhapsTime) -> EventTime {
    match value {
        DatePerhapsTime::Date(d) => EventTime::Date(d),
        DatePerhapsTime::DateTime(CalendarDateTime::Utc(dt)) => EventTime::DateTime(dt),
        DatePerhapsTime::DateTime(CalendarDateTime::Floating(naive)) => EventTime::DateTime(local_to_utc(naive)),
        DatePerhapsTime::DateTime(CalendarDateTime::WithTimezone { date_time, tzid }) => {
            EventTime::DateTime(zoned_to_utc(date_time, &tzid))
        }
    }
}

fn zoned_to_utc(naive: NaiveDateTime, tzid: &str) -> DateTime<Utc> {
    match tzid.parse::<Tz>() {
        Ok(tz) => tz
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&naive)),
        Err(_) => {
            debug!(tzid, "unknown TZID, treating time as local");
            local_to_utc(naive)
        }
    }
}

pub(crate) fn local_to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}
