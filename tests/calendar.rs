use chrono::{DateTime, TimeZone, Utc};
use mockito::{Mock, Server};

use mailcal::calendar::{self, EventQuery, EventTime};
use mailcal::config::{ConfigFile, Credentials, Overrides};
use mailcal::Error;

const AUTH: &str = "Basic YWxpY2U6c2VjcmV0";

const PRINCIPAL: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:multistatus xmlns:d="DAV:">
  <d:response>
    <d:href>/dav/</d:href>
    <d:propstat>
      <d:prop>
        <d:current-user-principal><d:href>/principals/alice/</d:href></d:current-user-principal>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

const HOME_SET: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:multistatus xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:response>
    <d:href>/principals/alice/</d:href>
    <d:propstat>
      <d:prop>
        <c:calendar-home-set><d:href>/calendars/alice/</d:href></c:calendar-home-set>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

const LISTING: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:multistatus xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:response>
    <d:href>/calendars/alice/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/calendars/alice/work/</d:href>
    <d:propstat><d:prop>
      <d:displayname>Work</d:displayname>
      <d:resourcetype><d:collection/><c:calendar/></d:resourcetype>
    </d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/calendars/alice/home/</d:href>
    <d:propstat><d:prop>
      <d:displayname>Home</d:displayname>
      <d:resourcetype><d:collection/><c:calendar/></d:resourcetype>
    </d:prop></d:propstat>
  </d:response>
</d:multistatus>"#;

const HOLIDAY_HREF: &str = "/calendars/alice/en.usa%23holiday%40group.v.calendar.google.com/events/";

fn holiday_listing() -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<d:multistatus xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:response>
    <d:href>{HOLIDAY_HREF}</d:href>
    <d:propstat><d:prop>
      <d:displayname>Holidays in United States</d:displayname>
      <d:resourcetype><d:collection/><c:calendar/></d:resourcetype>
    </d:prop></d:propstat>
  </d:response>
</d:multistatus>"#
    )
}

fn vevent(uid: &str, start: &str, end: &str, summary: &str) -> String {
    format!(
        "BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//test//EN\r\nBEGIN:VEVENT\r\nUID:{uid}\r\n\
DTSTAMP:20250101T000000Z\r\nDTSTART:{start}\r\nDTEND:{end}\r\nSUMMARY:{summary}\r\n\
END:VEVENT\r\nEND:VCALENDAR\r\n"
    )
}

fn report(resources: &[(&str, String)]) -> String {
    let mut body = String::from(
        r#"<?xml version="1.0" encoding="utf-8"?>
<d:multistatus xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">"#,
    );
    for (href, ics) in resources {
        body.push_str(&format!(
            "<d:response><d:href>{href}</d:href><d:propstat><d:prop>\
<d:getetag>\"1\"</d:getetag><c:calendar-data><![CDATA[{ics}]]></c:calendar-data>\
</d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response>"
        ));
    }
    body.push_str("</d:multistatus>");
    body
}

fn creds(server: &Server) -> Credentials {
    let overrides = Overrides {
        user: Some("alice".into()),
        password: Some("secret".into()),
        caldav_url: Some(format!("{}/dav/", server.url())),
        ..Default::default()
    };
    Credentials::resolve_from(&overrides, |_| None, &ConfigFile::default()).unwrap()
}

fn multistatus(server: &mut Server, method: &str, path: &str, depth: &str, body: &str) -> Mock {
    server
        .mock(method, path)
        .match_header("authorization", AUTH)
        .match_header("depth", depth)
        .with_status(207)
        .with_header("content-type", "application/xml; charset=utf-8")
        .with_body(body)
        .create()
}

fn discovery(server: &mut Server) -> Vec<Mock> {
    vec![
        multistatus(server, "PROPFIND", "/dav/", "0", PRINCIPAL),
        multistatus(server, "PROPFIND", "/principals/alice/", "0", HOME_SET),
        multistatus(server, "PROPFIND", "/calendars/alice/", "1", LISTING),
    ]
}

fn events(server: &mut Server) -> Vec<Mock> {
    let work = report(&[
        ("/calendars/alice/work/a.ics", vevent("a@test", "20250615T100000Z", "20250615T110000Z", "Review")),
        ("/calendars/alice/work/old.ics", vevent("old@test", "20250601T100000Z", "20250601T110000Z", "Old")),
        ("/calendars/alice/work/edge.ics", vevent("edge@test", "20250616T000000Z", "20250616T010000Z", "Tomorrow")),
    ]);
    let home = report(&[(
        "/calendars/alice/home/b.ics",
        vevent("b@test", "20250615T090000Z", "20250615T093000Z", "Breakfast"),
    )]);
    vec![
        multistatus(server, "REPORT", "/calendars/alice/work/", "1", &work),
        multistatus(server, "REPORT", "/calendars/alice/home/", "1", &home),
    ]
}

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, d, 0, 0, 0).unwrap()
}

#[test]
fn lists_discovered_calendars() {
    let mut server = Server::new();
    let _mocks = discovery(&mut server);

    let cals = calendar::list_calendars(&creds(&server)).unwrap();
    let summary: Vec<_> = cals.iter().map(|c| (c.id.as_str(), c.name.as_str())).collect();
    assert_eq!(summary, [("work", "Work"), ("home", "Home")]);
    assert!(cals[0].url.ends_with("/calendars/alice/work/"));
}

#[test]
fn events_across_all_calendars_are_filtered_and_sorted() {
    let mut server = Server::new();
    let _discovery = discovery(&mut server);
    let _events = events(&mut server);

    let query = EventQuery {
        start: day(15),
        end: day(16),
        calendar_id: None,
        max_results: None,
    };
    let found = calendar::list_events(&creds(&server), &query).unwrap();
    let names: Vec<_> = found.iter().map(|e| e.summary.as_str()).collect();
    assert_eq!(names, ["Breakfast", "Review"]);
    assert_eq!(found[0].calendar_id, "home");
    assert_eq!(
        found[1].start,
        EventTime::DateTime(Utc.with_ymd_and_hms(2025, 6, 15, 10, 0, 0).unwrap())
    );
}

#[test]
fn events_from_one_calendar_respect_max_results() {
    let mut server = Server::new();
    let _discovery = discovery(&mut server);
    let _events = events(&mut server);

    let query = EventQuery {
        start: day(1),
        end: day(17),
        calendar_id: Some("work".into()),
        max_results: Some(2),
    };
    let found = calendar::list_events(&creds(&server), &query).unwrap();
    let names: Vec<_> = found.iter().map(|e| e.summary.as_str()).collect();
    assert_eq!(names, ["Old", "Review"]);
    assert!(found.iter().all(|e| e.calendar_id == "work"));
}

#[test]
fn unknown_calendar_is_not_found() {
    let mut server = Server::new();
    let _discovery = discovery(&mut server);

    let query = EventQuery {
        start: day(15),
        end: day(16),
        calendar_id: Some("holidays".into()),
        max_results: None,
    };
    let err = calendar::list_events(&creds(&server), &query).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn unauthorized_is_authorization_error() {
    let mut server = Server::new();
    let _denied = server
        .mock("PROPFIND", "/dav/")
        .with_status(401)
        .with_header("www-authenticate", "Bearer realm=\"Google\"")
        .create();

    let err = calendar::list_calendars(&creds(&server)).unwrap_err();
    assert!(matches!(err, Error::Authorization(_)));
}

#[test]
fn inverted_range_is_rejected_before_any_request() {
    let server = Server::new();
    let query = EventQuery {
        start: day(16),
        end: day(15),
        calendar_id: None,
        max_results: None,
    };
    let err = calendar::list_events(&creds(&server), &query).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[test]
fn encoded_calendar_ids_are_queried_at_their_encoded_url() {
    let mut server = Server::new();
    let _principal = multistatus(&mut server, "PROPFIND", "/dav/", "0", PRINCIPAL);
    let _home = multistatus(&mut server, "PROPFIND", "/principals/alice/", "0", HOME_SET);
    let _listing = multistatus(&mut server, "PROPFIND", "/calendars/alice/", "1", &holiday_listing());
    let holidays = report(&[(
        "/calendars/alice/en.usa%23holiday%40group.v.calendar.google.com/events/j4.ics",
        vevent("j4@test", "20250704T000000Z", "20250705T000000Z", "Independence Day"),
    )]);
    let report_mock = multistatus(&mut server, "REPORT", HOLIDAY_HREF, "1", &holidays);

    let creds = creds(&server);
    let cals = calendar::list_calendars(&creds).unwrap();
    assert_eq!(cals[0].id, "en.usa#holiday@group.v.calendar.google.com");
    assert!(cals[0].url.ends_with(HOLIDAY_HREF));

    let query = EventQuery {
        start: Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap(),
        end: Utc.with_ymd_and_hms(2025, 7, 8, 0, 0, 0).unwrap(),
        calendar_id: None,
        max_results: None,
    };
    let found = calendar::list_events(&creds, &query).unwrap();
    report_mock.assert();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].summary, "Independence Day");
    assert_eq!(found[0].calendar_id, "en.usa#holiday@group.v.calendar.google.com");
}
