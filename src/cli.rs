use anyhow::Result;
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::calendar::{self, Calendar, Event, EventQuery};
use crate::config::{Credentials, Overrides};
use crate::mail::{self, MailboxEntry, MessageDetail, OutgoingMessage, DEFAULT_FOLDER};

#[derive(Parser, Debug)]
#[command(name = "mailcal", version, about = "Send and read mail, list calendars and events with one app password")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Account address (or set GMAIL_USER).
    #[arg(long, global = true)]
    pub user: Option<String>,
    /// App password (or set GMAIL_APP_PASSWORD).
    #[arg(long, global = true)]
    pub password: Option<String>,
    /// IMAP host (default from env or imap.gmail.com).
    #[arg(long, global = true)]
    pub imap_host: Option<String>,
    /// IMAP port (default from env or 993).
    #[arg(long, global = true)]
    pub imap_port: Option<u16>,
    /// SMTP host (default from env or smtp.gmail.com).
    #[arg(long, global = true)]
    pub smtp_host: Option<String>,
    /// SMTP port (default from env or 587).
    #[arg(long, global = true)]
    pub smtp_port: Option<u16>,
    /// CalDAV base URL (default from env or Google's endpoint).
    #[arg(long, global = true)]
    pub caldav_url: Option<String>,
    /// Config file (default ~/.config/mailcal/config.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Print results as JSON.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send an email.
    Send {
        /// Recipient; repeat for several.
        #[arg(long, required = true)]
        to: Vec<String>,
        #[arg(long)]
        subject: String,
        /// Plain text body.
        #[arg(long)]
        body: String,
        /// Optional HTML alternative.
        #[arg(long)]
        html: Option<String>,
        /// Sender address (defaults to the account user).
        #[arg(long)]
        from: Option<String>,
    },
    /// List emails in a folder, newest first.
    List {
        #[arg(long, default_value = DEFAULT_FOLDER)]
        folder: String,
        /// Max emails to list.
        #[arg(long, default_value_t = 20)]
        max: usize,
    },
    /// Open (fetch) one email by UID.
    Open {
        /// UID from `list`.
        uid: u32,
        #[arg(long, default_value = DEFAULT_FOLDER)]
        folder: String,
    },
    /// Mark an email as read by UID.
    MarkRead {
        /// UID from `list`.
        uid: u32,
        #[arg(long, default_value = DEFAULT_FOLDER)]
        folder: String,
    },
    /// List calendars visible over CalDAV.
    Calendars {
        /// Show full URL and id.
        #[arg(short, long)]
        verbose: bool,
    },
    /// List events in a date range.
    Events {
        /// Calendar id (default: all calendars).
        #[arg(long = "calendar")]
        calendar_id: Option<String>,
        /// Days in the past to include.
        #[arg(long, default_value_t = 7)]
        days_past: i64,
        /// Days ahead to include.
        #[arg(long, default_value_t = 30)]
        days_ahead: i64,
        /// First day (YYYY-MM-DD); overrides --days-past.
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Last day, inclusive (YYYY-MM-DD); overrides --days-ahead.
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Max events to return.
        #[arg(long, default_value_t = 50)]
        max: usize,
    },
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            user: self.user.clone(),
            password: self.password.clone(),
            imap_host: self.imap_host.clone(),
            imap_port: self.imap_port,
            smtp_host: self.smtp_host.clone(),
            smtp_port: self.smtp_port,
            caldav_url: self.caldav_url.clone(),
            config_path: self.config.clone(),
        }
    }
}

/// Logs go to stderr so stdout carries only command output.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn local_midnight(day: NaiveDate) -> DateTime<Utc> {
    calendar::ical::local_to_utc(day.and_time(NaiveTime::MIN))
}

/// Resolves the `events` window from explicit days or offsets around `now`.
pub fn event_window(
    now: DateTime<Utc>,
    days_past: i64,
    days_ahead: i64,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let from = start
        .map(local_midnight)
        .unwrap_or_else(|| now - Duration::days(days_past));
    let to = end
        .map(|d| local_midnight(d + Duration::days(1)))
        .unwrap_or_else(|| now + Duration::days(days_ahead));
    (from, to)
}

pub fn render_entry(e: &MailboxEntry) -> String {
    let unread = if e.seen { "" } else { " (unread)" };
    format!("UID {}{} | {} | {:.40} | {:.50}", e.uid, unread, e.date, e.from, e.subject)
}

pub fn render_message(m: &MessageDetail) -> String {
    let body = if !m.body_plain.trim().is_empty() {
        m.body_plain.clone()
    } else if !m.body_html.trim().is_empty() {
        html2text::from_read(m.body_html.as_bytes(), 100).unwrap_or_else(|_| m.body_html.clone())
    } else {
        "(no body)".to_string()
    };

    let mut out = String::new();
    let _ = writeln!(out, "From: {}", m.entry.from);
    let _ = writeln!(out, "Date: {}", m.entry.date);
    let _ = writeln!(out, "Subject: {}", m.entry.subject);
    let _ = writeln!(out, "{}", "-".repeat(40));
    out.push_str(&body);
    out
}

pub fn render_calendars(cals: &[Calendar], verbose: bool) -> String {
    let mut out = String::new();
    for c in cals {
        let name = if c.name.is_empty() { "(no name)" } else { &c.name };
        if verbose {
            let _ = writeln!(out, "  name: {name}");
            let _ = writeln!(out, "  id:   {}", c.id);
            let _ = writeln!(out, "  url:  {}", c.url);
            out.push('\n');
        } else {
            let _ = writeln!(out, "  {}  {name}", c.id);
        }
    }
    if !cals.is_empty() && !verbose {
        out.push('\n');
        out.push_str("  Missing shared calendars (Other calendars)? Enable them for CalDAV at:\n");
        out.push_str("  https://www.google.com/calendar/syncselect\n");
    }
    out
}

pub fn render_event(e: &Event) -> String {
    let location = e
        .location
        .as_deref()
        .map(|l| format!(" @ {l}"))
        .unwrap_or_default();
    format!("  {} – {}  {}{}", e.start, e.end, e.summary, location)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn run(cli: &Cli) -> Result<()> {
    let creds = Credentials::resolve(&cli.overrides())?;

    match &cli.command {
        Command::Send { to, subject, body, html, from } => {
            let msg = OutgoingMessage {
                to: to.clone(),
                subject: subject.clone(),
                body: body.clone(),
                body_html: html.clone(),
                from: from.clone(),
            };
            mail::send(&creds, &msg)?;
            if cli.json {
                print_json(&serde_json::json!({ "sent": true, "to": to }))?;
            } else {
                println!("Email sent to {}", to.join(", "));
            }
        }
        Command::List { folder, max } => {
            let entries = mail::list(&creds, folder, Some(*max))?;
            if cli.json {
                print_json(&entries)?;
            } else {
                for e in &entries {
                    println!("{}", render_entry(e));
                }
            }
        }
        Command::Open { uid, folder } => {
            let message = mail::open(&creds, *uid, folder)?;
            if cli.json {
                print_json(&message)?;
            } else {
                println!("{}", render_message(&message));
            }
        }
        Command::MarkRead { uid, folder } => {
            mail::mark_read(&creds, *uid, folder)?;
            if cli.json {
                print_json(&serde_json::json!({ "uid": uid, "seen": true }))?;
            } else {
                println!("Marked UID {uid} as read");
            }
        }
        Command::Calendars { verbose } => {
            let cals = calendar::list_calendars(&creds)?;
            if cli.json {
                print_json(&cals)?;
            } else {
                print!("{}", render_calendars(&cals, *verbose));
            }
        }
        Command::Events { calendar_id, days_past, days_ahead, start, end, max } => {
            let (from, to) = event_window(Utc::now(), *days_past, *days_ahead, *start, *end);
            let query = EventQuery {
                start: from,
                end: to,
                calendar_id: calendar_id.clone(),
                max_results: Some(*max),
            };
            let events = calendar::list_events(&creds, &query)?;
            if cli.json {
                print_json(&events)?;
            } else {
                for e in &events {
                    println!("{}", render_event(e));
                }
            }
        }
    }

    Ok(())
}
