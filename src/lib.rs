//! Mail (IMAP/SMTP) and calendar (CalDAV) client operations that share one
//! account and app password.
//!
//! Every operation resolves its settings, opens one connection, performs a
//! single exchange and closes the connection again. Nothing is cached.

pub mod calendar;
pub mod cli;
pub mod config;
pub mod error;
pub mod mail;

pub use config::{Credentials, Overrides};
pub use error::{Error, Result};
