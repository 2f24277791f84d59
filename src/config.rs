use serde::{Deserialize, Serialize};
use secrecy::{ExposeSecret, Secret};
use std::{fs, path::{Path, PathBuf}};
use tracing::debug;

use crate::error::{Error, Result};

pub const DEFAULT_IMAP_HOST: &str = "imap.gmail.com";
pub const DEFAULT_IMAP_PORT: u16 = 993;
pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
pub const DEFAULT_SMTP_PORT: u16 = 587;
/// Google's legacy CalDAV endpoint, which still accepts app passwords.
pub const DEFAULT_CALDAV_URL: &str = "https://calendar.google.com/calendar/dav/";

pub const ENV_USER: &str = "GMAIL_USER";
pub const ENV_PASSWORD: &str = "GMAIL_APP_PASSWORD";
pub const ENV_IMAP_HOST: &str = "IMAP_HOST";
pub const ENV_IMAP_PORT: &str = "IMAP_PORT";
pub const ENV_SMTP_HOST: &str = "SMTP_HOST";
pub const ENV_SMTP_PORT: &str = "SMTP_PORT";
pub const ENV_CALDAV_URL: &str = "CALDAV_URL";

/// Values passed explicitly by the caller. Anything set here wins over the
/// environment and the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub user: Option<String>,
    pub password: Option<String>,
    pub imap_host: Option<String>,
    pub imap_port: Option<u16>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub caldav_url: Option<String>,
    pub config_path: Option<PathBuf>,
}

/// On-disk `config.toml`. Every key is optional.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ConfigFile {
    pub account: AccountSection,
    pub imap: ServerSection,
    pub smtp: ServerSection,
    pub caldav: CaldavSection,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(default)]
pub struct AccountSection {
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ServerSection {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(default)]
pub struct CaldavSection {
    pub url: Option<String>,
}

impl ConfigFile {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mailcal").join("config.toml"))
    }

    /// Loads the file at `explicit`, or the default location if there is one.
    /// A missing default file yields an empty config; a missing explicit file
    /// is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => {
                if !p.exists() {
                    return Err(Error::Config(format!("config file {} does not exist", p.display())));
                }
                p.to_path_buf()
            }
            None => match Self::default_path() {
                Some(p) if p.exists() => p,
                _ => return Ok(Self::default()),
            },
        };

        debug!(path = %path.display(), "loading config file");
        let data = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::parse(&data)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
    }

    pub fn parse(data: &str) -> Result<Self> {
        toml::from_str(data).map_err(|e| Error::Config(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

/// One account's resolved settings, shared by IMAP, SMTP and CalDAV.
#[derive(Debug)]
pub struct Credentials {
    pub user: String,
    password: Secret<String>,
    pub imap: Endpoint,
    pub smtp: Endpoint,
    pub caldav_url: String,
}

impl Credentials {
    /// Resolves against the process environment and the config file.
    pub fn resolve(overrides: &Overrides) -> Result<Self> {
        let file = ConfigFile::load(overrides.config_path.as_deref())?;
        Self::resolve_from(overrides, |key| std::env::var(key).ok(), &file)
    }

    /// Resolution with an injectable environment lookup.
    pub fn resolve_from<F>(overrides: &Overrides, env: F, file: &ConfigFile) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let user = first_present(
            [overrides.user.clone(), env(ENV_USER), file.account.user.clone()],
            |s| s.trim().to_string(),
        )
        .ok_or_else(|| Error::Config(format!("no user given (pass --user or set {ENV_USER})")))?;

        let password = first_present(
            [overrides.password.clone(), env(ENV_PASSWORD), file.account.password.clone()],
            strip_whitespace,
        )
        .ok_or_else(|| {
            Error::Config(format!("no app password given (pass --password or set {ENV_PASSWORD})"))
        })?;

        let imap = Endpoint {
            host: first_present(
                [overrides.imap_host.clone(), env(ENV_IMAP_HOST), file.imap.host.clone()],
                |s| s.trim().to_string(),
            )
            .unwrap_or_else(|| DEFAULT_IMAP_HOST.to_string()),
            port: resolve_port(
                overrides.imap_port,
                ENV_IMAP_PORT,
                &env,
                file.imap.port,
                DEFAULT_IMAP_PORT,
            )?,
        };

        let smtp = Endpoint {
            host: first_present(
                [overrides.smtp_host.clone(), env(ENV_SMTP_HOST), file.smtp.host.clone()],
                |s| s.trim().to_string(),
            )
            .unwrap_or_else(|| DEFAULT_SMTP_HOST.to_string()),
            port: resolve_port(
                overrides.smtp_port,
                ENV_SMTP_PORT,
                &env,
                file.smtp.port,
                DEFAULT_SMTP_PORT,
            )?,
        };

        let caldav_url = first_present(
            [overrides.caldav_url.clone(), env(ENV_CALDAV_URL), file.caldav.url.clone()],
            |s| s.trim().to_string(),
        )
        .unwrap_or_else(|| DEFAULT_CALDAV_URL.to_string());

        Ok(Self {
            user,
            password: Secret::new(password),
            imap,
            smtp,
            caldav_url,
        })
    }

    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// First candidate that is still non-empty after normalisation.
fn first_present<const N: usize>(
    candidates: [Option<String>; N],
    normalise: impl Fn(&str) -> String,
) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .map(|v| normalise(&v))
        .find(|v| !v.is_empty())
}

fn resolve_port<F>(explicit: Option<u16>, key: &str, env: &F, file: Option<u16>, default: u16) -> Result<u16>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(port) = explicit {
        return Ok(port);
    }
    if let Some(raw) = env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        return raw
            .parse()
            .map_err(|_| Error::Config(format!("{key} must be a port number, got '{raw}'")));
    }
    Ok(file.unwrap_or(default))
}
