use thiserror::Error;

/// Failures surfaced by every mail and calendar operation.
#[derive(Debug, Error)]
pub enum Error {
    /// Credentials or settings could not be resolved.
    #[error("configuration error: {0}")]
    Config(String),

    /// The server rejected the user/password pair.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Folder, UID or calendar does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network, TLS or socket failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The SMTP relay did not accept the message.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// The provider wants a stronger auth flow than the app password.
    #[error("authorization required: {0}")]
    Authorization(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The server answered, but not in a shape we understand.
    #[error("protocol error: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<lettre::address::AddressError> for Error {
    fn from(e: lettre::address::AddressError) -> Self {
        Error::InvalidInput(format!("bad address: {e}"))
    }
}

impl From<mailparse::MailParseError> for Error {
    fn from(e: mailparse::MailParseError) -> Self {
        Error::Protocol(format!("unparseable message: {e}"))
    }
}
