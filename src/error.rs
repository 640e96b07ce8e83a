//! Unified error type.

use crate::session::SessionError;

/// The error type returned by kindle's fallible operations.
///
/// Application-level outcomes (404, 403, 400) are expressed as responses
/// written through [`Context`](crate::Context), not as `Error`s. This type
/// surfaces infrastructure failures and registration mistakes. Registration
/// errors are returned from the `App` builder methods so startup can abort on
/// the first one.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("config key `{key}` has invalid value `{value}`")]
    InvalidConfig { key: String, value: String },

    #[error("config file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("service `{0}` is already registered")]
    DuplicateService(String),

    #[error("app `{0}` has already been added")]
    DuplicateApp(String),

    #[error("middleware `{0}` has already been added")]
    DuplicateMiddleware(String),

    #[error("invalid route `{path}`: {reason}")]
    InvalidRoute { path: String, reason: String },

    #[error("unknown HTTP method `{0}`")]
    UnknownMethod(String),

    #[error("{0} requires session middleware to be registered")]
    MissingSession(&'static str),

    #[error("malformed form body: {0}")]
    MalformedForm(#[from] serde_urlencoded::de::Error),

    #[error("invalid socket address `{0}`")]
    InvalidAddress(String),

    #[error("session: {0}")]
    Session(#[from] SessionError),
}
