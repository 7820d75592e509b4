use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown page handle: {0}")]
    UnknownHandle(String),

    #[error("Ownership mismatch: {0}")]
    OwnershipMismatch(String),

    #[error("Runtime offline: {0}")]
    RuntimeOffline(String),

    #[error("Dispatch timed out: {0}")]
    DispatchTimeout(String),

    #[error("No matching page: {0}")]
    NoMatchingPage(String),

    #[error("Aborted")]
    Aborted,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Tool error: {0}")]
    Tool(String),
}

impl Error {
    /// Stable machine-readable code for the tool result envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Validation(_) => "validation",
            Error::UnknownHandle(_) => "unknown_handle",
            Error::OwnershipMismatch(_) => "ownership_mismatch",
            Error::RuntimeOffline(_) => "runtime_offline",
            Error::DispatchTimeout(_) => "dispatch_timeout",
            Error::NoMatchingPage(_) => "no_matching_page",
            Error::Aborted => "aborted",
            Error::Protocol(_) => "protocol",
            Error::Channel(_) => "channel",
            Error::Tool(_) => "tool",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
