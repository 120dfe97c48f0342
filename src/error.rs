use thiserror::Error;

/// Failures surfaced by the bus client. The dispatcher never retries these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("messagebus is not open")]
    Unopened,

    #[error("no response within {timeout_ms}ms")]
    ResponseTimeout { timeout_ms: u64 },

    #[error("messagebus rejected the call: {0}")]
    Rejected(String),
}

/// Everything that can fail a single bridged request.
///
/// The `Display` text is copied verbatim into the envelope's `error` field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("{0}")]
    UnsupportedOperation(String),

    #[error("error http request method : {0}")]
    MethodNotAllowed(String),

    #[error("param : {0} can not be null or empty")]
    MissingParameter(&'static str),

    #[error("invalid param : {0}")]
    InvalidParameterRange(String),

    #[error("malformed message : {0}")]
    MalformedMessage(String),

    #[error("occurs a messagebus unopen exception : {0}")]
    BusUnavailable(String),

    #[error("occurs a response timeout exception : {0}")]
    ResponseTimeout(String),

    #[error("not implemented : {0}")]
    NotImplemented(&'static str),
}

impl From<BusError> for DispatchError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::ResponseTimeout { .. } => DispatchError::ResponseTimeout(err.to_string()),
            BusError::Unopened | BusError::Rejected(_) => {
                DispatchError::BusUnavailable(err.to_string())
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not deserialize the TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}
