use thiserror::Error;

/// Transport-level failures talking to the quiz server.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Request timed out")]
    Timeout,
    #[error("Server returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Could not decode server response: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Whether retrying the same idempotent request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Http(_) | GatewayError::Timeout => true,
            GatewayError::Api { status, .. } => *status >= 500,
            GatewayError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout
        } else if e.is_decode() {
            GatewayError::Decode(e.to_string())
        } else {
            GatewayError::Http(e.to_string())
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    #[error("Both a session code and a name are required")]
    MissingFields,
    #[error("Invalid session code")]
    InvalidCode,
    #[error("Could not join session: {0}")]
    Gateway(#[from] GatewayError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    /// The server answered with its "no content" status.
    #[error("Session is not active yet")]
    NotActive,
    #[error("Activation check failed: {0}")]
    Gateway(#[from] GatewayError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("Session returned no questions")]
    Empty,
    #[error("Session is not active")]
    NotActive,
    #[error("A question load is already in flight")]
    InFlight,
    #[error("Could not load questions: {0}")]
    Gateway(#[from] GatewayError),
}

impl From<PollError> for LoadError {
    fn from(e: PollError) -> Self {
        match e {
            PollError::NotActive => LoadError::NotActive,
            PollError::Gateway(g) => LoadError::Gateway(g),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("An answer was already submitted for this question")]
    AlreadySubmitted,
    #[error("Question is not open for answers")]
    WindowClosed,
    #[error("Option {0} does not belong to the current question")]
    UnknownOption(i64),
    #[error("Answer was not accepted: {0}")]
    Remote(String),
}

impl From<GatewayError> for SubmitError {
    fn from(e: GatewayError) -> Self {
        SubmitError::Remote(e.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(String),
    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}
