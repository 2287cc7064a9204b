use thiserror::Error;

/// Core error type for the server-control bot.
///
/// Every variant is recovered at an operation boundary and turned into a
/// failed [`crate::Outcome`]; only configuration errors stop the process.
#[derive(Error, Debug)]
pub enum BotError {
    /// A compute API call failed (network, auth, quota, ...)
    #[error("compute API request failed ({status}): {message}")]
    Provider { status: u16, message: String },

    /// An asynchronous operation completed with errors
    #[error("operation failed with error(s): {0}")]
    OperationFailed(String),

    #[error("operation {name} did not finish after {polls} polls")]
    OperationTimeout { name: String, polls: u32 },

    #[error("instance stayed in {status} for {polls} polls")]
    TransitionTimeout { status: String, polls: u32 },

    #[error("instance reported an unexpected status: {0}")]
    UnexpectedStatus(String),

    /// Dialing the management service failed
    #[error("unable to connect to management server: {0}")]
    Connection(String),

    /// The whitelist RPC timed out or the transport failed
    #[error("management RPC failed: {0}")]
    Rpc(String),

    /// The management service answered with a non-success code
    #[error("management server rejected the request: {0}")]
    Rejected(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for bot operations
pub type BotResult<T> = Result<T, BotError>;

impl From<reqwest::Error> for BotError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BotError::Provider {
                status: 408,
                message: format!("request timed out: {err}"),
            }
        } else if err.is_connect() {
            BotError::Provider {
                status: 0,
                message: format!("connection failed: {err}"),
            }
        } else if let Some(status) = err.status() {
            BotError::Provider {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            BotError::Provider {
                status: 0,
                message: err.to_string(),
            }
        }
    }
}

impl From<tonic::Status> for BotError {
    fn from(status: tonic::Status) -> Self {
        BotError::Rpc(format!("{:?}: {}", status.code(), status.message()))
    }
}

impl BotError {
    /// Create a provider error with a status code
    pub fn provider(status: u16, message: impl Into<String>) -> Self {
        BotError::Provider {
            status,
            message: message.into(),
        }
    }
}
