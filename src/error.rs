use crate::Phase;

/// Error raised on a request whose deadline was exceeded.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum TimeoutError {
    /// The connection was not established in time (`ETIMEDOUT`).
    #[error("Connection timed out on request{}", host_suffix(.host))]
    Connection {
        /// Deadline that expired.
        phase: Phase,
        /// Host the request was addressed to, if known.
        host: Option<String>,
    },
    /// The connection was established but went quiet for too long
    /// (`ESOCKETTIMEDOUT`).
    #[error("Socket timed out on request{}", host_suffix(.host))]
    Socket {
        /// Deadline that expired.
        phase: Phase,
        /// Host the request was addressed to, if known.
        host: Option<String>,
    },
}

impl TimeoutError {
    /// Errno-style code: `ETIMEDOUT` or `ESOCKETTIMEDOUT`.
    pub fn code(&self) -> &'static str {
        match self {
            TimeoutError::Connection { .. } => "ETIMEDOUT",
            TimeoutError::Socket { .. } => "ESOCKETTIMEDOUT",
        }
    }

    /// Phase whose deadline triggered this error.
    pub fn phase(&self) -> Phase {
        match self {
            TimeoutError::Connection { phase, .. } | TimeoutError::Socket { phase, .. } => *phase,
        }
    }

    /// Cause tag, e.g. `"request timeout"`.
    pub fn cause(&self) -> &'static str {
        self.phase().cause()
    }

    pub fn host(&self) -> Option<&str> {
        match self {
            TimeoutError::Connection { host, .. } | TimeoutError::Socket { host, .. } => {
                host.as_deref()
            }
        }
    }

    pub fn is_connection_timeout(&self) -> bool {
        matches!(self, TimeoutError::Connection { .. })
    }

    pub fn is_socket_timeout(&self) -> bool {
        matches!(self, TimeoutError::Socket { .. })
    }
}

fn host_suffix(host: &Option<String>) -> String {
    match host {
        Some(host) => format!(" to {host}"),
        None => String::new(),
    }
}

/// Error returned when timeout configuration cannot be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable did not hold a millisecond count.
    #[error("invalid {name} value '{value}': expected milliseconds")]
    InvalidMillis { name: &'static str, value: String },
    /// JSON configuration did not match the expected shape.
    #[error("invalid timeout configuration: {0}")]
    Json(String),
}

/// Error returned when a coordinator cannot be attached.
#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    /// `attach` was called outside of a Tokio runtime.
    #[error("no Tokio runtime available to drive the timeout coordinator")]
    NoRuntime,
}
