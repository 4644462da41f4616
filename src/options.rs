use std::fmt;
use std::time::Duration;

use serde::Deserialize;

use crate::ConfigError;

/// A named stage of request progress, each with its own deadline.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Phase {
    /// Until the socket finishes connecting.
    Connect,
    /// From dispatch until the response body has been received.
    Request,
    /// Longest allowed silence on an established socket.
    Socket,
}

impl Phase {
    /// Human-readable cause tag attached to errors raised by this phase.
    pub fn cause(self) -> &'static str {
        match self {
            Phase::Connect => "connect timeout",
            Phase::Request => "request timeout",
            Phase::Socket => "socket timeout",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.cause())
    }
}

/// Per-phase deadlines in milliseconds.
///
/// A phase set to `None` is never enforced. `Some(0)` is a real deadline that
/// expires as soon as the runtime gets to it.
///
/// Deserializes from an object (`{"connect": 75, "request": 75}`) or from a
/// bare number, which is shorthand for a request deadline.
#[derive(Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(from = "TimeoutsRepr")]
pub struct Timeouts {
    /// Connect deadline in milliseconds.
    pub connect: Option<u64>,
    /// Request deadline in milliseconds.
    pub request: Option<u64>,
    /// Socket inactivity deadline in milliseconds.
    pub socket: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TimeoutsRepr {
    Millis(u64),
    Phases {
        #[serde(default)]
        connect: Option<u64>,
        #[serde(default)]
        request: Option<u64>,
        #[serde(default)]
        socket: Option<u64>,
    },
}

impl From<TimeoutsRepr> for Timeouts {
    fn from(repr: TimeoutsRepr) -> Self {
        match repr {
            TimeoutsRepr::Millis(ms) => Self::from_millis(ms),
            TimeoutsRepr::Phases {
                connect,
                request,
                socket,
            } => Self {
                connect,
                request,
                socket,
            },
        }
    }
}

impl From<u64> for Timeouts {
    fn from(ms: u64) -> Self {
        Self::from_millis(ms)
    }
}

impl Timeouts {
    /// Single overall deadline, enforced as the request phase.
    pub fn from_millis(ms: u64) -> Self {
        Self {
            request: Some(ms),
            ..Self::default()
        }
    }

    /// Sets the connect deadline.
    pub fn with_connect(mut self, ms: u64) -> Self {
        self.connect = Some(ms);
        self
    }

    /// Sets the request deadline.
    pub fn with_request(mut self, ms: u64) -> Self {
        self.request = Some(ms);
        self
    }

    /// Sets the socket inactivity deadline.
    pub fn with_socket(mut self, ms: u64) -> Self {
        self.socket = Some(ms);
        self
    }

    /// Configured deadline for `phase`, if any.
    pub fn get(&self, phase: Phase) -> Option<Duration> {
        let ms = match phase {
            Phase::Connect => self.connect,
            Phase::Request => self.request,
            Phase::Socket => self.socket,
        };
        ms.map(Duration::from_millis)
    }

    /// Returns `true` when no phase is enforced.
    pub fn is_unlimited(&self) -> bool {
        self.connect.is_none() && self.request.is_none() && self.socket.is_none()
    }

    /// Parses deadlines from JSON, either a phase object or a bare number.
    pub fn from_json(json: &str) -> std::result::Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|err| ConfigError::Json(err.to_string()))
    }

    /// Reads deadlines from environment variables.
    ///
    /// Reads:
    /// - `TIMED_OUT_CONNECT_MS`
    /// - `TIMED_OUT_REQUEST_MS`
    /// - `TIMED_OUT_SOCKET_MS`
    ///
    /// A missing or empty variable leaves that phase unlimited.
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        Ok(Self {
            connect: env_millis("TIMED_OUT_CONNECT_MS")?,
            request: env_millis("TIMED_OUT_REQUEST_MS")?,
            socket: env_millis("TIMED_OUT_SOCKET_MS")?,
        })
    }
}

fn env_millis(name: &'static str) -> std::result::Result<Option<u64>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => parse_millis(name, &value),
        Err(_) => Ok(None),
    }
}

fn parse_millis(name: &'static str, value: &str) -> std::result::Result<Option<u64>, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidMillis {
            name,
            value: trimmed.to_owned(),
        })
}
