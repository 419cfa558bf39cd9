//! Error handling for geocoding runs.
//!
//! Two error families live here. `GeocodeFailure` is the per-key outcome of a
//! request that did not yield coordinates; it is recorded in the run's error
//! log and never aborts anything. `GeobatchError` covers setup, configuration
//! and checkpoint I/O failures.

use serde::Serialize;
use std::fmt;

/// Why a single geocoding request did not produce a coordinate.
#[derive(Debug, Clone, PartialEq)]
pub enum GeocodeFailure {
    /// Connection refused or reset, body unreadable, or request timed out
    Transport { message: String },

    /// Response was not the expected structured payload
    Protocol {
        message: String,
        status_code: Option<u16>,
    },

    /// Payload parsed but carried no usable geometry
    EmptyResult,
}

/// Coarse classification of a `GeocodeFailure`, used for summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FailureKind {
    #[serde(rename = "transport")]
    TransportFailure,
    #[serde(rename = "protocol")]
    ProtocolFailure,
    #[serde(rename = "empty")]
    EmptyResult,
}

impl GeocodeFailure {
    /// Create a new transport failure.
    pub fn transport<M: Into<String>>(message: M) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create a new protocol failure.
    pub fn protocol<M: Into<String>>(message: M) -> Self {
        Self::Protocol {
            message: message.into(),
            status_code: None,
        }
    }

    /// Create a new protocol failure carrying the HTTP status code.
    pub fn protocol_with_status<M: Into<String>>(message: M, status_code: u16) -> Self {
        Self::Protocol {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Transport { .. } => FailureKind::TransportFailure,
            Self::Protocol { .. } => FailureKind::ProtocolFailure,
            Self::EmptyResult => FailureKind::EmptyResult,
        }
    }
}

impl fmt::Display for GeocodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport { message } => write!(f, "transport failure: {}", message),
            Self::Protocol {
                message,
                status_code: Some(code),
            } => write!(f, "protocol failure (HTTP {}): {}", code, message),
            Self::Protocol {
                message,
                status_code: None,
            } => write!(f, "protocol failure: {}", message),
            Self::EmptyResult => write!(f, "no geometry result"),
        }
    }
}

impl std::error::Error for GeocodeFailure {}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::TransportFailure => write!(f, "TransportFailure"),
            FailureKind::ProtocolFailure => write!(f, "ProtocolFailure"),
            FailureKind::EmptyResult => write!(f, "EmptyResult"),
        }
    }
}

impl From<reqwest::Error> for GeocodeFailure {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::transport(format!("request timed out: {}", err))
        } else if err.is_connect() {
            Self::transport(format!("connection failed: {}", err))
        } else if err.is_decode() {
            Self::protocol(format!("undecodable body: {}", err))
        } else {
            Self::transport(format!("request failed: {}", err))
        }
    }
}

impl From<serde_json::Error> for GeocodeFailure {
    fn from(err: serde_json::Error) -> Self {
        Self::protocol(format!("JSON parsing failed: {}", err))
    }
}

/// Setup, configuration and checkpoint errors.
#[derive(Debug, Clone)]
pub enum GeobatchError {
    /// Input file could not be read
    FileError { path: String, message: String },

    /// Invalid settings
    ConfigError { message: String },

    /// Checkpoint snapshot could not be written
    IoFailure { path: String, message: String },

    /// Generic internal errors that don't fit other categories
    Internal { message: String },
}

impl GeobatchError {
    /// Create a new file error.
    pub fn file_error<P: Into<String>, M: Into<String>>(path: P, message: M) -> Self {
        Self::FileError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration error.
    pub fn config<M: Into<String>>(message: M) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Create a new checkpoint write error.
    pub fn io_failure<P: Into<String>, M: Into<String>>(path: P, message: M) -> Self {
        Self::IoFailure {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new internal error.
    pub fn internal<M: Into<String>>(message: M) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl fmt::Display for GeobatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileError { path, message } => {
                write!(f, "File error at '{}': {}", path, message)
            }
            Self::ConfigError { message } => {
                write!(f, "Configuration error: {}", message)
            }
            Self::IoFailure { path, message } => {
                write!(f, "Checkpoint write to '{}' failed: {}", path, message)
            }
            Self::Internal { message } => {
                write!(f, "Internal error: {}", message)
            }
        }
    }
}

impl std::error::Error for GeobatchError {}
