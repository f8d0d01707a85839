//! Failure classification.
//!
//! Errors are classified once, at the I/O boundary. The retry executor and
//! the circuit breaker only ever look at the class.

use std::fmt;

/// How a failed remote call should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The backend may recover: network errors, timeouts, 408/429/5xx.
    Transient,
    /// Retrying will not help: validation errors and other 4xx.
    Permanent,
    /// HTTP 409, routed to conflict resolution.
    Conflict,
    /// HTTP 401/403. Fatal to the current sync run.
    Auth,
}

const TRANSIENT_PATTERNS: [&str; 8] = [
    "timeout",
    "timed out",
    "connection reset",
    "connection refused",
    "network",
    "rate limit",
    "too many requests",
    "broken pipe",
];

impl ErrorClass {
    /// Classifies an HTTP status code.
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            408 | 429 | 500 | 502 | 503 | 504 => Self::Transient,
            409 => Self::Conflict,
            401 | 403 => Self::Auth,
            _ => Self::Permanent,
        }
    }

    /// Classifies a free-form error message from a lower layer.
    #[must_use]
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
            Self::Transient
        } else {
            Self::Permanent
        }
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
            Self::Conflict => write!(f, "conflict"),
            Self::Auth => write!(f, "auth"),
        }
    }
}

/// Implemented by errors that pass through the resilience layer.
pub trait Classify {
    fn class(&self) -> ErrorClass;

    /// True when the failure was a timeout. Feeds the breaker's timeout-rate guard.
    fn is_timeout(&self) -> bool {
        false
    }

    fn is_transient(&self) -> bool {
        self.class().is_transient()
    }
}

impl<E: Classify + ?Sized> Classify for &E {
    fn class(&self) -> ErrorClass {
        (**self).class()
    }

    fn is_timeout(&self) -> bool {
        (**self).is_timeout()
    }
}
