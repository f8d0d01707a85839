//! Shared test helpers for resilience tests.

#![allow(dead_code)]

use std::fmt;
use tidemark_resilience::{Classify, ErrorClass};

/// A failure carrying an HTTP-like status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestError {
    Status(u16),
    Timeout,
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Status(code) => write!(f, "status {code}"),
            Self::Timeout => write!(f, "request timed out"),
        }
    }
}

impl Classify for TestError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Status(code) => ErrorClass::from_status(*code),
            Self::Timeout => ErrorClass::Transient,
        }
    }

    fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}
