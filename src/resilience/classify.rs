//! Error classification
//!
//! A pure function of the error's message text: the lower-cased message is
//! matched against an ordered set of keyword groups, first match wins.
//!
//! Known fragility: substring matching is brittle across broker client
//! versions and locales. There is no structured error-code source to match
//! on instead, so the behavior is kept for compatibility.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Connection,
    Network,
    Timeout,
    Serialization,
    Validation,
    Authentication,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Connection => "CONNECTION",
            ErrorKind::Network => "NETWORK",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Serialization => "SERIALIZATION",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Authentication => "AUTHENTICATION",
            ErrorKind::Unknown => "UNKNOWN",
        };
        write!(f, "{}", name)
    }
}

/// How bad the failure is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of classifying one error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub recoverable: bool,
    pub retryable: bool,
}

const CONNECTION_MARKERS: &[&str] = &["connection refused", "connect", "econnrefused"];
const NETWORK_MARKERS: &[&str] = &["network", "enetdown", "enetunreach"];
const TIMEOUT_MARKERS: &[&str] = &["timeout", "etimedout"];
const SERIALIZATION_MARKERS: &[&str] = &["serialization", "json", "parse"];
const VALIDATION_MARKERS: &[&str] = &["validation", "invalid", "schema"];
const AUTHENTICATION_MARKERS: &[&str] = &["authentication", "unauthorized", "forbidden"];

fn matches_any(message: &str, markers: &[&str]) -> bool {
    markers.iter().any(|marker| message.contains(marker))
}

/// Classify an error by its message text. The group order is authoritative.
pub fn classify_error(message: &str) -> ErrorClassification {
    let message = message.to_lowercase();

    if matches_any(&message, CONNECTION_MARKERS) {
        return ErrorClassification {
            kind: ErrorKind::Connection,
            severity: Severity::High,
            recoverable: true,
            retryable: true,
        };
    }

    if matches_any(&message, NETWORK_MARKERS) {
        return ErrorClassification {
            kind: ErrorKind::Network,
            severity: Severity::High,
            recoverable: true,
            retryable: true,
        };
    }

    if matches_any(&message, TIMEOUT_MARKERS) {
        return ErrorClassification {
            kind: ErrorKind::Timeout,
            severity: Severity::Medium,
            recoverable: true,
            retryable: true,
        };
    }

    if matches_any(&message, SERIALIZATION_MARKERS) {
        return ErrorClassification {
            kind: ErrorKind::Serialization,
            severity: Severity::Medium,
            recoverable: false,
            retryable: false,
        };
    }

    if matches_any(&message, VALIDATION_MARKERS) {
        return ErrorClassification {
            kind: ErrorKind::Validation,
            severity: Severity::Medium,
            recoverable: false,
            retryable: false,
        };
    }

    if matches_any(&message, AUTHENTICATION_MARKERS) {
        return ErrorClassification {
            kind: ErrorKind::Authentication,
            severity: Severity::High,
            recoverable: false,
            retryable: false,
        };
    }

    // Conservative default: worth retrying
    ErrorClassification {
        kind: ErrorKind::Unknown,
        severity: Severity::High,
        recoverable: true,
        retryable: true,
    }
}
