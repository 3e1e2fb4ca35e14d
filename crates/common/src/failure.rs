//! Failure classification
//!
//! Maps an error to a [`FailureKind`] by looking at `std::io::Error` kinds in
//! the source chain and then at the error's type name and messages. The
//! mapping is pure: the same error always yields the same kind.
//!
//! Text rules are checked in a fixed priority order and the first match wins:
//!
//! | Kind | Matches |
//! |------|---------|
//! | `Timeout` | "timeout", "timed out", "deadline", status 408 |
//! | `ConnectionError` | "connection", "refused", "unreachable", "reset by peer" |
//! | `RateLimit` | "rate limit" spellings, "too many requests", "throttl", status 429 |
//! | `ServerError` | any 5xx status |
//! | `ClientError` | any 4xx status other than 408, 422 and 429 |
//! | `ValidationError` | "validation", "invalid", "unprocessable", status 422 |
//! | `ResourceExhausted` | "resource", "exhausted", "quota", "out of memory" |

use std::error::Error;
use std::fmt;
use std::io;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Category of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    ConnectionError,
    RateLimit,
    ServerError,
    ClientError,
    ValidationError,
    ResourceExhausted,
    Unknown,
}

impl FailureKind {
    /// Every kind, in classification priority order.
    pub const ALL: [FailureKind; 8] = [
        FailureKind::Timeout,
        FailureKind::ConnectionError,
        FailureKind::RateLimit,
        FailureKind::ServerError,
        FailureKind::ClientError,
        FailureKind::ValidationError,
        FailureKind::ResourceExhausted,
        FailureKind::Unknown,
    ];

    /// Stable snake_case identifier, used for persistence.
    pub const fn as_str(self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::ConnectionError => "connection_error",
            FailureKind::RateLimit => "rate_limit",
            FailureKind::ServerError => "server_error",
            FailureKind::ClientError => "client_error",
            FailureKind::ValidationError => "validation_error",
            FailureKind::ResourceExhausted => "resource_exhausted",
            FailureKind::Unknown => "unknown",
        }
    }

    /// Caller mistakes that no amount of retrying will fix.
    pub const fn is_permanent(self) -> bool {
        matches!(self, FailureKind::ClientError | FailureKind::ValidationError)
    }

    /// Factor applied on top of the strategy delay.
    ///
    /// Congestion and quota signals back off harder than generic faults.
    pub const fn delay_multiplier(self) -> f64 {
        match self {
            FailureKind::RateLimit => 2.0,
            FailureKind::ResourceExhausted => 2.5,
            FailureKind::ServerError => 1.5,
            FailureKind::Timeout => 1.2,
            FailureKind::ConnectionError
            | FailureKind::ClientError
            | FailureKind::ValidationError
            | FailureKind::Unknown => 1.0,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown failure kind identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown failure kind: {0}")]
pub struct ParseFailureKindError(pub String);

impl FromStr for FailureKind {
    type Err = ParseFailureKindError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        FailureKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value))
            .ok_or_else(|| ParseFailureKindError(value.to_string()))
    }
}

const TIMEOUT_PATTERNS: &[&str] = &["timeout", "timed out", "deadline"];
const CONNECTION_PATTERNS: &[&str] = &["connection", "refused", "unreachable", "reset by peer"];
const RATE_LIMIT_PATTERNS: &[&str] = &[
    "rate limit",
    "rate-limit",
    "rate_limit",
    "ratelimit",
    "rate exceeded",
    "too many requests",
    "throttl",
];
const VALIDATION_PATTERNS: &[&str] = &["validation", "invalid", "unprocessable"];
const RESOURCE_PATTERNS: &[&str] = &["resource", "exhausted", "quota", "out of memory"];

/// Classify an error value.
///
/// `std::io::Error` kinds anywhere in the source chain take precedence; the
/// remaining cases fall back to [`classify_text`] over the short type name
/// and every message in the chain.
pub fn classify<E>(error: &E) -> FailureKind
where
    E: Error + 'static,
{
    let root: &(dyn Error + 'static) = error;

    if let Some(kind) = chain(root).find_map(|err| err.downcast_ref::<io::Error>()).and_then(classify_io_error) {
        return kind;
    }

    let message = chain(root).map(ToString::to_string).collect::<Vec<_>>().join(": ");
    classify_text(short_type_name::<E>(), &message)
}

/// Classify from a type name and message pair.
pub fn classify_text(type_name: &str, message: &str) -> FailureKind {
    let haystack = format!("{type_name} {message}").to_lowercase();
    let codes = status_codes(&haystack);

    if contains_any(&haystack, TIMEOUT_PATTERNS) || codes.contains(&408) {
        FailureKind::Timeout
    } else if contains_any(&haystack, CONNECTION_PATTERNS) {
        FailureKind::ConnectionError
    } else if contains_any(&haystack, RATE_LIMIT_PATTERNS) || codes.contains(&429) {
        FailureKind::RateLimit
    } else if codes.iter().any(|code| (500..600).contains(code)) {
        FailureKind::ServerError
    } else if codes.iter().any(|code| (400..500).contains(code) && !matches!(code, 408 | 422 | 429))
    {
        FailureKind::ClientError
    } else if contains_any(&haystack, VALIDATION_PATTERNS) || codes.contains(&422) {
        FailureKind::ValidationError
    } else if contains_any(&haystack, RESOURCE_PATTERNS) {
        FailureKind::ResourceExhausted
    } else {
        FailureKind::Unknown
    }
}

fn classify_io_error(error: &io::Error) -> Option<FailureKind> {
    match error.kind() {
        io::ErrorKind::TimedOut => Some(FailureKind::Timeout),
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe => Some(FailureKind::ConnectionError),
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => {
            Some(FailureKind::ValidationError)
        }
        io::ErrorKind::OutOfMemory => Some(FailureKind::ResourceExhausted),
        _ => None,
    }
}

fn chain<'a>(error: &'a (dyn Error + 'static)) -> impl Iterator<Item = &'a (dyn Error + 'static)> {
    std::iter::successors(Some(error), |err| (*err).source())
}

/// Last path segment of the type name, without generic parameters.
fn short_type_name<E>() -> &'static str {
    let full = std::any::type_name::<E>();
    let without_generics = full.split('<').next().unwrap_or(full);
    without_generics.rsplit("::").next().unwrap_or(without_generics)
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Standalone three-digit numbers, read as HTTP-style status codes.
fn status_codes(haystack: &str) -> Vec<u16> {
    haystack
        .split(|c: char| !c.is_ascii_digit())
        .filter(|token| token.len() == 3)
        .filter_map(|token| token.parse().ok())
        .collect()
}
