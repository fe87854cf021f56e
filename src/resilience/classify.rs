//! Failure classification.
//!
//! Every failure is tagged with exactly one [`ErrorClass`]. The class decides
//! whether the executor may try again:
//!
//! | Class | Retryable | Typical source |
//! |-------|-----------|----------------|
//! | `Timeout` | yes | attempt deadline, HTTP 408/504 |
//! | `RateLimited` | yes | HTTP 429 |
//! | `ServerUnavailable` | yes | HTTP 5xx, 529 |
//! | `NetworkTransient` | yes | connection reset/refused |
//! | `Fatal` | no | bad request, auth failure |
//! | `ParseFailure` | no | upstream answered with malformed output |

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Timeout,
    RateLimited,
    ServerUnavailable,
    NetworkTransient,
    Fatal,
    ParseFailure,
}

impl ErrorClass {
    /// Returns the standard name (e.g., `"rate_limited"`).
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::ServerUnavailable => "server_unavailable",
            Self::NetworkTransient => "network_transient",
            Self::Fatal => "fatal",
            Self::ParseFailure => "parse_failure",
        }
    }

    /// Whether the executor may retry a failure of this class.
    ///
    /// `ParseFailure` is deliberately excluded: the same prompt tends to
    /// reproduce the same malformed output.
    #[inline]
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimited | Self::ServerUnavailable | Self::NetworkTransient
        )
    }

    /// Maps an HTTP status code to its class. Unmapped statuses are `Fatal`.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            408 | 504 => Self::Timeout,
            429 => Self::RateLimited,
            // 529 is Anthropic's non-standard "overloaded"
            500..=599 => Self::ServerUnavailable,
            _ => Self::Fatal,
        }
    }

    /// Classifies a transport-level failure from the HTTP client.
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if let Some(status) = err.status() {
            Self::from_http_status(status.as_u16())
        } else if err.is_connect() || err.is_request() || err.is_body() {
            Self::NetworkTransient
        } else if err.is_decode() {
            Self::ParseFailure
        } else {
            Self::Fatal
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
