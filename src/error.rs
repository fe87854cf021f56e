use crate::resilience::ErrorClass;
use std::time::Duration;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "caches[1].ttl_ms")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "cache_manager", "job_runner")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the core.
///
/// Every failure that crosses a component boundary is one of these; the retry
/// decision is derived from it through [`Error::class`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("Upstream error ({class}){}: {message}", .status.map(|s| format!(" HTTP {}", s)).unwrap_or_default())]
    Upstream {
        class: ErrorClass,
        status: Option<u16>,
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Operation '{operation}' timed out after {}ms", .deadline.as_millis())]
    Timeout {
        operation: String,
        deadline: Duration,
    },

    #[error("Parse failure: {message}")]
    Parse { message: String },

    #[error("Delivery cancelled: sink closed")]
    Cancelled,

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("Network transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// An upstream failure with an explicit classification.
    pub fn upstream(class: ErrorClass, msg: impl Into<String>) -> Self {
        Error::Upstream {
            class,
            status: None,
            message: msg.into(),
            retry_after_ms: None,
        }
    }

    /// An upstream failure classified from its HTTP status.
    pub fn from_http_status(status: u16, body: impl Into<String>) -> Self {
        Error::Upstream {
            class: ErrorClass::from_http_status(status),
            status: Some(status),
            message: body.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a provider retry-after hint (only meaningful for upstream errors).
    pub fn with_retry_after_ms(mut self, ms: u64) -> Self {
        if let Error::Upstream {
            ref mut retry_after_ms,
            ..
        } = self
        {
            *retry_after_ms = Some(ms);
        }
        self
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Error::Parse {
            message: msg.into(),
        }
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Error::Runtime {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Classify this failure. Computed on every call, never cached.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Upstream { class, .. } => *class,
            Error::Timeout { .. } => ErrorClass::Timeout,
            Error::Parse { .. } | Error::Serialization(_) => ErrorClass::ParseFailure,
            Error::Transport(e) => ErrorClass::from_transport(e),
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::TimedOut => ErrorClass::Timeout,
                std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::Interrupted => ErrorClass::NetworkTransient,
                _ => ErrorClass::Fatal,
            },
            Error::Cancelled
            | Error::Configuration { .. }
            | Error::Validation { .. }
            | Error::Runtime { .. }
            | Error::Yaml(_) => ErrorClass::Fatal,
        }
    }

    /// Provider-suggested delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Upstream {
                retry_after_ms: Some(ms),
                ..
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::Validation { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }
}
