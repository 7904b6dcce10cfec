//! Session error types
//!
//! Transport-boundary failures are caught by the controller and publisher and turned
//! into reported outcomes. Only startup problems (configuration, initial connect)
//! surface as `SessionError` to the binary.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Maximum length of an operator-facing error message
pub const MAX_REPORTED_ERROR_LEN: usize = 500;

/// Main error type for session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Connection to broker failed: {message}")]
    Connect { message: String },

    #[error("Disconnect failed: {message}")]
    Disconnect { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Console I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SessionError {
    /// Create connect error
    pub fn connect<S: Into<String>>(message: S) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }

    /// Create disconnect error
    pub fn disconnect<S: Into<String>>(message: S) -> Self {
        Self::Disconnect {
            message: message.into(),
        }
    }

    /// Create internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the session cannot continue after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Config(_))
    }

    /// Error text safe to show to the operator
    pub fn operator_message(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|passwd|token|key|secret)[=:]\s*\S+").expect("valid secret pattern")
});

static URL_USERINFO_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([a-z][a-z0-9+.-]*://)[^/@\s]+@").expect("valid userinfo pattern")
});

/// Redact credentials from error text before it is logged or shown
pub fn sanitize_error_message(message: &str) -> String {
    let sanitized = SECRET_PATTERN.replace_all(message, "${1}=***");
    let mut sanitized = URL_USERINFO_PATTERN
        .replace_all(&sanitized, "${1}***@")
        .to_string();

    if sanitized.len() > MAX_REPORTED_ERROR_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_REPORTED_ERROR_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
        sanitized.push_str(truncate_suffix);
    }

    sanitized
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;
