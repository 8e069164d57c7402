//! Classified capture errors.

use std::fmt;

/// Class of a capture error, which decides how it is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Invalid binding configuration; fatal to the binding, never retried
    Configuration,
    /// Network drop, timeout, unavailable sink; retried at the next slot
    Transient,
    /// Startup sanity check; fatal unless sanity checks are skipped
    Sanity,
    /// Needs operator intervention (`state reset` or a `backfill` bump)
    Fatal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorClass::Configuration => "configuration",
            ErrorClass::Transient => "transient",
            ErrorClass::Sanity => "sanity-check",
            ErrorClass::Fatal => "fatal",
        })
    }
}

/// Error surfaced by the capture runtime.
///
/// Every variant but [`CaptureError::Capture`] belongs to one binding and
/// never stops its siblings. `Capture` halts every binding.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("binding '{binding}': configuration error: {message}")]
    Config { binding: String, message: String },

    #[error("binding '{binding}': transient error: {message}")]
    Transient { binding: String, message: String },

    #[error("binding '{binding}': sanity-check error: {message}")]
    Sanity { binding: String, message: String },

    #[error("binding '{binding}': fatal error: {message}")]
    Fatal { binding: String, message: String },

    #[error("capture halted: fatal error: {message}")]
    Capture { message: String },
}

impl CaptureError {
    pub fn config(binding: &str, message: impl fmt::Display) -> Self {
        CaptureError::Config {
            binding: binding.to_string(),
            message: message.to_string(),
        }
    }

    pub fn transient(binding: &str, message: impl fmt::Display) -> Self {
        CaptureError::Transient {
            binding: binding.to_string(),
            message: message.to_string(),
        }
    }

    pub fn sanity(binding: &str, message: impl fmt::Display) -> Self {
        CaptureError::Sanity {
            binding: binding.to_string(),
            message: message.to_string(),
        }
    }

    pub fn fatal(binding: &str, message: impl fmt::Display) -> Self {
        CaptureError::Fatal {
            binding: binding.to_string(),
            message: message.to_string(),
        }
    }

    pub fn capture(message: impl fmt::Display) -> Self {
        CaptureError::Capture {
            message: message.to_string(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            CaptureError::Config { .. } => ErrorClass::Configuration,
            CaptureError::Transient { .. } => ErrorClass::Transient,
            CaptureError::Sanity { .. } => ErrorClass::Sanity,
            CaptureError::Fatal { .. } | CaptureError::Capture { .. } => ErrorClass::Fatal,
        }
    }

    /// Binding the error belongs to; `None` for capture-level errors.
    pub fn binding(&self) -> Option<&str> {
        match self {
            CaptureError::Config { binding, .. }
            | CaptureError::Transient { binding, .. }
            | CaptureError::Sanity { binding, .. }
            | CaptureError::Fatal { binding, .. } => Some(binding),
            CaptureError::Capture { .. } => None,
        }
    }

    /// Whether the error halts every binding.
    pub fn is_capture_level(&self) -> bool {
        matches!(self, CaptureError::Capture { .. })
    }
}
