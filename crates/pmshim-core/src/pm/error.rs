//! Package manager shim error types.

use std::backtrace::Backtrace;
use std::fmt;
use std::io;

/// Error codes.
pub mod codes {
    // Usage errors: surfaced verbatim, exit code 1
    pub const PM_UNSUPPORTED_TOOL: &str = "PM_UNSUPPORTED_TOOL";
    pub const PM_SPEC_INVALID: &str = "PM_SPEC_INVALID";
    pub const PM_TAG_NOT_ALLOWED: &str = "PM_TAG_NOT_ALLOWED";
    pub const PM_TAG_NOT_FOUND: &str = "PM_TAG_NOT_FOUND";
    pub const PM_VERSION_NOT_FOUND: &str = "PM_VERSION_NOT_FOUND";
    pub const PM_PIN_INVALID: &str = "PM_PIN_INVALID";
    pub const PM_PROJECT_MISMATCH: &str = "PM_PROJECT_MISMATCH";

    // Transport errors
    pub const PM_REGISTRY_ERROR: &str = "PM_REGISTRY_ERROR";
    pub const PM_DOWNLOAD_FAILED: &str = "PM_DOWNLOAD_FAILED";
    pub const PM_NETWORK_DISABLED: &str = "PM_NETWORK_DISABLED";

    // Local failures
    pub const PM_EXTRACT_FAILED: &str = "PM_EXTRACT_FAILED";
    pub const PM_CACHE_ERROR: &str = "PM_CACHE_ERROR";
    pub const PM_SPAWN_FAILED: &str = "PM_SPAWN_FAILED";

    // Internal invariant violations
    pub const PM_RANGE_KEY_MISSING: &str = "PM_RANGE_KEY_MISSING";
    pub const PM_BIN_NOT_DECLARED: &str = "PM_BIN_NOT_DECLARED";
}

/// Broad category of a [`PmError`], deciding how the CLI reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input from the user.
    Usage,
    /// Registry or download failure.
    Transport,
    /// Local I/O or process failure.
    Runtime,
    /// Broken internal invariant; a bug.
    Internal,
}

impl ErrorKind {
    /// Category of the error code `code`.
    #[must_use]
    pub fn of(code: &str) -> Self {
        match code {
            codes::PM_REGISTRY_ERROR | codes::PM_DOWNLOAD_FAILED | codes::PM_NETWORK_DISABLED => {
                Self::Transport
            }
            codes::PM_EXTRACT_FAILED | codes::PM_CACHE_ERROR | codes::PM_SPAWN_FAILED => {
                Self::Runtime
            }
            codes::PM_RANGE_KEY_MISSING | codes::PM_BIN_NOT_DECLARED => Self::Internal,
            _ => Self::Usage,
        }
    }
}

/// Package manager shim error.
#[derive(Debug)]
pub struct PmError {
    code: &'static str,
    message: String,
    /// Captured where an internal error is created.
    backtrace: Option<Backtrace>,
}

impl PmError {
    /// Create a new error with the given code and message.
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            backtrace: (ErrorKind::of(code) == ErrorKind::Internal)
                .then(Backtrace::force_capture),
        }
    }

    /// Get the error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Get the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Category of this error, derived from its code.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::of(self.code)
    }

    /// Stack at the point an internal error was created; `None` for other kinds.
    #[must_use]
    pub fn backtrace(&self) -> Option<&Backtrace> {
        self.backtrace.as_ref()
    }

    #[must_use]
    pub fn unsupported_tool(name: &str) -> Self {
        Self::new(
            codes::PM_UNSUPPORTED_TOOL,
            format!("Unsupported package manager specification ({name})"),
        )
    }

    pub fn spec_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::PM_SPEC_INVALID, msg)
    }

    #[must_use]
    pub fn tag_not_allowed(name: &str, tag: &str) -> Self {
        Self::new(
            codes::PM_TAG_NOT_ALLOWED,
            format!("Packages managers can't be referenced via tags in this context ({name}@{tag})"),
        )
    }

    #[must_use]
    pub fn tag_not_found(name: &str, tag: &str) -> Self {
        Self::new(
            codes::PM_TAG_NOT_FOUND,
            format!("Tag not found ({name}@{tag})"),
        )
    }

    #[must_use]
    pub fn version_not_found(name: &str, range: &str) -> Self {
        Self::new(
            codes::PM_VERSION_NOT_FOUND,
            format!("Failed to successfully resolve '{range}' to a valid {name} release"),
        )
    }

    pub fn pin_invalid(msg: impl Into<String>) -> Self {
        Self::new(codes::PM_PIN_INVALID, msg)
    }

    pub fn project_mismatch(msg: impl Into<String>) -> Self {
        Self::new(codes::PM_PROJECT_MISMATCH, msg)
    }

    pub fn registry(msg: impl Into<String>) -> Self {
        Self::new(codes::PM_REGISTRY_ERROR, msg)
    }

    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PM_DOWNLOAD_FAILED, msg)
    }

    #[must_use]
    pub fn network_disabled(url: &str) -> Self {
        Self::new(
            codes::PM_NETWORK_DISABLED,
            format!("Network access disabled by the environment; can't reach {url}"),
        )
    }

    pub fn extract_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PM_EXTRACT_FAILED, msg)
    }

    pub fn cache_error(msg: impl Into<String>) -> Self {
        Self::new(codes::PM_CACHE_ERROR, msg)
    }

    pub fn spawn_failed(msg: impl Into<String>) -> Self {
        Self::new(codes::PM_SPAWN_FAILED, msg)
    }

    #[must_use]
    pub fn range_key_missing(name: &str, reference: &str) -> Self {
        Self::new(
            codes::PM_RANGE_KEY_MISSING,
            format!("No release spec declared for {name}@{reference}"),
        )
    }

    #[must_use]
    pub fn bin_not_declared(bin: &str, name: &str, reference: &str) -> Self {
        Self::new(
            codes::PM_BIN_NOT_DECLARED,
            format!("Binary '{bin}' is not declared by {name}@{reference}"),
        )
    }
}

impl fmt::Display for PmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for PmError {}

impl From<io::Error> for PmError {
    fn from(e: io::Error) -> Self {
        Self::new(codes::PM_CACHE_ERROR, e.to_string())
    }
}

impl From<reqwest::Error> for PmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::new(codes::PM_REGISTRY_ERROR, format!("Request timed out: {e}"))
        } else if e.is_connect() {
            Self::new(codes::PM_REGISTRY_ERROR, format!("Connection failed: {e}"))
        } else {
            Self::new(codes::PM_REGISTRY_ERROR, e.to_string())
        }
    }
}

impl From<serde_json::Error> for PmError {
    fn from(e: serde_json::Error) -> Self {
        Self::new(codes::PM_REGISTRY_ERROR, format!("Invalid JSON: {e}"))
    }
}
