//! Error types for Tessera
//!
//! One error type for the server, the container layer and the client.
//! Every variant maps onto a wire [`ErrorCode`] so that it can be turned into
//! an error answer at the dispatch boundary.

use thiserror::Error;

/// Result type alias using TesseraError
pub type Result<T> = std::result::Result<T, TesseraError>;

/// Numeric error codes carried in the `error_code` field of an error answer
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Success = 0,
    Generic = -1,
    Network = -2,
    Protocol = -3,
    MissingParameter = -4,
    NoSuchObject = -5,
    Timeout = -6,
    OutOfMemory = -7,
    AccessDenied = -8,
}

impl ErrorCode {
    /// Map a wire value back to a code. Unknown values collapse into `Generic`.
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => ErrorCode::Success,
            -2 => ErrorCode::Network,
            -3 => ErrorCode::Protocol,
            -4 => ErrorCode::MissingParameter,
            -5 => ErrorCode::NoSuchObject,
            -6 => ErrorCode::Timeout,
            -7 => ErrorCode::OutOfMemory,
            -8 => ErrorCode::AccessDenied,
            _ => ErrorCode::Generic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Success => "success",
            ErrorCode::Generic => "generic error",
            ErrorCode::Network => "network error",
            ErrorCode::Protocol => "protocol error",
            ErrorCode::MissingParameter => "missing parameter",
            ErrorCode::NoSuchObject => "no such object",
            ErrorCode::Timeout => "timeout",
            ErrorCode::OutOfMemory => "out of memory",
            ErrorCode::AccessDenied => "access denied",
        }
    }
}

/// Unified error type for Tessera operations
#[derive(Debug, Error)]
pub enum TesseraError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Network / Protocol Errors
    // -------------------------------------------------------------------------
    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    // -------------------------------------------------------------------------
    // Container / Session Errors
    // -------------------------------------------------------------------------
    #[error("No such object: {0}")]
    NoSuchObject(String),

    #[error("Invalid handle: {0}")]
    InvalidHandle(i32),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    // -------------------------------------------------------------------------
    // Remote Errors (decoded from an error answer)
    // -------------------------------------------------------------------------
    #[error("{description}")]
    Remote { code: ErrorCode, description: String },

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TesseraError {
    /// Wire code reported for this error in an error answer
    pub fn code(&self) -> ErrorCode {
        match self {
            TesseraError::Io(_) | TesseraError::Network(_) => ErrorCode::Network,
            TesseraError::Protocol(_) | TesseraError::InvalidHandle(_) => ErrorCode::Protocol,
            TesseraError::MissingParameter(_) => ErrorCode::MissingParameter,
            TesseraError::Timeout(_) => ErrorCode::Timeout,
            TesseraError::NoSuchObject(_) => ErrorCode::NoSuchObject,
            TesseraError::AccessDenied(_) => ErrorCode::AccessDenied,
            TesseraError::OutOfMemory(_) => ErrorCode::OutOfMemory,
            TesseraError::Remote { code, .. } => *code,
            TesseraError::Container(_) | TesseraError::Config(_) => ErrorCode::Generic,
        }
    }

    /// Human readable description without the category prefix, as sent on the wire
    pub fn description(&self) -> String {
        match self {
            TesseraError::Network(s)
            | TesseraError::Protocol(s)
            | TesseraError::MissingParameter(s)
            | TesseraError::Timeout(s)
            | TesseraError::NoSuchObject(s)
            | TesseraError::Container(s)
            | TesseraError::AccessDenied(s)
            | TesseraError::OutOfMemory(s)
            | TesseraError::Config(s) => s.clone(),
            TesseraError::InvalidHandle(h) => format!("invalid handle {}", h),
            TesseraError::Remote { description, .. } => description.clone(),
            TesseraError::Io(e) => e.to_string(),
        }
    }

    /// True for the "not found" family that triggers a cluster lookup on the client
    pub fn is_no_such_object(&self) -> bool {
        self.code() == ErrorCode::NoSuchObject
    }

    /// True when the connection that produced this error can no longer be used
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TesseraError::Io(_) | TesseraError::Network(_) | TesseraError::Protocol(_)
        )
    }
}
