use std::fmt;

use thiserror::Error;

/// Terminal outcome of a library call.
///
/// Every public entry point either succeeds or reports exactly one of these codes. The layer
/// never retries on its own; retrying after `MemoryError` is a caller decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    InvalidHandle,
    InvalidPointer,
    InvalidValue,
    InvalidSize,
    MemoryError,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::InvalidHandle => "invalid handle",
            Status::InvalidPointer => "invalid pointer",
            Status::InvalidValue => "invalid value",
            Status::InvalidSize => "invalid size",
            Status::MemoryError => "memory error",
        }
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }

    /// Folds a call result into its status code.
    pub fn of<T>(result: &BlasResult<T>) -> Status {
        match result {
            Ok(_) => Status::Success,
            Err(err) => err.status(),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error surfaced by validation, dispatch, or execution.
///
/// The status is never `Success`; the detail names the argument or condition that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{status}{}", detail_suffix(.detail))]
pub struct BlasError {
    status: Status,
    detail: Option<String>,
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(detail) => format!(" ({detail})"),
        None => String::new(),
    }
}

impl BlasError {
    fn new(status: Status, detail: impl Into<String>) -> Self {
        debug_assert!(status != Status::Success);
        Self {
            status,
            detail: Some(detail.into()),
        }
    }

    pub fn invalid_handle() -> Self {
        Self {
            status: Status::InvalidHandle,
            detail: None,
        }
    }

    pub fn invalid_pointer(detail: impl Into<String>) -> Self {
        Self::new(Status::InvalidPointer, detail)
    }

    pub fn invalid_value(detail: impl Into<String>) -> Self {
        Self::new(Status::InvalidValue, detail)
    }

    pub fn invalid_size(detail: impl Into<String>) -> Self {
        Self::new(Status::InvalidSize, detail)
    }

    pub fn memory_error(detail: impl Into<String>) -> Self {
        Self::new(Status::MemoryError, detail)
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

/// Convenience alias for results returned by library routines.
pub type BlasResult<T> = Result<T, BlasError>;
