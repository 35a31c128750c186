//! Error types for the coordination layer.
//!
//! Every error maps onto a stable numeric status so that it can travel in a
//! response message. `0` is success; failures sit above [`ERROR_CODE_BASE`].

use crate::codec::CodecError;
use objectstore_storage::StorageError;
use thiserror::Error;

/// Result type for coordination operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Wire status for a successful operation.
pub const SUCCESS: u32 = 0;

/// Offset of the first failure status.
pub const ERROR_CODE_BASE: u32 = 1650;

const INVALID_ARGUMENT: u32 = ERROR_CODE_BASE + 1;
const ALLOCATION: u32 = ERROR_CODE_BASE + 2;
const STORAGE: u32 = ERROR_CODE_BASE + 9;
const NETWORK: u32 = ERROR_CODE_BASE + 10;
const TIMEOUT: u32 = ERROR_CODE_BASE + 11;
const INVALID_MESSAGE: u32 = ERROR_CODE_BASE + 13;
const INIT: u32 = ERROR_CODE_BASE + 14;
const NOT_FOUND: u32 = ERROR_CODE_BASE + 21;
const ALREADY_EXISTS: u32 = ERROR_CODE_BASE + 35;

/// Errors that can occur while coordinating object operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// Bad configuration, key or handler.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A message or operation could not be constructed.
    #[error("allocation failure: {0}")]
    Allocation(String),

    /// The storage engine rejected the operation.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Send or session failure. Retryable.
    #[error("network error: {0}")]
    Network(String),

    /// No response arrived within the request timeout. Retryable.
    #[error("operation timed out")]
    Timeout,

    /// Malformed or over-length payload.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Nothing is registered to serve the request, or the subsystem is down.
    #[error("not initialized: {0}")]
    Init(String),

    /// No such observer, subject or task.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate registration.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A peer reported a status this build does not recognise.
    #[error("remote failure status {0}")]
    Remote(u32),
}

impl CoordinatorError {
    /// Numeric wire status for this error.
    pub fn code(&self) -> u32 {
        match self {
            Self::InvalidArgument(_) => INVALID_ARGUMENT,
            Self::Allocation(_) => ALLOCATION,
            Self::Storage(_) => STORAGE,
            Self::Network(_) => NETWORK,
            Self::Timeout => TIMEOUT,
            Self::InvalidMessage(_) => INVALID_MESSAGE,
            Self::Init(_) => INIT,
            Self::NotFound(_) => NOT_FOUND,
            Self::AlreadyExists(_) => ALREADY_EXISTS,
            Self::Remote(code) => *code,
        }
    }

    /// Rebuilds an error from a failure status received from a peer.
    pub fn from_code(code: u32) -> Self {
        const PEER: &str = "reported by peer";
        match code {
            INVALID_ARGUMENT => Self::InvalidArgument(PEER.into()),
            ALLOCATION => Self::Allocation(PEER.into()),
            STORAGE => Self::Storage(StorageError::Backend(PEER.into())),
            NETWORK => Self::Network(PEER.into()),
            TIMEOUT => Self::Timeout,
            INVALID_MESSAGE => Self::InvalidMessage(PEER.into()),
            INIT => Self::Init(PEER.into()),
            NOT_FOUND => Self::NotFound(PEER.into()),
            ALREADY_EXISTS => Self::AlreadyExists(PEER.into()),
            other => Self::Remote(other),
        }
    }

    /// Turns a wire status into a result.
    pub fn check(status: u32) -> CoordinatorResult<()> {
        if status == SUCCESS {
            Ok(())
        } else {
            Err(Self::from_code(status))
        }
    }

    /// Wire status for the outcome of an operation.
    pub fn status_of<T>(result: &CoordinatorResult<T>) -> u32 {
        match result {
            Ok(_) => SUCCESS,
            Err(e) => e.code(),
        }
    }

    /// Whether background loops should retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }
}

impl From<CodecError> for CoordinatorError {
    fn from(e: CodecError) -> Self {
        Self::InvalidMessage(e.to_string())
    }
}

impl From<objectstore_types::Error> for CoordinatorError {
    fn from(e: objectstore_types::Error) -> Self {
        Self::InvalidArgument(e.to_string())
    }
}

impl From<serde_json::Error> for CoordinatorError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidArgument(format!("config: {e}"))
    }
}
