use std::{fmt::Display, io};

/// Error returned from `usbhost` operations other than transfers.
#[derive(Debug, Clone)]
pub struct Error {
    pub(crate) kind: ErrorKind,
    pub(crate) message: &'static str,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }

    #[track_caller]
    pub(crate) fn log_error(self) -> Self {
        log::error!("{}", self);
        self
    }

    #[track_caller]
    pub(crate) fn log_debug(self) -> Self {
        log::debug!("{}", self);
        self
    }

    /// Get the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Construct an error from a backend.
    ///
    /// Bus implementations use this to report failures of the operations
    /// they provide.
    pub fn backend(kind: ErrorKind, message: &'static str) -> Self {
        Self::new(kind, message)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        let kind = match err.kind {
            ErrorKind::OutOfMemory => io::ErrorKind::OutOfMemory,
            ErrorKind::Busy => io::ErrorKind::AlreadyExists,
            ErrorKind::NotFound => io::ErrorKind::NotFound,
            ErrorKind::Unsupported => io::ErrorKind::Unsupported,
            ErrorKind::Other => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// General category of error as part of an [`Error`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Memory for a batch or its buffer could not be allocated.
    OutOfMemory,

    /// An endpoint with the same target and direction is already installed.
    Busy,

    /// Requested endpoint not found.
    NotFound,

    /// The bus backend does not provide the requested operation.
    Unsupported,

    /// Uncategorized error.
    Other,
}

/// Transfer error.
///
/// This is the error status carried by a [`TransferBatch`][crate::TransferBatch].
/// Success is represented by `Ok(())` in a `Result<(), TransferError>`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Transfer was cancelled or aborted before it completed.
    Cancelled,

    /// Endpoint in a STALL condition.
    Stall,

    /// Device disconnected.
    Disconnected,

    /// Hardware issue or protocol violation (CRC, bit stuffing, babble, ...).
    Fault,

    /// The request was rejected by the backend as malformed.
    InvalidArgument,

    /// Unknown or controller-specific error, with the raw completion code.
    Unknown(u32),
}

impl Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferError::Cancelled => write!(f, "transfer was cancelled"),
            TransferError::Stall => write!(f, "endpoint stalled"),
            TransferError::Disconnected => write!(f, "device disconnected"),
            TransferError::Fault => write!(f, "hardware fault or protocol violation"),
            TransferError::InvalidArgument => write!(f, "invalid or unsupported argument"),
            TransferError::Unknown(code) => write!(f, "unknown error (code {code:#x})"),
        }
    }
}

impl std::error::Error for TransferError {}

impl From<TransferError> for io::Error {
    fn from(value: TransferError) -> Self {
        match value {
            TransferError::Cancelled => io::Error::new(io::ErrorKind::Interrupted, value),
            TransferError::Stall => io::Error::new(io::ErrorKind::ConnectionReset, value),
            TransferError::Disconnected => io::Error::new(io::ErrorKind::ConnectionAborted, value),
            TransferError::Fault => io::Error::other(value),
            TransferError::InvalidArgument => io::Error::new(io::ErrorKind::InvalidInput, value),
            TransferError::Unknown(_) => io::Error::other(value),
        }
    }
}

#[test]
fn test_io_error_kinds() {
    let e: io::Error = Error::new(ErrorKind::Unsupported, "no toggle reset").into();
    assert_eq!(e.kind(), io::ErrorKind::Unsupported);
    assert_eq!(e.to_string(), "no toggle reset");

    let e: io::Error = TransferError::Cancelled.into();
    assert_eq!(e.kind(), io::ErrorKind::Interrupted);
}

#[test]
fn test_unknown_display() {
    assert_eq!(
        TransferError::Unknown(0x0d).to_string(),
        "unknown error (code 0xd)"
    );
}
