use crate::{AttachState, RemoteAddress};

/// An error that can occur while introspecting a remote process.
///
/// The enum is intentionally detailed; callers that only need to decide what
/// to do next should branch on [`RemiError::kind`] instead.
#[derive(thiserror::Error, Debug)]
pub enum RemiError {
    /// An error occurred in the driver.
    #[error(transparent)]
    Driver(Box<dyn std::error::Error + Send + Sync>),

    /// An OS-specific error occurred.
    #[error(transparent)]
    Os(Box<dyn std::error::Error + Send + Sync>),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The inspector lacks the privilege to inspect the target.
    #[error("Permission denied (elevated privileges are required to inspect the process)")]
    PermissionDenied,

    /// The process identifier does not resolve to a live process.
    #[error("No such process")]
    NoSuchProcess,

    /// The target is temporarily unable to serve the request.
    ///
    /// This is a transient condition reported by a single driver attempt.
    /// [`RemiCore`] retries it and never returns it to its callers.
    ///
    /// [`RemiCore`]: crate::RemiCore
    #[error("Process busy")]
    Busy,

    /// The bounded retry window elapsed without a successful attempt.
    #[error("Operation timed out at {0}")]
    Timeout(RemoteAddress),

    /// The requested range extends past the end of the address space.
    #[error("Address range at {0} overflows the address space")]
    AddressOverflow(RemoteAddress),

    /// The requested length exceeds the supplied buffer.
    #[error("Requested {length} bytes into a buffer of {capacity} bytes")]
    OutOfBounds {
        /// The requested length.
        length: usize,

        /// The capacity of the buffer.
        capacity: usize,
    },

    /// An argument violated the operation's contract.
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The attach state machine rejected a transition.
    #[error("Invalid attach state transition from {from:?} to {to:?}")]
    InvalidTransition {
        /// The current state.
        from: AttachState,

        /// The requested state.
        to: AttachState,
    },

    /// The operation requires an attached process.
    #[error("Process is not attached ({0:?})")]
    NotAttached(AttachState),

    /// The sought value was not found in the scanned window.
    #[error("Value not found within {0} bytes")]
    NotFound(usize),

    /// An allocation failed.
    #[error("Resource exhausted")]
    ResourceExhausted,

    /// Operation not supported.
    #[error("Operation not supported.")]
    NotSupported,

    /// Other error.
    #[error("{0}")]
    Other(&'static str),
}

/// The process introspection error taxonomy.
///
/// Every [`RemiError`] belongs to exactly one of these kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The inspector lacks privilege to read the target's memory or
    /// pseudo-filesystem entries.
    PermissionDenied,

    /// The target identifier no longer resolves.
    NoSuchProcess,

    /// Any other inspection failure.
    InspectionFailure,
}

impl RemiError {
    /// Returns the kind of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PermissionDenied => ErrorKind::PermissionDenied,
            Self::NoSuchProcess => ErrorKind::NoSuchProcess,
            _ => ErrorKind::InspectionFailure,
        }
    }

    /// Checks whether the error is caused by misuse of the API rather than
    /// by the state of the target.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::OutOfBounds { .. } | Self::InvalidArgument(_) | Self::InvalidTransition { .. }
        )
    }

    /// Checks whether the error is the transient "process busy" indication.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy)
    }
}
