use crate::{AttachState, RemiError, RemiInfo, RemoteAddress};

/// A trait for implementing a remote introspection driver.
///
/// A driver wraps one platform's attach and debug facilities for a single
/// target process. Implementations are selected at build time; callers only
/// ever see this interface.
pub trait RemiDriver {
    /// Retrieves information about the attached process.
    fn info(&self) -> Result<RemiInfo, RemiError>;

    /// Returns the current attach state.
    fn state(&self) -> AttachState;

    /// Stops the target so that its memory can be read consistently.
    fn pause(&self) -> Result<(), RemiError>;

    /// Lets a paused target continue.
    fn resume(&self) -> Result<(), RemiError>;

    /// Releases the attach relationship.
    ///
    /// Detaching an already detached target is a no-op.
    fn detach(&self) -> Result<(), RemiError>;
}

/// A driver that can read the memory of the target.
pub trait RemiRead: RemiDriver {
    /// Performs a single attempt at reading `buffer.len()` bytes starting at
    /// `address`.
    ///
    /// Returns [`RemiError::Busy`] when the attempt failed only because of
    /// the target's current scheduling state. Retrying is the caller's
    /// business.
    fn read_memory(&self, address: RemoteAddress, buffer: &mut [u8]) -> Result<(), RemiError>;
}
