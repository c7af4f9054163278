use nix::errno::Errno;
use remi_core::{AttachState, ProcessId, RemoteAddress};

/// Error type for the ptrace driver.
#[derive(Debug)]
pub enum Error {
    /// A ptrace or wait request failed.
    Errno(Errno),

    /// An I/O error occurred.
    Io(std::io::Error),

    /// The tracee is not in a state that allows the request.
    Busy,

    /// The target process does not exist or has exited.
    NoSuchProcess,

    /// The caller is not allowed to trace the target process.
    PermissionDenied,

    /// The process identifier cannot name a process.
    InvalidProcessId(ProcessId),

    /// The requested range wraps around the end of the address space.
    AddressOverflow(RemoteAddress),

    /// The watcher thread is no longer running.
    WatcherGone,

    /// The attach state machine rejected a transition.
    Transition {
        /// The current state.
        from: AttachState,

        /// The requested state.
        to: AttachState,
    },

    /// The request requires an attached process.
    NotAttached(AttachState),
}

impl Error {
    /// Classifies a failed attach request.
    pub(crate) fn attach(errno: Errno) -> Self {
        match errno {
            Errno::ESRCH => Self::NoSuchProcess,
            Errno::EPERM | Errno::EACCES => Self::PermissionDenied,
            errno => Self::Errno(errno),
        }
    }

    /// Classifies a failed memory peek.
    ///
    /// `ESRCH` on a peek means that the tracee is not in a ptrace stop yet.
    pub(crate) fn peek(errno: Errno) -> Self {
        match errno {
            Errno::ESRCH => Self::Busy,
            Errno::EPERM | Errno::EACCES => Self::PermissionDenied,
            errno => Self::Errno(errno),
        }
    }

    /// Classifies a failed stop, continue, wait or detach request.
    pub(crate) fn control(errno: Errno) -> Self {
        match errno {
            Errno::ESRCH | Errno::ECHILD => Self::NoSuchProcess,
            Errno::EPERM | Errno::EACCES => Self::PermissionDenied,
            errno => Self::Errno(errno),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<Error> for remi_core::RemiError {
    fn from(value: Error) -> Self {
        match value {
            Error::Errno(errno) => Self::Driver(Box::new(errno)),
            Error::Io(err) => Self::Io(err),
            Error::Busy => Self::Busy,
            Error::NoSuchProcess => Self::NoSuchProcess,
            Error::PermissionDenied => Self::PermissionDenied,
            Error::InvalidProcessId(_) => {
                Self::InvalidArgument("process identifier out of range")
            }
            Error::AddressOverflow(address) => Self::AddressOverflow(address),
            Error::WatcherGone => Self::Other("watcher thread terminated"),
            Error::Transition { from, to } => Self::InvalidTransition { from, to },
            Error::NotAttached(state) => Self::NotAttached(state),
        }
    }
}
