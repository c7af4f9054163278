//! Remote introspection driver for Linux processes, built on ptrace.
//!
//! The driver attaches with `PTRACE_SEIZE`, which leaves the target running.
//! Memory is read with `PTRACE_PEEKDATA`, and the kernel only serves peeks
//! while the tracee sits in a ptrace stop. A read issued while the target is
//! running, or is still on its way into the stop, fails with `ESRCH`. The
//! driver reports that as [`RemiError::Busy`] and leaves the retrying to
//! [`RemiCore`]. Pause the target (see [`RemiCore::pause_guard`]) before a
//! burst of reads.
//!
//! [`RemiError::Busy`]: remi_core::RemiError::Busy
//! [`RemiCore`]: remi_core::RemiCore
//! [`RemiCore::pause_guard`]: remi_core::RemiCore::pause_guard

#![cfg(target_os = "linux")]

mod driver;
mod error;
mod watcher;

use std::thread::ThreadId;

use remi_core::{
    AttachState, ProcessId, RemiDriver, RemiError, RemiInfo, RemiRead, RemoteAddress,
};

pub use self::error::Error;
use self::driver::PtraceDriver;

/// Remote introspection driver for Linux processes.
pub struct RemiPtraceDriver {
    inner: PtraceDriver,
}

impl RemiPtraceDriver {
    /// Attaches to the process with the given identifier.
    ///
    /// Spawns the watcher thread that owns the trace relationship for the
    /// lifetime of the driver. The target keeps running.
    pub fn attach(pid: impl Into<ProcessId>) -> Result<Self, RemiError> {
        Ok(Self {
            inner: PtraceDriver::attach(pid.into())?,
        })
    }

    /// Returns the identifier of the watcher thread, while attached.
    pub fn watcher_thread_id(&self) -> Option<ThreadId> {
        self.inner.watcher_thread_id()
    }
}

impl RemiDriver for RemiPtraceDriver {
    fn info(&self) -> Result<RemiInfo, RemiError> {
        Ok(self.inner.info()?)
    }

    fn state(&self) -> AttachState {
        self.inner.state()
    }

    fn pause(&self) -> Result<(), RemiError> {
        Ok(self.inner.pause()?)
    }

    fn resume(&self) -> Result<(), RemiError> {
        Ok(self.inner.resume()?)
    }

    fn detach(&self) -> Result<(), RemiError> {
        Ok(self.inner.detach()?)
    }
}

impl RemiRead for RemiPtraceDriver {
    fn read_memory(&self, address: RemoteAddress, buffer: &mut [u8]) -> Result<(), RemiError> {
        Ok(self.inner.read_memory(address, buffer)?)
    }
}
