//! Remote process introspection for live sampling profilers.
//!
//! The crate attaches to a running process without its cooperation, reads
//! its memory, and resolves the per-process files and offsets a sampler
//! needs to reconstruct the target's thread state.
//!
//! ```no_run
//! use remi::RemoteAddress;
//!
//! # fn main() -> Result<(), remi::RemiError> {
//! let process = remi::attach(1234u32)?;
//!
//! let pause = process.pause_guard()?;
//! let offset = process.resolve_offset(RemoteAddress(0x7f12_3456_7000), 1234)?;
//! drop(pause);
//!
//! println!("thread id lives at offset {offset}");
//! process.detach()?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub use remi_core::*;

/// Drivers.
pub mod driver {
    /// Linux ptrace driver.
    #[cfg(feature = "driver-ptrace")]
    #[cfg_attr(docsrs, doc(cfg(feature = "driver-ptrace")))]
    pub mod ptrace {
        pub use remi_driver_ptrace::*;
    }
}

/// Operating system specific code.
pub mod os {
    /// Linux process introspection.
    #[cfg(feature = "os-linux")]
    #[cfg_attr(docsrs, doc(cfg(feature = "os-linux")))]
    pub mod linux {
        pub use remi_os_linux::*;
    }
}

/// Attaches to the process with the given identifier.
///
/// Seizes the target, reads its memory statistics path and page size, and
/// performs an initial calibration read while the target is briefly paused.
/// The target keeps running once this returns.
#[cfg(all(feature = "driver-ptrace", feature = "os-linux", target_os = "linux"))]
pub fn attach(
    pid: impl Into<ProcessId>,
) -> Result<os::linux::LinuxProcess<driver::ptrace::RemiPtraceDriver>, RemiError> {
    let pid = pid.into();

    let driver = driver::ptrace::RemiPtraceDriver::attach(pid)?;
    let process = os::linux::LinuxProcess::new(RemiCore::new(driver)?)?;

    {
        let _pause_guard = process.pause_guard()?;
        let address = process.calibrate()?;
        tracing::debug!(%pid, %address, "attached");
    }

    Ok(process)
}

#[cfg(all(
    test,
    feature = "driver-ptrace",
    feature = "os-linux",
    target_os = "linux"
))]
