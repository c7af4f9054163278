//! Linux process specific introspection.
//!
//! [`LinuxProcess`] ties a [`RemiCore`] to the kernel's per-process
//! filesystem view ([`ProcFs`]) and to the `struct pthread` offset resolver
//! ([`PthreadOffsetResolver`]).

mod error;
mod maps;
mod procfs;
mod pthread;

use std::path::{Path, PathBuf};

use remi_core::{
    MemoryAccess, ProcessId, RemiCore, RemiError, RemiPauseGuard, RemiRead, RemoteAddress,
};

pub use self::{
    error::LinuxError,
    maps::{MemoryMap, parse_maps},
    procfs::{DEFAULT_MOUNT_POINT, ProcFs, Statm},
    pthread::{PTHREAD_BUFFER_ITEMS, PthreadOffsetResolver, find_word},
};

/// Pseudo-regions that are readable by permission but cannot be accessed
/// through the debug interface.
const INACCESSIBLE_REGIONS: &[&str] = &["[vvar]", "[vvar_vclock]", "[vsyscall]"];

/// An attached Linux process.
///
/// Owns the driver (and with it the attach relationship), the page size and
/// memory statistics path read once at creation, and the `struct pthread`
/// offset resolver. Dropping the process releases the driver.
///
/// A `LinuxProcess` is driven by a single controlling thread. Calls on one
/// instance must not be reentrant.
pub struct LinuxProcess<Driver>
where
    Driver: RemiRead,
{
    core: RemiCore<Driver>,
    procfs: ProcFs,
    pid: ProcessId,
    page_size: u64,
    statm_path: PathBuf,
    resolver: PthreadOffsetResolver,
}

impl<Driver> LinuxProcess<Driver>
where
    Driver: RemiRead,
{
    /// Creates a new `LinuxProcess` using the pseudo-filesystem at `/proc`.
    pub fn new(core: RemiCore<Driver>) -> Result<Self, RemiError> {
        Self::with_procfs(core, ProcFs::default())
    }

    /// Creates a new `LinuxProcess` using the given pseudo-filesystem.
    pub fn with_procfs(core: RemiCore<Driver>, procfs: ProcFs) -> Result<Self, RemiError> {
        let info = core.info()?;
        let statm_path = procfs.status_path(info.pid, "statm");

        Ok(Self {
            core,
            procfs,
            pid: info.pid,
            page_size: info.page_size,
            statm_path,
            resolver: PthreadOffsetResolver::new(),
        })
    }

    /// Returns the core.
    pub fn core(&self) -> &RemiCore<Driver> {
        &self.core
    }

    /// Returns the pseudo-filesystem gateway.
    pub fn procfs(&self) -> &ProcFs {
        &self.procfs
    }

    /// Returns the process identifier.
    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Returns the page size of the target.
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Returns the path of the memory statistics file.
    pub fn statm_path(&self) -> &Path {
        &self.statm_path
    }

    /// Reads memory from the target into the whole `buffer`.
    pub fn read(&self, address: RemoteAddress, buffer: &mut [u8]) -> Result<(), RemiError> {
        self.core.read(address, buffer)
    }

    /// Reads `length` bytes from the target into the beginning of `buffer`.
    pub fn read_into<'b>(
        &self,
        address: RemoteAddress,
        buffer: &'b mut [u8],
        length: usize,
    ) -> Result<&'b [u8], RemiError> {
        self.core.read_into(address, buffer, length)
    }

    /// Pauses the target and returns a guard that resumes it when dropped.
    pub fn pause_guard(&self) -> Result<RemiPauseGuard<'_, Driver>, RemiError> {
        self.core.pause_guard()
    }

    /// Resolves the offset of the thread identifier within `struct pthread`.
    ///
    /// `pthread` is the address of a known thread's control block (its
    /// `pthread_t`) and `expected` the value stored there for that thread.
    pub fn resolve_offset(&self, pthread: RemoteAddress, expected: u64) -> Result<usize, RemiError> {
        self.resolver.resolve_offset(&self.core, pthread, expected)
    }

    /// Returns the resolved offset of the thread identifier, if any.
    pub fn pthread_tid_offset(&self) -> Option<usize> {
        self.resolver.offset()
    }

    /// Reads the thread identifier stored in the control block at `pthread`.
    pub fn read_thread_id(&self, pthread: RemoteAddress) -> Result<u64, RemiError> {
        self.resolver.read_thread_word(&self.core, pthread)
    }

    /// Reads the memory statistics of the target.
    pub fn statm(&self) -> Result<Statm, RemiError> {
        procfs::read_statm(&self.statm_path)
    }

    /// Returns the resident memory of the target in bytes.
    pub fn memory_usage(&self) -> Result<u64, RemiError> {
        Ok(self.statm()?.resident * self.page_size)
    }

    /// Reads the memory map of the target.
    pub fn memory_maps(&self) -> Result<Vec<MemoryMap>, RemiError> {
        self.procfs.memory_maps(self.pid)
    }

    /// Lists the thread identifiers of the target.
    pub fn threads(&self) -> Result<Vec<ProcessId>, RemiError> {
        self.procfs.threads(self.pid)
    }

    /// Resolves the executable of the target.
    pub fn exe(&self) -> Result<PathBuf, RemiError> {
        self.procfs.exe(self.pid)
    }

    /// Translates a path as seen by the target into a path openable by the
    /// inspector.
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> Result<Option<PathBuf>, RemiError> {
        self.procfs.resolve_under_root(self.pid, path)
    }

    /// Performs an initial read of the first readable region of the target
    /// and returns its address.
    ///
    /// The target must be paused.
    pub fn calibrate(&self) -> Result<RemoteAddress, RemiError> {
        let maps = self.memory_maps()?;

        let map = maps
            .iter()
            .find(|map| {
                map.access.contains(MemoryAccess::R)
                    && map.size() != 0
                    && !map.path.as_ref().is_some_and(|path| {
                        INACCESSIBLE_REGIONS
                            .iter()
                            .any(|region| path.as_os_str() == *region)
                    })
            })
            .ok_or(RemiError::Other("no readable memory region"))?;

        let word = self.core.read_word(map.start)?;
        tracing::trace!(address = %map.start, word, "calibration read");

        Ok(map.start)
    }

    /// Detaches from the target.
    pub fn detach(self) -> Result<(), RemiError> {
        self.core.detach()
    }
}
