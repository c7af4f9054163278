use std::{
    ffi::OsString,
    fs::File,
    io::{self, Read as _},
    path::{Path, PathBuf},
    str::FromStr,
};

use remi_core::{ProcessId, RemiError};

use crate::{LinuxError, MemoryMap, maps::parse_maps};

/// The conventional mount point of the process pseudo-filesystem.
pub const DEFAULT_MOUNT_POINT: &str = "/proc";

/// Gateway onto the kernel's per-process filesystem view.
///
/// Every failure to open a per-process entry is classified the same way:
/// a permission error means the inspector lacks privilege, a missing entry
/// means the process is gone, and anything else is an inspection failure.
#[derive(Debug, Clone)]
pub struct ProcFs {
    mount_point: PathBuf,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::with_mount_point(DEFAULT_MOUNT_POINT)
    }
}

impl ProcFs {
    /// Creates a gateway onto a pseudo-filesystem mounted at `mount_point`.
    pub fn with_mount_point(mount_point: impl Into<PathBuf>) -> Self {
        Self {
            mount_point: mount_point.into(),
        }
    }

    /// Returns the mount point.
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// Returns the directory of the given process.
    pub fn process_path(&self, pid: ProcessId) -> PathBuf {
        self.mount_point.join(pid.to_string())
    }

    /// Returns the path of a per-process pseudo-file, such as
    /// `/proc/<pid>/statm`.
    pub fn status_path(&self, pid: ProcessId, name: &str) -> PathBuf {
        self.process_path(pid).join(name)
    }

    /// Opens a per-process pseudo-file for reading.
    pub fn open_status_file(&self, pid: ProcessId, name: &str) -> Result<File, RemiError> {
        File::open(self.status_path(pid, name)).map_err(classify)
    }

    /// Reads a per-process pseudo-file into a string.
    pub fn read_status_file(&self, pid: ProcessId, name: &str) -> Result<String, RemiError> {
        read_to_string(&self.status_path(pid, name))
    }

    /// Translates a path that is absolute within the target's filesystem
    /// view into a path openable from the inspector's view, by going through
    /// `/proc/<pid>/root`.
    ///
    /// A relative `path` is a programming error. It is logged and yields
    /// `None` without touching the filesystem.
    pub fn resolve_under_root(
        &self,
        pid: ProcessId,
        path: impl AsRef<Path>,
    ) -> Result<Option<PathBuf>, RemiError> {
        let path = path.as_ref();
        if !path.is_absolute() {
            tracing::error!(%pid, path = %path.display(), "refusing to resolve a relative path");
            return Ok(None);
        }

        let root = self.status_path(pid, "root");

        let mut result = OsString::new();
        result
            .try_reserve_exact(root.as_os_str().len() + path.as_os_str().len())
            .map_err(|_| RemiError::ResourceExhausted)?;
        result.push(root.as_os_str());
        result.push(path.as_os_str());

        Ok(Some(PathBuf::from(result)))
    }

    /// Reads the memory statistics of the given process.
    pub fn statm(&self, pid: ProcessId) -> Result<Statm, RemiError> {
        read_statm(&self.status_path(pid, "statm"))
    }

    /// Reads the memory map of the given process.
    pub fn memory_maps(&self, pid: ProcessId) -> Result<Vec<MemoryMap>, RemiError> {
        let contents = std::fs::read(self.status_path(pid, "maps")).map_err(classify)?;
        Ok(parse_maps(&contents)?)
    }

    /// Lists the thread identifiers of the given process, in ascending
    /// order.
    pub fn threads(&self, pid: ProcessId) -> Result<Vec<ProcessId>, RemiError> {
        let mut result = Vec::new();

        for entry in std::fs::read_dir(self.status_path(pid, "task")).map_err(classify)? {
            let entry = entry.map_err(classify)?;

            if let Some(tid) = entry.file_name().to_str().and_then(|s| s.parse().ok()) {
                result.push(ProcessId(tid));
            }
        }

        result.sort_unstable();
        Ok(result)
    }

    /// Resolves the executable of the given process.
    pub fn exe(&self, pid: ProcessId) -> Result<PathBuf, RemiError> {
        std::fs::read_link(self.status_path(pid, "exe")).map_err(classify)
    }
}

/// Memory statistics of a process, in pages.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Statm {
    /// Total program size.
    pub size: u64,

    /// Resident set size.
    pub resident: u64,

    /// Resident shared pages.
    pub shared: u64,

    /// Text (code).
    pub text: u64,

    /// Library (unused since Linux 2.6).
    pub lib: u64,

    /// Data and stack.
    pub data: u64,

    /// Dirty pages (unused since Linux 2.6).
    pub dt: u64,
}

impl FromStr for Statm {
    type Err = LinuxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || LinuxError::MalformedStatm(s.to_owned());

        let mut fields = s.split_ascii_whitespace().map(|field| field.parse::<u64>());
        let mut next = || match fields.next() {
            Some(Ok(value)) => Ok(value),
            _ => Err(malformed()),
        };

        Ok(Self {
            size: next()?,
            resident: next()?,
            shared: next()?,
            text: next()?,
            lib: next()?,
            data: next()?,
            dt: next()?,
        })
    }
}

/// Maps an I/O error on a per-process entry onto the error taxonomy.
pub(crate) fn classify(err: io::Error) -> RemiError {
    match err.kind() {
        io::ErrorKind::PermissionDenied => RemiError::PermissionDenied,
        io::ErrorKind::NotFound => RemiError::NoSuchProcess,
        _ => RemiError::Io(err),
    }
}

pub(crate) fn read_to_string(path: &Path) -> Result<String, RemiError> {
    let mut file = File::open(path).map_err(classify)?;
    let mut result = String::new();
    file.read_to_string(&mut result).map_err(classify)?;
    Ok(result)
}

pub(crate) fn read_statm(path: &Path) -> Result<Statm, RemiError> {
    Ok(read_to_string(path)?.parse::<Statm>()?)
}
