use std::{ffi::OsStr, os::unix::ffi::OsStrExt as _, path::PathBuf, str::FromStr};

use remi_core::{MemoryAccess, RemoteAddress};

use crate::LinuxError;

/// A memory region of a process, as listed in `/proc/<pid>/maps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMap {
    /// The first address of the region.
    pub start: RemoteAddress,

    /// The address one past the end of the region.
    pub end: RemoteAddress,

    /// The access permissions of the region.
    pub access: MemoryAccess,

    /// Whether the region is shared rather than copy-on-write.
    pub shared: bool,

    /// The offset into the backing file.
    pub offset: u64,

    /// The major and minor number of the backing device.
    pub device: (u32, u32),

    /// The inode of the backing file, zero for anonymous regions.
    pub inode: u64,

    /// The backing path or pseudo-path (such as `[heap]`), if any.
    pub path: Option<PathBuf>,
}

impl MemoryMap {
    /// Returns the size of the region in bytes.
    pub fn size(&self) -> u64 {
        self.end - self.start
    }

    /// Checks whether the region contains the given address.
    pub fn contains(&self, address: RemoteAddress) -> bool {
        self.start <= address && address < self.end
    }

    /// Checks whether the region is a pseudo-region (`[heap]`, `[stack]`,
    /// `[vdso]` and the like).
    pub fn is_pseudo(&self) -> bool {
        self.path
            .as_ref()
            .and_then(|path| path.to_str())
            .is_some_and(|path| path.starts_with('['))
    }

    /// Parses a single line of a maps file.
    ///
    /// The path column is taken verbatim, so paths that are not valid UTF-8
    /// are preserved.
    pub fn parse(line: &[u8]) -> Result<Self, LinuxError> {
        let malformed = || LinuxError::MalformedMap(String::from_utf8_lossy(line).into_owned());

        let (range, rest) = split_field(line);
        let (permissions, rest) = split_field(rest);
        let (offset, rest) = split_field(rest);
        let (device, rest) = split_field(rest);
        let (inode, rest) = split_field(rest);
        let path = trim_padding(rest);

        let (start, end) = split_once(range, b'-').ok_or_else(malformed)?;
        let (major, minor) = split_once(device, b':').ok_or_else(malformed)?;

        let start = RemoteAddress(hex(start).ok_or_else(malformed)?);
        let end = RemoteAddress(hex(end).ok_or_else(malformed)?);
        if end < start {
            return Err(malformed());
        }

        let permissions = std::str::from_utf8(permissions).map_err(|_| malformed())?;

        Ok(Self {
            start,
            end,
            access: MemoryAccess::from_triplet(permissions).ok_or_else(malformed)?,
            shared: permissions.as_bytes().get(3) == Some(&b's'),
            offset: hex(offset).ok_or_else(malformed)?,
            device: (
                hex(major)
                    .and_then(|major| u32::try_from(major).ok())
                    .ok_or_else(malformed)?,
                hex(minor)
                    .and_then(|minor| u32::try_from(minor).ok())
                    .ok_or_else(malformed)?,
            ),
            inode: ascii(inode)
                .and_then(|inode| inode.parse().ok())
                .ok_or_else(malformed)?,
            path: (!path.is_empty()).then(|| PathBuf::from(OsStr::from_bytes(path))),
        })
    }
}

impl FromStr for MemoryMap {
    type Err = LinuxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s.as_bytes())
    }
}

/// Parses the contents of a maps file, skipping empty lines.
pub fn parse_maps(contents: &[u8]) -> Result<Vec<MemoryMap>, LinuxError> {
    contents
        .split(|&byte| byte == b'\n')
        .filter(|line| !line.trim_ascii().is_empty())
        .map(MemoryMap::parse)
        .collect()
}

/// Splits off the first space-separated field, ignoring column padding.
fn split_field(s: &[u8]) -> (&[u8], &[u8]) {
    let s = trim_padding(s);
    split_once(s, b' ').unwrap_or((s, &[]))
}

fn trim_padding(s: &[u8]) -> &[u8] {
    let start = s.iter().position(|&byte| byte != b' ').unwrap_or(s.len());
    &s[start..]
}

fn split_once(s: &[u8], separator: u8) -> Option<(&[u8], &[u8])> {
    let index = s.iter().position(|&byte| byte == separator)?;
    Some((&s[..index], &s[index + 1..]))
}

fn ascii(s: &[u8]) -> Option<&str> {
    std::str::from_utf8(s).ok()
}

fn hex(s: &[u8]) -> Option<u64> {
    u64::from_str_radix(ascii(s)?, 16).ok()
}

#[cfg(test)]
mod tests {
    use std::{os::unix::ffi::OsStrExt as _, path::Path};

    use super::*;

    #[test]
    fn file_backed() -> Result<(), LinuxError> {
        let map = MemoryMap::parse(
            b"7f3a1c000000-7f3a1c022000 r-xp 00002000 08:01 1311234                    /usr/lib/x86_64-linux-gnu/libc.so.6",
        )?;

        assert_eq!(map.start, RemoteAddress(0x7f3a_1c00_0000));
        assert_eq!(map.end, RemoteAddress(0x7f3a_1c02_2000));
        assert_eq!(map.size(), 0x22000);
        assert_eq!(map.access, MemoryAccess::RX);
        assert!(!map.shared);
        assert_eq!(map.offset, 0x2000);
        assert_eq!(map.device, (8, 1));
        assert_eq!(map.inode, 1311234);
        assert_eq!(
            map.path.as_deref(),
            Some(Path::new("/usr/lib/x86_64-linux-gnu/libc.so.6"))
        );
        assert!(map.contains(RemoteAddress(0x7f3a_1c00_1000)));
        assert!(!map.contains(map.end));
        Ok(())
    }

    #[test]
    fn anonymous() -> Result<(), LinuxError> {
        let map = MemoryMap::parse(b"7ffd4a5e0000-7ffd4a601000 rw-s 00000000 00:00 0 ")?;

        assert_eq!(map.path, None);
        assert_eq!(map.access, MemoryAccess::RW);
        assert!(map.shared);
        assert!(!map.is_pseudo());
        Ok(())
    }

    #[test]
    fn path_with_spaces() -> Result<(), LinuxError> {
        let map =
            MemoryMap::parse(b"00400000-00452000 r--p 00000000 fd:02 42 /opt/my app/bin (deleted)")?;

        assert_eq!(map.path.as_deref(), Some(Path::new("/opt/my app/bin (deleted)")));
        Ok(())
    }

    #[test]
    fn whole_file() -> Result<(), LinuxError> {
        let maps = parse_maps(
            b"00400000-00401000 r--p 00000000 fd:02 42 /usr/bin/python3\n\
             01a2b000-01a4c000 rw-p 00000000 00:00 0                                  [heap]\n\
             \n",
        )?;

        assert_eq!(maps.len(), 2);
        assert!(maps[1].is_pseudo());
        Ok(())
    }

    #[test]
    fn path_not_utf8() -> Result<(), LinuxError> {
        let map =
            MemoryMap::parse(b"7f3a1c000000-7f3a1c022000 r-xp 00000000 08:01 77 /tmp/caf\xe9.so")?;

        assert_eq!(
            map.path.as_deref(),
            Some(Path::new(OsStr::from_bytes(b"/tmp/caf\xe9.so")))
        );
        assert_eq!(map.access, MemoryAccess::RX);
        Ok(())
    }

    #[test]
    fn parse_str() -> Result<(), LinuxError> {
        let map: MemoryMap = "00400000-00401000 r--p 00000000 fd:02 42 /usr/bin/python3".parse()?;

        assert_eq!(map.size(), 0x1000);
        assert_eq!(map.device, (0xfd, 2));
        Ok(())
    }

    #[test]
    fn malformed() {
        assert!(MemoryMap::parse(b"00400000 r--p 00000000 fd:02 42").is_err());
        assert!(MemoryMap::parse(b"00400000-00401000 r--p 00000000 fd02 42").is_err());
        assert!(MemoryMap::parse(b"zz-00401000 r--p 00000000 fd:02 42").is_err());

        // Reversed ranges.
        assert!(MemoryMap::parse(b"00401000-00400000 r--p 00000000 fd:02 42").is_err());
        assert!(matches!(
            MemoryMap::parse(b"ffffffffff601000-0000000000000000 r--p 00000000 00:00 0"),
            Err(LinuxError::MalformedMap(_))
        ));
    }
}
