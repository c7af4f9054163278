use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    /// Memory access permission flags of a mapped region.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct MemoryAccess: u8 {
        /// Read permission.
        const R = 0b00000001;

        /// Write permission.
        const W = 0b00000010;

        /// Execute permission.
        const X = 0b00000100;

        /// Combined Read and Write permissions.
        const RW = Self::R.bits() | Self::W.bits();

        /// Combined Read and Execute permissions.
        const RX = Self::R.bits() | Self::X.bits();
    }
}

impl MemoryAccess {
    /// Parses the `rwx` triplet used by the kernel in memory map listings.
    ///
    /// Only the first three characters are inspected; anything else (such as
    /// the private/shared marker) is ignored. Returns `None` if fewer than
    /// three characters are present.
    pub fn from_triplet(triplet: &str) -> Option<Self> {
        let bytes = triplet.as_bytes().get(..3)?;
        let mut result = Self::empty();

        if bytes[0] == b'r' {
            result |= Self::R;
        }
        if bytes[1] == b'w' {
            result |= Self::W;
        }
        if bytes[2] == b'x' {
            result |= Self::X;
        }

        Some(result)
    }
}

impl std::fmt::Display for MemoryAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut result = [b'-'; 3];

        if self.contains(MemoryAccess::R) {
            result[0] = b'r';
        }
        if self.contains(MemoryAccess::W) {
            result[1] = b'w';
        }
        if self.contains(MemoryAccess::X) {
            result[2] = b'x';
        }

        // SAFETY: The `result` array is always valid UTF-8.
        f.write_str(unsafe { std::str::from_utf8_unchecked(&result) })
    }
}
