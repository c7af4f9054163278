use serde::{Deserialize, Serialize};

use super::macros::impl_ops;

impl_ops!(RemoteAddress, u64, "location in the target's address space");

impl RemoteAddress {
    /// Checks if the address is NULL.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Adds `rhs` to the address, returning `None` on overflow.
    pub fn checked_add(self, rhs: u64) -> Option<Self> {
        self.0.checked_add(rhs).map(Self)
    }

    /// Returns the address rounded down to a multiple of `align`.
    ///
    /// `align` must be a power of two.
    pub fn align_down(self, align: u64) -> Self {
        Self(self.0 & !(align - 1))
    }

    /// Returns the distance of the address from the previous multiple of
    /// `align`.
    pub fn misalignment(self, align: u64) -> u64 {
        self.0 & (align - 1)
    }
}

/// A process identifier, as used by the kernel.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ProcessId(pub u32);

impl ProcessId {
    /// Returns the identifier as the signed type the kernel interfaces use.
    ///
    /// Returns `None` if the identifier does not fit, since negative values
    /// denote process groups to the kernel.
    pub fn as_raw(self) -> Option<i32> {
        i32::try_from(self.0).ok()
    }
}

impl From<u32> for ProcessId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl ::std::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
