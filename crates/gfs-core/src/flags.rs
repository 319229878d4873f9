//! Open flags.
//!
//! The POSIX-style flag set the open interface accepts. Only read-only
//! opens succeed; the remaining flags exist so callers can express their
//! intent and get the precise `WriteNotSupported` refusal.

use std::ops::BitOr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct OpenFlags(u32);

impl OpenFlags {
    pub const READ_ONLY: Self = Self(0);
    pub const READ_WRITE: Self = Self(0x1);
    pub const APPEND: Self = Self(0x2);
    pub const CREATE: Self = Self(0x4);

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// True only for a plain read-only open.
    #[must_use]
    pub fn is_read_only(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for OpenFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
