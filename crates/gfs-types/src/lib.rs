#![forbid(unsafe_code)]
//! Shared types for GlassFS.
//!
//! Unit-carrying newtypes for on-disk addresses, the decoder-level
//! `ParseError`, and the bounds-checked little-endian read helpers every
//! byte decoder is built on.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Byte offset of the superblock within the image (after the boot sector).
pub const SUPERBLOCK_OFFSET: usize = 1024;
/// On-disk size of the superblock record.
pub const SUPERBLOCK_SIZE: usize = 1024;
/// The ext4 superblock magic at offset 0x38.
pub const SUPER_MAGIC: u16 = 0xEF53;
/// Size of the boot sector preceding the superblock.
pub const BOOT_SECTOR_SIZE: usize = 1024;
/// Logical sector size every ext4 image is addressed in.
pub const SECTOR_SIZE_512: u64 = 512;
/// Smallest possible ext4 image: one block each of boot code, superblock,
/// descriptors, bitmaps/inode table and data at the 1 KiB block size.
pub const MIN_IMAGE_SIZE: u64 = 5 * SECTOR_SIZE_512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockNumber(pub u64);

/// ext4 inode number (u32, 1-indexed; inode 0 does not exist).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InodeNumber(pub u32);

impl InodeNumber {
    pub const ROOT: Self = Self(2);
    pub const JOURNAL: Self = Self(8);
}

/// Block group index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupNumber(pub u32);

/// Byte offset on a `ByteDevice` (pread semantics, zero-indexed from the
/// device, not from the image start).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ByteOffset(pub u64);

impl ByteOffset {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub fn checked_add(self, bytes: u64) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }
}

/// Validated filesystem block size (power of two in 1024..=65536).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockSize(u32);

impl BlockSize {
    pub fn new(value: u32) -> Result<Self, ParseError> {
        if !value.is_power_of_two() || !(1024..=65536).contains(&value) {
            return Err(ParseError::InvalidField {
                field: "block_size",
                reason: "must be a power of two in 1024..=65536",
            });
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }

    /// Byte offset of a block number, `None` on overflow.
    #[must_use]
    pub fn block_to_byte(self, block: BlockNumber) -> Option<u64> {
        block.0.checked_mul(u64::from(self.0))
    }
}

/// Derive a block size from the superblock's `s_log_block_size` field.
#[must_use]
pub fn block_size_from_log(log_block_size: u32) -> Option<u32> {
    let shift = 10_u32.checked_add(log_block_size)?;
    if shift > 16 {
        return None;
    }
    Some(1_u32 << shift)
}

// ── Decoder errors ──────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid magic: expected {expected:#x}, got {actual:#x}")]
    InvalidMagic { expected: u64, actual: u64 },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("unsupported feature: {field} ({reason})")]
    UnsupportedFeature {
        field: &'static str,
        reason: &'static str,
    },
    #[error("{what} checksum mismatch: stored {stored:#x}, computed {computed:#x}")]
    ChecksumMismatch {
        what: &'static str,
        stored: u32,
        computed: u32,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

// ── Byte-decode helpers ─────────────────────────────────────────────────────

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_u8(data: &[u8], offset: usize) -> Result<u8, ParseError> {
    Ok(ensure_slice(data, offset, 1)?[0])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_le_u64(data: &[u8], offset: usize) -> Result<u64, ParseError> {
    let bytes = ensure_slice(data, offset, 8)?;
    Ok(u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]))
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Decode a NUL-padded fixed-width label into an owned string.
#[must_use]
pub fn trim_nul_padded(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_owned()
}

/// Narrow a `u64` to `usize` with an explicit error path.
pub fn u64_to_usize(value: u64, field: &'static str) -> Result<usize, ParseError> {
    usize::try_from(value).map_err(|_| ParseError::IntegerConversion { field })
}

// ── POSIX file mode constants ───────────────────────────────────────────────

/// File type mask (upper 4 bits of mode).
pub const S_IFMT: u16 = 0o170_000;
/// Named pipe (FIFO).
pub const S_IFIFO: u16 = 0o010_000;
/// Character device.
pub const S_IFCHR: u16 = 0o020_000;
/// Directory.
pub const S_IFDIR: u16 = 0o040_000;
/// Block device.
pub const S_IFBLK: u16 = 0o060_000;
/// Regular file.
pub const S_IFREG: u16 = 0o100_000;
/// Symbolic link.
pub const S_IFLNK: u16 = 0o120_000;
/// Socket.
pub const S_IFSOCK: u16 = 0o140_000;

// ── ext4 inode flags (i_flags) ──────────────────────────────────────────────

pub const INODE_FL_SECRM: u32 = 0x0000_0001;
pub const INODE_FL_UNRM: u32 = 0x0000_0002;
pub const INODE_FL_COMPR: u32 = 0x0000_0004;
pub const INODE_FL_SYNC: u32 = 0x0000_0008;
pub const INODE_FL_IMMUTABLE: u32 = 0x0000_0010;
pub const INODE_FL_APPEND: u32 = 0x0000_0020;
pub const INODE_FL_NODUMP: u32 = 0x0000_0040;
pub const INODE_FL_NOATIME: u32 = 0x0000_0080;
/// Hash-indexed directory (htree).
pub const INODE_FL_INDEX: u32 = 0x0000_1000;
pub const INODE_FL_IMAGIC: u32 = 0x0000_2000;
pub const INODE_FL_JOURNAL_DATA: u32 = 0x0000_4000;
pub const INODE_FL_NOTAIL: u32 = 0x0000_8000;
pub const INODE_FL_DIRSYNC: u32 = 0x0001_0000;
pub const INODE_FL_TOPDIR: u32 = 0x0002_0000;
/// Block count is in filesystem blocks, not 512-byte sectors.
pub const INODE_FL_HUGE_FILE: u32 = 0x0004_0000;
/// Inode uses extents.
pub const INODE_FL_EXTENTS: u32 = 0x0008_0000;
pub const INODE_FL_EA_INODE: u32 = 0x0020_0000;
pub const INODE_FL_EOFBLOCKS: u32 = 0x0040_0000;
pub const INODE_FL_SNAPFILE: u32 = 0x0100_0000;
pub const INODE_FL_INLINE_DATA: u32 = 0x1000_0000;
pub const INODE_FL_PROJINHERIT: u32 = 0x2000_0000;

// ── Inode ↔ group arithmetic ────────────────────────────────────────────────

/// Block group of an inode. Inode numbers are 1-indexed.
#[must_use]
pub fn inode_to_group(ino: InodeNumber, inodes_per_group: u32) -> GroupNumber {
    GroupNumber(ino.0.saturating_sub(1) / inodes_per_group)
}

/// Index of an inode within its block group.
#[must_use]
pub fn inode_index_in_group(ino: InodeNumber, inodes_per_group: u32) -> u32 {
    ino.0.saturating_sub(1) % inodes_per_group
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for InodeNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for GroupNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ByteOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for BlockSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
