//! Inode decoding.
//!
//! Inodes are fixed-size records in the per-group inode tables: 128 bytes
//! in the basic form, extended (typically to 256) when the superblock's
//! inode size says so. The extension carries the 34-bit timestamps, the
//! creation time, the checksum high half and the project id.
//!
//! The per-inode checksum is seeded by the per-image seed folded with the
//! inode number and then the generation; a mismatch is a warning by
//! default, matching the reference reader's tolerant posture.

use crate::extent::{parse_extent_node, ExtentNode};
use crate::superblock::Superblock;
use gfs_csum::{crc32c_update, crc32c_update_u32};
use gfs_types::{
    read_fixed, read_le_u16, read_le_u32, InodeNumber, ParseError, INODE_FL_EXTENTS,
    INODE_FL_HUGE_FILE, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO, S_IFLNK, S_IFMT, S_IFREG, S_IFSOCK,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

const BASE_INODE_SIZE: usize = 128;
const CHECKSUM_LO_OFFSET: usize = 0x7C;
const CHECKSUM_HI_OFFSET: usize = 0x82;

/// How to treat a per-inode checksum mismatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChecksumPolicy {
    /// Fail the parse.
    Strict,
    /// Warn on the diagnostic channel and continue (reference behaviour).
    #[default]
    Tolerant,
}

/// File type from the mode nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    Unknown,
    Regular,
    Directory,
    CharDevice,
    BlockDevice,
    Fifo,
    Socket,
    Symlink,
}

impl FileKind {
    /// Decompose the file-type nibble of an inode mode.
    #[must_use]
    pub fn from_mode(mode: u16) -> Self {
        match mode & S_IFMT {
            S_IFIFO => Self::Fifo,
            S_IFCHR => Self::CharDevice,
            S_IFDIR => Self::Directory,
            S_IFBLK => Self::BlockDevice,
            S_IFREG => Self::Regular,
            S_IFLNK => Self::Symlink,
            S_IFSOCK => Self::Socket,
            _ => Self::Unknown,
        }
    }

    /// Decode a directory entry's one-byte file-type code.
    #[must_use]
    pub fn from_dirent_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Unknown),
            1 => Some(Self::Regular),
            2 => Some(Self::Directory),
            3 => Some(Self::CharDevice),
            4 => Some(Self::BlockDevice),
            5 => Some(Self::Fifo),
            6 => Some(Self::Socket),
            7 => Some(Self::Symlink),
            _ => None,
        }
    }

    /// The directory entry code for this kind.
    #[must_use]
    pub fn dirent_code(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Regular => 1,
            Self::Directory => 2,
            Self::CharDevice => 3,
            Self::BlockDevice => 4,
            Self::Fifo => 5,
            Self::Socket => 6,
            Self::Symlink => 7,
        }
    }

    /// The mode-nibble bits for this kind (0 for `Unknown`).
    #[must_use]
    pub fn mode_bits(self) -> u16 {
        match self {
            Self::Unknown => 0,
            Self::Fifo => S_IFIFO,
            Self::CharDevice => S_IFCHR,
            Self::Directory => S_IFDIR,
            Self::BlockDevice => S_IFBLK,
            Self::Regular => S_IFREG,
            Self::Symlink => S_IFLNK,
            Self::Socket => S_IFSOCK,
        }
    }
}

/// One rwx permission triplet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
}

impl Permissions {
    fn from_bits(mode: u16, shift: u16) -> Self {
        let bits = (mode >> shift) & 0o7;
        Self {
            read: bits & 0o4 != 0,
            write: bits & 0o2 != 0,
            execute: bits & 0o1 != 0,
        }
    }

    fn to_bits(self) -> u16 {
        let mut bits = 0;
        if self.read {
            bits |= 0o4;
        }
        if self.write {
            bits |= 0o2;
        }
        if self.execute {
            bits |= 0o1;
        }
        bits
    }
}

/// A 34-bit extended timestamp: the low two bits of the on-disk
/// nanosecond word extend the seconds, the upper 30 bits are nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtTimestamp {
    pub seconds: u64,
    pub nanoseconds: u32,
}

impl ExtTimestamp {
    fn assemble(base: u32, extra: u32) -> Self {
        Self {
            seconds: u64::from(base) | (u64::from(extra & 0x3) << 32),
            nanoseconds: extra >> 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub number: InodeNumber,
    pub kind: FileKind,
    pub permissions_owner: Permissions,
    pub permissions_group: Permissions,
    pub permissions_other: Permissions,
    pub owner: u32,
    pub group: u32,
    pub size: u64,
    pub hard_links: u16,
    /// See `blocks_in_fs_units` for the unit.
    pub block_count: u64,
    /// When set, `block_count` is in filesystem blocks; otherwise in
    /// 512-byte sectors.
    pub blocks_in_fs_units: bool,
    pub flags: u32,
    pub generation: u32,
    pub version: u64,
    pub access_time: ExtTimestamp,
    pub change_time: ExtTimestamp,
    pub modify_time: ExtTimestamp,
    pub create_time: Option<ExtTimestamp>,
    pub deletion_time: u32,
    pub xattr_block: u64,
    /// 128 plus the stored extension size; equals 128 for basic inodes.
    pub inode_size: u16,
    pub project: u32,
    /// Raw i_block area (extent root, symlink target, or device numbers
    /// depending on the inode kind).
    pub block_area: [u8; 60],
    /// Decoded extent-tree root, present when the extents flag is set.
    pub extent_root: Option<ExtentNode>,
    pub checksum: u32,
}

impl Inode {
    #[must_use]
    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    #[must_use]
    pub fn uses_extents(&self) -> bool {
        self.has_flag(INODE_FL_EXTENTS)
    }

    /// Reassemble the canonical mode word (type nibble | permissions).
    #[must_use]
    pub fn mode(&self) -> u16 {
        self.kind.mode_bits()
            | (self.permissions_owner.to_bits() << 6)
            | (self.permissions_group.to_bits() << 3)
            | self.permissions_other.to_bits()
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    /// The target of a fast symlink, which stores its path text directly
    /// in the i_block area. `None` for anything that is not a symlink or
    /// whose target is too long to be inlined (those use extents like a
    /// regular file).
    #[must_use]
    pub fn fast_symlink_target(&self) -> Option<&[u8]> {
        if self.kind != FileKind::Symlink || self.uses_extents() {
            return None;
        }
        let len = usize::try_from(self.size).ok()?;
        if len > self.block_area.len() {
            return None;
        }
        Some(&self.block_area[..len])
    }
}

/// Compute the seeded per-inode checksum over the raw record with both
/// checksum slots zeroed. For 128-byte inodes only the low 16 bits are
/// stored.
fn compute_checksum(bytes: &[u8], seed: u32, number: InodeNumber, generation: u32) -> u32 {
    let mut state = crc32c_update_u32(seed, number.0);
    state = crc32c_update_u32(state, generation);

    state = crc32c_update(state, &bytes[..CHECKSUM_LO_OFFSET]);
    state = crc32c_update(state, &[0, 0]);
    state = crc32c_update(state, &bytes[CHECKSUM_LO_OFFSET + 2..BASE_INODE_SIZE]);

    if bytes.len() > BASE_INODE_SIZE {
        state = crc32c_update(state, &bytes[BASE_INODE_SIZE..CHECKSUM_HI_OFFSET]);
        state = crc32c_update(state, &[0, 0]);
        state = crc32c_update(state, &bytes[CHECKSUM_HI_OFFSET + 2..]);
    }

    state
}

/// Decode one inode record. `bytes` is the full `inode_size` slice from
/// the inode table; `number` is the 1-based inode number it was read
/// from.
pub fn parse_inode(
    bytes: &[u8],
    sb: &Superblock,
    number: InodeNumber,
    policy: ChecksumPolicy,
) -> Result<Inode, ParseError> {
    if bytes.len() < BASE_INODE_SIZE {
        return Err(ParseError::InsufficientData {
            needed: BASE_INODE_SIZE,
            offset: 0,
            actual: bytes.len(),
        });
    }

    let extended = bytes.len() > BASE_INODE_SIZE;
    let generation = read_le_u32(bytes, 0x64)?;

    // Stored checksum: low half in the osd2 area, high half (extended
    // inodes only) after the extra-size word.
    let stored_lo = u32::from(read_le_u16(bytes, CHECKSUM_LO_OFFSET)?);
    let stored_hi = if extended {
        u32::from(read_le_u16(bytes, CHECKSUM_HI_OFFSET)?)
    } else {
        0
    };
    let stored = stored_lo | (stored_hi << 16);

    if sb.has_metadata_checksums() {
        if let Some(seed) = sb.checksum_seed() {
            let mut computed = compute_checksum(bytes, seed, number, generation);
            if !extended {
                computed &= 0xFFFF;
            }
            if computed != stored {
                match policy {
                    ChecksumPolicy::Strict => {
                        return Err(ParseError::ChecksumMismatch {
                            what: "inode",
                            stored,
                            computed,
                        });
                    }
                    ChecksumPolicy::Tolerant => {
                        warn!(
                            target: "gfs::inode",
                            inode = number.0,
                            stored = format_args!("{stored:#x}"),
                            computed = format_args!("{computed:#x}"),
                            "inode checksum mismatch, continuing"
                        );
                    }
                }
            }
        }
    }

    let mode = read_le_u16(bytes, 0x00)?;

    let owner = u32::from(read_le_u16(bytes, 0x02)?) | (u32::from(read_le_u16(bytes, 0x78)?) << 16);
    let group = u32::from(read_le_u16(bytes, 0x18)?) | (u32::from(read_le_u16(bytes, 0x7A)?) << 16);
    let size = u64::from(read_le_u32(bytes, 0x04)?) | (u64::from(read_le_u32(bytes, 0x6C)?) << 32);

    let flags = read_le_u32(bytes, 0x20)?;

    // Block count: three interpretations selected jointly by the
    // superblock's huge-file feature and the inode's huge-file flag.
    let blocks_lo = u64::from(read_le_u32(bytes, 0x1C)?);
    let blocks_hi = u64::from(read_le_u16(bytes, 0x74)?);
    let huge_feature = sb.features.ro_compat.huge_file;
    let huge_flag = flags & INODE_FL_HUGE_FILE != 0;
    let (block_count, blocks_in_fs_units) = if !huge_feature {
        (blocks_lo, false)
    } else {
        (blocks_lo | (blocks_hi << 32), huge_flag)
    };

    // Timestamps: the nanosecond words live in the extended area.
    let extra = |offset: usize| -> Result<u32, ParseError> {
        if bytes.len() >= offset + 4 {
            read_le_u32(bytes, offset)
        } else {
            Ok(0)
        }
    };
    let access_time = ExtTimestamp::assemble(read_le_u32(bytes, 0x08)?, extra(0x8C)?);
    let change_time = ExtTimestamp::assemble(read_le_u32(bytes, 0x0C)?, extra(0x84)?);
    let modify_time = ExtTimestamp::assemble(read_le_u32(bytes, 0x10)?, extra(0x88)?);
    let create_time = if bytes.len() >= 0x98 {
        Some(ExtTimestamp::assemble(
            read_le_u32(bytes, 0x90)?,
            read_le_u32(bytes, 0x94)?,
        ))
    } else {
        None
    };

    let version_lo = u64::from(read_le_u32(bytes, 0x24)?);
    let version_hi = if bytes.len() >= 0x9C {
        u64::from(read_le_u32(bytes, 0x98)?)
    } else {
        0
    };

    let xattr_block =
        u64::from(read_le_u32(bytes, 0x68)?) | (u64::from(read_le_u16(bytes, 0x76)?) << 32);

    let inode_size = if extended {
        128 + read_le_u16(bytes, 0x80)?
    } else {
        128
    };

    let project = if bytes.len() >= 0xA0 {
        read_le_u32(bytes, 0x9C)?
    } else {
        0
    };

    let block_area = read_fixed::<60>(bytes, 0x28)?;
    let extent_root = if flags & INODE_FL_EXTENTS != 0 {
        Some(parse_extent_node(&block_area)?)
    } else {
        None
    };

    Ok(Inode {
        number,
        kind: FileKind::from_mode(mode),
        permissions_owner: Permissions::from_bits(mode, 6),
        permissions_group: Permissions::from_bits(mode, 3),
        permissions_other: Permissions::from_bits(mode, 0),
        owner,
        group,
        size,
        hard_links: read_le_u16(bytes, 0x1A)?,
        block_count,
        blocks_in_fs_units,
        flags,
        generation,
        version: version_lo | (version_hi << 32),
        access_time,
        change_time,
        modify_time,
        create_time,
        deletion_time: read_le_u32(bytes, 0x14)?,
        xattr_block,
        inode_size,
        project,
        block_area,
        extent_root,
        checksum: stored,
    })
}
