//! Group-descriptor table decoding.
//!
//! One descriptor per block group locates the group's bitmaps and inode
//! table. Descriptors are 32 bytes on 32-bit images; on 64-bit images the
//! upper halves of each field live in the second 32 bytes.
//!
//! Two incompatible checksum algorithms guard descriptors. With
//! metadata_csum the stored 16 bits are the low half of a seeded CRC-32C
//! chain; with the older gdt_csum feature they are a CRC-16 over the UUID,
//! the group number and the descriptor bytes. The feature bits select
//! exactly one.

use crate::superblock::Superblock;
use gfs_csum::{crc16_update, crc16_update_u32, crc32c_update, crc32c_update_u32, CRC16_SEED};
use gfs_types::{ensure_slice, read_le_u16, read_le_u32, GroupNumber, ParseError};
use serde::{Deserialize, Serialize};

pub const GROUP_DESC_SIZE_32: usize = 32;
pub const GROUP_DESC_SIZE_64: usize = 64;

/// Offset of the 16-bit checksum slot within a descriptor.
const CHECKSUM_OFFSET: usize = 0x1E;

const FLAG_INODES_UNINIT: u16 = 0x1;
const FLAG_BLOCK_BITMAP_UNINIT: u16 = 0x2;
const FLAG_INODE_TABLE_ZEROED: u16 = 0x4;

/// Which checksum the descriptor table carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GdtChecksumMode {
    None,
    /// Legacy CRC-16 (`gdt_csum` ro-compat feature).
    Gdt,
    /// Seeded CRC-32C truncated to 16 bits (`metadata_csum`).
    Metadata,
}

impl GdtChecksumMode {
    /// Select the mode from the superblock feature bits; metadata_csum
    /// wins when both are set.
    #[must_use]
    pub fn from_superblock(sb: &Superblock) -> Self {
        if sb.features.ro_compat.metadata_csum {
            Self::Metadata
        } else if sb.features.ro_compat.gdt_csum {
            Self::Gdt
        } else {
            Self::None
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockGroupFlags {
    pub inodes_uninitialized: bool,
    pub block_bitmap_uninitialized: bool,
    pub inode_table_zeroed: bool,
}

impl BlockGroupFlags {
    #[must_use]
    pub fn from_raw(raw: u16) -> Self {
        Self {
            inodes_uninitialized: raw & FLAG_INODES_UNINIT != 0,
            block_bitmap_uninitialized: raw & FLAG_BLOCK_BITMAP_UNINIT != 0,
            inode_table_zeroed: raw & FLAG_INODE_TABLE_ZEROED != 0,
        }
    }

    #[must_use]
    pub fn to_raw(self) -> u16 {
        let mut raw = 0;
        if self.inodes_uninitialized {
            raw |= FLAG_INODES_UNINIT;
        }
        if self.block_bitmap_uninitialized {
            raw |= FLAG_BLOCK_BITMAP_UNINIT;
        }
        if self.inode_table_zeroed {
            raw |= FLAG_INODE_TABLE_ZEROED;
        }
        raw
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDescriptor {
    pub number: GroupNumber,
    pub block_bitmap_location: u64,
    pub inode_bitmap_location: u64,
    pub inode_table_location: u64,
    pub free_blocks: u32,
    pub free_inodes: u32,
    pub used_directories: u32,
    pub flags: BlockGroupFlags,
    pub snapshot_exclusion_bitmap_location: u64,
    pub block_bitmap_checksum: u32,
    pub inode_bitmap_checksum: u32,
    pub unused_inodes: u32,
    pub checksum: u16,
    pub is_64bit: bool,
}

/// Compute the 16-bit checksum for one raw descriptor.
///
/// The CRC-32C variant folds the group number in before the record bytes
/// and substitutes two zero bytes for the checksum slot; the CRC-16
/// variant folds the UUID first and never covers the slot at all.
#[must_use]
pub fn group_descriptor_checksum(
    raw: &[u8],
    mode: GdtChecksumMode,
    uuid: &[u8; 16],
    csum_seed: u32,
    group: GroupNumber,
) -> u16 {
    #[allow(clippy::cast_possible_truncation)]
    match mode {
        GdtChecksumMode::None => 0,
        GdtChecksumMode::Metadata => {
            let mut state = crc32c_update_u32(csum_seed, group.0);
            state = crc32c_update(state, &raw[..CHECKSUM_OFFSET]);
            state = crc32c_update(state, &[0, 0]);
            if raw.len() > CHECKSUM_OFFSET + 2 {
                state = crc32c_update(state, &raw[CHECKSUM_OFFSET + 2..]);
            }
            (state & 0xFFFF) as u16
        }
        GdtChecksumMode::Gdt => {
            let mut state = crc16_update(CRC16_SEED, uuid);
            state = crc16_update_u32(state, group.0);
            state = crc16_update(state, &raw[..CHECKSUM_OFFSET]);
            if raw.len() > CHECKSUM_OFFSET + 2 {
                state = crc16_update(state, &raw[CHECKSUM_OFFSET + 2..]);
            }
            state
        }
    }
}

fn parse_one(
    raw: &[u8],
    number: GroupNumber,
    is_64bit: bool,
    mode: GdtChecksumMode,
    uuid: &[u8; 16],
    csum_seed: u32,
) -> Result<GroupDescriptor, ParseError> {
    let checksum = read_le_u16(raw, CHECKSUM_OFFSET)?;
    if mode != GdtChecksumMode::None {
        let computed = group_descriptor_checksum(raw, mode, uuid, csum_seed, number);
        if computed != checksum {
            return Err(ParseError::ChecksumMismatch {
                what: "group descriptor",
                stored: u32::from(checksum),
                computed: u32::from(computed),
            });
        }
    }

    let mut block_bitmap = u64::from(read_le_u32(raw, 0x00)?);
    let mut inode_bitmap = u64::from(read_le_u32(raw, 0x04)?);
    let mut inode_table = u64::from(read_le_u32(raw, 0x08)?);
    let mut free_blocks = u32::from(read_le_u16(raw, 0x0C)?);
    let mut free_inodes = u32::from(read_le_u16(raw, 0x0E)?);
    let mut used_directories = u32::from(read_le_u16(raw, 0x10)?);
    let flags = BlockGroupFlags::from_raw(read_le_u16(raw, 0x12)?);
    let mut snapshot_exclusion = u64::from(read_le_u32(raw, 0x14)?);
    let mut block_bitmap_checksum = u32::from(read_le_u16(raw, 0x18)?);
    let mut inode_bitmap_checksum = u32::from(read_le_u16(raw, 0x1A)?);
    let mut unused_inodes = u32::from(read_le_u16(raw, 0x1C)?);

    if is_64bit {
        block_bitmap |= u64::from(read_le_u32(raw, 0x20)?) << 32;
        inode_bitmap |= u64::from(read_le_u32(raw, 0x24)?) << 32;
        inode_table |= u64::from(read_le_u32(raw, 0x28)?) << 32;
        free_blocks |= u32::from(read_le_u16(raw, 0x2C)?) << 16;
        free_inodes |= u32::from(read_le_u16(raw, 0x2E)?) << 16;
        used_directories |= u32::from(read_le_u16(raw, 0x30)?) << 16;
        unused_inodes |= u32::from(read_le_u16(raw, 0x32)?) << 16;
        snapshot_exclusion |= u64::from(read_le_u32(raw, 0x34)?) << 32;
        block_bitmap_checksum |= u32::from(read_le_u16(raw, 0x38)?) << 16;
        inode_bitmap_checksum |= u32::from(read_le_u16(raw, 0x3A)?) << 16;
    }

    Ok(GroupDescriptor {
        number,
        block_bitmap_location: block_bitmap,
        inode_bitmap_location: inode_bitmap,
        inode_table_location: inode_table,
        free_blocks,
        free_inodes,
        used_directories,
        flags,
        snapshot_exclusion_bitmap_location: snapshot_exclusion,
        block_bitmap_checksum,
        inode_bitmap_checksum,
        unused_inodes,
        checksum,
        is_64bit,
    })
}

/// Decode a group-descriptor table. `bytes` must hold whole records of
/// the superblock's descriptor size; each record's checksum is verified
/// under the mode the feature bits select.
pub fn parse_group_descriptors(
    bytes: &[u8],
    sb: &Superblock,
) -> Result<Vec<GroupDescriptor>, ParseError> {
    let desc_size = usize::from(sb.group_descriptor_size());
    let is_64bit = sb.features.incompat.bit64;
    let mode = GdtChecksumMode::from_superblock(sb);
    let csum_seed = sb.checksum_seed().unwrap_or(0);

    let count = bytes.len() / desc_size;
    let mut descriptors = Vec::with_capacity(count);
    for index in 0..count {
        let raw = ensure_slice(bytes, index * desc_size, desc_size)?;
        #[allow(clippy::cast_possible_truncation)]
        let number = GroupNumber(index as u32);
        descriptors.push(parse_one(raw, number, is_64bit, mode, &sb.uuid, csum_seed)?);
    }
    Ok(descriptors)
}

impl GroupDescriptor {
    /// Re-encode to the on-disk form, computing the checksum for `mode`.
    #[must_use]
    pub fn to_bytes(&self, mode: GdtChecksumMode, uuid: &[u8; 16], csum_seed: u32) -> Vec<u8> {
        let size = if self.is_64bit {
            GROUP_DESC_SIZE_64
        } else {
            GROUP_DESC_SIZE_32
        };
        let mut b = vec![0_u8; size];

        #[allow(clippy::cast_possible_truncation)]
        {
            b[0x00..0x04].copy_from_slice(&(self.block_bitmap_location as u32).to_le_bytes());
            b[0x04..0x08].copy_from_slice(&(self.inode_bitmap_location as u32).to_le_bytes());
            b[0x08..0x0C].copy_from_slice(&(self.inode_table_location as u32).to_le_bytes());
            b[0x0C..0x0E].copy_from_slice(&(self.free_blocks as u16).to_le_bytes());
            b[0x0E..0x10].copy_from_slice(&(self.free_inodes as u16).to_le_bytes());
            b[0x10..0x12].copy_from_slice(&(self.used_directories as u16).to_le_bytes());
            b[0x12..0x14].copy_from_slice(&self.flags.to_raw().to_le_bytes());
            b[0x14..0x18]
                .copy_from_slice(&(self.snapshot_exclusion_bitmap_location as u32).to_le_bytes());
            b[0x18..0x1A].copy_from_slice(&(self.block_bitmap_checksum as u16).to_le_bytes());
            b[0x1A..0x1C].copy_from_slice(&(self.inode_bitmap_checksum as u16).to_le_bytes());
            b[0x1C..0x1E].copy_from_slice(&(self.unused_inodes as u16).to_le_bytes());

            if self.is_64bit {
                b[0x20..0x24]
                    .copy_from_slice(&((self.block_bitmap_location >> 32) as u32).to_le_bytes());
                b[0x24..0x28]
                    .copy_from_slice(&((self.inode_bitmap_location >> 32) as u32).to_le_bytes());
                b[0x28..0x2C]
                    .copy_from_slice(&((self.inode_table_location >> 32) as u32).to_le_bytes());
                b[0x2C..0x2E].copy_from_slice(&((self.free_blocks >> 16) as u16).to_le_bytes());
                b[0x2E..0x30].copy_from_slice(&((self.free_inodes >> 16) as u16).to_le_bytes());
                b[0x30..0x32]
                    .copy_from_slice(&((self.used_directories >> 16) as u16).to_le_bytes());
                b[0x32..0x34].copy_from_slice(&((self.unused_inodes >> 16) as u16).to_le_bytes());
                b[0x34..0x38].copy_from_slice(
                    &((self.snapshot_exclusion_bitmap_location >> 32) as u32).to_le_bytes(),
                );
                b[0x38..0x3A]
                    .copy_from_slice(&((self.block_bitmap_checksum >> 16) as u16).to_le_bytes());
                b[0x3A..0x3C]
                    .copy_from_slice(&((self.inode_bitmap_checksum >> 16) as u16).to_le_bytes());
            }
        }

        let checksum = group_descriptor_checksum(&b, mode, uuid, csum_seed, self.number);
        b[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 2].copy_from_slice(&checksum.to_le_bytes());
        b
    }
}
