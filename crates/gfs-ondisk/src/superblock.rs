//! Superblock decoding.
//!
//! The superblock is the 1 KiB record at byte 1024 of the image. Parsing
//! validates, in order: the buffer length, the 0xEF53 magic, the checksum
//! type byte, and (when metadata checksums are enabled) the stored
//! CRC-32C of the first 1020 bytes.

use crate::features::{FeatureFlags, MiscFlags};
use gfs_csum::{crc32c_update, CRC32C_SEED};
use gfs_types::{
    block_size_from_log, ensure_slice, read_fixed, read_le_u16, read_le_u32, read_le_u64, read_u8,
    trim_nul_padded, BlockSize, ParseError, SUPERBLOCK_SIZE, SUPER_MAGIC,
};
use serde::{Deserialize, Serialize};

/// Offset of the stored superblock CRC-32C; the checksum covers all bytes
/// before it.
const CHECKSUM_OFFSET: usize = 0x3FC;

/// Backup of the journal inode's block map and size, present only when
/// the backup-type byte at 0xFD is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalBackup {
    pub i_blocks: [u32; 15],
    pub i_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Superblock {
    // ── Core geometry ────────────────────────────────────────────────────
    pub inode_count: u32,
    pub block_count: u64,
    pub reserved_blocks: u64,
    pub free_blocks: u64,
    pub free_inodes: u32,
    pub first_data_block: u32,
    pub block_size: BlockSize,
    pub cluster_size: u64,
    pub blocks_per_group: u32,
    pub clusters_per_group: u32,
    pub inodes_per_group: u32,
    pub inode_size: u16,
    pub first_non_reserved_inode: u32,
    pub block_group_number: u16,
    pub group_descriptor_size_raw: u16,

    // ── Identity ─────────────────────────────────────────────────────────
    pub uuid: [u8; 16],
    pub volume_label: String,
    pub last_mounted_directory: String,

    // ── State & revision ─────────────────────────────────────────────────
    pub mount_time: u32,
    pub write_time: u32,
    pub mount_count: u16,
    pub mounts_to_fsck: u16,
    pub filesystem_state: u16,
    pub error_behaviour: u16,
    pub minor_revision: u16,
    pub last_check: u32,
    pub check_interval: u32,
    pub creator_os: u32,
    pub revision_level: u32,
    pub reserved_blocks_default_uid: u16,
    pub reserved_blocks_default_gid: u16,

    // ── Features ─────────────────────────────────────────────────────────
    pub features: FeatureFlags,
    pub misc_flags: MiscFlags,
    pub default_mount_options: u32,

    // ── Pre-allocation & resize ──────────────────────────────────────────
    pub algorithm_usage_bitmap: u32,
    pub preallocation_blocks: u8,
    pub preallocation_directory_blocks: u8,
    pub reserved_gdt_blocks: u16,

    // ── Journal ──────────────────────────────────────────────────────────
    pub journal_uuid: [u8; 16],
    pub journal_inode: u32,
    pub journal_device: u32,
    pub orphaned_inodes_start: u32,
    pub journal_backup_type: u8,
    pub journal_backup: Option<JournalBackup>,

    // ── Htree directory hashing ──────────────────────────────────────────
    pub hash_tree_seed: [u32; 4],
    pub hash_version: u8,

    // ── 64-bit & misc extensions ─────────────────────────────────────────
    pub first_meta_block_group: u32,
    pub mkfs_time: u32,
    pub inode_min_extra_bytes: u16,
    pub inode_want_extra_bytes: u16,
    pub raid_stride: u16,
    pub mmp_interval: u16,
    pub mmp_block: u64,
    pub raid_stripe_width: u32,
    pub log_groups_per_flex: u8,
    pub checksum_type: u8,
    pub kbytes_written: u64,

    // ── Snapshots ────────────────────────────────────────────────────────
    pub snapshot_inode: u32,
    pub snapshot_id: u32,
    pub snapshot_reserved_blocks: u64,
    pub snapshot_list_start: u32,

    // ── Error tracking ───────────────────────────────────────────────────
    pub error_count: u32,
    pub first_error_time: u32,
    pub first_error_inode: u32,
    pub first_error_block: u64,
    pub first_error_function: String,
    pub first_error_line: u32,
    pub last_error_time: u32,
    pub last_error_inode: u32,
    pub last_error_line: u32,
    pub last_error_block: u64,
    pub last_error_function: String,

    // ── Quota & misc inodes ──────────────────────────────────────────────
    pub mount_options: String,
    pub user_quota_inode: u32,
    pub group_quota_inode: u32,
    pub overhead_blocks: u32,
    pub backup_superblock_groups: [u32; 2],
    pub encryption_algorithms: [u8; 4],
    pub encryption_salt: [u8; 16],
    pub lost_found_inode: u32,
    pub project_quota_inode: u32,

    // ── Checksums ────────────────────────────────────────────────────────
    pub checksum_seed_stored: u32,
    pub checksum: u32,
}

/// Decode a 1024-byte superblock record.
pub fn parse_superblock(bytes: &[u8]) -> Result<Superblock, ParseError> {
    if bytes.len() != SUPERBLOCK_SIZE {
        return Err(ParseError::InsufficientData {
            needed: SUPERBLOCK_SIZE,
            offset: 0,
            actual: bytes.len(),
        });
    }

    let magic = read_le_u16(bytes, 0x38)?;
    if magic != SUPER_MAGIC {
        return Err(ParseError::InvalidMagic {
            expected: u64::from(SUPER_MAGIC),
            actual: u64::from(magic),
        });
    }

    let checksum_type = read_u8(bytes, 0x175)?;
    if checksum_type > 1 {
        return Err(ParseError::UnsupportedFeature {
            field: "s_checksum_type",
            reason: "only none (0) and crc32c (1) are defined",
        });
    }

    let features = FeatureFlags::from_raw(
        read_le_u32(bytes, 0x5C)?,
        read_le_u32(bytes, 0x60)?,
        read_le_u32(bytes, 0x64)?,
    );

    let checksum = read_le_u32(bytes, CHECKSUM_OFFSET)?;
    if features.ro_compat.metadata_csum {
        let computed = crc32c_update(CRC32C_SEED, &bytes[..CHECKSUM_OFFSET]);
        if computed != checksum {
            return Err(ParseError::ChecksumMismatch {
                what: "superblock",
                stored: checksum,
                computed,
            });
        }
    }

    let log_block_size = read_le_u32(bytes, 0x18)?;
    let block_size = block_size_from_log(log_block_size)
        .ok_or(ParseError::InvalidField {
            field: "s_log_block_size",
            reason: "shift out of range",
        })
        .and_then(BlockSize::new)?;

    let log_cluster_size = read_le_u32(bytes, 0x1C)?;
    if log_cluster_size >= 64 {
        return Err(ParseError::InvalidField {
            field: "s_log_cluster_size",
            reason: "shift out of range",
        });
    }
    let cluster_size = 1_u64 << log_cluster_size;

    // Counts widen to 64 bits only on 64-bit images; the upper halves at
    // 0x150.. are otherwise ignored.
    let bit64 = features.incompat.bit64;
    let wide = |lo: u32, hi: u32| -> u64 {
        if bit64 {
            u64::from(lo) | (u64::from(hi) << 32)
        } else {
            u64::from(lo)
        }
    };
    let block_count = wide(read_le_u32(bytes, 0x04)?, read_le_u32(bytes, 0x150)?);
    let reserved_blocks = wide(read_le_u32(bytes, 0x08)?, read_le_u32(bytes, 0x154)?);
    let free_blocks = wide(read_le_u32(bytes, 0x0C)?, read_le_u32(bytes, 0x158)?);

    let group_descriptor_size_raw = read_le_u16(bytes, 0xFE)?;
    if bit64 && group_descriptor_size_raw < 64 {
        return Err(ParseError::InvalidField {
            field: "s_desc_size",
            reason: "64-bit images require descriptors of at least 64 bytes",
        });
    }

    let journal_backup_type = read_u8(bytes, 0xFD)?;
    let journal_backup = if journal_backup_type == 0 {
        let mut i_blocks = [0_u32; 15];
        for (index, slot) in i_blocks.iter_mut().enumerate() {
            *slot = read_le_u32(bytes, 0x10C + 4 * index)?;
        }
        // The size halves are stored swapped: word 16 carries the low
        // half, word 15 the high half.
        let i_size =
            u64::from(read_le_u32(bytes, 0x10C + 4 * 16)?) | (u64::from(read_le_u32(bytes, 0x10C + 4 * 15)?) << 32);
        Some(JournalBackup { i_blocks, i_size })
    } else {
        None
    };

    Ok(Superblock {
        inode_count: read_le_u32(bytes, 0x00)?,
        block_count,
        reserved_blocks,
        free_blocks,
        free_inodes: read_le_u32(bytes, 0x10)?,
        first_data_block: read_le_u32(bytes, 0x14)?,
        block_size,
        cluster_size,
        blocks_per_group: read_le_u32(bytes, 0x20)?,
        clusters_per_group: read_le_u32(bytes, 0x24)?,
        inodes_per_group: read_le_u32(bytes, 0x28)?,
        inode_size: read_le_u16(bytes, 0x58)?,
        first_non_reserved_inode: read_le_u32(bytes, 0x54)?,
        block_group_number: read_le_u16(bytes, 0x5A)?,
        group_descriptor_size_raw,

        uuid: read_fixed::<16>(bytes, 0x68)?,
        volume_label: trim_nul_padded(&read_fixed::<16>(bytes, 0x78)?),
        last_mounted_directory: trim_nul_padded(&read_fixed::<64>(bytes, 0x88)?),

        mount_time: read_le_u32(bytes, 0x2C)?,
        write_time: read_le_u32(bytes, 0x30)?,
        mount_count: read_le_u16(bytes, 0x34)?,
        mounts_to_fsck: read_le_u16(bytes, 0x36)?,
        filesystem_state: read_le_u16(bytes, 0x3A)?,
        error_behaviour: read_le_u16(bytes, 0x3C)?,
        minor_revision: read_le_u16(bytes, 0x3E)?,
        last_check: read_le_u32(bytes, 0x40)?,
        check_interval: read_le_u32(bytes, 0x44)?,
        creator_os: read_le_u32(bytes, 0x48)?,
        revision_level: read_le_u32(bytes, 0x4C)?,
        reserved_blocks_default_uid: read_le_u16(bytes, 0x50)?,
        reserved_blocks_default_gid: read_le_u16(bytes, 0x52)?,

        features,
        misc_flags: MiscFlags::from_raw(read_le_u32(bytes, 0x160)?),
        default_mount_options: read_le_u32(bytes, 0x100)?,

        algorithm_usage_bitmap: read_le_u32(bytes, 0xC8)?,
        preallocation_blocks: read_u8(bytes, 0xCC)?,
        preallocation_directory_blocks: read_u8(bytes, 0xCD)?,
        reserved_gdt_blocks: read_le_u16(bytes, 0xCE)?,

        journal_uuid: read_fixed::<16>(bytes, 0xD0)?,
        journal_inode: read_le_u32(bytes, 0xE0)?,
        journal_device: read_le_u32(bytes, 0xE4)?,
        orphaned_inodes_start: read_le_u32(bytes, 0xE8)?,
        journal_backup_type,
        journal_backup,

        hash_tree_seed: [
            read_le_u32(bytes, 0xEC)?,
            read_le_u32(bytes, 0xF0)?,
            read_le_u32(bytes, 0xF4)?,
            read_le_u32(bytes, 0xF8)?,
        ],
        hash_version: read_u8(bytes, 0xFC)?,

        first_meta_block_group: read_le_u32(bytes, 0x104)?,
        mkfs_time: read_le_u32(bytes, 0x108)?,
        inode_min_extra_bytes: read_le_u16(bytes, 0x15C)?,
        inode_want_extra_bytes: read_le_u16(bytes, 0x15E)?,
        raid_stride: read_le_u16(bytes, 0x164)?,
        mmp_interval: read_le_u16(bytes, 0x166)?,
        mmp_block: read_le_u64(bytes, 0x168)?,
        raid_stripe_width: read_le_u32(bytes, 0x170)?,
        log_groups_per_flex: read_u8(bytes, 0x174)?,
        checksum_type,
        kbytes_written: read_le_u64(bytes, 0x178)?,

        snapshot_inode: read_le_u32(bytes, 0x180)?,
        snapshot_id: read_le_u32(bytes, 0x184)?,
        snapshot_reserved_blocks: read_le_u64(bytes, 0x188)?,
        snapshot_list_start: read_le_u32(bytes, 0x190)?,

        error_count: read_le_u32(bytes, 0x194)?,
        first_error_time: read_le_u32(bytes, 0x198)?,
        first_error_inode: read_le_u32(bytes, 0x19C)?,
        first_error_block: read_le_u64(bytes, 0x1A0)?,
        first_error_function: trim_nul_padded(ensure_slice(bytes, 0x1A8, 32)?),
        first_error_line: read_le_u32(bytes, 0x1C8)?,
        last_error_time: read_le_u32(bytes, 0x1CC)?,
        last_error_inode: read_le_u32(bytes, 0x1D0)?,
        last_error_line: read_le_u32(bytes, 0x1D4)?,
        last_error_block: read_le_u64(bytes, 0x1D8)?,
        last_error_function: trim_nul_padded(ensure_slice(bytes, 0x1E0, 32)?),

        mount_options: trim_nul_padded(ensure_slice(bytes, 0x200, 64)?),
        user_quota_inode: read_le_u32(bytes, 0x240)?,
        group_quota_inode: read_le_u32(bytes, 0x244)?,
        overhead_blocks: read_le_u32(bytes, 0x248)?,
        backup_superblock_groups: [read_le_u32(bytes, 0x24C)?, read_le_u32(bytes, 0x250)?],
        encryption_algorithms: read_fixed::<4>(bytes, 0x254)?,
        encryption_salt: read_fixed::<16>(bytes, 0x258)?,
        lost_found_inode: read_le_u32(bytes, 0x268)?,
        project_quota_inode: read_le_u32(bytes, 0x26C)?,

        checksum_seed_stored: read_le_u32(bytes, 0x270)?,
        checksum,
    })
}

impl Superblock {
    /// Number of block groups in the image.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // ext4 group count fits u32
    pub fn group_count(&self) -> u32 {
        if self.blocks_per_group == 0 {
            return 0;
        }
        let data_blocks = self
            .block_count
            .saturating_sub(u64::from(self.first_data_block));
        data_blocks.div_ceil(u64::from(self.blocks_per_group)) as u32
    }

    /// On-disk size of one group descriptor: 32 on 32-bit images, the
    /// stored value otherwise.
    #[must_use]
    pub fn group_descriptor_size(&self) -> u16 {
        if self.features.incompat.bit64 {
            self.group_descriptor_size_raw
        } else {
            32
        }
    }

    /// Whether all metadata carries seeded CRC-32C checksums.
    #[must_use]
    pub fn has_metadata_checksums(&self) -> bool {
        self.features.ro_compat.metadata_csum
    }

    /// The per-image CRC-32C checksum seed.
    ///
    /// Stored in the superblock when the csum-seed feature is set;
    /// otherwise derived from the UUID when any consumer of the seed is
    /// enabled; otherwise unused.
    #[must_use]
    pub fn checksum_seed(&self) -> Option<u32> {
        if self.features.incompat.csum_seed {
            Some(self.checksum_seed_stored)
        } else if self.features.ro_compat.metadata_csum || self.features.incompat.ea_inode {
            Some(crc32c_update(CRC32C_SEED, &self.uuid))
        } else {
            None
        }
    }

    /// Re-encode to the on-disk 1024-byte form. When metadata checksums
    /// are enabled the trailing CRC-32C is recomputed rather than copied.
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn to_bytes(&self) -> [u8; SUPERBLOCK_SIZE] {
        let mut b = [0_u8; SUPERBLOCK_SIZE];
        let put_u16 = |b: &mut [u8; SUPERBLOCK_SIZE], off: usize, v: u16| {
            b[off..off + 2].copy_from_slice(&v.to_le_bytes());
        };
        let put_u32 = |b: &mut [u8; SUPERBLOCK_SIZE], off: usize, v: u32| {
            b[off..off + 4].copy_from_slice(&v.to_le_bytes());
        };
        let put_u64 = |b: &mut [u8; SUPERBLOCK_SIZE], off: usize, v: u64| {
            b[off..off + 8].copy_from_slice(&v.to_le_bytes());
        };
        let put_str = |b: &mut [u8; SUPERBLOCK_SIZE], off: usize, len: usize, s: &str| {
            let bytes = s.as_bytes();
            let n = bytes.len().min(len);
            b[off..off + n].copy_from_slice(&bytes[..n]);
        };

        put_u32(&mut b, 0x00, self.inode_count);
        #[allow(clippy::cast_possible_truncation)]
        {
            put_u32(&mut b, 0x04, self.block_count as u32);
            put_u32(&mut b, 0x08, self.reserved_blocks as u32);
            put_u32(&mut b, 0x0C, self.free_blocks as u32);
            if self.features.incompat.bit64 {
                put_u32(&mut b, 0x150, (self.block_count >> 32) as u32);
                put_u32(&mut b, 0x154, (self.reserved_blocks >> 32) as u32);
                put_u32(&mut b, 0x158, (self.free_blocks >> 32) as u32);
            }
        }
        put_u32(&mut b, 0x10, self.free_inodes);
        put_u32(&mut b, 0x14, self.first_data_block);
        put_u32(&mut b, 0x18, self.block_size.get().trailing_zeros() - 10);
        put_u32(&mut b, 0x1C, self.cluster_size.trailing_zeros());
        put_u32(&mut b, 0x20, self.blocks_per_group);
        put_u32(&mut b, 0x24, self.clusters_per_group);
        put_u32(&mut b, 0x28, self.inodes_per_group);
        put_u32(&mut b, 0x2C, self.mount_time);
        put_u32(&mut b, 0x30, self.write_time);
        put_u16(&mut b, 0x34, self.mount_count);
        put_u16(&mut b, 0x36, self.mounts_to_fsck);
        put_u16(&mut b, 0x38, SUPER_MAGIC);
        put_u16(&mut b, 0x3A, self.filesystem_state);
        put_u16(&mut b, 0x3C, self.error_behaviour);
        put_u16(&mut b, 0x3E, self.minor_revision);
        put_u32(&mut b, 0x40, self.last_check);
        put_u32(&mut b, 0x44, self.check_interval);
        put_u32(&mut b, 0x48, self.creator_os);
        put_u32(&mut b, 0x4C, self.revision_level);
        put_u16(&mut b, 0x50, self.reserved_blocks_default_uid);
        put_u16(&mut b, 0x52, self.reserved_blocks_default_gid);
        put_u32(&mut b, 0x54, self.first_non_reserved_inode);
        put_u16(&mut b, 0x58, self.inode_size);
        put_u16(&mut b, 0x5A, self.block_group_number);
        let (compat, incompat, ro_compat) = self.features.to_raw();
        put_u32(&mut b, 0x5C, compat);
        put_u32(&mut b, 0x60, incompat);
        put_u32(&mut b, 0x64, ro_compat);
        b[0x68..0x78].copy_from_slice(&self.uuid);
        put_str(&mut b, 0x78, 16, &self.volume_label);
        put_str(&mut b, 0x88, 64, &self.last_mounted_directory);
        put_u32(&mut b, 0xC8, self.algorithm_usage_bitmap);
        b[0xCC] = self.preallocation_blocks;
        b[0xCD] = self.preallocation_directory_blocks;
        put_u16(&mut b, 0xCE, self.reserved_gdt_blocks);
        b[0xD0..0xE0].copy_from_slice(&self.journal_uuid);
        put_u32(&mut b, 0xE0, self.journal_inode);
        put_u32(&mut b, 0xE4, self.journal_device);
        put_u32(&mut b, 0xE8, self.orphaned_inodes_start);
        put_u32(&mut b, 0xEC, self.hash_tree_seed[0]);
        put_u32(&mut b, 0xF0, self.hash_tree_seed[1]);
        put_u32(&mut b, 0xF4, self.hash_tree_seed[2]);
        put_u32(&mut b, 0xF8, self.hash_tree_seed[3]);
        b[0xFC] = self.hash_version;
        b[0xFD] = self.journal_backup_type;
        put_u16(&mut b, 0xFE, self.group_descriptor_size_raw);
        put_u32(&mut b, 0x100, self.default_mount_options);
        put_u32(&mut b, 0x104, self.first_meta_block_group);
        put_u32(&mut b, 0x108, self.mkfs_time);
        if let Some(backup) = &self.journal_backup {
            for (index, block) in backup.i_blocks.iter().enumerate() {
                put_u32(&mut b, 0x10C + 4 * index, *block);
            }
            #[allow(clippy::cast_possible_truncation)]
            {
                put_u32(&mut b, 0x10C + 4 * 16, backup.i_size as u32);
                put_u32(&mut b, 0x10C + 4 * 15, (backup.i_size >> 32) as u32);
            }
        }
        put_u16(&mut b, 0x15C, self.inode_min_extra_bytes);
        put_u16(&mut b, 0x15E, self.inode_want_extra_bytes);
        put_u32(&mut b, 0x160, self.misc_flags.to_raw());
        put_u16(&mut b, 0x164, self.raid_stride);
        put_u16(&mut b, 0x166, self.mmp_interval);
        put_u64(&mut b, 0x168, self.mmp_block);
        put_u32(&mut b, 0x170, self.raid_stripe_width);
        b[0x174] = self.log_groups_per_flex;
        b[0x175] = self.checksum_type;
        put_u64(&mut b, 0x178, self.kbytes_written);
        put_u32(&mut b, 0x180, self.snapshot_inode);
        put_u32(&mut b, 0x184, self.snapshot_id);
        put_u64(&mut b, 0x188, self.snapshot_reserved_blocks);
        put_u32(&mut b, 0x190, self.snapshot_list_start);
        put_u32(&mut b, 0x194, self.error_count);
        put_u32(&mut b, 0x198, self.first_error_time);
        put_u32(&mut b, 0x19C, self.first_error_inode);
        put_u64(&mut b, 0x1A0, self.first_error_block);
        put_str(&mut b, 0x1A8, 32, &self.first_error_function);
        put_u32(&mut b, 0x1C8, self.first_error_line);
        put_u32(&mut b, 0x1CC, self.last_error_time);
        put_u32(&mut b, 0x1D0, self.last_error_inode);
        put_u32(&mut b, 0x1D4, self.last_error_line);
        put_u64(&mut b, 0x1D8, self.last_error_block);
        put_str(&mut b, 0x1E0, 32, &self.last_error_function);
        put_str(&mut b, 0x200, 64, &self.mount_options);
        put_u32(&mut b, 0x240, self.user_quota_inode);
        put_u32(&mut b, 0x244, self.group_quota_inode);
        put_u32(&mut b, 0x248, self.overhead_blocks);
        put_u32(&mut b, 0x24C, self.backup_superblock_groups[0]);
        put_u32(&mut b, 0x250, self.backup_superblock_groups[1]);
        b[0x254..0x258].copy_from_slice(&self.encryption_algorithms);
        b[0x258..0x268].copy_from_slice(&self.encryption_salt);
        put_u32(&mut b, 0x268, self.lost_found_inode);
        put_u32(&mut b, 0x26C, self.project_quota_inode);
        put_u32(&mut b, 0x270, self.checksum_seed_stored);

        let checksum = if self.has_metadata_checksums() {
            crc32c_update(CRC32C_SEED, &b[..CHECKSUM_OFFSET])
        } else {
            self.checksum
        };
        put_u32(&mut b, CHECKSUM_OFFSET, checksum);
        b
    }
}
