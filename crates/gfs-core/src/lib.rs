#![forbid(unsafe_code)]
//! The open-image handle.
//!
//! `Ext4Filesystem::open` reads the boot sector, superblock and
//! group-descriptor table from a borrowed byte device, then answers
//! directory listings and file opens against that image. The image may
//! start at any byte offset within the device; every on-disk address is
//! translated through it.
//!
//! Strictly read-only: any open flag beyond read-only is rejected.

use gfs_block::{read_exact_at, ByteDevice};
use gfs_error::{GfsError, Result};
use gfs_extent::{ExtentCache, ImageGeometry};
use gfs_hash::{dir_name_hash, HashVersion};
use gfs_ondisk::{
    find_dir_entry, iter_dir_entries, parse_group_descriptors, parse_inode, parse_superblock,
    ChecksumPolicy, ExtTimestamp, FileKind, GroupDescriptor, Inode, Superblock,
};
use gfs_types::{
    inode_index_in_group, inode_to_group, u64_to_usize, ByteOffset, InodeNumber, ParseError,
    BOOT_SECTOR_SIZE, MIN_IMAGE_SIZE, SUPERBLOCK_SIZE,
};
use std::sync::Arc;
use tracing::debug;

mod file;
mod flags;

pub use file::File;
pub use flags::OpenFlags;

/// The filesystem types this crate can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilesystemType {
    Ext4,
}

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    /// Canonical mode word: file-type nibble plus permission bits.
    pub mode: u16,
    pub size: u64,
    pub modified_time: ExtTimestamp,
    pub is_dir: bool,
}

/// A resolved inode together with its memoised extent map.
#[derive(Debug)]
pub struct InodeHandle {
    pub inode: Inode,
    extents: ExtentCache,
}

impl InodeHandle {
    fn new(inode: Inode) -> Self {
        Self {
            inode,
            extents: ExtentCache::new(),
        }
    }

    /// The flattened extent vector, computed on first use.
    fn flattened(
        &self,
        device: &dyn ByteDevice,
        geometry: &ImageGeometry,
    ) -> Result<Arc<Vec<gfs_ondisk::Extent>>> {
        let root = self
            .inode
            .extent_root
            .as_ref()
            .ok_or_else(|| GfsError::Corruption {
                block: 0,
                detail: format!("inode {} is not extent-mapped", self.inode.number),
            })?;
        self.extents.get_or_flatten(device, geometry, root)
    }
}

/// An open ext4 image. Borrows the device for its lifetime.
pub struct Ext4Filesystem<'d> {
    device: &'d dyn ByteDevice,
    start: u64,
    size: u64,
    boot_sector: Vec<u8>,
    superblock: Superblock,
    group_descriptors: Vec<GroupDescriptor>,
    geometry: ImageGeometry,
    checksum_policy: ChecksumPolicy,
}

impl<'d> std::fmt::Debug for Ext4Filesystem<'d> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ext4Filesystem")
            .field("start", &self.start)
            .field("size", &self.size)
            .field("superblock", &self.superblock)
            .field("group_descriptors", &self.group_descriptors)
            .field("geometry", &self.geometry)
            .field("checksum_policy", &self.checksum_policy)
            .finish()
    }
}

impl<'d> Ext4Filesystem<'d> {
    /// Open an image of `size` bytes beginning `start` bytes into the
    /// device. `logical_sector_size` must be 0 or 512.
    pub fn open(
        device: &'d dyn ByteDevice,
        size: u64,
        start: u64,
        logical_sector_size: u64,
    ) -> Result<Self> {
        Self::open_with_policy(
            device,
            size,
            start,
            logical_sector_size,
            ChecksumPolicy::default(),
        )
    }

    /// As [`open`](Self::open), with an explicit inode-checksum policy.
    pub fn open_with_policy(
        device: &'d dyn ByteDevice,
        size: u64,
        start: u64,
        logical_sector_size: u64,
        checksum_policy: ChecksumPolicy,
    ) -> Result<Self> {
        if logical_sector_size != 0 && logical_sector_size != 512 {
            return Err(GfsError::UnsupportedSectorSize(logical_sector_size));
        }
        if size < MIN_IMAGE_SIZE {
            return Err(GfsError::ImageTooSmall(size));
        }

        let mut boot_sector = vec![0_u8; BOOT_SECTOR_SIZE];
        read_exact_at(device, &mut boot_sector, ByteOffset(start))?;

        let mut sb_bytes = vec![0_u8; SUPERBLOCK_SIZE];
        read_exact_at(
            device,
            &mut sb_bytes,
            ByteOffset(start + BOOT_SECTOR_SIZE as u64),
        )?;
        let superblock = parse_superblock(&sb_bytes)?;

        let gdt_len = u64::from(superblock.group_count())
            * u64::from(superblock.group_descriptor_size());
        let mut gdt_bytes = vec![0_u8; u64_to_usize(gdt_len, "gdt_length")?];
        read_exact_at(
            device,
            &mut gdt_bytes,
            ByteOffset(start + (BOOT_SECTOR_SIZE + SUPERBLOCK_SIZE) as u64),
        )?;
        let group_descriptors = parse_group_descriptors(&gdt_bytes, &superblock)?;

        let geometry = ImageGeometry {
            start,
            block_size: superblock.block_size,
        };

        debug!(
            target: "gfs::core",
            block_size = superblock.block_size.get(),
            groups = group_descriptors.len(),
            inode_size = superblock.inode_size,
            metadata_csum = superblock.has_metadata_checksums(),
            "opened ext4 image"
        );

        Ok(Self {
            device,
            start,
            size,
            boot_sector,
            superblock,
            group_descriptors,
            geometry,
            checksum_policy,
        })
    }

    #[must_use]
    pub fn filesystem_type(&self) -> FilesystemType {
        FilesystemType::Ext4
    }

    #[must_use]
    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    #[must_use]
    pub fn group_descriptors(&self) -> &[GroupDescriptor] {
        &self.group_descriptors
    }

    #[must_use]
    pub fn image_size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn boot_sector(&self) -> &[u8] {
        &self.boot_sector
    }

    /// Read and parse one inode from the inode table.
    pub fn read_inode(&self, number: InodeNumber) -> Result<InodeHandle> {
        if number.0 == 0 {
            return Err(ParseError::InvalidField {
                field: "inode_number",
                reason: "inode numbers start at 1",
            }
            .into());
        }

        let group = inode_to_group(number, self.superblock.inodes_per_group);
        let descriptor = self
            .group_descriptors
            .get(group.0 as usize)
            .ok_or_else(|| GfsError::Corruption {
                block: 0,
                detail: format!("inode {number} falls in nonexistent group {group}"),
            })?;

        let index = inode_index_in_group(number, self.superblock.inodes_per_group);
        let table_byte = self
            .geometry
            .block_size
            .block_to_byte(gfs_types::BlockNumber(descriptor.inode_table_location))
            .ok_or_else(|| GfsError::Corruption {
                block: descriptor.inode_table_location,
                detail: "inode table offset overflows".to_owned(),
            })?;
        let inode_offset = self.start
            + table_byte
            + u64::from(index) * u64::from(self.superblock.inode_size);

        let mut raw = vec![0_u8; usize::from(self.superblock.inode_size)];
        read_exact_at(self.device, &mut raw, ByteOffset(inode_offset))?;

        let inode = parse_inode(&raw, &self.superblock, number, self.checksum_policy)?;
        Ok(InodeHandle::new(inode))
    }

    /// Read a file's entire body, one device read per extent.
    pub fn read_file_bytes(&self, handle: &InodeHandle) -> Result<Vec<u8>> {
        let size = u64_to_usize(handle.inode.size, "file_size")?;
        let mut buf = vec![0_u8; size];
        let extents = handle.flattened(self.device, &self.geometry)?;
        let block_size = u64::from(self.geometry.block_size.get());

        let mut filled = 0_usize;
        for extent in extents.iter() {
            if filled >= size {
                break;
            }
            let extent_bytes = u64::from(extent.length) * block_size;
            let count = u64_to_usize(extent_bytes.min((size - filled) as u64), "extent_length")?;
            let offset = extent
                .disk_block
                .checked_mul(block_size)
                .and_then(|byte| byte.checked_add(self.start))
                .ok_or_else(|| GfsError::Corruption {
                    block: extent.disk_block,
                    detail: "extent offset overflows the device address space".to_owned(),
                })?;
            read_exact_at(self.device, &mut buf[filled..filled + count], ByteOffset(offset))?;
            filled += count;
        }

        if filled < size {
            return Err(GfsError::Corruption {
                block: 0,
                detail: format!(
                    "inode {}: extents cover {filled} bytes of a {size}-byte file",
                    handle.inode.number
                ),
            });
        }
        Ok(buf)
    }

    /// Walk `path` from the root inode, one directory lookup per
    /// segment. Empty segments are ignored, so `"/"` resolves to the
    /// root directory itself.
    pub fn resolve_path(&self, path: &str) -> Result<InodeHandle> {
        let mut current = self.read_inode(InodeNumber::ROOT)?;

        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if !current.inode.is_dir() {
                return Err(GfsError::NotADirectory(segment.to_owned()));
            }

            let body = self.read_file_bytes(&current)?;
            let entry = find_dir_entry(&body, &self.superblock, segment.as_bytes())
                .map_err(GfsError::from)?
                .ok_or_else(|| GfsError::NotFound(segment.to_owned()))?;

            current = self.read_inode(entry.inode).map_err(|err| err.at_segment(segment))?;
        }

        Ok(current)
    }

    /// List a directory, excluding the `.` and `..` entries. Each entry's
    /// inode is resolved to fill in mode, size and modification time.
    pub fn read_dir(&self, path: &str) -> Result<Vec<FileInfo>> {
        let dir = self.resolve_path(path)?;
        if !dir.inode.is_dir() {
            return Err(GfsError::NotADirectory(path.to_owned()));
        }

        let body = self.read_file_bytes(&dir)?;
        let mut infos = Vec::new();
        for entry in iter_dir_entries(&body, &self.superblock) {
            let entry = entry.map_err(GfsError::from)?;
            let handle = self
                .read_inode(entry.inode)
                .map_err(|err| err.at_segment(&entry.name_str()))?;
            let inode = &handle.inode;
            infos.push(FileInfo {
                name: entry.name_str(),
                mode: inode.mode(),
                size: inode.size,
                modified_time: inode.modify_time,
                is_dir: entry.file_kind == Some(FileKind::Directory) || inode.is_dir(),
            });
        }
        Ok(infos)
    }

    /// Open a file for reading. Every flag beyond read-only fails with
    /// `WriteNotSupported`; directories fail with `IsADirectory`.
    pub fn open_file(&self, path: &str, flags: OpenFlags) -> Result<File<'d>> {
        if !flags.is_read_only() {
            return Err(GfsError::WriteNotSupported);
        }

        let handle = self.resolve_path(path)?;
        if handle.inode.is_dir() {
            return Err(GfsError::IsADirectory(path.to_owned()));
        }

        Ok(File::new(self.device, self.geometry, handle))
    }

    /// The flattened, file-block-ordered extent map of an inode.
    pub fn inode_extents(&self, handle: &InodeHandle) -> Result<Arc<Vec<gfs_ondisk::Extent>>> {
        handle.flattened(self.device, &self.geometry)
    }

    /// The hash version htree lookups in this image's directories would
    /// use: the superblock's default version, shifted to the unsigned
    /// flavour when the unsigned-hash flag is set.
    ///
    /// `None` when the stored version byte names a hash this reader
    /// cannot compute.
    #[must_use]
    pub fn directory_hash_version(&self) -> Option<HashVersion> {
        let version = HashVersion::from_raw(self.superblock.hash_version)?;
        if self.superblock.misc_flags.unsigned_dir_hash {
            Some(match version {
                HashVersion::Legacy => HashVersion::LegacyUnsigned,
                HashVersion::HalfMd4 => HashVersion::HalfMd4Unsigned,
                HashVersion::Tea => HashVersion::TeaUnsigned,
                unsigned => unsigned,
            })
        } else {
            Some(version)
        }
    }

    /// Hash a directory entry name the way this image's htree index
    /// does: the image's hash version over the superblock's seed.
    pub fn hash_dir_name(&self, name: &[u8]) -> Result<(u32, u32)> {
        let version = self
            .directory_hash_version()
            .ok_or(ParseError::UnsupportedFeature {
                field: "s_def_hash_version",
                reason: "unknown directory hash version",
            })?;
        Ok(dir_name_hash(name, version, &self.superblock.hash_tree_seed))
    }
}

// Re-exported so callers need not import std::io themselves.
pub use std::io::SeekFrom;
