#![forbid(unsafe_code)]
//! Pure byte decoders for the ext4 on-disk format.
//!
//! Everything in this crate operates on byte slices already read from the
//! device: the superblock, the group-descriptor table, inodes, extent-tree
//! nodes and directory entries. No module here performs I/O; the device-
//! driven pieces (extent flattening, file reads) live above.
//!
//! All on-disk integers are little-endian. Offsets in the decoders follow
//! the ext4 layout documents field-for-field.

mod dirent;
mod extent;
mod features;
mod group;
mod inode;
mod superblock;

pub use dirent::{
    find_dir_entry, iter_dir_entries, pad_to_block_size, DirEntry, DirEntryIter, DIRENT_TOMBSTONE,
};
pub use extent::{
    parse_extent_node, Extent, ExtentEntries, ExtentHeader, ExtentIndex, ExtentNode, EXTENT_MAGIC,
};
pub use features::{CompatFeatures, FeatureFlags, IncompatFeatures, MiscFlags, RoCompatFeatures};
pub use group::{
    group_descriptor_checksum, parse_group_descriptors, BlockGroupFlags, GdtChecksumMode,
    GroupDescriptor, GROUP_DESC_SIZE_32, GROUP_DESC_SIZE_64,
};
pub use inode::{parse_inode, ChecksumPolicy, ExtTimestamp, FileKind, Inode, Permissions};
pub use superblock::{parse_superblock, JournalBackup, Superblock};
