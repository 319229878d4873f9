//! Feature-flag decoding.
//!
//! The superblock carries three disjoint bitmasks: features a reader can
//! ignore (`compat`), features that change the on-disk layout (`incompat`),
//! and features that only a writer must honour (`ro_compat`). Each mask is
//! decoded into a struct of named booleans so layout decisions read as
//! `features.incompat.bit64` rather than mask arithmetic at the use site.

use serde::{Deserialize, Serialize};

// compat
const COMPAT_DIR_PREALLOC: u32 = 0x0001;
const COMPAT_IMAGIC_INODES: u32 = 0x0002;
const COMPAT_HAS_JOURNAL: u32 = 0x0004;
const COMPAT_EXT_ATTR: u32 = 0x0008;
const COMPAT_RESIZE_INODE: u32 = 0x0010;
const COMPAT_DIR_INDEX: u32 = 0x0020;
const COMPAT_LAZY_BG: u32 = 0x0040;
const COMPAT_EXCLUDE_INODE: u32 = 0x0080;
const COMPAT_EXCLUDE_BITMAP: u32 = 0x0100;
const COMPAT_SPARSE_SUPER2: u32 = 0x0200;

// incompat
const INCOMPAT_COMPRESSION: u32 = 0x0001;
const INCOMPAT_FILETYPE: u32 = 0x0002;
const INCOMPAT_RECOVER: u32 = 0x0004;
const INCOMPAT_JOURNAL_DEV: u32 = 0x0008;
const INCOMPAT_META_BG: u32 = 0x0010;
const INCOMPAT_EXTENTS: u32 = 0x0040;
const INCOMPAT_64BIT: u32 = 0x0080;
const INCOMPAT_MMP: u32 = 0x0100;
const INCOMPAT_FLEX_BG: u32 = 0x0200;
const INCOMPAT_EA_INODE: u32 = 0x0400;
const INCOMPAT_DIRDATA: u32 = 0x1000;
const INCOMPAT_CSUM_SEED: u32 = 0x2000;
const INCOMPAT_LARGEDIR: u32 = 0x4000;
const INCOMPAT_INLINE_DATA: u32 = 0x8000;
const INCOMPAT_ENCRYPT: u32 = 0x10000;

// ro_compat
const RO_COMPAT_SPARSE_SUPER: u32 = 0x0001;
const RO_COMPAT_LARGE_FILE: u32 = 0x0002;
const RO_COMPAT_BTREE_DIR: u32 = 0x0004;
const RO_COMPAT_HUGE_FILE: u32 = 0x0008;
const RO_COMPAT_GDT_CSUM: u32 = 0x0010;
const RO_COMPAT_DIR_NLINK: u32 = 0x0020;
const RO_COMPAT_EXTRA_ISIZE: u32 = 0x0040;
const RO_COMPAT_HAS_SNAPSHOT: u32 = 0x0080;
const RO_COMPAT_QUOTA: u32 = 0x0100;
const RO_COMPAT_BIGALLOC: u32 = 0x0200;
const RO_COMPAT_METADATA_CSUM: u32 = 0x0400;
const RO_COMPAT_REPLICA: u32 = 0x0800;
const RO_COMPAT_READONLY: u32 = 0x1000;
const RO_COMPAT_PROJECT: u32 = 0x2000;

/// Features a reader may ignore entirely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatFeatures {
    pub dir_prealloc: bool,
    pub imagic_inodes: bool,
    pub has_journal: bool,
    pub ext_attr: bool,
    pub resize_inode: bool,
    pub dir_index: bool,
    pub lazy_bg: bool,
    pub exclude_inode: bool,
    pub exclude_bitmap: bool,
    pub sparse_super2: bool,
}

impl CompatFeatures {
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        Self {
            dir_prealloc: raw & COMPAT_DIR_PREALLOC != 0,
            imagic_inodes: raw & COMPAT_IMAGIC_INODES != 0,
            has_journal: raw & COMPAT_HAS_JOURNAL != 0,
            ext_attr: raw & COMPAT_EXT_ATTR != 0,
            resize_inode: raw & COMPAT_RESIZE_INODE != 0,
            dir_index: raw & COMPAT_DIR_INDEX != 0,
            lazy_bg: raw & COMPAT_LAZY_BG != 0,
            exclude_inode: raw & COMPAT_EXCLUDE_INODE != 0,
            exclude_bitmap: raw & COMPAT_EXCLUDE_BITMAP != 0,
            sparse_super2: raw & COMPAT_SPARSE_SUPER2 != 0,
        }
    }

    #[must_use]
    pub fn to_raw(self) -> u32 {
        let mut raw = 0;
        if self.dir_prealloc {
            raw |= COMPAT_DIR_PREALLOC;
        }
        if self.imagic_inodes {
            raw |= COMPAT_IMAGIC_INODES;
        }
        if self.has_journal {
            raw |= COMPAT_HAS_JOURNAL;
        }
        if self.ext_attr {
            raw |= COMPAT_EXT_ATTR;
        }
        if self.resize_inode {
            raw |= COMPAT_RESIZE_INODE;
        }
        if self.dir_index {
            raw |= COMPAT_DIR_INDEX;
        }
        if self.lazy_bg {
            raw |= COMPAT_LAZY_BG;
        }
        if self.exclude_inode {
            raw |= COMPAT_EXCLUDE_INODE;
        }
        if self.exclude_bitmap {
            raw |= COMPAT_EXCLUDE_BITMAP;
        }
        if self.sparse_super2 {
            raw |= COMPAT_SPARSE_SUPER2;
        }
        raw
    }
}

/// Features that change the on-disk layout; a reader that does not know
/// one of these cannot safely interpret the image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompatFeatures {
    pub compression: bool,
    /// Directory entries record the file type in the byte at +0x07.
    pub filetype: bool,
    pub recover: bool,
    pub journal_dev: bool,
    pub meta_bg: bool,
    /// Inodes map data through extent trees.
    pub extents: bool,
    /// 64-bit block addresses; group descriptors grow past 32 bytes.
    pub bit64: bool,
    pub mmp: bool,
    pub flex_bg: bool,
    /// Large extended attributes live in their own inodes.
    pub ea_inode: bool,
    pub dirdata: bool,
    /// The metadata checksum seed is stored in the superblock.
    pub csum_seed: bool,
    pub largedir: bool,
    pub inline_data: bool,
    pub encrypt: bool,
}

impl IncompatFeatures {
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        Self {
            compression: raw & INCOMPAT_COMPRESSION != 0,
            filetype: raw & INCOMPAT_FILETYPE != 0,
            recover: raw & INCOMPAT_RECOVER != 0,
            journal_dev: raw & INCOMPAT_JOURNAL_DEV != 0,
            meta_bg: raw & INCOMPAT_META_BG != 0,
            extents: raw & INCOMPAT_EXTENTS != 0,
            bit64: raw & INCOMPAT_64BIT != 0,
            mmp: raw & INCOMPAT_MMP != 0,
            flex_bg: raw & INCOMPAT_FLEX_BG != 0,
            ea_inode: raw & INCOMPAT_EA_INODE != 0,
            dirdata: raw & INCOMPAT_DIRDATA != 0,
            csum_seed: raw & INCOMPAT_CSUM_SEED != 0,
            largedir: raw & INCOMPAT_LARGEDIR != 0,
            inline_data: raw & INCOMPAT_INLINE_DATA != 0,
            encrypt: raw & INCOMPAT_ENCRYPT != 0,
        }
    }

    #[must_use]
    pub fn to_raw(self) -> u32 {
        let mut raw = 0;
        if self.compression {
            raw |= INCOMPAT_COMPRESSION;
        }
        if self.filetype {
            raw |= INCOMPAT_FILETYPE;
        }
        if self.recover {
            raw |= INCOMPAT_RECOVER;
        }
        if self.journal_dev {
            raw |= INCOMPAT_JOURNAL_DEV;
        }
        if self.meta_bg {
            raw |= INCOMPAT_META_BG;
        }
        if self.extents {
            raw |= INCOMPAT_EXTENTS;
        }
        if self.bit64 {
            raw |= INCOMPAT_64BIT;
        }
        if self.mmp {
            raw |= INCOMPAT_MMP;
        }
        if self.flex_bg {
            raw |= INCOMPAT_FLEX_BG;
        }
        if self.ea_inode {
            raw |= INCOMPAT_EA_INODE;
        }
        if self.dirdata {
            raw |= INCOMPAT_DIRDATA;
        }
        if self.csum_seed {
            raw |= INCOMPAT_CSUM_SEED;
        }
        if self.largedir {
            raw |= INCOMPAT_LARGEDIR;
        }
        if self.inline_data {
            raw |= INCOMPAT_INLINE_DATA;
        }
        if self.encrypt {
            raw |= INCOMPAT_ENCRYPT;
        }
        raw
    }
}

/// Features a read-only implementation may ignore but a writer must not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoCompatFeatures {
    pub sparse_super: bool,
    pub large_file: bool,
    pub btree_dir: bool,
    /// Inode block counts may use the 48-bit form / filesystem-block units.
    pub huge_file: bool,
    /// Group descriptors carry the legacy CRC-16 checksum.
    pub gdt_csum: bool,
    pub dir_nlink: bool,
    pub extra_isize: bool,
    pub has_snapshot: bool,
    pub quota: bool,
    /// Allocation happens in multi-block clusters.
    pub bigalloc: bool,
    /// All metadata carries seeded CRC-32C checksums.
    pub metadata_csum: bool,
    pub replica: bool,
    pub readonly: bool,
    pub project: bool,
}

impl RoCompatFeatures {
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        Self {
            sparse_super: raw & RO_COMPAT_SPARSE_SUPER != 0,
            large_file: raw & RO_COMPAT_LARGE_FILE != 0,
            btree_dir: raw & RO_COMPAT_BTREE_DIR != 0,
            huge_file: raw & RO_COMPAT_HUGE_FILE != 0,
            gdt_csum: raw & RO_COMPAT_GDT_CSUM != 0,
            dir_nlink: raw & RO_COMPAT_DIR_NLINK != 0,
            extra_isize: raw & RO_COMPAT_EXTRA_ISIZE != 0,
            has_snapshot: raw & RO_COMPAT_HAS_SNAPSHOT != 0,
            quota: raw & RO_COMPAT_QUOTA != 0,
            bigalloc: raw & RO_COMPAT_BIGALLOC != 0,
            metadata_csum: raw & RO_COMPAT_METADATA_CSUM != 0,
            replica: raw & RO_COMPAT_REPLICA != 0,
            readonly: raw & RO_COMPAT_READONLY != 0,
            project: raw & RO_COMPAT_PROJECT != 0,
        }
    }

    #[must_use]
    pub fn to_raw(self) -> u32 {
        let mut raw = 0;
        if self.sparse_super {
            raw |= RO_COMPAT_SPARSE_SUPER;
        }
        if self.large_file {
            raw |= RO_COMPAT_LARGE_FILE;
        }
        if self.btree_dir {
            raw |= RO_COMPAT_BTREE_DIR;
        }
        if self.huge_file {
            raw |= RO_COMPAT_HUGE_FILE;
        }
        if self.gdt_csum {
            raw |= RO_COMPAT_GDT_CSUM;
        }
        if self.dir_nlink {
            raw |= RO_COMPAT_DIR_NLINK;
        }
        if self.extra_isize {
            raw |= RO_COMPAT_EXTRA_ISIZE;
        }
        if self.has_snapshot {
            raw |= RO_COMPAT_HAS_SNAPSHOT;
        }
        if self.quota {
            raw |= RO_COMPAT_QUOTA;
        }
        if self.bigalloc {
            raw |= RO_COMPAT_BIGALLOC;
        }
        if self.metadata_csum {
            raw |= RO_COMPAT_METADATA_CSUM;
        }
        if self.replica {
            raw |= RO_COMPAT_REPLICA;
        }
        if self.readonly {
            raw |= RO_COMPAT_READONLY;
        }
        if self.project {
            raw |= RO_COMPAT_PROJECT;
        }
        raw
    }
}

/// The three feature sets, decoded together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub compat: CompatFeatures,
    pub incompat: IncompatFeatures,
    pub ro_compat: RoCompatFeatures,
}

impl FeatureFlags {
    #[must_use]
    pub fn from_raw(compat: u32, incompat: u32, ro_compat: u32) -> Self {
        Self {
            compat: CompatFeatures::from_raw(compat),
            incompat: IncompatFeatures::from_raw(incompat),
            ro_compat: RoCompatFeatures::from_raw(ro_compat),
        }
    }

    #[must_use]
    pub fn to_raw(self) -> (u32, u32, u32) {
        (
            self.compat.to_raw(),
            self.incompat.to_raw(),
            self.ro_compat.to_raw(),
        )
    }
}

const MISC_SIGNED_DIR_HASH: u32 = 0x0001;
const MISC_UNSIGNED_DIR_HASH: u32 = 0x0002;
const MISC_TEST_DEV_CODE: u32 = 0x0004;

/// Miscellaneous superblock flags (0x160).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiscFlags {
    pub signed_dir_hash: bool,
    pub unsigned_dir_hash: bool,
    pub test_dev_code: bool,
}

impl MiscFlags {
    #[must_use]
    pub fn from_raw(raw: u32) -> Self {
        Self {
            signed_dir_hash: raw & MISC_SIGNED_DIR_HASH != 0,
            unsigned_dir_hash: raw & MISC_UNSIGNED_DIR_HASH != 0,
            test_dev_code: raw & MISC_TEST_DEV_CODE != 0,
        }
    }

    #[must_use]
    pub fn to_raw(self) -> u32 {
        let mut raw = 0;
        if self.signed_dir_hash {
            raw |= MISC_SIGNED_DIR_HASH;
        }
        if self.unsigned_dir_hash {
            raw |= MISC_UNSIGNED_DIR_HASH;
        }
        if self.test_dev_code {
            raw |= MISC_TEST_DEV_CODE;
        }
        raw
    }
}
