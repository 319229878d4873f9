#![forbid(unsafe_code)]
//! GlassFS public API facade.
//!
//! Re-exports the open-image handle and the supporting types through one
//! crate, so downstream consumers depend on `glassfs` alone.
//!
//! ```no_run
//! use glassfs::{Ext4Filesystem, FileByteDevice, OpenFlags};
//!
//! # fn main() -> glassfs::Result<()> {
//! let device = FileByteDevice::open("image.ext4")?;
//! let size = device.size();
//! let fs = Ext4Filesystem::open(&device, size, 0, 0)?;
//! for entry in fs.read_dir("/")? {
//!     println!("{} {} bytes", entry.name, entry.size);
//! }
//! let mut file = fs.open_file("/hello.txt", OpenFlags::READ_ONLY)?;
//! let mut contents = vec![0_u8; file.size() as usize];
//! file.read(&mut contents)?;
//! # Ok(())
//! # }
//! ```

pub use gfs_block::{ByteDevice, FileByteDevice, MemByteDevice};
pub use gfs_core::{
    Ext4Filesystem, File, FileInfo, FilesystemType, InodeHandle, OpenFlags, SeekFrom,
};
pub use gfs_error::{GfsError, Result};
pub use gfs_hash::{dir_name_hash, HashVersion, MD4_IV};
pub use gfs_ondisk::{
    ChecksumPolicy, DirEntry, ExtTimestamp, FeatureFlags, FileKind, GroupDescriptor, Inode,
    Superblock,
};
pub use gfs_types::{BlockNumber, GroupNumber, InodeNumber, ParseError};
