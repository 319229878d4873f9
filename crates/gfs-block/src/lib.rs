#![forbid(unsafe_code)]
//! Byte device abstraction.
//!
//! The reader consumes a random-access device through `ByteDevice`:
//! positioned reads plus a total size. Offsets are zero-indexed from the
//! device, not from the image start; the image layer applies its own
//! start offset before calling down here.

use gfs_error::{GfsError, Result};
use gfs_types::ByteOffset;
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

/// Random-access reader (pread semantics).
pub trait ByteDevice: Send + Sync {
    /// Read up to `buf.len()` bytes at `offset`, returning the number of
    /// bytes read. A short count means the device ended.
    fn read_at(&self, buf: &mut [u8], offset: ByteOffset) -> Result<usize>;

    /// Total device length in bytes.
    fn size(&self) -> u64;
}

/// Read exactly `buf.len()` bytes or fail `DeviceReadShort`.
pub fn read_exact_at(dev: &dyn ByteDevice, buf: &mut [u8], offset: ByteOffset) -> Result<()> {
    let got = dev.read_at(buf, offset)?;
    if got < buf.len() {
        return Err(GfsError::DeviceReadShort {
            offset: offset.0,
            wanted: buf.len(),
            got,
        });
    }
    Ok(())
}

/// File-backed device using `pread`-style positioned I/O, which is
/// thread-safe and keeps no shared seek position.
#[derive(Debug, Clone)]
pub struct FileByteDevice {
    file: Arc<File>,
    len: u64,
}

impl FileByteDevice {
    /// Open a file read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Arc::new(file),
            len,
        })
    }
}

impl ByteDevice for FileByteDevice {
    fn read_at(&self, buf: &mut [u8], offset: ByteOffset) -> Result<usize> {
        let mut read = 0_usize;
        while read < buf.len() {
            let pos = offset
                .checked_add(read as u64)
                .ok_or_else(|| GfsError::Io(io::Error::from(io::ErrorKind::InvalidInput)))?;
            match self.file.read_at(&mut buf[read..], pos.0) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(GfsError::Io(err)),
            }
        }
        Ok(read)
    }

    fn size(&self) -> u64 {
        self.len
    }
}

/// In-memory device, used by tests and synthetic images.
#[derive(Debug, Clone, Default)]
pub struct MemByteDevice {
    bytes: Arc<Vec<u8>>,
}

impl MemByteDevice {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
        }
    }
}

impl ByteDevice for MemByteDevice {
    fn read_at(&self, buf: &mut [u8], offset: ByteOffset) -> Result<usize> {
        let Ok(start) = usize::try_from(offset.0) else {
            return Ok(0);
        };
        if start >= self.bytes.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.bytes.len() - start);
        buf[..n].copy_from_slice(&self.bytes[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}
