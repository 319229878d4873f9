//! The open-file handle.
//!
//! Reads map the requested byte range onto the inode's flattened extents
//! and issue one device read per overlapping extent. The cursor may seek
//! anywhere at or past zero; a read with the cursor at or past the file
//! size reports end of file.

use crate::InodeHandle;
use gfs_block::{read_exact_at, ByteDevice};
use gfs_error::{GfsError, Result};
use gfs_extent::ImageGeometry;
use gfs_types::{u64_to_usize, ByteOffset};
use std::io::SeekFrom;

pub struct File<'d> {
    device: &'d dyn ByteDevice,
    geometry: ImageGeometry,
    handle: InodeHandle,
    offset: u64,
}

impl<'d> std::fmt::Debug for File<'d> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("geometry", &self.geometry)
            .field("handle", &self.handle)
            .field("offset", &self.offset)
            .finish()
    }
}

impl<'d> File<'d> {
    pub(crate) fn new(device: &'d dyn ByteDevice, geometry: ImageGeometry, handle: InodeHandle) -> Self {
        Self {
            device,
            geometry,
            handle,
            offset: 0,
        }
    }

    /// Size of the file in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.handle.inode.size
    }

    /// Current cursor position.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.offset
    }

    /// Read up to `buf.len()` bytes at the cursor, advancing it.
    /// Reading at or past the end of the file fails with `EndOfFile`.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let size = self.handle.inode.size;
        if self.offset >= size {
            return Err(GfsError::EndOfFile);
        }

        let want = u64_to_usize(
            (size - self.offset).min(buf.len() as u64),
            "read_length",
        )?;
        if want == 0 {
            return Ok(0);
        }

        let extents = self.handle.flattened(self.device, &self.geometry)?;
        let block_size = u64::from(self.geometry.block_size.get());
        let read_start = self.offset;
        let read_end = self.offset + want as u64;

        let mut covered = 0_usize;
        for extent in extents.iter() {
            let extent_start = u64::from(extent.file_block) * block_size;
            let extent_end = extent_start + u64::from(extent.length) * block_size;
            if extent_end <= read_start || extent_start >= read_end {
                continue;
            }

            let lo = read_start.max(extent_start);
            let hi = read_end.min(extent_end);
            let device_offset = extent
                .disk_block
                .checked_mul(block_size)
                .and_then(|byte| byte.checked_add(lo - extent_start))
                .and_then(|byte| byte.checked_add(self.geometry.start))
                .ok_or_else(|| GfsError::Corruption {
                    block: extent.disk_block,
                    detail: "extent offset overflows the device address space".to_owned(),
                })?;

            let dst = u64_to_usize(lo - read_start, "read_span")?;
            let len = u64_to_usize(hi - lo, "read_span")?;
            read_exact_at(
                self.device,
                &mut buf[dst..dst + len],
                ByteOffset(device_offset),
            )?;
            covered += len;
        }

        if covered < want {
            return Err(GfsError::Corruption {
                block: 0,
                detail: format!(
                    "inode {}: extents cover {covered} of {want} requested bytes",
                    self.handle.inode.number
                ),
            });
        }

        self.offset = read_end;
        Ok(want)
    }

    /// Move the cursor. Targets before zero fail `InvalidSeek`; targets
    /// past the end are allowed (a subsequent read reports end of file).
    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => i64::try_from(offset)
                .map_err(|_| GfsError::InvalidSeek(i64::MAX))?,
            SeekFrom::End(delta) => i64::try_from(self.handle.inode.size)
                .map_err(|_| GfsError::InvalidSeek(delta))?
                .checked_add(delta)
                .ok_or(GfsError::InvalidSeek(delta))?,
            SeekFrom::Current(delta) => i64::try_from(self.offset)
                .map_err(|_| GfsError::InvalidSeek(delta))?
                .checked_add(delta)
                .ok_or(GfsError::InvalidSeek(delta))?,
        };

        if target < 0 {
            return Err(GfsError::InvalidSeek(target));
        }
        #[allow(clippy::cast_sign_loss)]
        {
            self.offset = target as u64;
        }
        Ok(self.offset)
    }

    /// Close the handle. Reads never buffer, so this has nothing to
    /// flush; it exists for interface symmetry.
    pub fn close(self) -> Result<()> {
        Ok(())
    }
}
