#![forbid(unsafe_code)]
//! Extent-tree flattening.
//!
//! The root node is decoded into the inode at parse time; every deeper
//! node fills one filesystem block of its own and is fetched lazily from
//! the device here. Flattening walks children in stored order and
//! concatenates the leaves, which yields extents in file-block order for
//! well-formed trees.
//!
//! The flattened vector is memoised per inode behind a publish mutex:
//! the lock guards the store, never the device reads, so a concurrent
//! first computation may happen twice but every reader observes one
//! consistent vector.

use gfs_block::{read_exact_at, ByteDevice};
use gfs_error::{GfsError, Result};
use gfs_ondisk::{parse_extent_node, Extent, ExtentEntries, ExtentNode};
use gfs_types::{u64_to_usize, BlockSize, ByteOffset};
use parking_lot::Mutex;
use std::sync::Arc;

/// Maximum tree depth we will follow (the kernel's limit is 5).
const MAX_DEPTH: u16 = 5;

/// Where and how an image's blocks live on the device.
#[derive(Debug, Clone, Copy)]
pub struct ImageGeometry {
    /// Byte offset of the image within the device.
    pub start: u64,
    pub block_size: BlockSize,
}

impl ImageGeometry {
    /// Device byte offset of a filesystem block.
    fn block_offset(&self, block: u64) -> Result<ByteOffset> {
        let byte = block
            .checked_mul(u64::from(self.block_size.get()))
            .and_then(|byte| byte.checked_add(self.start))
            .ok_or_else(|| GfsError::Corruption {
                block,
                detail: "block offset overflows the device address space".to_owned(),
            })?;
        Ok(ByteOffset(byte))
    }
}

/// Flatten an extent tree rooted at `root` into file-block order,
/// reading internal nodes from the device as needed.
pub fn flatten_extents(
    dev: &dyn ByteDevice,
    geometry: &ImageGeometry,
    root: &ExtentNode,
) -> Result<Vec<Extent>> {
    let mut extents = Vec::new();
    collect(dev, geometry, root, root.header.depth, &mut extents)?;
    Ok(extents)
}

fn collect(
    dev: &dyn ByteDevice,
    geometry: &ImageGeometry,
    node: &ExtentNode,
    expected_depth: u16,
    out: &mut Vec<Extent>,
) -> Result<()> {
    if node.header.depth != expected_depth {
        return Err(GfsError::Corruption {
            block: 0,
            detail: format!(
                "extent node depth {} where {} was expected",
                node.header.depth, expected_depth
            ),
        });
    }
    if node.header.depth > MAX_DEPTH {
        return Err(GfsError::Corruption {
            block: 0,
            detail: format!("extent tree depth {} exceeds the format limit", node.header.depth),
        });
    }

    match &node.entries {
        ExtentEntries::Leaf(extents) => {
            out.extend_from_slice(extents);
            Ok(())
        }
        ExtentEntries::Internal(indices) => {
            for index in indices {
                let child = read_child(dev, geometry, index.child_disk_block)?;
                collect(dev, geometry, &child, expected_depth - 1, out)?;
            }
            Ok(())
        }
    }
}

/// Read exactly one filesystem block and decode it as an extent node.
fn read_child(dev: &dyn ByteDevice, geometry: &ImageGeometry, block: u64) -> Result<ExtentNode> {
    let mut buf = vec![0_u8; u64_to_usize(u64::from(geometry.block_size.get()), "block_size")?];
    read_exact_at(dev, &mut buf, geometry.block_offset(block)?)?;
    parse_extent_node(&buf).map_err(GfsError::from)
}

/// Per-inode memoisation of the flattened extent vector.
///
/// The mutex guards only the publishing store. The first caller to
/// finish computing publishes; latecomers discard their own result and
/// take the published one, so all callers observe the same vector.
#[derive(Debug, Default)]
pub struct ExtentCache {
    published: Mutex<Option<Arc<Vec<Extent>>>>,
}

impl ExtentCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached vector, computing it on first use.
    pub fn get_or_flatten(
        &self,
        dev: &dyn ByteDevice,
        geometry: &ImageGeometry,
        root: &ExtentNode,
    ) -> Result<Arc<Vec<Extent>>> {
        if let Some(cached) = self.published.lock().clone() {
            return Ok(cached);
        }

        // Compute without holding the lock; device reads can be slow.
        let computed = Arc::new(flatten_extents(dev, geometry, root)?);

        let mut slot = self.published.lock();
        if let Some(published) = slot.clone() {
            return Ok(published);
        }
        *slot = Some(Arc::clone(&computed));
        Ok(computed)
    }
}
