#![forbid(unsafe_code)]
//! End-to-end tests against a synthetic ext4 image.
//!
//! The builder below assembles a complete 512 KiB image with 1 KiB
//! blocks and metadata checksums enabled: a root directory, a nested
//! directory, a short file, a fragmented two-extent file and a file
//! whose extent tree has one level of indirection. Every checksum is
//! computed with the same primitives the parsers verify with.

use gfs_block::{ByteDevice, MemByteDevice};
use gfs_core::{Ext4Filesystem, FilesystemType, OpenFlags, SeekFrom};
use gfs_csum::{crc16_update, crc32c_update, crc32c_update_u32, CRC32C_SEED};
use gfs_error::GfsError;
use gfs_hash::HashVersion;
use gfs_ondisk::ChecksumPolicy;
use gfs_types::{ByteOffset, ParseError};
use std::sync::atomic::{AtomicUsize, Ordering};

const BLOCK: usize = 1024;
const IMAGE_BLOCKS: usize = 512;
const INODE_SIZE: usize = 256;
const INODE_TABLE_BLOCK: usize = 5;

const UUID: [u8; 16] = [
    0x40, 0x41, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48, 0x49, 0x4A, 0x4B, 0x4C, 0x4D, 0x4E,
    0x4F,
];

const HELLO_TEXT: &[u8] = b"This is a short file\n";
const NESTED_TEXT: &[u8] = b"deeper waters\n";
const TWO_PART_SIZE: usize = 2560;
const DEEP_SIZE: usize = 4096;

fn image_seed() -> u32 {
    crc32c_update(CRC32C_SEED, &UUID)
}

fn pattern(len: usize, seed: u32) -> Vec<u8> {
    (0..len)
        .map(|i| ((i as u32).wrapping_mul(31).wrapping_add(seed) % 251) as u8)
        .collect()
}

// ── Image builder ───────────────────────────────────────────────────────────

fn put_u16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

fn put_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

fn build_superblock() -> [u8; 1024] {
    let mut sb = [0_u8; 1024];
    put_u32(&mut sb, 0x00, 32); // inode count
    put_u32(&mut sb, 0x04, IMAGE_BLOCKS as u32);
    put_u32(&mut sb, 0x0C, 400); // free blocks
    put_u32(&mut sb, 0x10, 20); // free inodes
    put_u32(&mut sb, 0x14, 1); // first data block (1K blocks)
    put_u32(&mut sb, 0x18, 0); // log block size -> 1024
    put_u32(&mut sb, 0x1C, 0); // log cluster size
    put_u32(&mut sb, 0x20, 8192); // blocks per group
    put_u32(&mut sb, 0x24, 8192); // clusters per group
    put_u32(&mut sb, 0x28, 32); // inodes per group
    put_u32(&mut sb, 0x2C, 1_700_000_001); // mount time
    put_u32(&mut sb, 0x30, 1_700_000_002); // write time
    put_u16(&mut sb, 0x38, 0xEF53);
    put_u16(&mut sb, 0x3A, 1); // cleanly unmounted
    put_u16(&mut sb, 0x3C, 1); // errors: continue
    put_u32(&mut sb, 0x4C, 1); // dynamic revision
    put_u32(&mut sb, 0x54, 11); // first non-reserved inode
    put_u16(&mut sb, 0x58, INODE_SIZE as u16);
    put_u32(&mut sb, 0x60, 0x0002 | 0x0040); // filetype | extents
    put_u32(&mut sb, 0x64, 0x0400); // metadata_csum
    sb[0x68..0x78].copy_from_slice(&UUID);
    sb[0x78..0x83].copy_from_slice(b"glass-tests");
    sb[0xFC] = 1; // default hash version: half-md4
    sb[0xFD] = 1; // no journal backup
    put_u32(&mut sb, 0x108, 1_700_000_000); // mkfs time
    sb[0x175] = 1; // checksum type: crc32c

    let checksum = crc32c_update(CRC32C_SEED, &sb[..0x3FC]);
    put_u32(&mut sb, 0x3FC, checksum);
    sb
}

fn build_group_descriptor() -> [u8; 32] {
    let mut gd = [0_u8; 32];
    put_u32(&mut gd, 0x00, 3); // block bitmap
    put_u32(&mut gd, 0x04, 4); // inode bitmap
    put_u32(&mut gd, 0x08, INODE_TABLE_BLOCK as u32);
    put_u16(&mut gd, 0x0C, 400); // free blocks
    put_u16(&mut gd, 0x0E, 20); // free inodes
    put_u16(&mut gd, 0x10, 2); // used directories

    // metadata_csum: low 16 bits of the seeded crc32c chain.
    let mut state = crc32c_update_u32(image_seed(), 0);
    state = crc32c_update(state, &gd[..0x1E]);
    state = crc32c_update(state, &[0, 0]);
    put_u16(&mut gd, 0x1E, (state & 0xFFFF) as u16);
    gd
}

/// Write the 12-byte extent node header into an i_block area or block.
fn extent_header(buf: &mut [u8], entries: u16, max_entries: u16, depth: u16) {
    put_u16(buf, 0, 0xF30A);
    put_u16(buf, 2, entries);
    put_u16(buf, 4, max_entries);
    put_u16(buf, 6, depth);
}

fn extent_leaf(buf: &mut [u8], slot: usize, file_block: u32, len: u16, disk: u64) {
    let base = 12 + slot * 12;
    put_u32(buf, base, file_block);
    put_u16(buf, base + 4, len);
    put_u16(buf, base + 6, ((disk >> 32) & 0xFFFF) as u16);
    put_u32(buf, base + 8, (disk & 0xFFFF_FFFF) as u32);
}

fn extent_index(buf: &mut [u8], slot: usize, file_block: u32, child: u64) {
    let base = 12 + slot * 12;
    put_u32(buf, base, file_block);
    put_u32(buf, base + 4, (child & 0xFFFF_FFFF) as u32);
    put_u16(buf, base + 8, ((child >> 32) & 0xFFFF) as u16);
}

struct InodeSpec {
    number: u32,
    mode: u16,
    size: u64,
    links: u16,
    mtime: u32,
    block_area: [u8; 60],
}

fn write_inode(image: &mut [u8], spec: &InodeSpec) {
    let offset = INODE_TABLE_BLOCK * BLOCK + (spec.number as usize - 1) * INODE_SIZE;
    let raw = &mut image[offset..offset + INODE_SIZE];

    put_u16(raw, 0x00, spec.mode);
    put_u16(raw, 0x02, 1000); // uid
    put_u32(raw, 0x04, (spec.size & 0xFFFF_FFFF) as u32);
    put_u32(raw, 0x08, spec.mtime); // atime
    put_u32(raw, 0x0C, spec.mtime); // ctime
    put_u32(raw, 0x10, spec.mtime); // mtime
    put_u16(raw, 0x18, 1000); // gid
    put_u16(raw, 0x1A, spec.links);
    put_u32(raw, 0x1C, (spec.size.div_ceil(512)) as u32); // 512-byte sectors
    put_u32(raw, 0x20, 0x0008_0000); // extents flag
    raw[0x28..0x64].copy_from_slice(&spec.block_area);
    put_u32(raw, 0x64, 7_000 + spec.number); // generation
    put_u32(raw, 0x6C, (spec.size >> 32) as u32);
    put_u16(raw, 0x80, 32); // extra inode size
    put_u32(raw, 0x90, spec.mtime - 100); // crtime
    put_u32(raw, 0x94, 250_000_000 << 2); // crtime nanoseconds

    // Per-inode checksum: seed folded with the number, then the
    // generation, then the record with both checksum slots zeroed.
    let mut state = crc32c_update_u32(image_seed(), spec.number);
    state = crc32c_update_u32(state, 7_000 + spec.number);
    state = crc32c_update(state, &raw[..0x7C]);
    state = crc32c_update(state, &[0, 0]);
    state = crc32c_update(state, &raw[0x7E..0x82]);
    state = crc32c_update(state, &[0, 0]);
    state = crc32c_update(state, &raw[0x84..]);
    put_u16(raw, 0x7C, (state & 0xFFFF) as u16);
    put_u16(raw, 0x82, ((state >> 16) & 0xFFFF) as u16);
}

struct DirSpec<'a> {
    entries: &'a [(u32, u8, &'a [u8])],
}

/// Lay a directory body into one block: minimal records, the last live
/// record stretched so the htree-style checksum tail lands in the final
/// 12 bytes of the block.
fn build_dir_block(spec: &DirSpec<'_>) -> [u8; BLOCK] {
    let mut block = [0_u8; BLOCK];
    let mut pos = 0_usize;
    for (index, (inode, kind, name)) in spec.entries.iter().enumerate() {
        let minimal = (8 + name.len() + 3) & !3;
        let record_length = if index == spec.entries.len() - 1 {
            BLOCK - 12 - pos
        } else {
            minimal
        };
        put_u32(&mut block, pos, *inode);
        put_u16(&mut block, pos + 4, record_length as u16);
        block[pos + 6] = name.len() as u8;
        block[pos + 7] = *kind;
        block[pos + 8..pos + 8 + name.len()].copy_from_slice(name);
        pos += record_length;
    }

    // Checksum tail: inode 0, record length 12, file type 0xDE.
    put_u16(&mut block, pos + 4, 12);
    block[pos + 7] = 0xDE;
    put_u32(&mut block, pos + 8, 0x5EED_C0DE);
    block
}

fn leaf_root(extents: &[(u32, u16, u64)]) -> [u8; 60] {
    let mut area = [0_u8; 60];
    extent_header(&mut area, extents.len() as u16, 4, 0);
    for (slot, (fb, len, disk)) in extents.iter().enumerate() {
        extent_leaf(&mut area, slot, *fb, *len, *disk);
    }
    area
}

/// Build the whole image. Block map:
///
/// 0 boot · 1 superblock · 2 gdt · 3/4 bitmaps · 5-12 inode table ·
/// 13 root dir · 14 hello.txt · 15 subdir · 16 nested.txt ·
/// 17-18 + 20 two-part.dat · 21 deep.dat index leaf · 22-25 deep.dat data
fn build_image() -> Vec<u8> {
    let mut image = vec![0_u8; IMAGE_BLOCKS * BLOCK];

    image[BLOCK..2 * BLOCK].copy_from_slice(&build_superblock());
    image[2 * BLOCK..2 * BLOCK + 32].copy_from_slice(&build_group_descriptor());

    // Root directory (inode 2) at block 13.
    let root_dir = build_dir_block(&DirSpec {
        entries: &[
            (2, 2, b"."),
            (2, 2, b".."),
            (11, 1, b"hello.txt"),
            (12, 2, b"subdir"),
            (13, 1, b"two-part.dat"),
            (14, 1, b"deep.dat"),
        ],
    });
    image[13 * BLOCK..14 * BLOCK].copy_from_slice(&root_dir);

    // hello.txt (inode 11) at block 14.
    image[14 * BLOCK..14 * BLOCK + HELLO_TEXT.len()].copy_from_slice(HELLO_TEXT);

    // subdir (inode 12) at block 15.
    let sub_dir = build_dir_block(&DirSpec {
        entries: &[(12, 2, b"."), (2, 2, b".."), (15, 1, b"nested.txt")],
    });
    image[15 * BLOCK..16 * BLOCK].copy_from_slice(&sub_dir);

    // nested.txt (inode 15) at block 16.
    image[16 * BLOCK..16 * BLOCK + NESTED_TEXT.len()].copy_from_slice(NESTED_TEXT);

    // two-part.dat (inode 13): blocks 17-18 then 20, 2560 bytes total.
    let two_part = pattern(TWO_PART_SIZE, 3);
    image[17 * BLOCK..17 * BLOCK + 2 * BLOCK].copy_from_slice(&two_part[..2 * BLOCK]);
    image[20 * BLOCK..20 * BLOCK + (TWO_PART_SIZE - 2 * BLOCK)]
        .copy_from_slice(&two_part[2 * BLOCK..]);

    // deep.dat (inode 14): an index root pointing at a leaf node in
    // block 21, whose two extents cover blocks 22-23 and 24-25.
    let mut leaf_block = [0_u8; BLOCK];
    extent_header(&mut leaf_block, 2, 84, 0);
    extent_leaf(&mut leaf_block, 0, 0, 2, 22);
    extent_leaf(&mut leaf_block, 1, 2, 2, 24);
    image[21 * BLOCK..22 * BLOCK].copy_from_slice(&leaf_block);
    let deep = pattern(DEEP_SIZE, 9);
    image[22 * BLOCK..22 * BLOCK + DEEP_SIZE].copy_from_slice(&deep);

    // Inode table.
    write_inode(
        &mut image,
        &InodeSpec {
            number: 2,
            mode: 0o040_755,
            size: BLOCK as u64,
            links: 3,
            mtime: 1_700_000_002,
            block_area: leaf_root(&[(0, 1, 13)]),
        },
    );
    write_inode(
        &mut image,
        &InodeSpec {
            number: 11,
            mode: 0o100_644,
            size: HELLO_TEXT.len() as u64,
            links: 1,
            mtime: 1_700_000_011,
            block_area: leaf_root(&[(0, 1, 14)]),
        },
    );
    write_inode(
        &mut image,
        &InodeSpec {
            number: 12,
            mode: 0o040_755,
            size: BLOCK as u64,
            links: 2,
            mtime: 1_700_000_012,
            block_area: leaf_root(&[(0, 1, 15)]),
        },
    );
    write_inode(
        &mut image,
        &InodeSpec {
            number: 13,
            mode: 0o100_644,
            size: TWO_PART_SIZE as u64,
            links: 1,
            mtime: 1_700_000_013,
            block_area: leaf_root(&[(0, 2, 17), (2, 1, 20)]),
        },
    );
    let mut deep_root = [0_u8; 60];
    extent_header(&mut deep_root, 1, 4, 1);
    extent_index(&mut deep_root, 0, 0, 21);
    write_inode(
        &mut image,
        &InodeSpec {
            number: 14,
            mode: 0o100_644,
            size: DEEP_SIZE as u64,
            links: 1,
            mtime: 1_700_000_014,
            block_area: deep_root,
        },
    );
    write_inode(
        &mut image,
        &InodeSpec {
            number: 15,
            mode: 0o100_644,
            size: NESTED_TEXT.len() as u64,
            links: 1,
            mtime: 1_700_000_015,
            block_area: leaf_root(&[(0, 1, 16)]),
        },
    );

    image
}

/// Device wrapper counting every read, for read-amplification checks.
struct CountingDevice {
    inner: MemByteDevice,
    reads: AtomicUsize,
}

impl CountingDevice {
    fn new(bytes: Vec<u8>) -> Self {
        Self {
            inner: MemByteDevice::new(bytes),
            reads: AtomicUsize::new(0),
        }
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl ByteDevice for CountingDevice {
    fn read_at(&self, buf: &mut [u8], offset: ByteOffset) -> gfs_error::Result<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_at(buf, offset)
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[test]
fn open_validates_parameters() {
    let device = MemByteDevice::new(build_image());
    let size = device.size();

    let err = Ext4Filesystem::open(&device, size, 0, 4096).unwrap_err();
    assert!(matches!(err, GfsError::UnsupportedSectorSize(4096)));

    let err = Ext4Filesystem::open(&device, 100, 0, 0).unwrap_err();
    assert!(matches!(err, GfsError::ImageTooSmall(100)));

    // 512 and 0 are both accepted.
    Ext4Filesystem::open(&device, size, 0, 512).expect("sector size 512");
    let fs = Ext4Filesystem::open(&device, size, 0, 0).expect("open");
    assert_eq!(fs.filesystem_type(), FilesystemType::Ext4);
}

#[test]
fn open_reads_superblock_and_descriptors() {
    let device = MemByteDevice::new(build_image());
    let fs = Ext4Filesystem::open(&device, device.size(), 0, 0).expect("open");

    let sb = fs.superblock();
    assert_eq!(sb.block_size.get(), 1024);
    assert_eq!(sb.inode_size, 256);
    assert_eq!(sb.volume_label, "glass-tests");
    assert_eq!(sb.group_count(), 1);
    assert!(sb.has_metadata_checksums());

    let descriptors = fs.group_descriptors();
    assert_eq!(descriptors.len(), 1);
    assert_eq!(descriptors[0].inode_table_location, 5);
    assert_eq!(descriptors[0].block_bitmap_location, 3);
}

#[test]
fn corrupt_group_descriptor_fails_open() {
    let mut image = build_image();
    image[2 * BLOCK] ^= 0xFF;
    let device = MemByteDevice::new(image);
    let err = Ext4Filesystem::open(&device, device.size(), 0, 0).unwrap_err();
    assert!(matches!(
        err,
        GfsError::Parse(ParseError::ChecksumMismatch {
            what: "group descriptor",
            ..
        })
    ));
}

#[test]
fn read_dir_lists_root() {
    let device = MemByteDevice::new(build_image());
    let fs = Ext4Filesystem::open(&device, device.size(), 0, 0).expect("open");

    let entries = fs.read_dir("/").expect("read_dir");
    assert_eq!(entries.len(), 4);

    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["hello.txt", "subdir", "two-part.dat", "deep.dat"]);

    let hello = &entries[0];
    assert_eq!(hello.size, HELLO_TEXT.len() as u64);
    assert_eq!(hello.mode, 0o100_644);
    assert!(!hello.is_dir);
    assert_eq!(hello.modified_time.seconds, 1_700_000_011);

    let subdir = &entries[1];
    assert!(subdir.is_dir);
    assert_eq!(subdir.mode, 0o040_755);

    assert_eq!(entries[2].size, TWO_PART_SIZE as u64);
    assert_eq!(entries[3].size, DEEP_SIZE as u64);
}

#[test]
fn read_dir_descends_directories() {
    let device = MemByteDevice::new(build_image());
    let fs = Ext4Filesystem::open(&device, device.size(), 0, 0).expect("open");

    let entries = fs.read_dir("/subdir").expect("read_dir");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].name, "nested.txt");
    assert_eq!(entries[0].size, NESTED_TEXT.len() as u64);

    // Redundant slashes are ignored.
    let entries = fs.read_dir("//subdir//").expect("read_dir");
    assert_eq!(entries.len(), 1);
}

#[test]
fn open_file_reads_short_file() {
    let device = MemByteDevice::new(build_image());
    let fs = Ext4Filesystem::open(&device, device.size(), 0, 0).expect("open");

    let mut file = fs
        .open_file("/hello.txt", OpenFlags::READ_ONLY)
        .expect("open_file");
    assert_eq!(file.size(), HELLO_TEXT.len() as u64);

    let mut contents = vec![0_u8; HELLO_TEXT.len()];
    let n = file.read(&mut contents).expect("read");
    assert_eq!(n, HELLO_TEXT.len());
    assert_eq!(contents, HELLO_TEXT);

    // Cursor is at the end now.
    let err = file.read(&mut contents).unwrap_err();
    assert!(matches!(err, GfsError::EndOfFile));
    file.close().expect("close");
}

#[test]
fn nested_path_resolves() {
    let device = MemByteDevice::new(build_image());
    let fs = Ext4Filesystem::open(&device, device.size(), 0, 0).expect("open");

    let mut file = fs
        .open_file("/subdir/nested.txt", OpenFlags::READ_ONLY)
        .expect("open_file");
    let mut contents = vec![0_u8; NESTED_TEXT.len()];
    file.read(&mut contents).expect("read");
    assert_eq!(contents, NESTED_TEXT);

    // Empty segments collapse.
    fs.open_file("//subdir//nested.txt", OpenFlags::READ_ONLY)
        .expect("open_file with doubled slashes");
}

#[test]
fn fragmented_file_reads_one_extent_at_a_time() {
    let device = CountingDevice::new(build_image());
    let fs = Ext4Filesystem::open(&device, device.size(), 0, 0).expect("open");

    let mut file = fs
        .open_file("/two-part.dat", OpenFlags::READ_ONLY)
        .expect("open_file");

    let before = device.reads();
    let mut contents = vec![0_u8; TWO_PART_SIZE];
    file.read(&mut contents).expect("read");
    // The root is a depth-0 in-inode node: a full-file read costs
    // exactly one device read per extent.
    assert_eq!(device.reads() - before, 2);
    assert_eq!(contents, pattern(TWO_PART_SIZE, 3));
}

#[test]
fn deep_extent_tree_flattens_lazily() {
    let device = CountingDevice::new(build_image());
    let fs = Ext4Filesystem::open(&device, device.size(), 0, 0).expect("open");

    let mut file = fs
        .open_file("/deep.dat", OpenFlags::READ_ONLY)
        .expect("open_file");

    let before = device.reads();
    let mut contents = vec![0_u8; DEEP_SIZE];
    file.read(&mut contents).expect("read");
    // One read for the indirect leaf node, one per data extent.
    assert_eq!(device.reads() - before, 3);
    assert_eq!(contents, pattern(DEEP_SIZE, 9));

    // The flattened tree is memoised: a re-read skips the node fetch.
    file.seek(SeekFrom::Start(0)).expect("rewind");
    let before = device.reads();
    file.read(&mut contents).expect("re-read");
    assert_eq!(device.reads() - before, 2);
}

#[test]
fn chunked_reads_match_whole_file() {
    let device = MemByteDevice::new(build_image());
    let fs = Ext4Filesystem::open(&device, device.size(), 0, 0).expect("open");

    let mut file = fs
        .open_file("/two-part.dat", OpenFlags::READ_ONLY)
        .expect("open_file");

    let mut assembled = Vec::new();
    let mut chunk = [0_u8; 600];
    loop {
        match file.read(&mut chunk) {
            Ok(n) => assembled.extend_from_slice(&chunk[..n]),
            Err(GfsError::EndOfFile) => break,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(assembled, pattern(TWO_PART_SIZE, 3));
}

#[test]
fn seek_semantics() {
    let device = MemByteDevice::new(build_image());
    let fs = Ext4Filesystem::open(&device, device.size(), 0, 0).expect("open");

    let mut file = fs
        .open_file("/hello.txt", OpenFlags::READ_ONLY)
        .expect("open_file");

    // From the end.
    let pos = file.seek(SeekFrom::End(-5)).expect("seek");
    assert_eq!(pos, HELLO_TEXT.len() as u64 - 5);
    let mut tail = [0_u8; 5];
    file.read(&mut tail).expect("read");
    assert_eq!(&tail, &HELLO_TEXT[HELLO_TEXT.len() - 5..]);

    // Relative.
    file.seek(SeekFrom::Start(8)).expect("seek");
    file.seek(SeekFrom::Current(4)).expect("seek");
    let mut word = [0_u8; 5];
    file.read(&mut word).expect("read");
    assert_eq!(&word, &HELLO_TEXT[12..17]);

    // Before zero fails and leaves the cursor alone.
    let at = file.position();
    let err = file.seek(SeekFrom::Current(-1000)).unwrap_err();
    assert!(matches!(err, GfsError::InvalidSeek(_)));
    assert_eq!(file.position(), at);

    // Past the end is allowed; the next read reports end of file.
    file.seek(SeekFrom::End(100)).expect("seek");
    let err = file.read(&mut word).unwrap_err();
    assert!(matches!(err, GfsError::EndOfFile));
}

#[test]
fn open_errors_by_kind() {
    let device = MemByteDevice::new(build_image());
    let fs = Ext4Filesystem::open(&device, device.size(), 0, 0).expect("open");

    let err = fs.open_file("/", OpenFlags::READ_ONLY).unwrap_err();
    assert!(matches!(err, GfsError::IsADirectory(_)));

    let err = fs.open_file("/subdir", OpenFlags::READ_ONLY).unwrap_err();
    assert!(matches!(err, GfsError::IsADirectory(_)));

    let err = fs.open_file("/missing.txt", OpenFlags::READ_ONLY).unwrap_err();
    assert!(matches!(err, GfsError::NotFound(name) if name == "missing.txt"));

    let err = fs
        .open_file("/hello.txt", OpenFlags::READ_WRITE)
        .unwrap_err();
    assert!(matches!(err, GfsError::WriteNotSupported));

    let err = fs
        .open_file("/new.txt", OpenFlags::READ_WRITE | OpenFlags::CREATE)
        .unwrap_err();
    assert!(matches!(err, GfsError::WriteNotSupported));

    let err = fs
        .open_file("/hello.txt", OpenFlags::APPEND)
        .unwrap_err();
    assert!(matches!(err, GfsError::WriteNotSupported));
}

#[test]
fn traversal_errors_name_the_segment() {
    let device = MemByteDevice::new(build_image());
    let fs = Ext4Filesystem::open(&device, device.size(), 0, 0).expect("open");

    let err = fs.read_dir("/hello.txt").unwrap_err();
    assert!(matches!(err, GfsError::NotADirectory(_)));

    let err = fs
        .open_file("/hello.txt/inner.txt", OpenFlags::READ_ONLY)
        .unwrap_err();
    assert!(matches!(err, GfsError::NotADirectory(name) if name == "inner.txt"));

    let err = fs.read_dir("/subdir/ghost/x").unwrap_err();
    assert!(matches!(err, GfsError::NotFound(name) if name == "ghost"));
}

#[test]
fn inode_checksum_policy_strict_vs_tolerant() {
    let mut image = build_image();
    // Flip an atime byte in hello.txt's inode record (number 11).
    let inode_offset = INODE_TABLE_BLOCK * BLOCK + 10 * INODE_SIZE;
    image[inode_offset + 0x08] ^= 0x01;
    let device = MemByteDevice::new(image);

    // Tolerant (the default): the mismatch is a warning only.
    let fs = Ext4Filesystem::open(&device, device.size(), 0, 0).expect("open");
    let mut file = fs
        .open_file("/hello.txt", OpenFlags::READ_ONLY)
        .expect("tolerant open_file");
    let mut contents = vec![0_u8; HELLO_TEXT.len()];
    file.read(&mut contents).expect("read");
    assert_eq!(contents, HELLO_TEXT);

    // Strict: the same open fails.
    let fs = Ext4Filesystem::open_with_policy(
        &device,
        device.size(),
        0,
        0,
        ChecksumPolicy::Strict,
    )
    .expect("open");
    let err = fs.open_file("/hello.txt", OpenFlags::READ_ONLY).unwrap_err();
    assert!(matches!(
        err,
        GfsError::Parse(ParseError::ChecksumMismatch { what: "inode", .. })
    ));
}

#[test]
fn image_start_offset_translates_every_address() {
    const START: usize = 7 * 512; // deliberately not block-aligned
    let inner = build_image();
    let mut shifted = vec![0xA5_u8; START];
    shifted.extend_from_slice(&inner);
    let device = MemByteDevice::new(shifted);

    let fs = Ext4Filesystem::open(&device, inner.len() as u64, START as u64, 0).expect("open");
    let entries = fs.read_dir("/").expect("read_dir");
    assert_eq!(entries.len(), 4);

    let mut file = fs
        .open_file("/deep.dat", OpenFlags::READ_ONLY)
        .expect("open_file");
    let mut contents = vec![0_u8; DEEP_SIZE];
    file.read(&mut contents).expect("read");
    assert_eq!(contents, pattern(DEEP_SIZE, 9));
}

#[test]
fn extent_maps_are_ordered_and_cover_the_file() {
    let device = MemByteDevice::new(build_image());
    let fs = Ext4Filesystem::open(&device, device.size(), 0, 0).expect("open");

    for (path, size) in [
        ("/hello.txt", HELLO_TEXT.len()),
        ("/two-part.dat", TWO_PART_SIZE),
        ("/deep.dat", DEEP_SIZE),
    ] {
        let handle = fs.resolve_path(path).expect("resolve");
        let extents = fs.inode_extents(&handle).expect("extents");

        let file_blocks: Vec<u32> = extents.iter().map(|e| e.file_block).collect();
        assert!(
            file_blocks.windows(2).all(|w| w[0] <= w[1]),
            "{path}: extents out of order"
        );

        let total_blocks: u64 = extents.iter().map(|e| u64::from(e.length)).sum();
        assert_eq!(
            total_blocks,
            (size as u64).div_ceil(BLOCK as u64),
            "{path}: extent lengths do not cover the file"
        );
    }
}

#[test]
fn directory_hash_follows_the_superblock() {
    let device = MemByteDevice::new(build_image());
    let fs = Ext4Filesystem::open(&device, device.size(), 0, 0).expect("open");

    // The image stores hash version 1 (half-MD4) with a zero seed, so
    // names hash with the default IV.
    assert_eq!(fs.directory_hash_version(), Some(HashVersion::HalfMd4));
    assert_eq!(fs.hash_dir_name(b"foo").expect("hash"), (0x74C6_57AC, 0x85A8_D812));

    // The unsigned-hash miscellaneous flag shifts the flavour.
    let mut image = build_image();
    {
        let sb = &mut image[BLOCK..2 * BLOCK];
        put_u32(sb, 0x160, 0x2);
        let checksum = crc32c_update(CRC32C_SEED, &sb[..0x3FC]);
        put_u32(sb, 0x3FC, checksum);
    }
    let device = MemByteDevice::new(image);
    let fs = Ext4Filesystem::open(&device, device.size(), 0, 0).expect("open");
    assert_eq!(
        fs.directory_hash_version(),
        Some(HashVersion::HalfMd4Unsigned)
    );
}

#[test]
fn legacy_gdt_checksum_image_opens() {
    // Variant image: gdt_csum instead of metadata_csum, CRC-16
    // descriptors, no superblock checksum.
    let mut image = build_image();
    {
        let sb = &mut image[BLOCK..2 * BLOCK];
        put_u32(sb, 0x64, 0x0010); // ro_compat: gdt_csum only
        put_u32(sb, 0x3FC, 0); // no stored checksum
    }
    {
        let gd = &mut image[2 * BLOCK..2 * BLOCK + 32];
        let mut state = crc16_update(!0, &UUID);
        state = crc16_update(state, &0_u32.to_le_bytes());
        let prefix = gd[..0x1E].to_vec();
        state = crc16_update(state, &prefix);
        put_u16(gd, 0x1E, state);
    }
    // Without metadata_csum the inode checksums are not consulted, so
    // the stale stored values are harmless.
    let device = MemByteDevice::new(image);
    let fs = Ext4Filesystem::open(&device, device.size(), 0, 0).expect("open");
    let entries = fs.read_dir("/").expect("read_dir");
    assert_eq!(entries.len(), 4);
}
