//! Directory-entry decoding.
//!
//! A directory body is a packed run of variable-length records. When the
//! filetype incompat feature is set, each record carries a one-byte file
//! type after a one-byte name length; otherwise the name length is a
//! 16-bit field and no type byte exists. Free slots have inode 0, and
//! htree directories end each block with a checksum tail whose type byte
//! is the 0xDE tombstone. The advance is always the full record length.

use crate::inode::FileKind;
use crate::superblock::Superblock;
use gfs_types::{read_le_u16, read_le_u32, read_u8, InodeNumber, ParseError};
use serde::{Deserialize, Serialize};

/// File-type byte marking an htree checksum tail pseudo-entry.
pub const DIRENT_TOMBSTONE: u8 = 0xDE;

/// Fixed header bytes before the name.
const HEADER_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub inode: InodeNumber,
    pub record_length: u16,
    /// Present only when the filetype feature records it on disk.
    pub file_kind: Option<FileKind>,
    pub name: Vec<u8>,
}

impl DirEntry {
    /// The name as a lossy UTF-8 string.
    #[must_use]
    pub fn name_str(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }

    #[must_use]
    pub fn is_dot(&self) -> bool {
        self.name == b"."
    }

    #[must_use]
    pub fn is_dot_dot(&self) -> bool {
        self.name == b".."
    }

    /// Re-encode with the minimal record length: header plus name,
    /// rounded up to the 4-byte record alignment.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        #[allow(clippy::cast_possible_truncation)]
        let record_length = ((HEADER_LEN + self.name.len() + 3) & !3) as u16;
        let mut b = vec![0_u8; usize::from(record_length)];
        b[0x00..0x04].copy_from_slice(&self.inode.0.to_le_bytes());
        b[0x04..0x06].copy_from_slice(&record_length.to_le_bytes());
        #[allow(clippy::cast_possible_truncation)]
        if let Some(kind) = self.file_kind {
            b[0x06] = self.name.len() as u8;
            b[0x07] = kind.dirent_code();
        } else {
            b[0x06..0x08].copy_from_slice(&(self.name.len() as u16).to_le_bytes());
        }
        b[HEADER_LEN..HEADER_LEN + self.name.len()].copy_from_slice(&self.name);
        b
    }
}

/// Zero-pad a directory body out to a whole number of blocks.
#[must_use]
pub fn pad_to_block_size(mut body: Vec<u8>, block_size: u32) -> Vec<u8> {
    let block_size = block_size as usize;
    let remainder = body.len() % block_size;
    if remainder != 0 {
        body.resize(body.len() + block_size - remainder, 0);
    }
    body
}

/// Iterator over the records of a directory body.
///
/// Yields every live entry except `.` and `..`; free slots and the htree
/// tombstone are consumed without being yielded. Construction via
/// [`iter_dir_entries`].
pub struct DirEntryIter<'a> {
    bytes: &'a [u8],
    pos: usize,
    filetype: bool,
    include_dots: bool,
    failed: bool,
}

impl<'a> DirEntryIter<'a> {
    fn new(bytes: &'a [u8], sb: &Superblock, include_dots: bool) -> Self {
        Self {
            bytes,
            pos: 0,
            filetype: sb.features.incompat.filetype,
            include_dots,
            failed: false,
        }
    }

    fn step(&mut self) -> Result<Option<DirEntry>, ParseError> {
        while self.pos + HEADER_LEN <= self.bytes.len() {
            let inode = read_le_u32(self.bytes, self.pos)?;
            let record_length = read_le_u16(self.bytes, self.pos + 0x04)?;

            if record_length == 0 {
                if inode == 0 {
                    // Zero padding at the tail of the body.
                    self.pos = self.bytes.len();
                    return Ok(None);
                }
                return Err(ParseError::InvalidField {
                    field: "de_rec_len",
                    reason: "live record with zero length",
                });
            }
            if usize::from(record_length) < HEADER_LEN {
                return Err(ParseError::InvalidField {
                    field: "de_rec_len",
                    reason: "record shorter than its header",
                });
            }
            let record_end = self.pos + usize::from(record_length);
            if record_end > self.bytes.len() {
                return Err(ParseError::InvalidField {
                    field: "de_rec_len",
                    reason: "record extends past the directory body",
                });
            }

            let (name_length, file_kind) = if self.filetype {
                let name_length = usize::from(read_u8(self.bytes, self.pos + 0x06)?);
                let code = read_u8(self.bytes, self.pos + 0x07)?;
                if code == DIRENT_TOMBSTONE {
                    // Htree tail checksum; skip the whole record.
                    self.pos = record_end;
                    continue;
                }
                let kind = FileKind::from_dirent_code(code).ok_or(ParseError::InvalidField {
                    field: "de_file_type",
                    reason: "unknown file-type code",
                })?;
                (name_length, Some(kind))
            } else {
                (
                    usize::from(read_le_u16(self.bytes, self.pos + 0x06)?),
                    None,
                )
            };

            if inode == 0 {
                // Free slot; its record length is still consumed.
                self.pos = record_end;
                continue;
            }

            let name_end = self.pos + HEADER_LEN + name_length;
            if name_end > record_end {
                return Err(ParseError::InvalidField {
                    field: "de_name_len",
                    reason: "name extends past the record",
                });
            }
            let name = self.bytes[self.pos + HEADER_LEN..name_end].to_vec();
            self.pos = record_end;

            let entry = DirEntry {
                inode: InodeNumber(inode),
                record_length,
                file_kind,
                name,
            };
            if !self.include_dots && (entry.is_dot() || entry.is_dot_dot()) {
                continue;
            }
            return Ok(Some(entry));
        }
        Ok(None)
    }
}

impl Iterator for DirEntryIter<'_> {
    type Item = Result<DirEntry, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.step() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// Iterate a directory body, excluding the `.` and `..` entries.
#[must_use]
pub fn iter_dir_entries<'a>(bytes: &'a [u8], sb: &Superblock) -> DirEntryIter<'a> {
    DirEntryIter::new(bytes, sb, false)
}

/// Find the first entry named `name`, including the `.` and `..`
/// entries (path traversal needs them).
pub fn find_dir_entry(
    bytes: &[u8],
    sb: &Superblock,
    name: &[u8],
) -> Result<Option<DirEntry>, ParseError> {
    let mut iter = DirEntryIter::new(bytes, sb, true);
    while let Some(entry) = iter.next().transpose()? {
        if entry.name == name {
            return Ok(Some(entry));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_superblock;
    use gfs_types::{SUPERBLOCK_SIZE, SUPER_MAGIC};

    fn test_sb(filetype: bool) -> Superblock {
        let mut sb = [0_u8; SUPERBLOCK_SIZE];
        sb[0x38..0x3A].copy_from_slice(&SUPER_MAGIC.to_le_bytes());
        sb[0x00..0x04].copy_from_slice(&8192_u32.to_le_bytes());
        sb[0x04..0x08].copy_from_slice(&32768_u32.to_le_bytes());
        sb[0x18..0x1C].copy_from_slice(&0_u32.to_le_bytes()); // 1K blocks
        sb[0x20..0x24].copy_from_slice(&8192_u32.to_le_bytes());
        sb[0x28..0x2C].copy_from_slice(&8192_u32.to_le_bytes());
        sb[0x58..0x5A].copy_from_slice(&256_u16.to_le_bytes());
        let incompat = if filetype { 0x0002_u32 | 0x0040 } else { 0x0040 };
        sb[0x60..0x64].copy_from_slice(&incompat.to_le_bytes());
        parse_superblock(&sb).expect("superblock")
    }

    fn push_entry(body: &mut Vec<u8>, inode: u32, kind: u8, name: &[u8], record_length: u16) {
        let start = body.len();
        body.resize(start + usize::from(record_length), 0);
        body[start..start + 4].copy_from_slice(&inode.to_le_bytes());
        body[start + 4..start + 6].copy_from_slice(&record_length.to_le_bytes());
        #[allow(clippy::cast_possible_truncation)]
        {
            body[start + 6] = name.len() as u8;
        }
        body[start + 7] = kind;
        body[start + 8..start + 8 + name.len()].copy_from_slice(name);
    }

    fn sample_body() -> Vec<u8> {
        let mut body = Vec::new();
        push_entry(&mut body, 2, 2, b".", 12);
        push_entry(&mut body, 2, 2, b"..", 12);
        push_entry(&mut body, 11, 1, b"hello.txt", 20);
        push_entry(&mut body, 0, 0, b"deleted", 16); // free slot
        push_entry(&mut body, 12, 2, b"subdir", 16);
        // Htree tail: inode 0, file type 0xDE, 12-byte record.
        push_entry(&mut body, 0, DIRENT_TOMBSTONE, b"", 12);
        body
    }

    #[test]
    fn listing_skips_dots_free_slots_and_tombstone() {
        let sb = test_sb(true);
        let body = sample_body();
        let entries: Vec<DirEntry> = iter_dir_entries(&body, &sb)
            .collect::<Result<_, _>>()
            .expect("iterate");

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name_str(), "hello.txt");
        assert_eq!(entries[0].inode, InodeNumber(11));
        assert_eq!(entries[0].file_kind, Some(FileKind::Regular));
        assert_eq!(entries[1].name_str(), "subdir");
        assert_eq!(entries[1].file_kind, Some(FileKind::Directory));
    }

    #[test]
    fn record_lengths_cover_the_whole_body() {
        let sb = test_sb(true);
        let body = sample_body();
        let mut iter = DirEntryIter::new(&body, &sb, true);
        let mut consumed = 0_usize;
        while let Some(entry) = iter.next().transpose().expect("iterate") {
            consumed += usize::from(entry.record_length);
        }
        // The iterator consumed the free slot and the tombstone too; the
        // yielded records alone cover the rest.
        assert_eq!(consumed + 16 + 12, body.len());
        assert_eq!(iter.pos, body.len());
    }

    #[test]
    fn find_sees_dot_entries() {
        let sb = test_sb(true);
        let body = sample_body();
        let dot = find_dir_entry(&body, &sb, b".").expect("find").expect("present");
        assert_eq!(dot.inode, InodeNumber(2));

        let hit = find_dir_entry(&body, &sb, b"subdir").expect("find").expect("present");
        assert_eq!(hit.inode, InodeNumber(12));

        assert!(find_dir_entry(&body, &sb, b"missing").expect("find").is_none());
        // The tombstone's empty name is not findable.
        assert!(find_dir_entry(&body, &sb, b"").expect("find").is_none());
    }

    #[test]
    fn without_filetype_feature_name_length_is_wide() {
        let sb = test_sb(false);
        let mut body = Vec::new();
        // name length as u16 at +0x06, no file-type byte.
        let name = b"legacy-name";
        let record_length = 20_u16;
        let start = body.len();
        body.resize(start + usize::from(record_length), 0);
        body[start..start + 4].copy_from_slice(&31_u32.to_le_bytes());
        body[start + 4..start + 6].copy_from_slice(&record_length.to_le_bytes());
        #[allow(clippy::cast_possible_truncation)]
        body[start + 6..start + 8].copy_from_slice(&(name.len() as u16).to_le_bytes());
        body[start + 8..start + 8 + name.len()].copy_from_slice(name);

        let entries: Vec<DirEntry> = iter_dir_entries(&body, &sb)
            .collect::<Result<_, _>>()
            .expect("iterate");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name_str(), "legacy-name");
        assert_eq!(entries[0].file_kind, None);
    }

    #[test]
    fn trailing_zero_padding_ends_iteration() {
        let sb = test_sb(true);
        let mut body = sample_body();
        body = pad_to_block_size(body, 1024);
        assert_eq!(body.len(), 1024);

        let entries: Vec<DirEntry> = iter_dir_entries(&body, &sb)
            .collect::<Result<_, _>>()
            .expect("iterate");
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn corrupt_records_fail() {
        let sb = test_sb(true);

        // Record length past the buffer.
        let mut body = Vec::new();
        push_entry(&mut body, 11, 1, b"x", 12);
        body[4..6].copy_from_slice(&200_u16.to_le_bytes());
        let err = iter_dir_entries(&body, &sb).next().unwrap().unwrap_err();
        assert!(matches!(err, ParseError::InvalidField { field: "de_rec_len", .. }));

        // Record shorter than its header.
        let mut body = Vec::new();
        push_entry(&mut body, 11, 1, b"x", 12);
        body[4..6].copy_from_slice(&4_u16.to_le_bytes());
        let err = iter_dir_entries(&body, &sb).next().unwrap().unwrap_err();
        assert!(matches!(err, ParseError::InvalidField { field: "de_rec_len", .. }));

        // Illegal file-type code (not the tombstone).
        let mut body = Vec::new();
        push_entry(&mut body, 11, 9, b"x", 12);
        let err = iter_dir_entries(&body, &sb).next().unwrap().unwrap_err();
        assert!(matches!(err, ParseError::InvalidField { field: "de_file_type", .. }));

        // Name spilling past the record.
        let mut body = Vec::new();
        push_entry(&mut body, 11, 1, b"x", 12);
        body[6] = 10;
        let err = iter_dir_entries(&body, &sb).next().unwrap().unwrap_err();
        assert!(matches!(err, ParseError::InvalidField { field: "de_name_len", .. }));
    }

    #[test]
    fn encode_aligns_records_to_four_bytes() {
        let entry = DirEntry {
            inode: InodeNumber(11),
            record_length: 0,
            file_kind: Some(FileKind::Regular),
            name: b"hello.txt".to_vec(),
        };
        let bytes = entry.to_bytes();
        assert_eq!(bytes.len(), 20); // 8 + 9 rounded up
        assert_eq!(&bytes[8..17], b"hello.txt");
        assert_eq!(bytes[7], 1);

        let sb = test_sb(true);
        let parsed: Vec<DirEntry> = iter_dir_entries(&bytes, &sb)
            .collect::<Result<_, _>>()
            .expect("iterate");
        assert_eq!(parsed[0].name, entry.name);
        assert_eq!(parsed[0].record_length, 20);
    }
}
