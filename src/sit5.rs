//! StuffIt 5.x container parsing.
//!
//! Archive header (100 bytes):
//!   0-79:  "StuffIt (c)1997-XXXX Aladdin Systems, Inc., ..." signature
//!   82:    archive version (5)
//!   83:    archive flags (0x80 = encrypted)
//!   84-91: total size and reserved
//!   92-93: number of top-level entries
//!   94-97: offset of the first entry
//!
//! Entries are a flat list. Each one names its folder by the archive
//! offset of that folder's own header; folders announce how many entries
//! they hold, and those are added to the number still to be read.

use crate::entry::{decode_name, CompInfo, EntryKind, MacTime, StuffitEntry};
use crate::{read_bytes, read_u16_be, read_u32_be, read_u8, seek_to, skip, ArchiveCursor, SitError};
use log::debug;
use std::collections::HashMap;
use std::io::Cursor;

pub const SIGNATURE: &[u8; 16] = b"StuffIt (c)1997-";
pub const SIGNATURE_TRAILER: &[u8; 60] =
    b" Aladdin Systems, Inc., http://www.aladdinsys.com/StuffIt/\r\n";
pub const ARCHIVE_HEADER_SIZE: u64 = 100;

const ARCHIVE_VERSION: u8 = 5;
const ARCHIVE_ENCRYPTED: u8 = 0x80;

const ENTRY_MAGIC: u32 = 0xA5A5_A5A5;
const FLAG_DIRECTORY: u8 = 0x40;
const FLAG_ENCRYPTED: u8 = 0x20;
const FLAG_HAS_RESOURCE: u16 = 0x01;

// Data size of a folder record that only wraps the real one.
const GHOST_FOLDER: u32 = 0xFFFF_FFFF;

/// One entry plus the bookkeeping needed to place it in the tree.
struct RawEntry {
    entry: StuffitEntry,
    entity_off: u32,
    parent_off: u32,
    /// Entries this record adds to the number left to read.
    extra: u64,
}

/// Parse a StuffIt 5 archive into its entries in container order.
pub fn parse(data: &[u8]) -> Result<Vec<StuffitEntry>, SitError> {
    let mut cursor = Cursor::new(data);
    seek_to(&mut cursor, 82)?;
    let version = read_u8(&mut cursor)?;
    if version != ARCHIVE_VERSION {
        return Err(SitError::UnsupportedVersion(version));
    }
    if read_u8(&mut cursor)? & ARCHIVE_ENCRYPTED != 0 {
        return Err(SitError::EncryptedArchive);
    }
    skip(&mut cursor, 8)?;
    let mut remaining = read_u16_be(&mut cursor)? as u64;
    let first_offset = read_u32_be(&mut cursor)?;
    seek_to(&mut cursor, first_offset as u64)?;

    let mut folders: HashMap<u32, Vec<String>> = HashMap::new();
    let mut entries = Vec::new();

    while remaining > 0 {
        let raw = read_entry(&mut cursor)?;
        remaining = remaining - 1 + raw.extra;

        if raw.parent_off == raw.entity_off {
            return Err(SitError::FolderCycle {
                offset: raw.entity_off,
            });
        }

        let mut entry = raw.entry;
        // Unknown parents (usually 0) are the archive root.
        entry.parents = folders.get(&raw.parent_off).cloned().unwrap_or_default();
        if entry.is_folder() {
            let mut path = entry.parents.clone();
            path.push(entry.name.clone());
            folders.insert(raw.entity_off, path);
        }
        entries.push(entry);
    }

    debug!("SIT 5: {} entries", entries.len());
    Ok(entries)
}

fn read_entry(cursor: &mut ArchiveCursor<'_>) -> Result<RawEntry, SitError> {
    let mut ghosts = 0u64;

    // Ghost folders are followed directly by the header they stand for.
    let (mut entry, entity_off, parent_off, version, header_size, name_len, children) = loop {
        let entity_off = cursor.position();
        let magic = read_u32_be(cursor)?;
        if magic != ENTRY_MAGIC {
            return Err(SitError::Malformed(format!(
                "expected entry header at 0x{entity_off:X}, found 0x{magic:08X}"
            )));
        }

        let version = read_u8(cursor)?;
        skip(cursor, 1)?;
        let header_size = read_u16_be(cursor)? as u64;
        skip(cursor, 1)?;
        let flags = read_u8(cursor)?;

        let kind = if flags & FLAG_DIRECTORY != 0 {
            EntryKind::Folder
        } else {
            EntryKind::File
        };
        let mut entry = StuffitEntry::new(kind);
        entry.created = MacTime(read_u32_be(cursor)?);
        entry.modified = MacTime(read_u32_be(cursor)?);
        skip(cursor, 8)?; // previous and next entry offsets

        let parent_off = read_u32_be(cursor)?;
        let name_len = read_u16_be(cursor)? as usize;
        skip(cursor, 2)?; // header CRC
        entry.data.size = read_u32_be(cursor)?;
        entry.data.comp_size = read_u32_be(cursor)?;
        entry.data.crc = read_u16_be(cursor)?;
        skip(cursor, 2)?;

        let children = if kind == EntryKind::Folder {
            let children = read_u16_be(cursor)? as u64;
            if entry.data.size == GHOST_FOLDER {
                debug!("Skipping ghost folder at 0x{:X}", entity_off);
                ghosts += 1;
                continue;
            }
            children
        } else {
            if flags & FLAG_ENCRYPTED != 0 {
                return Err(SitError::EncryptedArchive);
            }
            entry.data.method = read_u8(cursor)?;
            skip(cursor, 1)?; // password length
            0
        };

        break (
            entry,
            entity_off,
            parent_off,
            version,
            header_size,
            name_len,
            children,
        );
    };

    entry.name = decode_name(&read_bytes(cursor, name_len)?);

    if cursor.position() < entity_off + header_size {
        let comment_len = read_u16_be(cursor)? as u64;
        skip(cursor, comment_len + 2)?;
    }

    let has_resource = read_u16_be(cursor)? & FLAG_HAS_RESOURCE != 0;
    skip(cursor, 2)?;
    entry.file_type = read_code(cursor)?;
    entry.creator = read_code(cursor)?;
    entry.finder_flags = read_u16_be(cursor)?;
    skip(cursor, if version == 1 { 22 } else { 18 })?;

    if has_resource {
        entry.res.size = read_u32_be(cursor)?;
        entry.res.comp_size = read_u32_be(cursor)?;
        entry.res.crc = read_u16_be(cursor)?;
        skip(cursor, 2)?;
        entry.res.method = read_u8(cursor)?;
        skip(cursor, 1)?; // password length
    }

    if entry.is_folder() {
        // A folder's size fields describe its contents, not a fork.
        entry.data = CompInfo::default();
        entry.res = CompInfo::default();
        debug!("Folder {} at 0x{:X}", entry.name, entity_off);
    } else {
        entry.res.offset = cursor.position();
        entry.data.offset = entry.res.end();
        // Both forks must lie inside the archive.
        seek_to(cursor, entry.data.end())?;
        debug!(
            "File {} at 0x{:X}: rsrc {}/{} (method {}), data {}/{} (method {})",
            entry.name,
            entity_off,
            entry.res.comp_size,
            entry.res.size,
            entry.res.method,
            entry.data.comp_size,
            entry.data.size,
            entry.data.method
        );
    }

    Ok(RawEntry {
        entry,
        entity_off: entity_off as u32,
        parent_off,
        extra: children + ghosts,
    })
}

fn read_code(cursor: &mut ArchiveCursor<'_>) -> Result<[u8; 4], SitError> {
    Ok(read_u32_be(cursor)?.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc16;

    /// Writes archives entry by entry; offsets are known as soon as an
    /// entry is written.
    struct Builder {
        data: Vec<u8>,
    }

    impl Builder {
        fn new() -> Self {
            let mut data = SIGNATURE.to_vec();
            data.extend_from_slice(b"2000");
            data.extend_from_slice(SIGNATURE_TRAILER);
            data.resize(ARCHIVE_HEADER_SIZE as usize, 0);
            data[82] = ARCHIVE_VERSION;
            data[94..98].copy_from_slice(&(ARCHIVE_HEADER_SIZE as u32).to_be_bytes());
            Self { data }
        }

        #[allow(clippy::too_many_arguments)]
        fn header(
            &mut self,
            flags: u8,
            parent: u32,
            name: &str,
            size: u32,
            comp_size: u32,
            crc: u16,
            tail: [u8; 2],
        ) -> u32 {
            let start = self.data.len() as u32;
            let d = &mut self.data;
            d.extend_from_slice(&ENTRY_MAGIC.to_be_bytes());
            d.push(1);
            d.push(0);
            d.extend_from_slice(&(48 + name.len() as u16).to_be_bytes());
            d.push(0);
            d.push(flags);
            d.extend_from_slice(&0xB100_0000u32.to_be_bytes());
            d.extend_from_slice(&0xB200_0000u32.to_be_bytes());
            d.extend_from_slice(&[0; 8]);
            d.extend_from_slice(&parent.to_be_bytes());
            d.extend_from_slice(&(name.len() as u16).to_be_bytes());
            d.extend_from_slice(&[0; 2]);
            d.extend_from_slice(&size.to_be_bytes());
            d.extend_from_slice(&comp_size.to_be_bytes());
            d.extend_from_slice(&crc.to_be_bytes());
            d.extend_from_slice(&[0; 2]);
            d.extend_from_slice(&tail);
            d.extend_from_slice(name.as_bytes());
            start
        }

        fn metadata(&mut self, has_resource: bool, file_type: &[u8; 4]) {
            let d = &mut self.data;
            d.extend_from_slice(&(has_resource as u16).to_be_bytes());
            d.extend_from_slice(&[0; 2]);
            d.extend_from_slice(file_type);
            d.extend_from_slice(b"SIT!");
            d.extend_from_slice(&0x0400u16.to_be_bytes());
            d.extend_from_slice(&[0; 22]);
        }

        fn folder(&mut self, parent: u32, name: &str, children: u16) -> u32 {
            let off = self.header(FLAG_DIRECTORY, parent, name, 0, 0, 0, children.to_be_bytes());
            self.metadata(false, b"fold");
            off
        }

        fn ghost(&mut self, parent: u32) {
            self.header(FLAG_DIRECTORY, parent, "", GHOST_FOLDER, 0, 0, [0, 0]);
        }

        fn file(&mut self, parent: u32, name: &str, data: &[u8], rsrc: Option<&[u8]>) -> u32 {
            let off = self.header(
                0,
                parent,
                name,
                data.len() as u32,
                data.len() as u32,
                crc16(data),
                [0, 0],
            );
            self.metadata(rsrc.is_some(), b"TEXT");
            if let Some(rsrc) = rsrc {
                let d = &mut self.data;
                d.extend_from_slice(&(rsrc.len() as u32).to_be_bytes());
                d.extend_from_slice(&(rsrc.len() as u32).to_be_bytes());
                d.extend_from_slice(&crc16(rsrc).to_be_bytes());
                d.extend_from_slice(&[0; 2]);
                d.extend_from_slice(&[0, 0]);
                d.extend_from_slice(rsrc);
            }
            self.data.extend_from_slice(data);
            off
        }

        fn finish(mut self, top_level: u16) -> Vec<u8> {
            self.data[92..94].copy_from_slice(&top_level.to_be_bytes());
            self.data
        }
    }

    #[test]
    fn test_files_and_folders() {
        let mut b = Builder::new();
        let docs = b.folder(0, "Docs", 2);
        b.file(docs, "a.txt", b"alpha", None);
        let inner = b.folder(docs, "Inner", 1);
        b.file(inner, "b.txt", b"beta", Some(b"RSRC"));
        b.file(0, "top.txt", b"top", None);
        let data = b.finish(2);

        let entries = parse(&data).unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.display_path()).collect();
        assert_eq!(
            paths,
            ["Docs", "Docs/a.txt", "Docs/Inner", "Docs/Inner/b.txt", "top.txt"]
        );

        let b_txt = &entries[3];
        assert_eq!(b_txt.kind, EntryKind::File);
        assert_eq!(&b_txt.file_type, b"TEXT");
        assert_eq!(&b_txt.creator, b"SIT!");
        assert_eq!(b_txt.finder_flags, 0x0400);
        assert_eq!(b_txt.created, MacTime(0xB100_0000));
        assert_eq!(b_txt.modified, MacTime(0xB200_0000));
        assert_eq!(&data[b_txt.res.offset as usize..b_txt.res.end() as usize], b"RSRC");
        assert_eq!(&data[b_txt.data.offset as usize..b_txt.data.end() as usize], b"beta");
        assert_eq!(b_txt.data.crc, crc16(b"beta"));

        assert!(entries[0].is_folder());
        assert!(!entries[0].data.is_present());
    }

    #[test]
    fn test_ghost_folder_is_skipped_and_counted() {
        let mut b = Builder::new();
        b.ghost(0);
        let real = b.folder(0, "Real", 1);
        b.file(real, "x", b"x", None);
        b.file(0, "after", b"after", None);
        // The ghost and the folder it wraps are read as one entry, and the
        // ghost adds one more to the total: "after".
        let data = b.finish(1);

        let entries = parse(&data).unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.display_path()).collect();
        assert_eq!(paths, ["Real", "Real/x", "after"]);
    }

    #[test]
    fn test_unknown_parent_is_root() {
        let mut b = Builder::new();
        b.file(0x1234, "orphan", b"o", None);
        let data = b.finish(1);
        let entries = parse(&data).unwrap();
        assert!(entries[0].parents.is_empty());
    }

    #[test]
    fn test_encrypted_archive() {
        let mut b = Builder::new();
        b.file(0, "f", b"f", None);
        let mut data = b.finish(1);
        data[83] = ARCHIVE_ENCRYPTED;
        assert!(matches!(parse(&data), Err(SitError::EncryptedArchive)));
    }

    #[test]
    fn test_encrypted_entry() {
        let mut b = Builder::new();
        let off = b.file(0, "f", b"f", None) as usize;
        let mut data = b.finish(1);
        data[off + 9] |= FLAG_ENCRYPTED;
        assert!(matches!(parse(&data), Err(SitError::EncryptedArchive)));
    }

    #[test]
    fn test_self_parent_is_a_cycle() {
        let mut b = Builder::new();
        let off = ARCHIVE_HEADER_SIZE as u32;
        assert_eq!(b.folder(off, "Loop", 0), off);
        let data = b.finish(1);
        assert!(matches!(
            parse(&data),
            Err(SitError::FolderCycle { offset }) if offset == off
        ));
    }

    #[test]
    fn test_bad_version_and_magic() {
        let mut b = Builder::new();
        b.file(0, "f", b"f", None);
        let mut data = b.finish(1);

        let mut wrong_version = data.clone();
        wrong_version[82] = 4;
        assert!(matches!(
            parse(&wrong_version),
            Err(SitError::UnsupportedVersion(4))
        ));

        data[ARCHIVE_HEADER_SIZE as usize] = 0;
        assert!(matches!(parse(&data), Err(SitError::Malformed(_))));
    }

    #[test]
    fn test_fork_past_end() {
        let mut b = Builder::new();
        b.file(0, "f", b"0123456789", None);
        let mut data = b.finish(1);
        data.truncate(data.len() - 4);
        assert!(matches!(parse(&data), Err(SitError::Truncated { .. })));
    }

    #[test]
    fn test_comment_is_skipped() {
        let mut b = Builder::new();
        let off = b.data.len();
        b.header(0, 0, "c", 1, 1, crc16(b"!"), [0, 0]);
        // Declare a larger header so the comment block is read.
        let header_size = (48 + 1 + 4 + 3) as u16;
        b.data[off + 6..off + 8].copy_from_slice(&header_size.to_be_bytes());
        b.data.extend_from_slice(&3u16.to_be_bytes());
        b.data.extend_from_slice(&[0; 2]);
        b.data.extend_from_slice(b"hi!");
        b.metadata(false, b"TEXT");
        b.data.push(b'!');
        let data = b.finish(1);

        let entries = parse(&data).unwrap();
        assert_eq!(entries[0].name, "c");
        assert_eq!(&data[entries[0].data.offset as usize..], b"!");
    }
}
