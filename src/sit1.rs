//! StuffIt 1.x (`SIT!`) container parsing.
//!
//! Archive header (22 bytes):
//!   0-3:   signature ("SIT!", "ST46", ...)
//!   4-5:   number of top-level entries
//!   6-9:   total archive size
//!   10-13: "rLau"
//!   14-21: version and reserved bytes
//!
//! Every entry starts with a 112-byte header:
//!   0:       rsrc fork compression method (0x20 folder start, 0x21 folder end)
//!   1:       data fork compression method
//!   2:       filename length
//!   3-65:    filename
//!   66-69:   file type
//!   70-73:   creator
//!   74-75:   finder flags
//!   76-79:   creation date
//!   80-83:   modification date
//!   84-87:   rsrc uncompressed length
//!   88-91:   data uncompressed length
//!   92-95:   rsrc compressed length
//!   96-99:   data compressed length
//!   100-101: rsrc CRC
//!   102-103: data CRC
//!   104-109: reserved
//!   110-111: header CRC (over bytes 0-109)
//!
//! File headers are followed by the resource fork, then the data fork.
//! Folders nest: entries after a start marker belong to it until the
//! matching end marker.

use crate::entry::{decode_name, CompInfo, EntryKind, MacTime, StuffitEntry};
use crate::{crc16, read_array, seek_to, ArchiveCursor, SitError};
use log::{debug, warn};
use std::io::Cursor;

pub const ARCHIVE_HEADER_SIZE: u64 = 22;
pub const ENTRY_HEADER_SIZE: usize = 112;

const FH_RSRC_METHOD: usize = 0;
const FH_DATA_METHOD: usize = 1;
const FH_NAME_SIZE: usize = 2;
const FH_NAME: usize = 3;
const FH_NAME_MAX: usize = 63;
const FH_TYPE: usize = 66;
const FH_CREATOR: usize = 70;
const FH_FINDER_FLAGS: usize = 74;
const FH_CREATED: usize = 76;
const FH_MODIFIED: usize = 80;
const FH_RSRC_LENGTH: usize = 84;
const FH_DATA_LENGTH: usize = 88;
const FH_RSRC_COMP_LENGTH: usize = 92;
const FH_DATA_COMP_LENGTH: usize = 96;
const FH_RSRC_CRC: usize = 100;
const FH_DATA_CRC: usize = 102;
const FH_HEADER_CRC: usize = 110;

const START_FOLDER: u8 = 0x20;
const END_FOLDER: u8 = 0x21;
// High bit: folder holds encrypted files. 0x10: this fork is encrypted.
const FOLDER_FLAG_MASK: u8 = !0x90;
const ENCRYPTED: u8 = 0x10;
const METHOD_MASK: u8 = 0x0F;

const MAX_FOLDER_DEPTH: usize = 512;

fn field_u16(header: &[u8; ENTRY_HEADER_SIZE], at: usize) -> u16 {
    u16::from_be_bytes([header[at], header[at + 1]])
}

fn field_u32(header: &[u8; ENTRY_HEADER_SIZE], at: usize) -> u32 {
    u32::from_be_bytes([header[at], header[at + 1], header[at + 2], header[at + 3]])
}

fn field_code(header: &[u8; ENTRY_HEADER_SIZE], at: usize) -> [u8; 4] {
    [header[at], header[at + 1], header[at + 2], header[at + 3]]
}

fn classify(rsrc_method: u8, data_method: u8) -> EntryKind {
    let (rsrc, data) = (rsrc_method & FOLDER_FLAG_MASK, data_method & FOLDER_FLAG_MASK);
    if rsrc == START_FOLDER || data == START_FOLDER {
        EntryKind::Folder
    } else if rsrc == END_FOLDER || data == END_FOLDER {
        EntryKind::EndFolder
    } else {
        EntryKind::File
    }
}

/// Parse a StuffIt 1.x archive into its entries, folders before their
/// contents. End-of-folder markers are consumed, not returned.
pub fn parse(data: &[u8]) -> Result<Vec<StuffitEntry>, SitError> {
    let mut cursor = Cursor::new(data);
    let header = read_array::<22>(&mut cursor)?;
    let total_size = u32::from_be_bytes([header[6], header[7], header[8], header[9]]) as u64;

    let end = if total_size > data.len() as u64 {
        warn!(
            "Archive header claims {} bytes but only {} are present",
            total_size,
            data.len()
        );
        data.len() as u64
    } else {
        total_size
    };

    let mut entries = Vec::new();
    let mut parents = Vec::new();
    read_directory(&mut cursor, end, &mut parents, &mut entries)?;
    debug!("SIT 1.x: {} entries", entries.len());
    Ok(entries)
}

fn read_directory(
    cursor: &mut ArchiveCursor<'_>,
    end: u64,
    parents: &mut Vec<String>,
    entries: &mut Vec<StuffitEntry>,
) -> Result<(), SitError> {
    if parents.len() > MAX_FOLDER_DEPTH {
        return Err(SitError::Malformed(format!(
            "folders nested deeper than {MAX_FOLDER_DEPTH} levels"
        )));
    }

    while cursor.position() + ENTRY_HEADER_SIZE as u64 <= end {
        let entry = read_entry(cursor, parents)?;
        match entry.kind {
            EntryKind::EndFolder if parents.is_empty() => {
                debug!("Ignoring end-of-folder marker outside any folder");
            }
            EntryKind::EndFolder => return Ok(()),
            EntryKind::Folder => {
                parents.push(entry.name.clone());
                entries.push(entry);
                read_directory(cursor, end, parents, entries)?;
                parents.pop();
            }
            EntryKind::File => entries.push(entry),
        }
    }
    Ok(())
}

/// Read one entry header and, for files, step over its fork data.
fn read_entry(cursor: &mut ArchiveCursor<'_>, parents: &[String]) -> Result<StuffitEntry, SitError> {
    let start = cursor.position();
    let header = read_array::<ENTRY_HEADER_SIZE>(cursor)?;

    let rsrc_method = header[FH_RSRC_METHOD];
    let data_method = header[FH_DATA_METHOD];
    let mut entry = StuffitEntry::new(classify(rsrc_method, data_method));
    if entry.kind == EntryKind::EndFolder {
        return Ok(entry);
    }

    let stored_crc = field_u16(&header, FH_HEADER_CRC);
    let computed_crc = crc16(&header[..FH_HEADER_CRC]);
    if stored_crc != computed_crc {
        warn!(
            "Header CRC mismatch at 0x{:X}: stored=0x{:04X}, computed=0x{:04X}",
            start, stored_crc, computed_crc
        );
    }

    let name_len = (header[FH_NAME_SIZE] as usize).min(FH_NAME_MAX);
    entry.name = decode_name(&header[FH_NAME..FH_NAME + name_len]);
    entry.parents = parents.to_vec();
    entry.file_type = field_code(&header, FH_TYPE);
    entry.creator = field_code(&header, FH_CREATOR);
    entry.finder_flags = field_u16(&header, FH_FINDER_FLAGS);
    entry.created = MacTime(field_u32(&header, FH_CREATED));
    entry.modified = MacTime(field_u32(&header, FH_MODIFIED));

    if entry.kind == EntryKind::Folder {
        debug!("Folder {} at 0x{:X}", entry.display_path(), start);
        return Ok(entry);
    }

    if (rsrc_method | data_method) & ENCRYPTED != 0 {
        return Err(SitError::EncryptedArchive);
    }

    entry.res = CompInfo {
        method: rsrc_method & METHOD_MASK,
        offset: cursor.position(),
        size: field_u32(&header, FH_RSRC_LENGTH),
        comp_size: field_u32(&header, FH_RSRC_COMP_LENGTH),
        crc: field_u16(&header, FH_RSRC_CRC),
    };
    entry.data = CompInfo {
        method: data_method & METHOD_MASK,
        offset: entry.res.end(),
        size: field_u32(&header, FH_DATA_LENGTH),
        comp_size: field_u32(&header, FH_DATA_COMP_LENGTH),
        crc: field_u16(&header, FH_DATA_CRC),
    };

    // Both forks must lie inside the archive.
    seek_to(cursor, entry.data.end())?;
    debug!(
        "File {} at 0x{:X}: rsrc {}/{} (method {}), data {}/{} (method {})",
        entry.display_path(),
        start,
        entry.res.comp_size,
        entry.res.size,
        entry.res.method,
        entry.data.comp_size,
        entry.data.size,
        entry.data.method
    );
    Ok(entry)
}
