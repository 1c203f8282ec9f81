//! The format-independent entry model both container parsers produce.

use encoding_rs::MACINTOSH;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Seconds from 1904-01-01 (the Macintosh epoch) to 1970-01-01.
pub const MAC_EPOCH_DELTA: u64 = 2_082_844_800;

/// A Macintosh timestamp: unsigned seconds since 1904-01-01, kept exactly as
/// stored in the archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacTime(pub u32);

impl MacTime {
    /// Seconds relative to the Unix epoch; negative before 1970.
    pub fn to_unix(self) -> i64 {
        self.0 as i64 - MAC_EPOCH_DELTA as i64
    }

    /// Clamped to the range a 32-bit Mac timestamp can hold.
    pub fn from_system_time(time: SystemTime) -> Self {
        let unix = match time.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(e) => -(e.duration().as_secs() as i64),
        };
        MacTime((unix + MAC_EPOCH_DELTA as i64).clamp(0, u32::MAX as i64) as u32)
    }

    pub fn to_system_time(self) -> SystemTime {
        let secs = self.0 as u64;
        if secs >= MAC_EPOCH_DELTA {
            UNIX_EPOCH + Duration::from_secs(secs - MAC_EPOCH_DELTA)
        } else {
            UNIX_EPOCH - Duration::from_secs(MAC_EPOCH_DELTA - secs)
        }
    }
}

/// Where one compressed fork lives and how to decode it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompInfo {
    /// Compression method id.
    pub method: u8,
    /// Absolute offset of the compressed bytes in the archive.
    pub offset: u64,
    /// Uncompressed size.
    pub size: u32,
    /// Compressed size; zero means the fork is absent.
    pub comp_size: u32,
    /// Stored CRC-16 of the uncompressed bytes.
    pub crc: u16,
}

impl CompInfo {
    pub fn is_present(&self) -> bool {
        self.comp_size > 0
    }

    /// One past the last compressed byte.
    pub fn end(&self) -> u64 {
        self.offset + self.comp_size as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Folder,
    File,
    /// Closes the innermost open folder (v1 only).
    EndFolder,
}

/// Selects one of the two forks of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fork {
    Data,
    Resource,
}

impl fmt::Display for Fork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fork::Data => f.write_str("data"),
            Fork::Resource => f.write_str("resource"),
        }
    }
}

/// One folder or file record of an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StuffitEntry {
    pub kind: EntryKind,
    /// Name of the file or folder, decoded from MacRoman.
    pub name: String,
    /// Names of the enclosing folders, outermost first.
    pub parents: Vec<String>,
    pub created: MacTime,
    pub modified: MacTime,
    /// Macintosh file type code (e.g., `b"TEXT"`, `b"APPL"`).
    pub file_type: [u8; 4],
    /// Macintosh creator code (e.g., `b"ttxt"`, `b"CARO"`).
    pub creator: [u8; 4],
    /// Macintosh Finder flags (e.g., invisible, has custom icon).
    pub finder_flags: u16,
    pub data: CompInfo,
    pub res: CompInfo,
}

impl StuffitEntry {
    pub(crate) fn new(kind: EntryKind) -> Self {
        Self {
            kind,
            name: String::new(),
            parents: Vec::new(),
            created: MacTime::default(),
            modified: MacTime::default(),
            file_type: [0; 4],
            creator: [0; 4],
            finder_flags: 0,
            data: CompInfo::default(),
            res: CompInfo::default(),
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == EntryKind::Folder
    }

    pub fn fork(&self, fork: Fork) -> &CompInfo {
        match fork {
            Fork::Data => &self.data,
            Fork::Resource => &self.res,
        }
    }

    /// Path components from the archive root to this entry.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.parents
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.name.as_str()))
    }

    /// `/`-joined path for messages and listings.
    pub fn display_path(&self) -> String {
        self.components().collect::<Vec<_>>().join("/")
    }
}

/// Decode a MacRoman file or folder name.
pub(crate) fn decode_name(bytes: &[u8]) -> String {
    MACINTOSH.decode_without_bom_handling(bytes).0.into_owned()
}
