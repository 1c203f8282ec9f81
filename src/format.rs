//! Recognising which container a buffer holds.

use crate::entry::StuffitEntry;
use crate::{sit1, sit5, SitError};
use std::fmt;

/// A container format this crate can parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    /// StuffIt 1.x (`SIT!`, `ST46`, ...).
    Sit1,
    /// StuffIt 5.
    Sit5,
}

impl ArchiveKind {
    /// Identify the container from its leading bytes.
    pub fn detect(data: &[u8]) -> Option<Self> {
        if is_sit1(data) {
            Some(ArchiveKind::Sit1)
        } else if is_sit5(data) {
            Some(ArchiveKind::Sit5)
        } else {
            None
        }
    }

    /// Parse `data` as this kind of container.
    pub fn parse(self, data: &[u8]) -> Result<Vec<StuffitEntry>, SitError> {
        match self {
            ArchiveKind::Sit1 => sit1::parse(data),
            ArchiveKind::Sit5 => sit5::parse(data),
        }
    }
}

impl fmt::Display for ArchiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveKind::Sit1 => f.write_str("StuffIt 1.x"),
            ArchiveKind::Sit5 => f.write_str("StuffIt 5"),
        }
    }
}

fn is_sit1(data: &[u8]) -> bool {
    data.len() >= sit1::ARCHIVE_HEADER_SIZE as usize
        && data[0] == b'S'
        && matches!(data[1], b'T' | b'I')
        && &data[10..14] == b"rLau"
}

fn is_sit5(data: &[u8]) -> bool {
    let trailer_at = sit5::SIGNATURE.len() + 4;
    data.len() >= sit5::ARCHIVE_HEADER_SIZE as usize
        && data.starts_with(sit5::SIGNATURE)
        && &data[trailer_at..trailer_at + sit5::SIGNATURE_TRAILER.len()] == sit5::SIGNATURE_TRAILER
}
