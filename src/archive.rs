//! A parsed archive held over its input buffer.

use crate::entry::{Fork, StuffitEntry};
use crate::extract::{self, ExtractOptions, ExtractReport};
use crate::file::FilePacker;
use crate::format::ArchiveKind;
use crate::{ForkFailure, SitError};
use log::debug;
use std::borrow::Cow;

/// A StuffIt archive whose entries have all been read.
///
/// Nothing is decompressed until a fork is asked for, either one at a time
/// through [`Archive::read_fork`] or all at once through
/// [`Archive::extract_to`].
#[derive(Debug)]
pub struct Archive<'a> {
    data: &'a [u8],
    kind: ArchiveKind,
    entries: Vec<StuffitEntry>,
}

impl<'a> Archive<'a> {
    /// Detect the container format of `data` and read its entry list.
    pub fn open(data: &'a [u8]) -> Result<Self, SitError> {
        let Some(kind) = ArchiveKind::detect(data) else {
            // Looks like StuffIt, but the header doesn't check out.
            if data.starts_with(b"SIT!") || data.starts_with(b"StuffIt") {
                return Err(SitError::InvalidSignature);
            }
            return Err(SitError::UnsupportedFormat);
        };

        let entries = kind.parse(data)?;
        debug!("{kind} archive with {} entries", entries.len());
        Ok(Self {
            data,
            kind,
            entries,
        })
    }

    pub fn kind(&self) -> ArchiveKind {
        self.kind
    }

    /// The buffer the archive was opened from.
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Every file and folder, parents before children.
    pub fn entries(&self) -> &[StuffitEntry] {
        &self.entries
    }

    /// Decode one fork of `entry`. Unlike extraction, a checksum mismatch is
    /// an error here. A fork the entry doesn't have reads as empty.
    pub fn read_fork(
        &self,
        entry: &StuffitEntry,
        fork: Fork,
    ) -> Result<Cow<'a, [u8]>, ForkFailure> {
        match extract::decode_fork(self.data, entry.fork(fork))? {
            (_, Some(failure)) => Err(failure),
            (bytes, None) => Ok(bytes),
        }
    }

    /// Write every entry through `packer`.
    pub fn extract_to<P: FilePacker + ?Sized>(
        &self,
        packer: &P,
        options: &ExtractOptions,
    ) -> Result<ExtractReport, SitError> {
        extract::extract_entries(self.data, &self.entries, packer, options)
    }
}
