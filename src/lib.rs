//! StuffIt (.sit) archive decoder.
//!
//! This crate reads StuffIt archives, the compression format of the classic
//! Macintosh, and turns every entry into a file with a data fork and a
//! resource fork.
//!
//! # Supported Formats
//!
//! - **SIT! 1.x** - The original StuffIt format with nested folder markers
//! - **StuffIt 5.0** - Flat entry list with parent-offset back references
//!
//! # Compression Methods
//!
//! - **Method 0** - No compression (store)
//! - **Method 1** - RLE90
//! - **Method 2** - Compress (LZW, block mode)
//! - **Method 13** - LZSS with Huffman coding (StuffIt native)
//! - **Method 14** - Deflate
//! - **Method 15** - Arsenic (BWT + arithmetic coding)
//!
//! Any other method is reported as a warning for that fork; the rest of the
//! archive is still extracted.
//!
//! # Example
//!
//! ```no_run
//! use macsit::{Archive, ExtractOptions, LocalPacker};
//!
//! let data = std::fs::read("archive.sit").unwrap();
//! let archive = Archive::open(&data).unwrap();
//!
//! for entry in archive.entries() {
//!     println!("{} ({} bytes)", entry.display_path(), entry.data.size);
//! }
//!
//! let options = ExtractOptions::default();
//! let packer = LocalPacker::new("out", options.layout);
//! let report = archive.extract_to(&packer, &options).unwrap();
//! for warning in &report.warnings {
//!     eprintln!("{warning}");
//! }
//! ```

pub mod archive;
pub mod bits;
pub mod entry;
pub mod extract;
pub mod file;
pub mod format;
pub mod huffman;
pub mod methods;
pub mod sit1;
pub mod sit5;

pub use archive::Archive;
pub use entry::{CompInfo, EntryKind, Fork, MacTime, StuffitEntry};
pub use extract::{ExtractOptions, ExtractReport, ForkWarning};
pub use file::{FilePacker, ForkLayout, LocalPacker, MacFile, UnPacked};
pub use format::ArchiveKind;
pub use methods::Method;

use std::io::{Cursor, Read, Seek, SeekFrom};
use thiserror::Error;

/// Errors that stop the whole archive.
#[derive(Error, Debug)]
pub enum SitError {
    /// The file does not have a valid StuffIt signature.
    #[error("Invalid SIT signature")]
    InvalidSignature,

    /// The input is not a format this crate can unpack.
    #[error("Unsupported input format")]
    UnsupportedFormat,

    /// The archive uses an unsupported version.
    #[error("Unsupported SIT version: {0}")]
    UnsupportedVersion(u8),

    /// A header or fork extends past the end of the archive.
    #[error("Archive truncated at offset 0x{offset:X}")]
    Truncated { offset: u64 },

    /// The archive structure is malformed.
    #[error("Malformed archive: {0}")]
    Malformed(String),

    /// The archive or an entry is encrypted; no decryption is available.
    #[error("Archive is encrypted")]
    EncryptedArchive,

    /// A folder names itself as its own parent.
    #[error("Folder at 0x{offset:X} is its own parent")]
    FolderCycle { offset: u32 },

    /// An I/O error occurred while reading or writing.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that stop the decoding of a single fork.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Invalid Huffman repeat position")]
    InvalidRepeatPosition,

    #[error("Huffman code is a prefix of an existing code")]
    PrefixExists,

    #[error("Invalid repeating Huffman code")]
    InvalidRepeatingCode,

    #[error("Invalid Huffman code length: {0}")]
    InvalidCodeLength(u32),

    #[error("Invalid Huffman prefix in input")]
    InvalidPrefix,

    #[error("Huffman lookup table not built")]
    TableNotBuilt,

    #[error("Compress: invalid code {0}")]
    InvalidLzwCode(u32),

    #[error("Compress: invalid flags 0x{0:02X}")]
    InvalidLzwFlags(u8),

    #[error("Algorithm 13: invalid table selector {0}")]
    InvalidTableSelector(u8),

    #[error("Input ended before the end-of-stream marker")]
    UnexpectedEnd,

    #[error("Fork data lies outside the archive")]
    WindowOutOfBounds,

    #[error("Arsenic: {0}")]
    Arsenic(&'static str),

    #[error("Deflate: {0}")]
    Deflate(#[source] std::io::Error),
}

/// Why a fork could not be produced, or was produced with a problem.
#[derive(Error, Debug)]
pub enum ForkFailure {
    #[error("compression method {0} not supported")]
    Unsupported(u8),

    #[error(transparent)]
    Failed(#[from] DecodeError),

    #[error("CRC mismatch: stored 0x{expected:04X}, computed 0x{actual:04X}")]
    ChecksumMismatch { expected: u16, actual: u16 },
}

/// IBM CRC16 algorithm (polynomial 0xA001, reflected)
/// This is also known as CRC-16/IBM or CRC-16/ANSI
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = 0u16;
    for &b in data {
        crc ^= b as u16;
        for _ in 0..8 {
            if (crc & 0x0001) != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

// Header readers over the archive buffer. Running out of bytes is always
// reported as truncation at the current position.
pub(crate) type ArchiveCursor<'a> = Cursor<&'a [u8]>;

fn read_into(r: &mut ArchiveCursor<'_>, buf: &mut [u8]) -> Result<(), SitError> {
    let offset = r.position();
    r.read_exact(buf).map_err(|_| SitError::Truncated { offset })
}

pub(crate) fn read_array<const N: usize>(r: &mut ArchiveCursor<'_>) -> Result<[u8; N], SitError> {
    let mut buf = [0u8; N];
    read_into(r, &mut buf)?;
    Ok(buf)
}

pub(crate) fn read_u8(r: &mut ArchiveCursor<'_>) -> Result<u8, SitError> {
    Ok(read_array::<1>(r)?[0])
}

pub(crate) fn read_u16_be(r: &mut ArchiveCursor<'_>) -> Result<u16, SitError> {
    Ok(u16::from_be_bytes(read_array(r)?))
}

pub(crate) fn read_u32_be(r: &mut ArchiveCursor<'_>) -> Result<u32, SitError> {
    Ok(u32::from_be_bytes(read_array(r)?))
}

pub(crate) fn read_bytes(r: &mut ArchiveCursor<'_>, len: usize) -> Result<Vec<u8>, SitError> {
    let mut buf = vec![0u8; len];
    read_into(r, &mut buf)?;
    Ok(buf)
}

/// Move the cursor forward without reading; fails if that leaves the buffer.
pub(crate) fn skip(r: &mut ArchiveCursor<'_>, n: u64) -> Result<(), SitError> {
    seek_to(r, r.position() + n)
}

pub(crate) fn seek_to(r: &mut ArchiveCursor<'_>, pos: u64) -> Result<(), SitError> {
    if pos > r.get_ref().len() as u64 {
        return Err(SitError::Truncated { offset: pos });
    }
    r.seek(SeekFrom::Start(pos))?;
    Ok(())
}
