//! Fork decompression methods.
//!
//! Every method implements [`ForkDecoder`]: `initialize` once, then
//! `read_bytes` until it reports the end of the stream. [`extract`] drives
//! that loop over one fork's window of the archive buffer.

mod arsenic;
mod compress;
mod rle90;
mod sit13;
pub mod sit13_tables;

pub use arsenic::ArsenicMethod;
pub use compress::CompressMethod;
pub use rle90::Rle90Method;
pub use sit13::Algorithm13Method;

use crate::entry::CompInfo;
use crate::DecodeError;
use flate2::read::DeflateDecoder;
use log::debug;
use std::borrow::Cow;
use std::fmt;
use std::io::Read;

/// Compression method: Store (no compression)
pub const METHOD_STORE: u8 = 0;
/// Compression method: RLE90
pub const METHOD_RLE90: u8 = 1;
/// Compression method: Compress (LZW, block mode)
pub const METHOD_COMPRESS: u8 = 2;
/// Compression method: StuffIt 1.5.1 (LZSS + Huffman) - Classic and SIT5
pub const METHOD_SIT13: u8 = 13;
/// Compression method: Deflate - SIT5 only
pub const METHOD_DEFLATE: u8 = 14;
/// Compression method: Arsenic (BWT) - SIT5 only
pub const METHOD_ARSENIC: u8 = 15;

/// A decodable compression method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    None,
    Rle90,
    Compress,
    Algorithm13,
    Deflate,
    Arsenic,
}

impl Method {
    /// Map a method id to a method, or `None` when it is not supported.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            METHOD_STORE => Some(Method::None),
            METHOD_RLE90 => Some(Method::Rle90),
            METHOD_COMPRESS => Some(Method::Compress),
            METHOD_SIT13 => Some(Method::Algorithm13),
            METHOD_DEFLATE => Some(Method::Deflate),
            METHOD_ARSENIC => Some(Method::Arsenic),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        match self {
            Method::None => METHOD_STORE,
            Method::Rle90 => METHOD_RLE90,
            Method::Compress => METHOD_COMPRESS,
            Method::Algorithm13 => METHOD_SIT13,
            Method::Deflate => METHOD_DEFLATE,
            Method::Arsenic => METHOD_ARSENIC,
        }
    }

    /// Whether the stored CRC-16 covers the uncompressed bytes. Arsenic
    /// carries its own checksum scheme.
    pub fn has_crc16(self) -> bool {
        self != Method::Arsenic
    }

    /// Build a decoder reading from `input`.
    pub fn decoder<'a>(self, input: &'a [u8]) -> Box<dyn ForkDecoder + 'a> {
        match self {
            Method::None => Box::new(StoredMethod::new(input)),
            Method::Rle90 => Box::new(Rle90Method::new(input)),
            Method::Compress => Box::new(CompressMethod::new(input)),
            Method::Algorithm13 => Box::new(Algorithm13Method::new(input)),
            Method::Deflate => Box::new(DeflateMethod::new(input)),
            Method::Arsenic => Box::new(ArsenicMethod::new(input)),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::None => "none",
            Method::Rle90 => "RLE90",
            Method::Compress => "Compress",
            Method::Algorithm13 => "Algorithm 13",
            Method::Deflate => "Deflate",
            Method::Arsenic => "Arsenic",
        };
        f.write_str(name)
    }
}

/// Incremental decoder for one compressed fork.
pub trait ForkDecoder {
    /// Prepare to decode. Called once before the first `read_bytes`.
    fn initialize(&mut self) -> Result<(), DecodeError>;

    /// Decode into `out`, returning the number of bytes written, or `None`
    /// once the stream has ended. `Some(0)` asks for a larger buffer.
    fn read_bytes(&mut self, out: &mut [u8]) -> Result<Option<usize>, DecodeError>;
}

/// Decode the fork described by `info` out of `archive`.
///
/// Stored forks borrow straight from the archive buffer; every other method
/// produces an owned buffer.
pub fn extract<'a>(
    method: Method,
    info: &CompInfo,
    archive: &'a [u8],
) -> Result<Cow<'a, [u8]>, DecodeError> {
    let start = usize::try_from(info.offset).map_err(|_| DecodeError::WindowOutOfBounds)?;
    let end = start
        .checked_add(info.comp_size as usize)
        .filter(|&end| end <= archive.len())
        .ok_or(DecodeError::WindowOutOfBounds)?;
    let window = &archive[start..end];

    if method == Method::None {
        let len = if info.size != 0 {
            (info.size as usize).min(window.len())
        } else {
            window.len()
        };
        return Ok(Cow::Borrowed(&window[..len]));
    }

    decompress(method, window, initial_capacity(info)).map(Cow::Owned)
}

// The declared size is untrusted; start no larger than this many times the
// compressed size and let the buffer grow from there.
const MAX_INITIAL_RATIO: usize = 16;

/// Starting buffer size for a compressed fork.
fn initial_capacity(info: &CompInfo) -> usize {
    let bound = (info.comp_size as usize).saturating_mul(MAX_INITIAL_RATIO);
    if info.size != 0 {
        (info.size as usize).min(bound)
    } else {
        info.comp_size as usize
    }
}

/// Run `method` over `input` until the end of the stream, starting with a
/// buffer of `capacity` bytes and growing it by half whenever it fills up or
/// the decoder asks for more room.
pub fn decompress(method: Method, input: &[u8], capacity: usize) -> Result<Vec<u8>, DecodeError> {
    let mut decoder = method.decoder(input);
    let output = drive(decoder.as_mut(), capacity)?;
    debug!("{method}: {} -> {} bytes", input.len(), output.len());
    Ok(output)
}

fn drive(decoder: &mut dyn ForkDecoder, capacity: usize) -> Result<Vec<u8>, DecodeError> {
    decoder.initialize()?;

    let mut output = vec![0u8; capacity.max(1)];
    let mut total = 0usize;
    while let Some(len) = decoder.read_bytes(&mut output[total..])? {
        total += len;
        if len == 0 || total == output.len() {
            let grown = (output.len() * 3 / 2).max(output.len() + 1);
            output.resize(grown, 0);
        }
    }

    output.truncate(total);
    Ok(output)
}

/// Method 0: the compressed bytes are the fork.
pub struct StoredMethod<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> StoredMethod<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }
}

impl ForkDecoder for StoredMethod<'_> {
    fn initialize(&mut self) -> Result<(), DecodeError> {
        self.pos = 0;
        Ok(())
    }

    fn read_bytes(&mut self, out: &mut [u8]) -> Result<Option<usize>, DecodeError> {
        let rest = &self.input[self.pos..];
        if rest.is_empty() {
            return Ok(None);
        }
        let len = rest.len().min(out.len());
        out[..len].copy_from_slice(&rest[..len]);
        self.pos += len;
        Ok(Some(len))
    }
}

/// Method 14: raw Deflate stream.
pub struct DeflateMethod<'a> {
    input: &'a [u8],
    inner: Option<DeflateDecoder<&'a [u8]>>,
}

impl<'a> DeflateMethod<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, inner: None }
    }
}

impl ForkDecoder for DeflateMethod<'_> {
    fn initialize(&mut self) -> Result<(), DecodeError> {
        self.inner = Some(DeflateDecoder::new(self.input));
        Ok(())
    }

    fn read_bytes(&mut self, out: &mut [u8]) -> Result<Option<usize>, DecodeError> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(None);
        };
        if out.is_empty() {
            return Ok(Some(0));
        }
        match inner.read(out).map_err(DecodeError::Deflate)? {
            0 => {
                self.inner = None;
                Ok(None)
            }
            n => Ok(Some(n)),
        }
    }
}
