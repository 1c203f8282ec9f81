use super::ForkDecoder;
use crate::bits::BitReader;
use crate::DecodeError;

/// Flags StuffIt always uses: block mode, 14-bit maximum code width.
pub const DEFAULT_FLAGS: u8 = 0x8E;

const BLOCK_MODE: u8 = 0x80;
const CLEAR_CODE: u32 = 256;
const INITIAL_WIDTH: u32 = 9;

#[derive(Debug, Clone, Copy)]
struct LzwNode {
    chr: u8,
    parent: Option<u32>,
}

/// LZW dictionary. Every symbol is a byte plus a link to the symbol it
/// extends.
struct Lzw {
    nodes: Vec<LzwNode>,
    num_symbols: u32,
    max_symbols: u32,
    reserved: u32,
    prev: Option<u32>,
    symbol_width: u32,
}

impl Lzw {
    fn new(max_symbols: u32, reserved: u32) -> Self {
        let mut nodes = vec![
            LzwNode {
                chr: 0,
                parent: None,
            };
            max_symbols as usize
        ];
        for (i, node) in nodes.iter_mut().take(256).enumerate() {
            node.chr = i as u8;
        }
        let mut lzw = Self {
            nodes,
            num_symbols: 0,
            max_symbols,
            reserved,
            prev: None,
            symbol_width: INITIAL_WIDTH,
        };
        lzw.clear_table();
        lzw
    }

    fn clear_table(&mut self) {
        self.num_symbols = 256 + self.reserved;
        self.prev = None;
        self.symbol_width = INITIAL_WIDTH;
    }

    fn first_byte(&self, mut symbol: u32) -> u8 {
        while let Some(parent) = self.nodes[symbol as usize].parent {
            symbol = parent;
        }
        self.nodes[symbol as usize].chr
    }

    fn next_symbol(&mut self, symbol: u32) -> Result<(), DecodeError> {
        let full = self.num_symbols == self.max_symbols;
        if symbol > self.num_symbols
            || (symbol == self.num_symbols && (self.prev.is_none() || full))
        {
            return Err(DecodeError::InvalidLzwCode(symbol));
        }

        let parent = self.prev.replace(symbol);
        let Some(parent) = parent else {
            return Ok(());
        };
        if full {
            return Ok(());
        }

        let postfix = self.first_byte(if symbol == self.num_symbols {
            parent
        } else {
            symbol
        });
        self.nodes[self.num_symbols as usize] = LzwNode {
            chr: postfix,
            parent: Some(parent),
        };
        self.num_symbols += 1;

        if self.num_symbols != self.max_symbols && self.num_symbols.is_power_of_two() {
            self.symbol_width += 1;
        }
        Ok(())
    }

    /// Length of the expansion of the last symbol.
    fn output_len(&self) -> usize {
        let mut len = 0;
        let mut symbol = self.prev;
        while let Some(s) = symbol {
            len += 1;
            symbol = self.nodes[s as usize].parent;
        }
        len
    }

    /// Write the expansion of the last symbol; `out` must be exactly
    /// `output_len()` bytes.
    fn write_output(&self, out: &mut [u8]) {
        let mut symbol = self.prev;
        for slot in out.iter_mut().rev() {
            let Some(s) = symbol else { break };
            let node = self.nodes[s as usize];
            *slot = node.chr;
            symbol = node.parent;
        }
    }
}

/// Method 2: Unix `compress` style LZW.
pub struct CompressMethod<'a> {
    input: BitReader<'a>,
    flags: u8,
    block_mode: bool,
    symbol_counter: u32,
    // Expansion of the last code not yet handed out.
    pending: Option<usize>,
    lzw: Option<Lzw>,
}

impl<'a> CompressMethod<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self::with_flags(input, DEFAULT_FLAGS)
    }

    pub fn with_flags(input: &'a [u8], flags: u8) -> Self {
        Self {
            input: BitReader::lsb(input),
            flags,
            block_mode: flags & BLOCK_MODE != 0,
            symbol_counter: 0,
            pending: None,
            lzw: None,
        }
    }

    /// Read codes until one produces output. Returns the output length, or
    /// `None` once the input is exhausted.
    fn load_next_block(&mut self) -> Result<Option<usize>, DecodeError> {
        let Some(lzw) = self.lzw.as_mut() else {
            return Ok(None);
        };

        let symbol = loop {
            if self.input.has_ended(lzw.symbol_width - 1) {
                return Ok(None);
            }
            let symbol = self.input.read_word(lzw.symbol_width, true);
            self.symbol_counter += 1;

            if symbol != CLEAR_CODE || !self.block_mode {
                break symbol;
            }
            // Codes come in groups of eight; a clear code discards the rest
            // of its group.
            let used = self.symbol_counter % 8;
            if used != 0 {
                self.input.skip_bits(lzw.symbol_width * (8 - used));
            }
            lzw.clear_table();
            self.symbol_counter = 0;
        };

        lzw.next_symbol(symbol)?;
        Ok(Some(lzw.output_len()))
    }
}

impl ForkDecoder for CompressMethod<'_> {
    fn initialize(&mut self) -> Result<(), DecodeError> {
        let width = (self.flags & 0x1F) as u32;
        if !(INITIAL_WIDTH..=16).contains(&width) {
            return Err(DecodeError::InvalidLzwFlags(self.flags));
        }
        let reserved = if self.block_mode { 1 } else { 0 };
        self.lzw = Some(Lzw::new(1 << width, reserved));
        self.symbol_counter = 0;
        self.pending = None;
        Ok(())
    }

    fn read_bytes(&mut self, out: &mut [u8]) -> Result<Option<usize>, DecodeError> {
        let mut written = 0;
        loop {
            let len = match self.pending {
                Some(len) => len,
                None => match self.load_next_block()? {
                    Some(len) => len,
                    None if written == 0 => return Ok(None),
                    None => return Ok(Some(written)),
                },
            };

            if len > out.len() - written {
                self.pending = Some(len);
                return Ok(Some(written));
            }
            if let Some(lzw) = self.lzw.as_ref() {
                lzw.write_output(&mut out[written..written + len]);
            }
            written += len;
            self.pending = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::BitWriter;
    use crate::methods::{decompress, Method};

    fn lzw(input: &[u8]) -> Result<Vec<u8>, DecodeError> {
        decompress(Method::Compress, input, 4)
    }

    #[test]
    fn test_literal_codes() {
        let mut w = BitWriter::new();
        for &b in b"hi!" {
            w.write_bits(b as u32, 9);
        }
        assert_eq!(lzw(&w.finish()).unwrap(), b"hi!");
    }

    #[test]
    fn test_dictionary_codes() {
        // a b 257(ab) 259(aba, defined by its own use)
        let mut w = BitWriter::new();
        for code in [b'a' as u32, b'b' as u32, 257, 259] {
            w.write_bits(code, 9);
        }
        assert_eq!(lzw(&w.finish()).unwrap(), b"ababaaba");
    }

    #[test]
    fn test_clear_code_realigns_to_group_of_eight() {
        let mut w = BitWriter::new();
        w.write_bits(b'a' as u32, 9);
        w.write_bits(b'b' as u32, 9);
        w.write_bits(CLEAR_CODE, 9);
        // Rest of the group of eight codes is padding.
        for _ in 0..5 {
            w.write_bits(0x1FF, 9);
        }
        w.write_bits(b'c' as u32, 9);
        w.write_bits(257, 9);
        let out = lzw(&w.finish()).unwrap();
        // After the clear, 257 is the first free entry again: "cc".
        assert_eq!(out, b"abccc");
    }

    #[test]
    fn test_clear_code_after_width_growth() {
        let mut w = BitWriter::new();
        let mut expected = Vec::new();
        // 256 codes fill the table to 512 entries; codes are 10 bits from here.
        for i in 0..256u32 {
            let b = (i % 251) as u8;
            w.write_bits(b as u32, 9);
            expected.push(b);
        }
        for &b in b"xyz" {
            w.write_bits(b as u32, 10);
            expected.push(b);
        }
        // Code 260 of the stream; the other four of its group are padding,
        // still 10 bits wide.
        w.write_bits(CLEAR_CODE, 10);
        for _ in 0..4 {
            w.write_bits(0x3FF, 10);
        }
        // Back to 9 bits, and 257 is the first free entry again.
        w.write_bits(b'c' as u32, 9);
        w.write_bits(257, 9);
        expected.extend_from_slice(b"ccc");

        assert_eq!(lzw(&w.finish()).unwrap(), expected);
    }

    #[test]
    fn test_width_grows_at_power_of_two() {
        let mut w = BitWriter::new();
        let mut expected = Vec::new();
        // Entry 511 is the last one read with 9-bit codes; adding entry 512
        // switches to 10 bits.
        let literal_count = 512 - 257 + 1;
        for i in 0..literal_count {
            let b = (i % 251) as u8;
            w.write_bits(b as u32, 9);
            expected.push(b);
        }
        w.write_bits(b'z' as u32, 10);
        expected.push(b'z');
        assert_eq!(lzw(&w.finish()).unwrap(), expected);
    }

    #[test]
    fn test_invalid_code() {
        let mut w = BitWriter::new();
        w.write_bits(b'a' as u32, 9);
        w.write_bits(300, 9);
        assert!(matches!(
            lzw(&w.finish()),
            Err(DecodeError::InvalidLzwCode(300))
        ));

        // The first code cannot refer to the entry it would define.
        let mut w = BitWriter::new();
        w.write_bits(257, 9);
        assert!(matches!(
            lzw(&w.finish()),
            Err(DecodeError::InvalidLzwCode(257))
        ));
    }

    #[test]
    fn test_invalid_flags() {
        let mut decoder = CompressMethod::with_flags(&[], 0x80 | 20);
        assert!(matches!(
            decoder.initialize(),
            Err(DecodeError::InvalidLzwFlags(_))
        ));
    }

    #[test]
    fn test_long_expansion_requests_room() {
        let mut w = BitWriter::new();
        for code in [b'x' as u32, 257, 258, 259] {
            w.write_bits(code, 9);
        }
        let data = w.finish();
        let mut decoder = CompressMethod::new(&data);
        decoder.initialize().unwrap();

        let mut buf = [0u8; 2];
        // "x" fits, "xx" has to wait for the next call.
        assert_eq!(decoder.read_bytes(&mut buf).unwrap(), Some(1));
        assert_eq!(buf[0], b'x');
        assert_eq!(decoder.read_bytes(&mut buf).unwrap(), Some(2));
        assert_eq!(&buf, b"xx");
        // "xxx" does not fit at all.
        assert_eq!(decoder.read_bytes(&mut buf).unwrap(), Some(0));
        let mut big = [0u8; 16];
        assert_eq!(decoder.read_bytes(&mut big).unwrap(), Some(7));
        assert_eq!(&big[..7], b"xxxxxxx");
        assert_eq!(decoder.read_bytes(&mut big).unwrap(), None);
    }
}
