use super::sit13_tables::{
    FIRST_CODE_LENGTHS, LITERAL_CODES, META_CODES, META_CODE_LENGTHS, OFFSET_CODE_LENGTHS,
    OFFSET_CODE_SIZES, SECOND_CODE_LENGTHS,
};
use super::ForkDecoder;
use crate::bits::{BitOrder, BitReader};
use crate::huffman::HuffmanDecoder;
use crate::DecodeError;
use log::debug;

const WINDOW_SIZE: usize = 65536;
const WINDOW_MASK: usize = WINDOW_SIZE - 1;

const MAX_CODE_LENGTH: u32 = 32;

// Symbols of the first/second alphabets.
const FIRST_MATCH: u32 = 0x100;
const LONG_MATCH_10: u32 = 0x13E;
const LONG_MATCH_15: u32 = 0x13F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Current {
    First,
    Second,
}

struct Codes {
    first: HuffmanDecoder,
    second: HuffmanDecoder,
    offset: HuffmanDecoder,
    current: Current,
}

enum Token {
    Literal(u8),
    Match { length: usize, offset: usize },
    End,
}

/// Method 13: LZSS over a 64 KiB window with Huffman-coded literals, match
/// lengths and offsets.
pub struct Algorithm13Method<'a> {
    data: &'a [u8],
    input: BitReader<'a>,
    codes: Option<Codes>,
    window: Vec<u8>,
    pos: usize,
    match_pos: usize,
    match_len: usize,
    ended: bool,
}

impl<'a> Algorithm13Method<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            input: BitReader::lsb(data),
            codes: None,
            window: Vec::new(),
            pos: 0,
            match_pos: 0,
            match_len: 0,
            ended: false,
        }
    }

    fn read_tables(&mut self) -> Result<Codes, DecodeError> {
        let header = self
            .input
            .read_aligned_byte()
            .ok_or(DecodeError::UnexpectedEnd)?;
        let selector = header >> 4;

        let (mut first, mut second, mut offset) = match selector {
            0 => {
                debug!("Algorithm 13: inline tables, header 0x{header:02X}");
                let mut meta = HuffmanDecoder::new();
                for (i, (&code, &len)) in META_CODES.iter().zip(&META_CODE_LENGTHS).enumerate() {
                    meta.add_value_lsb(i as u32, code, len)?;
                }
                meta.make_table(BitOrder::Lsb);

                let first = parse_code_lengths(&mut self.input, LITERAL_CODES, &meta)?;
                let second = if header & 0x08 != 0 {
                    first.clone()
                } else {
                    parse_code_lengths(&mut self.input, LITERAL_CODES, &meta)?
                };
                let offset_codes = (header & 0x07) as usize + 10;
                let offset = parse_code_lengths(&mut self.input, offset_codes, &meta)?;
                (first, second, offset)
            }
            1..=5 => {
                let preset = selector as usize - 1;
                debug!("Algorithm 13: preset tables {selector}");
                (
                    HuffmanDecoder::from_lengths(&FIRST_CODE_LENGTHS[preset], MAX_CODE_LENGTH, true)?,
                    HuffmanDecoder::from_lengths(&SECOND_CODE_LENGTHS[preset], MAX_CODE_LENGTH, true)?,
                    HuffmanDecoder::from_lengths(
                        &OFFSET_CODE_LENGTHS[preset][..OFFSET_CODE_SIZES[preset]],
                        MAX_CODE_LENGTH,
                        true,
                    )?,
                )
            }
            _ => return Err(DecodeError::InvalidTableSelector(selector)),
        };

        first.make_table(BitOrder::Lsb);
        second.make_table(BitOrder::Lsb);
        offset.make_table(BitOrder::Lsb);
        Ok(Codes {
            first,
            second,
            offset,
            current: Current::First,
        })
    }

    fn next_token(&mut self) -> Result<Token, DecodeError> {
        let Some(codes) = self.codes.as_mut() else {
            return Ok(Token::End);
        };
        if self.input.has_ended(0) {
            return Err(DecodeError::UnexpectedEnd);
        }

        let code = match codes.current {
            Current::First => &codes.first,
            Current::Second => &codes.second,
        };
        let val = code.next_symbol(&mut self.input)?;
        if val < FIRST_MATCH {
            codes.current = Current::First;
            return Ok(Token::Literal(val as u8));
        }
        codes.current = Current::Second;

        let length = match val {
            LONG_MATCH_10 => self.input.read_word(10, true) as usize + 65,
            LONG_MATCH_15 => self.input.read_word(15, true) as usize + 65,
            v if v < LONG_MATCH_10 => (v - FIRST_MATCH) as usize + 3,
            _ => return Ok(Token::End),
        };

        let width = codes.offset.next_symbol(&mut self.input)?;
        let offset = match width {
            0 => 1,
            1 => 2,
            w => (1usize << (w - 1)) + self.input.read_word(w - 1, true) as usize + 1,
        };
        Ok(Token::Match { length, offset })
    }
}

/// Read one code-length table through the meta code and build its decoder.
fn parse_code_lengths(
    input: &mut BitReader<'_>,
    num_codes: usize,
    meta: &HuffmanDecoder,
) -> Result<HuffmanDecoder, DecodeError> {
    // Runs may overshoot the table; the excess is dropped.
    fn repeat(lengths: &mut [i32], i: &mut usize, count: u32, length: i32) {
        for _ in 0..count {
            if let Some(slot) = lengths.get_mut(*i) {
                *slot = length;
            }
            *i += 1;
        }
    }

    let mut lengths = vec![0i32; num_codes];
    let mut length = 0i32;
    let mut i = 0;

    while i < num_codes {
        match meta.next_symbol(input)? {
            31 => length = -1,
            32 => length += 1,
            33 => length -= 1,
            34 => {
                if input.read_bit() != 0 {
                    repeat(&mut lengths, &mut i, 1, length);
                }
            }
            35 => {
                let count = input.read_word(3, true) + 2;
                repeat(&mut lengths, &mut i, count, length);
            }
            36 => {
                let count = input.read_word(6, true) + 10;
                repeat(&mut lengths, &mut i, count, length);
            }
            val => length = val as i32 + 1,
        }
        repeat(&mut lengths, &mut i, 1, length);
    }

    HuffmanDecoder::from_lengths(&lengths, MAX_CODE_LENGTH, true)
}

impl ForkDecoder for Algorithm13Method<'_> {
    fn initialize(&mut self) -> Result<(), DecodeError> {
        self.input = BitReader::lsb(self.data);
        self.window = vec![0u8; WINDOW_SIZE];
        self.pos = 0;
        self.match_pos = 0;
        self.match_len = 0;
        self.ended = false;
        self.codes = None;
        self.codes = Some(self.read_tables()?);
        Ok(())
    }

    fn read_bytes(&mut self, out: &mut [u8]) -> Result<Option<usize>, DecodeError> {
        if self.ended {
            return Ok(None);
        }

        let mut written = 0;
        while written < out.len() {
            if self.match_len == 0 {
                match self.next_token()? {
                    Token::Literal(byte) => {
                        self.window[self.pos & WINDOW_MASK] = byte;
                        self.pos += 1;
                        out[written] = byte;
                        written += 1;
                        continue;
                    }
                    Token::Match { length, offset } => {
                        self.match_len = length;
                        self.match_pos = self.pos.wrapping_sub(offset);
                    }
                    Token::End => {
                        self.ended = true;
                        break;
                    }
                }
            }

            let byte = self.window[self.match_pos & WINDOW_MASK];
            self.window[self.pos & WINDOW_MASK] = byte;
            self.match_pos = self.match_pos.wrapping_add(1);
            self.match_len -= 1;
            self.pos += 1;
            out[written] = byte;
            written += 1;
        }

        if self.ended && written == 0 {
            return Ok(None);
        }
        Ok(Some(written))
    }
}
