use super::ForkDecoder;
use crate::bits::BitReader;
use crate::DecodeError;
use log::debug;

const ARITH_BITS: u32 = 26;
const ARITH_ONE: u32 = 1 << (ARITH_BITS - 1);
const ARITH_HALF: u32 = 1 << (ARITH_BITS - 2);

// Bits the coder may legitimately read past the end of its input while
// draining its register.
const MAX_OVERRUN_BITS: u32 = 2 * ARITH_BITS;

const SELECTOR_END_OF_BLOCK: u16 = 10;

#[derive(Debug, Clone)]
struct ArithmeticModel {
    first_symbol: u16,
    frequencies: Vec<u16>,
    total_frequency: u32,
    increment: u16,
    limit: u32,
}

impl ArithmeticModel {
    fn new(first_symbol: u16, num_symbols: usize, increment: u16, limit: u32) -> Self {
        Self {
            first_symbol,
            frequencies: vec![increment; num_symbols],
            total_frequency: num_symbols as u32 * increment as u32,
            increment,
            limit,
        }
    }

    fn reset(&mut self) {
        self.frequencies.fill(self.increment);
        self.total_frequency = self.frequencies.len() as u32 * self.increment as u32;
    }

    fn update(&mut self, index: usize) {
        self.frequencies[index] += self.increment;
        self.total_frequency += self.increment as u32;
        if self.total_frequency > self.limit {
            self.total_frequency = 0;
            for f in &mut self.frequencies {
                *f = (*f + 1) >> 1;
                self.total_frequency += *f as u32;
            }
        }
    }
}

fn mtf_models() -> [ArithmeticModel; 7] {
    [
        ArithmeticModel::new(2, 2, 8, 1024),
        ArithmeticModel::new(4, 4, 4, 1024),
        ArithmeticModel::new(8, 8, 4, 1024),
        ArithmeticModel::new(16, 16, 4, 1024),
        ArithmeticModel::new(32, 32, 2, 1024),
        ArithmeticModel::new(64, 64, 2, 1024),
        ArithmeticModel::new(128, 128, 1, 1024),
    ]
}

struct ArithmeticDecoder<'a> {
    reader: BitReader<'a>,
    range: u32,
    code: u32,
    overrun: u32,
}

impl<'a> ArithmeticDecoder<'a> {
    fn new(reader: BitReader<'a>) -> Self {
        let mut decoder = Self {
            reader,
            range: ARITH_ONE,
            code: 0,
            overrun: 0,
        };
        for _ in 0..ARITH_BITS {
            decoder.code = (decoder.code << 1) | decoder.next_bit();
        }
        decoder
    }

    fn next_bit(&mut self) -> u32 {
        if self.reader.has_ended(0) {
            self.overrun += 1;
        }
        self.reader.read_bit()
    }

    fn next_symbol(&mut self, model: &mut ArithmeticModel) -> Result<u16, DecodeError> {
        if self.overrun > MAX_OVERRUN_BITS {
            return Err(DecodeError::Arsenic("input exhausted"));
        }

        let renorm_factor = self.range / model.total_frequency;
        if renorm_factor == 0 {
            return Err(DecodeError::Arsenic("arithmetic range underflow"));
        }
        // May exceed the total; the remainder of the range belongs to the
        // last symbol.
        let freq = self.code / renorm_factor;

        let last = model.frequencies.len() - 1;
        let mut cumulative = 0u32;
        let mut n = 0;
        while n < last && cumulative + model.frequencies[n] as u32 <= freq {
            cumulative += model.frequencies[n] as u32;
            n += 1;
        }

        let sym_size = model.frequencies[n] as u32;
        let low_incr = renorm_factor * cumulative;
        self.code -= low_incr;
        if cumulative + sym_size == model.total_frequency {
            self.range -= low_incr;
        } else {
            self.range = sym_size * renorm_factor;
        }

        while self.range <= ARITH_HALF {
            self.range <<= 1;
            self.code = (self.code << 1) | self.next_bit();
        }

        model.update(n);
        Ok(model.first_symbol + n as u16)
    }

    /// `n` binary symbols, least significant first.
    fn read_bit_string(&mut self, model: &mut ArithmeticModel, n: u32) -> Result<u32, DecodeError> {
        let mut res = 0;
        for i in 0..n {
            if self.next_symbol(model)? != 0 {
                res |= 1 << i;
            }
        }
        Ok(res)
    }
}

struct Arsenic<'a> {
    decoder: ArithmeticDecoder<'a>,
    initial: ArithmeticModel,
    selector: ArithmeticModel,
    mtf_models: [ArithmeticModel; 7],
    block_bits: u32,
}

impl<'a> Arsenic<'a> {
    fn start(data: &'a [u8]) -> Result<Self, DecodeError> {
        let mut decoder = ArithmeticDecoder::new(BitReader::msb(data));
        let mut initial = ArithmeticModel::new(0, 2, 1, 256);

        if decoder.read_bit_string(&mut initial, 8)? != 'A' as u32
            || decoder.read_bit_string(&mut initial, 8)? != 's' as u32
        {
            return Err(DecodeError::Arsenic("invalid signature"));
        }
        let block_bits = decoder.read_bit_string(&mut initial, 4)? + 9;
        debug!("Arsenic: {} byte blocks", 1u32 << block_bits);

        Ok(Self {
            decoder,
            initial,
            selector: ArithmeticModel::new(0, 11, 8, 1024),
            mtf_models: mtf_models(),
            block_bits,
        })
    }

    /// Decode the next block into `out`. Returns false at the end of the
    /// stream.
    fn next_block(&mut self, out: &mut Vec<u8>) -> Result<bool, DecodeError> {
        if self.decoder.next_symbol(&mut self.initial)? != 0 {
            return Ok(false);
        }
        let randomized = self.decoder.next_symbol(&mut self.initial)? != 0;
        let primary = self
            .decoder
            .read_bit_string(&mut self.initial, self.block_bits)? as usize;

        let block = self.read_mtf_block()?;
        if primary >= block.len() {
            return Err(DecodeError::Arsenic("transform index out of range"));
        }

        self.selector.reset();
        for m in &mut self.mtf_models {
            m.reset();
        }

        unsort_block(&block, primary, randomized, out);
        Ok(true)
    }

    fn read_mtf_block(&mut self) -> Result<Vec<u8>, DecodeError> {
        let block_size = 1usize << self.block_bits;
        let mut block = Vec::with_capacity(block_size.min(1 << 16));
        let mut mtf: Vec<u8> = (0..=255).collect();

        let push = |block: &mut Vec<u8>, byte: u8, count: usize| {
            if block.len() + count > block_size {
                return Err(DecodeError::Arsenic("block overflow"));
            }
            block.resize(block.len() + count, byte);
            Ok(())
        };

        let mut sel = self.decoder.next_symbol(&mut self.selector)?;
        loop {
            if sel <= 1 {
                // Zero run in bijective base two.
                let mut state = 1usize;
                let mut count = 0usize;
                while sel <= 1 {
                    count += if sel == 0 { state } else { 2 * state };
                    state = state.saturating_mul(2);
                    if count > block_size {
                        return Err(DecodeError::Arsenic("block overflow"));
                    }
                    sel = self.decoder.next_symbol(&mut self.selector)?;
                }
                push(&mut block, mtf[0], count)?;
                continue;
            }
            if sel == SELECTOR_END_OF_BLOCK {
                return Ok(block);
            }

            let index = if sel == 2 {
                1
            } else {
                let model = &mut self.mtf_models[sel as usize - 3];
                self.decoder.next_symbol(model)? as usize
            };
            let byte = mtf.remove(index);
            mtf.insert(0, byte);
            push(&mut block, byte, 1)?;

            sel = self.decoder.next_symbol(&mut self.selector)?;
        }
    }
}

/// Invert the Burrows-Wheeler transform of `block`, undo randomisation and
/// expand the final run-length stage into `out`.
fn unsort_block(block: &[u8], primary: usize, randomized: bool, out: &mut Vec<u8>) {
    let mut counts = [0usize; 256];
    for &b in block {
        counts[b as usize] += 1;
    }
    let mut next = [0usize; 256];
    let mut sum = 0;
    for (slot, count) in next.iter_mut().zip(counts) {
        *slot = sum;
        sum += count;
    }
    let mut transform = vec![0usize; block.len()];
    for (i, &b) in block.iter().enumerate() {
        transform[next[b as usize]] = i;
        next[b as usize] += 1;
    }

    let mut idx = primary;
    let mut rand_idx = 0;
    let mut rand_pos = RANDOMIZATION_TABLE[0] as usize;
    let mut run = 0;
    let mut last = 0u8;

    for count in 0..block.len() {
        idx = transform[idx];
        let mut b = block[idx];
        if randomized && rand_pos == count {
            b ^= 1;
            rand_idx = (rand_idx + 1) & 255;
            rand_pos += RANDOMIZATION_TABLE[rand_idx] as usize;
        }

        // Four equal bytes are followed by a count of further repeats.
        if run == 4 {
            run = 0;
            out.resize(out.len() + b as usize, last);
            continue;
        }
        if b == last {
            run += 1;
        } else {
            run = 1;
            last = b;
        }
        out.push(b);
    }
}

/// Method 15: Arsenic (BWT, move-to-front and adaptive arithmetic coding).
pub struct ArsenicMethod<'a> {
    data: &'a [u8],
    state: Option<Arsenic<'a>>,
    block: Vec<u8>,
    block_pos: usize,
}

impl<'a> ArsenicMethod<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            state: None,
            block: Vec::new(),
            block_pos: 0,
        }
    }
}

impl ForkDecoder for ArsenicMethod<'_> {
    fn initialize(&mut self) -> Result<(), DecodeError> {
        self.state = Some(Arsenic::start(self.data)?);
        self.block.clear();
        self.block_pos = 0;
        Ok(())
    }

    fn read_bytes(&mut self, out: &mut [u8]) -> Result<Option<usize>, DecodeError> {
        let mut written = 0;
        while written < out.len() {
            if self.block_pos == self.block.len() {
                let Some(state) = self.state.as_mut() else {
                    break;
                };
                self.block.clear();
                self.block_pos = 0;
                if !state.next_block(&mut self.block)? {
                    self.state = None;
                }
                continue;
            }
            let len = (self.block.len() - self.block_pos).min(out.len() - written);
            out[written..written + len]
                .copy_from_slice(&self.block[self.block_pos..self.block_pos + len]);
            self.block_pos += len;
            written += len;
        }

        if written == 0 && self.state.is_none() {
            return Ok(None);
        }
        Ok(Some(written))
    }
}

const RANDOMIZATION_TABLE: [u16; 256] = [
    0xee, 0x56, 0xf8, 0xc3, 0x9d, 0x9f, 0xae, 0x2c, 0xad, 0xcd, 0x24, 0x9d, 0xa6, 0x101, 0x18,
    0xb9, 0xa1, 0x82, 0x75, 0xe9, 0x9f, 0x55, 0x66, 0x6a, 0x86, 0x71, 0xdc, 0x84, 0x56, 0x96, 0x56,
    0xa1, 0x84, 0x78, 0xb7, 0x32, 0x6a, 0x3, 0xe3, 0x2, 0x11, 0x101, 0x8, 0x44, 0x83, 0x100, 0x43,
    0xe3, 0x1c, 0xf0, 0x86, 0x6a, 0x6b, 0xf, 0x3, 0x2d, 0x86, 0x17, 0x7b, 0x10, 0xf6, 0x80, 0x78,
    0x7a, 0xa1, 0xe1, 0xef, 0x8c, 0xf6, 0x87, 0x4b, 0xa7, 0xe2, 0x77, 0xfa, 0xb8, 0x81, 0xee, 0x77,
    0xc0, 0x9d, 0x29, 0x20, 0x27, 0x71, 0x12, 0xe0, 0x6b, 0xd1, 0x7c, 0xa, 0x89, 0x7d, 0x87, 0xc4,
    0x101, 0xc1, 0x31, 0xaf, 0x38, 0x3, 0x68, 0x1b, 0x76, 0x79, 0x3f, 0xdb, 0xc7, 0x1b, 0x36, 0x7b,
    0xe2, 0x63, 0x81, 0xee, 0xc, 0x63, 0x8b, 0x78, 0x38, 0x97, 0x9b, 0xd7, 0x8f, 0xdd, 0xf2, 0xa3,
    0x77, 0x8c, 0xc3, 0x39, 0x20, 0xb3, 0x12, 0x11, 0xe, 0x17, 0x42, 0x80, 0x2c, 0xc4, 0x92, 0x59,
    0xc8, 0xdb, 0x40, 0x76, 0x64, 0xb4, 0x55, 0x1a, 0x9e, 0xfe, 0x5f, 0x6, 0x3c, 0x41, 0xef, 0xd4,
    0xaa, 0x98, 0x29, 0xcd, 0x1f, 0x2, 0xa8, 0x87, 0xd2, 0xa0, 0x93, 0x98, 0xef, 0xc, 0x43, 0xed,
    0x9d, 0xc2, 0xeb, 0x81, 0xe9, 0x64, 0x23, 0x68, 0x1e, 0x25, 0x57, 0xde, 0x9a, 0xcf, 0x7f, 0xe5,
    0xba, 0x41, 0xea, 0xea, 0x36, 0x1a, 0x28, 0x79, 0x20, 0x5e, 0x18, 0x4e, 0x7c, 0x8e, 0x58, 0x7a,
    0xef, 0x91, 0x2, 0x93, 0xbb, 0x56, 0xa1, 0x49, 0x1b, 0x79, 0x92, 0xf3, 0x58, 0x4f, 0x52, 0x9c,
    0x2, 0x77, 0xaf, 0x2a, 0x8f, 0x49, 0xd0, 0x99, 0x4d, 0x98, 0x101, 0x60, 0x93, 0x100, 0x75,
    0x31, 0xce, 0x49, 0x20, 0x56, 0x57, 0xe2, 0xf5, 0x26, 0x2b, 0x8a, 0xbf, 0xde, 0xd0, 0x83, 0x34,
    0xf4, 0x17,
];
