//! Bit-level cursor over a byte slice.
//!
//! StuffIt codecs read their symbols least-significant-bit first (Compress,
//! Algorithm 13); the Arsenic arithmetic coder reads most-significant-bit
//! first. Both orders share one reader so Huffman tables can be compiled for
//! either.

/// Order in which bits are pulled out of each byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOrder {
    /// Bit 0 of each byte first; multi-bit words are assembled LSB first.
    Lsb,
    /// Bit 7 of each byte first; multi-bit words are assembled MSB first.
    Msb,
}

/// A cursor reading bits from a byte slice.
///
/// Reads past the end yield zero bits and never touch memory outside the
/// slice. Callers that care check [`BitReader::has_ended`] first.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    // Bits already consumed from `data[pos]`, always in 0..=7.
    bit: u32,
    order: BitOrder,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8], order: BitOrder) -> Self {
        Self {
            data,
            pos: 0,
            bit: 0,
            order,
        }
    }

    /// Reader with [`BitOrder::Lsb`].
    pub fn lsb(data: &'a [u8]) -> Self {
        Self::new(data, BitOrder::Lsb)
    }

    /// Reader with [`BitOrder::Msb`].
    pub fn msb(data: &'a [u8]) -> Self {
        Self::new(data, BitOrder::Msb)
    }

    pub fn order(&self) -> BitOrder {
        self.order
    }

    /// Replace the underlying buffer and rewind.
    pub fn load(&mut self, data: &'a [u8]) {
        self.data = data;
        self.pos = 0;
        self.bit = 0;
    }

    /// Number of bits not yet consumed.
    pub fn remaining_bits(&self) -> u64 {
        let total = self.data.len() as u64 * 8;
        total.saturating_sub(self.pos as u64 * 8 + self.bit as u64)
    }

    /// True when no more than `lookahead` bits remain.
    pub fn has_ended(&self, lookahead: u32) -> bool {
        self.remaining_bits() <= lookahead as u64
    }

    /// Read `bits` (at most 32) bits, advancing the cursor unless `advance`
    /// is false.
    pub fn read_word(&mut self, bits: u32, advance: bool) -> u32 {
        debug_assert!(bits <= 32);
        let mut result: u64 = 0;
        let mut got = 0;
        let mut pos = self.pos;
        let mut bit = self.bit;

        while got < bits {
            let byte = self.data.get(pos).copied().unwrap_or(0) as u64;
            let take = (8 - bit).min(bits - got);
            let mask = (1u64 << take) - 1;
            match self.order {
                BitOrder::Lsb => {
                    result |= ((byte >> bit) & mask) << got;
                }
                BitOrder::Msb => {
                    let chunk = (byte >> (8 - bit - take)) & mask;
                    result = (result << take) | chunk;
                }
            }
            got += take;
            bit += take;
            if bit == 8 {
                bit = 0;
                pos += 1;
            }
        }

        if advance {
            self.seek_bits(pos, bit);
        }
        result as u32
    }

    pub fn read_bit(&mut self) -> u32 {
        self.read_word(1, true)
    }

    /// Advance `n` bits without decoding them.
    pub fn skip_bits(&mut self, n: u32) {
        let absolute = self.pos as u64 * 8 + self.bit as u64 + n as u64;
        self.seek_bits((absolute / 8) as usize, (absolute % 8) as u32);
    }

    /// Read a whole byte from the current byte boundary, dropping any
    /// partially consumed bits. Returns `None` at end of data.
    pub fn read_aligned_byte(&mut self) -> Option<u8> {
        if self.bit != 0 {
            self.pos += 1;
            self.bit = 0;
        }
        let byte = self.data.get(self.pos).copied();
        if byte.is_some() {
            self.pos += 1;
        }
        byte
    }

    fn seek_bits(&mut self, pos: usize, bit: u32) {
        if pos >= self.data.len() {
            self.pos = self.data.len();
            self.bit = 0;
        } else {
            self.pos = pos;
            self.bit = bit;
        }
    }
}

/// LSB-first bit writer used by tests to build compressed streams.
#[cfg(test)]
pub(crate) struct BitWriter {
    data: Vec<u8>,
    bit_buf: u64,
    bits_in_buf: u32,
}

#[cfg(test)]
impl BitWriter {
    pub(crate) fn new() -> Self {
        Self {
            data: Vec::new(),
            bit_buf: 0,
            bits_in_buf: 0,
        }
    }

    pub(crate) fn write_bits(&mut self, bits: u32, n: u32) {
        if n == 0 {
            return;
        }
        let masked = (bits as u64) & ((1u64 << n) - 1);
        self.bit_buf |= masked << self.bits_in_buf;
        self.bits_in_buf += n;
        while self.bits_in_buf >= 8 {
            self.data.push((self.bit_buf & 0xFF) as u8);
            self.bit_buf >>= 8;
            self.bits_in_buf -= 8;
        }
    }

    pub(crate) fn write_byte(&mut self, b: u8) {
        self.write_bits(b as u32, 8);
    }

    pub(crate) fn finish(mut self) -> Vec<u8> {
        if self.bits_in_buf > 0 {
            self.data.push((self.bit_buf & 0xFF) as u8);
        }
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lsb_words() {
        // 0b1010_1100, 0b0000_0011
        let data = [0xAC, 0x03];
        let mut r = BitReader::lsb(&data);
        assert_eq!(r.read_word(3, true), 0b100);
        assert_eq!(r.read_word(7, true), 0b11_10101);
        assert_eq!(r.remaining_bits(), 6);
        assert_eq!(r.read_word(6, true), 0);
        assert!(r.has_ended(0));
    }

    #[test]
    fn test_msb_words() {
        let data = [0xAC, 0x03];
        let mut r = BitReader::msb(&data);
        assert_eq!(r.read_word(3, true), 0b101);
        assert_eq!(r.read_word(7, true), 0b01100_00);
        assert_eq!(r.read_word(6, true), 0b000011);
    }

    #[test]
    fn test_peek_does_not_advance() {
        let data = [0xFF, 0x00];
        let mut r = BitReader::lsb(&data);
        assert_eq!(r.read_word(4, false), 0xF);
        assert_eq!(r.remaining_bits(), 16);
        r.skip_bits(6);
        assert_eq!(r.read_word(4, true), 0b0011);
    }

    #[test]
    fn test_reads_past_end_are_zero() {
        let data = [0x01];
        let mut r = BitReader::lsb(&data);
        r.skip_bits(5);
        assert_eq!(r.read_word(16, true), 0);
        assert!(r.has_ended(0));
        r.skip_bits(100);
        assert_eq!(r.remaining_bits(), 0);
        assert_eq!(r.read_bit(), 0);
    }

    #[test]
    fn test_has_ended_lookahead() {
        let data = [0u8; 2];
        let mut r = BitReader::lsb(&data);
        r.skip_bits(7);
        assert!(!r.has_ended(8));
        assert!(r.has_ended(9));
    }

    #[test]
    fn test_aligned_byte() {
        let data = [0x12, 0x34];
        let mut r = BitReader::lsb(&data);
        r.skip_bits(3);
        assert_eq!(r.read_aligned_byte(), Some(0x34));
        assert_eq!(r.read_aligned_byte(), None);
    }

    #[test]
    fn test_writer_matches_reader() {
        let mut w = BitWriter::new();
        w.write_bits(0b101, 3);
        w.write_bits(0x1FF, 9);
        w.write_byte(0x5A);
        let data = w.finish();
        let mut r = BitReader::lsb(&data);
        assert_eq!(r.read_word(3, true), 0b101);
        assert_eq!(r.read_word(9, true), 0x1FF);
        assert_eq!(r.read_word(8, true), 0x5A);
    }
}
