//! Prefix-code decoder shared by Algorithm 13 and its meta-code.
//!
//! The tree lives in an arena addressed by index so a node can point back at
//! itself, which is how "repeat this bit" codes are represented. A flat table
//! indexed by the next `table_size` input bits resolves short codes in one
//! step; longer codes continue with a bit-by-bit walk from the node stored in
//! the table.

use crate::bits::{BitOrder, BitReader};
use crate::DecodeError;

/// Widest lookup table built by [`HuffmanDecoder::make_table`].
pub const MAX_TABLE_BITS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Branch([Option<u32>; 2]),
    Leaf(u32),
}

const EMPTY: Node = Node::Branch([None, None]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Invalid,
    Symbol { value: u32, length: u32 },
    // The prefix is still ambiguous after `table_size` bits; keep walking
    // from this node.
    Subtree(u32),
}

#[derive(Debug, Clone)]
struct Table {
    bits: u32,
    order: BitOrder,
    slots: Vec<Slot>,
}

/// Huffman decoder built from explicit codes or a canonical length table.
#[derive(Debug, Clone)]
pub struct HuffmanDecoder {
    nodes: Vec<Node>,
    min_length: u32,
    max_length: u32,
    table: Option<Table>,
}

impl Default for HuffmanDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HuffmanDecoder {
    /// Empty decoder holding only the root node.
    pub fn new() -> Self {
        Self {
            nodes: vec![EMPTY],
            min_length: u32::MAX,
            max_length: 0,
            table: None,
        }
    }

    /// Canonical construction from a table of code lengths.
    ///
    /// Codes are handed out in increasing length, ties broken by ascending
    /// symbol index. Lengths outside `1..=max_code_length` are skipped. When
    /// `zero_prefixed` is false every code is bit-inverted.
    pub fn from_lengths(
        lengths: &[i32],
        max_code_length: u32,
        zero_prefixed: bool,
    ) -> Result<Self, DecodeError> {
        let mut decoder = Self::new();
        let mut code: u32 = 0;
        let mut symbols_left = lengths.len();

        for length in 1..=max_code_length {
            for (symbol, &len) in lengths.iter().enumerate() {
                if len != length as i32 {
                    continue;
                }
                let assigned = if zero_prefixed { code } else { !code };
                decoder.add_value(symbol as u32, assigned, length)?;
                code = code.wrapping_add(1);

                symbols_left -= 1;
                if symbols_left == 0 {
                    return Ok(decoder);
                }
            }
            code = code.wrapping_shl(1);
        }
        Ok(decoder)
    }

    /// Insert `value` under the low `length` bits of `code`, most significant
    /// bit first.
    pub fn add_value(&mut self, value: u32, code: u32, length: u32) -> Result<(), DecodeError> {
        self.insert(value, code, length, None)
    }

    /// Insert a code whose bit at `repeat_pos` (counted from the least
    /// significant end) may repeat any number of times.
    ///
    /// The bit at `repeat_pos` and the one below it must differ: the lower one
    /// terminates the run. `repeat_pos == length` means no repeat.
    pub fn add_value_repeating(
        &mut self,
        value: u32,
        code: u32,
        length: u32,
        repeat_pos: u32,
    ) -> Result<(), DecodeError> {
        if repeat_pos == length {
            return self.insert(value, code, length, None);
        }
        if repeat_pos == 0 || repeat_pos > length {
            return Err(DecodeError::InvalidRepeatPosition);
        }
        let boundary = (code >> (repeat_pos - 1)) & 3;
        if boundary == 0 || boundary == 3 {
            return Err(DecodeError::InvalidRepeatPosition);
        }
        self.insert(value, code, length, Some(repeat_pos))
    }

    /// Like [`add_value`](Self::add_value) for codes stored least significant
    /// bit first.
    pub fn add_value_lsb(&mut self, value: u32, code: u32, length: u32) -> Result<(), DecodeError> {
        self.add_value(value, reverse_bits(code, length), length)
    }

    /// Like [`add_value_repeating`](Self::add_value_repeating) for codes stored
    /// least significant bit first.
    pub fn add_value_lsb_repeating(
        &mut self,
        value: u32,
        code: u32,
        length: u32,
        repeat_pos: u32,
    ) -> Result<(), DecodeError> {
        self.add_value_repeating(value, reverse_bits(code, length), length, repeat_pos)
    }

    fn insert(
        &mut self,
        value: u32,
        code: u32,
        length: u32,
        repeat_pos: Option<u32>,
    ) -> Result<(), DecodeError> {
        if length > 32 {
            return Err(DecodeError::InvalidCodeLength(length));
        }
        self.max_length = self.max_length.max(length);
        self.min_length = self.min_length.min(length);
        self.table = None;

        let mut node = 0u32;
        let mut bitpos = length as i64 - 1;
        while bitpos >= 0 {
            let bit = ((code >> bitpos) & 1) as usize;
            let branches = match self.nodes[node as usize] {
                Node::Leaf(_) => return Err(DecodeError::PrefixExists),
                Node::Branch(b) => b,
            };

            if repeat_pos == Some(bitpos as u32) {
                if branches[bit].is_some() {
                    return Err(DecodeError::InvalidRepeatingCode);
                }
                let repeat_node = self.new_node();
                let next_node = self.new_node();
                self.set_branch(node, bit, repeat_node);
                self.set_branch(repeat_node, bit, repeat_node);
                self.set_branch(repeat_node, bit ^ 1, next_node);
                node = next_node;
                // The terminating bit was consumed by the repeat node.
                bitpos -= 2;
            } else {
                node = match branches[bit] {
                    Some(next) => next,
                    None => {
                        let next = self.new_node();
                        self.set_branch(node, bit, next);
                        next
                    }
                };
                bitpos -= 1;
            }
        }

        if self.nodes[node as usize] != EMPTY {
            return Err(DecodeError::PrefixExists);
        }
        self.nodes[node as usize] = Node::Leaf(value);
        Ok(())
    }

    fn new_node(&mut self) -> u32 {
        self.nodes.push(EMPTY);
        (self.nodes.len() - 1) as u32
    }

    fn set_branch(&mut self, node: u32, bit: usize, next: u32) {
        if let Node::Branch(branches) = &mut self.nodes[node as usize] {
            branches[bit] = Some(next);
        }
    }

    /// Width in bits of the compiled lookup table, if built.
    pub fn table_bits(&self) -> Option<u32> {
        self.table.as_ref().map(|t| t.bits)
    }

    /// Compile the lookup table for a reader using `order`.
    pub fn make_table(&mut self, order: BitOrder) {
        let bits = if self.max_length < self.min_length {
            MAX_TABLE_BITS
        } else {
            self.max_length.min(MAX_TABLE_BITS)
        };

        let mut slots = vec![Slot::Invalid; 1 << bits];
        match order {
            BitOrder::Lsb => self.fill_lsb(Some(0), &mut slots, 0, 0, bits),
            BitOrder::Msb => self.fill_msb(Some(0), &mut slots, 0, 0, bits),
        }
        self.table = Some(Table { bits, order, slots });
    }

    // LSB tables: the i-th input bit is bit i of the index, so a subtree at
    // `depth` occupies every `2^depth`-th slot starting at `base`.
    fn fill_lsb(&self, node: Option<u32>, slots: &mut [Slot], base: usize, depth: u32, bits: u32) {
        let count = 1usize << (bits - depth);
        let stride = 1usize << depth;
        let fill = |slots: &mut [Slot], slot: Slot| {
            for i in 0..count {
                slots[base + i * stride] = slot;
            }
        };

        match node.map(|n| (n, self.nodes[n as usize])) {
            None => fill(slots, Slot::Invalid),
            Some((_, Node::Leaf(value))) => fill(
                slots,
                Slot::Symbol {
                    value,
                    length: depth,
                },
            ),
            Some((n, Node::Branch(branches))) => {
                if depth == bits {
                    slots[base] = Slot::Subtree(n);
                } else {
                    self.fill_lsb(branches[0], slots, base, depth + 1, bits);
                    self.fill_lsb(branches[1], slots, base + stride, depth + 1, bits);
                }
            }
        }
    }

    // MSB tables: the first input bit is the top bit of the index, so a
    // subtree occupies a contiguous range split in halves.
    fn fill_msb(&self, node: Option<u32>, slots: &mut [Slot], base: usize, depth: u32, bits: u32) {
        let count = 1usize << (bits - depth);
        let range = base..base + count;

        match node.map(|n| (n, self.nodes[n as usize])) {
            None => slots[range].fill(Slot::Invalid),
            Some((_, Node::Leaf(value))) => slots[range].fill(Slot::Symbol {
                value,
                length: depth,
            }),
            Some((n, Node::Branch(branches))) => {
                if depth == bits {
                    slots[base] = Slot::Subtree(n);
                } else {
                    self.fill_msb(branches[0], slots, base, depth + 1, bits);
                    self.fill_msb(branches[1], slots, base + count / 2, depth + 1, bits);
                }
            }
        }
    }

    /// Decode one symbol from `input`.
    pub fn next_symbol(&self, input: &mut BitReader<'_>) -> Result<u32, DecodeError> {
        let table = self.table.as_ref().ok_or(DecodeError::TableNotBuilt)?;
        debug_assert_eq!(table.order, input.order());

        let index = input.read_word(table.bits, false) as usize;
        let mut node = match table.slots[index] {
            Slot::Invalid => return Err(DecodeError::InvalidPrefix),
            Slot::Symbol { value, length } => {
                input.skip_bits(length);
                return Ok(value);
            }
            Slot::Subtree(node) => {
                input.skip_bits(table.bits);
                node
            }
        };

        loop {
            match self.nodes[node as usize] {
                Node::Leaf(value) => return Ok(value),
                Node::Branch(branches) => {
                    if input.has_ended(0) {
                        return Err(DecodeError::UnexpectedEnd);
                    }
                    let bit = input.read_bit() as usize;
                    node = branches[bit].ok_or(DecodeError::InvalidPrefix)?;
                }
            }
        }
    }
}

/// Reverse the low `length` bits of `value`.
pub fn reverse_bits(value: u32, length: u32) -> u32 {
    if length == 0 {
        0
    } else {
        value.reverse_bits() >> (32 - length)
    }
}

/// Canonical codes for `lengths`, bit-reversed so a [`crate::bits::BitWriter`]
/// emits them most significant bit first.
#[cfg(test)]
pub(crate) fn canonical_writer_codes(lengths: &[i32]) -> Vec<(u32, u32)> {
    let mut codes = vec![(0u32, 0u32); lengths.len()];
    let mut code = 0u32;
    for length in 1..=32u32 {
        for (symbol, &len) in lengths.iter().enumerate() {
            if len == length as i32 {
                codes[symbol] = (reverse_bits(code, length), length);
                code += 1;
            }
        }
        code <<= 1;
    }
    codes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::BitWriter;

    fn encode(codes: &[(u32, u32)], symbols: &[usize]) -> Vec<u8> {
        let mut w = BitWriter::new();
        for &s in symbols {
            let (code, len) = codes[s];
            w.write_bits(code, len);
        }
        w.finish()
    }

    #[test]
    fn test_canonical_assignment_is_deterministic() {
        // Lengths 2,1,3,3 give codes 10, 0, 110, 111.
        let lengths = [2, 1, 3, 3];
        let mut a = HuffmanDecoder::from_lengths(&lengths, 32, true).unwrap();
        let mut b = HuffmanDecoder::from_lengths(&lengths, 32, true).unwrap();
        a.make_table(BitOrder::Msb);
        b.make_table(BitOrder::Msb);

        // MSB stream: 0 | 10 | 110 | 111
        let data = [0b0101_1011, 0b1000_0000];
        for decoder in [&a, &b] {
            let mut r = BitReader::msb(&data);
            let decoded: Vec<u32> = (0..4).map(|_| decoder.next_symbol(&mut r).unwrap()).collect();
            assert_eq!(decoded, vec![1, 0, 2, 3]);
        }
    }

    #[test]
    fn test_round_trip_short_codes() {
        let lengths = [3, 3, 3, 3, 3, 2, 4, 4];
        let codes = canonical_writer_codes(&lengths);
        let mut decoder = HuffmanDecoder::from_lengths(&lengths, 32, true).unwrap();
        decoder.make_table(BitOrder::Lsb);

        let symbols = [5, 0, 7, 6, 1, 2, 3, 4, 5, 5, 7];
        let data = encode(&codes, &symbols);
        let mut r = BitReader::lsb(&data);
        for &s in &symbols {
            assert_eq!(decoder.next_symbol(&mut r).unwrap(), s as u32);
        }
    }

    #[test]
    fn test_round_trip_codes_longer_than_table() {
        // A skewed code reaching 14 bits forces tree walks past the table.
        let mut lengths: Vec<i32> = (1..=14).collect();
        lengths.push(14);
        let codes = canonical_writer_codes(&lengths);
        let mut decoder = HuffmanDecoder::from_lengths(&lengths, 32, true).unwrap();
        decoder.make_table(BitOrder::Lsb);
        assert_eq!(decoder.table_bits(), Some(MAX_TABLE_BITS));

        let symbols: Vec<usize> = vec![14, 0, 13, 9, 10, 11, 1, 12, 14, 3];
        let data = encode(&codes, &symbols);
        let mut r = BitReader::lsb(&data);
        for &s in &symbols {
            assert_eq!(decoder.next_symbol(&mut r).unwrap(), s as u32);
        }
    }

    #[test]
    fn test_lsb_and_msb_tables_agree() {
        let lengths = [4, 4, 3, 2, 2, 3, 12, 12, 11, 10, 9, 8, 7, 6, 5];
        let mut lsb = HuffmanDecoder::from_lengths(&lengths, 32, true).unwrap();
        let mut msb = lsb.clone();
        lsb.make_table(BitOrder::Lsb);
        msb.make_table(BitOrder::Msb);

        let symbols: Vec<usize> = vec![6, 0, 3, 7, 14, 8, 2, 9, 1, 10, 4];
        let codes = canonical_writer_codes(&lengths);

        let lsb_data = encode(&codes, &symbols);
        // The same bit sequence packed MSB first.
        let mut bits = Vec::new();
        for &s in &symbols {
            let (code, len) = codes[s];
            for i in 0..len {
                bits.push((code >> i) & 1);
            }
        }
        let mut msb_data = vec![0u8; bits.len().div_ceil(8)];
        for (i, bit) in bits.iter().enumerate() {
            msb_data[i / 8] |= (*bit as u8) << (7 - i % 8);
        }

        let mut lr = BitReader::lsb(&lsb_data);
        let mut mr = BitReader::msb(&msb_data);
        for &s in &symbols {
            assert_eq!(lsb.next_symbol(&mut lr).unwrap(), s as u32);
            assert_eq!(msb.next_symbol(&mut mr).unwrap(), s as u32);
        }
    }

    #[test]
    fn test_inverted_codes() {
        // With inversion, lengths 1,1 give codes 1 and 0.
        let mut decoder = HuffmanDecoder::from_lengths(&[1, 1], 32, false).unwrap();
        decoder.make_table(BitOrder::Lsb);
        let data = [0b0000_0001];
        let mut r = BitReader::lsb(&data);
        assert_eq!(decoder.next_symbol(&mut r).unwrap(), 0);
        assert_eq!(decoder.next_symbol(&mut r).unwrap(), 1);
    }

    #[test]
    fn test_prefix_collision_rejected() {
        let mut decoder = HuffmanDecoder::new();
        decoder.add_value(0, 0b10, 2).unwrap();
        assert!(matches!(
            decoder.add_value(1, 0b101, 3),
            Err(DecodeError::PrefixExists)
        ));
        assert!(matches!(
            decoder.add_value(2, 0b1, 1),
            Err(DecodeError::PrefixExists)
        ));
        assert!(matches!(
            decoder.add_value(3, 0b10, 2),
            Err(DecodeError::PrefixExists)
        ));
    }

    #[test]
    fn test_invalid_repeat_position() {
        let mut decoder = HuffmanDecoder::new();
        assert!(matches!(
            decoder.add_value_repeating(0, 0b0110, 4, 0),
            Err(DecodeError::InvalidRepeatPosition)
        ));
        // Bits 2 and 1 of 0b0110 are both set.
        assert!(matches!(
            decoder.add_value_repeating(0, 0b0110, 4, 2),
            Err(DecodeError::InvalidRepeatPosition)
        ));
        // Bits 1 and 0 of 0b1100 are both clear.
        assert!(matches!(
            decoder.add_value_repeating(0, 0b1100, 4, 1),
            Err(DecodeError::InvalidRepeatPosition)
        ));
        // Nothing was inserted.
        decoder.add_value(1, 0, 1).unwrap();
    }

    #[test]
    fn test_repeating_code() {
        // Code 1 0 1 with the bit at position 1 ('0') repeatable: matches
        // 1 0+ 1. A second plain code 0 completes the tree.
        let mut decoder = HuffmanDecoder::new();
        decoder.add_value_repeating(7, 0b101, 3, 1).unwrap();
        decoder.add_value(3, 0b0, 1).unwrap();
        decoder.make_table(BitOrder::Msb);

        // 101 | 0 | 10001 | 0
        let data = [0b1010_1000, 0b1000_0000];
        let mut r = BitReader::msb(&data);
        assert_eq!(decoder.next_symbol(&mut r).unwrap(), 7);
        assert_eq!(decoder.next_symbol(&mut r).unwrap(), 3);
        assert_eq!(decoder.next_symbol(&mut r).unwrap(), 7);
        assert_eq!(decoder.next_symbol(&mut r).unwrap(), 3);
    }

    #[test]
    fn test_repeat_position_equal_to_length_is_plain() {
        let mut decoder = HuffmanDecoder::new();
        decoder.add_value_repeating(1, 0b11, 2, 2).unwrap();
        decoder.add_value(2, 0b0, 1).unwrap();
        decoder.make_table(BitOrder::Msb);
        let data = [0b1100_0000];
        let mut r = BitReader::msb(&data);
        assert_eq!(decoder.next_symbol(&mut r).unwrap(), 1);
        assert_eq!(decoder.next_symbol(&mut r).unwrap(), 2);
    }

    #[test]
    fn test_lsb_insertion_reverses_code() {
        let mut decoder = HuffmanDecoder::new();
        // Stored LSB first: reading bits 1,1,0 selects value 9.
        decoder.add_value_lsb(9, 0b011, 3).unwrap();
        decoder.add_value_lsb(4, 0b0, 1).unwrap();
        decoder.make_table(BitOrder::Lsb);
        let data = [0b0000_0011];
        let mut r = BitReader::lsb(&data);
        assert_eq!(decoder.next_symbol(&mut r).unwrap(), 9);
        assert_eq!(decoder.next_symbol(&mut r).unwrap(), 4);
    }

    #[test]
    fn test_invalid_prefix_during_decode() {
        let mut decoder = HuffmanDecoder::new();
        decoder.add_value(0, 0b0, 1).unwrap();
        decoder.make_table(BitOrder::Lsb);
        let data = [0xFF];
        let mut r = BitReader::lsb(&data);
        assert!(matches!(
            decoder.next_symbol(&mut r),
            Err(DecodeError::InvalidPrefix)
        ));
    }

    #[test]
    fn test_table_required() {
        let decoder = HuffmanDecoder::from_lengths(&[1, 1], 32, true).unwrap();
        let mut r = BitReader::lsb(&[0]);
        assert!(matches!(
            decoder.next_symbol(&mut r),
            Err(DecodeError::TableNotBuilt)
        ));
    }

    #[test]
    fn test_truncated_long_code() {
        let mut lengths: Vec<i32> = (1..=20).collect();
        lengths.push(20);
        let mut decoder = HuffmanDecoder::from_lengths(&lengths, 32, true).unwrap();
        decoder.make_table(BitOrder::Lsb);
        // Sixteen one-bits then nothing: the walk past the table runs out of
        // input inside the all-ones branch.
        let data = [0xFF, 0xFF];
        let mut r = BitReader::lsb(&data);
        assert!(matches!(
            decoder.next_symbol(&mut r),
            Err(DecodeError::UnexpectedEnd)
        ));
    }
}
