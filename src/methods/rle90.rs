use super::ForkDecoder;
use crate::DecodeError;

const RLE_MARKER: u8 = 0x90;

/// Method 1: run-length coding with `0x90` as the escape byte.
///
/// `0x90 n` repeats the previous byte `n - 2` more times; `0x90 0x00` is a
/// literal `0x90`.
pub struct Rle90Method<'a> {
    input: &'a [u8],
    pos: usize,
    last: u8,
    pending: usize,
}

impl<'a> Rle90Method<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            last: 0,
            pending: 0,
        }
    }

    fn next_input(&mut self) -> Option<u8> {
        let byte = self.input.get(self.pos).copied();
        if byte.is_some() {
            self.pos += 1;
        }
        byte
    }
}

impl ForkDecoder for Rle90Method<'_> {
    fn initialize(&mut self) -> Result<(), DecodeError> {
        self.pos = 0;
        self.last = 0;
        self.pending = 0;
        Ok(())
    }

    fn read_bytes(&mut self, out: &mut [u8]) -> Result<Option<usize>, DecodeError> {
        if self.pos >= self.input.len() && self.pending == 0 {
            return Ok(None);
        }

        let mut written = 0;
        while written < out.len() {
            if self.pending > 0 {
                let run = self.pending.min(out.len() - written);
                out[written..written + run].fill(self.last);
                written += run;
                self.pending -= run;
                continue;
            }

            let Some(byte) = self.next_input() else {
                break;
            };
            if byte != RLE_MARKER {
                self.last = byte;
                out[written] = byte;
                written += 1;
                continue;
            }

            match self.next_input() {
                // A marker cut off by the end of the fork ends the stream.
                None => break,
                Some(0) => {
                    self.last = RLE_MARKER;
                    out[written] = RLE_MARKER;
                    written += 1;
                }
                Some(count) => self.pending = (count as usize).saturating_sub(2),
            }
        }
        Ok(Some(written))
    }
}
