//! Bit and crumb level views over frame payloads.
//!
//! Payload bytes travel MSB-first. A superdense qubit carries one [`Crumb`]
//! (two consecutive bits), a sequential qubit carries one bit, and a frame may
//! switch from crumbs to bits at any crumb boundary. [`BitCursor`] walks the
//! outgoing payload and [`FrameAssembler`] rebuilds it on the receiving side
//! until the sentinel byte lands on a byte boundary.

use serde::{Deserialize, Serialize};

use crate::types::{BITS_PER_BYTE, SENTINEL};

/// A 2-bit unit. The first bit selects the phase flip, the second the bit
/// flip, so `00` is identity, `10` phase flip, `01` bit flip and `11` both.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crumb(u8);

impl Crumb {
    pub fn new(value: u8) -> Self {
        Self(value & 0b11)
    }

    pub fn from_bits(first: bool, second: bool) -> Self {
        Self(((first as u8) << 1) | second as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn first(self) -> bool {
        self.0 & 0b10 != 0
    }

    pub fn second(self) -> bool {
        self.0 & 0b01 != 0
    }

    pub fn phase_flip(self) -> bool {
        self.first()
    }

    pub fn bit_flip(self) -> bool {
        self.second()
    }
}

/// Read position over an outgoing payload, in bits.
#[derive(Debug, Clone)]
pub struct BitCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BitCursor<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn remaining_bits(&self) -> usize {
        self.bytes.len() * BITS_PER_BYTE - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining_bits() == 0
    }

    pub fn next_bit(&mut self) -> Option<bool> {
        if self.is_empty() {
            return None;
        }
        let byte = self.bytes[self.pos / BITS_PER_BYTE];
        let shift = BITS_PER_BYTE - 1 - self.pos % BITS_PER_BYTE;
        self.pos += 1;
        Some((byte >> shift) & 1 == 1)
    }

    /// Returns `None` when fewer than two bits remain.
    pub fn next_crumb(&mut self) -> Option<Crumb> {
        if self.remaining_bits() < 2 {
            return None;
        }
        let first = self.next_bit()?;
        let second = self.next_bit()?;
        Some(Crumb::from_bits(first, second))
    }
}

/// Rebuilds a payload from received bits, stopping at the first complete
/// byte equal to [`SENTINEL`].
#[derive(Debug, Default, Clone)]
pub struct FrameAssembler {
    bytes: Vec<u8>,
    current: u8,
    filled: usize,
    complete: bool,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Bits received so far, sentinel included.
    pub fn bit_count(&self) -> usize {
        self.bytes.len() * BITS_PER_BYTE + self.filled
    }

    /// Returns `true` once the sentinel has been assembled. Bits pushed after
    /// completion are ignored.
    pub fn push_bit(&mut self, bit: bool) -> bool {
        if self.complete {
            return true;
        }
        self.current = (self.current << 1) | bit as u8;
        self.filled += 1;
        if self.filled == BITS_PER_BYTE {
            let byte = self.current;
            self.current = 0;
            self.filled = 0;
            if byte == SENTINEL {
                self.complete = true;
            } else {
                self.bytes.push(byte);
            }
        }
        self.complete
    }

    pub fn push_crumb(&mut self, crumb: Crumb) -> bool {
        self.push_bit(crumb.first());
        self.push_bit(crumb.second())
    }

    /// Assembled bytes without the sentinel. Bits of an incomplete trailing
    /// byte are dropped.
    pub fn into_payload(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crumbs_follow_byte_order() {
        let data = [0b10_01_11_00u8];
        let mut cursor = BitCursor::new(&data);
        let crumbs: Vec<Crumb> = std::iter::from_fn(|| cursor.next_crumb()).collect();
        let values: Vec<u8> = crumbs.iter().map(|c| c.value()).collect();
        assert_eq!(values, vec![0b10, 0b01, 0b11, 0b00]);
        assert!(crumbs[0].phase_flip() && !crumbs[0].bit_flip());
        assert!(!crumbs[1].phase_flip() && crumbs[1].bit_flip());
    }

    #[test]
    fn test_cursor_switches_from_crumbs_to_bits() {
        let data = [0b1100_0011u8];
        let mut cursor = BitCursor::new(&data);
        assert_eq!(cursor.next_crumb(), Some(Crumb::new(0b11)));
        assert_eq!(cursor.remaining_bits(), 6);
        let rest: Vec<bool> = std::iter::from_fn(|| cursor.next_bit()).collect();
        assert_eq!(rest, vec![false, false, false, false, true, true]);
        assert!(cursor.is_empty());
        assert_eq!(cursor.next_crumb(), None);
    }

    #[test]
    fn test_assembler_stops_at_sentinel() {
        let mut assembler = FrameAssembler::new();
        let frame = [0xA5u8, SENTINEL, 0xFF];
        let mut cursor = BitCursor::new(&frame);
        let mut done = false;
        while let Some(crumb) = cursor.next_crumb() {
            done = assembler.push_crumb(crumb);
            if done {
                break;
            }
        }
        assert!(done);
        assert_eq!(assembler.bit_count(), 8);
        assert_eq!(assembler.into_payload(), vec![0xA5]);
    }

    #[test]
    fn test_assembler_mixed_crumbs_and_bits() {
        let mut assembler = FrameAssembler::new();
        assembler.push_crumb(Crumb::new(0b01));
        for bit in [false, true, false, true, false, true] {
            assembler.push_bit(bit);
        }
        for bit in [false, true, true, true, true, true, true, false] {
            assembler.push_bit(bit);
        }
        assert!(assembler.is_complete());
        assert_eq!(assembler.into_payload(), vec![0b0101_0101]);
    }
}
