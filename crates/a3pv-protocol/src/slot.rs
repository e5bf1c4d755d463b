//! Command slot buffer.
//!
//! A slot is one fixed-size byte buffer. The agent views it as arrays of bytes, halfwords, words
//! and doublewords over the same storage; here that is expressed as width-specific accessors that
//! take an element index (not a byte offset). All multi-byte values are little-endian.

use core::fmt;
use core::ops::Range;

#[derive(Clone, PartialEq, Eq)]
pub struct SlotBuf {
    bytes: Vec<u8>,
}

impl SlotBuf {
    /// Zero-filled slot of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0u8; size],
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Zero the whole slot.
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    /// Number of whole `width`-byte elements that fit in the slot.
    pub fn capacity(&self, width: usize) -> usize {
        self.bytes.len() / width
    }

    fn element(&self, index: usize, width: usize) -> Range<usize> {
        let start = index * width;
        let end = start + width;
        assert!(
            end <= self.bytes.len(),
            "slot access out of range: element {index} of width {width} in a {}-byte slot",
            self.bytes.len()
        );
        start..end
    }

    pub fn read_u8(&self, index: usize) -> u8 {
        self.bytes[self.element(index, 1)][0]
    }

    pub fn write_u8(&mut self, index: usize, value: u8) {
        let range = self.element(index, 1);
        self.bytes[range][0] = value;
    }

    pub fn read_u16(&self, index: usize) -> u16 {
        let mut raw = [0u8; 2];
        raw.copy_from_slice(&self.bytes[self.element(index, 2)]);
        u16::from_le_bytes(raw)
    }

    pub fn write_u16(&mut self, index: usize, value: u16) {
        let range = self.element(index, 2);
        self.bytes[range].copy_from_slice(&value.to_le_bytes());
    }

    pub fn read_u32(&self, index: usize) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.bytes[self.element(index, 4)]);
        u32::from_le_bytes(raw)
    }

    pub fn write_u32(&mut self, index: usize, value: u32) {
        let range = self.element(index, 4);
        self.bytes[range].copy_from_slice(&value.to_le_bytes());
    }

    /// Signed view of word `index`; status words are reported this way.
    pub fn read_i32(&self, index: usize) -> i32 {
        self.read_u32(index) as i32
    }

    pub fn write_i32(&mut self, index: usize, value: i32) {
        self.write_u32(index, value as u32);
    }

    pub fn read_u64(&self, index: usize) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.bytes[self.element(index, 8)]);
        u64::from_le_bytes(raw)
    }

    pub fn write_u64(&mut self, index: usize, value: u64) {
        let range = self.element(index, 8);
        self.bytes[range].copy_from_slice(&value.to_le_bytes());
    }
}

impl fmt::Debug for SlotBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head: Vec<u32> = (0..self.capacity(4).min(8))
            .map(|i| self.read_u32(i))
            .collect();
        f.debug_struct("SlotBuf")
            .field("len", &self.bytes.len())
            .field("head_words", &head)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn views_alias_the_same_storage() {
        let mut slot = SlotBuf::new(32);
        slot.write_u64(1, 0x1122_3344_5566_7788);

        assert_eq!(slot.read_u32(2), 0x5566_7788);
        assert_eq!(slot.read_u32(3), 0x1122_3344);
        assert_eq!(slot.read_u16(4), 0x7788);
        assert_eq!(slot.read_u8(8), 0x88);
        assert_eq!(slot.read_u8(15), 0x11);
    }

    #[test]
    fn opcode_byte_is_low_byte_of_word_zero() {
        let mut slot = SlotBuf::new(16);
        slot.write_u8(0, 0x07);
        assert_eq!(slot.read_u32(0), 7);

        slot.write_i32(0, -22);
        assert_eq!(slot.read_i32(0), -22);
        assert_eq!(slot.read_u32(0), (-22i32) as u32);
    }

    #[test]
    fn clear_zeroes_everything() {
        let mut slot = SlotBuf::from_bytes(&[0xff; 24]);
        slot.clear();
        assert!(slot.as_bytes().iter().all(|&b| b == 0));
        assert_eq!(slot.capacity(8), 3);
    }

    #[test]
    #[should_panic(expected = "slot access out of range")]
    fn out_of_range_access_panics() {
        let slot = SlotBuf::new(16);
        slot.read_u64(2);
    }
}
