use crate::error::{MachineError, Result};
use crate::word::{is_word, Word};

/// Highest addressable byte.
pub const MAX_ADDRESS: u32 = 0x10_0000;

const MEMORY_SIZE: usize = MAX_ADDRESS as usize + 1;

/// Flat byte-addressable memory. Words are 3 bytes, most significant first.
#[derive(Clone)]
pub struct Memory {
    bytes: Box<[u8]>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("size", &self.bytes.len())
            .finish()
    }
}

impl Memory {
    pub fn new() -> Self {
        Self {
            bytes: vec![0; MEMORY_SIZE].into_boxed_slice(),
        }
    }

    /// Index of `addr` with `len` bytes, if all of them are addressable.
    #[inline]
    fn range(addr: u32, len: u32) -> Result<usize> {
        match addr.checked_add(len - 1) {
            Some(last) if last <= MAX_ADDRESS => Ok(addr as usize),
            _ => Err(MachineError::AddressOutOfRange(addr)),
        }
    }

    pub fn byte(&self, addr: u32) -> Result<u8> {
        let index = Self::range(addr, 1)?;
        Ok(self.bytes[index])
    }

    pub fn set_byte(&mut self, addr: u32, value: u8) -> Result<()> {
        let index = Self::range(addr, 1)?;
        self.bytes[index] = value;
        Ok(())
    }

    pub fn word(&self, addr: u32) -> Result<Word> {
        let index = Self::range(addr, 3)?;
        let [hi, mid, lo] = [self.bytes[index], self.bytes[index + 1], self.bytes[index + 2]];
        Ok(u32::from_be_bytes([0, hi, mid, lo]))
    }

    /// Write a word. Both the address and the value are checked before any byte changes.
    pub fn set_word(&mut self, addr: u32, value: Word) -> Result<()> {
        let index = Self::range(addr, 3)?;
        if !is_word(value) {
            return Err(MachineError::ValueOutOfRange(value));
        }
        let [_, hi, mid, lo] = value.to_be_bytes();
        self.bytes[index..index + 3].copy_from_slice(&[hi, mid, lo]);
        Ok(())
    }

    /// Copy of the inclusive range `low..=high`.
    pub fn dump(&self, low: u32, high: u32) -> Result<Vec<u8>> {
        if high < low {
            return Ok(Vec::new());
        }
        let start = Self::range(low, 1)?;
        let end = Self::range(high, 1)?;
        Ok(self.bytes[start..=end].to_vec())
    }

    /// Up to `N` bytes starting at `addr`; bytes past the end of memory read as zero.
    pub fn peek<const N: usize>(&self, addr: u32) -> [u8; N] {
        let mut window = [0; N];
        let start = (addr as usize).min(MEMORY_SIZE);
        let end = start.saturating_add(N).min(MEMORY_SIZE);
        window[..end - start].copy_from_slice(&self.bytes[start..end]);
        window
    }
}
