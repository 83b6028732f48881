//! Fixed-size bit vectors.
//!
//! [`BitSet`] tracks membership for the indices of an array task.
//! [`CompactArray`] packs small unsigned values (phase ordinals, attempt
//! counts) into just enough bits per item.

use serde::{Deserialize, Serialize};

const WORD_BITS: usize = 64;

fn words_for(bits: usize) -> usize {
  bits.div_ceil(WORD_BITS)
}

/// A set of indices in `[0, len)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitSet {
  len: usize,
  words: Vec<u64>,
}

impl BitSet {
  /// An empty set over `[0, len)`.
  pub fn new(len: usize) -> Self {
    Self {
      len,
      words: vec![0; words_for(len)],
    }
  }

  /// A set with every index in `[0, len)` present.
  pub fn full(len: usize) -> Self {
    let mut set = Self::new(len);
    for index in 0..len {
      set.set(index);
    }
    set
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  /// Out-of-range indices are ignored.
  pub fn set(&mut self, index: usize) {
    if index < self.len {
      self.words[index / WORD_BITS] |= 1u64 << (index % WORD_BITS);
    }
  }

  pub fn clear(&mut self, index: usize) {
    if index < self.len {
      self.words[index / WORD_BITS] &= !(1u64 << (index % WORD_BITS));
    }
  }

  pub fn is_set(&self, index: usize) -> bool {
    index < self.len && self.words[index / WORD_BITS] & (1u64 << (index % WORD_BITS)) != 0
  }

  /// Number of set indices.
  pub fn popcount(&self) -> usize {
    self.words.iter().map(|w| w.count_ones() as usize).sum()
  }

  /// Set indices in increasing order.
  pub fn iter_set(&self) -> impl Iterator<Item = usize> + '_ {
    (0..self.len).filter(move |&index| self.is_set(index))
  }

  /// Every index in `[0, len)` that is not set.
  pub fn complement(&self) -> Self {
    let mut out = Self::new(self.len);
    for index in 0..self.len {
      if !self.is_set(index) {
        out.set(index);
      }
    }
    out
  }
}

/// Fixed-length array of unsigned values, each stored in `item_size` bits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactArray {
  len: usize,
  item_size: u32,
  words: Vec<u64>,
}

impl CompactArray {
  /// An all-zero array of `len` items able to hold values up to `max_value`.
  pub fn new(len: usize, max_value: u64) -> Self {
    let item_size = (u64::BITS - max_value.leading_zeros()).max(1);
    Self {
      len,
      item_size,
      words: vec![0; words_for(len * item_size as usize)],
    }
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn item_size(&self) -> u32 {
    self.item_size
  }

  /// Largest value an item can hold.
  pub fn max_value(&self) -> u64 {
    if self.item_size >= u64::BITS {
      u64::MAX
    } else {
      (1u64 << self.item_size) - 1
    }
  }

  /// Value at `index`; zero when out of range.
  pub fn get(&self, index: usize) -> u64 {
    if index >= self.len {
      return 0;
    }

    let start = index * self.item_size as usize;
    let mut value = 0;
    for bit in 0..self.item_size as usize {
      let pos = start + bit;
      if self.words[pos / WORD_BITS] & (1u64 << (pos % WORD_BITS)) != 0 {
        value |= 1u64 << bit;
      }
    }
    value
  }

  /// Store `value` at `index`, keeping only the low `item_size` bits.
  /// Out-of-range indices are ignored.
  pub fn set(&mut self, index: usize, value: u64) {
    if index >= self.len {
      return;
    }

    let start = index * self.item_size as usize;
    for bit in 0..self.item_size as usize {
      let pos = start + bit;
      let mask = 1u64 << (pos % WORD_BITS);
      if value & (1u64 << bit) != 0 {
        self.words[pos / WORD_BITS] |= mask;
      } else {
        self.words[pos / WORD_BITS] &= !mask;
      }
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
    (0..self.len).map(move |index| self.get(index))
  }
}
