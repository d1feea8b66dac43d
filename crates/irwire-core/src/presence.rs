//! Fixed-size presence bit-vector.

/// Tracks which fields of a message have been explicitly set.
///
/// Bits are indexed by a field's position in its [`MessageModel`](crate::MessageModel),
/// not by field number. The size is fixed when the vector is created.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPresence {
    words: Box<[u64]>,
    len: usize,
}

impl FieldPresence {
    /// Creates a vector of `len` cleared bits
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(64)].into_boxed_slice(),
            len,
        }
    }

    /// Number of bits
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the vector has no bits at all
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the bit at `index`
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn get(&self, index: usize) -> bool {
        assert!(index < self.len, "presence index {index} out of range {}", self.len);
        self.words[index / 64] & (1 << (index % 64)) != 0
    }

    /// Sets the bit at `index`
    pub fn set(&mut self, index: usize) {
        assert!(index < self.len, "presence index {index} out of range {}", self.len);
        self.words[index / 64] |= 1 << (index % 64);
    }

    /// Clears the bit at `index`
    pub fn clear(&mut self, index: usize) {
        assert!(index < self.len, "presence index {index} out of range {}", self.len);
        self.words[index / 64] &= !(1 << (index % 64));
    }

    /// Clears every bit
    pub fn clear_all(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
    }

    /// Number of set bits
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Returns true if no bit is set
    pub fn none(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Iterates over the indices of set bits in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |&i| self.get(i))
    }
}
