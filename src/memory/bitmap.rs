//! Page bitmap: one bit per physical page, 1 = allocated.

use crate::config::TOTAL_PAGES;

const WORD_BITS: usize = u64::BITS as usize;
pub const BITMAP_WORDS: usize = TOTAL_PAGES.div_ceil(WORD_BITS);

pub struct PageBitmap {
    words: [u64; BITMAP_WORDS],
    len: usize,
}

impl PageBitmap {
    /// All `len` pages clear. `len` is clamped to the static capacity.
    pub const fn new(len: usize) -> Self {
        let len = if len > BITMAP_WORDS * WORD_BITS {
            BITMAP_WORDS * WORD_BITS
        } else {
            len
        };
        Self {
            words: [0; BITMAP_WORDS],
            len,
        }
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn test(&self, bit: usize) -> bool {
        debug_assert!(bit < self.len);
        self.words[bit / WORD_BITS] & (1 << (bit % WORD_BITS)) != 0
    }

    #[inline]
    pub fn set(&mut self, bit: usize) {
        debug_assert!(bit < self.len);
        self.words[bit / WORD_BITS] |= 1 << (bit % WORD_BITS);
    }

    #[inline]
    pub fn clear(&mut self, bit: usize) {
        debug_assert!(bit < self.len);
        self.words[bit / WORD_BITS] &= !(1 << (bit % WORD_BITS));
    }

    /// Number of set bits.
    pub fn count_set(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Lowest clear bit.
    pub fn first_clear(&self) -> Option<usize> {
        for (index, word) in self.words.iter().enumerate() {
            if *word != u64::MAX {
                let bit = index * WORD_BITS + word.trailing_ones() as usize;
                return (bit < self.len).then_some(bit);
            }
        }
        None
    }

    /// Lowest start of `count` consecutive clear bits.
    pub fn first_clear_run(&self, count: usize) -> Option<usize> {
        if count == 0 || count > self.len {
            return None;
        }

        let mut run = 0;
        let mut bit = 0;
        while bit < self.len {
            // skip fully allocated words in one step
            if run == 0 && bit % WORD_BITS == 0 && self.words[bit / WORD_BITS] == u64::MAX {
                bit += WORD_BITS;
                continue;
            }
            if self.test(bit) {
                run = 0;
            } else {
                run += 1;
                if run == count {
                    return Some(bit + 1 - count);
                }
            }
            bit += 1;
        }
        None
    }
}
