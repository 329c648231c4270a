//! Bounded Record Buffer
//!
//! A fixed-capacity sequence with a "random replacement, newest always kept"
//! overflow policy. Appending to a full buffer never drops the new item:
//!
//! 1. the item is appended (the buffer briefly holds `max + 1` items),
//! 2. a uniformly random slot `i` in `[0, max)` is chosen,
//! 3. the appended item is moved into slot `i`, discarding its occupant.
//!
//! The newest item is therefore always retained while a uniformly random
//! older item is discarded. This is deliberately *not* reservoir sampling.

use crate::invariants::{debug_assert_bounded, debug_assert_eviction_in_range};
use rand::Rng;

/// Fixed-capacity buffer with random-replacement eviction.
#[derive(Debug, Clone)]
pub struct BoundedBuffer<T> {
    items: Vec<T>,
    max: usize,
}

impl<T> BoundedBuffer<T> {
    /// Creates an empty buffer holding at most `max` items.
    pub fn new(max: usize) -> Self {
        Self {
            // Capacity grows on demand; large maxima should not preallocate.
            items: Vec::new(),
            max,
        }
    }

    /// Appends `item`, evicting a random older item when full.
    ///
    /// Returns `true` if an item was dropped. With `max == 0` the new item
    /// itself is the one dropped.
    pub fn push<R: Rng + ?Sized>(&mut self, item: T, rng: &mut R) -> bool {
        if self.max == 0 {
            return true;
        }

        self.items.push(item);
        if self.items.len() <= self.max {
            return false;
        }

        let index = rng.gen_range(0..self.max);
        debug_assert_eviction_in_range!(index, self.max);

        // swap_remove moves the tail (the new item) into `index`
        self.items.swap_remove(index);
        debug_assert_bounded!(self.items.len(), self.max);
        true
    }

    /// Puts an unsent snapshot back in front of any newer items.
    ///
    /// Older items are sacrificed first if the combined length exceeds the
    /// maximum. Returns the number of items dropped.
    pub fn restore(&mut self, mut older: Vec<T>) -> usize {
        let newer = std::mem::take(&mut self.items);
        let total = older.len() + newer.len();
        let excess = total.saturating_sub(self.max);

        if excess >= older.len() {
            // Not even the newest records fit alongside the snapshot.
            let keep_from = newer.len().saturating_sub(self.max);
            self.items = newer.into_iter().skip(keep_from).collect();
        } else {
            older.drain(..excess);
            older.extend(newer);
            self.items = older;
        }

        debug_assert_bounded!(self.items.len(), self.max);
        excess
    }

    /// Takes the current contents, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<T> {
        std::mem::take(&mut self.items)
    }

    /// Discards all buffered items.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Maximum number of items retained.
    pub fn max(&self) -> usize {
        self.max
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}
