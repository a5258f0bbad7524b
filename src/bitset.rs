use std::collections::HashMap;

use crate::model::{MINUTE_MS, Ms};

const WORD_BITS: i64 = 64;

/// Sparse occupancy bitmap over fixed-width time slots.
///
/// Marking rounds outwards to whole slots, so the bitmap may report a window
/// busy when the underlying interval only grazes a slot. It never reports a
/// window free when a marked interval intersects it. Callers treat "busy" as
/// a hint and re-check exact intervals before excluding anything.
#[derive(Debug, Clone)]
pub struct AvailabilityBitset {
    slot_ms: Ms,
    words: HashMap<i64, u64>,
}

impl Default for AvailabilityBitset {
    fn default() -> Self {
        Self::new()
    }
}

impl AvailabilityBitset {
    /// One-minute slots.
    pub fn new() -> Self {
        Self::with_slot_ms(MINUTE_MS)
    }

    pub fn with_slot_ms(slot_ms: Ms) -> Self {
        Self {
            slot_ms: slot_ms.max(1),
            words: HashMap::new(),
        }
    }

    pub fn slot_ms(&self) -> Ms {
        self.slot_ms
    }

    pub fn is_empty(&self) -> bool {
        self.words.values().all(|w| *w == 0)
    }

    /// Number of busy slots.
    pub fn marked_slots(&self) -> u32 {
        self.words.values().map(|w| w.count_ones()).sum()
    }

    /// Mark `[start, end)` busy. A zero-length window marks nothing.
    pub fn mark_window(&mut self, start: Ms, end: Ms) {
        let Some((first, last)) = self.slot_range(start, end) else {
            return;
        };
        for_each_word(first, last, |word, mask| {
            *self.words.entry(word).or_insert(0) |= mask;
        });
    }

    /// True when no marked slot intersects `[start, end)`.
    pub fn is_window_free(&self, start: Ms, end: Ms) -> bool {
        let Some((first, last)) = self.slot_range(start, end) else {
            return true;
        };
        let mut free = true;
        for_each_word(first, last, |word, mask| {
            if free && self.words.get(&word).is_some_and(|w| w & mask != 0) {
                free = false;
            }
        });
        free
    }

    /// Slot indices `[first, last)` covering the window, rounded outwards.
    fn slot_range(&self, start: Ms, end: Ms) -> Option<(i64, i64)> {
        if end <= start {
            return None;
        }
        let first = start.div_euclid(self.slot_ms);
        let last = -((-end).div_euclid(self.slot_ms));
        Some((first, last))
    }
}

/// Visit each 64-bit word touched by slots `[first, last)` with the mask of
/// bits inside the range.
fn for_each_word(first: i64, last: i64, mut f: impl FnMut(i64, u64)) {
    let mut slot = first;
    while slot < last {
        let word = slot.div_euclid(WORD_BITS);
        let bit = slot.rem_euclid(WORD_BITS);
        let upto = last.min((word + 1) * WORD_BITS);
        let width = upto - slot;
        let mask = if width == WORD_BITS {
            u64::MAX
        } else {
            ((1u64 << width) - 1) << bit
        };
        f(word, mask);
        slot = upto;
    }
}
