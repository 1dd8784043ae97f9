use alloc::collections::BTreeMap;

const LEVELS: usize = 5;
const TOP: usize = LEVELS - 1;

/// Sparse hierarchical bitmap over `u64` timestamps with scheduled boundary
/// events. Each level summarizes 64 entries of the level below it: a bit at
/// level `k` covers timestamps sharing a `time >> (6 * k)` prefix, so a
/// search climbs at most `LEVELS` words before scanning the sparse top level.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeBitmap {
    levels: [BTreeMap<u64, u64>; LEVELS],
}

impl TimeBitmap {
    /// Toggles the presence bit for `time`. Called exactly on empty to
    /// non-empty transitions of the timestamp's boundary record, and the
    /// reverse. Summary bits toggle only when a word transitions between
    /// empty and non-empty.
    pub fn flip(&mut self, time: u64) {
        let mut slot = time;
        for level in self.levels.iter_mut() {
            let word_key = slot >> 6;
            let bit = 1u64 << (slot & 63);

            let word = level.entry(word_key).or_insert(0);
            let was_empty = *word == 0;
            *word ^= bit;
            let now_empty = *word == 0;

            if now_empty {
                level.remove(&word_key);
            }
            if was_empty == now_empty {
                return;
            }
            slot = word_key;
        }
    }

    pub fn is_scheduled(&self, time: u64) -> bool {
        self.levels[0]
            .get(&(time >> 6))
            .is_some_and(|word| word & (1 << (time & 63)) != 0)
    }

    /// Returns the smallest scheduled timestamp in `(after, until]`, if any.
    pub fn next_scheduled(&self, after: u64, until: u64) -> Option<u64> {
        if until <= after {
            return None;
        }
        let mut slot = after + 1;

        for level in 0..TOP {
            let word_key = slot >> 6;
            if let Some(word) = self.levels[level].get(&word_key) {
                let masked = word & (u64::MAX << (slot & 63));
                if masked != 0 {
                    let found = (word_key << 6) | masked.trailing_zeros() as u64;
                    let time = self.descend(level, found);
                    return (time <= until).then_some(time);
                }
            }
            slot = word_key + 1;
        }

        // the top level is scanned over its sparse words, bounded by `until`
        let word_key = slot >> 6;
        let until_word = until >> (6 * TOP) >> 6;
        for (key, word) in self.levels[TOP].range(word_key..=until_word) {
            let masked = if *key == word_key {
                word & (u64::MAX << (slot & 63))
            } else {
                *word
            };
            if masked != 0 {
                let found = (key << 6) | masked.trailing_zeros() as u64;
                let time = self.descend(TOP, found);
                return (time <= until).then_some(time);
            }
        }

        None
    }

    fn descend(&self, mut level: usize, mut slot: u64) -> u64 {
        while level > 0 {
            level -= 1;
            // a set summary bit implies a non-empty word below it
            let word = self.levels[level]
                .get(&slot)
                .copied()
                .expect("summary bit implies a non-empty child word");
            slot = (slot << 6) | word.trailing_zeros() as u64;
        }
        slot
    }
}
