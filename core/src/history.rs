//! What the user picked, and after which word.
use crate::store::ShardedMap;
use crate::utils::{self, KEY_SEPARATOR, MILLIS_PER_DAY};

/// Selection timestamps per word plus repeat counts per
/// `(preceding word, word)` pair. Both keyed in normalized form.
#[derive(Debug, Default)]
pub struct SelectionHistory {
    selected: ShardedMap<u64>,
    pairs: ShardedMap<u32>,
}

fn pair_key(preceding: Option<&str>, word: &str) -> String {
    let mut key = preceding.map(utils::normalize).unwrap_or_default();
    key.push(KEY_SEPARATOR);
    key.push_str(word);
    key
}

impl SelectionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember that `word` was chosen at `now` (ms) after `preceding`.
    pub fn record(&self, word: &str, preceding: Option<&str>, now: u64) {
        let word = utils::normalize(word);
        if word.is_empty() {
            return;
        }
        self.pairs
            .update(&pair_key(preceding, &word), || 0, |n| *n = n.saturating_add(1));
        self.selected.insert(word, now);
    }

    pub fn was_selected(&self, word: &str) -> bool {
        self.selected.contains_key(&utils::normalize(word))
    }

    /// How often `word` was chosen right after `preceding`.
    pub fn context_count(&self, preceding: Option<&str>, word: &str) -> u32 {
        let word = utils::normalize(word);
        self.pairs.get(&pair_key(preceding, &word)).unwrap_or(0)
    }

    /// Previously chosen words starting with `prefix`, most recent first,
    /// paired with days elapsed since the last selection.
    pub fn recent_with_prefix(&self, prefix: &str, limit: usize, now: u64) -> Vec<(String, f32)> {
        let prefix = utils::normalize(prefix);
        let mut hits = Vec::new();
        self.selected.for_each(|w, ts| {
            if w.starts_with(prefix.as_str()) {
                hits.push((w.to_string(), *ts));
            }
        });
        hits.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        hits.into_iter()
            .take(limit)
            .map(|(w, ts)| {
                let days = now.saturating_sub(ts) as f32 / MILLIS_PER_DAY as f32;
                (w, days)
            })
            .collect()
    }

    /// Number of distinct selected words.
    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Number of distinct `(preceding, word)` pairs.
    pub fn context_len(&self) -> usize {
        self.pairs.len()
    }

    pub fn clear(&self) {
        self.selected.clear();
        self.pairs.clear();
    }
}
