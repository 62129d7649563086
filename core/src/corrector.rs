//! Edit-distance spelling correction over a built-in system dictionary and a
//! user dictionary.
use ahash::AHashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

use crate::distance::bounded_levenshtein;
use crate::store::ShardedMap;
use crate::utils;
use crate::worker::{TaskHandle, TaskScope, WorkerPool};
use crate::Config;

/// Frequency given to words added without an explicit one.
pub const DEFAULT_USER_FREQUENCY: u64 = 1000;

/// Most common English words with corpus frequencies.
const BUILTIN_WORDS: &[(&str, u64)] = &[
    ("the", 1_000_000),
    ("be", 800_000),
    ("to", 750_000),
    ("of", 700_000),
    ("and", 650_000),
    ("a", 600_000),
    ("in", 550_000),
    ("that", 500_000),
    ("have", 450_000),
    ("i", 400_000),
    ("it", 380_000),
    ("for", 360_000),
    ("not", 340_000),
    ("on", 320_000),
    ("with", 300_000),
    ("he", 280_000),
    ("as", 260_000),
    ("you", 240_000),
    ("do", 220_000),
    ("at", 200_000),
    ("this", 180_000),
    ("but", 160_000),
    ("his", 140_000),
    ("by", 120_000),
    ("from", 100_000),
    ("they", 90_000),
    ("we", 85_000),
    ("say", 80_000),
    ("her", 75_000),
    ("she", 70_000),
    ("or", 65_000),
    ("an", 60_000),
    ("will", 55_000),
    ("my", 50_000),
    ("one", 48_000),
    ("all", 46_000),
    ("would", 44_000),
    ("there", 42_000),
    ("their", 40_000),
    ("what", 38_000),
    ("so", 36_000),
    ("up", 34_000),
    ("out", 32_000),
    ("if", 30_000),
    ("about", 28_000),
    ("who", 26_000),
    ("get", 24_000),
    ("which", 22_000),
    ("go", 20_000),
    ("me", 19_000),
    ("when", 18_000),
    ("make", 17_000),
    ("can", 16_000),
    ("like", 15_000),
    ("time", 14_000),
    ("no", 13_000),
    ("just", 12_000),
    ("him", 11_000),
    ("know", 10_000),
    ("take", 9_500),
    ("people", 9_000),
    ("into", 8_500),
    ("year", 8_000),
    ("your", 7_500),
    ("good", 7_000),
    ("some", 6_500),
    ("could", 6_000),
    ("them", 5_500),
    ("see", 5_000),
    ("other", 4_800),
    ("than", 4_600),
    ("then", 4_400),
    ("now", 4_200),
    ("look", 4_000),
    ("only", 3_800),
    ("come", 3_600),
    ("its", 3_400),
    ("over", 3_200),
    ("think", 3_000),
    ("also", 2_800),
    ("back", 2_600),
    ("after", 2_400),
    ("use", 2_200),
    ("two", 2_000),
    ("how", 1_900),
    ("our", 1_800),
    ("work", 1_700),
    ("first", 1_600),
    ("well", 1_500),
    ("way", 1_400),
    ("even", 1_300),
    ("new", 1_200),
    ("want", 1_100),
    ("because", 1_000),
    ("any", 950),
    ("these", 900),
    ("give", 850),
    ("day", 800),
    ("most", 750),
    ("us", 700),
];

static BUILTIN: Lazy<Arc<AHashMap<String, u64>>> = Lazy::new(|| {
    Arc::new(
        BUILTIN_WORDS
            .iter()
            .map(|(w, f)| (w.to_string(), *f))
            .collect(),
    )
});

/// How eagerly corrections are applied without asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMode {
    /// No suggestions at all
    Off,
    /// Suggest, never auto-apply
    Conservative,
    /// Auto-apply at High confidence or better
    #[default]
    Moderate,
    /// Auto-apply at Medium confidence or better
    Aggressive,
}

impl CorrectionMode {
    pub fn allows_auto_apply(self, confidence: Confidence) -> bool {
        match self {
            CorrectionMode::Off | CorrectionMode::Conservative => false,
            CorrectionMode::Moderate => confidence >= Confidence::High,
            CorrectionMode::Aggressive => confidence >= Confidence::Medium,
        }
    }
}

/// Discretized confidence of a correction, ordered worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Confidence {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl Confidence {
    pub fn from_score(score: f32) -> Self {
        if score > 0.9 {
            Confidence::VeryHigh
        } else if score > 0.7 {
            Confidence::High
        } else if score > 0.5 {
            Confidence::Medium
        } else if score > 0.3 {
            Confidence::Low
        } else {
            Confidence::VeryLow
        }
    }

    /// Tier of a candidate: its confidence boosted by how common it is.
    fn of(suggestion: &Suggestion) -> Self {
        Self::from_score(suggestion.confidence * (1.0 + suggestion.frequency as f32 / 1_000_000.0))
    }
}

/// One correction candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub word: String,
    pub original: String,
    pub confidence: f32,
    pub edit_distance: usize,
    pub frequency: u64,
    pub is_user_word: bool,
}

/// Outcome of `Corrector::suggest`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrectionResult {
    pub original: String,
    /// Replacement with the original's capitalization, set only when
    /// `should_auto_apply` is true.
    pub corrected: Option<String>,
    /// Best first.
    pub suggestions: Vec<Suggestion>,
    pub confidence: Confidence,
    pub should_auto_apply: bool,
}

impl CorrectionResult {
    fn unchanged(original: &str, confidence: Confidence) -> Self {
        Self {
            original: original.to_string(),
            corrected: None,
            suggestions: Vec::new(),
            confidence,
            should_auto_apply: false,
        }
    }

    pub fn best(&self) -> Option<&Suggestion> {
        self.suggestions.first()
    }
}

/// Observer for corrector events. All methods default to no-ops.
pub trait CorrectorListener: Send + Sync {
    fn on_correction_suggested(&self, _result: &CorrectionResult) {}
    fn on_auto_correct(&self, _original: &str, _corrected: &str) {}
    fn on_word_learned(&self, _word: &str) {}
}

/// Serializable copy of everything the user taught the corrector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserDictionarySnapshot {
    /// word -> frequency
    pub words: BTreeMap<String, u64>,
    /// word -> time it was learned (ms since epoch)
    pub learned: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    mode: CorrectionMode,
    min_word_length: usize,
    max_suggestions: usize,
    max_edit_distance: usize,
}

impl Settings {
    fn from_config(config: &Config) -> Self {
        Self {
            mode: config.correction_mode,
            min_word_length: config.min_correction_length.clamp(1, 10),
            max_suggestions: config.max_suggestions.clamp(1, 20),
            max_edit_distance: config.max_edit_distance.clamp(1, 5),
        }
    }
}

struct CorrectorState {
    system: Arc<AHashMap<String, u64>>,
    user: ShardedMap<u64>,
    learned: ShardedMap<u64>,
    /// normalized original -> applied correction
    history: ShardedMap<String>,
    settings: RwLock<Settings>,
    listener: RwLock<Option<Arc<dyn CorrectorListener>>>,
}

/// Spelling corrector. Cloning yields a handle to the same dictionaries.
#[derive(Clone)]
pub struct Corrector {
    state: Arc<CorrectorState>,
    tasks: TaskScope,
}

impl Corrector {
    /// Corrector over the built-in English dictionary.
    pub fn new(config: &Config) -> Self {
        Self::build(config, Arc::clone(&BUILTIN), TaskScope::default())
    }

    /// Same as `new`, with background work on `pool`.
    pub fn with_pool(config: &Config, pool: &Arc<WorkerPool>) -> Self {
        Self::build(config, Arc::clone(&BUILTIN), pool.scope())
    }

    /// Corrector over a caller-supplied system dictionary instead of the
    /// built-in one. Words are normalized; duplicates keep the higher
    /// frequency.
    pub fn with_system_dictionary<I, S>(config: &Config, words: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: AsRef<str>,
    {
        let mut system = AHashMap::new();
        for (w, f) in words {
            let w = utils::normalize(w.as_ref());
            if w.is_empty() {
                continue;
            }
            let slot = system.entry(w).or_insert(0);
            *slot = (*slot).max(f);
        }
        Self::build(config, Arc::new(system), TaskScope::default())
    }

    fn build(config: &Config, system: Arc<AHashMap<String, u64>>, tasks: TaskScope) -> Self {
        let state = CorrectorState {
            system,
            user: ShardedMap::new(),
            learned: ShardedMap::new(),
            history: ShardedMap::new(),
            settings: RwLock::new(Settings::from_config(config)),
            listener: RwLock::new(None),
        };
        Self {
            state: Arc::new(state),
            tasks,
        }
    }

    fn settings(&self) -> Settings {
        *self
            .state
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn update_settings(&self, f: impl FnOnce(&mut Settings)) {
        let mut s = self
            .state
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut s);
        debug!(settings = ?*s, "corrector settings updated");
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn CorrectorListener>>) {
        *self
            .state
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = listener;
    }

    fn listener(&self) -> Option<Arc<dyn CorrectorListener>> {
        self.state
            .listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn mode(&self) -> CorrectionMode {
        self.settings().mode
    }

    pub fn set_mode(&self, mode: CorrectionMode) {
        self.update_settings(|s| s.mode = mode);
    }

    pub fn set_min_word_length(&self, len: usize) {
        self.update_settings(|s| s.min_word_length = len.clamp(1, 10));
    }

    pub fn set_max_suggestions(&self, n: usize) {
        self.update_settings(|s| s.max_suggestions = n.clamp(1, 20));
    }

    pub fn set_max_edit_distance(&self, d: usize) {
        self.update_settings(|s| s.max_edit_distance = d.clamp(1, 5));
    }

    pub fn max_edit_distance(&self) -> usize {
        self.settings().max_edit_distance
    }

    // ========== Correction ==========

    /// Rank correction candidates for `word`.
    ///
    /// `preceding` is accepted for callers that track context; ranking
    /// currently depends on the word alone.
    pub fn suggest(&self, word: &str, preceding: Option<&str>) -> CorrectionResult {
        let settings = self.settings();
        let normalized = utils::normalize(word);

        if settings.mode == CorrectionMode::Off
            || normalized.chars().count() < settings.min_word_length
        {
            return CorrectionResult::unchanged(word, Confidence::VeryLow);
        }
        if self.is_known(&normalized) {
            return CorrectionResult::unchanged(word, Confidence::VeryHigh);
        }

        let mut suggestions = self.candidates(&normalized, settings.max_edit_distance);
        let Some(best) = suggestions.first() else {
            debug!(word, ?preceding, "no correction candidates");
            return CorrectionResult::unchanged(word, Confidence::VeryLow);
        };

        let confidence = Confidence::of(best);
        let should_auto_apply = settings.mode.allows_auto_apply(confidence);
        let corrected = should_auto_apply.then(|| transfer_case(&best.word, word));
        suggestions.truncate(settings.max_suggestions);

        let result = CorrectionResult {
            original: word.to_string(),
            corrected,
            suggestions,
            confidence,
            should_auto_apply,
        };
        debug!(
            word,
            ?preceding,
            candidates = result.suggestions.len(),
            confidence = ?result.confidence,
            "correction suggested"
        );

        let listener = self.listener();
        if let Some(l) = &listener {
            l.on_correction_suggested(&result);
        }
        if let Some(corrected) = &result.corrected {
            self.state.history.insert(normalized, corrected.clone());
            if let Some(l) = &listener {
                l.on_auto_correct(word, corrected);
            }
        }
        result
    }

    /// All dictionary words within `max` edits of `word` (excluding exact
    /// matches), best first.
    fn candidates(&self, word: &str, max: usize) -> Vec<Suggestion> {
        let mut out = Vec::new();
        let mut consider = |candidate: &str, frequency: u64, is_user_word: bool| {
            let d = bounded_levenshtein(word, candidate, max);
            if d == 0 || d > max {
                return;
            }
            out.push(Suggestion {
                word: candidate.to_string(),
                original: word.to_string(),
                confidence: 1.0 - d as f32 / max as f32,
                edit_distance: d,
                frequency,
                is_user_word,
            });
        };

        self.state
            .user
            .for_each(|w, f| consider(w, f.saturating_mul(2), true));
        for (w, f) in self.state.system.iter() {
            if !self.state.user.contains_key(w) {
                consider(w, *f, false);
            }
        }

        out.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| b.frequency.cmp(&a.frequency))
                .then_with(|| a.edit_distance.cmp(&b.edit_distance))
                .then_with(|| a.word.cmp(&b.word))
        });
        out
    }

    /// Background `suggest`.
    pub fn spawn_suggest(
        &self,
        word: impl Into<String>,
        preceding: Option<String>,
    ) -> TaskHandle<CorrectionResult> {
        let this = self.clone();
        let word = word.into();
        self.tasks
            .spawn(move || this.suggest(&word, preceding.as_deref()))
    }

    fn is_known(&self, normalized: &str) -> bool {
        self.state.system.contains_key(normalized)
            || self.state.user.contains_key(normalized)
            || self.state.learned.contains_key(normalized)
    }

    /// Whether `word` is in the system or user dictionary.
    pub fn is_valid_word(&self, word: &str) -> bool {
        self.is_known(&utils::normalize(word))
    }

    // ========== User dictionary ==========

    /// Add `word` with the default user frequency.
    pub fn add_word(&self, word: &str) {
        self.add_word_with_frequency(word, DEFAULT_USER_FREQUENCY);
    }

    pub fn add_word_with_frequency(&self, word: &str, frequency: u64) {
        let normalized = utils::normalize(word);
        if normalized.is_empty() {
            return;
        }
        self.state.user.insert(normalized.clone(), frequency);
        self.state.learned.insert(normalized.clone(), utils::now_millis());
        debug!(word = %normalized, frequency, "added user word");
        if let Some(l) = self.listener() {
            l.on_word_learned(&normalized);
        }
    }

    pub fn remove_word(&self, word: &str) {
        let normalized = utils::normalize(word);
        self.state.user.remove(&normalized);
        self.state.learned.remove(&normalized);
        debug!(word = %normalized, "removed user word");
    }

    /// User words sorted alphabetically, with frequencies.
    pub fn user_words(&self) -> Vec<(String, u64)> {
        let mut words = self.state.user.snapshot();
        words.sort();
        words
    }

    /// Learned words with the time they were added (ms), oldest first.
    pub fn learned_words(&self) -> Vec<(String, u64)> {
        let mut words = self.state.learned.snapshot();
        words.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        words
    }

    /// User words starting with `prefix`, most frequent first.
    pub fn user_words_with_prefix(&self, prefix: &str, limit: usize) -> Vec<(String, u64)> {
        let prefix = utils::normalize(prefix);
        let mut words = Vec::new();
        self.state.user.for_each(|w, f| {
            if w.starts_with(prefix.as_str()) {
                words.push((w.to_string(), *f));
            }
        });
        words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        words.truncate(limit);
        words
    }

    pub fn clear_user_dictionary(&self) {
        self.state.user.clear();
        self.state.learned.clear();
        debug!("user dictionary cleared");
    }

    pub fn export_user_dictionary(&self) -> UserDictionarySnapshot {
        UserDictionarySnapshot {
            words: self.state.user.snapshot().into_iter().collect(),
            learned: self.state.learned.snapshot().into_iter().collect(),
        }
    }

    /// Merge a snapshot into the user dictionary; imported entries win.
    pub fn import_user_dictionary(&self, snapshot: UserDictionarySnapshot) {
        let now = utils::now_millis();
        let mut imported = 0usize;
        for (w, f) in snapshot.words {
            let w = utils::normalize(&w);
            if w.is_empty() {
                continue;
            }
            let learned_at = snapshot.learned.get(&w).copied().unwrap_or(now);
            self.state.user.insert(w.clone(), f);
            self.state.learned.insert(w, learned_at);
            imported += 1;
        }
        debug!(imported, "user dictionary imported");
    }

    // ========== Correction history ==========

    /// Correction previously auto-applied to `original`, if any.
    pub fn correction_for(&self, original: &str) -> Option<String> {
        self.state.history.get(&utils::normalize(original))
    }

    /// All remembered `(original, corrected)` pairs, sorted by original.
    pub fn correction_history(&self) -> Vec<(String, String)> {
        let mut pairs = self.state.history.snapshot();
        pairs.sort();
        pairs
    }

    pub fn clear_history(&self) {
        self.state.history.clear();
    }

    /// Number of words in the system dictionary.
    pub fn system_dictionary_size(&self) -> usize {
        self.state.system.len()
    }

    /// Cancel queued background work and drop user data.
    pub fn release(&self) {
        self.tasks.cancel();
        self.set_listener(None);
        self.clear_user_dictionary();
        self.clear_history();
        debug!("corrector released");
    }
}

impl Default for Corrector {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl std::fmt::Debug for Corrector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Corrector")
            .field("settings", &self.settings())
            .field("system_words", &self.state.system.len())
            .field("user_words", &self.state.user.len())
            .finish()
    }
}

/// Carry the capitalization pattern of `original` over to `word`.
fn transfer_case(word: &str, original: &str) -> String {
    let mut letters = original.chars().filter(|c| c.is_alphabetic()).peekable();
    if letters.peek().is_none() {
        return word.to_string();
    }
    if letters.all(char::is_uppercase) && original.chars().filter(|c| c.is_alphabetic()).count() > 1 {
        return word.to_uppercase();
    }
    match original.chars().next() {
        Some(c) if c.is_uppercase() => {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        }
        _ => word.to_string(),
    }
}
