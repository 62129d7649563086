//! N-gram frequency model with Laplace smoothing, interpolation and time decay.
//!
//! Counts are learned online from confirmed text (`record_usage`) rather than
//! loaded from a pre-computed table. Each observed 1/2/3-gram keeps its raw
//! count, when it was last seen, and a decayed frequency that periodic
//! `apply_decay` passes shrink toward zero. Probabilities are always derived
//! from the decayed frequencies, so stale vocabulary gradually loses rank.
//!
//! Persistence lives in `ngram_io.rs`.
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;

use crate::store::ShardedMap;
use crate::utils::{self, KEY_SEPARATOR, MILLIS_PER_DAY};
use crate::worker::{TaskHandle, TaskScope, WorkerPool};
use crate::Config;

/// Arity of an n-gram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NGramType {
    Unigram,
    Bigram,
    Trigram,
}

impl NGramType {
    pub fn from_len(len: usize) -> Option<Self> {
        match len {
            1 => Some(NGramType::Unigram),
            2 => Some(NGramType::Bigram),
            3 => Some(NGramType::Trigram),
            _ => None,
        }
    }

    /// Number of tokens in an n-gram of this type.
    pub fn order(self) -> usize {
        match self {
            NGramType::Unigram => 1,
            NGramType::Bigram => 2,
            NGramType::Trigram => 3,
        }
    }

    /// Stable numeric tag used in the persisted format.
    pub fn tag(self) -> u32 {
        self.order() as u32 - 1
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        Self::from_len(tag as usize + 1)
    }
}

/// An ordered sequence of 1-3 normalized tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NGram {
    words: Vec<String>,
    kind: NGramType,
}

impl NGram {
    /// Normalize `words` and build an n-gram. Returns `None` unless 1-3
    /// tokens remain after normalization.
    pub fn new<S: AsRef<str>>(words: &[S]) -> Option<Self> {
        Self::from_normalized(utils::normalize_all(words))
    }

    pub(crate) fn from_normalized(words: Vec<String>) -> Option<Self> {
        let kind = NGramType::from_len(words.len())?;
        Some(Self { words, kind })
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn kind(&self) -> NGramType {
        self.kind
    }

    /// Lookup key: tokens joined by a separator that normalization strips.
    pub fn key(&self) -> String {
        join_key(&self.words)
    }
}

impl std::fmt::Display for NGram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.words.join(" "))
    }
}

pub(crate) fn join_key<S: AsRef<str>>(words: &[S]) -> String {
    let mut key = String::new();
    for (i, w) in words.iter().enumerate() {
        if i > 0 {
            key.push(KEY_SEPARATOR);
        }
        key.push_str(w.as_ref());
    }
    key
}

/// Statistics kept for one n-gram.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyEntry {
    pub ngram: NGram,
    pub raw_count: u64,
    /// Milliseconds since the Unix epoch.
    pub last_used: u64,
    pub decayed_frequency: f64,
}

impl FrequencyEntry {
    fn new(ngram: NGram, now: u64) -> Self {
        Self {
            ngram,
            raw_count: 0,
            last_used: now,
            decayed_frequency: 0.0,
        }
    }

    /// Fresh observations reset decay.
    fn observe(&mut self, count: u64, now: u64) -> u64 {
        self.raw_count = self.raw_count.saturating_add(count);
        self.last_used = now;
        self.decayed_frequency = self.raw_count as f64;
        self.raw_count
    }
}

/// Tunable model parameters. Field order matches the persisted layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Laplace smoothing constant α
    pub smoothing: f64,
    /// Default rate for `apply_decay`
    pub decay: f64,
    /// Decayed frequency floor used by pruning
    pub min_frequency: u32,
    /// Vocabulary ceiling that triggers pruning
    pub max_vocabulary: u32,
    /// Interpolation weight λ for trigram and bigram estimates
    pub lambda: f64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            smoothing: 0.1,
            decay: 0.95,
            min_frequency: 1,
            max_vocabulary: 100_000,
            lambda: 0.33,
        }
    }
}

impl ModelParams {
    /// Apply the given overrides, clamping each to its valid range:
    /// α and decay to [0, 1], min frequency to ≥ 1, max vocabulary to
    /// ≥ 1000, λ to [0, 0.5] (above 0.5 the unigram weight would go negative).
    pub fn with(
        mut self,
        smoothing: Option<f64>,
        decay: Option<f64>,
        min_frequency: Option<u32>,
        max_vocabulary: Option<u32>,
        lambda: Option<f64>,
    ) -> Self {
        if let Some(v) = smoothing {
            self.smoothing = clamp_f64(v, 0.0, 1.0);
        }
        if let Some(v) = decay {
            self.decay = clamp_f64(v, 0.0, 1.0);
        }
        if let Some(v) = min_frequency {
            self.min_frequency = v.max(1);
        }
        if let Some(v) = max_vocabulary {
            self.max_vocabulary = v.max(1000);
        }
        if let Some(v) = lambda {
            self.lambda = clamp_f64(v, 0.0, 0.5);
        }
        self
    }

    /// Re-clamp every field (used after deserializing).
    pub(crate) fn clamped(self) -> Self {
        ModelParams::default().with(
            Some(self.smoothing),
            Some(self.decay),
            Some(self.min_frequency),
            Some(self.max_vocabulary),
            Some(self.lambda),
        )
    }
}

fn clamp_f64(v: f64, lo: f64, hi: f64) -> f64 {
    if v.is_nan() {
        lo
    } else {
        v.clamp(lo, hi)
    }
}

/// Observer for model events. All methods default to no-ops.
pub trait ModelListener: Send + Sync {
    /// A unigram was observed for the first time.
    fn on_word_learned(&self, _word: &str, _count: u64) {}
    fn on_model_saved(&self, _success: bool) {}
    fn on_model_loaded(&self, _success: bool) {}
}

/// Snapshot of model size and parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStatistics {
    pub vocabulary_size: usize,
    pub total_unigrams: u64,
    pub total_bigrams: u64,
    pub total_trigrams: u64,
    pub unique_unigrams: usize,
    pub unique_bigrams: usize,
    pub unique_trigrams: usize,
    pub params: ModelParams,
}

pub(crate) struct ModelState {
    pub(crate) unigrams: ShardedMap<FrequencyEntry>,
    pub(crate) bigrams: ShardedMap<FrequencyEntry>,
    pub(crate) trigrams: ShardedMap<FrequencyEntry>,
    /// Sum of raw counts per order: [unigram, bigram, trigram]
    pub(crate) totals: [AtomicU64; 3],
    pub(crate) params: RwLock<ModelParams>,
    pub(crate) path: RwLock<Option<PathBuf>>,
    pub(crate) listener: RwLock<Option<Arc<dyn ModelListener>>>,
    /// Learning takes this shared; prune, load and clear take it exclusively
    /// so no n-gram can be inserted while referential integrity is enforced.
    pub(crate) structure: RwLock<()>,
    /// Serializes save/load against each other.
    pub(crate) io_lock: Mutex<()>,
}

/// Persistent unigram/bigram/trigram model.
///
/// Cloning is cheap and yields a handle to the same underlying model.
#[derive(Clone)]
pub struct FrequencyModel {
    pub(crate) state: Arc<ModelState>,
    pub(crate) tasks: TaskScope,
}

impl FrequencyModel {
    /// Create an empty model configured from `config`, running background
    /// work on the shared pool.
    pub fn new(config: &Config) -> Self {
        Self::with_scope(config, TaskScope::default())
    }

    /// Create an empty model whose background work runs on `pool`.
    pub fn with_pool(config: &Config, pool: &Arc<WorkerPool>) -> Self {
        Self::with_scope(config, pool.scope())
    }

    fn with_scope(config: &Config, tasks: TaskScope) -> Self {
        let state = ModelState {
            unigrams: ShardedMap::new(),
            bigrams: ShardedMap::new(),
            trigrams: ShardedMap::new(),
            totals: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
            params: RwLock::new(config.model_params()),
            path: RwLock::new(config.model_path.clone()),
            listener: RwLock::new(None),
            structure: RwLock::new(()),
            io_lock: Mutex::new(()),
        };
        Self {
            state: Arc::new(state),
            tasks,
        }
    }

    /// Create a model and restore it from `config.model_path`.
    ///
    /// A missing file is a cold start. A failed load is logged and leaves the
    /// model empty; call `load()` directly to observe the error.
    pub fn open(config: &Config) -> Self {
        let model = Self::new(config);
        if model.path().is_some() {
            // failure already logged by load()
            let _ = model.load();
        }
        model
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn ModelListener>>) {
        *self
            .state
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = listener;
    }

    pub(crate) fn listener(&self) -> Option<Arc<dyn ModelListener>> {
        self.state
            .listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn path(&self) -> Option<PathBuf> {
        self.state
            .path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_path(&self, path: Option<PathBuf>) {
        *self.state.path.write().unwrap_or_else(PoisonError::into_inner) = path;
    }

    pub fn params(&self) -> ModelParams {
        *self
            .state
            .params
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn replace_params(&self, params: ModelParams) {
        *self
            .state
            .params
            .write()
            .unwrap_or_else(PoisonError::into_inner) = params.clamped();
    }

    /// Update any subset of parameters. Values are clamped, never rejected.
    pub fn set_parameters(
        &self,
        smoothing: Option<f64>,
        decay: Option<f64>,
        min_frequency: Option<u32>,
        max_vocabulary: Option<u32>,
        lambda: Option<f64>,
    ) {
        let mut params = self
            .state
            .params
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *params = params.with(smoothing, decay, min_frequency, max_vocabulary, lambda);
        debug!(params = ?*params, "frequency model parameters updated");
    }

    fn map(&self, kind: NGramType) -> &ShardedMap<FrequencyEntry> {
        match kind {
            NGramType::Unigram => &self.state.unigrams,
            NGramType::Bigram => &self.state.bigrams,
            NGramType::Trigram => &self.state.trigrams,
        }
    }

    // ========== Learning ==========

    /// Learn from a confirmed word sequence.
    ///
    /// Every token updates its unigram, every adjacent pair its bigram and
    /// every adjacent triple its trigram. Pruning runs afterwards if the
    /// vocabulary outgrew its ceiling.
    pub fn record_usage<S: AsRef<str>>(&self, words: &[S]) {
        self.record_usage_at(words, utils::now_millis());
    }

    /// `record_usage` with an explicit timestamp (ms since epoch).
    pub fn record_usage_at<S: AsRef<str>>(&self, words: &[S], now: u64) {
        let words = utils::normalize_all(words);
        if words.is_empty() {
            return;
        }

        let mut learned = Vec::new();
        {
            let _shared = self
                .state
                .structure
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            for n in 1..=3 {
                for window in words.windows(n) {
                    if self.observe(window, 1, now) {
                        learned.push(window[0].as_str());
                    }
                }
            }
        }
        self.notify_learned(&learned);
        debug!(tokens = words.len(), "recorded usage");

        let max_vocab = self.params().max_vocabulary as usize;
        if self.vocabulary_size() > max_vocab {
            self.prune();
        }
    }

    /// Seed an n-gram with a known count, e.g. from a frequency list.
    /// Only the given n-gram is touched, not its sub-sequences.
    pub fn insert_count<S: AsRef<str>>(&self, words: &[S], count: u64) {
        if count == 0 {
            return;
        }
        let words = utils::normalize_all(words);
        if NGramType::from_len(words.len()).is_none() {
            return;
        }
        let learned = {
            let _shared = self
                .state
                .structure
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            self.observe(&words, count, utils::now_millis())
        };
        if learned {
            self.notify_learned(&[words[0].as_str()]);
        }
    }

    /// Atomic per-key increment. Caller holds `structure` shared.
    /// Returns true when a unigram was seen for the first time.
    fn observe(&self, words: &[String], count: u64, now: u64) -> bool {
        let Some(ngram) = NGram::from_normalized(words.to_vec()) else {
            return false;
        };
        let kind = ngram.kind();
        let key = ngram.key();
        let new_count = self.map(kind).update(
            &key,
            || FrequencyEntry::new(ngram, now),
            |entry| entry.observe(count, now),
        );
        self.state.totals[kind.order() - 1].fetch_add(count, Ordering::Relaxed);
        kind == NGramType::Unigram && new_count == count
    }

    fn notify_learned(&self, words: &[&str]) {
        if words.is_empty() {
            return;
        }
        if let Some(listener) = self.listener() {
            for w in words {
                listener.on_word_learned(w, self.count(&[*w]));
            }
        }
    }

    // ========== Probabilities ==========

    fn scorer(&self) -> Scorer<'_> {
        let params = self.params();
        Scorer {
            state: &self.state,
            alpha: params.smoothing,
            lambda: params.lambda,
            vocab: self.vocabulary_size().max(1) as f64,
            total: self.state.totals[0].load(Ordering::Relaxed) as f64,
        }
    }

    /// Interpolated, smoothed probability of `word` following `context`
    /// (most recent word last). Returns 0.0 for an empty word.
    pub fn get_frequency<S: AsRef<str>>(&self, word: &str, context: &[S]) -> f64 {
        let word = utils::normalize(word);
        if word.is_empty() {
            return 0.0;
        }
        let context = utils::normalize_all(context);
        self.scorer().frequency(&word, &context)
    }

    /// Rank every known word under `context`, best first. Ties are broken
    /// lexicographically.
    pub fn get_top_words<S: AsRef<str>>(&self, n: usize, context: &[S]) -> Vec<(String, f64)> {
        self.rank_words(n, context, |_| true)
    }

    /// Like `get_top_words`, restricted to words starting with `prefix`.
    pub fn get_top_words_with_prefix<S: AsRef<str>>(
        &self,
        n: usize,
        prefix: &str,
        context: &[S],
    ) -> Vec<(String, f64)> {
        let prefix = utils::normalize(prefix);
        self.rank_words(n, context, |w| w.starts_with(prefix.as_str()))
    }

    fn rank_words<S: AsRef<str>>(
        &self,
        n: usize,
        context: &[S],
        keep: impl Fn(&str) -> bool,
    ) -> Vec<(String, f64)> {
        if n == 0 {
            return Vec::new();
        }
        let context = utils::normalize_all(context);
        let scorer = self.scorer();
        let mut scored: Vec<(String, f64)> = self
            .state
            .unigrams
            .keys()
            .into_iter()
            .filter(|w| keep(w))
            .map(|w| {
                let score = scorer.frequency(&w, &context);
                (w, score)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(n);
        scored
    }

    /// Perplexity of the model on `test_words`: exp of the negative mean
    /// log-probability. Lower is better; an empty sequence yields infinity.
    pub fn calculate_perplexity<S: AsRef<str>>(&self, test_words: &[S]) -> f64 {
        let words = utils::normalize_all(test_words);
        if words.is_empty() {
            return f64::INFINITY;
        }
        let scorer = self.scorer();
        let mut log_prob = 0.0;
        for (i, word) in words.iter().enumerate() {
            let context = &words[i.saturating_sub(2)..i];
            let p = scorer.frequency(word, context);
            log_prob += if p > 0.0 {
                p.ln()
            } else {
                scorer.floor_probability().ln()
            };
        }
        (-log_prob / words.len() as f64).exp()
    }

    // ========== Decay & pruning ==========

    /// Recompute every decayed frequency as
    /// `raw_count · e^(−rate · days_since_last_use)`.
    pub fn apply_decay(&self, rate: f64) {
        self.apply_decay_at(rate, utils::now_millis());
    }

    /// Decay with the model's configured default rate.
    pub fn apply_default_decay(&self) {
        self.apply_decay(self.params().decay);
    }

    /// `apply_decay` against an explicit clock (ms since epoch).
    ///
    /// Days are whole elapsed days. A negative or NaN rate is treated as 0.
    pub fn apply_decay_at(&self, rate: f64, now: u64) {
        let rate = if rate.is_nan() { 0.0 } else { rate.max(0.0) };
        let decay = |_: &str, entry: &mut FrequencyEntry| {
            let days = (now.saturating_sub(entry.last_used) / MILLIS_PER_DAY) as f64;
            entry.decayed_frequency = entry.raw_count as f64 * (-rate * days).exp();
        };
        self.state.unigrams.for_each_mut(decay);
        self.state.bigrams.for_each_mut(decay);
        self.state.trigrams.for_each_mut(decay);
        debug!(rate, "applied decay to all n-grams");
    }

    /// Remove unigrams whose decayed frequency fell below the floor, then
    /// every bigram/trigram that references a removed word. Returns the
    /// number of unigrams removed.
    pub fn prune(&self) -> usize {
        let floor = self.params().min_frequency as f64;
        let _exclusive = self
            .state
            .structure
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let unigrams = &self.state.unigrams;
        let bigrams = &self.state.bigrams;
        let removed = unigrams.retain(|_, e| e.decayed_frequency >= floor);
        let removed_bigrams = bigrams.retain(|_, e| {
            e.ngram.words().iter().all(|w| unigrams.contains_key(w))
        });
        let removed_trigrams = self.state.trigrams.retain(|_, e| {
            let w = e.ngram.words();
            w.iter().all(|t| unigrams.contains_key(t))
                && bigrams.contains_key(&join_key(&w[0..2]))
                && bigrams.contains_key(&join_key(&w[1..3]))
        });
        self.recompute_totals();

        debug!(
            removed,
            removed_bigrams, removed_trigrams, "pruned vocabulary"
        );
        removed
    }

    pub(crate) fn recompute_totals(&self) {
        for (i, map) in [
            &self.state.unigrams,
            &self.state.bigrams,
            &self.state.trigrams,
        ]
        .into_iter()
        .enumerate()
        {
            let mut sum = 0u64;
            map.for_each(|_, e| sum = sum.saturating_add(e.raw_count));
            self.state.totals[i].store(sum, Ordering::Relaxed);
        }
    }

    // ========== Inspection ==========

    /// Number of distinct unigrams.
    pub fn vocabulary_size(&self) -> usize {
        self.state.unigrams.len()
    }

    /// Entry for the n-gram formed by `words`, if known.
    pub fn entry<S: AsRef<str>>(&self, words: &[S]) -> Option<FrequencyEntry> {
        let ngram = NGram::new(words)?;
        self.map(ngram.kind()).get(&ngram.key())
    }

    /// Raw count for `words` (0 if unknown).
    pub fn count<S: AsRef<str>>(&self, words: &[S]) -> u64 {
        self.entry(words).map(|e| e.raw_count).unwrap_or(0)
    }

    /// All entries of one order (unordered).
    pub fn entries(&self, kind: NGramType) -> Vec<FrequencyEntry> {
        self.map(kind)
            .snapshot()
            .into_iter()
            .map(|(_, e)| e)
            .collect()
    }

    pub fn statistics(&self) -> ModelStatistics {
        ModelStatistics {
            vocabulary_size: self.vocabulary_size(),
            total_unigrams: self.state.totals[0].load(Ordering::Relaxed),
            total_bigrams: self.state.totals[1].load(Ordering::Relaxed),
            total_trigrams: self.state.totals[2].load(Ordering::Relaxed),
            unique_unigrams: self.state.unigrams.len(),
            unique_bigrams: self.state.bigrams.len(),
            unique_trigrams: self.state.trigrams.len(),
            params: self.params(),
        }
    }

    // ========== Lifecycle ==========

    /// Drop all n-grams and counters.
    pub fn clear(&self) {
        let _exclusive = self
            .state
            .structure
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        self.state.unigrams.clear();
        self.state.bigrams.clear();
        self.state.trigrams.clear();
        for t in &self.state.totals {
            t.store(0, Ordering::Relaxed);
        }
        debug!("all frequency data cleared");
    }

    /// Decay in the background with the given rate.
    pub fn spawn_decay(&self, rate: f64) -> TaskHandle<()> {
        let this = self.clone();
        self.tasks.spawn(move || this.apply_decay(rate))
    }

    /// Prune in the background.
    pub fn spawn_prune(&self) -> TaskHandle<usize> {
        let this = self.clone();
        self.tasks.spawn(move || this.prune())
    }

    /// Cancel queued background work and free all in-memory structures.
    /// Does not save; call `save()` first (or use `shutdown`).
    pub fn release(&self) {
        self.tasks.cancel();
        self.set_listener(None);
        self.clear();
        debug!("frequency model released");
    }

    /// Flush to disk (if a path is configured), then release.
    pub fn shutdown(&self) -> Result<(), crate::ModelError> {
        let saved = match self.path() {
            Some(_) => self.save(),
            None => Ok(()),
        };
        self.release();
        saved
    }
}

impl Default for FrequencyModel {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl std::fmt::Debug for FrequencyModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrequencyModel")
            .field("statistics", &self.statistics())
            .field("path", &self.path())
            .finish()
    }
}

/// Parameter snapshot used for a batch of probability lookups.
struct Scorer<'a> {
    state: &'a ModelState,
    alpha: f64,
    lambda: f64,
    vocab: f64,
    total: f64,
}

impl Scorer<'_> {
    fn decayed(map: &ShardedMap<FrequencyEntry>, key: &str) -> f64 {
        map.with(key, |e| e.decayed_frequency).unwrap_or(0.0)
    }

    /// Additive smoothing: (count + α) / (context_total + α·V), capped at 1
    /// since a seeded n-gram may outweigh its context.
    fn smooth(&self, count: f64, context_total: f64) -> f64 {
        let denom = context_total + self.alpha * self.vocab;
        if denom > 0.0 {
            ((count + self.alpha) / denom).min(1.0)
        } else {
            0.0
        }
    }

    fn unigram(&self, word: &str) -> f64 {
        let count = Self::decayed(&self.state.unigrams, word);
        self.smooth(count, self.total)
    }

    /// P(word | prev), backing off to the unigram estimate when `prev` has
    /// never been observed.
    fn bigram(&self, word: &str, prev: &str) -> f64 {
        let context_count = Self::decayed(&self.state.unigrams, prev);
        if context_count <= 0.0 {
            return self.unigram(word);
        }
        let count = Self::decayed(&self.state.bigrams, &join_key(&[prev, word]));
        self.smooth(count, context_count)
    }

    /// P(word | prev2, prev1), backing off to the bigram estimate.
    fn trigram(&self, word: &str, prev2: &str, prev1: &str) -> f64 {
        let context_count = Self::decayed(&self.state.bigrams, &join_key(&[prev2, prev1]));
        if context_count <= 0.0 {
            return self.bigram(word, prev1);
        }
        let count = Self::decayed(&self.state.trigrams, &join_key(&[prev2, prev1, word]));
        self.smooth(count, context_count)
    }

    fn frequency(&self, word: &str, context: &[String]) -> f64 {
        let l = self.lambda;
        match context {
            [.., p2, p1] => {
                l * self.trigram(word, p2, p1)
                    + l * self.bigram(word, p1)
                    + (1.0 - 2.0 * l) * self.unigram(word)
            }
            [p1] => 2.0 * l * self.bigram(word, p1) + (1.0 - 2.0 * l) * self.unigram(word),
            [] => self.unigram(word),
        }
    }

    /// Stand-in probability for perplexity when smoothing is disabled.
    fn floor_probability(&self) -> f64 {
        if self.alpha > 0.0 && self.total > 0.0 {
            self.alpha / self.total
        } else {
            f64::MIN_POSITIVE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: u64 = MILLIS_PER_DAY;

    fn model() -> FrequencyModel {
        FrequencyModel::new(&Config::default())
    }

    #[test]
    fn ngram_requires_one_to_three_tokens() {
        assert!(NGram::new::<&str>(&[]).is_none());
        assert!(NGram::new(&["a", "b", "c", "d"]).is_none());
        let g = NGram::new(&[" The ", "Cat"]).unwrap();
        assert_eq!(g.kind(), NGramType::Bigram);
        assert_eq!(g.words(), &["the".to_string(), "cat".to_string()]);
        assert_eq!(g.to_string(), "the cat");
    }

    #[test]
    fn record_usage_counts_all_orders() {
        let m = model();
        m.record_usage(&["The", "cat", "sat"]);
        m.record_usage(&["the", "cat"]);

        assert_eq!(m.count(&["the"]), 2);
        assert_eq!(m.count(&["the", "cat"]), 2);
        assert_eq!(m.count(&["cat", "sat"]), 1);
        assert_eq!(m.count(&["the", "cat", "sat"]), 1);
        assert_eq!(m.vocabulary_size(), 3);

        let stats = m.statistics();
        assert_eq!(stats.total_unigrams, 5);
        assert_eq!(stats.total_bigrams, 3);
        assert_eq!(stats.total_trigrams, 1);
    }

    #[test]
    fn observation_resets_decay() {
        let m = model();
        m.record_usage_at(&["word"], 0);
        m.apply_decay_at(0.5, 4 * DAY);
        assert!(m.entry(&["word"]).unwrap().decayed_frequency < 1.0);
        m.record_usage_at(&["word"], 4 * DAY);
        let e = m.entry(&["word"]).unwrap();
        assert_eq!(e.raw_count, 2);
        assert_eq!(e.decayed_frequency, 2.0);
        assert_eq!(e.last_used, 4 * DAY);
    }

    #[test]
    fn unigram_probability_matches_laplace_formula() {
        let m = model();
        m.insert_count(&["a"], 10);
        m.insert_count(&["b"], 30);
        // (10 + 0.1) / (40 + 0.1 * 2)
        let expected = 10.1 / 40.2;
        assert!((m.get_frequency::<&str>("a", &[]) - expected).abs() < 1e-12);
    }

    #[test]
    fn bigram_backs_off_when_context_unseen() {
        let m = model();
        m.record_usage(&["hello", "world"]);
        let with_unknown_ctx = m.get_frequency("world", &["nowhere"]);
        let lambda = m.params().lambda;
        let unigram = m.get_frequency::<&str>("world", &[]);
        // bigram falls back to unigram, so the blend collapses to unigram
        let expected = 2.0 * lambda * unigram + (1.0 - 2.0 * lambda) * unigram;
        assert!((with_unknown_ctx - expected).abs() < 1e-12);
    }

    #[test]
    fn context_raises_observed_continuation() {
        let m = model();
        for _ in 0..5 {
            m.record_usage(&["good", "morning"]);
        }
        m.record_usage(&["evening"]);
        assert!(m.get_frequency("morning", &["good"]) > m.get_frequency("evening", &["good"]));
    }

    #[test]
    fn unseen_word_still_has_positive_probability() {
        let m = model();
        assert!(m.get_frequency::<&str>("anything", &[]) > 0.0);
        m.record_usage(&["a", "b", "c"]);
        assert!(m.get_frequency("zzz", &["a", "b"]) > 0.0);
        assert_eq!(m.get_frequency::<&str>("   ", &[]), 0.0);
    }

    #[test]
    fn seeded_counts_keep_frequency_within_unit_range() {
        let model = FrequencyModel::default();
        model.insert_count(&["new"], 1);
        model.insert_count(&["new", "york"], 50);
        model.insert_count(&["york"], 50);
        model.insert_count(&["in", "new", "york"], 40);

        for (word, ctx) in [
            ("york", vec!["new"]),
            ("york", vec!["in", "new"]),
            ("york", vec![]),
        ] {
            let p = model.get_frequency(word, &ctx);
            assert!(p > 0.0 && p <= 1.0, "P({word}|{ctx:?}) = {p}");
        }
    }

    #[test]
    fn top_words_tie_break_is_lexicographic() {
        let m = model();
        m.insert_count(&["beta"], 5);
        m.insert_count(&["alpha"], 5);
        m.insert_count(&["gamma"], 9);
        let top = m.get_top_words::<&str>(3, &[]);
        let words: Vec<&str> = top.iter().map(|(w, _)| w.as_str()).collect();
        assert_eq!(words, vec!["gamma", "alpha", "beta"]);
    }

    #[test]
    fn top_words_with_prefix_filters_before_ranking() {
        let m = model();
        m.insert_count(&["the"], 100);
        m.insert_count(&["a"], 1000);
        m.insert_count(&["there"], 10);
        let top = m.get_top_words_with_prefix::<&str>(1, "Th", &[]);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].0, "the");
    }

    #[test]
    fn decay_uses_whole_days_and_keeps_raw_count() {
        let m = model();
        m.record_usage_at(&["old"], 0);
        m.apply_decay_at(0.5, DAY - 1);
        assert_eq!(m.entry(&["old"]).unwrap().decayed_frequency, 1.0);
        m.apply_decay_at(0.5, 2 * DAY);
        let e = m.entry(&["old"]).unwrap();
        assert!((e.decayed_frequency - (-1.0f64).exp()).abs() < 1e-12);
        assert_eq!(e.raw_count, 1);
    }

    #[test]
    fn negative_decay_rate_is_ignored() {
        let m = model();
        m.record_usage_at(&["w"], 0);
        m.apply_decay_at(-3.0, 10 * DAY);
        assert_eq!(m.entry(&["w"]).unwrap().decayed_frequency, 1.0);
    }

    #[test]
    fn prune_keeps_referential_integrity() {
        let m = model();
        m.record_usage_at(&["stale", "word", "here"], 0);
        m.record_usage_at(&["fresh", "word"], 30 * DAY);
        m.apply_decay_at(0.95, 30 * DAY);

        let removed = m.prune();
        assert_eq!(removed, 2); // "stale" and "here"
        assert!(m.entry(&["stale"]).is_none());
        assert!(m.entry(&["stale", "word"]).is_none());
        assert!(m.entry(&["stale", "word", "here"]).is_none());
        assert!(m.entry(&["fresh", "word"]).is_some());

        for kind in [NGramType::Bigram, NGramType::Trigram] {
            for e in m.entries(kind) {
                for w in e.ngram.words() {
                    assert!(m.entry(&[w.as_str()]).is_some(), "dangling {}", e.ngram);
                }
            }
        }
        assert_eq!(m.statistics().total_unigrams, m.count(&["word"]) + m.count(&["fresh"]));
    }

    #[test]
    fn perplexity_prefers_seen_text() {
        let m = model();
        for _ in 0..10 {
            m.record_usage(&["i", "like", "tea"]);
        }
        let seen = m.calculate_perplexity(&["i", "like", "tea"]);
        let unseen = m.calculate_perplexity(&["purple", "elephants", "dance"]);
        assert!(seen.is_finite());
        assert!(seen < unseen);
        assert!(m.calculate_perplexity::<&str>(&[]).is_infinite());
    }

    #[test]
    fn parameters_are_clamped() {
        let m = model();
        m.set_parameters(Some(5.0), Some(-1.0), Some(0), Some(10), Some(0.9));
        let p = m.params();
        assert_eq!(p.smoothing, 1.0);
        assert_eq!(p.decay, 0.0);
        assert_eq!(p.min_frequency, 1);
        assert_eq!(p.max_vocabulary, 1000);
        assert_eq!(p.lambda, 0.5);
    }

    #[test]
    fn word_learned_fires_once_per_new_word() {
        use std::sync::atomic::AtomicUsize;

        #[derive(Default)]
        struct Counter(AtomicUsize);
        impl ModelListener for Counter {
            fn on_word_learned(&self, _word: &str, _count: u64) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let m = model();
        let counter = Arc::new(Counter::default());
        m.set_listener(Some(counter.clone()));
        m.record_usage(&["x", "y"]);
        m.record_usage(&["x"]);
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn release_clears_everything() {
        let m = model();
        m.record_usage(&["a", "b"]);
        m.release();
        assert_eq!(m.vocabulary_size(), 0);
        assert_eq!(m.statistics().total_bigrams, 0);
    }
}
