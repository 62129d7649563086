//! Prediction engine: gathers candidates from every configured source,
//! merges duplicates with per-source weights, caches the ranking and learns
//! from the user's selections.
use ahash::AHashMap;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, debug_span};

use crate::cache::PredictionCache;
use crate::clamp_unit;
use crate::corrector::Corrector;
use crate::history::SelectionHistory;
use crate::ngram::FrequencyModel;
use crate::prediction::{
    Prediction, PredictionContext, PredictionKind, PredictionSource, SourceWeights,
};
use crate::sources::{ExternalSource, PredictionListener, SpellChecker};
use crate::utils;
use crate::worker::{TaskHandle, TaskScope, WorkerPool};
use crate::Config;

/// Confidence given to user-dictionary completions.
const USER_WORD_CONFIDENCE: f32 = 0.8;
/// Boost for text the user has picked before.
const SELECTED_BOOST: f32 = 1.2;
const MAX_CONTEXT_REPEATS: u32 = 10;

#[derive(Debug, Clone, Copy)]
struct Settings {
    enabled: bool,
    max_predictions: usize,
    min_confidence: f32,
    min_word_length: usize,
    context_window: usize,
    weights: SourceWeights,
}

impl Settings {
    fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.enabled,
            max_predictions: config.max_predictions.clamp(1, 50),
            min_confidence: clamp_unit(config.min_confidence),
            min_word_length: config.min_word_length.clamp(1, 10),
            context_window: config.context_window.min(5),
            weights: config.source_weights.clamped(),
        }
    }
}

/// Engine configuration and counters at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatistics {
    pub enabled: bool,
    pub max_predictions: usize,
    pub min_confidence: f32,
    pub min_word_length: usize,
    pub context_window: usize,
    pub cache_size: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub user_history_size: usize,
    pub context_history_size: usize,
}

struct EngineState {
    model: Option<FrequencyModel>,
    corrector: Option<Corrector>,
    spell_checker: Option<Arc<dyn SpellChecker>>,
    external: Vec<Arc<dyn ExternalSource>>,
    settings: RwLock<Settings>,
    cache: PredictionCache,
    history: SelectionHistory,
    listener: RwLock<Option<Arc<dyn PredictionListener>>>,
}

/// Assembles a `PredictionEngine` from optional collaborators.
pub struct EngineBuilder {
    config: Config,
    model: Option<FrequencyModel>,
    corrector: Option<Corrector>,
    spell_checker: Option<Arc<dyn SpellChecker>>,
    external: Vec<Arc<dyn ExternalSource>>,
    listener: Option<Arc<dyn PredictionListener>>,
    pool: Option<Arc<WorkerPool>>,
}

impl EngineBuilder {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            model: None,
            corrector: None,
            spell_checker: None,
            external: Vec::new(),
            listener: None,
            pool: None,
        }
    }

    pub fn frequency_model(mut self, model: FrequencyModel) -> Self {
        self.model = Some(model);
        self
    }

    pub fn corrector(mut self, corrector: Corrector) -> Self {
        self.corrector = Some(corrector);
        self
    }

    pub fn spell_checker(mut self, checker: Arc<dyn SpellChecker>) -> Self {
        self.spell_checker = Some(checker);
        self
    }

    /// Add another candidate source; may be called repeatedly.
    pub fn external_source(mut self, source: Arc<dyn ExternalSource>) -> Self {
        self.external.push(source);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn PredictionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Run background work on `pool` instead of the shared one.
    pub fn pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn build(self) -> PredictionEngine {
        let cache = PredictionCache::new(
            self.config.max_cache_size,
            Duration::from_millis(self.config.cache_ttl_ms),
        );
        let state = EngineState {
            model: self.model,
            corrector: self.corrector,
            spell_checker: self.spell_checker,
            external: self.external,
            settings: RwLock::new(Settings::from_config(&self.config)),
            cache,
            history: SelectionHistory::new(),
            listener: RwLock::new(self.listener),
        };
        let tasks = match &self.pool {
            Some(pool) => pool.scope(),
            None => TaskScope::default(),
        };
        PredictionEngine {
            state: Arc::new(state),
            tasks,
        }
    }
}

/// Ranked, cached, learning prediction service.
///
/// Cloning is cheap; clones share cache, history and collaborators.
#[derive(Clone)]
pub struct PredictionEngine {
    state: Arc<EngineState>,
    tasks: TaskScope,
}

impl PredictionEngine {
    /// Engine with a frequency model (loaded from `config.model_path` when
    /// set) and a corrector over the built-in dictionary.
    pub fn new(config: &Config) -> Self {
        Self::builder(config)
            .frequency_model(FrequencyModel::open(config))
            .corrector(Corrector::new(config))
            .build()
    }

    pub fn builder(config: &Config) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn frequency_model(&self) -> Option<&FrequencyModel> {
        self.state.model.as_ref()
    }

    pub fn corrector(&self) -> Option<&Corrector> {
        self.state.corrector.as_ref()
    }

    fn settings(&self) -> Settings {
        *self
            .state
            .settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `f` to the settings and drop every cached ranking.
    fn update_settings(&self, f: impl FnOnce(&mut Settings)) {
        {
            let mut s = self
                .state
                .settings
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            f(&mut s);
            debug!(settings = ?*s, "prediction settings updated");
        }
        self.state.cache.clear();
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn PredictionListener>>) {
        *self
            .state
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = listener;
    }

    fn listener(&self) -> Option<Arc<dyn PredictionListener>> {
        self.state
            .listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ========== Settings ==========

    pub fn is_enabled(&self) -> bool {
        self.settings().enabled
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.update_settings(|s| s.enabled = enabled);
    }

    pub fn set_max_predictions(&self, n: usize) {
        self.update_settings(|s| s.max_predictions = n.clamp(1, 50));
    }

    pub fn set_min_confidence(&self, confidence: f32) {
        self.update_settings(|s| s.min_confidence = clamp_unit(confidence));
    }

    pub fn set_min_word_length(&self, len: usize) {
        self.update_settings(|s| s.min_word_length = len.clamp(1, 10));
    }

    pub fn set_context_window(&self, size: usize) {
        self.update_settings(|s| s.context_window = size.min(5));
    }

    pub fn set_source_weights(&self, weights: SourceWeights) {
        self.update_settings(|s| s.weights = weights.clamped());
    }

    pub fn source_weights(&self) -> SourceWeights {
        self.settings().weights
    }

    pub fn set_cache_ttl(&self, ttl: Duration) {
        self.state.cache.set_ttl(ttl);
        self.state.cache.clear();
    }

    // ========== Prediction ==========

    /// Ranked predictions for `context`, best first.
    ///
    /// Served from the cache when a live entry exists for the exact fragment
    /// and previous words. Returns an empty list when disabled or when there
    /// is neither a fragment nor any previous word.
    pub fn get_predictions(&self, context: &PredictionContext) -> Vec<Prediction> {
        let settings = self.settings();
        if !settings.enabled {
            return Vec::new();
        }
        if context.current_word.trim().is_empty() && context.previous_words.is_empty() {
            return Vec::new();
        }

        let cache = &self.state.cache;
        if let Some(hit) = cache.get(&context.current_word, &context.previous_words) {
            debug!(fragment = %context.current_word, "prediction cache hit");
            return hit;
        }

        let ranked = self.compute(context, &settings);
        cache.put(&context.current_word, &context.previous_words, ranked.clone());

        if let Some(l) = self.listener() {
            l.on_predictions_updated(&ranked);
        }
        ranked
    }

    /// Background `get_predictions`.
    pub fn spawn_predictions(&self, context: PredictionContext) -> TaskHandle<Vec<Prediction>> {
        let this = self.clone();
        self.tasks.spawn(move || this.get_predictions(&context))
    }

    fn compute(&self, context: &PredictionContext, settings: &Settings) -> Vec<Prediction> {
        let _span = debug_span!("predict", fragment = %context.current_word).entered();
        let prefix = utils::normalize(&context.current_word);
        let recent = context.recent_words(settings.context_window);
        let boundary = context.at_word_boundary();
        let typing = !boundary && prefix.chars().count() >= settings.min_word_length;

        let mut candidates = Vec::new();
        if typing {
            self.completions(&prefix, recent, settings, &mut candidates);
        }
        if boundary {
            self.next_words(recent, settings, &mut candidates);
        }
        if typing {
            self.corrections(context, &mut candidates);
        }
        if !boundary || context.current_word.is_empty() {
            self.recent_selections(&prefix, settings, &mut candidates);
        }
        self.external(context, settings, &mut candidates);

        let total = candidates.len();
        let mut ranked = self.rank(candidates, context, &settings.weights);
        ranked.retain(|p| p.confidence >= settings.min_confidence);
        ranked.truncate(settings.max_predictions);
        debug!(candidates = total, returned = ranked.len(), "predictions ranked");
        ranked
    }

    fn completions(
        &self,
        prefix: &str,
        recent: &[String],
        settings: &Settings,
        out: &mut Vec<Prediction>,
    ) {
        let limit = settings.max_predictions * 2;
        if let Some(model) = &self.state.model {
            for (word, score) in model.get_top_words_with_prefix(limit, prefix, recent) {
                out.push(
                    Prediction::new(
                        word,
                        PredictionKind::Completion,
                        score as f32,
                        PredictionSource::FrequencyModel,
                    )
                    .with_meta("frequency", score),
                );
            }
        }
        if let Some(corrector) = &self.state.corrector {
            for (word, _) in corrector.user_words_with_prefix(prefix, limit) {
                out.push(
                    Prediction::new(
                        word,
                        PredictionKind::Completion,
                        USER_WORD_CONFIDENCE,
                        PredictionSource::Corrector,
                    )
                    .with_meta("user_word", true),
                );
            }
        }
    }

    fn next_words(&self, recent: &[String], settings: &Settings, out: &mut Vec<Prediction>) {
        let Some(model) = &self.state.model else {
            return;
        };
        for (word, score) in model.get_top_words(settings.max_predictions, recent) {
            out.push(
                Prediction::new(
                    word,
                    PredictionKind::NextWord,
                    score as f32,
                    PredictionSource::FrequencyModel,
                )
                .with_meta("frequency", score),
            );
        }
    }

    fn corrections(&self, context: &PredictionContext, out: &mut Vec<Prediction>) {
        let fragment = context.current_word.as_str();
        if let Some(corrector) = &self.state.corrector {
            let result = corrector.suggest(fragment, context.preceding_word());
            for s in result.suggestions {
                out.push(
                    Prediction::new(
                        s.word,
                        PredictionKind::Correction,
                        s.confidence,
                        PredictionSource::Corrector,
                    )
                    .with_meta("original", fragment)
                    .with_meta("edit_distance", s.edit_distance)
                    .with_meta("frequency", s.frequency),
                );
            }
        }
        if let Some(checker) = &self.state.spell_checker {
            let result = checker.check_word(fragment);
            if !result.is_correct {
                for word in result.suggestions {
                    out.push(
                        Prediction::new(
                            word,
                            PredictionKind::Correction,
                            result.confidence,
                            PredictionSource::SpellCheck,
                        )
                        .with_meta("original", fragment)
                        .with_meta("severity", result.severity.as_str()),
                    );
                }
            }
        }
    }

    fn recent_selections(&self, prefix: &str, settings: &Settings, out: &mut Vec<Prediction>) {
        let now = utils::now_millis();
        for (word, days) in self
            .state
            .history
            .recent_with_prefix(prefix, settings.max_predictions, now)
        {
            let confidence = (1.0 / (1.0 + days)).clamp(0.1, 0.9);
            out.push(
                Prediction::new(
                    word,
                    PredictionKind::Completion,
                    confidence,
                    PredictionSource::UserHistory,
                )
                .with_meta("recency_days", days),
            );
        }
    }

    fn external(&self, context: &PredictionContext, settings: &Settings, out: &mut Vec<Prediction>) {
        for source in &self.state.external {
            for mut p in source.predict(context, settings.max_predictions) {
                p.source = PredictionSource::External;
                p.confidence = clamp_unit(p.confidence);
                out.push(p);
            }
        }
    }

    /// Merge candidates sharing the same text and order them by weighted
    /// score. The surviving prediction keeps the kind and metadata of its
    /// most confident contributor.
    fn rank(
        &self,
        candidates: Vec<Prediction>,
        context: &PredictionContext,
        weights: &SourceWeights,
    ) -> Vec<Prediction> {
        let mut index: AHashMap<String, usize> = AHashMap::new();
        let mut groups: Vec<Vec<Prediction>> = Vec::new();
        for p in candidates {
            match index.get(&p.text) {
                Some(&i) => groups[i].push(p),
                None => {
                    index.insert(p.text.clone(), groups.len());
                    groups.push(vec![p]);
                }
            }
        }

        let history = &self.state.history;
        let preceding = context.preceding_word();
        let mut ranked: Vec<Prediction> = groups
            .into_iter()
            .filter_map(|group| {
                let mut score: f32 = group
                    .iter()
                    .map(|p| p.confidence * weights.weight(p.source))
                    .sum();
                let mut best = group
                    .into_iter()
                    .reduce(|a, b| if b.confidence > a.confidence { b } else { a })?;
                if history.was_selected(&best.text) {
                    score *= SELECTED_BOOST;
                }
                let repeats = history.context_count(preceding, &best.text);
                if repeats > 0 {
                    score *= 1.0 + 0.1 * repeats.min(MAX_CONTEXT_REPEATS) as f32;
                }
                best.confidence = clamp_unit(score);
                Some(best)
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.text.cmp(&b.text))
        });
        ranked
    }

    // ========== Learning ==========

    /// Learn from a confirmed choice: selection history, context repeat
    /// count, frequency model and (for corrections) the user dictionary.
    pub fn record_selection(&self, prediction: &Prediction, context: &PredictionContext) {
        let settings = self.settings();
        let text = prediction.text.as_str();
        self.state
            .history
            .record(text, context.preceding_word(), utils::now_millis());

        if let Some(model) = &self.state.model {
            let mut words = context.recent_words(settings.context_window).to_vec();
            words.push(text.to_string());
            model.record_usage(&words);
        }

        if prediction.is_correction() {
            if let (Some(corrector), Some(original)) = (&self.state.corrector, prediction.original()) {
                if utils::normalize(original) != utils::normalize(text) {
                    corrector.add_word(text);
                }
            }
        }

        self.state.cache.clear();
        debug!(text, source = ?prediction.source, "recorded selection");

        if let Some(l) = self.listener() {
            l.on_prediction_selected(prediction);
            l.on_prediction_learned(text);
        }
    }

    /// Background `record_selection`.
    pub fn spawn_record_selection(
        &self,
        prediction: Prediction,
        context: PredictionContext,
    ) -> TaskHandle<()> {
        let this = self.clone();
        self.tasks
            .spawn(move || this.record_selection(&prediction, &context))
    }

    // ========== Maintenance ==========

    pub fn clear_cache(&self) {
        self.state.cache.clear();
        debug!("prediction cache cleared");
    }

    /// Forget selections and context repeat counts.
    pub fn clear_user_history(&self) {
        self.state.history.clear();
        self.state.cache.clear();
        debug!("selection history cleared");
    }

    /// (hits, misses)
    pub fn cache_stats(&self) -> (u64, u64) {
        self.state.cache.stats()
    }

    pub fn statistics(&self) -> EngineStatistics {
        let s = self.settings();
        let (cache_hits, cache_misses) = self.state.cache.stats();
        EngineStatistics {
            enabled: s.enabled,
            max_predictions: s.max_predictions,
            min_confidence: s.min_confidence,
            min_word_length: s.min_word_length,
            context_window: s.context_window,
            cache_size: self.state.cache.len(),
            cache_hits,
            cache_misses,
            user_history_size: self.state.history.len(),
            context_history_size: self.state.history.context_len(),
        }
    }

    /// Cancel queued background work and drop cache and history.
    /// Collaborators are left alone; release them separately.
    pub fn release(&self) {
        self.tasks.cancel();
        self.set_listener(None);
        self.state.cache.reset();
        self.state.history.clear();
        debug!("prediction engine released");
    }
}

impl std::fmt::Debug for PredictionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredictionEngine")
            .field("statistics", &self.statistics())
            .field("frequency_model", &self.state.model.is_some())
            .field("corrector", &self.state.corrector.is_some())
            .field("spell_checker", &self.state.spell_checker.is_some())
            .field("external_sources", &self.state.external.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{Severity, SpellCheckResult};

    fn config() -> Config {
        Config {
            min_confidence: 0.0,
            ..Config::default()
        }
    }

    fn engine_with_model(words: &[(&str, u64)]) -> PredictionEngine {
        let cfg = config();
        let model = FrequencyModel::new(&cfg);
        for (w, c) in words {
            model.insert_count(&[*w], *c);
        }
        PredictionEngine::builder(&cfg).frequency_model(model).build()
    }

    #[test]
    fn disabled_engine_returns_nothing() {
        let engine = engine_with_model(&[("hello", 5)]);
        engine.set_enabled(false);
        assert!(engine.get_predictions(&PredictionContext::new("he")).is_empty());
        assert_eq!(engine.cache_stats(), (0, 0));
    }

    #[test]
    fn empty_context_returns_nothing() {
        let engine = engine_with_model(&[("hello", 5)]);
        assert!(engine.get_predictions(&PredictionContext::new("  ")).is_empty());
    }

    #[test]
    fn completions_rank_by_frequency() {
        let engine = engine_with_model(&[("the", 100), ("there", 10), ("cat", 50)]);
        let preds = engine.get_predictions(&PredictionContext::new("th"));
        let texts: Vec<&str> = preds.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["the", "there"]);
        assert!(preds.iter().all(|p| p.kind == PredictionKind::Completion));
    }

    #[test]
    fn next_word_uses_previous_words() {
        let cfg = config();
        let model = FrequencyModel::new(&cfg);
        for _ in 0..5 {
            model.record_usage(&["good", "morning"]);
        }
        model.record_usage(&["night"]);
        let engine = PredictionEngine::builder(&cfg).frequency_model(model).build();

        let ctx = PredictionContext::new("").with_previous(&["good"]);
        let preds = engine.get_predictions(&ctx);
        assert_eq!(preds[0].text, "morning");
        assert_eq!(preds[0].kind, PredictionKind::NextWord);
    }

    #[test]
    fn duplicate_texts_are_merged_with_weights() {
        let cfg = config();
        let corrector = Corrector::new(&cfg);
        corrector.add_word("theorem");
        let model = FrequencyModel::new(&cfg);
        model.insert_count(&["theorem"], 1);
        model.insert_count(&["apple"], 99);
        let engine = PredictionEngine::builder(&cfg)
            .frequency_model(model)
            .corrector(corrector)
            .build();

        let preds = engine.get_predictions(&PredictionContext::new("theo"));
        let merged: Vec<_> = preds.iter().filter(|p| p.text == "theorem").collect();
        assert_eq!(merged.len(), 1);
        // the user-word completion (0.8) is the most confident contributor
        assert_eq!(merged[0].source, PredictionSource::Corrector);
        assert_eq!(merged[0].metadata.get("user_word"), Some(&serde_json::Value::Bool(true)));
    }

    struct FixedChecker;
    impl SpellChecker for FixedChecker {
        fn check_word(&self, word: &str) -> SpellCheckResult {
            if word == "recieve" {
                SpellCheckResult {
                    is_correct: false,
                    suggestions: vec!["receive".to_string()],
                    confidence: 0.9,
                    severity: Severity::Misspelling,
                }
            } else {
                SpellCheckResult::correct()
            }
        }
    }

    #[test]
    fn spell_checker_suggestions_become_corrections() {
        let cfg = config();
        let engine = PredictionEngine::builder(&cfg)
            .spell_checker(Arc::new(FixedChecker))
            .build();
        let preds = engine.get_predictions(&PredictionContext::new("recieve"));
        assert_eq!(preds.len(), 1);
        assert_eq!(preds[0].text, "receive");
        assert_eq!(preds[0].source, PredictionSource::SpellCheck);
        assert_eq!(preds[0].original(), Some("recieve"));
        assert!((preds[0].confidence - 0.9 * 0.20).abs() < 1e-6);
    }

    #[test]
    fn selection_boosts_and_learns() {
        let cfg = config();
        let model = FrequencyModel::new(&cfg);
        model.insert_count(&["tea"], 10);
        model.insert_count(&["team"], 10);
        let engine = PredictionEngine::builder(&cfg)
            .frequency_model(model.clone())
            .build();

        let ctx = PredictionContext::new("tea").with_previous(&["my"]);
        let before = engine.get_predictions(&ctx);
        let team = before.iter().find(|p| p.text == "team").unwrap().clone();
        engine.record_selection(&team, &ctx);

        assert_eq!(model.count(&["my", "team"]), 1);
        let after = engine.get_predictions(&ctx);
        assert_eq!(after[0].text, "team");
        let stats = engine.statistics();
        assert_eq!(stats.user_history_size, 1);
        assert_eq!(stats.context_history_size, 1);
    }

    #[test]
    fn selected_correction_is_added_to_user_dictionary() {
        let cfg = config();
        let corrector = Corrector::new(&cfg);
        let engine = PredictionEngine::builder(&cfg)
            .corrector(corrector.clone())
            .build();
        let p = Prediction::new(
            "gonna",
            PredictionKind::Correction,
            0.5,
            PredictionSource::SpellCheck,
        )
        .with_meta("original", "gona");
        engine.record_selection(&p, &PredictionContext::new("gona"));
        assert!(corrector.is_valid_word("gonna"));
    }

    #[test]
    fn setters_clamp_and_clear_cache() {
        let engine = engine_with_model(&[("hello", 5)]);
        let ctx = PredictionContext::new("he");
        engine.get_predictions(&ctx);
        engine.set_max_predictions(0);
        engine.set_context_window(99);
        engine.set_min_word_length(0);
        let stats = engine.statistics();
        assert_eq!(stats.cache_size, 0);
        assert_eq!(stats.max_predictions, 1);
        assert_eq!(stats.context_window, 5);
        assert_eq!(stats.min_word_length, 1);
    }

    #[test]
    fn ranking_is_stable_without_cache() {
        let engine = engine_with_model(&[("apple", 3), ("apply", 3), ("apt", 7), ("ape", 1)]);
        let ctx = PredictionContext::new("ap");
        let first = engine.get_predictions(&ctx);
        engine.clear_cache();
        let second = engine.get_predictions(&ctx);
        assert_eq!(first, second);
    }
}
