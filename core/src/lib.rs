//! wordpredict-core
//!
//! Prediction-and-correction ranking core for a software keyboard: an n-gram
//! frequency model, an edit-distance corrector and the engine that merges
//! them (plus pluggable collaborators) into one ranked suggestion list.
//!
//! Public API:
//! - `FrequencyModel` - Persistent 1/2/3-gram statistics with Laplace smoothing and decay
//! - `Corrector` - Levenshtein-based spelling correction over system + user dictionaries
//! - `PredictionEngine` - Weighted multi-source aggregation, caching and online learning
//! - `Config` - Configuration shared by all three components
//! - `WorkerPool` - Background execution for the heavier operations
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod store;
pub use store::ShardedMap;

pub mod worker;
pub use worker::{TaskHandle, TaskScope, WorkerPool};

pub mod error;
pub use error::ModelError;

pub mod ngram;
pub use ngram::{
    FrequencyEntry, FrequencyModel, ModelListener, ModelParams, ModelStatistics, NGram, NGramType,
};

mod ngram_io;

pub mod distance;
pub use distance::{bounded_levenshtein, levenshtein};

pub mod corrector;
pub use corrector::{
    Confidence, CorrectionMode, CorrectionResult, Corrector, CorrectorListener, Suggestion,
    UserDictionarySnapshot,
};

pub mod prediction;
pub use prediction::{
    Prediction, PredictionContext, PredictionKind, PredictionSource, SourceWeights,
};

pub mod sources;
pub use sources::{ExternalSource, PredictionListener, Severity, SpellCheckResult, SpellChecker};

pub mod history;
pub use history::SelectionHistory;

pub mod cache;
pub use cache::PredictionCache;

pub mod engine;
pub use engine::{EngineBuilder, EngineStatistics, PredictionEngine};

/// Configuration for the whole prediction core.
///
/// Flat on purpose: a host usually keeps one `config.toml` per keyboard
/// profile. Components read the fields they care about at construction time
/// and keep their own runtime copies afterwards (setters on a component do
/// not write back here).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    // Frequency model
    /// Laplace smoothing constant α (0.0 to 1.0)
    pub smoothing_alpha: f64,
    /// Default decay rate used by `apply_decay` when no explicit rate is given
    pub decay_rate: f64,
    /// Decayed frequency below which a unigram is pruned
    pub min_frequency: u32,
    /// Vocabulary ceiling that triggers pruning
    pub max_vocabulary_size: u32,
    /// Interpolation weight λ applied to trigram and bigram estimates (≤ 0.5)
    pub interpolation_lambda: f64,
    /// Where the frequency model is persisted. `None` keeps it in memory only.
    pub model_path: Option<PathBuf>,

    // Corrector
    pub correction_mode: CorrectionMode,
    /// Words shorter than this are never corrected
    pub min_correction_length: usize,
    /// Maximum correction candidates returned per word
    pub max_suggestions: usize,
    /// Largest edit distance still considered a candidate
    pub max_edit_distance: usize,

    // Prediction engine
    pub enabled: bool,
    pub max_predictions: usize,
    pub min_confidence: f32,
    /// Minimum fragment length before completions/corrections are attempted
    pub min_word_length: usize,
    /// Number of previous words used as n-gram context
    pub context_window: usize,
    /// Lifetime of a cached prediction list in milliseconds
    pub cache_ttl_ms: u64,
    /// Maximum number of cached contexts
    pub max_cache_size: usize,
    pub source_weights: SourceWeights,

    // Runtime
    /// Background worker threads. 0 derives a count from available parallelism.
    pub worker_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            smoothing_alpha: 0.1,
            decay_rate: 0.95,
            min_frequency: 1,
            max_vocabulary_size: 100_000,
            interpolation_lambda: 0.33,
            model_path: None,
            correction_mode: CorrectionMode::Moderate,
            min_correction_length: 2,
            max_suggestions: 5,
            max_edit_distance: 2,
            enabled: true,
            max_predictions: 10,
            min_confidence: 0.1,
            min_word_length: 1,
            context_window: 3,
            cache_ttl_ms: 60_000,
            max_cache_size: 1000,
            source_weights: SourceWeights::default(),
            worker_threads: 0,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Out-of-range values are clamped rather than rejected.
    pub fn load_toml<P: AsRef<std::path::Path>>(
        path: P,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config.clamped())
    }

    /// Save configuration to a TOML file.
    pub fn save_toml<P: AsRef<std::path::Path>>(
        &self,
        path: P,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str::<Config>(content).map(Config::clamped)
    }

    /// Serialize configuration to TOML string.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Return a copy with every field forced into its valid range.
    pub fn clamped(mut self) -> Self {
        let params = self.model_params();
        self.smoothing_alpha = params.smoothing;
        self.decay_rate = params.decay;
        self.min_frequency = params.min_frequency;
        self.max_vocabulary_size = params.max_vocabulary;
        self.interpolation_lambda = params.lambda;

        self.min_correction_length = self.min_correction_length.clamp(1, 10);
        self.max_suggestions = self.max_suggestions.clamp(1, 20);
        self.max_edit_distance = self.max_edit_distance.clamp(1, 5);

        self.max_predictions = self.max_predictions.clamp(1, 50);
        self.min_confidence = clamp_unit(self.min_confidence);
        self.min_word_length = self.min_word_length.clamp(1, 10);
        self.context_window = self.context_window.min(5);
        self.max_cache_size = self.max_cache_size.max(1);
        self.source_weights = self.source_weights.clamped();
        self
    }

    /// Model parameters derived from this config (clamped).
    pub fn model_params(&self) -> ModelParams {
        ModelParams::default().with(
            Some(self.smoothing_alpha),
            Some(self.decay_rate),
            Some(self.min_frequency),
            Some(self.max_vocabulary_size),
            Some(self.interpolation_lambda),
        )
    }
}

/// Clamp into [0, 1], mapping NaN to 0.
pub(crate) fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Utility helpers.
pub mod utils {
    use std::time::{SystemTime, UNIX_EPOCH};

    /// Separator used when joining n-gram tokens into a lookup key.
    pub(crate) const KEY_SEPARATOR: char = '\u{1F}';

    /// Normalize a token: NFC, strip control characters, trim, lower-case.
    ///
    /// Every dictionary and model token goes through here, so comparisons are
    /// always made in this form.
    pub fn normalize(s: &str) -> String {
        use unicode_normalization::UnicodeNormalization;
        s.nfc()
            .filter(|c| !c.is_control())
            .collect::<String>()
            .trim()
            .to_lowercase()
    }

    /// Normalize a sequence, dropping tokens that end up empty.
    pub fn normalize_all<S: AsRef<str>>(words: &[S]) -> Vec<String> {
        words
            .iter()
            .map(|w| normalize(w.as_ref()))
            .filter(|w| !w.is_empty())
            .collect()
    }

    /// Milliseconds since the Unix epoch.
    pub fn now_millis() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }

    pub const MILLIS_PER_DAY: u64 = 24 * 60 * 60 * 1000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_lowercases_and_trims() {
        assert_eq!(utils::normalize("  Hello "), "hello");
        assert_eq!(utils::normalize("a\u{1F}b"), "ab");
        assert_eq!(utils::normalize("   "), "");
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = Config::default();
        let s = cfg.to_toml_string().unwrap();
        let back = Config::from_toml_str(&s).unwrap();
        assert_eq!(back.max_predictions, cfg.max_predictions);
        assert!((back.interpolation_lambda - cfg.interpolation_lambda).abs() < 1e-12);
        assert_eq!(back.correction_mode, cfg.correction_mode);
    }

    #[test]
    fn config_values_are_clamped_on_load() {
        let cfg = Config::from_toml_str(
            "interpolation_lambda = 0.9\nmax_predictions = 500\nmin_confidence = 4.0\n",
        )
        .unwrap();
        assert!((cfg.interpolation_lambda - 0.5).abs() < 1e-12);
        assert_eq!(cfg.max_predictions, 50);
        assert_eq!(cfg.min_confidence, 1.0);
    }
}
