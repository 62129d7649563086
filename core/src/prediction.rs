//! Value types exchanged with the prediction engine.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::clamp_unit;

/// What a prediction would do to the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PredictionKind {
    /// Finish the word being typed
    Completion,
    /// Word expected after the current one
    NextWord,
    /// Replace a likely misspelling
    Correction,
    /// Multi-word suggestion
    Phrase,
}

/// Where a prediction came from. Each source carries a ranking weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PredictionSource {
    FrequencyModel,
    Corrector,
    SpellCheck,
    External,
    UserHistory,
}

/// One ranked suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub text: String,
    pub kind: PredictionKind,
    /// In [0, 1]
    pub confidence: f32,
    pub source: PredictionSource,
    /// Provenance details (e.g. `original`, `edit_distance`, `frequency`).
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Prediction {
    pub fn new(
        text: impl Into<String>,
        kind: PredictionKind,
        confidence: f32,
        source: PredictionSource,
    ) -> Self {
        Self {
            text: text.into(),
            kind,
            confidence: clamp_unit(confidence),
            source,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Text to show in the suggestion bar (`display_text` metadata if set).
    pub fn display_text(&self) -> &str {
        self.metadata
            .get("display_text")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.text)
    }

    /// The misspelling this prediction corrects, if it is a correction.
    pub fn original(&self) -> Option<&str> {
        self.metadata.get("original").and_then(|v| v.as_str())
    }

    pub fn is_correction(&self) -> bool {
        self.kind == PredictionKind::Correction
    }

    pub fn is_completion(&self) -> bool {
        self.kind == PredictionKind::Completion
    }
}

/// Input state for one prediction request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PredictionContext {
    /// Partial word under the cursor (may be empty)
    pub current_word: String,
    /// Preceding words, most recent last
    pub previous_words: Vec<String>,
    /// Cursor offset in the field, if known
    pub cursor_position: Option<usize>,
    pub language_hint: Option<String>,
}

impl PredictionContext {
    pub fn new(current_word: impl Into<String>) -> Self {
        Self {
            current_word: current_word.into(),
            ..Self::default()
        }
    }

    pub fn with_previous<S: AsRef<str>>(mut self, words: &[S]) -> Self {
        self.previous_words = words.iter().map(|w| w.as_ref().to_string()).collect();
        self
    }

    /// The word right before the fragment, if any.
    pub fn preceding_word(&self) -> Option<&str> {
        self.previous_words.last().map(String::as_str)
    }

    /// At most the last `window` previous words.
    pub fn recent_words(&self, window: usize) -> &[String] {
        let start = self.previous_words.len().saturating_sub(window);
        &self.previous_words[start..]
    }

    /// True when the user is between words.
    pub fn at_word_boundary(&self) -> bool {
        self.current_word.is_empty() || self.current_word.ends_with(char::is_whitespace)
    }
}

/// Ranking weight per source. Defaults sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceWeights {
    pub frequency_model: f32,
    pub corrector: f32,
    pub spell_check: f32,
    pub external: f32,
    pub user_history: f32,
}

impl Default for SourceWeights {
    fn default() -> Self {
        Self {
            frequency_model: 0.35,
            corrector: 0.30,
            spell_check: 0.20,
            external: 0.10,
            user_history: 0.05,
        }
    }
}

impl SourceWeights {
    pub fn weight(&self, source: PredictionSource) -> f32 {
        match source {
            PredictionSource::FrequencyModel => self.frequency_model,
            PredictionSource::Corrector => self.corrector,
            PredictionSource::SpellCheck => self.spell_check,
            PredictionSource::External => self.external,
            PredictionSource::UserHistory => self.user_history,
        }
    }

    /// Each weight forced into [0, 1].
    pub fn clamped(self) -> Self {
        Self {
            frequency_model: clamp_unit(self.frequency_model),
            corrector: clamp_unit(self.corrector),
            spell_check: clamp_unit(self.spell_check),
            external: clamp_unit(self.external),
            user_history: clamp_unit(self.user_history),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        let w = SourceWeights::default();
        let sum: f32 = [
            PredictionSource::FrequencyModel,
            PredictionSource::Corrector,
            PredictionSource::SpellCheck,
            PredictionSource::External,
            PredictionSource::UserHistory,
        ]
        .iter()
        .map(|s| w.weight(*s))
        .sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn context_helpers() {
        let ctx = PredictionContext::new("").with_previous(&["a", "b", "c", "d"]);
        assert_eq!(ctx.recent_words(2), &["c".to_string(), "d".to_string()]);
        assert_eq!(ctx.recent_words(10).len(), 4);
        assert_eq!(ctx.preceding_word(), Some("d"));
        assert!(ctx.at_word_boundary());
        assert!(PredictionContext::new("word ").at_word_boundary());
        assert!(!PredictionContext::new("wor").at_word_boundary());
    }

    #[test]
    fn display_text_falls_back_to_text() {
        let p = Prediction::new("teh", PredictionKind::Correction, 2.0, PredictionSource::Corrector);
        assert_eq!(p.confidence, 1.0);
        assert_eq!(p.display_text(), "teh");
        let p = p.with_meta("display_text", "the");
        assert_eq!(p.display_text(), "the");
    }
}
