//! Collaborators the engine can be wired to, and its listener.
use serde::{Deserialize, Serialize};

use crate::prediction::{Prediction, PredictionContext};

/// How serious a spell-check finding is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    None,
    Typo,
    Misspelling,
    Grammar,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Typo => "typo",
            Severity::Misspelling => "misspelling",
            Severity::Grammar => "grammar",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpellCheckResult {
    pub is_correct: bool,
    pub suggestions: Vec<String>,
    /// Applied to every suggestion, in [0, 1]
    pub confidence: f32,
    pub severity: Severity,
}

impl SpellCheckResult {
    pub fn correct() -> Self {
        Self {
            is_correct: true,
            suggestions: Vec::new(),
            confidence: 1.0,
            severity: Severity::None,
        }
    }
}

/// An external spell checker, ranked with the `SpellCheck` weight.
pub trait SpellChecker: Send + Sync {
    fn check_word(&self, word: &str) -> SpellCheckResult;
}

/// Any other candidate generator (e.g. a neural model). Its predictions are
/// ranked with the `External` weight whatever source they claim.
pub trait ExternalSource: Send + Sync {
    fn predict(&self, context: &PredictionContext, limit: usize) -> Vec<Prediction>;
}

/// Observer for engine events. All methods default to no-ops.
pub trait PredictionListener: Send + Sync {
    /// A fresh (non-cached) ranking was produced.
    fn on_predictions_updated(&self, _predictions: &[Prediction]) {}
    fn on_prediction_selected(&self, _prediction: &Prediction) {}
    /// The selected text was fed back into the model.
    fn on_prediction_learned(&self, _text: &str) {}
}
