// core/tests/model_properties.rs
//
// Properties of the frequency model that must hold for any input:
// - smoothed probabilities never reach zero
// - decay never raises a frequency
// - pruning never leaves dangling bigrams or trigrams

use proptest::prelude::*;
use wordpredict_core::{Config, FrequencyModel, NGramType};

const DAY: u64 = 24 * 60 * 60 * 1000;

fn words() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-f]{1,3}", 1..8)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn probability_is_positive(
        history in prop::collection::vec(words(), 0..5),
        probe in "[a-h]{1,4}",
        context in prop::collection::vec("[a-h]{1,3}", 0..3),
    ) {
        let model = FrequencyModel::new(&Config::default());
        for sentence in &history {
            model.record_usage(sentence);
        }
        prop_assert!(model.get_frequency(&probe, &context) > 0.0);
    }

    #[test]
    fn decay_is_monotone(
        history in prop::collection::vec((words(), 0u64..30), 1..6),
        rate in 0.0f64..2.0,
        first in 0u64..10,
        gap in 0u64..10,
    ) {
        let model = FrequencyModel::new(&Config::default());
        for (sentence, day) in &history {
            model.record_usage_at(sentence, day * DAY);
        }
        let t1 = (30 + first) * DAY;
        let t2 = t1 + gap * DAY;

        model.apply_decay_at(rate, t1);
        let snapshot = |m: &FrequencyModel| {
            let mut all = Vec::new();
            for kind in [NGramType::Unigram, NGramType::Bigram, NGramType::Trigram] {
                for e in m.entries(kind) {
                    all.push((e.ngram.key(), e.decayed_frequency));
                }
            }
            all.sort_by(|a, b| a.0.cmp(&b.0));
            all
        };
        let before = snapshot(&model);
        model.apply_decay_at(rate, t2);
        let after = snapshot(&model);

        prop_assert_eq!(before.len(), after.len());
        for ((k1, f1), (k2, f2)) in before.iter().zip(after.iter()) {
            prop_assert_eq!(k1, k2);
            prop_assert!(f2 <= f1, "{} grew from {} to {}", k1, f1, f2);
        }
    }

    #[test]
    fn prune_keeps_references_valid(
        history in prop::collection::vec((words(), 0u64..20), 1..8),
        rate in 0.1f64..1.0,
    ) {
        let model = FrequencyModel::new(&Config::default());
        for (sentence, day) in &history {
            model.record_usage_at(sentence, day * DAY);
        }
        model.apply_decay_at(rate, 20 * DAY);
        model.prune();

        for kind in [NGramType::Bigram, NGramType::Trigram] {
            for e in model.entries(kind) {
                for w in e.ngram.words() {
                    prop_assert!(model.entry(&[w.as_str()]).is_some(), "{} dangles", e.ngram);
                }
            }
        }
        for e in model.entries(NGramType::Trigram) {
            let w = e.ngram.words();
            prop_assert!(model.entry(&w[0..2]).is_some());
            prop_assert!(model.entry(&w[1..3]).is_some());
        }
    }
}

#[test]
fn vocabulary_ceiling_triggers_pruning() {
    let model = FrequencyModel::new(&Config::default());
    model.set_parameters(None, None, Some(2), Some(1000), None);
    for i in 0..1000 {
        model.record_usage(&[format!("w{i}")]);
    }
    assert_eq!(model.vocabulary_size(), 1000);
    model.record_usage(&["w0"]);
    model.record_usage(&["w0", "overflow"]);
    // everything seen once is below the floor of 2
    assert_eq!(model.vocabulary_size(), 1);
    assert_eq!(model.count(&["w0"]), 3);
}

#[test]
fn empty_input_is_ignored() {
    let model = FrequencyModel::new(&Config::default());
    model.record_usage::<&str>(&[]);
    model.record_usage(&["  ", "\t"]);
    assert_eq!(model.vocabulary_size(), 0);
    assert!(model.get_top_words::<&str>(5, &[]).is_empty());
    assert!(model.calculate_perplexity::<&str>(&[]).is_infinite());
}
