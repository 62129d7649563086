// core/tests/scenarios.rs
//
// End-to-end behaviour of the three components working from a cold start:
// - n-gram context raises observed continuations
// - single-edit typos are corrected from the user dictionary
// - freshly added words are treated as valid
// - completions follow word frequency

use wordpredict_core::{
    Confidence, Config, Corrector, FrequencyModel, PredictionContext, PredictionEngine,
};

fn quiet_config() -> Config {
    Config {
        min_confidence: 0.0,
        ..Config::default()
    }
}

#[test]
fn context_prefers_observed_continuation() {
    let model = FrequencyModel::new(&Config::default());
    for _ in 0..3 {
        model.record_usage(&["the", "cat", "sat"]);
    }
    let cat = model.get_frequency("cat", &["the"]);
    let dog = model.get_frequency("dog", &["the"]);
    assert!(cat > dog, "cat={cat} dog={dog}");
}

#[test]
fn extra_letter_is_corrected_to_user_word() {
    let corrector = Corrector::new(&Config::default());
    corrector.add_word("hello");

    let result = corrector.suggest("helllo", None);
    let best = result.best().expect("a suggestion");
    assert_eq!(best.word, "hello");
    assert_eq!(best.edit_distance, 1);
    assert!(best.is_user_word);
}

#[test]
fn added_word_is_immediately_valid() {
    let corrector = Corrector::new(&Config::default());
    corrector.add_word("kotlin");

    let result = corrector.suggest("kotlin", None);
    assert!(result.suggestions.is_empty());
    assert_eq!(result.confidence, Confidence::VeryHigh);
    assert!(result.corrected.is_none());
}

#[test]
fn frequent_completion_ranks_first() {
    let cfg = quiet_config();
    let model = FrequencyModel::new(&cfg);
    model.insert_count(&["the"], 100);
    model.insert_count(&["there"], 10);
    let engine = PredictionEngine::builder(&cfg).frequency_model(model).build();

    let preds = engine.get_predictions(&PredictionContext::new("th"));
    let pos = |w: &str| preds.iter().position(|p| p.text == w);
    let the = pos("the").expect("the predicted");
    let there = pos("there").expect("there predicted");
    assert!(the < there);
}

#[test]
fn default_confidence_floor_drops_rare_completion() {
    // "there" scores about 0.03 after the completion weight, below the 0.1 floor.
    let cfg = Config::default();
    let model = FrequencyModel::new(&cfg);
    model.insert_count(&["the"], 100);
    model.insert_count(&["there"], 10);
    let engine = PredictionEngine::builder(&cfg).frequency_model(model).build();

    let preds = engine.get_predictions(&PredictionContext::new("th"));
    let texts: Vec<&str> = preds.iter().map(|p| p.text.as_str()).collect();
    assert_eq!(texts, vec!["the"]);
}

#[test]
fn learning_loop_feeds_back_into_predictions() {
    let cfg = quiet_config();
    let engine = PredictionEngine::builder(&cfg)
        .frequency_model(FrequencyModel::new(&cfg))
        .corrector(Corrector::new(&cfg))
        .build();

    let ctx = PredictionContext::new("").with_previous(&["rust"]);
    assert!(engine.get_predictions(&ctx).is_empty());

    let typed = PredictionContext::new("crab").with_previous(&["rust"]);
    let choice = wordpredict_core::Prediction::new(
        "crab",
        wordpredict_core::PredictionKind::Completion,
        1.0,
        wordpredict_core::PredictionSource::FrequencyModel,
    );
    engine.record_selection(&choice, &typed);

    let next = engine.get_predictions(&ctx);
    assert_eq!(next.first().map(|p| p.text.as_str()), Some("crab"));
}
