// core/tests/concurrency.rs
//
// Shared instances used from several threads at once:
// - concurrent learning of the same n-gram loses no increments
// - predictions and selections interleave safely
// - release() cancels queued background work

use std::sync::Arc;
use std::thread;
use wordpredict_core::{
    Config, Corrector, FrequencyModel, NGramType, PredictionContext, PredictionEngine,
    WorkerPool,
};

#[test]
fn concurrent_record_usage_is_atomic_per_key() {
    let model = FrequencyModel::new(&Config::default());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let model = model.clone();
            thread::spawn(move || {
                let own = format!("word{i}");
                for _ in 0..250 {
                    model.record_usage(&["shared", "pair"]);
                    model.record_usage(&[own.as_str()]);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(model.count(&["shared"]), 2000);
    assert_eq!(model.count(&["shared", "pair"]), 2000);
    assert_eq!(model.count(&["word3"]), 250);
    let stats = model.statistics();
    assert_eq!(stats.total_unigrams, 2000 * 2 + 2000);
    assert_eq!(stats.vocabulary_size, 10);
}

#[test]
fn predictions_and_selections_interleave() {
    let cfg = Config {
        min_confidence: 0.0,
        ..Config::default()
    };
    let pool = Arc::new(WorkerPool::new(3));
    let model = FrequencyModel::with_pool(&cfg, &pool);
    for w in ["alpha", "alps", "altitude", "alto"] {
        model.insert_count(&[w], 5);
    }
    let engine = PredictionEngine::builder(&cfg)
        .frequency_model(model.clone())
        .corrector(Corrector::with_pool(&cfg, &pool))
        .pool(pool)
        .build();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let engine = engine.clone();
            thread::spawn(move || {
                let ctx = PredictionContext::new("al").with_previous(&["go"]);
                for _ in 0..50 {
                    let preds = engine.get_predictions(&ctx);
                    if let Some(p) = preds.get(i % preds.len().max(1)) {
                        engine.record_selection(p, &ctx);
                    }
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    // every selection, completion or correction, lands as a "go <word>" bigram
    let learned: u64 = model
        .entries(NGramType::Bigram)
        .iter()
        .filter(|e| e.ngram.words()[0] == "go")
        .map(|e| e.raw_count)
        .sum();
    assert_eq!(learned, 200);
}

#[test]
fn background_predictions_match_foreground() {
    let cfg = Config {
        min_confidence: 0.0,
        ..Config::default()
    };
    let model = FrequencyModel::new(&cfg);
    model.insert_count(&["background"], 3);
    model.insert_count(&["bacon"], 2);
    let engine = PredictionEngine::builder(&cfg).frequency_model(model).build();

    let ctx = PredictionContext::new("ba");
    let bg = engine.spawn_predictions(ctx.clone()).wait().unwrap();
    engine.clear_cache();
    assert_eq!(bg, engine.get_predictions(&ctx));
}

#[test]
fn release_cancels_pending_work() {
    let pool = Arc::new(WorkerPool::new(1));
    let cfg = Config::default();
    let model = FrequencyModel::with_pool(&cfg, &pool);
    model.record_usage(&["soon", "gone"]);

    model.release();
    assert!(model.spawn_decay(0.5).wait().is_none());
    assert!(model.spawn_save().wait().is_none());
    assert_eq!(model.vocabulary_size(), 0);
}
