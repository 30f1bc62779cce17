//! Synthetic fixtures shared by the integration tests

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use signal_lab::config::AppConfig;
use signal_lab::types::TimeSeries;

/// 2020-01-01 00:00:00 UTC
pub const START_MS: i64 = 1_577_836_800_000;
pub const MINUTE_MS: i64 = 60_000;

/// Random-walk klines with two features and two binary labels
///
/// `label_up` is 1 when `f1 > 0.5` so a classifier can learn it; `label_noise` is random.
pub fn synthetic_klines(rows: usize, seed: u64) -> TimeSeries {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut price = 100.0;

    let mut close = Vec::with_capacity(rows);
    let mut high = Vec::with_capacity(rows);
    let mut f1 = Vec::with_capacity(rows);
    let mut f2 = Vec::with_capacity(rows);
    let mut label_up = Vec::with_capacity(rows);
    let mut label_noise = Vec::with_capacity(rows);

    for _ in 0..rows {
        price *= 1.0 + rng.gen_range(-0.002..0.002);
        close.push(price);
        high.push(price * (1.0 + rng.gen_range(0.0..0.003)));

        let a: f64 = rng.gen();
        f1.push(a);
        f2.push(rng.gen::<f64>());
        label_up.push(if a > 0.5 { 1.0 } else { 0.0 });
        label_noise.push(if rng.gen_bool(0.3) { 1.0 } else { 0.0 });
    }

    TimeSeries::new((0..rows as i64).map(|i| START_MS + i * MINUTE_MS).collect())
        .with_column("close", close)
        .unwrap()
        .with_column("high", high)
        .unwrap()
        .with_column("f1", f1)
        .unwrap()
        .with_column("f2", f2)
        .unwrap()
        .with_column("label_up", label_up)
        .unwrap()
        .with_column("label_noise", label_noise)
        .unwrap()
}

/// Flat prices with no buy signal; tests set signals and highs row by row
pub fn flat_predictions(rows: usize) -> TimeSeries {
    TimeSeries::new((0..rows as i64).map(|i| START_MS + i * MINUTE_MS).collect())
        .with_column("close", vec![100.0; rows])
        .unwrap()
        .with_column("high", vec![100.0; rows])
        .unwrap()
        .with_column("score_a", vec![0.0; rows])
        .unwrap()
        .with_column("score_b", vec![0.0; rows])
        .unwrap()
}

/// Defaults pointed at a temp directory and the synthetic column names
pub fn test_config(dir: &std::path::Path) -> AppConfig {
    let mut config = AppConfig::load(None).unwrap();
    config.data.in_dir = dir.display().to_string();
    config.data.out_dir = dir.join("out").display().to_string();
    config.model.labels = vec!["label_up".into(), "label_noise".into()];
    config.model.features = vec!["f1".into(), "f2".into()];
    config.model.labels_horizon = 10;
    config.signals.score_primary = "score_a".into();
    config.signals.score_secondary = "score_b".into();
    config
}
