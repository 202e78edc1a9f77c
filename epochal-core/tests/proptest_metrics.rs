//! Property-based tests for metric aggregation using proptest.

use std::collections::BTreeMap;

use proptest::prelude::*;

use epochal_core::checkpoint::{RankedCheckpoint, TopK};
use epochal_core::metrics::{BestMetricSpec, Direction, MetricAggregator, Meter, Stage};

fn aggregator(best: &[(&str, &str)]) -> MetricAggregator {
    let stages = BTreeMap::from([
        (Stage::Train, vec!["loss".to_string()]),
        (Stage::Validation, vec!["acc".to_string(), "loss".to_string()]),
    ]);
    MetricAggregator::new(&stages, BestMetricSpec::from_pairs(best.iter().copied()).unwrap())
        .unwrap()
}

fn batches() -> impl Strategy<Value = Vec<(f64, f64)>> {
    prop::collection::vec((-1_000.0f64..1_000.0, 0.01f64..512.0), 1..40)
}

// --- Weighted mean ---

proptest! {
    #[test]
    fn epoch_average_is_weighted_mean(batches in batches()) {
        let mut agg = aggregator(&[]);
        for (value, weight) in &batches {
            agg.update(Stage::Validation, "acc", *value, *weight).unwrap();
        }
        let total: f64 = batches.iter().map(|(_, w)| w).sum();
        let expected = batches.iter().map(|(v, w)| v * w).sum::<f64>() / total;
        let got = agg.epoch_average(Stage::Validation)["acc"];
        prop_assert!((got - expected).abs() <= 1e-9 * expected.abs().max(1.0));
    }

    #[test]
    fn average_stays_within_observed_range(batches in batches()) {
        let mut meter = Meter::new();
        for (value, weight) in &batches {
            meter.update(*value, *weight);
        }
        let lo = batches.iter().map(|(v, _)| *v).fold(f64::INFINITY, f64::min);
        let hi = batches.iter().map(|(v, _)| *v).fold(f64::NEG_INFINITY, f64::max);
        let avg = meter.value().unwrap();
        prop_assert!(avg >= lo - 1e-9 && avg <= hi + 1e-9);
    }

    #[test]
    fn uniform_scaling_of_weights_is_invariant(batches in batches(), scale in 0.1f64..100.0) {
        let mut plain = Meter::new();
        let mut scaled = Meter::new();
        for (value, weight) in &batches {
            plain.update(*value, *weight);
            scaled.update(*value, *weight * scale);
        }
        let a = plain.value().unwrap();
        let b = scaled.value().unwrap();
        prop_assert!((a - b).abs() <= 1e-9 * a.abs().max(1.0));
    }

    #[test]
    fn reset_clears_stage_only(batches in batches()) {
        let mut agg = aggregator(&[]);
        for (value, weight) in &batches {
            agg.update(Stage::Train, "loss", *value, *weight).unwrap();
            agg.update(Stage::Validation, "loss", *value, *weight).unwrap();
        }
        agg.reset(Stage::Train);
        prop_assert!(agg.epoch_average(Stage::Train).is_empty());
        prop_assert_eq!(agg.epoch_average(Stage::Validation).len(), 1);
    }
}

// --- Best tracking ---

proptest! {
    #[test]
    fn best_max_is_running_maximum(values in prop::collection::vec(-100.0f64..100.0, 1..30)) {
        let mut agg = aggregator(&[("val/acc", "max")]);
        for (epoch, value) in values.iter().enumerate() {
            agg.update_best("val/acc", *value, epoch as u64).unwrap();
        }
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let last_max_epoch = values.iter().rposition(|v| *v == max).unwrap() as u64;
        prop_assert_eq!(agg.best("val/acc").unwrap(), max);
        prop_assert_eq!(agg.best_epoch("val/acc").unwrap(), last_max_epoch);
    }

    #[test]
    fn best_min_never_gets_worse(values in prop::collection::vec(-100.0f64..100.0, 1..30)) {
        let mut agg = aggregator(&[("val/loss", "min")]);
        let mut previous = f64::INFINITY;
        for (epoch, value) in values.iter().enumerate() {
            agg.update_best("val/loss", *value, epoch as u64).unwrap();
            let best = agg.best("val/loss").unwrap();
            prop_assert!(best <= previous);
            previous = best;
        }
    }

    #[test]
    fn top_k_keeps_the_k_best(values in prop::collection::vec(0.0f64..1.0, 1..25), k in 1usize..5) {
        let mut top = TopK::new(k, Direction::Min);
        for (epoch, value) in values.iter().enumerate() {
            top.offer(RankedCheckpoint {
                path: format!("{epoch}.ckpt").into(),
                epoch: epoch as u64,
                value: *value,
            });
        }
        let mut sorted = values.clone();
        sorted.sort_by(f64::total_cmp);
        sorted.truncate(k);
        let kept: Vec<f64> = top.entries().iter().map(|e| e.value).collect();
        prop_assert_eq!(kept, sorted);
    }
}
