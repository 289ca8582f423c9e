//! Per-metric correlation signals and the top-N classifier. Joins ranked
//! players with known finish results by player id; the sign convention
//! after the direction flip is always "positive = good".

use std::collections::HashMap;

use serde::Serialize;

use crate::finish::FinishResult;
use crate::metrics::Metric;
use crate::ranking::RankedPlayer;
use crate::stats::{self, CvOutcome, TrainOptions, TrainingSample};

pub const MIN_CORRELATION_SAMPLES: usize = 5;
pub const MIN_FEATURE_COVERAGE: f64 = 0.70;
pub const DEFAULT_TOP_N: u32 = 20;

#[derive(Debug, Clone, Copy)]
pub struct MetricCorrelation {
    pub metric: Metric,
    pub correlation: f64,
    pub samples: usize,
}

fn joined_values<'a>(
    ranked: &'a [RankedPlayer],
    results: &[FinishResult],
) -> Vec<(&'a RankedPlayer, u32)> {
    let positions: HashMap<&str, u32> = results
        .iter()
        .filter_map(|r| r.position.map(|p| (r.player_id.as_str(), p)))
        .collect();
    ranked
        .iter()
        .filter_map(|p| positions.get(p.player_id.as_str()).map(|pos| (p, *pos)))
        .collect()
}

fn directed(metric: Metric, value: f64) -> f64 {
    if metric.higher_is_better() { value } else { -value }
}

/// Linear correlation of each metric with `-finishPosition`. Metrics with
/// fewer than [`MIN_CORRELATION_SAMPLES`] joined samples report
/// correlation 0 (sample count kept as-is).
pub fn correlation_per_metric(
    ranked: &[RankedPlayer],
    results: &[FinishResult],
) -> Vec<MetricCorrelation> {
    per_metric_correlation(ranked, results, |pos| -(pos as f64))
}

/// Point-biserial-style correlation of each metric with the binary label
/// "finished top-N".
pub fn top_n_correlation_per_metric(
    ranked: &[RankedPlayer],
    results: &[FinishResult],
    top_n: u32,
) -> Vec<MetricCorrelation> {
    per_metric_correlation(ranked, results, move |pos| {
        if pos <= top_n { 1.0 } else { 0.0 }
    })
}

fn per_metric_correlation(
    ranked: &[RankedPlayer],
    results: &[FinishResult],
    target: impl Fn(u32) -> f64,
) -> Vec<MetricCorrelation> {
    let joined = joined_values(ranked, results);
    Metric::ALL
        .into_iter()
        .map(|metric| {
            let mut xs = Vec::new();
            let mut ys = Vec::new();
            for (player, pos) in &joined {
                if let Some(value) = player.metrics.get(&metric).filter(|v| v.is_finite()) {
                    xs.push(directed(metric, *value));
                    ys.push(target(*pos));
                }
            }
            let correlation = if xs.len() < MIN_CORRELATION_SAMPLES {
                0.0
            } else {
                stats::pearson(&xs, &ys)
            };
            MetricCorrelation {
                metric,
                correlation,
                samples: xs.len(),
            }
        })
        .collect()
}

/// Direction-flipped feature vector over the full metric catalogue.
/// Returns `None` when fewer than [`MIN_FEATURE_COVERAGE`] of the metrics
/// are present and finite: a player with too many missing metrics is
/// excluded from training, not imputed. Gaps inside an accepted vector
/// are filled with 0.0 before standardization.
pub fn build_feature_vector(player: &RankedPlayer) -> Option<Vec<f64>> {
    let mut features = Vec::with_capacity(Metric::ALL.len());
    let mut valid = 0usize;
    for metric in Metric::ALL {
        match player.metrics.get(&metric).filter(|v| v.is_finite()) {
            Some(value) => {
                features.push(directed(metric, *value));
                valid += 1;
            }
            None => features.push(0.0),
        }
    }
    let coverage = valid as f64 / Metric::ALL.len() as f64;
    if coverage < MIN_FEATURE_COVERAGE {
        None
    } else {
        Some(features)
    }
}

pub fn training_samples(
    ranked: &[RankedPlayer],
    results: &[FinishResult],
    top_n: u32,
) -> Vec<TrainingSample> {
    joined_values(ranked, results)
        .into_iter()
        .filter_map(|(player, pos)| {
            build_feature_vector(player).map(|features| TrainingSample {
                features,
                label: if pos <= top_n { 1.0 } else { 0.0 },
            })
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricWeightEntry {
    pub label: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassifierSummary {
    pub samples: usize,
    pub accuracy: f64,
    pub log_loss: f64,
    /// The 10 largest-magnitude standardized feature weights, most
    /// influential first — the human-auditable "what mattered most" list.
    pub top_weights: Vec<MetricWeightEntry>,
}

/// Train the joint top-N classifier over all metrics. `None` when the
/// joined sample count is too small; callers degrade to correlation-only
/// signal.
pub fn train_top_n_classifier(
    ranked: &[RankedPlayer],
    results: &[FinishResult],
    top_n: u32,
) -> Option<(ClassifierSummary, Vec<(Metric, f64)>)> {
    classifier_from_samples(&training_samples(ranked, results, top_n))
}

/// Same classifier trained on samples pooled across events. Each event's
/// samples are built separately so a player appearing in several events
/// contributes one labelled sample per event.
pub fn train_top_n_classifier_events(
    events: &[(String, Vec<RankedPlayer>, Vec<FinishResult>)],
    top_n: u32,
) -> Option<(ClassifierSummary, Vec<(Metric, f64)>)> {
    let samples: Vec<TrainingSample> = event_cv_samples(events, top_n)
        .into_iter()
        .flat_map(|(_, s)| s)
        .collect();
    classifier_from_samples(&samples)
}

fn classifier_from_samples(
    samples: &[TrainingSample],
) -> Option<(ClassifierSummary, Vec<(Metric, f64)>)> {
    let model = stats::train_logistic(samples, TrainOptions::default())?;
    let eval = stats::evaluate_logistic(&model, samples);

    let mut weighted: Vec<(Metric, f64)> = Metric::ALL
        .into_iter()
        .zip(model.weights.iter().copied())
        .collect();
    weighted.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));

    let summary = ClassifierSummary {
        samples: samples.len(),
        accuracy: eval.accuracy,
        log_loss: eval.log_loss,
        top_weights: weighted
            .iter()
            .take(10)
            .map(|(metric, w)| MetricWeightEntry {
                label: metric.label().to_string(),
                weight: *w,
            })
            .collect(),
    };
    Some((summary, weighted))
}

/// Assemble cross-validation folds grouped by tournament event id. Events
/// whose players produce no usable feature vectors are dropped.
pub fn event_cv_samples(
    events: &[(String, Vec<RankedPlayer>, Vec<FinishResult>)],
    top_n: u32,
) -> Vec<(String, Vec<TrainingSample>)> {
    events
        .iter()
        .filter_map(|(event_id, ranked, results)| {
            let samples = training_samples(ranked, results, top_n);
            if samples.is_empty() {
                None
            } else {
                Some((event_id.clone(), samples))
            }
        })
        .collect()
}

/// Event-grouped cross-validation over the standard L2 grid.
pub fn cross_validate_events(
    events: &[(String, Vec<RankedPlayer>, Vec<FinishResult>)],
    top_n: u32,
) -> Option<CvOutcome> {
    const L2_GRID: [f64; 4] = [0.001, 0.01, 0.05, 0.1];
    let groups = event_cv_samples(events, top_n);
    stats::cross_validate_by_group(&groups, &L2_GRID)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(id: &str, sg_putting: f64) -> RankedPlayer {
        let mut metrics: HashMap<Metric, f64> =
            Metric::ALL.into_iter().map(|m| (m, 0.1)).collect();
        metrics.insert(Metric::SgPutting, sg_putting);
        RankedPlayer {
            player_id: id.to_string(),
            name: id.to_string(),
            rank: 1,
            metrics,
        }
    }

    fn finish(id: &str, pos: u32) -> FinishResult {
        FinishResult {
            player_id: id.to_string(),
            position: Some(pos),
        }
    }

    #[test]
    fn engineered_metric_correlates_strongly() {
        // SG Putting decreases as finish position worsens.
        let ranked: Vec<RankedPlayer> = (1..=12)
            .map(|i| player(&format!("p{i}"), 3.0 - i as f64 * 0.25))
            .collect();
        let results: Vec<FinishResult> =
            (1..=12).map(|i| finish(&format!("p{i}"), i)).collect();

        let correlations = correlation_per_metric(&ranked, &results);
        let putting = correlations
            .iter()
            .find(|c| c.metric == Metric::SgPutting)
            .unwrap();
        assert!(putting.correlation > 0.95, "corr={}", putting.correlation);
        assert_eq!(putting.samples, 12);
    }

    #[test]
    fn sparse_metrics_report_zero() {
        let mut ranked: Vec<RankedPlayer> = (1..=3)
            .map(|i| player(&format!("p{i}"), i as f64))
            .collect();
        // Drop the metric everywhere except two players.
        for p in ranked.iter_mut().skip(2) {
            p.metrics.remove(&Metric::SgPutting);
        }
        let results: Vec<FinishResult> =
            (1..=3).map(|i| finish(&format!("p{i}"), i)).collect();
        let correlations = correlation_per_metric(&ranked, &results);
        let putting = correlations
            .iter()
            .find(|c| c.metric == Metric::SgPutting)
            .unwrap();
        assert_eq!(putting.correlation, 0.0);
        assert_eq!(putting.samples, 2);
    }

    #[test]
    fn lower_is_better_metrics_are_sign_flipped() {
        // Putts per round rises with finish position (worse), so after
        // the flip the correlation must come out positive.
        let ranked: Vec<RankedPlayer> = (1..=10)
            .map(|i| {
                let mut p = player(&format!("p{i}"), 0.0);
                p.metrics.insert(Metric::PuttsPerRound, 27.0 + i as f64);
                p
            })
            .collect();
        let results: Vec<FinishResult> =
            (1..=10).map(|i| finish(&format!("p{i}"), i)).collect();
        let correlations = correlation_per_metric(&ranked, &results);
        let putts = correlations
            .iter()
            .find(|c| c.metric == Metric::PuttsPerRound)
            .unwrap();
        assert!(putts.correlation > 0.95);
    }

    #[test]
    fn coverage_gate_excludes_sparse_players() {
        let mut sparse = player("sparse", 1.0);
        sparse.metrics.retain(|m, _| *m == Metric::SgPutting);
        assert!(build_feature_vector(&sparse).is_none());

        let full = player("full", 1.0);
        let features = build_feature_vector(&full).expect("full coverage");
        assert_eq!(features.len(), Metric::ALL.len());
    }

    #[test]
    fn classifier_needs_enough_samples() {
        let ranked = vec![player("p1", 1.0)];
        let results = vec![finish("p1", 1)];
        assert!(train_top_n_classifier(&ranked, &results, DEFAULT_TOP_N).is_none());
    }

    #[test]
    fn top_n_correlation_uses_binary_target() {
        let ranked: Vec<RankedPlayer> = (1..=30)
            .map(|i| player(&format!("p{i}"), if i <= 20 { 2.0 } else { -2.0 }))
            .collect();
        let results: Vec<FinishResult> =
            (1..=30).map(|i| finish(&format!("p{i}"), i)).collect();
        let correlations = top_n_correlation_per_metric(&ranked, &results, 20);
        let putting = correlations
            .iter()
            .find(|c| c.metric == Metric::SgPutting)
            .unwrap();
        assert!(putting.correlation > 0.9);
    }
}
