//! Blends metric-importance signals (current season, historical,
//! external validation report, drift prior) into one alignment map, and
//! blends whole weight vectors between a prior template and a
//! model-suggested one, shrinking the model's influence by the CV
//! reliability score.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::metrics::{self, Metric, MetricGroup};
use crate::signal::MetricCorrelation;
use crate::stats::CvSummary;

pub type AlignmentMap = HashMap<Metric, f64>;

/// How much of the final weights the data-driven suggestion may claim at
/// full reliability.
pub const MAX_MODEL_SHARE: f64 = 0.35;

pub fn build_alignment_map(signal: &[MetricCorrelation]) -> AlignmentMap {
    signal.iter().map(|c| (c.metric, c.correlation)).collect()
}

/// Alignment map from externally supplied label/score rows (validation
/// report). Labels that do not resolve in the catalogue are dropped.
pub fn alignment_map_from_labels(entries: &[(String, f64)]) -> AlignmentMap {
    entries
        .iter()
        .filter_map(|(label, score)| Metric::from_label(label).map(|m| (m, *score)))
        .collect()
}

/// Weighted blend keyed by the union of label sets. A label absent from a
/// source contributes 0 for that source rather than being excluded, which
/// dilutes the blended score of labels only some sources mention. Mixing
/// weights should sum to <= 1; that is tolerated, not enforced.
pub fn blend_alignment_maps(sources: &[(AlignmentMap, f64)]) -> AlignmentMap {
    let weight_sum: f64 = sources.iter().map(|(_, w)| w.max(0.0)).sum();
    if weight_sum <= f64::EPSILON {
        return AlignmentMap::new();
    }

    let mut union: HashSet<Metric> = HashSet::new();
    for (map, _) in sources {
        union.extend(map.keys().copied());
    }

    union
        .into_iter()
        .map(|metric| {
            let mixed: f64 = sources
                .iter()
                .map(|(map, w)| w.max(0.0) * map.get(&metric).copied().unwrap_or(0.0))
                .sum();
            (metric, mixed / weight_sum)
        })
        .collect()
}

/// A metric is inverted when it is declared "lower is better" but its
/// observed correlation (already direction-flipped) contradicts that
/// declaration. Downstream weights for these metrics are forced negative
/// so the search does not fight the data.
pub fn inverted_metric_set(signal: &[MetricCorrelation]) -> HashSet<Metric> {
    signal
        .iter()
        .filter(|c| !c.metric.higher_is_better() && c.correlation < 0.0 && c.samples > 0)
        .map(|c| c.metric)
        .collect()
}

pub fn apply_inversions(weights: &mut HashMap<Metric, f64>, inverted: &HashSet<Metric>) {
    for metric in inverted {
        if let Some(w) = weights.get_mut(metric) {
            *w = -w.abs();
        }
    }
}

/// Convex combination over the union of group keys, renormalized to
/// sum 1.
pub fn blend_group_weights(
    prior: &HashMap<MetricGroup, f64>,
    model: &HashMap<MetricGroup, f64>,
    prior_share: f64,
    model_share: f64,
) -> HashMap<MetricGroup, f64> {
    let mut out: HashMap<MetricGroup, f64> = HashMap::new();
    for group in MetricGroup::ALL {
        let p = prior.get(&group).copied().unwrap_or(0.0);
        let m = model.get(&group).copied().unwrap_or(0.0);
        out.insert(group, prior_share * p + model_share * m);
    }
    metrics::normalize_group_weights(&mut out);
    out
}

/// Per-group convex combination: weights inside one group are combined
/// and renormalized by that group's total absolute weight, independently
/// of every other group.
pub fn blend_metric_weights(
    prior: &HashMap<Metric, f64>,
    model: &HashMap<Metric, f64>,
    prior_share: f64,
    model_share: f64,
) -> HashMap<Metric, f64> {
    let mut out: HashMap<Metric, f64> = HashMap::new();
    for metric in Metric::ALL {
        let p = prior.get(&metric).copied().unwrap_or(0.0);
        let m = model.get(&metric).copied().unwrap_or(0.0);
        out.insert(metric, prior_share * p + model_share * m);
    }
    metrics::normalize_metric_weights(&mut out);
    out
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReliabilityThresholds {
    pub log_loss_good: f64,
    pub log_loss_bad: f64,
    pub accuracy_bad: f64,
    pub accuracy_good: f64,
    pub events_full: usize,
    pub samples_full: usize,
}

impl Default for ReliabilityThresholds {
    fn default() -> Self {
        Self {
            log_loss_good: 0.45,
            log_loss_bad: 0.80,
            accuracy_bad: 0.50,
            accuracy_good: 0.75,
            events_full: 6,
            samples_full: 200,
        }
    }
}

fn ramp_up(value: f64, lo: f64, hi: f64) -> f64 {
    if hi <= lo {
        return 1.0;
    }
    ((value - lo) / (hi - lo)).clamp(0.0, 1.0)
}

/// Reliability of the CV-selected classifier, in [0, 1]. A product of
/// four sub-scores (log-loss quality, accuracy quality, event-count
/// adequacy, sample-count adequacy): any weak dimension suppresses the
/// whole score toward 0, which is what keeps a lucky log-loss on two
/// events from overriding the prior template. No CV at all means 0.
pub fn compute_reliability(cv: Option<&CvSummary>, thresholds: &ReliabilityThresholds) -> f64 {
    let Some(cv) = cv else {
        return 0.0;
    };
    let loss_score = ramp_up(
        thresholds.log_loss_bad - cv.avg_log_loss,
        0.0,
        thresholds.log_loss_bad - thresholds.log_loss_good,
    );
    let accuracy_score = ramp_up(
        cv.avg_accuracy,
        thresholds.accuracy_bad,
        thresholds.accuracy_good,
    );
    let event_score = ramp_up(cv.event_count as f64, 0.0, thresholds.events_full as f64);
    let sample_score = ramp_up(cv.total_samples as f64, 0.0, thresholds.samples_full as f64);
    loss_score * accuracy_score * event_score * sample_score
}

pub fn model_share(reliability: f64) -> f64 {
    MAX_MODEL_SHARE * reliability.clamp(0.0, 1.0)
}

/// Externally computed classification of how much a metric's
/// model-predicted value has been diverging from actual outcomes.
/// Bounds how far that metric's weight may move during search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DriftStatus {
    Stable,
    Watch,
    Chronic,
}

impl DriftStatus {
    pub fn range_pct(self) -> f64 {
        match self {
            DriftStatus::Stable => 0.10,
            DriftStatus::Watch => 0.20,
            DriftStatus::Chronic => 0.35,
        }
    }
}

/// Per-metric `[min, max]` bounds centered on the externally recommended
/// weight, with half-width from the metric's drift status. Metrics with
/// no status get the Watch range.
pub fn constraint_ranges(
    recommended: &HashMap<Metric, f64>,
    drift: &HashMap<Metric, DriftStatus>,
) -> HashMap<Metric, (f64, f64)> {
    recommended
        .iter()
        .map(|(metric, center)| {
            let pct = drift
                .get(metric)
                .copied()
                .unwrap_or(DriftStatus::Watch)
                .range_pct();
            let a = center * (1.0 - pct);
            let b = center * (1.0 + pct);
            (*metric, (a.min(b), a.max(b)))
        })
        .collect()
}

/// Signed alignment of a candidate's effective metric weights (group
/// weight x metric weight) against the blended alignment map, normalized
/// by total absolute effective weight. Roughly [-1, 1].
pub fn alignment_score(
    group_weights: &HashMap<MetricGroup, f64>,
    metric_weights: &HashMap<Metric, f64>,
    map: &AlignmentMap,
) -> f64 {
    let mut signed = 0.0;
    let mut total_abs = 0.0;
    for metric in Metric::ALL {
        let gw = group_weights.get(&metric.group()).copied().unwrap_or(0.0);
        let mw = metric_weights.get(&metric).copied().unwrap_or(0.0);
        let effective = gw * mw;
        if effective == 0.0 {
            continue;
        }
        total_abs += effective.abs();
        if let Some(score) = map.get(&metric) {
            signed += effective * score;
        }
    }
    if total_abs <= f64::EPSILON {
        0.0
    } else {
        signed / total_abs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cv(events: usize, samples: usize, log_loss: f64, accuracy: f64) -> CvSummary {
        CvSummary {
            event_count: events,
            total_samples: samples,
            best_l2: 0.01,
            avg_log_loss: log_loss,
            avg_accuracy: accuracy,
            folds_used: events,
        }
    }

    #[test]
    fn blend_dilutes_partial_labels() {
        let a: AlignmentMap = HashMap::from([(Metric::SgPutting, 0.8)]);
        let b: AlignmentMap = HashMap::from([(Metric::SgTotal, 0.6)]);
        let blended = blend_alignment_maps(&[(a, 0.5), (b, 0.5)]);
        // Each label only appears in one half of the mix.
        assert!((blended[&Metric::SgPutting] - 0.4).abs() < 1e-12);
        assert!((blended[&Metric::SgTotal] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn blend_with_no_weight_is_empty() {
        let a: AlignmentMap = HashMap::from([(Metric::SgPutting, 0.8)]);
        assert!(blend_alignment_maps(&[(a, 0.0)]).is_empty());
    }

    #[test]
    fn inversion_set_tracks_contradicted_directions() {
        let signal = vec![
            MetricCorrelation {
                metric: Metric::PuttsPerRound, // lower is better
                correlation: -0.4,             // contradicted after flip
                samples: 40,
            },
            MetricCorrelation {
                metric: Metric::ApproachProximity, // lower is better
                correlation: 0.3,                  // direction holds
                samples: 40,
            },
            MetricCorrelation {
                metric: Metric::SgTotal, // higher is better, never inverted
                correlation: -0.5,
                samples: 40,
            },
        ];
        let inverted = inverted_metric_set(&signal);
        assert!(inverted.contains(&Metric::PuttsPerRound));
        assert!(!inverted.contains(&Metric::ApproachProximity));
        assert!(!inverted.contains(&Metric::SgTotal));

        let mut weights = HashMap::from([(Metric::PuttsPerRound, 0.3)]);
        apply_inversions(&mut weights, &inverted);
        assert_eq!(weights[&Metric::PuttsPerRound], -0.3);
    }

    #[test]
    fn blended_metric_weights_normalize_per_group() {
        let prior = metrics::default_metric_weights();
        let mut model = metrics::default_metric_weights();
        model.insert(Metric::SgPutting, 0.9);
        let blended = blend_metric_weights(&prior, &model, 0.65, 0.35);
        for group in MetricGroup::ALL {
            let sum: f64 = group
                .metrics()
                .map(|m| blended.get(&m).copied().unwrap_or(0.0).abs())
                .sum();
            assert!((sum - 1.0).abs() < 1e-9, "{}: {sum}", group.label());
        }
    }

    #[test]
    fn reliability_is_monotone_in_each_dimension() {
        let t = ReliabilityThresholds::default();
        let base = compute_reliability(Some(&cv(4, 100, 0.60, 0.65)), &t);
        assert!(compute_reliability(Some(&cv(5, 100, 0.60, 0.65)), &t) >= base);
        assert!(compute_reliability(Some(&cv(4, 150, 0.60, 0.65)), &t) >= base);
        assert!(compute_reliability(Some(&cv(4, 100, 0.55, 0.65)), &t) >= base);
        assert!(compute_reliability(Some(&cv(4, 100, 0.60, 0.70)), &t) >= base);
        assert!(compute_reliability(Some(&cv(4, 100, 0.90, 0.65)), &t) <= base);
    }

    #[test]
    fn weak_dimension_suppresses_reliability() {
        let t = ReliabilityThresholds::default();
        // Great log-loss, but almost no events.
        let r = compute_reliability(Some(&cv(1, 300, 0.30, 0.80)), &t);
        assert!(r < 0.25, "r={r}");
        assert_eq!(compute_reliability(None, &t), 0.0);
    }

    #[test]
    fn zero_reliability_preserves_prior() {
        let prior = metrics::default_group_weights();
        let mut model = metrics::default_group_weights();
        model.insert(MetricGroup::Putting, 0.9);
        let share = model_share(0.0);
        let blended = blend_group_weights(&prior, &model, 1.0 - share, share);
        for group in MetricGroup::ALL {
            assert!((blended[&group] - prior[&group]).abs() < 1e-9);
        }
    }

    #[test]
    fn drift_ranges_widen_with_status() {
        let recommended = HashMap::from([
            (Metric::SgPutting, 0.2),
            (Metric::SgTotal, 0.2),
            (Metric::GirPct, 0.2),
        ]);
        let drift = HashMap::from([
            (Metric::SgPutting, DriftStatus::Stable),
            (Metric::SgTotal, DriftStatus::Chronic),
        ]);
        let ranges = constraint_ranges(&recommended, &drift);
        let width = |m: Metric| ranges[&m].1 - ranges[&m].0;
        assert!(width(Metric::SgTotal) > width(Metric::GirPct));
        assert!(width(Metric::GirPct) > width(Metric::SgPutting));
        // Missing status defaults to the Watch range.
        assert!((width(Metric::GirPct) - 0.2 * 2.0 * 0.2).abs() < 1e-12);
    }

    #[test]
    fn alignment_score_prefers_agreeing_weights() {
        let groups = metrics::default_group_weights();
        let mut weights = metrics::default_metric_weights();
        let map: AlignmentMap = HashMap::from([(Metric::SgPutting, 1.0)]);

        let before = alignment_score(&groups, &weights, &map);
        weights.insert(Metric::SgPutting, 0.9);
        metrics::normalize_metric_weights(&mut weights);
        let after = alignment_score(&groups, &weights, &map);
        assert!(after > before);
    }
}
