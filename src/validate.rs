//! Ranking evaluation and multi-year backtesting. Course-setup groups
//! are zeroed for every year except the current season: they encode how
//! this specific course is playing this year and do not generalize, while
//! strokes-gained/driving/putting groups do.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::finish::FinishResult;
use crate::metrics::{self, MetricGroup};
use crate::ranking::{RankedPlayer, RankingEngine};
use crate::rounds::PlayerRoundRecord;
use crate::stats;
use crate::template_store::WeightTemplate;

#[derive(Debug, Clone, Serialize, Default)]
pub struct Evaluation {
    pub matched_players: usize,
    pub correlation: f64,
    pub rmse: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top10: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top20: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top20_weighted: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top10_overlap: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top20_overlap: Option<usize>,
}

/// Score a predicted ordering against known results. Correlation is
/// Spearman between predicted rank and actual finish position (both
/// "lower is better", so positive means the prediction works).
pub fn evaluate_rankings(
    ranked: &[RankedPlayer],
    results: &[FinishResult],
    with_overlap: bool,
) -> Evaluation {
    let positions: BTreeMap<&str, u32> = results
        .iter()
        .filter_map(|r| r.position.map(|p| (r.player_id.as_str(), p)))
        .collect();

    let mut joined: Vec<(u32, u32)> = ranked
        .iter()
        .filter_map(|p| positions.get(p.player_id.as_str()).map(|pos| (p.rank, *pos)))
        .collect();
    joined.sort_by_key(|(rank, _)| *rank);

    if joined.is_empty() {
        return Evaluation::default();
    }

    let predicted: Vec<f64> = joined.iter().map(|(r, _)| *r as f64).collect();
    let actual: Vec<f64> = joined.iter().map(|(_, p)| *p as f64).collect();
    let actual_in_predicted_order: Vec<u32> = joined.iter().map(|(_, p)| *p).collect();

    let mut eval = Evaluation {
        matched_players: joined.len(),
        correlation: stats::spearman(&predicted, &actual),
        rmse: stats::rmse(&predicted, &actual),
        top10: top_n_hit_rate(&joined, 10),
        top20: top_n_hit_rate(&joined, 20),
        top20_weighted: Some(stats::ndcg_weighted_top_n(&actual_in_predicted_order, 20)),
        ..Evaluation::default()
    };

    if with_overlap {
        eval.top10_overlap = top_n_overlap(&joined, 10);
        eval.top20_overlap = top_n_overlap(&joined, 20);
    }
    eval
}

/// Fraction (0..100) of the predicted top-n that actually finished
/// top-n. `None` when nothing joined.
fn top_n_hit_rate(joined: &[(u32, u32)], n: usize) -> Option<f64> {
    if joined.is_empty() {
        return None;
    }
    let denom = n.min(joined.len());
    let hits = joined
        .iter()
        .take(denom)
        .filter(|(_, pos)| *pos as usize <= n)
        .count();
    Some(100.0 * hits as f64 / denom as f64)
}

/// Exact intersection size between the predicted top-n player slots and
/// the actually-top-n finishers.
fn top_n_overlap(joined: &[(u32, u32)], n: usize) -> Option<usize> {
    if joined.is_empty() {
        return None;
    }
    let predicted: HashSet<usize> = (0..n.min(joined.len())).collect();
    let overlap = joined
        .iter()
        .enumerate()
        .filter(|(idx, (_, pos))| predicted.contains(idx) && *pos as usize <= n)
        .count();
    Some(overlap)
}

/// Candidate weights with course-setup groups removed and the remainder
/// renormalized, for seasons whose course setup is not comparable.
pub fn without_course_setup_groups(candidate: &WeightTemplate) -> WeightTemplate {
    let mut template = candidate.clone();
    for group in MetricGroup::COURSE_SETUP {
        template.group_weights.remove(&group);
    }
    metrics::normalize_group_weights(&mut template.group_weights);
    template
}

/// Re-run the ranking engine for every historical year that has results,
/// evaluating the candidate weights. Years other than `current_season`
/// use the course-setup-stripped template.
pub fn validate_years(
    candidate: &WeightTemplate,
    engine: &dyn RankingEngine,
    rounds_by_year: &BTreeMap<u16, Vec<PlayerRoundRecord>>,
    results_by_year: &BTreeMap<u16, Vec<FinishResult>>,
    current_season: u16,
    with_overlap: bool,
) -> BTreeMap<u16, Evaluation> {
    let stripped = without_course_setup_groups(candidate);
    let mut out = BTreeMap::new();
    for (year, rounds) in rounds_by_year {
        let Some(results) = results_by_year.get(year) else {
            continue;
        };
        if results.is_empty() {
            continue;
        }
        let template = if *year == current_season {
            candidate
        } else {
            &stripped
        };
        let ranked = engine.rank(template, rounds);
        out.insert(*year, evaluate_rankings(&ranked, results, with_overlap));
    }
    out
}

/// Sample-size-weighted average across years. Years with zero matched
/// players contribute nothing; Top-N fields absent from every year stay
/// `None`.
pub fn aggregate(per_year: &BTreeMap<u16, Evaluation>) -> Evaluation {
    let total: usize = per_year.values().map(|e| e.matched_players).sum();
    if total == 0 {
        return Evaluation::default();
    }
    let weighted = |value: fn(&Evaluation) -> f64| -> f64 {
        per_year
            .values()
            .map(|e| value(e) * e.matched_players as f64)
            .sum::<f64>()
            / total as f64
    };
    let weighted_opt = |value: fn(&Evaluation) -> Option<f64>| -> Option<f64> {
        let mut sum = 0.0;
        let mut n = 0.0;
        for e in per_year.values() {
            if let Some(v) = value(e) {
                sum += v * e.matched_players as f64;
                n += e.matched_players as f64;
            }
        }
        if n > 0.0 { Some(sum / n) } else { None }
    };

    Evaluation {
        matched_players: total,
        correlation: weighted(|e| e.correlation),
        rmse: weighted(|e| e.rmse),
        top10: weighted_opt(|e| e.top10),
        top20: weighted_opt(|e| e.top20),
        top20_weighted: weighted_opt(|e| e.top20_weighted),
        top10_overlap: None,
        top20_overlap: None,
    }
}
