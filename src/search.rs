//! Randomized local search over group and metric weights. Every trial
//! perturbs a fresh clone of the baseline template, re-ranks the field,
//! and scores the candidate on a blend of rank correlation, top-N hit
//! quality and alignment with the correlation signal. The baseline is
//! scored first, so the search can only ever improve on it.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::alignment::{self, AlignmentMap};
use crate::finish::FinishResult;
use crate::metrics::{self, Metric, MetricGroup};
use crate::ranking::RankingEngine;
use crate::rounds::PlayerRoundRecord;
use crate::template_store::WeightTemplate;
use crate::validate::{self, Evaluation};

/// Randomness the search draws on. Runs are reproducible by seeding;
/// production runs may use entropy instead.
pub trait RandomSource {
    /// Uniform draw from `[0, 1)`.
    fn next_unit(&mut self) -> f64;
    /// Uniform index in `0..bound` (0 when `bound` is 0).
    fn next_index(&mut self, bound: usize) -> usize;
}

pub struct SeededRandom(StdRng);

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl RandomSource for SeededRandom {
    fn next_unit(&mut self) -> f64 {
        self.0.gen_range(0.0..1.0)
    }

    fn next_index(&mut self, bound: usize) -> usize {
        if bound == 0 { 0 } else { self.0.gen_range(0..bound) }
    }
}

pub struct SystemRandom(StdRng);

impl SystemRandom {
    pub fn new() -> Self {
        Self(StdRng::from_entropy())
    }
}

impl Default for SystemRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for SystemRandom {
    fn next_unit(&mut self) -> f64 {
        self.0.gen_range(0.0..1.0)
    }

    fn next_index(&mut self, bound: usize) -> usize {
        if bound == 0 { 0 } else { self.0.gen_range(0..bound) }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SearchConfig {
    pub trials: usize,
    pub group_range_pct: f64,
    pub metric_range_pct: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            trials: 60,
            group_range_pct: 0.20,
            metric_range_pct: 0.15,
        }
    }
}

/// Everything needed to score one candidate template.
pub struct SearchContext<'a> {
    pub engine: &'a dyn RankingEngine,
    pub rounds: &'a [PlayerRoundRecord],
    pub results: &'a [FinishResult],
    pub alignment: &'a AlignmentMap,
    /// Per-metric `[min, max]` bounds from drift status; metrics without
    /// an entry move freely.
    pub constraints: &'a HashMap<Metric, (f64, f64)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptimizedResult {
    pub score: f64,
    pub correlation: f64,
    pub alignment_score: f64,
    pub baseline_score: f64,
    pub baseline_correlation: f64,
    pub improved: bool,
    pub trials: usize,
    /// True when the top-N term had to fall back to a single component
    /// because the hit rate or the weighted variant was unavailable.
    pub top_n_fallback: bool,
    pub evaluation: Evaluation,
    #[serde(skip)]
    pub template: WeightTemplate,
}

const CORRELATION_SHARE: f64 = 0.3;
const TOP_N_SHARE: f64 = 0.5;
const ALIGNMENT_SHARE: f64 = 0.2;

#[derive(Clone)]
struct CandidateScore {
    combined: f64,
    correlation: f64,
    alignment: f64,
    top_n_fallback: bool,
    evaluation: Evaluation,
}

fn score_candidate(candidate: &WeightTemplate, ctx: &SearchContext) -> CandidateScore {
    let ranked = ctx.engine.rank(candidate, ctx.rounds);
    let evaluation = validate::evaluate_rankings(&ranked, ctx.results, false);

    // Every term rescaled to [0, 1] before mixing.
    let correlation_term = (evaluation.correlation + 1.0) / 2.0;
    let (top_n_term, top_n_fallback) = match (evaluation.top20, evaluation.top20_weighted) {
        (Some(hit), Some(weighted)) => ((hit / 100.0 + weighted / 100.0) / 2.0, false),
        (Some(hit), None) => (hit / 100.0, true),
        (None, Some(weighted)) => (weighted / 100.0, true),
        (None, None) => (0.0, true),
    };
    let align = alignment::alignment_score(
        &candidate.group_weights,
        &candidate.metric_weights,
        ctx.alignment,
    );
    let alignment_term = (align + 1.0) / 2.0;

    CandidateScore {
        combined: CORRELATION_SHARE * correlation_term
            + TOP_N_SHARE * top_n_term
            + ALIGNMENT_SHARE * alignment_term,
        correlation: evaluation.correlation,
        alignment: align,
        top_n_fallback,
        evaluation,
    }
}

/// Multiply 2 or 3 randomly chosen group weights by a factor in
/// `1 +- range_pct`, then renormalize.
fn perturb_group_weights(
    weights: &mut HashMap<MetricGroup, f64>,
    range_pct: f64,
    rng: &mut dyn RandomSource,
) {
    let mut pool: Vec<MetricGroup> = MetricGroup::ALL.to_vec();
    let count = 2 + rng.next_index(2);
    for _ in 0..count.min(pool.len()) {
        let group = pool.swap_remove(rng.next_index(pool.len()));
        let factor = 1.0 + (2.0 * rng.next_unit() - 1.0) * range_pct;
        if let Some(w) = weights.get_mut(&group) {
            *w *= factor;
        }
    }
    metrics::normalize_group_weights(weights);
}

/// Jitter every metric weight by `1 +- range_pct`, clamp into the drift
/// bounds, then renormalize per group. Renormalization after clamping can
/// nudge a weight slightly past its bound again; that slippage is small
/// and tolerated.
fn perturb_metric_weights(
    weights: &mut HashMap<Metric, f64>,
    range_pct: f64,
    constraints: &HashMap<Metric, (f64, f64)>,
    rng: &mut dyn RandomSource,
) {
    for metric in Metric::ALL {
        let Some(w) = weights.get_mut(&metric) else {
            continue;
        };
        let factor = 1.0 + (2.0 * rng.next_unit() - 1.0) * range_pct;
        *w *= factor;
        if let Some((lo, hi)) = constraints.get(&metric) {
            *w = w.clamp(*lo, *hi);
        }
    }
    metrics::normalize_metric_weights(weights);
}

fn perturb(
    base: &WeightTemplate,
    cfg: &SearchConfig,
    constraints: &HashMap<Metric, (f64, f64)>,
    rng: &mut dyn RandomSource,
) -> WeightTemplate {
    let mut candidate = base.clone();
    perturb_group_weights(&mut candidate.group_weights, cfg.group_range_pct, rng);
    perturb_metric_weights(
        &mut candidate.metric_weights,
        cfg.metric_range_pct,
        constraints,
        rng,
    );
    candidate
}

/// Randomized search around the baseline. Trials are independent draws:
/// each one perturbs a fresh clone of the baseline inside the configured
/// ranges, so no candidate can wander further from the baseline than a
/// single bounded perturbation allows. The winner is a pure max over
/// combined score, with raw correlation breaking exact ties.
pub fn search(
    baseline: &WeightTemplate,
    ctx: &SearchContext,
    cfg: &SearchConfig,
    rng: &mut dyn RandomSource,
) -> OptimizedResult {
    let baseline_score = score_candidate(baseline, ctx);
    let mut best_template = baseline.clone();
    let mut best = baseline_score.clone();

    for _ in 0..cfg.trials {
        let candidate = perturb(baseline, cfg, ctx.constraints, rng);
        let score = score_candidate(&candidate, ctx);
        let accept = score.combined > best.combined
            || (score.combined == best.combined && score.correlation > best.correlation);
        if accept {
            best_template = candidate;
            best = score;
        }
    }

    OptimizedResult {
        score: best.combined,
        correlation: best.correlation,
        alignment_score: best.alignment,
        baseline_score: baseline_score.combined,
        baseline_correlation: baseline_score.correlation,
        improved: best.combined > baseline_score.combined,
        trials: cfg.trials,
        top_n_fallback: best.top_n_fallback,
        evaluation: best.evaluation,
        template: best_template,
    }
}
