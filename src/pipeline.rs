//! End-to-end tuning pipeline. One run loads the round history, measures
//! which metrics actually predicted finishes, blends that signal with the
//! prior template (shrunk by classifier reliability), searches for better
//! weights under drift constraints, and backtests the winner across
//! years. The report carries a fingerprint of every input so runs can be
//! compared later.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::Serialize;

use crate::alignment::{self, AlignmentMap, DriftStatus, ReliabilityThresholds};
use crate::finish::FinishResult;
use crate::fingerprint::{RunFingerprint, RunSettings};
use crate::metrics::{self, Metric, MetricGroup};
use crate::persist;
use crate::ranking::RankingEngine;
use crate::rounds::{self, PlayerRoundRecord};
use crate::search::{self, OptimizedResult, RandomSource, SearchConfig, SearchContext};
use crate::signal::{self, ClassifierSummary, DEFAULT_TOP_N};
use crate::stats::CvSummary;
use crate::template_store::WeightTemplate;
use crate::validate::{self, Evaluation};

pub const HISTORICAL_ROUNDS_FILE: &str = "historical_rounds.csv";
pub const CURRENT_ROUNDS_FILE: &str = "current_rounds.csv";
pub const VALIDATION_REPORT_FILE: &str = "validation_report.csv";
pub const TEMPLATE_STORE_FILE: &str = "templates.json";

// Mixing weights for the blended alignment map. An absent source keeps
// its labels out and its weight at zero.
const CURRENT_MIX: f64 = 0.45;
const HISTORICAL_MIX: f64 = 0.35;
const VALIDATION_MIX: f64 = 0.20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeRounds {
    /// Use the current-season file for scoring when it exists; keep the
    /// event being tuned out of classifier training.
    Auto,
    /// Fail the run when the current-season file is missing, and feed the
    /// event's own rounds into classifier training as well.
    Always,
    /// Ignore the current-season file even when present.
    Never,
}

impl IncludeRounds {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(IncludeRounds::Auto),
            "always" | "yes" => Some(IncludeRounds::Always),
            "never" | "no" => Some(IncludeRounds::Never),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            IncludeRounds::Auto => "auto",
            IncludeRounds::Always => "always",
            IncludeRounds::Never => "never",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunParams {
    pub event_id: String,
    pub season: u16,
    pub tournament_name: Option<String>,
    pub template_override: Option<String>,
    pub seed: Option<u64>,
    pub trials: usize,
    pub dry_run: bool,
    pub include_current_rounds: IncludeRounds,
    pub data_dir: PathBuf,
    pub out_dir: PathBuf,
}

/// Decided once, before any optimization step runs. Pre-event training is
/// the normal state in tournament week: the event has no results yet, so
/// the supervised steps are skipped rather than failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    Supervised,
    PreEventTraining,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationRow {
    pub label: String,
    pub correlation: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Step1Summary {
    pub per_year: BTreeMap<u16, Evaluation>,
    /// Year where the baseline template correlated best.
    pub best_year: Option<u16>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalSummary {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub current_metric_correlations: Vec<CorrelationRow>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier: Option<ClassifierSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cross_validation: Option<CvSummary>,
    pub reliability: f64,
    pub model_share: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MultiYearSummary {
    pub per_year: BTreeMap<u16, Evaluation>,
    pub aggregate: Evaluation,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub mode: PipelineMode,
    pub event_id: String,
    pub season: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tournament_name: Option<String>,
    pub generated_at: String,
    pub run_fingerprint: RunFingerprint,
    pub step1_best_template: Step1Summary,
    pub historical_metric_correlations: Vec<CorrelationRow>,
    pub signal: SignalSummary,
    pub suggested_top20_group_weights: BTreeMap<String, f64>,
    pub suggested_top20_metric_weights: BTreeMap<String, f64>,
    pub conservative_suggested_top20_group_weights: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step3_optimized: Option<OptimizedResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step4_multi_year: Option<MultiYearSummary>,
    pub recommendation: String,
}

#[derive(Debug)]
pub struct PipelineOutcome {
    pub report: PipelineReport,
    /// Weights to hand to the template write guard.
    pub candidate: WeightTemplate,
}

fn group_weight_rows(weights: &HashMap<MetricGroup, f64>) -> BTreeMap<String, f64> {
    weights
        .iter()
        .map(|(g, w)| (g.label().to_string(), *w))
        .collect()
}

fn metric_weight_rows(weights: &HashMap<Metric, f64>) -> BTreeMap<String, f64> {
    weights
        .iter()
        .map(|(m, w)| (m.template_key(), *w))
        .collect()
}

fn correlation_rows(signal: &[signal::MetricCorrelation]) -> Vec<CorrelationRow> {
    let mut rows: Vec<CorrelationRow> = signal
        .iter()
        .map(|c| CorrelationRow {
            label: c.metric.label().to_string(),
            correlation: c.correlation,
            samples: c.samples,
        })
        .collect();
    rows.sort_by(|a, b| b.correlation.abs().total_cmp(&a.correlation.abs()));
    rows
}

/// Parsed external validation report: per-metric alignment scores, the
/// externally recommended metric weights, and drift statuses.
struct ValidationReport {
    scores: Vec<(String, f64)>,
    recommended: HashMap<Metric, f64>,
    drift: HashMap<Metric, DriftStatus>,
}

/// Optional external validation report. A missing file is simply no
/// signal: no alignment source, no search constraints.
fn load_validation_report(path: &Path) -> Result<Option<ValidationReport>> {
    if !path.exists() {
        return Ok(None);
    }
    let rows = rounds::load_rows(path)?;
    let mut scores = Vec::new();
    let mut recommended = HashMap::new();
    let mut drift = HashMap::new();
    for row in &rows {
        let Some(label) = row.get("metric").filter(|s| !s.is_empty()) else {
            continue;
        };
        if let Some(score) = row.get("alignment").and_then(|s| s.parse::<f64>().ok()) {
            scores.push((label.clone(), score));
        }
        if let Some(metric) = Metric::from_label(label) {
            if let Some(weight) = row
                .get("recommended_weight")
                .and_then(|s| s.parse::<f64>().ok())
            {
                recommended.insert(metric, weight);
            }
            if let Some(status) = row.get("drift_status").and_then(|s| parse_drift(s)) {
                drift.insert(metric, status);
            }
        }
    }
    Ok(Some(ValidationReport {
        scores,
        recommended,
        drift,
    }))
}

fn parse_drift(raw: &str) -> Option<DriftStatus> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "STABLE" => Some(DriftStatus::Stable),
        "WATCH" => Some(DriftStatus::Watch),
        "CHRONIC" => Some(DriftStatus::Chronic),
        _ => None,
    }
}

/// Average per-metric correlation across historical events, weighted by
/// sample count.
fn historical_correlations(
    engine: &dyn RankingEngine,
    baseline: &WeightTemplate,
    by_event: &BTreeMap<String, Vec<PlayerRoundRecord>>,
) -> Vec<signal::MetricCorrelation> {
    let mut weighted: HashMap<Metric, (f64, usize)> = HashMap::new();
    for event_rounds in by_event.values() {
        let ranked = engine.rank(baseline, event_rounds);
        let results = rounds::results_from_rounds(event_rounds);
        for c in signal::correlation_per_metric(&ranked, &results) {
            let entry = weighted.entry(c.metric).or_insert((0.0, 0));
            entry.0 += c.correlation * c.samples as f64;
            entry.1 += c.samples;
        }
    }
    Metric::ALL
        .into_iter()
        .map(|metric| {
            let (sum, samples) = weighted.get(&metric).copied().unwrap_or((0.0, 0));
            signal::MetricCorrelation {
                metric,
                correlation: if samples > 0 { sum / samples as f64 } else { 0.0 },
                samples,
            }
        })
        .collect()
}

/// Model-suggested weights from the classifier's standardized feature
/// weights: group weight = share of total absolute weight landing in the
/// group, metric weights = per-group absolute shares with the observed
/// inversions applied.
fn model_suggestion(
    classifier_weights: &[(Metric, f64)],
    inverted: &std::collections::HashSet<Metric>,
) -> (HashMap<MetricGroup, f64>, HashMap<Metric, f64>) {
    let mut group_weights: HashMap<MetricGroup, f64> = HashMap::new();
    let mut metric_weights: HashMap<Metric, f64> = HashMap::new();
    for (metric, w) in classifier_weights {
        *group_weights.entry(metric.group()).or_insert(0.0) += w.abs();
        metric_weights.insert(*metric, w.abs());
    }
    metrics::normalize_group_weights(&mut group_weights);
    metrics::normalize_metric_weights(&mut metric_weights);
    alignment::apply_inversions(&mut metric_weights, inverted);
    (group_weights, metric_weights)
}

fn recommendation_text(
    mode: PipelineMode,
    optimized: Option<&OptimizedResult>,
    multi_year: Option<&MultiYearSummary>,
) -> String {
    if mode == PipelineMode::PreEventTraining {
        return "No finish results for this event yet; suggested weights come from \
                historical training only. Re-run after the event completes."
            .to_string();
    }
    let Some(opt) = optimized else {
        return "Optimization skipped; keep the prior template.".to_string();
    };
    let backtest = multi_year
        .map(|m| format!(" Backtested correlation across years: {:.3}.", m.aggregate.correlation))
        .unwrap_or_default();
    if opt.improved {
        format!(
            "Search improved the objective from {:.4} to {:.4} (correlation {:.3}). \
             Persist the optimized template.{backtest}",
            opt.baseline_score, opt.score, opt.correlation
        )
    } else {
        format!(
            "Search found nothing better than the prior template (score {:.4}). \
             Keep the prior.{backtest}",
            opt.baseline_score
        )
    }
}

pub fn run(
    params: &RunParams,
    prior: &WeightTemplate,
    engine: &dyn RankingEngine,
    rng: &mut dyn RandomSource,
) -> Result<PipelineOutcome> {
    let historical_path = params.data_dir.join(HISTORICAL_ROUNDS_FILE);
    let current_path = params.data_dir.join(CURRENT_ROUNDS_FILE);
    let validation_path = params.data_dir.join(VALIDATION_REPORT_FILE);
    let store_path = params.out_dir.join(TEMPLATE_STORE_FILE);

    let fingerprint = RunFingerprint::capture(
        RunSettings {
            event_id: params.event_id.clone(),
            season: params.season,
            tournament: params.tournament_name.clone(),
            seed: params.seed,
            trials: params.trials,
            dry_run: params.dry_run,
            include_current_rounds: params.include_current_rounds.label().to_string(),
            template_override: params.template_override.clone(),
        },
        &[
            ("historical_rounds", historical_path.as_path()),
            ("current_rounds", current_path.as_path()),
            ("validation_report", validation_path.as_path()),
            ("template_store", store_path.as_path()),
        ],
    )?;

    let historical = rounds::rounds_from_rows(&rounds::load_rows(&historical_path)?);
    if historical.is_empty() {
        return Err(anyhow!(
            "no usable rows in {}",
            historical_path.display()
        ));
    }

    let current: Vec<PlayerRoundRecord> = match params.include_current_rounds {
        IncludeRounds::Never => Vec::new(),
        IncludeRounds::Always => {
            let rows = rounds::load_rows(&current_path)
                .context("current rounds required by --include-current-rounds=always")?;
            filter_event(rounds::rounds_from_rows(&rows), &params.event_id)
        }
        IncludeRounds::Auto => {
            if current_path.exists() {
                filter_event(
                    rounds::rounds_from_rows(&rounds::load_rows(&current_path)?),
                    &params.event_id,
                )
            } else {
                Vec::new()
            }
        }
    };

    let current_results = rounds::results_from_rounds(&current);
    let mode = if current_results.is_empty() {
        PipelineMode::PreEventTraining
    } else {
        PipelineMode::Supervised
    };

    // Step 1: baseline template swept across historical years.
    let by_year = rounds::rounds_by_season(&historical);
    let results_by_year: BTreeMap<u16, Vec<FinishResult>> = by_year
        .iter()
        .map(|(year, rounds)| (*year, rounds::results_from_rounds(rounds)))
        .collect();
    let per_year = validate::validate_years(
        prior,
        engine,
        &by_year,
        &results_by_year,
        params.season,
        false,
    );
    let best_year = per_year
        .iter()
        .max_by(|a, b| a.1.correlation.total_cmp(&b.1.correlation))
        .map(|(year, _)| *year);
    let step1 = Step1Summary {
        per_year: per_year.clone(),
        best_year,
    };

    // Step 1b: per-metric signal, the top-20 classifier and its
    // event-grouped cross-validation over history.
    let by_event = rounds::rounds_by_event(&historical);
    let historical_signal = historical_correlations(engine, prior, &by_event);

    let current_ranked = engine.rank(prior, &current);
    let current_signal = if mode == PipelineMode::Supervised {
        signal::correlation_per_metric(&current_ranked, &current_results)
    } else {
        Vec::new()
    };

    let mut events: Vec<(String, Vec<crate::ranking::RankedPlayer>, Vec<FinishResult>)> = by_event
        .iter()
        .map(|(event_id, event_rounds)| {
            (
                event_id.clone(),
                engine.rank(prior, event_rounds),
                rounds::results_from_rounds(event_rounds),
            )
        })
        .collect();
    // Training on the event being tuned is opt-in: its results also drive
    // the search objective, so by default CV never validates on them.
    if params.include_current_rounds == IncludeRounds::Always && !current_results.is_empty() {
        events.push((
            params.event_id.clone(),
            current_ranked.clone(),
            current_results.clone(),
        ));
    }
    let cv = signal::cross_validate_events(&events, DEFAULT_TOP_N);
    let classifier = signal::train_top_n_classifier_events(&events, DEFAULT_TOP_N);

    let thresholds = ReliabilityThresholds::default();
    let reliability =
        alignment::compute_reliability(cv.as_ref().map(|o| &o.summary), &thresholds);
    let model_share = alignment::model_share(reliability);

    // Step 1c: blend the alignment sources.
    let validation_report = load_validation_report(&validation_path)?;
    let mut sources: Vec<(AlignmentMap, f64)> = vec![
        (alignment::build_alignment_map(&historical_signal), HISTORICAL_MIX),
    ];
    if !current_signal.is_empty() {
        sources.push((alignment::build_alignment_map(&current_signal), CURRENT_MIX));
    }
    if let Some(report) = &validation_report {
        sources.push((
            alignment::alignment_map_from_labels(&report.scores),
            VALIDATION_MIX,
        ));
    }
    let alignment_map = alignment::blend_alignment_maps(&sources);

    // Step 2: model suggestion, then conservative reliability-shrunk
    // blend with the prior.
    let inversion_signal = if current_signal.is_empty() {
        &historical_signal
    } else {
        &current_signal
    };
    let inverted = alignment::inverted_metric_set(inversion_signal);
    let (suggested_groups, suggested_metrics) = match &classifier {
        Some((_, weights)) => model_suggestion(weights, &inverted),
        None => (prior.group_weights.clone(), prior.metric_weights.clone()),
    };
    let conservative_groups = alignment::blend_group_weights(
        &prior.group_weights,
        &suggested_groups,
        1.0 - model_share,
        model_share,
    );
    let conservative_metrics = alignment::blend_metric_weights(
        &prior.metric_weights,
        &suggested_metrics,
        1.0 - model_share,
        model_share,
    );
    let suggested_metric_rows = metric_weight_rows(&suggested_metrics);

    let mut candidate = prior.clone();
    candidate.event_id = Some(params.event_id.clone());
    candidate.group_weights = conservative_groups.clone();
    candidate.metric_weights = conservative_metrics;
    candidate.description = format!(
        "tuned for {} season {} ({})",
        params.event_id,
        params.season,
        match mode {
            PipelineMode::Supervised => "supervised",
            PipelineMode::PreEventTraining => "pre-event training",
        }
    );

    // Steps 3 and 4 need this event's actual results. Search bounds come
    // from the validation report's recommended weights; with no report
    // the metric weights move freely.
    let (step3, step4) = if mode == PipelineMode::Supervised {
        let constraints = validation_report
            .as_ref()
            .map(|r| alignment::constraint_ranges(&r.recommended, &r.drift))
            .unwrap_or_default();
        let ctx = SearchContext {
            engine,
            rounds: &current,
            results: &current_results,
            alignment: &alignment_map,
            constraints: &constraints,
        };
        let cfg = SearchConfig {
            trials: params.trials,
            ..SearchConfig::default()
        };
        let optimized = search::search(&candidate, &ctx, &cfg, rng);
        candidate = optimized.template.clone();

        let multi_per_year = validate::validate_years(
            &candidate,
            engine,
            &by_year,
            &results_by_year,
            params.season,
            true,
        );
        let aggregate = validate::aggregate(&multi_per_year);
        (
            Some(optimized),
            Some(MultiYearSummary {
                per_year: multi_per_year,
                aggregate,
            }),
        )
    } else {
        (None, None)
    };

    let recommendation = recommendation_text(mode, step3.as_ref(), step4.as_ref());

    let report = PipelineReport {
        mode,
        event_id: params.event_id.clone(),
        season: params.season,
        tournament_name: params.tournament_name.clone(),
        generated_at: Utc::now().to_rfc3339(),
        run_fingerprint: fingerprint,
        step1_best_template: step1,
        historical_metric_correlations: correlation_rows(&historical_signal),
        signal: SignalSummary {
            current_metric_correlations: correlation_rows(&current_signal),
            classifier: classifier.map(|(summary, _)| summary),
            cross_validation: cv.map(|o| o.summary),
            reliability,
            model_share,
        },
        suggested_top20_group_weights: group_weight_rows(&suggested_groups),
        suggested_top20_metric_weights: suggested_metric_rows,
        conservative_suggested_top20_group_weights: group_weight_rows(&conservative_groups),
        step3_optimized: step3,
        step4_multi_year: step4,
        recommendation,
    };

    Ok(PipelineOutcome { report, candidate })
}

fn filter_event(rounds: Vec<PlayerRoundRecord>, event_id: &str) -> Vec<PlayerRoundRecord> {
    rounds
        .into_iter()
        .filter(|r| r.event_id == event_id)
        .collect()
}

/// Write the JSON report plus a human-readable text mirror. Both back up
/// any previous copy first.
pub fn write_report(report: &PipelineReport, out_dir: &Path) -> Result<(PathBuf, PathBuf)> {
    let json_path = out_dir.join(format!("report_{}.json", report.event_id));
    let text_path = out_dir.join(format!("report_{}.txt", report.event_id));
    let json = serde_json::to_string_pretty(report).context("serialize report")?;
    persist::write_with_backup(&json_path, &json)?;
    persist::write_with_backup(&text_path, &render_text_report(report))?;
    Ok((json_path, text_path))
}

pub fn render_text_report(report: &PipelineReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Weight tuning report: event {} season {}\n",
        report.event_id, report.season
    ));
    if let Some(name) = &report.tournament_name {
        out.push_str(&format!("Tournament: {name}\n"));
    }
    out.push_str(&format!(
        "Mode: {}\nGenerated: {}\n\n",
        match report.mode {
            PipelineMode::Supervised => "supervised",
            PipelineMode::PreEventTraining => "pre-event training",
        },
        report.generated_at
    ));

    out.push_str("Baseline correlation by year:\n");
    for (year, eval) in &report.step1_best_template.per_year {
        out.push_str(&format!(
            "  {year}: corr {:+.3}, rmse {:.2}, matched {}\n",
            eval.correlation, eval.rmse, eval.matched_players
        ));
    }

    out.push_str("\nStrongest historical metric signals:\n");
    for row in report.historical_metric_correlations.iter().take(10) {
        out.push_str(&format!(
            "  {:<24} {:+.3} ({} samples)\n",
            row.label, row.correlation, row.samples
        ));
    }

    out.push_str(&format!(
        "\nClassifier reliability: {:.2} (model share {:.2})\n",
        report.signal.reliability, report.signal.model_share
    ));

    if let Some(opt) = &report.step3_optimized {
        out.push_str(&format!(
            "\nSearch: baseline {:.4} -> best {:.4} over {} trials ({})\n",
            opt.baseline_score,
            opt.score,
            opt.trials,
            if opt.improved { "improved" } else { "no improvement" }
        ));
        if opt.top_n_fallback {
            out.push_str(
                "  note: top-N objective term ran on a single component (hit rate or \
                 weighted score unavailable)\n",
            );
        }
    }
    if let Some(multi) = &report.step4_multi_year {
        out.push_str(&format!(
            "Backtest aggregate: corr {:+.3} over {} matched players\n",
            multi.aggregate.correlation, multi.aggregate.matched_players
        ));
    }

    out.push_str(&format!("\nRecommendation: {}\n", report.recommendation));
    out
}
