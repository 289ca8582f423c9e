use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use sg_tuner::metrics::Metric;
use sg_tuner::pipeline::{self, IncludeRounds, PipelineMode, RunParams};
use sg_tuner::ranking::ZScoreEngine;
use sg_tuner::search::SeededRandom;
use sg_tuner::template_store::WeightTemplate;

fn workspace(name: &str) -> (PathBuf, PathBuf) {
    let root = std::env::temp_dir().join("sg_tuner_e2e").join(name);
    let data_dir = root.join("data");
    let out_dir = root.join("output");
    let _ = fs::remove_dir_all(&root);
    fs::create_dir_all(&data_dir).unwrap();
    fs::create_dir_all(&out_dir).unwrap();
    (data_dir, out_dir)
}

/// One event's worth of rounds: 40 players whose SG Putting decreases with
/// their eventual finish while every other metric stays flat, so putting
/// carries the entire predictive signal.
fn event_rows(event_id: &str, season: u16, out: &mut String) {
    for i in 1..=40u32 {
        let fin = match i {
            3 => "T3".to_string(),
            38 => "CUT".to_string(),
            n => n.to_string(),
        };
        let sg_putting = 4.0 - i as f64 * 0.1;
        write!(out, "p{i},Player {i},{event_id},{season},4,{fin}").unwrap();
        for metric in Metric::ALL {
            let value = if metric == Metric::SgPutting {
                sg_putting
            } else {
                0.1
            };
            write!(out, ",{value}").unwrap();
        }
        out.push('\n');
    }
}

fn csv_header() -> String {
    let mut header = String::from("player_id,player_name,event_id,season,round,fin_text");
    for metric in Metric::ALL {
        header.push(',');
        header.push_str(metric.column());
    }
    header.push('\n');
    header
}

fn write_historical(data_dir: &Path) {
    let mut csv = csv_header();
    event_rows("evt_2023", 2023, &mut csv);
    event_rows("evt_2024", 2024, &mut csv);
    event_rows("evt_2025", 2025, &mut csv);
    fs::write(data_dir.join(pipeline::HISTORICAL_ROUNDS_FILE), csv).unwrap();
}

fn write_current(data_dir: &Path, with_results: bool) {
    let mut csv = csv_header();
    if with_results {
        event_rows("evt_2026", 2026, &mut csv);
    } else {
        // Rounds exist but no player has a finish yet.
        for i in 1..=40u32 {
            write!(csv, "p{i},Player {i},evt_2026,2026,2,").unwrap();
            for metric in Metric::ALL {
                let value = if metric == Metric::SgPutting {
                    4.0 - i as f64 * 0.1
                } else {
                    0.1
                };
                write!(csv, ",{value}").unwrap();
            }
            csv.push('\n');
        }
    }
    fs::write(data_dir.join(pipeline::CURRENT_ROUNDS_FILE), csv).unwrap();
}

fn params(data_dir: &Path, out_dir: &Path) -> RunParams {
    RunParams {
        event_id: "evt_2026".to_string(),
        season: 2026,
        tournament_name: Some("Synthetic Open".to_string()),
        template_override: None,
        seed: Some(42),
        trials: 20,
        dry_run: true,
        include_current_rounds: IncludeRounds::Auto,
        data_dir: data_dir.to_path_buf(),
        out_dir: out_dir.to_path_buf(),
    }
}

#[test]
fn supervised_run_finds_the_engineered_signal() {
    let (data_dir, out_dir) = workspace("supervised");
    write_historical(&data_dir);
    write_current(&data_dir, true);

    let params = params(&data_dir, &out_dir);
    let prior = WeightTemplate::baseline("default", Some("evt_2026"));
    let engine = ZScoreEngine;
    let mut rng = SeededRandom::new(42);

    let outcome = pipeline::run(&params, &prior, &engine, &mut rng).unwrap();
    let report = &outcome.report;

    assert_eq!(report.mode, PipelineMode::Supervised);

    // Putting is the only varying metric, so the baseline ranking already
    // reproduces the finish order in every year.
    for eval in report.step1_best_template.per_year.values() {
        assert!(eval.correlation > 0.9, "corr={}", eval.correlation);
        assert!(eval.matched_players >= 39);
    }

    // SG Putting dominates the historical signal table.
    let top = &report.historical_metric_correlations[0];
    assert_eq!(top.label, "SG Putting");
    assert!(top.correlation > 0.9);

    // And the current-season signal sees the same thing.
    let current_top = &report.signal.current_metric_correlations[0];
    assert_eq!(current_top.label, "SG Putting");
    assert!(current_top.correlation > 0.9);

    // Full-coverage rows feed the classifier and its event-grouped CV.
    assert!(report.signal.classifier.is_some());
    let cv = report.signal.cross_validation.as_ref().unwrap();
    assert_eq!(cv.event_count, 3);

    let optimized = report.step3_optimized.as_ref().unwrap();
    assert!(optimized.score >= optimized.baseline_score);

    let multi = report.step4_multi_year.as_ref().unwrap();
    assert!(multi.aggregate.correlation > 0.9);
    assert!(multi.aggregate.matched_players >= 100);

    let group_sum: f64 = outcome.candidate.group_weights.values().sum();
    assert!((group_sum - 1.0).abs() < 1e-9);

    // Fingerprint saw every input file.
    let files = &report.run_fingerprint.files;
    assert!(files["historical_rounds"].is_some());
    assert!(files["current_rounds"].is_some());
    assert!(files["validation_report"].is_none());
}

#[test]
fn pre_event_run_skips_supervised_steps() {
    let (data_dir, out_dir) = workspace("pre_event");
    write_historical(&data_dir);
    write_current(&data_dir, false);

    let params = params(&data_dir, &out_dir);
    let prior = WeightTemplate::baseline("default", Some("evt_2026"));
    let engine = ZScoreEngine;
    let mut rng = SeededRandom::new(42);

    let outcome = pipeline::run(&params, &prior, &engine, &mut rng).unwrap();
    let report = &outcome.report;

    assert_eq!(report.mode, PipelineMode::PreEventTraining);
    assert!(report.step3_optimized.is_none());
    assert!(report.step4_multi_year.is_none());
    assert!(report.signal.current_metric_correlations.is_empty());
    assert!(report.recommendation.contains("Re-run"));

    // The skipped steps never appear in the serialized report.
    let json = serde_json::to_string(report).unwrap();
    assert!(!json.contains("step3_optimized"));
    assert!(!json.contains("step4_multi_year"));
    assert!(json.contains("\"mode\":\"pre_event_training\""));

    // Historical training still produced a usable candidate.
    let group_sum: f64 = outcome.candidate.group_weights.values().sum();
    assert!((group_sum - 1.0).abs() < 1e-9);
}

#[test]
fn include_flag_gates_current_event_training() {
    let (data_dir, out_dir) = workspace("include_modes");
    write_historical(&data_dir);
    write_current(&data_dir, true);
    let prior = WeightTemplate::baseline("default", Some("evt_2026"));
    let engine = ZScoreEngine;

    // Auto scores against the current event but trains only on history.
    let auto = params(&data_dir, &out_dir);
    let auto_run = pipeline::run(&auto, &prior, &engine, &mut SeededRandom::new(1)).unwrap();
    assert_eq!(auto_run.report.mode, PipelineMode::Supervised);
    let auto_cv = auto_run.report.signal.cross_validation.as_ref().unwrap();
    assert_eq!(auto_cv.event_count, 3);

    // Always also feeds the current event's rounds into training.
    let mut always = params(&data_dir, &out_dir);
    always.include_current_rounds = IncludeRounds::Always;
    let always_run = pipeline::run(&always, &prior, &engine, &mut SeededRandom::new(1)).unwrap();
    assert_eq!(always_run.report.mode, PipelineMode::Supervised);
    let always_cv = always_run.report.signal.cross_validation.as_ref().unwrap();
    assert_eq!(always_cv.event_count, 4);
    assert!(always_cv.total_samples > auto_cv.total_samples);

    // Never ignores the file entirely, which drops the run to pre-event
    // training.
    let mut never = params(&data_dir, &out_dir);
    never.include_current_rounds = IncludeRounds::Never;
    let never_run = pipeline::run(&never, &prior, &engine, &mut SeededRandom::new(1)).unwrap();
    assert_eq!(never_run.report.mode, PipelineMode::PreEventTraining);
}

#[test]
fn validation_report_joins_the_signal_sources() {
    let (data_dir, out_dir) = workspace("validation_report");
    write_historical(&data_dir);
    write_current(&data_dir, true);
    let mut report_csv = String::from("metric,alignment,recommended_weight,drift_status\n");
    report_csv.push_str("SG Putting,0.9,0.25,STABLE\n");
    report_csv.push_str("SG Total,0.4,0.10,CHRONIC\n");
    fs::write(data_dir.join(pipeline::VALIDATION_REPORT_FILE), report_csv).unwrap();

    let params = params(&data_dir, &out_dir);
    let prior = WeightTemplate::baseline("default", Some("evt_2026"));
    let engine = ZScoreEngine;
    let outcome = pipeline::run(&params, &prior, &engine, &mut SeededRandom::new(3)).unwrap();

    assert!(outcome.report.run_fingerprint.files["validation_report"].is_some());
    let optimized = outcome.report.step3_optimized.as_ref().unwrap();
    assert!(optimized.score >= optimized.baseline_score);
    let group_sum: f64 = outcome.candidate.group_weights.values().sum();
    assert!((group_sum - 1.0).abs() < 1e-9);
}

#[test]
fn seeded_runs_are_reproducible() {
    let (data_dir, out_dir) = workspace("reproducible");
    write_historical(&data_dir);
    write_current(&data_dir, true);

    let params = params(&data_dir, &out_dir);
    let prior = WeightTemplate::baseline("default", Some("evt_2026"));
    let engine = ZScoreEngine;

    let a = pipeline::run(&params, &prior, &engine, &mut SeededRandom::new(9)).unwrap();
    let b = pipeline::run(&params, &prior, &engine, &mut SeededRandom::new(9)).unwrap();

    for metric in Metric::ALL {
        assert_eq!(
            a.candidate.metric_weights.get(&metric),
            b.candidate.metric_weights.get(&metric),
            "{}",
            metric.label()
        );
    }
    assert_eq!(
        a.report.step3_optimized.as_ref().map(|o| o.score),
        b.report.step3_optimized.as_ref().map(|o| o.score)
    );
}

#[test]
fn report_files_are_written_with_text_mirror() {
    let (data_dir, out_dir) = workspace("report_write");
    write_historical(&data_dir);
    write_current(&data_dir, true);

    let params = params(&data_dir, &out_dir);
    let prior = WeightTemplate::baseline("default", Some("evt_2026"));
    let engine = ZScoreEngine;
    let mut rng = SeededRandom::new(1);

    let outcome = pipeline::run(&params, &prior, &engine, &mut rng).unwrap();
    let (json_path, text_path) = pipeline::write_report(&outcome.report, &out_dir).unwrap();

    let raw = fs::read_to_string(&json_path).unwrap();
    let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["event_id"], "evt_2026");
    assert_eq!(value["run_fingerprint"]["algorithm"], "sha256");

    let text = fs::read_to_string(&text_path).unwrap();
    assert!(text.contains("evt_2026"));
    assert!(text.contains("Recommendation:"));
}

#[test]
fn missing_historical_file_is_a_hard_error() {
    let (data_dir, out_dir) = workspace("missing_input");
    // No historical_rounds.csv written.
    let params = params(&data_dir, &out_dir);
    let prior = WeightTemplate::baseline("default", None);
    let engine = ZScoreEngine;
    let mut rng = SeededRandom::new(1);

    let err = pipeline::run(&params, &prior, &engine, &mut rng).unwrap_err();
    assert!(err.to_string().contains("not found"), "{err}");
}
