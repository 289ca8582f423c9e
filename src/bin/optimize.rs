use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use chrono::{Datelike, Utc};

use sg_tuner::pipeline::{self, IncludeRounds, RunParams};
use sg_tuner::ranking::ZScoreEngine;
use sg_tuner::search::{RandomSource, SeededRandom, SystemRandom};
use sg_tuner::template_store::{PersistOutcome, TemplateStore, WeightTemplate};

const DEFAULT_TRIALS: usize = 60;
const DEFAULT_TEMPLATE: &str = "default";

fn main() -> Result<()> {
    if has_flag("--help") || has_flag("-h") {
        print_usage();
        return Ok(());
    }

    let event_id = parse_string_arg("--event")
        .ok_or_else(|| anyhow!("--event <id> is required (see --help)"))?;
    let season = parse_u64_arg("--season")
        .map(|s| s as u16)
        .unwrap_or_else(|| Utc::now().year() as u16);
    let trials = parse_u64_arg("--trials")
        .map(|t| t as usize)
        .unwrap_or(DEFAULT_TRIALS)
        .clamp(1, 10_000);
    let seed = parse_u64_arg("--seed");
    let dry_run = has_flag("--dry-run");
    let include_current_rounds = match parse_string_arg("--include-current-rounds") {
        Some(raw) => IncludeRounds::parse(&raw)
            .ok_or_else(|| anyhow!("--include-current-rounds must be auto, always or never"))?,
        None => IncludeRounds::Auto,
    };
    let template_override = parse_string_arg("--template");
    let tournament_name = parse_string_arg("--tournament");
    let data_dir = parse_string_arg("--data-dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data"));
    let out_dir = parse_string_arg("--out-dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("output"));

    let params = RunParams {
        event_id: event_id.clone(),
        season,
        tournament_name,
        template_override: template_override.clone(),
        seed,
        trials,
        dry_run,
        include_current_rounds,
        data_dir,
        out_dir: out_dir.clone(),
    };

    let store_path = out_dir.join(pipeline::TEMPLATE_STORE_FILE);
    let mut store = TemplateStore::open(&store_path)
        .with_context(|| format!("open template store {}", store_path.display()))?;
    let template_name = template_override.as_deref().unwrap_or(DEFAULT_TEMPLATE);
    let prior = match store.get(template_name) {
        Some(template) => template,
        None => {
            if template_override.is_some() {
                return Err(anyhow!(
                    "template '{template_name}' not found in {} (known: {:?})",
                    store_path.display(),
                    store.names()
                ));
            }
            WeightTemplate::baseline(template_name, Some(&event_id))
        }
    };

    println!("== weight tuning: event {event_id}, season {season} ==");
    println!(
        "prior template: {} | trials: {trials} | seed: {} | dry-run: {dry_run}",
        prior.name,
        seed.map(|s| s.to_string()).unwrap_or_else(|| "entropy".to_string()),
    );

    let engine = ZScoreEngine;
    let mut seeded;
    let mut system;
    let rng: &mut dyn RandomSource = match seed {
        Some(seed) => {
            seeded = SeededRandom::new(seed);
            &mut seeded
        }
        None => {
            system = SystemRandom::new();
            &mut system
        }
    };

    let outcome = pipeline::run(&params, &prior, &engine, rng)?;
    let report = &outcome.report;

    print!("{}", pipeline::render_text_report(report));

    let (json_path, text_path) = pipeline::write_report(report, &out_dir)?;
    println!("\nreport: {}", json_path.display());
    println!("report (text): {}", text_path.display());

    match store.maybe_persist(&outcome.candidate, dry_run)? {
        PersistOutcome::Unchanged => {
            println!("templates: unchanged (within tolerance of stored weights)");
        }
        PersistOutcome::Written { backup } => {
            if let Some(backup) = backup {
                println!("templates: previous store backed up to {}", backup.display());
            }
            println!("templates: updated {}", store_path.display());
        }
        PersistOutcome::DryRun { path } => {
            println!("templates: dry run, would-be store at {}", path.display());
        }
    }

    Ok(())
}

fn print_usage() {
    println!("usage: optimize --event <id> [options]");
    println!();
    println!("  --event <id>                   tournament event id (required)");
    println!("  --season <year>                season to treat as current (default: this year)");
    println!("  --trials <n>                   search trial budget (default: {DEFAULT_TRIALS})");
    println!("  --seed <n>                     seed the search RNG for reproducible runs");
    println!("  --template <name>              start from a named stored template");
    println!("  --tournament <name>            display name for the report");
    println!("  --dry-run                      never touch the live template store");
    println!("  --include-current-rounds <m>   auto | always | never (default: auto);");
    println!("                                 always also trains on the event's own rounds");
    println!("  --data-dir <path>              input csv directory (default: data)");
    println!("  --out-dir <path>               report/template directory (default: output)");
}

fn parse_string_arg(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}="))
            && !raw.trim().is_empty()
        {
            return Some(raw.trim().to_string());
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
            && !next.starts_with("--")
        {
            return Some(next.trim().to_string());
        }
    }
    None
}

fn parse_u64_arg(name: &str) -> Option<u64> {
    parse_string_arg(name).and_then(|raw| raw.parse::<u64>().ok())
}

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == name)
}
