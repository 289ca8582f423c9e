//! Per-round input records and CSV ingestion. Rows surface as maps of
//! lowercase snake_case column name to string value; bad rows are skipped
//! rather than failing the load.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result, anyhow};

use crate::finish::{self, FinishResult};
use crate::metrics::Metric;

/// One player's performance in one round of one historical event.
/// Immutable once loaded.
#[derive(Debug, Clone)]
pub struct PlayerRoundRecord {
    pub player_id: String,
    pub player_name: String,
    pub event_id: String,
    pub season: u16,
    pub round_no: u8,
    pub fin_text: String,
    pub metrics: HashMap<Metric, f64>,
}

/// Read a CSV into rows keyed by lowercase snake_case header names.
pub fn load_rows(path: &Path) -> Result<Vec<HashMap<String, String>>> {
    if !path.exists() {
        return Err(anyhow!("required input file not found: {}", path.display()));
    }
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("open csv {}", path.display()))?;
    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("read headers {}", path.display()))?
        .iter()
        .map(normalize_header)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let Ok(record) = record else {
            continue;
        };
        let mut row = HashMap::with_capacity(headers.len());
        for (header, value) in headers.iter().zip(record.iter()) {
            row.insert(header.clone(), value.trim().to_string());
        }
        rows.push(row);
    }
    Ok(rows)
}

fn normalize_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_us = true;
    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            prev_us = false;
        } else if !prev_us {
            out.push('_');
            prev_us = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

/// Build round records from raw rows. Rows without a player id, event id
/// or season are skipped; metric cells that fail to parse are simply
/// absent from the metric map (coverage gating happens downstream).
pub fn rounds_from_rows(rows: &[HashMap<String, String>]) -> Vec<PlayerRoundRecord> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(player_id) = non_empty(row, "player_id") else {
            continue;
        };
        let Some(event_id) = non_empty(row, "event_id") else {
            continue;
        };
        let Some(season) = row.get("season").and_then(|s| s.parse::<u16>().ok()) else {
            continue;
        };
        let round_no = row
            .get("round")
            .and_then(|s| s.parse::<u8>().ok())
            .unwrap_or(1);
        let player_name = non_empty(row, "player_name").unwrap_or_else(|| player_id.clone());
        let fin_text = row.get("fin_text").cloned().unwrap_or_default();

        let mut metrics = HashMap::new();
        for metric in Metric::ALL {
            if let Some(value) = row.get(metric.column()).and_then(|s| parse_cell(s)) {
                metrics.insert(metric, value);
            }
        }

        out.push(PlayerRoundRecord {
            player_id,
            player_name,
            event_id,
            season,
            round_no,
            fin_text,
            metrics,
        });
    }
    out
}

fn non_empty(row: &HashMap<String, String>, key: &str) -> Option<String> {
    row.get(key)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn parse_cell(raw: &str) -> Option<f64> {
    let s = raw.trim().trim_end_matches('%');
    if s.is_empty() || s == "-" {
        return None;
    }
    s.replace(',', "").parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn rounds_by_season(rounds: &[PlayerRoundRecord]) -> BTreeMap<u16, Vec<PlayerRoundRecord>> {
    let mut out: BTreeMap<u16, Vec<PlayerRoundRecord>> = BTreeMap::new();
    for round in rounds {
        out.entry(round.season).or_default().push(round.clone());
    }
    out
}

pub fn rounds_by_event(rounds: &[PlayerRoundRecord]) -> BTreeMap<String, Vec<PlayerRoundRecord>> {
    let mut out: BTreeMap<String, Vec<PlayerRoundRecord>> = BTreeMap::new();
    for round in rounds {
        out.entry(round.event_id.clone()).or_default().push(round.clone());
    }
    out
}

/// Extract one finish result per player from a set of rounds, through the
/// single canonical fallback path. The latest round's finish text wins.
pub fn results_from_rounds(rounds: &[PlayerRoundRecord]) -> Vec<FinishResult> {
    let mut latest: BTreeMap<&str, (u8, &str)> = BTreeMap::new();
    for round in rounds {
        let entry = latest.entry(round.player_id.as_str()).or_insert((0, ""));
        if round.round_no >= entry.0 {
            *entry = (round.round_no, round.fin_text.as_str());
        }
    }
    let raw: Vec<FinishResult> = latest
        .into_iter()
        .map(|(player_id, (_, fin))| FinishResult {
            player_id: player_id.to_string(),
            position: finish::parse_finish(fin),
        })
        .collect();
    finish::with_fallback(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn header_normalization_snakes() {
        assert_eq!(normalize_header("SG: Putting"), "sg_putting");
        assert_eq!(normalize_header(" Driving Distance "), "driving_distance");
        assert_eq!(normalize_header("prox_125_150"), "prox_125_150");
    }

    #[test]
    fn rounds_skip_incomplete_rows() {
        let rows = vec![
            row(&[
                ("player_id", "p1"),
                ("event_id", "e1"),
                ("season", "2025"),
                ("round", "2"),
                ("fin_text", "T5"),
                ("sg_putting", "1.25"),
                ("gir_pct", "68%"),
            ]),
            row(&[("player_id", ""), ("event_id", "e1"), ("season", "2025")]),
            row(&[("player_id", "p2"), ("event_id", "e1"), ("season", "bad")]),
        ];
        let records = rounds_from_rows(&rows);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.player_id, "p1");
        assert_eq!(r.round_no, 2);
        assert_eq!(r.metrics.get(&Metric::SgPutting), Some(&1.25));
        assert_eq!(r.metrics.get(&Metric::GirPct), Some(&68.0));
        assert!(!r.metrics.contains_key(&Metric::SgTotal));
    }

    #[test]
    fn results_use_latest_round_and_fallback() {
        let rows = vec![
            row(&[
                ("player_id", "p1"),
                ("event_id", "e1"),
                ("season", "2025"),
                ("round", "1"),
                ("fin_text", ""),
            ]),
            row(&[
                ("player_id", "p1"),
                ("event_id", "e1"),
                ("season", "2025"),
                ("round", "4"),
                ("fin_text", "T2"),
            ]),
            row(&[
                ("player_id", "p2"),
                ("event_id", "e1"),
                ("season", "2025"),
                ("round", "2"),
                ("fin_text", "CUT"),
            ]),
        ];
        let records = rounds_from_rows(&rows);
        let results = results_from_rounds(&records);
        assert_eq!(results.len(), 2);
        let p1 = results.iter().find(|r| r.player_id == "p1").unwrap();
        let p2 = results.iter().find(|r| r.player_id == "p2").unwrap();
        assert_eq!(p1.position, Some(2));
        assert_eq!(p2.position, Some(3)); // worst parseable + 1
    }

    #[test]
    fn load_rows_missing_file_is_an_error() {
        let err = load_rows(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
