//! Finish-position normalization. Every place finish results are
//! assembled (historical rows, live snapshots, result CSVs) goes through
//! [`parse_finish`] and [`with_fallback`] so the fallback policy is
//! applied identically everywhere.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishResult {
    pub player_id: String,
    pub position: Option<u32>,
}

const NON_FINISHES: [&str; 7] = ["WD", "DQ", "CUT", "DNS", "DNF", "MC", "MDF"];

/// Parse a heterogeneous finish-position string: `"T5"` and `"5T"` strip
/// the tie marker, withdrawal/cut codes map to `None`, plain integers
/// parse directly.
pub fn parse_finish(text: &str) -> Option<u32> {
    let s = text.trim().to_ascii_uppercase();
    if s.is_empty() || NON_FINISHES.contains(&s.as_str()) {
        return None;
    }
    let digits = s.strip_prefix('T').or_else(|| s.strip_suffix('T')).unwrap_or(&s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u32>().ok().filter(|p| *p > 0)
}

/// Replace unresolved positions with `max(parseable) + 1` so players who
/// did not finish rank below everyone who did, without being discarded.
/// If nothing in the set parsed, the whole set is dropped. Idempotent: a
/// set with no `None` positions passes through unchanged.
pub fn with_fallback(results: Vec<FinishResult>) -> Vec<FinishResult> {
    let Some(worst) = results.iter().filter_map(|r| r.position).max() else {
        return Vec::new();
    };
    results
        .into_iter()
        .map(|r| FinishResult {
            position: r.position.or(Some(worst + 1)),
            player_id: r.player_id,
        })
        .collect()
}
