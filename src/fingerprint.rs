//! Run fingerprinting: SHA-256 digests of every input file plus the
//! parameters that shaped the run, embedded in the report so two runs can
//! be compared (or a surprising result audited) later.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of a file's bytes, `None` when the file does not
/// exist. Optional inputs are recorded as absent rather than failing the
/// run.
pub fn file_digest(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let digest = Sha256::digest(&bytes);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    Ok(Some(hex))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    pub event_id: String,
    pub season: u16,
    #[serde(default)]
    pub tournament: Option<String>,
    pub seed: Option<u64>,
    pub trials: usize,
    pub dry_run: bool,
    pub include_current_rounds: String,
    #[serde(default)]
    pub template_override: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunFingerprint {
    pub algorithm: String,
    pub created_at: String,
    #[serde(flatten)]
    pub settings: RunSettings,
    /// Input label to digest; `None` marks an input that was absent.
    pub files: BTreeMap<String, Option<String>>,
}

impl RunFingerprint {
    pub fn capture(settings: RunSettings, inputs: &[(&str, &Path)]) -> Result<Self> {
        let mut files = BTreeMap::new();
        for (label, path) in inputs {
            files.insert(label.to_string(), file_digest(path)?);
        }
        Ok(Self {
            algorithm: "sha256".to_string(),
            created_at: Utc::now().to_rfc3339(),
            settings,
            files,
        })
    }
}
