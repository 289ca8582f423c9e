//! Named weight templates and their JSON-backed store. The store file is
//! both the output of a run and the input to the next one, so writes are
//! double-gated: a tolerance-bounded materiality check first, then a
//! timestamped backup before any overwrite. Dry-run mode writes the
//! would-be content to a side file instead.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::metrics::{self, Metric, MetricGroup};
use crate::persist;

pub const WEIGHT_TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone)]
pub struct WeightTemplate {
    pub name: String,
    pub event_id: Option<String>,
    pub description: String,
    pub group_weights: HashMap<MetricGroup, f64>,
    pub metric_weights: HashMap<Metric, f64>,
}

impl WeightTemplate {
    /// Default-weight template, the starting point for every search.
    pub fn baseline(name: &str, event_id: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            event_id: event_id.map(|s| s.to_string()),
            description: "baseline template from catalogue defaults".to_string(),
            group_weights: metrics::default_group_weights(),
            metric_weights: metrics::default_metric_weights(),
        }
    }

    /// Renormalize in place: group weights to sum 1.0, metric weights to
    /// absolute sum 1.0 per group.
    pub fn normalize(&mut self) {
        metrics::normalize_group_weights(&mut self.group_weights);
        metrics::normalize_metric_weights(&mut self.metric_weights);
    }
}

/// Serialized form: string-keyed maps with stable ordering, metric keys
/// flattened to `"Group::Metric"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTemplate {
    pub name: String,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub description: String,
    pub group_weights: BTreeMap<String, f64>,
    pub metric_weights: BTreeMap<String, f64>,
}

impl StoredTemplate {
    pub fn from_template(template: &WeightTemplate) -> Self {
        let mut group_weights = BTreeMap::new();
        for (group, w) in &template.group_weights {
            group_weights.insert(group.label().to_string(), *w);
        }
        let mut metric_weights = BTreeMap::new();
        for (metric, w) in &template.metric_weights {
            metric_weights.insert(metric.template_key(), *w);
        }
        Self {
            name: template.name.clone(),
            event_id: template.event_id.clone(),
            description: template.description.clone(),
            group_weights,
            metric_weights,
        }
    }

    /// Rehydrate; weight keys that no longer exist in the catalogue are
    /// dropped.
    pub fn to_template(&self) -> WeightTemplate {
        let mut group_weights = HashMap::new();
        for (label, w) in &self.group_weights {
            if let Some(group) = MetricGroup::from_label(label) {
                group_weights.insert(group, *w);
            }
        }
        let mut metric_weights = HashMap::new();
        for (key, w) in &self.metric_weights {
            let metric_part = key.rsplit("::").next().unwrap_or(key);
            if let Some(metric) = Metric::from_label(metric_part) {
                metric_weights.insert(metric, *w);
            }
        }
        WeightTemplate {
            name: self.name.clone(),
            event_id: self.event_id.clone(),
            description: self.description.clone(),
            group_weights,
            metric_weights,
        }
    }
}

/// Conservative materiality check: any key present on only one side, or
/// any weight differing by more than `tolerance`, counts as different.
pub fn templates_differ(a: &WeightTemplate, b: &WeightTemplate, tolerance: f64) -> bool {
    let sa = StoredTemplate::from_template(a);
    let sb = StoredTemplate::from_template(b);
    maps_differ(&sa.group_weights, &sb.group_weights, tolerance)
        || maps_differ(&sa.metric_weights, &sb.metric_weights, tolerance)
}

fn maps_differ(a: &BTreeMap<String, f64>, b: &BTreeMap<String, f64>, tolerance: f64) -> bool {
    for (key, va) in a {
        match b.get(key) {
            Some(vb) if (va - vb).abs() <= tolerance => {}
            _ => return true,
        }
    }
    b.keys().any(|k| !a.contains_key(k))
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct TemplateFile {
    version: u32,
    templates: BTreeMap<String, StoredTemplate>,
}

const STORE_VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct TemplateStore {
    path: PathBuf,
    file: TemplateFile,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Candidate matches the persisted template within tolerance; nothing
    /// written.
    Unchanged,
    /// Store rewritten in place; `backup` holds the pre-write copy when
    /// one existed.
    Written { backup: Option<PathBuf> },
    /// Dry run: would-be content written to a side file, store untouched.
    DryRun { path: PathBuf },
}

impl TemplateStore {
    /// Open a store; a missing file starts empty rather than erroring.
    pub fn open(path: &Path) -> Result<Self> {
        let file = if path.exists() {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("read template store {}", path.display()))?;
            serde_json::from_str::<TemplateFile>(&raw)
                .with_context(|| format!("parse template store {}", path.display()))?
        } else {
            TemplateFile {
                version: STORE_VERSION,
                templates: BTreeMap::new(),
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<WeightTemplate> {
        self.file.templates.get(name).map(|t| t.to_template())
    }

    pub fn names(&self) -> Vec<String> {
        self.file.templates.keys().cloned().collect()
    }

    pub fn upsert(&mut self, template: &WeightTemplate) {
        self.file
            .templates
            .insert(template.name.clone(), StoredTemplate::from_template(template));
    }

    pub fn delete(&mut self, name: &str) -> bool {
        self.file.templates.remove(name).is_some()
    }

    pub fn save(&mut self) -> Result<Option<PathBuf>> {
        self.file.version = STORE_VERSION;
        let raw = serde_json::to_string_pretty(&self.file).context("serialize template store")?;
        persist::write_with_backup(&self.path, &raw)
    }

    fn serialized_with(&self, candidate: &WeightTemplate) -> Result<String> {
        let mut file = self.file.clone();
        file.version = STORE_VERSION;
        file.templates
            .insert(candidate.name.clone(), StoredTemplate::from_template(candidate));
        serde_json::to_string_pretty(&file).context("serialize template store")
    }

    /// Materiality-gated write. A candidate that matches the persisted
    /// template within [`WEIGHT_TOLERANCE`] is a no-op, not an error.
    pub fn maybe_persist(
        &mut self,
        candidate: &WeightTemplate,
        dry_run: bool,
    ) -> Result<PersistOutcome> {
        if let Some(existing) = self.get(&candidate.name) {
            if !templates_differ(candidate, &existing, WEIGHT_TOLERANCE) {
                return Ok(PersistOutcome::Unchanged);
            }
        }

        if dry_run {
            let stamp = Utc::now().format("%Y%m%d_%H%M%S");
            let dir = self
                .path
                .parent()
                .map(|p| p.join("output"))
                .unwrap_or_else(|| PathBuf::from("output"));
            let side = dir.join(format!("dryrun_templates_{stamp}.json"));
            let raw = self.serialized_with(candidate)?;
            persist::write_atomic(&side, &raw)?;
            return Ok(PersistOutcome::DryRun { path: side });
        }

        self.upsert(candidate);
        let backup = self.save()?;
        Ok(PersistOutcome::Written { backup })
    }
}
