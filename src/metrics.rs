use std::collections::HashMap;

use once_cell::sync::Lazy;

/// The seven metric groups of the prediction model. Group weights are
/// normalized to sum to 1.0 before use; metric weights are normalized
/// within each group, independently of other groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricGroup {
    StrokesGained,
    Driving,
    Approach,
    ApproachDistance,
    AroundGreen,
    Putting,
    Scoring,
}

impl MetricGroup {
    pub const ALL: [MetricGroup; 7] = [
        MetricGroup::StrokesGained,
        MetricGroup::Driving,
        MetricGroup::Approach,
        MetricGroup::ApproachDistance,
        MetricGroup::AroundGreen,
        MetricGroup::Putting,
        MetricGroup::Scoring,
    ];

    /// Groups that encode how the current course is playing this year
    /// (live approach-shot distributions). Zeroed out when validating
    /// against other seasons.
    pub const COURSE_SETUP: [MetricGroup; 1] = [MetricGroup::ApproachDistance];

    pub fn label(self) -> &'static str {
        match self {
            MetricGroup::StrokesGained => "Strokes Gained",
            MetricGroup::Driving => "Driving",
            MetricGroup::Approach => "Approach",
            MetricGroup::ApproachDistance => "Approach Distance",
            MetricGroup::AroundGreen => "Around Green",
            MetricGroup::Putting => "Putting",
            MetricGroup::Scoring => "Scoring",
        }
    }

    pub fn default_weight(self) -> f64 {
        match self {
            MetricGroup::StrokesGained => 0.30,
            MetricGroup::Driving => 0.10,
            MetricGroup::Approach => 0.15,
            MetricGroup::ApproachDistance => 0.15,
            MetricGroup::AroundGreen => 0.10,
            MetricGroup::Putting => 0.12,
            MetricGroup::Scoring => 0.08,
        }
    }

    pub fn from_label(raw: &str) -> Option<MetricGroup> {
        let wanted = normalize_label(raw);
        MetricGroup::ALL
            .into_iter()
            .find(|g| normalize_label(g.label()) == wanted)
    }

    pub fn metrics(self) -> impl Iterator<Item = Metric> {
        Metric::ALL.into_iter().filter(move |m| m.group() == self)
    }
}

/// Canonical per-round metric catalogue. The enum is the join key
/// everywhere: round records, ranked-player vectors, alignment maps and
/// weight templates all key on `Metric`, never on a positional index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    SgTotal,
    SgTeeToGreen,
    SgOffTheTee,
    SgApproach,
    SgAroundGreen,
    SgPutting,
    DrivingDistance,
    DrivingAccuracy,
    LeftRoughTendency,
    RightRoughTendency,
    GirPct,
    ApproachProximity,
    ProximityFromFairway,
    ProximityFromRough,
    GreatApproachShots,
    PoorApproachShots,
    Prox50_75,
    Prox75_100,
    Prox100_125,
    Prox125_150,
    Prox150_175,
    Prox175_200,
    ProxOver200,
    ScramblingPct,
    SandSavePct,
    ScramblingProximity,
    GreatShortGameShots,
    PuttsPerRound,
    OnePuttPct,
    ThreePuttPct,
    PuttsMadeDistance,
    BirdiesPerRound,
    BogeysPerRound,
    Par5Scoring,
}

struct MetricInfo {
    label: &'static str,
    column: &'static str,
    group: MetricGroup,
    default_weight: f64,
    higher_is_better: bool,
}

use MetricGroup::*;

#[rustfmt::skip]
const METRIC_TABLE: [MetricInfo; 34] = [
    MetricInfo { label: "SG Total",               column: "sg_total",               group: StrokesGained,    default_weight: 0.25, higher_is_better: true },
    MetricInfo { label: "SG Tee to Green",        column: "sg_tee_to_green",        group: StrokesGained,    default_weight: 0.20, higher_is_better: true },
    MetricInfo { label: "SG Off the Tee",         column: "sg_off_the_tee",         group: StrokesGained,    default_weight: 0.12, higher_is_better: true },
    MetricInfo { label: "SG Approach",            column: "sg_approach",            group: StrokesGained,    default_weight: 0.18, higher_is_better: true },
    MetricInfo { label: "SG Around Green",        column: "sg_around_green",        group: StrokesGained,    default_weight: 0.10, higher_is_better: true },
    MetricInfo { label: "SG Putting",             column: "sg_putting",             group: StrokesGained,    default_weight: 0.15, higher_is_better: true },
    MetricInfo { label: "Driving Distance",       column: "driving_distance",       group: Driving,          default_weight: 0.35, higher_is_better: true },
    MetricInfo { label: "Driving Accuracy",       column: "driving_accuracy",       group: Driving,          default_weight: 0.35, higher_is_better: true },
    MetricInfo { label: "Left Rough Tendency",    column: "left_rough_tendency",    group: Driving,          default_weight: 0.15, higher_is_better: false },
    MetricInfo { label: "Right Rough Tendency",   column: "right_rough_tendency",   group: Driving,          default_weight: 0.15, higher_is_better: false },
    MetricInfo { label: "GIR Pct",                column: "gir_pct",                group: Approach,         default_weight: 0.25, higher_is_better: true },
    MetricInfo { label: "Approach Proximity",     column: "approach_proximity",     group: Approach,         default_weight: 0.20, higher_is_better: false },
    MetricInfo { label: "Proximity From Fairway", column: "proximity_from_fairway", group: Approach,         default_weight: 0.15, higher_is_better: false },
    MetricInfo { label: "Proximity From Rough",   column: "proximity_from_rough",   group: Approach,         default_weight: 0.10, higher_is_better: false },
    MetricInfo { label: "Great Approach Shots",   column: "great_approach_shots",   group: Approach,         default_weight: 0.15, higher_is_better: true },
    MetricInfo { label: "Poor Approach Shots",    column: "poor_approach_shots",    group: Approach,         default_weight: 0.15, higher_is_better: false },
    MetricInfo { label: "Prox 50-75",             column: "prox_50_75",             group: ApproachDistance, default_weight: 0.10, higher_is_better: false },
    MetricInfo { label: "Prox 75-100",            column: "prox_75_100",            group: ApproachDistance, default_weight: 0.12, higher_is_better: false },
    MetricInfo { label: "Prox 100-125",           column: "prox_100_125",           group: ApproachDistance, default_weight: 0.16, higher_is_better: false },
    MetricInfo { label: "Prox 125-150",           column: "prox_125_150",           group: ApproachDistance, default_weight: 0.18, higher_is_better: false },
    MetricInfo { label: "Prox 150-175",           column: "prox_150_175",           group: ApproachDistance, default_weight: 0.18, higher_is_better: false },
    MetricInfo { label: "Prox 175-200",           column: "prox_175_200",           group: ApproachDistance, default_weight: 0.14, higher_is_better: false },
    MetricInfo { label: "Prox Over 200",          column: "prox_over_200",          group: ApproachDistance, default_weight: 0.12, higher_is_better: false },
    MetricInfo { label: "Scrambling Pct",         column: "scrambling_pct",         group: AroundGreen,      default_weight: 0.35, higher_is_better: true },
    MetricInfo { label: "Sand Save Pct",          column: "sand_save_pct",          group: AroundGreen,      default_weight: 0.20, higher_is_better: true },
    MetricInfo { label: "Scrambling Proximity",   column: "scrambling_proximity",   group: AroundGreen,      default_weight: 0.25, higher_is_better: false },
    MetricInfo { label: "Great Short Game Shots", column: "great_short_game_shots", group: AroundGreen,      default_weight: 0.20, higher_is_better: true },
    MetricInfo { label: "Putts Per Round",        column: "putts_per_round",        group: Putting,          default_weight: 0.30, higher_is_better: false },
    MetricInfo { label: "One Putt Pct",           column: "one_putt_pct",           group: Putting,          default_weight: 0.25, higher_is_better: true },
    MetricInfo { label: "Three Putt Pct",         column: "three_putt_pct",         group: Putting,          default_weight: 0.25, higher_is_better: false },
    MetricInfo { label: "Putts Made Distance",    column: "putts_made_distance",    group: Putting,          default_weight: 0.20, higher_is_better: true },
    MetricInfo { label: "Birdies Per Round",      column: "birdies_per_round",      group: Scoring,          default_weight: 0.40, higher_is_better: true },
    MetricInfo { label: "Bogeys Per Round",       column: "bogeys_per_round",       group: Scoring,          default_weight: 0.35, higher_is_better: false },
    MetricInfo { label: "Par 5 Scoring",          column: "par5_scoring",           group: Scoring,          default_weight: 0.25, higher_is_better: false },
];

impl Metric {
    pub const ALL: [Metric; 34] = [
        Metric::SgTotal,
        Metric::SgTeeToGreen,
        Metric::SgOffTheTee,
        Metric::SgApproach,
        Metric::SgAroundGreen,
        Metric::SgPutting,
        Metric::DrivingDistance,
        Metric::DrivingAccuracy,
        Metric::LeftRoughTendency,
        Metric::RightRoughTendency,
        Metric::GirPct,
        Metric::ApproachProximity,
        Metric::ProximityFromFairway,
        Metric::ProximityFromRough,
        Metric::GreatApproachShots,
        Metric::PoorApproachShots,
        Metric::Prox50_75,
        Metric::Prox75_100,
        Metric::Prox100_125,
        Metric::Prox125_150,
        Metric::Prox150_175,
        Metric::Prox175_200,
        Metric::ProxOver200,
        Metric::ScramblingPct,
        Metric::SandSavePct,
        Metric::ScramblingProximity,
        Metric::GreatShortGameShots,
        Metric::PuttsPerRound,
        Metric::OnePuttPct,
        Metric::ThreePuttPct,
        Metric::PuttsMadeDistance,
        Metric::BirdiesPerRound,
        Metric::BogeysPerRound,
        Metric::Par5Scoring,
    ];

    fn info(self) -> &'static MetricInfo {
        &METRIC_TABLE[self as usize]
    }

    pub fn label(self) -> &'static str {
        self.info().label
    }

    /// CSV column name (lowercase snake_case) carrying this metric.
    pub fn column(self) -> &'static str {
        self.info().column
    }

    pub fn group(self) -> MetricGroup {
        self.info().group
    }

    pub fn default_weight(self) -> f64 {
        self.info().default_weight
    }

    pub fn higher_is_better(self) -> bool {
        self.info().higher_is_better
    }

    /// Flattened template key, `"Group::Metric"`.
    pub fn template_key(self) -> String {
        format!("{}::{}", self.group().label(), self.label())
    }

    /// Normalized label lookup. Tolerates category prefixes like
    /// `"Scoring: Birdies Per Round"`, snake_case column names and
    /// case differences.
    pub fn from_label(raw: &str) -> Option<Metric> {
        LABEL_LOOKUP.get(normalize_label(raw).as_str()).copied()
    }
}

static LABEL_LOOKUP: Lazy<HashMap<String, Metric>> = Lazy::new(|| {
    let mut map = HashMap::new();
    for metric in Metric::ALL {
        map.insert(normalize_label(metric.label()), metric);
        map.insert(normalize_label(metric.column()), metric);
    }
    map
});

/// Strip a `"Category: "` prefix, lowercase, and collapse separators so
/// that `"Scoring: SG Putting"`, `"sg_putting"` and `"SG Putting"` all
/// resolve to the same key.
pub fn normalize_label(raw: &str) -> String {
    let body = match raw.split_once(": ") {
        Some((_, rest)) => rest,
        None => raw,
    };
    let mut out = String::with_capacity(body.len());
    let mut prev_sep = true;
    for ch in body.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            prev_sep = false;
        } else if !prev_sep {
            out.push(' ');
            prev_sep = true;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

pub fn default_group_weights() -> HashMap<MetricGroup, f64> {
    MetricGroup::ALL
        .into_iter()
        .map(|g| (g, g.default_weight()))
        .collect()
}

pub fn default_metric_weights() -> HashMap<Metric, f64> {
    Metric::ALL
        .into_iter()
        .map(|m| (m, m.default_weight()))
        .collect()
}

/// Renormalize group weights to sum to 1.0, flooring at a small positive
/// epsilon so no group degenerates to zero or negative during search.
pub fn normalize_group_weights(weights: &mut HashMap<MetricGroup, f64>) {
    const FLOOR: f64 = 0.001;
    for w in weights.values_mut() {
        if !w.is_finite() || *w < FLOOR {
            *w = FLOOR;
        }
    }
    let sum: f64 = MetricGroup::ALL
        .iter()
        .filter_map(|g| weights.get(g))
        .sum();
    if sum > 0.0 {
        for w in weights.values_mut() {
            *w /= sum;
        }
    }
}

/// Renormalize metric weights within one group so absolute weights sum to
/// 1.0. Signs are preserved: a negative weight stays negative (inverted
/// metric). A group with zero total signal is left at zero.
pub fn normalize_metric_weights_in_group(weights: &mut HashMap<Metric, f64>, group: MetricGroup) {
    let total: f64 = group
        .metrics()
        .filter_map(|m| weights.get(&m))
        .map(|w| w.abs())
        .sum();
    if total <= f64::EPSILON {
        return;
    }
    for (metric, w) in weights.iter_mut() {
        if metric.group() == group {
            *w /= total;
        }
    }
}

pub fn normalize_metric_weights(weights: &mut HashMap<Metric, f64>) {
    for group in MetricGroup::ALL {
        normalize_metric_weights_in_group(weights, group);
    }
}
