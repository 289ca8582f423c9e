//! Ranking-engine seam. The optimizer treats ranking as a pure function
//! of (rounds, weight template); [`ZScoreEngine`] is the built-in
//! implementation, and any external engine can stand in through
//! [`RankingEngine`]. Determinism matters: the search engine relies on
//! identical inputs producing identical rankings.

use std::collections::HashMap;

use crate::metrics::{Metric, MetricGroup};
use crate::rounds::PlayerRoundRecord;
use crate::template_store::WeightTemplate;

#[derive(Debug, Clone)]
pub struct RankedPlayer {
    pub player_id: String,
    pub name: String,
    pub rank: u32,
    pub metrics: HashMap<Metric, f64>,
}

pub trait RankingEngine {
    fn rank(&self, template: &WeightTemplate, rounds: &[PlayerRoundRecord]) -> Vec<RankedPlayer>;
}

/// Field-relative z-score engine: per-player metric means over their
/// rounds, z-scored against the field with the metric direction applied,
/// then a group-weight x metric-weight composite. Ties break on player id
/// so the ordering is stable.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZScoreEngine;

impl RankingEngine for ZScoreEngine {
    fn rank(&self, template: &WeightTemplate, rounds: &[PlayerRoundRecord]) -> Vec<RankedPlayer> {
        let players = player_metric_means(rounds);
        if players.is_empty() {
            return Vec::new();
        }
        let dist = field_distributions(&players);

        let mut scored: Vec<(f64, String, String, HashMap<Metric, f64>)> = players
            .into_iter()
            .map(|(player_id, name, means)| {
                let score = composite_score(&means, &dist, template);
                (score, player_id, name, means)
            })
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        scored
            .into_iter()
            .enumerate()
            .map(|(idx, (_, player_id, name, metrics))| RankedPlayer {
                player_id,
                name,
                rank: idx as u32 + 1,
                metrics,
            })
            .collect()
    }
}

type PlayerMeans = (String, String, HashMap<Metric, f64>);

fn player_metric_means(rounds: &[PlayerRoundRecord]) -> Vec<PlayerMeans> {
    #[derive(Default)]
    struct Acc {
        name: String,
        sums: HashMap<Metric, (f64, u32)>,
    }

    let mut by_player: HashMap<&str, Acc> = HashMap::new();
    for round in rounds {
        let acc = by_player.entry(round.player_id.as_str()).or_default();
        if acc.name.is_empty() {
            acc.name = round.player_name.clone();
        }
        for (metric, value) in &round.metrics {
            if value.is_finite() {
                let slot = acc.sums.entry(*metric).or_insert((0.0, 0));
                slot.0 += value;
                slot.1 += 1;
            }
        }
    }

    let mut out: Vec<PlayerMeans> = by_player
        .into_iter()
        .map(|(player_id, acc)| {
            let means = acc
                .sums
                .into_iter()
                .map(|(metric, (sum, n))| (metric, sum / n as f64))
                .collect();
            (player_id.to_string(), acc.name, means)
        })
        .collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

fn field_distributions(players: &[PlayerMeans]) -> HashMap<Metric, (f64, f64)> {
    let mut out = HashMap::new();
    for metric in Metric::ALL {
        let values: Vec<f64> = players
            .iter()
            .filter_map(|(_, _, means)| means.get(&metric).copied())
            .collect();
        if values.len() < 2 {
            continue;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        let std = var.sqrt();
        if std > 1e-9 {
            out.insert(metric, (mean, std));
        }
    }
    out
}

fn composite_score(
    means: &HashMap<Metric, f64>,
    dist: &HashMap<Metric, (f64, f64)>,
    template: &WeightTemplate,
) -> f64 {
    let mut score = 0.0;
    for group in MetricGroup::ALL {
        let gw = template.group_weights.get(&group).copied().unwrap_or(0.0);
        if gw == 0.0 {
            continue;
        }
        for metric in group.metrics() {
            let mw = template.metric_weights.get(&metric).copied().unwrap_or(0.0);
            if mw == 0.0 {
                continue;
            }
            let Some(value) = means.get(&metric) else {
                continue;
            };
            let Some((mean, std)) = dist.get(&metric) else {
                continue;
            };
            let mut z = (value - mean) / std;
            if !metric.higher_is_better() {
                z = -z;
            }
            score += gw * mw * z;
        }
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template_store::WeightTemplate;

    fn round(player: &str, sg_total: f64) -> PlayerRoundRecord {
        PlayerRoundRecord {
            player_id: player.to_string(),
            player_name: player.to_uppercase(),
            event_id: "e1".to_string(),
            season: 2025,
            round_no: 1,
            fin_text: String::new(),
            metrics: HashMap::from([
                (Metric::SgTotal, sg_total),
                (Metric::PuttsPerRound, 30.0 - sg_total),
            ]),
        }
    }

    #[test]
    fn ranks_follow_weighted_signal() {
        let rounds: Vec<PlayerRoundRecord> =
            vec![round("a", 2.0), round("b", -1.0), round("c", 0.5)];
        let template = WeightTemplate::baseline("test", None);
        let ranked = ZScoreEngine.rank(&template, &rounds);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0].player_id, "a");
        assert_eq!(ranked[2].player_id, "b");
        assert_eq!(ranked[0].rank, 1);
    }

    #[test]
    fn ranking_is_deterministic() {
        let rounds: Vec<PlayerRoundRecord> =
            vec![round("a", 1.0), round("b", 1.0), round("c", 1.0)];
        let template = WeightTemplate::baseline("test", None);
        let first = ZScoreEngine.rank(&template, &rounds);
        let second = ZScoreEngine.rank(&template, &rounds);
        let ids = |rs: &[RankedPlayer]| rs.iter().map(|r| r.player_id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn empty_rounds_rank_empty() {
        let template = WeightTemplate::baseline("test", None);
        assert!(ZScoreEngine.rank(&template, &[]).is_empty());
    }
}
