//! Pure numeric primitives: correlations, RMSE, regularized logistic
//! regression and the NDCG-style top-N score. Degenerate inputs (empty
//! slices, zero variance, length mismatch) resolve to a defined neutral
//! value instead of NaN so nothing poisons a downstream weighted sum.

use serde::Serialize;

pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    if xs.is_empty() || xs.len() != ys.len() {
        return 0.0;
    }
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x <= f64::EPSILON || var_y <= f64::EPSILON {
        return 0.0;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}

/// Spearman rank correlation with average-rank tie handling (ties get the
/// mean of their 1-indexed rank positions), then Pearson on the ranks.
pub fn spearman(xs: &[f64], ys: &[f64]) -> f64 {
    if xs.is_empty() || xs.len() != ys.len() {
        return 0.0;
    }
    pearson(&average_ranks(xs), &average_ranks(ys))
}

fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // 1-indexed mean rank of the tied span [i, j].
        let mean_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = mean_rank;
        }
        i = j + 1;
    }
    ranks
}

pub fn rmse(predicted: &[f64], actual: &[f64]) -> f64 {
    if predicted.is_empty() || predicted.len() != actual.len() {
        return 0.0;
    }
    let sum: f64 = predicted
        .iter()
        .zip(actual)
        .map(|(p, a)| (p - a) * (p - a))
        .sum();
    (sum / predicted.len() as f64).sqrt()
}

pub fn sigmoid(z: f64) -> f64 {
    if z < -50.0 {
        0.0
    } else if z > 50.0 {
        1.0
    } else {
        1.0 / (1.0 + (-z).exp())
    }
}

#[derive(Debug, Clone)]
pub struct TrainingSample {
    pub features: Vec<f64>,
    pub label: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct TrainOptions {
    pub iterations: usize,
    pub learning_rate: f64,
    pub l2: f64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            iterations: 300,
            learning_rate: 0.12,
            l2: 0.01,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogisticModel {
    pub weights: Vec<f64>,
    pub bias: f64,
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
    pub l2: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct EvalStats {
    pub accuracy: f64,
    pub log_loss: f64,
    pub samples: usize,
}

pub const MIN_TRAIN_SAMPLES: usize = 10;

/// Standardize features to zero mean / unit variance, then batch gradient
/// descent on L2-regularized cross-entropy. Returns `None` below
/// [`MIN_TRAIN_SAMPLES`].
pub fn train_logistic(samples: &[TrainingSample], opts: TrainOptions) -> Option<LogisticModel> {
    if samples.len() < MIN_TRAIN_SAMPLES {
        return None;
    }
    let dim = samples[0].features.len();
    if dim == 0 || samples.iter().any(|s| s.features.len() != dim) {
        return None;
    }

    let (means, stds) = feature_norm_stats(samples, dim);
    let standardized: Vec<Vec<f64>> = samples
        .iter()
        .map(|s| {
            s.features
                .iter()
                .enumerate()
                .map(|(i, v)| (v - means[i]) / stds[i])
                .collect()
        })
        .collect();

    let n = samples.len() as f64;
    let mut weights = vec![0.0; dim];
    let mut bias = 0.0;

    for _ in 0..opts.iterations {
        let mut grad_w = vec![0.0; dim];
        let mut grad_b = 0.0;
        for (x, sample) in standardized.iter().zip(samples) {
            let z = bias + dot(&weights, x);
            let err = sigmoid(z) - sample.label;
            for (g, xi) in grad_w.iter_mut().zip(x) {
                *g += err * xi;
            }
            grad_b += err;
        }
        for (w, g) in weights.iter_mut().zip(&grad_w) {
            *w -= opts.learning_rate * (g / n + opts.l2 * *w);
        }
        bias -= opts.learning_rate * grad_b / n;
    }

    Some(LogisticModel {
        weights,
        bias,
        means,
        stds,
        l2: opts.l2,
    })
}

pub fn evaluate_logistic(model: &LogisticModel, samples: &[TrainingSample]) -> EvalStats {
    if samples.is_empty() {
        return EvalStats {
            accuracy: 0.0,
            log_loss: 0.0,
            samples: 0,
        };
    }
    let mut correct = 0usize;
    let mut loss = 0.0;
    for sample in samples {
        let p = predict(model, &sample.features);
        if (p >= 0.5) == (sample.label >= 0.5) {
            correct += 1;
        }
        let clamped = p.clamp(1e-9, 1.0 - 1e-9);
        loss += -(sample.label * clamped.ln() + (1.0 - sample.label) * (1.0 - clamped).ln());
    }
    let n = samples.len() as f64;
    EvalStats {
        accuracy: correct as f64 / n,
        log_loss: loss / n,
        samples: samples.len(),
    }
}

pub fn predict(model: &LogisticModel, features: &[f64]) -> f64 {
    let mut z = model.bias;
    for (i, w) in model.weights.iter().enumerate() {
        let x = features.get(i).copied().unwrap_or(0.0);
        let std = model.stds.get(i).copied().unwrap_or(1.0).max(1e-9);
        let mean = model.means.get(i).copied().unwrap_or(0.0);
        z += w * (x - mean) / std;
    }
    sigmoid(z)
}

#[derive(Debug, Clone, Serialize)]
pub struct CvSummary {
    pub event_count: usize,
    pub total_samples: usize,
    pub best_l2: f64,
    pub avg_log_loss: f64,
    pub avg_accuracy: f64,
    pub folds_used: usize,
}

#[derive(Debug, Clone)]
pub struct CvOutcome {
    pub summary: CvSummary,
    pub model: LogisticModel,
}

pub const MIN_CV_GROUPS: usize = 3;
pub const MIN_CV_SAMPLES: usize = 30;

/// Leave-one-group-out cross-validation over a small L2 grid. The group
/// key is the tournament event id, so rounds of the same event never land
/// on both sides of a fold (same course and conditions repeat within an
/// event, which would otherwise flatter the reported accuracy). Picks the
/// L2 with the lowest average log-loss, then refits on all samples.
pub fn cross_validate_by_group(
    groups: &[(String, Vec<TrainingSample>)],
    l2_candidates: &[f64],
) -> Option<CvOutcome> {
    let total_samples: usize = groups.iter().map(|(_, s)| s.len()).sum();
    if groups.len() < MIN_CV_GROUPS || total_samples < MIN_CV_SAMPLES || l2_candidates.is_empty() {
        return None;
    }

    let mut best: Option<(f64, f64, f64, usize)> = None; // (l2, log_loss, accuracy, folds)
    for &l2 in l2_candidates {
        let mut loss_sum = 0.0;
        let mut acc_sum = 0.0;
        let mut folds = 0usize;
        for held_out in 0..groups.len() {
            let train: Vec<TrainingSample> = groups
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != held_out)
                .flat_map(|(_, (_, s))| s.iter().cloned())
                .collect();
            let val = &groups[held_out].1;
            if val.is_empty() {
                continue;
            }
            let opts = TrainOptions {
                l2,
                ..TrainOptions::default()
            };
            let Some(model) = train_logistic(&train, opts) else {
                continue;
            };
            let stats = evaluate_logistic(&model, val);
            loss_sum += stats.log_loss;
            acc_sum += stats.accuracy;
            folds += 1;
        }
        if folds == 0 {
            continue;
        }
        let avg_loss = loss_sum / folds as f64;
        let avg_acc = acc_sum / folds as f64;
        let better = match best {
            Some((_, best_loss, _, _)) => avg_loss < best_loss,
            None => true,
        };
        if better {
            best = Some((l2, avg_loss, avg_acc, folds));
        }
    }

    let (best_l2, avg_log_loss, avg_accuracy, folds_used) = best?;
    let all: Vec<TrainingSample> = groups
        .iter()
        .flat_map(|(_, s)| s.iter().cloned())
        .collect();
    let opts = TrainOptions {
        l2: best_l2,
        ..TrainOptions::default()
    };
    let model = train_logistic(&all, opts)?;

    Some(CvOutcome {
        summary: CvSummary {
            event_count: groups.len(),
            total_samples,
            best_l2,
            avg_log_loss,
            avg_accuracy,
            folds_used,
        },
        model,
    })
}

/// Discounted-gain score of a predicted ordering against actual finish
/// positions, 0..100. Gain for a player at actual position `p` is
/// `max(0, n - p + 1)` inside the top-n, zero otherwise; discount is
/// `1/log2(rank + 2)`; normalized against the ideal ordering.
pub fn ndcg_weighted_top_n(actual_positions_in_predicted_order: &[u32], n: usize) -> f64 {
    if actual_positions_in_predicted_order.is_empty() || n == 0 {
        return 0.0;
    }
    let gain = |pos: u32| -> f64 {
        if pos as usize <= n {
            (n as f64) - (pos as f64) + 1.0
        } else {
            0.0
        }
    };

    let mut dcg = 0.0;
    for (rank, &pos) in actual_positions_in_predicted_order.iter().take(n).enumerate() {
        dcg += gain(pos) / ((rank as f64) + 2.0).log2();
    }

    let mut gains: Vec<f64> = actual_positions_in_predicted_order
        .iter()
        .map(|&p| gain(p))
        .collect();
    gains.sort_by(|a, b| b.total_cmp(a));
    let mut idcg = 0.0;
    for (rank, g) in gains.iter().take(n).enumerate() {
        idcg += g / ((rank as f64) + 2.0).log2();
    }

    if idcg <= f64::EPSILON {
        return 0.0;
    }
    100.0 * dcg / idcg
}

fn feature_norm_stats(samples: &[TrainingSample], dim: usize) -> (Vec<f64>, Vec<f64>) {
    let n = samples.len() as f64;
    let mut means = vec![0.0; dim];
    for s in samples {
        for (i, v) in s.features.iter().enumerate() {
            means[i] += v;
        }
    }
    for m in &mut means {
        *m /= n;
    }

    let mut stds = vec![0.0; dim];
    for s in samples {
        for (i, v) in s.features.iter().enumerate() {
            let d = v - means[i];
            stds[i] += d * d;
        }
    }
    for s in &mut stds {
        *s = (*s / n).sqrt().max(1e-9);
    }
    (means, stds)
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
