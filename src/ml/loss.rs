// ============================================================
// Layer 5 — Loss Functions
// ============================================================
// Pose loss:
//   negative log-likelihood of the true class, mean over the batch
//     L = -mean_i log p(y_i | x_i)
//
// Affinity loss (per example, then mean, then × scale):
//   y > 0  measured affinity   d = pred − y
//   y < 0  bad pose, |y| is an upper bound on the affinity
//          d = (pred + y) × penalty   if pred > |y|
//          d = 0                      otherwise
//   y = 0  no information      d = 0
//
//   L2:           ½ d²
//   pseudo-Huber: δ² (√(1 + (d/δ)²) − 1)
//
// Both are pure functions of predictions and targets, so they
// work on any backend and keep the autodiff graph intact.

use burn::prelude::*;

/// Negative log-likelihood over log-probabilities.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoseLoss;

impl PoseLoss {
    /// log_probs: [N, 2], labels: [N] → scalar [1]
    pub fn forward<B: Backend>(&self, log_probs: Tensor<B, 2>, labels: Tensor<B, 1, Int>) -> Tensor<B, 1> {
        let [n] = labels.dims();
        log_probs
            .gather(1, labels.reshape([n, 1]))
            .neg()
            .mean()
    }
}

#[derive(Config, Debug)]
pub struct AffinityLossConfig {
    /// Pseudo-Huber transition point
    #[config(default = 4.0)]
    pub delta: f64,

    /// Multiplier on the hinge term for bad poses
    #[config(default = 1.0)]
    pub penalty: f64,

    #[config(default = false)]
    pub pseudo_huber: bool,

    /// Multiplier on the mean loss
    #[config(default = 1.0)]
    pub scale: f64,
}

impl AffinityLossConfig {
    pub fn init(&self) -> AffinityLoss {
        AffinityLoss {
            delta:        self.delta,
            penalty:      self.penalty,
            pseudo_huber: self.pseudo_huber,
            scale:        self.scale,
        }
    }
}

/// Hinge-aware affinity regression loss.
#[derive(Debug, Clone)]
pub struct AffinityLoss {
    delta:        f64,
    penalty:      f64,
    pseudo_huber: bool,
    scale:        f64,
}

impl AffinityLoss {
    /// pred: [N], target: [N] → scalar [1]
    pub fn forward<B: Backend>(&self, pred: Tensor<B, 1>, target: Tensor<B, 1>) -> Tensor<B, 1> {
        let good = target.clone().greater_elem(0.0);
        let bad  = target.clone().lower_elem(0.0);

        let diff_good = pred.clone() - target.clone();

        let over = pred + target;
        let not_over = over.clone().lower_equal_elem(0.0);
        let diff_bad = over.mul_scalar(self.penalty).mask_fill(not_over, 0.0);

        let diff = diff_good
            .zeros_like()
            .mask_where(good, diff_good)
            .mask_where(bad, diff_bad);

        let per_example = if self.pseudo_huber {
            let delta2 = self.delta * self.delta;
            diff.div_scalar(self.delta)
                .powf_scalar(2.0)
                .add_scalar(1.0)
                .sqrt()
                .sub_scalar(1.0)
                .mul_scalar(delta2)
        } else {
            diff.powf_scalar(2.0).mul_scalar(0.5)
        };

        per_example.mean().mul_scalar(self.scale)
    }
}
