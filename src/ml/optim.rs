// ============================================================
// Layer 5 — Optimizer
// ============================================================
// SGD with momentum, weight decay and gradient-norm clipping.
//
//   ‖g‖ over every parameter     (global L2 norm, must be finite)
//   g ← g · c / ‖g‖  if ‖g‖ > c  (clip)
//   g ← g + λ θ                  (weight decay)
//   v ← μ v + g                  (momentum, no dampening)
//   θ ← θ − lr · v
//
// Burn's optimizers take the learning rate as an argument on
// every step instead of storing it, so the rate lives next to
// the optimizer in a `Learner`. That single rate is the run's
// only parameter group.
//
// Gradients are produced fresh by every `backward()`, so there
// is nothing to zero before the forward pass.

use burn::{
    module::{AutodiffModule, ModuleVisitor, ParamId},
    optim::{
        adaptor::OptimizerAdaptor, decay::WeightDecayConfig, momentum::MomentumConfig,
        GradientsParams, Optimizer, Sgd, SgdConfig,
    },
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};

use crate::domain::error::TrainingError;

pub type SgdOptimizer<M, B> = OptimizerAdaptor<Sgd<<B as AutodiffBackend>::InnerBackend>, M, B>;

/// Access to the optimizer's learning rates, one per parameter group.
pub trait ParamGroups {
    fn learning_rates(&self) -> Vec<f64>;

    /// Set the rate of every group.
    fn set_learning_rate(&mut self, lr: f64);
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SgdSettings {
    pub base_lr:        f64,
    pub momentum:       f64,
    pub weight_decay:   f64,
    pub clip_gradients: f64,
}

impl SgdSettings {
    /// Clipping is not part of the optimizer: it needs the norm over
    /// all parameters, which `Learner::update` computes itself.
    pub fn init<B, M>(&self) -> SgdOptimizer<M, B>
    where
        B: AutodiffBackend,
        M: AutodiffModule<B>,
    {
        let momentum = (self.momentum > 0.0).then(|| {
            MomentumConfig::new()
                .with_momentum(self.momentum)
                .with_dampening(0.0)
        });
        let weight_decay = (self.weight_decay > 0.0)
            .then(|| WeightDecayConfig::new(self.weight_decay as f32));

        SgdConfig::new()
            .with_momentum(momentum)
            .with_weight_decay(weight_decay)
            .init()
    }
}

// ─── Global gradient norm ─────────────────────────────────────────────────────
/// Sums the squared gradient entries of every visited parameter.
struct SquaredNorm<'a> {
    grads: &'a GradientsParams,
    total: f64,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for SquaredNorm<'_> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            self.total += grad.powi_scalar(2).sum().into_scalar().elem::<f64>();
        }
    }
}

/// Multiplies every visited parameter's gradient by `scale`.
struct ScaleGrads<'a> {
    grads: &'a mut GradientsParams,
    scale: f64,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for ScaleGrads<'_> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.remove::<B::InnerBackend, D>(id) {
            self.grads.register(id, grad.mul_scalar(self.scale));
        }
    }
}

/// Rescale `grads` so their L2 norm over all of `model`'s parameters
/// is at most `max_norm`. Returns the norm before clipping; a
/// non-finite norm leaves the gradients untouched.
pub fn clip_grad_norm<B, M>(model: &M, grads: &mut GradientsParams, max_norm: f64) -> f64
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let mut squared = SquaredNorm { grads, total: 0.0 };
    model.visit(&mut squared);
    let norm = squared.total.sqrt();

    if norm.is_finite() && norm > max_norm {
        let mut scale = ScaleGrads { grads, scale: max_norm / (norm + 1e-6) };
        model.visit(&mut scale);
    }
    norm
}

// ─── Learner ──────────────────────────────────────────────────────────────────
/// A model, its optimizer, and the current learning rate.
pub struct Learner<M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    pub model: M,
    optim:     SgdOptimizer<M, B>,
    lr:        f64,
    max_norm:  f64,
}

impl<M, B> Learner<M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    pub fn new(model: M, settings: &SgdSettings) -> Self {
        Self {
            model,
            optim:    settings.init(),
            lr:       settings.base_lr,
            max_norm: settings.clip_gradients,
        }
    }

    /// Backpropagate `loss`, clip, and apply one optimizer update.
    ///
    /// A non-finite loss or gradient norm fails before any
    /// parameter is touched.
    pub fn update(&mut self, loss: Tensor<B, 1>, epoch: usize, iteration: usize) -> anyhow::Result<f64> {
        let value: f64 = loss.clone().into_scalar().elem::<f64>();
        if !value.is_finite() {
            return Err(TrainingError::NonFiniteLoss { value, epoch, iteration }.into());
        }

        let mut grads = GradientsParams::from_grads(loss.backward(), &self.model);
        let norm = clip_grad_norm::<B, M>(&self.model, &mut grads, self.max_norm);
        if !norm.is_finite() {
            return Err(TrainingError::NonFiniteGradient { norm, epoch, iteration }.into());
        }

        self.model = self.optim.step(self.lr, self.model.clone(), grads);
        Ok(value)
    }

    pub fn optimizer(&self) -> &SgdOptimizer<M, B> {
        &self.optim
    }
}

impl<M, B> ParamGroups for Learner<M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    fn learning_rates(&self) -> Vec<f64> {
        vec![self.lr]
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.lr = lr;
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{Autodiff, NdArray},
        nn::{Linear, LinearConfig},
    };

    type TestBackend = Autodiff<NdArray>;

    fn plain_sgd(clip_gradients: f64) -> SgdSettings {
        SgdSettings { base_lr: 1.0, momentum: 0.0, weight_decay: 0.0, clip_gradients }
    }

    /// Weight and bias of a 1 → 1 linear layer.
    fn params(model: &Linear<TestBackend>) -> (f64, f64) {
        let w = model.weight.val().into_scalar().elem::<f64>();
        let b = model.bias.as_ref().map_or(0.0, |b| b.val().into_scalar().elem::<f64>());
        (w, b)
    }

    fn linear() -> Linear<TestBackend> {
        LinearConfig::new(1, 1).init(&Default::default())
    }

    /// loss = scale · (w · 1 + b), so both gradients equal `scale`.
    fn scaled_output(model: &Linear<TestBackend>, scale: f32) -> Tensor<TestBackend, 1> {
        let x = Tensor::<TestBackend, 2>::ones([1, 1], &Default::default());
        model.forward(x).mul_scalar(scale).sum()
    }

    #[test]
    fn test_clipping_bounds_the_norm_over_all_parameters() {
        let mut learner = Learner::new(linear(), &plain_sgd(10.0));
        let (w0, b0) = params(&learner.model);

        let loss = scaled_output(&learner.model, 8.0);
        learner.update(loss, 1, 1).unwrap();

        // dw = db = 8, global norm 8·√2 ≈ 11.31, rescaled to 10
        let (w1, b1) = params(&learner.model);
        let step = ((w1 - w0).powi(2) + (b1 - b0).powi(2)).sqrt();
        assert!((step - 10.0).abs() < 1e-3, "update norm {step}");
        assert!(((w1 - w0) - (b1 - b0)).abs() < 1e-5);
    }

    #[test]
    fn test_small_gradients_are_not_clipped() {
        let mut learner = Learner::new(linear(), &plain_sgd(10.0));
        let (w0, b0) = params(&learner.model);

        let loss = scaled_output(&learner.model, 2.0);
        learner.update(loss, 1, 1).unwrap();

        let (w1, b1) = params(&learner.model);
        assert!((w0 - w1 - 2.0).abs() < 1e-5);
        assert!((b0 - b1 - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_clip_grad_norm_reports_the_unclipped_norm() {
        let model = linear();
        let grads = scaled_output(&model, 3.0).backward();
        let mut grads = GradientsParams::from_grads(grads, &model);

        let norm = clip_grad_norm::<TestBackend, _>(&model, &mut grads, 1.0);
        assert!((norm - 3.0 * 2f64.sqrt()).abs() < 1e-5);

        let after = clip_grad_norm::<TestBackend, _>(&model, &mut grads, 1.0);
        assert!((after - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_non_finite_gradient_is_fatal_and_leaves_weights() {
        let mut learner = Learner::new(linear(), &plain_sgd(10.0));
        let before = params(&learner.model);

        // sqrt at zero: finite loss, infinite slope
        let x = Tensor::<TestBackend, 2>::ones([1, 1], &Default::default());
        let out = learner.model.forward(x);
        let loss = (out.clone() - out.detach()).sqrt().sum();

        let err = learner.update(loss, 3, 11).unwrap_err();
        match err.downcast_ref::<TrainingError>() {
            Some(TrainingError::NonFiniteGradient { norm, epoch, iteration }) => {
                assert!(!norm.is_finite());
                assert_eq!((*epoch, *iteration), (3, 11));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(params(&learner.model), before);
    }

    #[test]
    fn test_learning_rate_is_the_only_group() {
        let mut learner = Learner::new(linear(), &plain_sgd(10.0));
        assert_eq!(learner.learning_rates(), vec![1.0]);
        learner.set_learning_rate(0.25);
        assert_eq!(learner.learning_rates(), vec![0.25]);
    }
}
