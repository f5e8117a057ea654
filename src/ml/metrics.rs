// ============================================================
// Layer 5 — Evaluation Metrics
// ============================================================
// Stateful accumulators fed by every evaluation record of one
// pass, then reduced to a single number.
//
//   reset()   at the start of a pass
//   update()  once per batch
//   compute() after the last batch
//
// Registered names, in logging order:
//
//   Loss (pose)         example-weighted mean NLL
//   Accuracy            argmax == label
//   Balanced accuracy   mean recall over the classes seen
//   ROC AUC             optional; P(good pose) ranked against labels
//   Loss (affinity)     example-weighted mean affinity loss  (dual-task)
//   RMSE (affinity)     against |affinity|                   (dual-task)
//   Pearson (affinity)  against |affinity|                   (dual-task)
//
// Losses are computed on the device; the remaining metrics pull
// the few values they need back to the host.

use anyhow::Result;
use burn::prelude::*;

use crate::domain::{error::TrainingError, task::TaskMode};
use crate::engine::{EngineState, Event, Handler};
use crate::ml::{
    loss::{AffinityLoss, PoseLoss},
    step::{EvalStrategy, StepOutput},
};

pub trait Metric<B: Backend> {
    fn name(&self) -> &'static str;

    fn reset(&mut self);

    fn update(&mut self, output: &StepOutput<B>) -> Result<(), TrainingError>;

    fn compute(&self) -> Result<f64, TrainingError>;
}

fn floats<B: Backend, const D: usize>(t: Tensor<B, D>) -> Result<Vec<f32>, TrainingError> {
    t.into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| TrainingError::TensorData(format!("{e:?}")))
}

fn ints<B: Backend>(t: Tensor<B, 1, Int>) -> Result<Vec<i64>, TrainingError> {
    t.into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| TrainingError::TensorData(format!("{e:?}")))
}

/// Running example-weighted mean.
#[derive(Debug, Default, Clone, Copy)]
struct WeightedMean {
    sum:   f64,
    count: usize,
}

impl WeightedMean {
    fn add(&mut self, batch_mean: f64, n: usize) {
        self.sum   += batch_mean * n as f64;
        self.count += n;
    }

    fn value(&self, name: &'static str) -> Result<f64, TrainingError> {
        if self.count == 0 {
            return Err(TrainingError::EmptyMetric(name));
        }
        Ok(self.sum / self.count as f64)
    }
}

// ─── Pose metrics ─────────────────────────────────────────────────────────────
#[derive(Debug, Default)]
pub struct PoseLossMetric {
    mean: WeightedMean,
}

impl<B: Backend> Metric<B> for PoseLossMetric {
    fn name(&self) -> &'static str {
        "Loss (pose)"
    }

    fn reset(&mut self) {
        self.mean = WeightedMean::default();
    }

    fn update(&mut self, output: &StepOutput<B>) -> Result<(), TrainingError> {
        let n = output.labels.dims()[0];
        let loss = PoseLoss.forward(output.pose_log.clone(), output.labels.clone());
        self.mean.add(loss.into_scalar().elem::<f64>(), n);
        Ok(())
    }

    fn compute(&self) -> Result<f64, TrainingError> {
        self.mean.value("Loss (pose)")
    }
}

#[derive(Debug, Default)]
pub struct Accuracy {
    correct: usize,
    total:   usize,
}

impl<B: Backend> Metric<B> for Accuracy {
    fn name(&self) -> &'static str {
        "Accuracy"
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn update(&mut self, output: &StepOutput<B>) -> Result<(), TrainingError> {
        let predicted = ints(output.pose_log.clone().argmax(1).flatten::<1>(0, 1))?;
        let labels = ints(output.labels.clone())?;
        self.correct += predicted.iter().zip(&labels).filter(|(p, l)| p == l).count();
        self.total   += labels.len();
        Ok(())
    }

    fn compute(&self) -> Result<f64, TrainingError> {
        if self.total == 0 {
            return Err(TrainingError::EmptyMetric("Accuracy"));
        }
        Ok(self.correct as f64 / self.total as f64)
    }
}

/// Mean per-class recall over the classes present in the data.
#[derive(Debug, Default)]
pub struct BalancedAccuracy {
    /// [class] → (correct, seen)
    recall: [(usize, usize); 2],
}

impl<B: Backend> Metric<B> for BalancedAccuracy {
    fn name(&self) -> &'static str {
        "Balanced accuracy"
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn update(&mut self, output: &StepOutput<B>) -> Result<(), TrainingError> {
        let predicted = ints(output.pose_log.clone().argmax(1).flatten::<1>(0, 1))?;
        let labels = ints(output.labels.clone())?;
        for (p, l) in predicted.iter().zip(&labels) {
            let class = usize::from(*l == 1);
            self.recall[class].1 += 1;
            if p == l {
                self.recall[class].0 += 1;
            }
        }
        Ok(())
    }

    fn compute(&self) -> Result<f64, TrainingError> {
        let recalls: Vec<f64> = self
            .recall
            .iter()
            .filter(|(_, seen)| *seen > 0)
            .map(|(correct, seen)| *correct as f64 / *seen as f64)
            .collect();
        if recalls.is_empty() {
            return Err(TrainingError::EmptyMetric("Balanced accuracy"));
        }
        Ok(recalls.iter().sum::<f64>() / recalls.len() as f64)
    }
}

/// Area under the ROC curve of P(class 1).
#[derive(Debug, Default)]
pub struct RocAuc {
    scores: Vec<f64>,
    labels: Vec<bool>,
}

impl<B: Backend> Metric<B> for RocAuc {
    fn name(&self) -> &'static str {
        "ROC AUC"
    }

    fn reset(&mut self) {
        self.scores.clear();
        self.labels.clear();
    }

    fn update(&mut self, output: &StepOutput<B>) -> Result<(), TrainingError> {
        let [n, _] = output.pose_log.dims();
        let positive = output.pose_log.clone().slice([0..n, 1..2]).exp().reshape([n]);
        self.scores.extend(floats(positive)?.into_iter().map(f64::from));
        self.labels.extend(ints(output.labels.clone())?.into_iter().map(|l| l == 1));
        Ok(())
    }

    fn compute(&self) -> Result<f64, TrainingError> {
        roc_auc(&self.scores, &self.labels)
    }
}

/// Rank-sum (Mann-Whitney) AUC with tied scores sharing their mean rank.
fn roc_auc(scores: &[f64], labels: &[bool]) -> Result<f64, TrainingError> {
    if scores.is_empty() {
        return Err(TrainingError::EmptyMetric("ROC AUC"));
    }
    let positives = labels.iter().filter(|&&l| l).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(TrainingError::SingleClass);
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // Ranks are 1-based; ties get the mean of ranks i+1..=j+1
        let mean_rank = (i + j + 2) as f64 / 2.0;
        rank_sum += mean_rank * order[i..=j].iter().filter(|&&k| labels[k]).count() as f64;
        i = j + 1;
    }

    let p = positives as f64;
    Ok((rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64))
}

// ─── Affinity metrics ─────────────────────────────────────────────────────────
#[derive(Debug)]
pub struct AffinityLossMetric {
    loss: AffinityLoss,
    mean: WeightedMean,
}

impl AffinityLossMetric {
    pub fn new(loss: AffinityLoss) -> Self {
        Self { loss, mean: WeightedMean::default() }
    }
}

impl<B: Backend> Metric<B> for AffinityLossMetric {
    fn name(&self) -> &'static str {
        "Loss (affinity)"
    }

    fn reset(&mut self) {
        self.mean = WeightedMean::default();
    }

    fn update(&mut self, output: &StepOutput<B>) -> Result<(), TrainingError> {
        let fields = output.affinity_fields()?;
        let n = fields.affinities.dims()[0];
        let loss = self.loss.forward(fields.affinities_pred.clone(), fields.affinities.clone());
        self.mean.add(loss.into_scalar().elem::<f64>(), n);
        Ok(())
    }

    fn compute(&self) -> Result<f64, TrainingError> {
        self.mean.value("Loss (affinity)")
    }
}

/// Predictions and |targets| collected over a pass.
#[derive(Debug, Default)]
struct AffinityPairs {
    pred:   Vec<f64>,
    target: Vec<f64>,
}

impl AffinityPairs {
    fn extend<B: Backend>(&mut self, output: &StepOutput<B>) -> Result<(), TrainingError> {
        let fields = output.affinity_fields()?;
        self.pred.extend(floats(fields.affinities_pred.clone())?.into_iter().map(f64::from));
        self.target.extend(
            floats(fields.affinities.clone())?
                .into_iter()
                .map(|y| f64::from(y).abs()),
        );
        Ok(())
    }

    fn clear(&mut self) {
        self.pred.clear();
        self.target.clear();
    }
}

#[derive(Debug, Default)]
pub struct AffinityRmse {
    pairs: AffinityPairs,
}

impl<B: Backend> Metric<B> for AffinityRmse {
    fn name(&self) -> &'static str {
        "RMSE (affinity)"
    }

    fn reset(&mut self) {
        self.pairs.clear();
    }

    fn update(&mut self, output: &StepOutput<B>) -> Result<(), TrainingError> {
        self.pairs.extend(output)
    }

    fn compute(&self) -> Result<f64, TrainingError> {
        let n = self.pairs.pred.len();
        if n == 0 {
            return Err(TrainingError::EmptyMetric("RMSE (affinity)"));
        }
        let sse: f64 = self
            .pairs
            .pred
            .iter()
            .zip(&self.pairs.target)
            .map(|(p, y)| (p - y).powi(2))
            .sum();
        Ok((sse / n as f64).sqrt())
    }
}

#[derive(Debug, Default)]
pub struct AffinityPearson {
    pairs: AffinityPairs,
}

impl<B: Backend> Metric<B> for AffinityPearson {
    fn name(&self) -> &'static str {
        "Pearson (affinity)"
    }

    fn reset(&mut self) {
        self.pairs.clear();
    }

    fn update(&mut self, output: &StepOutput<B>) -> Result<(), TrainingError> {
        self.pairs.extend(output)
    }

    fn compute(&self) -> Result<f64, TrainingError> {
        let (x, y) = (&self.pairs.pred, &self.pairs.target);
        if x.is_empty() {
            return Err(TrainingError::EmptyMetric("Pearson (affinity)"));
        }
        let n = x.len() as f64;
        let mx = x.iter().sum::<f64>() / n;
        let my = y.iter().sum::<f64>() / n;

        let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
        for (a, b) in x.iter().zip(y) {
            sxy += (a - mx) * (b - my);
            sxx += (a - mx).powi(2);
            syy += (b - my).powi(2);
        }

        if sxx == 0.0 || syy == 0.0 {
            tracing::warn!("Pearson correlation undefined for constant predictions or targets");
            return Ok(f64::NAN);
        }
        Ok(sxy / (sxx.sqrt() * syy.sqrt()))
    }
}

// ─── Registry ─────────────────────────────────────────────────────────────────
/// Ordered set of metrics attached to an evaluator.
pub struct MetricRegistry<B: Backend> {
    metrics: Vec<Box<dyn Metric<B>>>,
}

impl<B: Backend> MetricRegistry<B> {
    pub fn new() -> Self {
        Self { metrics: Vec::new() }
    }

    pub fn with(mut self, metric: impl Metric<B> + 'static) -> Self {
        self.metrics.push(Box::new(metric));
        self
    }

    /// Standard metric set for a task.
    pub fn for_task(task: TaskMode, roc_auc: bool, affinity_loss: AffinityLoss) -> Self {
        let mut registry = Self::new()
            .with(PoseLossMetric::default())
            .with(Accuracy::default())
            .with(BalancedAccuracy::default());
        if roc_auc {
            registry = registry.with(RocAuc::default());
        }
        if task.has_affinity() {
            registry = registry
                .with(AffinityLossMetric::new(affinity_loss))
                .with(AffinityRmse::default())
                .with(AffinityPearson::default());
        }
        registry
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.metrics.iter().map(|m| m.name()).collect()
    }
}

impl<B: Backend> Default for MetricRegistry<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> Handler<EvalStrategy<B>> for MetricRegistry<B> {
    fn handle(
        &mut self,
        event: Event,
        state: &mut EngineState<StepOutput<B>>,
        _step: &mut EvalStrategy<B>,
    ) -> Result<()> {
        match event {
            Event::Started => self.metrics.iter_mut().for_each(|m| m.reset()),
            Event::IterationCompleted => {
                let output = state.output.as_ref().ok_or(TrainingError::MissingField("pose_log"))?;
                for metric in self.metrics.iter_mut() {
                    metric.update(output)?;
                }
            }
            Event::Completed => {
                for metric in &self.metrics {
                    state.metrics.insert(metric.name(), metric.compute()?);
                }
            }
            Event::EpochStarted | Event::EpochCompleted => {}
        }
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{loss::AffinityLossConfig, step::AffinityOutput};
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    /// Records from (P(good), label) pairs and optional (pred, target) affinities.
    fn output(probs: &[(f32, i64)], affinity: Option<&[(f32, f32)]>) -> StepOutput<TestBackend> {
        let device = Default::default();
        let n = probs.len();
        let log: Vec<f32> = probs.iter().flat_map(|(p, _)| [(1.0 - p).ln(), p.ln()]).collect();
        let labels: Vec<i64> = probs.iter().map(|(_, l)| *l).collect();

        StepOutput {
            pose_log: Tensor::<TestBackend, 1>::from_floats(log.as_slice(), &device).reshape([n, 2]),
            labels:   Tensor::from_ints(labels.as_slice(), &device),
            affinity: affinity.map(|pairs| {
                let pred: Vec<f32> = pairs.iter().map(|(p, _)| *p).collect();
                let target: Vec<f32> = pairs.iter().map(|(_, y)| *y).collect();
                AffinityOutput {
                    affinities_pred: Tensor::from_floats(pred.as_slice(), &device),
                    affinities:      Tensor::from_floats(target.as_slice(), &device),
                }
            }),
        }
    }

    fn run(metric: &mut dyn Metric<TestBackend>, outputs: &[StepOutput<TestBackend>]) -> Result<f64, TrainingError> {
        metric.reset();
        for o in outputs {
            metric.update(o)?;
        }
        metric.compute()
    }

    #[test]
    fn test_accuracy_and_balanced_accuracy() {
        // 3 good poses (2 right), 1 bad pose (right)
        let out = output(&[(0.9, 1), (0.8, 1), (0.3, 1), (0.2, 0)], None);

        let acc = run(&mut Accuracy::default(), &[out.clone()]).unwrap();
        let bal = run(&mut BalancedAccuracy::default(), &[out]).unwrap();
        assert!((acc - 0.75).abs() < 1e-12);
        assert!((bal - (2.0 / 3.0 + 1.0) / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_pose_loss_is_example_weighted() {
        let a = output(&[(0.5, 1)], None);
        let b = output(&[(0.9, 1), (0.9, 1), (0.9, 1)], None);
        let value = run(&mut PoseLossMetric::default(), &[a, b]).unwrap();

        let expected = (-(0.5f64.ln()) - 3.0 * 0.9f64.ln()) / 4.0;
        assert!((value - expected).abs() < 1e-5);
    }

    #[test]
    fn test_roc_auc_with_ties() {
        assert_eq!(roc_auc(&[0.1, 0.4, 0.35, 0.8], &[false, false, true, true]).unwrap(), 0.75);
        assert_eq!(roc_auc(&[0.5, 0.5], &[false, true]).unwrap(), 0.5);
    }

    #[test]
    fn test_roc_auc_single_class_is_an_error() {
        let out = output(&[(0.9, 1), (0.7, 1)], None);
        let err = run(&mut RocAuc::default(), &[out]).unwrap_err();
        assert!(matches!(err, TrainingError::SingleClass));
    }

    #[test]
    fn test_affinity_metrics_use_absolute_targets() {
        let out = output(&[(0.9, 1), (0.1, 0), (0.9, 1)], Some(&[(5.0, 5.0), (3.0, -3.0), (7.0, 7.0)]));

        let rmse = run(&mut AffinityRmse::default(), &[out.clone()]).unwrap();
        let r = run(&mut AffinityPearson::default(), &[out]).unwrap();
        assert!(rmse.abs() < 1e-6);
        assert!((r - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_pearson_is_nan_for_constant_predictions() {
        let out = output(&[(0.9, 1), (0.9, 1)], Some(&[(2.0, 5.0), (2.0, 7.0)]));
        assert!(run(&mut AffinityPearson::default(), &[out]).unwrap().is_nan());
    }

    #[test]
    fn test_affinity_metric_requires_affinity_fields() {
        let out = output(&[(0.9, 1)], None);
        let err = run(&mut AffinityRmse::default(), &[out]).unwrap_err();
        assert!(matches!(err, TrainingError::MissingField(_)));
    }

    #[test]
    fn test_empty_pass_is_an_error() {
        assert!(matches!(
            run(&mut Accuracy::default(), &[]).unwrap_err(),
            TrainingError::EmptyMetric("Accuracy")
        ));
    }

    #[test]
    fn test_registry_names_per_task() {
        let loss = AffinityLossConfig::new().init();
        let pose = MetricRegistry::<TestBackend>::for_task(TaskMode::PoseOnly, true, loss.clone());
        assert_eq!(pose.names(), vec!["Loss (pose)", "Accuracy", "Balanced accuracy", "ROC AUC"]);

        let dual = MetricRegistry::<TestBackend>::for_task(TaskMode::PoseAndAffinity, false, loss);
        assert_eq!(
            dual.names(),
            vec![
                "Loss (pose)",
                "Accuracy",
                "Balanced accuracy",
                "Loss (affinity)",
                "RMSE (affinity)",
                "Pearson (affinity)",
            ]
        );
    }
}
