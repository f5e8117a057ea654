// ============================================================
// Layer 2 — Evaluate Use Case
// ============================================================
// Scores an examples file with a trained checkpoint:
//
//   1. Read run_config.json from the training output directory
//   2. Pick the requested (or latest) checkpoint_<epoch>
//   3. Rebuild the model and restore its weights
//   4. One evaluator pass over the examples → metrics
//
// The column layout, data root and grid geometry all come from
// the saved run configuration, so the file must be in the same
// format as the one the model was trained on.

use std::path::PathBuf;

use anyhow::Result;
use burn::{
    backend::{wgpu::WgpuDevice, NdArray, Wgpu},
    prelude::*,
};

use crate::data::{
    dataset::GridDataset,
    loader::{GridLoader, LoaderConfig},
    types_file::read_examples_file,
};
use crate::engine::Metrics;
use crate::infra::checkpoint::{find_checkpoint, load_config};
use crate::ml::{evaluator::Evaluator, metrics::MetricRegistry, step::EvalModel, DeviceKind};

pub struct EvaluateRequest {
    pub run_dir:     PathBuf,
    pub examples:    PathBuf,
    /// `None` picks the latest checkpoint
    pub epoch:       Option<usize>,
    pub batch_size:  usize,
    pub num_workers: usize,
    pub device:      DeviceKind,
}

pub struct EvaluateUseCase {
    request: EvaluateRequest,
}

impl EvaluateUseCase {
    pub fn new(request: EvaluateRequest) -> Self {
        Self { request }
    }

    /// Returns the evaluated epoch and its metrics.
    pub fn execute(&self) -> Result<(usize, Metrics)> {
        match self.request.device {
            DeviceKind::Cpu => self.evaluate_on::<NdArray>(Default::default()),
            DeviceKind::Gpu => self.evaluate_on::<Wgpu>(WgpuDevice::default()),
        }
    }

    fn evaluate_on<B: Backend>(&self, device: B::Device) -> Result<(usize, Metrics)> {
        let req = &self.request;
        let cfg = load_config(&req.run_dir)?;
        let (epoch, ckpt_dir) = find_checkpoint(&req.run_dir, req.epoch)?;
        tracing::info!("Evaluating checkpoint '{}'", ckpt_dir.display());

        let task  = cfg.task_mode();
        let model = EvalModel::<B>::load(task, &cfg.model_config(), &ckpt_dir.join("model"), &device)?;

        let records = read_examples_file(&req.examples, cfg.layout(), &cfg.data_root)?;
        let dataset = GridDataset::open(records, cfg.grid_dims())?;
        let loader  = GridLoader::<B>::new(
            dataset,
            device,
            LoaderConfig { batch_size: req.batch_size, shuffle: None, num_workers: req.num_workers },
        );
        tracing::info!("Scoring {} examples in {} batches", loader.len(), loader.num_batches());

        let registry = MetricRegistry::for_task(task, cfg.roc_auc, cfg.affinity_loss().init());
        let mut evaluator = Evaluator::new(model.clone(), registry);
        let metrics = evaluator.run(model, &loader)?;

        Ok((epoch, metrics))
    }
}
