// ============================================================
// Layer 4 — Grid Loader
// ============================================================
// Wraps Burn's DataLoader so the engines see a restartable,
// finite sequence of device-resident batches per epoch, plus
// the grid shape every batch carries.
//
//   GridDataset ──► GridBatcher ──► DataLoaderBuilder ──► GridLoader
//
// Calling `iter()` on the inner DataLoader starts a fresh pass,
// so the same loader serves every epoch (and every evaluation
// of the training set).

use std::sync::Arc;

use anyhow::Result;
use burn::{
    data::{dataloader::DataLoader, dataloader::DataLoaderBuilder, dataset::Dataset},
    prelude::*,
};

use crate::data::{
    batcher::{BatchResult, GridBatch, GridBatcher},
    dataset::GridDataset,
};
use crate::domain::grid::GridDims;
use crate::engine::DataSource;

/// Batch size, shuffling and worker settings for one loader.
#[derive(Debug, Clone, Copy)]
pub struct LoaderConfig {
    pub batch_size:  usize,
    /// Shuffle seed; `None` keeps file order.
    pub shuffle:     Option<u64>,
    pub num_workers: usize,
}

#[derive(Clone)]
pub struct GridLoader<B: Backend> {
    inner:    Arc<dyn DataLoader<BatchResult<B>>>,
    dims:     GridDims,
    examples: usize,
    batches:  usize,
}

impl<B: Backend> GridLoader<B> {
    pub fn new(dataset: GridDataset, device: B::Device, cfg: LoaderConfig) -> Self {
        let dims     = dataset.dims();
        let examples = dataset.len();
        let batches  = examples.div_ceil(cfg.batch_size.max(1));

        let batcher = GridBatcher::<B>::new(device, dims);
        let mut builder = DataLoaderBuilder::new(batcher).batch_size(cfg.batch_size);
        // zero workers loads on the calling thread
        if cfg.num_workers > 0 {
            builder = builder.num_workers(cfg.num_workers);
        }
        if let Some(seed) = cfg.shuffle {
            builder = builder.shuffle(seed);
        }

        Self { inner: builder.build(dataset), dims, examples, batches }
    }

    /// Per-example grid shape.
    pub fn dims(&self) -> GridDims {
        self.dims
    }

    /// Number of examples.
    pub fn len(&self) -> usize {
        self.examples
    }

    pub fn num_batches(&self) -> usize {
        self.batches
    }
}

impl<B: Backend> DataSource<GridBatch<B>> for GridLoader<B> {
    fn batches(&self) -> Box<dyn Iterator<Item = Result<GridBatch<B>>> + '_> {
        Box::new(self.inner.iter().map(|batch| batch.map_err(anyhow::Error::msg)))
    }
}
