// ============================================================
// Layer 4 — Grid Batcher
// ============================================================
// Implements Burn's Batcher trait to stack PoseExamples into
// device-resident tensors.
//
//   Input:  Vec of N PoseExamples, each with C·P³ grid values
//   Output: GridBatch with
//             grids      [N, C, P, P, P]
//             labels     [N]
//             affinities [N]   (dual-task runs only)
//
// All grids already have the same shape, so batching is a flat
// concatenation followed by a reshape. One unreadable item fails
// the whole batch.

use burn::{data::dataloader::batcher::Batcher, prelude::*};

use crate::data::dataset::GridItem;
use crate::domain::grid::GridDims;

// ─── GridBatch ────────────────────────────────────────────────────────────────
/// One batch of gridded poses.
#[derive(Debug, Clone)]
pub struct GridBatch<B: Backend> {
    /// Grid tensor — shape: [batch, channels, points, points, points]
    pub grids: Tensor<B, 5>,

    /// Pose classes — shape: [batch]
    pub labels: Tensor<B, 1, Int>,

    /// Affinity targets — shape: [batch]; `None` for pose-only data
    pub affinities: Option<Tensor<B, 1>>,
}

// ─── GridBatcher ──────────────────────────────────────────────────────────────
/// Holds the target device so tensors land where the model lives.
#[derive(Clone, Debug)]
pub struct GridBatcher<B: Backend> {
    device: B::Device,
    dims:   GridDims,
}

impl<B: Backend> GridBatcher<B> {
    pub fn new(device: B::Device, dims: GridDims) -> Self {
        Self { device, dims }
    }
}

/// Batcher output; the error is the first unreadable item's message.
pub type BatchResult<B> = Result<GridBatch<B>, String>;

impl<B: Backend> Batcher<GridItem, BatchResult<B>> for GridBatcher<B> {
    fn batch(&self, items: Vec<GridItem>) -> BatchResult<B> {
        let items = items.into_iter().collect::<Result<Vec<_>, _>>()?;
        let batch_size = items.len();
        let [channels, points, _, _] = self.dims.shape();

        let grid_flat: Vec<f32> = items
            .iter()
            .flat_map(|e| e.grid.iter().copied())
            .collect();

        let labels: Vec<i32> = items.iter().map(|e| e.label).collect();

        // Either every example has an affinity or the run is pose-only
        let affinities: Option<Vec<f32>> = items.iter().map(|e| e.affinity).collect();

        let grids = Tensor::<B, 1>::from_floats(grid_flat.as_slice(), &self.device)
            .reshape([batch_size, channels, points, points, points]);

        let labels = Tensor::<B, 1, Int>::from_ints(labels.as_slice(), &self.device);

        let affinities = affinities
            .map(|a| Tensor::<B, 1>::from_floats(a.as_slice(), &self.device));

        Ok(GridBatch { grids, labels, affinities })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::example::PoseExample;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn example(dims: GridDims, fill: f32, label: i32, affinity: Option<f32>) -> GridItem {
        Ok(PoseExample::new(vec![fill; dims.values()], label, affinity))
    }

    #[test]
    fn test_batch_shapes() {
        let dims    = GridDims::new(2, 3);
        let batcher = GridBatcher::<TestBackend>::new(Default::default(), dims);
        let batch   = batcher.batch(vec![
            example(dims, 1.0, 1, None),
            example(dims, 0.0, 0, None),
        ]).unwrap();

        assert_eq!(batch.grids.dims(), [2, 2, 3, 3, 3]);
        assert_eq!(batch.labels.dims(), [2]);
        assert!(batch.affinities.is_none());
    }

    #[test]
    fn test_affinities_are_batched_when_present() {
        let dims    = GridDims::new(1, 2);
        let batcher = GridBatcher::<TestBackend>::new(Default::default(), dims);
        let batch   = batcher.batch(vec![
            example(dims, 1.0, 1, Some(-7.5)),
            example(dims, 0.0, 0, Some(4.0)),
        ]).unwrap();

        let affinities = batch.affinities.unwrap().into_data().to_vec::<f32>().unwrap();
        assert_eq!(affinities, vec![-7.5, 4.0]);
    }

    #[test]
    fn test_grid_values_keep_example_order() {
        let dims    = GridDims::new(1, 2);
        let batcher = GridBatcher::<TestBackend>::new(Default::default(), dims);
        let batch   = batcher.batch(vec![
            example(dims, 2.0, 1, None),
            example(dims, 3.0, 0, None),
        ]).unwrap();

        let first: f32 = batch.grids.clone().slice([0..1, 0..1, 0..2, 0..2, 0..2])
            .mean().into_scalar();
        let second: f32 = batch.grids.slice([1..2, 0..1, 0..2, 0..2, 0..2])
            .mean().into_scalar();
        assert_eq!(first, 2.0);
        assert_eq!(second, 3.0);
    }

    #[test]
    fn test_unreadable_item_fails_the_batch() {
        let dims    = GridDims::new(1, 2);
        let batcher = GridBatcher::<TestBackend>::new(Default::default(), dims);
        let result  = batcher.batch(vec![
            example(dims, 1.0, 1, None),
            Err("Cannot read grid file 'g1.bin'".to_string()),
        ]);

        assert_eq!(result.unwrap_err(), "Cannot read grid file 'g1.bin'");
    }
}
