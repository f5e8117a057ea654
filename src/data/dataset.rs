// ============================================================
// Layer 4 — Grid Dataset
// ============================================================
// Implements Burn's Dataset trait over precomputed grid files.
//
// Each grid file holds `channels × points³` little-endian f32
// values, channel-major. Files are size-checked once when the
// dataset is opened, then read lazily whenever the DataLoader
// asks for an item, so memory use stays at one batch. A file
// that disappears or shrinks after opening yields an error item.

use anyhow::{bail, Context, Result};
use burn::data::dataset::Dataset;
use std::{fs, path::Path};

use crate::data::types_file::ExampleRecord;
use crate::domain::{example::PoseExample, grid::GridDims};

#[derive(Clone)]
pub struct GridDataset {
    records: Vec<ExampleRecord>,
    dims:    GridDims,
}

impl GridDataset {
    /// Open a dataset, checking that every grid file exists and
    /// has exactly the size implied by `dims`.
    pub fn open(records: Vec<ExampleRecord>, dims: GridDims) -> Result<Self> {
        let expected = (dims.values() * std::mem::size_of::<f32>()) as u64;

        for record in &records {
            let meta = fs::metadata(&record.grid_path).with_context(|| {
                format!("Cannot stat grid file '{}'", record.grid_path.display())
            })?;
            if meta.len() != expected {
                bail!(
                    "grid file '{}' has {} bytes, expected {} for a {} grid",
                    record.grid_path.display(),
                    meta.len(),
                    expected,
                    dims,
                );
            }
        }

        tracing::info!("Opened {} gridded examples ({})", records.len(), dims);
        Ok(Self { records, dims })
    }

    pub fn dims(&self) -> GridDims {
        self.dims
    }
}

/// One dataset item. A grid that cannot be read travels down the
/// pipeline as an error so the loader never ends an epoch early.
pub type GridItem = Result<PoseExample, String>;

impl Dataset<GridItem> for GridDataset {
    fn get(&self, index: usize) -> Option<GridItem> {
        let record = self.records.get(index)?;
        let item = read_grid(&record.grid_path)
            .map(|grid| PoseExample::new(grid, record.label, record.affinity))
            .map_err(|e| format!("{e:#}"));
        Some(item)
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}

/// Read a raw little-endian f32 grid file.
pub fn read_grid(path: &Path) -> Result<Vec<f32>> {
    let bytes = fs::read(path)
        .with_context(|| format!("Cannot read grid file '{}'", path.display()))?;

    if bytes.len() % 4 != 0 {
        bail!("grid file '{}' is not a whole number of f32 values", path.display());
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Write a raw little-endian f32 grid file (the format `read_grid` reads).
#[cfg(test)]
pub fn write_grid(path: &Path, values: &[f32]) -> Result<()> {
    let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
    fs::write(path, bytes)
        .with_context(|| format!("Cannot write grid file '{}'", path.display()))
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &Path, label: i32) -> ExampleRecord {
        ExampleRecord { label, affinity: Some(-3.0), grid_path: path.to_path_buf() }
    }

    #[test]
    fn test_reads_grid_values_back() {
        let dir  = tempfile::tempdir().unwrap();
        let dims = GridDims::new(2, 2);
        let path = dir.path().join("g.bin");
        let values: Vec<f32> = (0..dims.values()).map(|v| v as f32 * 0.5).collect();
        write_grid(&path, &values).unwrap();

        let dataset = GridDataset::open(vec![record(&path, 1)], dims).unwrap();
        let example = dataset.get(0).unwrap().unwrap();

        assert_eq!(dataset.len(), 1);
        assert_eq!(example.grid, values);
        assert_eq!(example.label, 1);
        assert_eq!(example.affinity, Some(-3.0));
        assert!(dataset.get(1).is_none());
    }

    #[test]
    fn test_open_rejects_wrong_grid_size() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.bin");
        write_grid(&path, &[1.0; 10]).unwrap();

        let err = GridDataset::open(vec![record(&path, 0)], GridDims::new(1, 2))
            .err()
            .unwrap();
        assert!(err.to_string().contains("expected 32"));
    }

    #[test]
    fn test_open_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.bin");
        assert!(GridDataset::open(vec![record(&missing, 0)], GridDims::new(1, 2)).is_err());
    }

    #[test]
    fn test_unreadable_grid_is_an_error_item() {
        let dir  = tempfile::tempdir().unwrap();
        let dims = GridDims::new(1, 2);
        let path = dir.path().join("g.bin");
        write_grid(&path, &vec![0.0; dims.values()]).unwrap();

        let dataset = GridDataset::open(vec![record(&path, 0)], dims).unwrap();
        std::fs::remove_file(&path).unwrap();

        let err = dataset.get(0).unwrap().unwrap_err();
        assert!(err.contains("Cannot read grid file"));
        assert_eq!(dataset.len(), 1);
    }
}
