// ============================================================
// Layer 3 — Grid Geometry Descriptor
// ============================================================
// Describes the shape of one gridded example as seen by the
// model: a cube of `points` samples per side, one value per
// atom-type channel.
//
//   dimension = 23.5 Å, resolution = 0.5 Å
//       → points = 23.5 / 0.5 + 1 = 48 samples per side
//
// The descriptor is produced by the data loader and sizes the
// model's input layer. Train and test loaders of the same run
// must agree on it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Per-example grid shape: `[channels, points, points, points]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridDims {
    /// Number of atom-type channels (receptor + ligand types)
    pub channels: usize,

    /// Number of grid points along each axis of the cube
    pub points: usize,
}

impl GridDims {
    pub fn new(channels: usize, points: usize) -> Self {
        Self { channels, points }
    }

    /// Build the descriptor from the physical grid geometry.
    ///
    /// `dimension` is the cube side length and `resolution` the spacing
    /// between points, both in Ångström.
    pub fn from_geometry(channels: usize, dimension: f64, resolution: f64) -> Self {
        let points = (dimension / resolution).round() as usize + 1;
        Self { channels, points }
    }

    /// Samples per channel
    pub fn voxels(&self) -> usize {
        self.points * self.points * self.points
    }

    /// Total number of `f32` values in one example
    pub fn values(&self) -> usize {
        self.channels * self.voxels()
    }

    /// Tensor shape of one example, without the batch dimension
    pub fn shape(&self) -> [usize; 4] {
        [self.channels, self.points, self.points, self.points]
    }
}

impl fmt::Display for GridDims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}x{}x{}",
            self.channels, self.points, self.points, self.points
        )
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_geometry_gives_48_points() {
        let dims = GridDims::from_geometry(28, 23.5, 0.5);
        assert_eq!(dims.points, 48);
        assert_eq!(dims.shape(), [28, 48, 48, 48]);
    }

    #[test]
    fn test_values_counts_every_channel() {
        let dims = GridDims::new(2, 4);
        assert_eq!(dims.voxels(), 64);
        assert_eq!(dims.values(), 128);
    }

    #[test]
    fn test_display() {
        assert_eq!(GridDims::new(3, 8).to_string(), "3x8x8x8");
    }
}
