// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves model and optimizer snapshots using Burn's
// CompactRecorder, keeping only the most recent few.
//
// Layout of an output directory:
//   out_dir/
//     run_config.json          ← resolved run configuration
//     checkpoint_5/
//       model.mpk.gz           ← model parameters
//       optimizer.mpk.gz       ← optimizer state (momentum buffers)
//     checkpoint_10/
//       ...
//
// A run refuses to start in a directory that already holds
// checkpoints, since old snapshots would otherwise mix with
// (and be evicted by) the new run's.
//
// The evaluate command reads the directory back: run_config.json
// rebuilds the architecture, then the chosen checkpoint restores
// the weights.

use anyhow::{Context, Result};
use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
};

use crate::application::train_use_case::RunConfig;
use crate::domain::error::CheckpointError;

const PREFIX: &str = "checkpoint_";
const CONFIG_FILE: &str = "run_config.json";

/// Something that can write a full snapshot of itself into a directory.
pub trait Checkpointable {
    fn write_checkpoint(&self, dir: &Path) -> Result<()>;
}

pub struct CheckpointManager {
    dir:    PathBuf,
    retain: usize,
    saved:  VecDeque<PathBuf>,
}

impl CheckpointManager {
    /// Create the output directory if needed and check that it
    /// holds no checkpoints yet.
    pub fn new(dir: impl Into<PathBuf>, retain: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create output directory '{}'", dir.display()))?;

        let found: Vec<String> = list_checkpoints(&dir)?
            .into_iter()
            .map(|(_, path)| path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default())
            .collect();
        if !found.is_empty() {
            return Err(CheckpointError::Existing { dir, found }.into());
        }

        Ok(Self { dir, retain: retain.max(1), saved: VecDeque::new() })
    }

    /// Write a snapshot tagged with `epoch`, evicting the oldest
    /// snapshots beyond the retention count.
    pub fn save<C: Checkpointable>(&mut self, epoch: usize, item: &C) -> Result<PathBuf> {
        let path = self.dir.join(format!("{PREFIX}{epoch}"));
        fs::create_dir_all(&path)
            .with_context(|| format!("Cannot create checkpoint directory '{}'", path.display()))?;

        item.write_checkpoint(&path)
            .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;
        self.saved.push_back(path.clone());
        tracing::info!("Saved checkpoint for epoch {} to '{}'", epoch, path.display());

        while self.saved.len() > self.retain {
            if let Some(old) = self.saved.pop_front() {
                fs::remove_dir_all(&old)
                    .with_context(|| format!("Cannot remove old checkpoint '{}'", old.display()))?;
                tracing::debug!("Evicted checkpoint '{}'", old.display());
            }
        }

        Ok(path)
    }

    /// Save the run configuration as JSON next to the checkpoints.
    pub fn save_config(&self, cfg: &RunConfig) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(cfg)?;
        fs::write(&path, json)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))?;

        tracing::debug!("Saved run config to '{}'", path.display());
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Read the run configuration saved by a training run.
pub fn load_config(dir: &Path) -> Result<RunConfig> {
    let path = dir.join(CONFIG_FILE);
    let json = fs::read_to_string(&path).with_context(|| {
        format!(
            "Cannot read config from '{}'. Make sure you have run 'train' into this directory.",
            path.display()
        )
    })?;
    serde_json::from_str(&json).with_context(|| format!("Invalid run config '{}'", path.display()))
}

/// Directory of the checkpoint for `epoch`, or of the latest one.
pub fn find_checkpoint(dir: &Path, epoch: Option<usize>) -> Result<(usize, PathBuf)> {
    let checkpoints = list_checkpoints(dir)?;
    let found = match epoch {
        Some(e) => checkpoints.into_iter().find(|(epoch, _)| *epoch == e),
        None    => checkpoints.into_iter().max_by_key(|(epoch, _)| *epoch),
    };
    found.ok_or_else(|| CheckpointError::NotFound(dir.to_path_buf()).into())
}

/// All `checkpoint_<epoch>` entries in `dir`, in no particular order.
fn list_checkpoints(dir: &Path) -> Result<Vec<(usize, PathBuf)>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Cannot read directory '{}'", dir.display()))? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(suffix) = name.to_str().and_then(|n| n.strip_prefix(PREFIX)) else {
            continue;
        };
        // Unparsable suffixes still count as foreign checkpoints
        let epoch = suffix.parse().unwrap_or(0);
        found.push((epoch, entry.path()));
    }
    Ok(found)
}
