// ============================================================
// Layer 6 — Run Log
// ============================================================
// Operator-facing record of a training run, written to
// out_dir/training.log and mirrored to stdout unless silenced.
//
// Unlike tracing output, this file has a fixed, human-readable
// format meant to be kept next to the metrics CSVs:
//
//   --- POSEGRID TRAINING ---
//   base_lr: 0.01
//   ...
//   >>> Train Results - Epoch[5] <<<
//       Epoch time: 12.31 s
//       Elapsed time: 61.02 s
//       Loss (pose): 0.52311
//       Accuracy: 0.74219
//       Learning rate: 0.01

use anyhow::{Context, Result};
use serde::Serialize;
use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::engine::Metrics;

const TITLE: &str = "--- POSEGRID TRAINING ---";

#[derive(Clone)]
pub struct RunLog {
    file:   Arc<Mutex<File>>,
    silent: bool,
}

impl RunLog {
    /// Create `path`, discarding the log of any earlier run.
    pub fn open(path: &Path, silent: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Cannot open run log '{}'", path.display()))?;
        Ok(Self { file: Arc::new(Mutex::new(file)), silent })
    }

    pub fn line(&self, text: &str) -> Result<()> {
        if !self.silent {
            println!("{text}");
        }
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("run log lock poisoned"))?;
        writeln!(file, "{text}").context("Cannot write to run log")
    }

    /// Write the title followed by one `key: value` line per field of `cfg`.
    pub fn echo_config<T: Serialize>(&self, cfg: &T) -> Result<()> {
        self.line(TITLE)?;
        let value = serde_json::to_value(cfg)?;
        if let serde_json::Value::Object(fields) = value {
            for (key, v) in fields {
                let shown = match v {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Null      => "none".to_string(),
                    other                        => other.to_string(),
                };
                self.line(&format!("{key}: {shown}"))?;
            }
        }
        Ok(())
    }

    /// One evaluation summary; `timing` is (epoch time, elapsed time).
    pub fn results(
        &self,
        title:   &str,
        epoch:   usize,
        timing:  Option<(Duration, Duration)>,
        metrics: &Metrics,
    ) -> Result<()> {
        self.line(&format!(">>> {title} - Epoch[{epoch}] <<<"))?;
        if let Some((epoch_time, elapsed)) = timing {
            self.line(&format!("    Epoch time: {:.2} s", epoch_time.as_secs_f64()))?;
            self.line(&format!("    Elapsed time: {:.2} s", elapsed.as_secs_f64()))?;
        }
        for (name, value) in metrics.iter() {
            self.line(&format!("    {name}: {value:.5}"))?;
        }
        Ok(())
    }
}
