// ============================================================
// Layer 6 — Metrics History
// ============================================================
// Append-only table of evaluation results, one row per
// evaluation, written out as CSV when training completes.
//
// The column set is fixed by the first row; every later row must
// carry the same metric names in the same order, with a strictly
// larger epoch.
//
// Example metrics_train.csv:
//   Epoch,Loss (pose),Accuracy,Balanced accuracy,ROC AUC
//   1,0.69120,0.52000,0.50000,0.61235
//   2,0.65871,0.60500,0.58333,0.70012
//
// Epochs are written as integers, metrics with 5 decimals.

use anyhow::{Context, Result};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use crate::domain::error::TrainingError;
use crate::engine::Metrics;

#[derive(Debug, Default, Clone)]
pub struct MetricsTable {
    columns: Vec<String>,
    rows:    Vec<(usize, Vec<f64>)>,
}

impl MetricsTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, epoch: usize, metrics: &Metrics) -> Result<(), TrainingError> {
        let names = metrics.names();

        match self.rows.last() {
            None => self.columns = names,
            Some((last, _)) => {
                if names != self.columns {
                    return Err(TrainingError::HistoryColumns {
                        expected: self.columns.clone(),
                        found:    names,
                    });
                }
                if epoch <= *last {
                    return Err(TrainingError::HistoryOrder { last: *last, epoch });
                }
            }
        }

        self.rows.push((epoch, metrics.iter().map(|(_, v)| v).collect()));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("Cannot create '{}'", path.display()))?;
        let mut f = BufWriter::new(file);

        let mut header = vec!["Epoch".to_string()];
        header.extend(self.columns.iter().cloned());
        writeln!(f, "{}", header.join(","))?;

        for (epoch, values) in &self.rows {
            let cells: Vec<String> = std::iter::once(epoch.to_string())
                .chain(values.iter().map(|v| format!("{v:.5}")))
                .collect();
            writeln!(f, "{}", cells.join(","))?;
        }
        f.flush()?;

        tracing::debug!("Wrote {} rows to '{}'", self.rows.len(), path.display());
        Ok(())
    }
}
