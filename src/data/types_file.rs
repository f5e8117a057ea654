// ============================================================
// Layer 4 — Examples File Parser
// ============================================================
// Reads the whitespace-separated examples file that lists one
// training example per line:
//
//   label [affinity] [other columns...] grid_path
//   1  -6.52  0.41  grids/1abc_pose1.bin
//   0   6.52  5.87  grids/1abc_pose7.bin
//
// The pose label column and the optional affinity column are
// chosen by position. The last column is always the path of a
// precomputed grid, resolved against the data root when it is
// relative. Blank lines and lines starting with '#' are skipped.

use anyhow::{bail, Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Which columns hold the label and the affinity.
#[derive(Debug, Clone, Copy)]
pub struct ColumnLayout {
    pub label_pos:    usize,
    pub affinity_pos: Option<usize>,
}

/// One parsed line of the examples file.
#[derive(Debug, Clone, PartialEq)]
pub struct ExampleRecord {
    pub label:     i32,
    pub affinity:  Option<f32>,
    pub grid_path: PathBuf,
}

/// Parse an examples file from disk.
pub fn read_examples_file(
    path:      &Path,
    layout:    ColumnLayout,
    data_root: &Path,
) -> Result<Vec<ExampleRecord>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot read examples file '{}'", path.display()))?;

    let records = parse_examples(&text, layout, data_root)
        .with_context(|| format!("Invalid examples file '{}'", path.display()))?;

    tracing::debug!("Parsed {} examples from '{}'", records.len(), path.display());
    Ok(records)
}

/// Parse the contents of an examples file.
pub fn parse_examples(
    text:      &str,
    layout:    ColumnLayout,
    data_root: &Path,
) -> Result<Vec<ExampleRecord>> {
    let mut records = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let record = parse_line(line, layout, data_root)
            .with_context(|| format!("line {}", idx + 1))?;
        records.push(record);
    }

    Ok(records)
}

fn parse_line(line: &str, layout: ColumnLayout, data_root: &Path) -> Result<ExampleRecord> {
    let columns: Vec<&str> = line.split_whitespace().collect();

    // The grid path is the last column, so every positional
    // column must come strictly before it.
    let needed = layout.label_pos.max(layout.affinity_pos.unwrap_or(0)) + 2;
    if columns.len() < needed {
        bail!("expected at least {needed} columns, found {}", columns.len());
    }

    let raw_label = columns[layout.label_pos];
    let label: i32 = raw_label
        .parse()
        .with_context(|| format!("pose label '{raw_label}' is not an integer"))?;
    if label != 0 && label != 1 {
        bail!("pose label must be 0 or 1, found {label}");
    }

    let affinity = match layout.affinity_pos {
        Some(pos) => {
            let raw = columns[pos];
            let value: f32 = raw
                .parse()
                .with_context(|| format!("affinity '{raw}' is not a number"))?;
            Some(value)
        }
        None => None,
    };

    let grid = Path::new(columns[columns.len() - 1]);
    let grid_path = if grid.is_absolute() {
        grid.to_path_buf()
    } else {
        data_root.join(grid)
    };

    Ok(ExampleRecord { label, affinity, grid_path })
}
