// ============================================================
// Layer 5 — Reduce-on-Plateau Learning Rate
// ============================================================
// Watches one monitored value per check and cuts the learning
// rate when it stops improving:
//
//   improved?   Min: value < best × (1 − 1e-4)
//               Max: value > best × (1 + 1e-4)
//   bad checks  reset on improvement, +1 otherwise
//   bad > patience  →  lr = max(lr × factor, min_lr), bad = 0
//
// The controller only ever drives a single parameter group.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;
use crate::ml::optim::ParamGroups;

const THRESHOLD: f64 = 1e-4;
const EPS: f64 = 1e-8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlateauMode {
    /// Lower is better
    #[default]
    Min,
    /// Higher is better
    Max,
}

impl fmt::Display for PlateauMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlateauMode::Min => f.write_str("min"),
            PlateauMode::Max => f.write_str("max"),
        }
    }
}

impl FromStr for PlateauMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "min" => Ok(PlateauMode::Min),
            "max" => Ok(PlateauMode::Max),
            other => Err(format!("unknown plateau mode '{other}' (expected min or max)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlateauConfig {
    pub mode:     PlateauMode,
    pub factor:   f64,
    pub patience: usize,
    pub min_lr:   f64,
}

#[derive(Debug, Clone)]
pub struct LrPlateau {
    cfg:        PlateauConfig,
    best:       f64,
    bad_checks: usize,
}

impl LrPlateau {
    /// Attach to an optimizer, which must expose exactly one parameter group.
    pub fn attach(cfg: PlateauConfig, groups: &dyn ParamGroups) -> Result<Self, ConfigError> {
        let found = groups.learning_rates().len();
        if found != 1 {
            return Err(ConfigError::ParamGroups { found });
        }
        let best = match cfg.mode {
            PlateauMode::Min => f64::INFINITY,
            PlateauMode::Max => f64::NEG_INFINITY,
        };
        Ok(Self { cfg, best, bad_checks: 0 })
    }

    fn improves(&self, value: f64) -> bool {
        match self.cfg.mode {
            PlateauMode::Min => value < self.best * (1.0 - THRESHOLD),
            PlateauMode::Max => value > self.best * (1.0 + THRESHOLD),
        }
    }

    /// Record one check and return the learning rate in force afterwards.
    pub fn step(&mut self, value: f64, groups: &mut dyn ParamGroups) -> f64 {
        if self.improves(value) {
            self.best = value;
            self.bad_checks = 0;
        } else {
            self.bad_checks += 1;
        }

        let mut lr = groups.learning_rates().first().copied().unwrap_or(self.cfg.min_lr);
        if self.bad_checks > self.cfg.patience {
            let reduced = (lr * self.cfg.factor).max(self.cfg.min_lr);
            if lr - reduced > EPS {
                tracing::info!("Reducing learning rate from {lr} to {reduced}");
                groups.set_learning_rate(reduced);
                lr = reduced;
            }
            self.bad_checks = 0;
        }
        lr
    }
}
