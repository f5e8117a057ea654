// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates a full training run in order:
//
//   Step 1: Validate the configuration
//   Step 2: Prepare the output directory   (Layer 6 - infra)
//           fails if it already holds checkpoints
//   Step 3: Open the run log, echo and save the config
//   Step 4: Seed the RNGs
//   Step 5: Read examples files, open datasets   (Layer 4 - data)
//   Step 6: Build loaders on the chosen backend  (Layer 4 - data)
//   Step 7: Run the training engine              (Layer 5 - ml)
//
// Reference: Burn Book §5 (Training)

use std::path::PathBuf;

use anyhow::Result;
use burn::{
    backend::{wgpu::WgpuDevice, Autodiff, NdArray, Wgpu},
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};

use crate::data::{
    dataset::GridDataset,
    loader::{GridLoader, LoaderConfig},
    types_file::{read_examples_file, ColumnLayout},
};
use crate::domain::{error::ConfigError, grid::GridDims, task::TaskMode};
use crate::infra::{checkpoint::CheckpointManager, run_log::RunLog};
use crate::ml::{
    loss::AffinityLossConfig,
    model::{Architecture, GridModelConfig},
    optim::SgdSettings,
    plateau::{PlateauConfig, PlateauMode},
    trainer::{run_training, TrainingData, TrainingPlan},
    DeviceKind,
};

// ─── Run Configuration ───────────────────────────────────────────────────────
// Every setting of a training run. Serialisable so it can be
// saved next to the checkpoints and reloaded by `evaluate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    // data
    pub trainfile:    PathBuf,
    pub testfile:     Option<PathBuf>,
    pub data_root:    PathBuf,
    pub label_pos:    usize,
    pub affinity_pos: Option<usize>,
    pub out_dir:      PathBuf,
    pub shuffle:      bool,
    pub num_workers:  usize,

    // model and grid
    pub model:      Architecture,
    pub dimension:  f64,
    pub resolution: f64,
    pub channels:   usize,

    // learning
    pub base_lr:         f64,
    pub momentum:        f64,
    pub weight_decay:    f64,
    pub batch_size:      usize,
    pub iterations:      usize,
    pub clip_gradients:  f64,
    pub lr_dynamic:      bool,
    pub lr_patience:     usize,
    pub lr_reduce:       f64,
    pub lr_min:          f64,
    pub lr_plateau_mode: PlateauMode,

    // affinity loss
    pub pseudo_huber_affinity_loss: bool,
    pub delta_affinity_loss:        f64,
    pub scale_affinity_loss:        f64,
    pub penalty_affinity_loss:      f64,

    // misc
    pub test_every:       usize,
    pub checkpoint_every: usize,
    pub num_checkpoints:  usize,
    pub progress_bar:     bool,
    pub device:           DeviceKind,
    pub roc_auc:          bool,
    pub seed:             Option<u64>,
    pub silent:           bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            trainfile:    PathBuf::new(),
            testfile:     None,
            data_root:    PathBuf::from("."),
            label_pos:    0,
            affinity_pos: None,
            out_dir:      PathBuf::from("."),
            shuffle:      true,
            num_workers:  4,

            model:      Architecture::Default2017,
            dimension:  23.5,
            resolution: 0.5,
            channels:   28,

            base_lr:         0.01,
            momentum:        0.9,
            weight_decay:    0.001,
            batch_size:      64,
            iterations:      250_000,
            clip_gradients:  10.0,
            lr_dynamic:      false,
            lr_patience:     5,
            lr_reduce:       0.1,
            lr_min:          1e-5,
            lr_plateau_mode: PlateauMode::Min,

            pseudo_huber_affinity_loss: false,
            delta_affinity_loss:        4.0,
            scale_affinity_loss:        1.0,
            penalty_affinity_loss:      1.0,

            test_every:       1000,
            checkpoint_every: 100,
            num_checkpoints:  1,
            progress_bar:     false,
            device:           DeviceKind::Cpu,
            roc_auc:          true,
            seed:             None,
            silent:           false,
        }
    }
}

impl RunConfig {
    /// Reject values no run could use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive_counts = [
            ("batch_size", self.batch_size),
            ("iterations", self.iterations),
            ("test_every", self.test_every),
            ("checkpoint_every", self.checkpoint_every),
            ("num_checkpoints", self.num_checkpoints),
            ("channels", self.channels),
        ];
        for (field, value) in positive_counts {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be at least 1"));
            }
        }

        let positive_values = [
            ("base_lr", self.base_lr),
            ("dimension", self.dimension),
            ("resolution", self.resolution),
            ("clip_gradients", self.clip_gradients),
            ("delta_affinity_loss", self.delta_affinity_loss),
        ];
        for (field, value) in positive_values {
            if !(value > 0.0) {
                return Err(ConfigError::invalid(field, format!("must be positive, got {value}")));
            }
        }

        if !(0.0..1.0).contains(&self.momentum) {
            return Err(ConfigError::invalid("momentum", format!("must be in [0, 1), got {}", self.momentum)));
        }
        if self.weight_decay < 0.0 {
            return Err(ConfigError::invalid("weight_decay", "must not be negative"));
        }
        if !(self.lr_reduce > 0.0 && self.lr_reduce < 1.0) {
            return Err(ConfigError::invalid("lr_reduce", format!("must be in (0, 1), got {}", self.lr_reduce)));
        }
        if self.lr_min < 0.0 {
            return Err(ConfigError::invalid("lr_min", "must not be negative"));
        }
        if self.affinity_pos == Some(self.label_pos) {
            return Err(ConfigError::invalid("affinity_pos", "must differ from label_pos"));
        }

        self.model_config().check()
    }

    pub fn task_mode(&self) -> TaskMode {
        TaskMode::from_affinity_column(self.affinity_pos)
    }

    pub fn grid_dims(&self) -> GridDims {
        GridDims::from_geometry(self.channels, self.dimension, self.resolution)
    }

    pub fn layout(&self) -> ColumnLayout {
        ColumnLayout { label_pos: self.label_pos, affinity_pos: self.affinity_pos }
    }

    pub fn model_config(&self) -> GridModelConfig {
        GridModelConfig::new(self.model, self.grid_dims())
    }

    pub fn sgd(&self) -> SgdSettings {
        SgdSettings {
            base_lr:        self.base_lr,
            momentum:       self.momentum,
            weight_decay:   self.weight_decay,
            clip_gradients: self.clip_gradients,
        }
    }

    pub fn affinity_loss(&self) -> AffinityLossConfig {
        AffinityLossConfig::new()
            .with_delta(self.delta_affinity_loss)
            .with_penalty(self.penalty_affinity_loss)
            .with_pseudo_huber(self.pseudo_huber_affinity_loss)
            .with_scale(self.scale_affinity_loss)
    }

    /// Plateau settings, present only with `lr_dynamic`.
    pub fn plateau(&self) -> Option<PlateauConfig> {
        self.lr_dynamic.then_some(PlateauConfig {
            mode:     self.lr_plateau_mode,
            factor:   self.lr_reduce,
            patience: self.lr_patience,
            min_lr:   self.lr_min,
        })
    }

    pub fn plan(&self) -> TrainingPlan {
        TrainingPlan {
            task:             self.task_mode(),
            model:            self.model_config(),
            sgd:              self.sgd(),
            affinity_loss:    self.affinity_loss().init(),
            plateau:          self.plateau(),
            roc_auc:          self.roc_auc,
            epochs:           self.iterations,
            test_every:       self.test_every,
            checkpoint_every: self.checkpoint_every,
            progress_bar:     self.progress_bar,
        }
    }
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: RunConfig,
}

impl TrainUseCase {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    /// Execute the full training run end to end
    pub fn execute(&self) -> Result<()> {
        let cfg = &self.config;

        // ── Step 1: Validate ─────────────────────────────────────────────────
        cfg.validate()?;

        // ── Step 2: Output directory ─────────────────────────────────────────
        // Must happen before any data is read so a reused directory
        // fails fast.
        let checkpoints = CheckpointManager::new(&cfg.out_dir, cfg.num_checkpoints)?;

        // ── Step 3: Run log and saved config ─────────────────────────────────
        let log = RunLog::open(&cfg.out_dir.join("training.log"), cfg.silent)?;
        log.echo_config(cfg)?;
        checkpoints.save_config(cfg)?;

        // ── Step 4: Seed ─────────────────────────────────────────────────────
        let seed = cfg.seed.unwrap_or_else(rand::random);
        tracing::info!("Using seed {seed}");

        // ── Step 5: Datasets ─────────────────────────────────────────────────
        let dims = cfg.grid_dims();
        let train_records = read_examples_file(&cfg.trainfile, cfg.layout(), &cfg.data_root)?;
        let train = GridDataset::open(train_records, dims)?;

        let test = match &cfg.testfile {
            Some(path) => {
                let records = read_examples_file(path, cfg.layout(), &cfg.data_root)?;
                Some(GridDataset::open(records, dims)?)
            }
            None => None,
        };

        // ── Step 6 + 7: Loaders and training on the chosen backend ───────────
        tracing::info!("Training {} model ({}) on {}", cfg.model, cfg.task_mode(), cfg.device);
        match cfg.device {
            DeviceKind::Cpu => {
                self.train_on::<Autodiff<NdArray>>(Default::default(), seed, train, test, checkpoints, log)
            }
            DeviceKind::Gpu => {
                self.train_on::<Autodiff<Wgpu>>(WgpuDevice::default(), seed, train, test, checkpoints, log)
            }
        }
    }

    fn train_on<B: AutodiffBackend>(
        &self,
        device:      B::Device,
        seed:        u64,
        train:       GridDataset,
        test:        Option<GridDataset>,
        checkpoints: CheckpointManager,
        log:         RunLog,
    ) -> Result<()> {
        let cfg = &self.config;
        B::seed(seed);

        let train_cfg = LoaderConfig {
            batch_size:  cfg.batch_size,
            shuffle:     cfg.shuffle.then_some(seed),
            num_workers: cfg.num_workers,
        };
        let eval_cfg = LoaderConfig { shuffle: None, ..train_cfg };

        let data = TrainingData::<B> {
            train:      GridLoader::new(train.clone(), device.clone(), train_cfg),
            train_eval: GridLoader::new(train, device.clone(), eval_cfg),
            test:       test.map(|t| GridLoader::new(t, device.clone(), eval_cfg)),
        };

        run_training(&cfg.plan(), data, checkpoints, log, &device)?;
        Ok(())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::write_grid;
    use crate::domain::error::CheckpointError;
    use std::fs;

    fn small_config(dir: &std::path::Path) -> RunConfig {
        RunConfig {
            trainfile:        dir.join("train.types"),
            data_root:        dir.to_path_buf(),
            out_dir:          dir.join("out"),
            dimension:        3.5,
            resolution:       0.5,
            channels:         2,
            batch_size:       2,
            iterations:       2,
            test_every:       1,
            checkpoint_every: 2,
            num_workers:      0,
            seed:             Some(3),
            silent:           true,
            ..RunConfig::default()
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let cfg = RunConfig { trainfile: "train.types".into(), ..RunConfig::default() };
        cfg.validate().unwrap();
        assert_eq!(cfg.grid_dims(), GridDims::new(28, 48));
        assert_eq!(cfg.task_mode(), TaskMode::PoseOnly);
        assert!(cfg.plateau().is_none());

        // zero workers loads batches on the training thread
        RunConfig { num_workers: 0, ..cfg }.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let cases = [
            RunConfig { batch_size: 0, ..RunConfig::default() },
            RunConfig { test_every: 0, ..RunConfig::default() },
            RunConfig { num_checkpoints: 0, ..RunConfig::default() },
            RunConfig { base_lr: 0.0, ..RunConfig::default() },
            RunConfig { lr_reduce: 1.0, ..RunConfig::default() },
            RunConfig { lr_min: -1.0, ..RunConfig::default() },
            RunConfig { affinity_pos: Some(0), ..RunConfig::default() },
            RunConfig { dimension: 2.0, ..RunConfig::default() },
        ];
        for cfg in cases {
            assert!(
                matches!(cfg.validate(), Err(ConfigError::Invalid { .. })),
                "accepted {cfg:?}"
            );
        }
    }

    #[test]
    fn test_plan_follows_flags() {
        let cfg = RunConfig {
            affinity_pos:    Some(1),
            lr_dynamic:      true,
            lr_plateau_mode: PlateauMode::Max,
            ..RunConfig::default()
        };
        let plan = cfg.plan();

        assert_eq!(plan.task, TaskMode::PoseAndAffinity);
        assert_eq!(plan.epochs, 250_000);
        let plateau = plan.plateau.unwrap();
        assert_eq!(plateau.mode, PlateauMode::Max);
        assert_eq!(plateau.patience, 5);
    }

    #[test]
    fn test_existing_checkpoint_fails_before_reading_data() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = small_config(dir.path());
        fs::create_dir_all(cfg.out_dir.join("checkpoint_5")).unwrap();

        // The train file does not exist; the checkpoint check must come first
        let err = TrainUseCase::new(cfg.clone()).execute().unwrap_err();
        assert!(matches!(err.downcast_ref::<CheckpointError>(), Some(CheckpointError::Existing { .. })));
        assert!(!cfg.out_dir.join("metrics_train.csv").exists());
    }

    #[test]
    fn test_execute_trains_on_cpu_and_saves_config() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = small_config(dir.path());
        let dims = cfg.grid_dims();

        let mut lines = Vec::new();
        for i in 0..4 {
            let label = i % 2;
            let name = format!("g{i}.bin");
            write_grid(&dir.path().join(&name), &vec![label as f32; dims.values()]).unwrap();
            lines.push(format!("{label} {name}"));
        }
        fs::write(&cfg.trainfile, lines.join("\n")).unwrap();

        TrainUseCase::new(cfg.clone()).execute().unwrap();

        let saved: RunConfig =
            serde_json::from_str(&fs::read_to_string(cfg.out_dir.join("run_config.json")).unwrap()).unwrap();
        assert_eq!(saved, cfg);
        assert!(cfg.out_dir.join("metrics_train.csv").exists());
        assert!(cfg.out_dir.join("checkpoint_2").is_dir());

        let log = fs::read_to_string(cfg.out_dir.join("training.log")).unwrap();
        assert!(log.starts_with("--- POSEGRID TRAINING ---\n"));
    }
}
