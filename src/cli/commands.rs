// ============================================================
// Layer 1 — CLI Commands and Arguments
// ============================================================
// Defines the two subcommands, `train` and `evaluate`, and all
// their configurable flags.
//
// Reference: Rust Book §12 (Building a CLI Program)

use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::application::{evaluate_use_case::EvaluateRequest, train_use_case::RunConfig};
use crate::ml::{model::Architecture, plateau::PlateauMode, DeviceKind};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a pose (and optionally affinity) model on gridded examples
    Train(TrainArgs),

    /// Score an examples file with a checkpoint from a training run
    Evaluate(EvaluateArgs),
}

/// All arguments for the `train` command.
#[derive(Args, Debug)]
pub struct TrainArgs {
    // ── Data ──────────────────────────────────────────────────────────────────
    /// Training examples file
    pub trainfile: PathBuf,

    /// Test examples file
    #[arg(long)]
    pub testfile: Option<PathBuf>,

    /// Root folder for relative grid paths in the examples files
    #[arg(short = 'd', long, default_value = ".")]
    pub data_root: PathBuf,

    /// Pose label column
    #[arg(long, default_value_t = 0)]
    pub label_pos: usize,

    /// Affinity column; enables the affinity head
    #[arg(long)]
    pub affinity_pos: Option<usize>,

    /// Output directory for logs, metrics and checkpoints
    #[arg(short = 'o', long, default_value = ".")]
    pub out_dir: PathBuf,

    /// Keep examples in file order
    #[arg(long)]
    pub no_shuffle: bool,

    /// Data loader worker threads; 0 loads on the training thread
    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,

    // ── Model ─────────────────────────────────────────────────────────────────
    /// Architecture (default2017 or default2018)
    #[arg(short = 'm', long, default_value_t = Architecture::Default2017)]
    pub model: Architecture,

    /// Grid side length in Ångström
    #[arg(long, default_value_t = 23.5)]
    pub dimension: f64,

    /// Grid resolution in Ångström
    #[arg(long, default_value_t = 0.5)]
    pub resolution: f64,

    /// Atom-type channels per grid
    #[arg(long, default_value_t = 28)]
    pub channels: usize,

    // ── Learning ──────────────────────────────────────────────────────────────
    /// Base (initial) learning rate
    #[arg(long, default_value_t = 0.01)]
    pub base_lr: f64,

    #[arg(long, default_value_t = 0.9)]
    pub momentum: f64,

    #[arg(long, default_value_t = 0.001)]
    pub weight_decay: f64,

    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,

    /// Number of epochs
    #[arg(short = 'i', long, default_value_t = 250_000)]
    pub iterations: usize,

    /// Adjust the learning rate when the training loss plateaus
    #[arg(long)]
    pub lr_dynamic: bool,

    /// Checks without improvement before the learning rate is reduced
    #[arg(long, default_value_t = 5)]
    pub lr_patience: usize,

    /// Learning rate reduction factor
    #[arg(long, default_value_t = 0.1)]
    pub lr_reduce: f64,

    /// Learning rate floor
    #[arg(long, default_value_t = 1e-5)]
    pub lr_min: f64,

    /// Whether a lower (min) or higher (max) monitored loss counts as improvement
    #[arg(long, default_value_t = PlateauMode::Min)]
    pub lr_plateau_mode: PlateauMode,

    /// Gradient norm threshold
    #[arg(long, default_value_t = 10.0)]
    pub clip_gradients: f64,

    /// Use pseudo-Huber instead of L2 for the affinity loss
    #[arg(long)]
    pub pseudo_huber_affinity_loss: bool,

    #[arg(long, default_value_t = 4.0)]
    pub delta_affinity_loss: f64,

    #[arg(long, default_value_t = 1.0)]
    pub scale_affinity_loss: f64,

    #[arg(long, default_value_t = 1.0)]
    pub penalty_affinity_loss: f64,

    // ── Misc ──────────────────────────────────────────────────────────────────
    /// Evaluate every N epochs
    #[arg(short = 't', long, default_value_t = 1000)]
    pub test_every: usize,

    /// Save a checkpoint every N epochs
    #[arg(long, default_value_t = 100)]
    pub checkpoint_every: usize,

    /// Number of checkpoints to keep
    #[arg(long, default_value_t = 1)]
    pub num_checkpoints: usize,

    #[arg(long)]
    pub progress_bar: bool,

    /// cpu (NdArray) or gpu (Wgpu)
    #[arg(short = 'g', long, default_value_t = DeviceKind::Cpu)]
    pub device: DeviceKind,

    /// Skip ROC AUC (needed when every pose is a good pose)
    #[arg(long)]
    pub no_roc_auc: bool,

    #[arg(short = 's', long)]
    pub seed: Option<u64>,

    /// No console output from the run log
    #[arg(long)]
    pub silent: bool,
}

/// Convert CLI TrainArgs into the application-layer RunConfig.
impl From<TrainArgs> for RunConfig {
    fn from(a: TrainArgs) -> Self {
        RunConfig {
            trainfile:    a.trainfile,
            testfile:     a.testfile,
            data_root:    a.data_root,
            label_pos:    a.label_pos,
            affinity_pos: a.affinity_pos,
            out_dir:      a.out_dir,
            shuffle:      !a.no_shuffle,
            num_workers:  a.num_workers,

            model:      a.model,
            dimension:  a.dimension,
            resolution: a.resolution,
            channels:   a.channels,

            base_lr:         a.base_lr,
            momentum:        a.momentum,
            weight_decay:    a.weight_decay,
            batch_size:      a.batch_size,
            iterations:      a.iterations,
            clip_gradients:  a.clip_gradients,
            lr_dynamic:      a.lr_dynamic,
            lr_patience:     a.lr_patience,
            lr_reduce:       a.lr_reduce,
            lr_min:          a.lr_min,
            lr_plateau_mode: a.lr_plateau_mode,

            pseudo_huber_affinity_loss: a.pseudo_huber_affinity_loss,
            delta_affinity_loss:        a.delta_affinity_loss,
            scale_affinity_loss:        a.scale_affinity_loss,
            penalty_affinity_loss:      a.penalty_affinity_loss,

            test_every:       a.test_every,
            checkpoint_every: a.checkpoint_every,
            num_checkpoints:  a.num_checkpoints,
            progress_bar:     a.progress_bar,
            device:           a.device,
            roc_auc:          !a.no_roc_auc,
            seed:             a.seed,
            silent:           a.silent,
        }
    }
}

/// All arguments for the `evaluate` command
#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Examples file to score
    pub examples: PathBuf,

    /// Output directory of the training run
    #[arg(short = 'o', long, default_value = ".")]
    pub out_dir: PathBuf,

    /// Checkpoint epoch; the latest one when omitted
    #[arg(long)]
    pub epoch: Option<usize>,

    #[arg(long, default_value_t = 64)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,

    #[arg(short = 'g', long, default_value_t = DeviceKind::Cpu)]
    pub device: DeviceKind,
}

impl From<EvaluateArgs> for EvaluateRequest {
    fn from(a: EvaluateArgs) -> Self {
        EvaluateRequest {
            run_dir:     a.out_dir,
            examples:    a.examples,
            epoch:       a.epoch,
            batch_size:  a.batch_size,
            num_workers: a.num_workers,
            device:      a.device,
        }
    }
}
