// ============================================================
// Layer 5 — Grid Scoring Models
// ============================================================
// 3D convolutional encoders over gridded poses, with a pose
// classification head and, for dual-task runs, an affinity
// regression head.
//
//   default2017:  [pool → conv3]            × (32, 64, 128)  max pooling
//   default2018:  [pool → conv3 → conv1]    × (32, 64, 128)  avg pooling
//
//   grids [N, C, P, P, P]
//       │  3 × (2×2×2 pool, convs + ReLU), padding keeps the size
//       ▼
//   features [N, 128, P/8, P/8, P/8] → flatten
//       │
//       ├── pose head     Linear → 2 → log_softmax   [N, 2]
//       └── affinity head Linear → 1 → flatten       [N]
//
// Burn has no 3D pooling op. Pooling folds depth into the batch,
// runs the 2D kernel over every (H, W) plane, then reduces each
// pair of neighbouring depth planes.

use std::{fmt, str::FromStr};

use burn::{
    nn::{
        conv::{Conv3d, Conv3dConfig},
        Initializer, Linear, LinearConfig, PaddingConfig3d,
    },
    prelude::*,
    tensor::{activation, module},
};
use serde::{Deserialize, Serialize};

use crate::domain::{error::ConfigError, grid::GridDims};

const STAGE_CHANNELS: [usize; 3] = [32, 64, 128];

// ─── Architecture ─────────────────────────────────────────────────────────────
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Architecture {
    Default2017,
    Default2018,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::Default2017 => f.write_str("default2017"),
            Architecture::Default2018 => f.write_str("default2018"),
        }
    }
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default2017" => Ok(Architecture::Default2017),
            "default2018" => Ok(Architecture::Default2018),
            other => Err(format!("unknown model '{other}' (expected default2017 or default2018)")),
        }
    }
}

// ─── Config ───────────────────────────────────────────────────────────────────
#[derive(Config, Debug)]
pub struct GridModelConfig {
    pub architecture: Architecture,
    pub dims:         GridDims,
}

impl GridModelConfig {
    /// Three halvings must leave at least one voxel per side.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.dims.points < 8 {
            return Err(ConfigError::invalid(
                "dims",
                format!("grid of {} needs at least 8 points per side", self.dims),
            ));
        }
        if self.dims.channels == 0 {
            return Err(ConfigError::invalid("dims", "grid has no channels"));
        }
        Ok(())
    }

    /// Length of the flattened encoder output.
    pub fn features(&self) -> usize {
        let side = self.dims.points / 2 / 2 / 2;
        STAGE_CHANNELS[STAGE_CHANNELS.len() - 1] * side * side * side
    }

    pub fn init_pose<B: Backend>(&self, device: &B::Device) -> PoseNet<B> {
        PoseNet {
            encoder: self.init_encoder(device),
            pose:    linear(self.features(), 2, device),
        }
    }

    pub fn init_pose_affinity<B: Backend>(&self, device: &B::Device) -> PoseAffinityNet<B> {
        PoseAffinityNet {
            encoder:  self.init_encoder(device),
            pose:     linear(self.features(), 2, device),
            affinity: linear(self.features(), 1, device),
        }
    }

    fn init_encoder<B: Backend>(&self, device: &B::Device) -> GridEncoder<B> {
        let mut in_channels = self.dims.channels;
        let stages = STAGE_CHANNELS
            .iter()
            .map(|&out| {
                let mut convs = vec![conv(in_channels, out, 3, device)];
                if self.architecture == Architecture::Default2018 {
                    convs.push(conv(out, out, 1, device));
                }
                in_channels = out;
                ConvStage { convs }
            })
            .collect();

        GridEncoder {
            stages,
            max_pool: self.architecture == Architecture::Default2017,
        }
    }
}

fn conv<B: Backend>(in_ch: usize, out_ch: usize, kernel: usize, device: &B::Device) -> Conv3d<B> {
    let pad = kernel / 2;
    Conv3dConfig::new([in_ch, out_ch], [kernel, kernel, kernel])
        .with_padding(PaddingConfig3d::Explicit(pad, pad, pad))
        .with_initializer(Initializer::XavierUniform { gain: 1.0 })
        .init(device)
}

fn linear<B: Backend>(d_in: usize, d_out: usize, device: &B::Device) -> Linear<B> {
    LinearConfig::new(d_in, d_out)
        .with_initializer(Initializer::XavierUniform { gain: 1.0 })
        .init(device)
}

// ─── Encoder ──────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct ConvStage<B: Backend> {
    pub convs: Vec<Conv3d<B>>,
}

#[derive(Module, Debug)]
pub struct GridEncoder<B: Backend> {
    pub stages:   Vec<ConvStage<B>>,
    pub max_pool: bool,
}

impl<B: Backend> GridEncoder<B> {
    /// grids: [N, C, P, P, P] → [N, features]
    pub fn forward(&self, grids: Tensor<B, 5>) -> Tensor<B, 2> {
        let mut x = grids;
        for stage in &self.stages {
            x = pool2(x, self.max_pool);
            for conv in &stage.convs {
                x = activation::relu(conv.forward(x));
            }
        }
        x.flatten::<2>(1, 4)
    }
}

/// 2×2×2 pooling with stride 2; odd trailing planes are dropped.
fn pool2<B: Backend>(x: Tensor<B, 5>, max: bool) -> Tensor<B, 5> {
    let [n, c, d, h, w] = x.dims();
    let (d2, h2, w2) = (d / 2, h / 2, w / 2);

    // [N, C, D, H, W] → [N·D, C, H, W], depth planes of one grid adjacent
    let planes = x
        .slice([0..n, 0..c, 0..d2 * 2, 0..h, 0..w])
        .swap_dims(1, 2)
        .reshape([n * d2 * 2, c, h, w]);

    let pooled = if max {
        module::max_pool2d(planes, [2, 2], [2, 2], [0, 0], [1, 1])
    } else {
        module::avg_pool2d(planes, [2, 2], [2, 2], [0, 0], true)
    };

    // pair up even and odd depth planes
    let pairs = pooled.reshape([n * d2, 2, c * h2 * w2]);
    let even = pairs.clone().narrow(1, 0, 1);
    let odd = pairs.narrow(1, 1, 1);
    let reduced = if max {
        even.max_pair(odd)
    } else {
        (even + odd).div_scalar(2.0)
    };

    reduced.reshape([n, d2, c, h2, w2]).swap_dims(1, 2)
}

// ─── Heads ────────────────────────────────────────────────────────────────────
/// Pose-only network: one output.
#[derive(Module, Debug)]
pub struct PoseNet<B: Backend> {
    pub encoder: GridEncoder<B>,
    pub pose:    Linear<B>,
}

impl<B: Backend> PoseNet<B> {
    /// grids: [N, C, P, P, P] → pose log-probabilities [N, 2]
    pub fn forward(&self, grids: Tensor<B, 5>) -> Tensor<B, 2> {
        let features = self.encoder.forward(grids);
        activation::log_softmax(self.pose.forward(features), 1)
    }
}

/// Pose-and-affinity network: two outputs sharing one encoder.
#[derive(Module, Debug)]
pub struct PoseAffinityNet<B: Backend> {
    pub encoder:  GridEncoder<B>,
    pub pose:     Linear<B>,
    pub affinity: Linear<B>,
}

impl<B: Backend> PoseAffinityNet<B> {
    /// grids: [N, C, P, P, P] → (pose log-probabilities [N, 2], affinity [N])
    pub fn forward(&self, grids: Tensor<B, 5>) -> (Tensor<B, 2>, Tensor<B, 1>) {
        let [n, ..] = grids.dims();
        let features = self.encoder.forward(grids);
        let pose_log = activation::log_softmax(self.pose.forward(features.clone()), 1);
        let affinity = self.affinity.forward(features).reshape([n]);
        (pose_log, affinity)
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn config(architecture: Architecture, points: usize) -> GridModelConfig {
        GridModelConfig::new(architecture, GridDims::new(2, points))
    }

    fn grids(n: usize, points: usize) -> Tensor<TestBackend, 5> {
        Tensor::random(
            [n, 2, points, points, points],
            burn::tensor::Distribution::Uniform(0.0, 1.0),
            &Default::default(),
        )
    }

    #[test]
    fn test_architecture_names_round_trip() {
        for arch in [Architecture::Default2017, Architecture::Default2018] {
            assert_eq!(arch.to_string().parse::<Architecture>().unwrap(), arch);
        }
        assert!("resnet".parse::<Architecture>().is_err());
    }

    #[test]
    fn test_pose_output_shape_and_probabilities() {
        let model: PoseNet<TestBackend> = config(Architecture::Default2017, 8).init_pose(&Default::default());
        let out = model.forward(grids(3, 8));

        assert_eq!(out.dims(), [3, 2]);
        // log_softmax rows exponentiate to probability distributions
        let sums = out.exp().sum_dim(1).into_data().to_vec::<f32>().unwrap();
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-5));
    }

    #[test]
    fn test_pose_affinity_output_shapes() {
        let model: PoseAffinityNet<TestBackend> =
            config(Architecture::Default2018, 10).init_pose_affinity(&Default::default());
        let (pose, affinity) = model.forward(grids(2, 10));

        assert_eq!(pose.dims(), [2, 2]);
        assert_eq!(affinity.dims(), [2]);
    }

    #[test]
    fn test_feature_count_follows_three_halvings() {
        assert_eq!(config(Architecture::Default2017, 8).features(), 128);
        assert_eq!(config(Architecture::Default2017, 48).features(), 128 * 6 * 6 * 6);
        assert_eq!(config(Architecture::Default2017, 17).features(), 128 * 2 * 2 * 2);
    }

    #[test]
    fn test_2018_has_more_parameters_than_2017() {
        let device = Default::default();
        let small: PoseNet<TestBackend> = config(Architecture::Default2017, 8).init_pose(&device);
        let large: PoseNet<TestBackend> = config(Architecture::Default2018, 8).init_pose(&device);
        assert!(large.num_params() > small.num_params());
    }

    #[test]
    fn test_check_rejects_tiny_grids() {
        assert!(config(Architecture::Default2017, 7).check().is_err());
        assert!(config(Architecture::Default2017, 8).check().is_ok());
    }

    #[test]
    fn test_max_and_average_pooling() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_floats(
            [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
            &device,
        )
        .reshape([1, 1, 2, 2, 2]);

        let max: f32 = pool2(x.clone(), true).into_scalar();
        let avg: f32 = pool2(x, false).into_scalar();
        assert_eq!(max, 8.0);
        assert_eq!(avg, 4.5);
    }

    #[test]
    fn test_pooling_matches_blockwise_reduction() {
        // odd depth and width exercise the dropped trailing planes
        let shape = [2, 3, 5, 4, 7];
        let len: usize = shape.iter().product();
        let values: Vec<f32> = (0..len).map(|i| ((i * 37) % 101) as f32).collect();
        let x = Tensor::<TestBackend, 5>::from_data(
            TensorData::new(values.clone(), shape),
            &Default::default(),
        );

        let max = pool2(x.clone(), true);
        let avg = pool2(x, false);
        assert_eq!(max.dims(), [2, 3, 2, 2, 3]);

        let max = max.into_data().to_vec::<f32>().unwrap();
        let avg = avg.into_data().to_vec::<f32>().unwrap();
        let at = |n: usize, c: usize, d: usize, h: usize, w: usize| {
            values[(((n * 3 + c) * 5 + d) * 4 + h) * 7 + w]
        };

        let mut out = 0;
        for n in 0..2 {
            for c in 0..3 {
                for d in 0..2 {
                    for h in 0..2 {
                        for w in 0..3 {
                            let block: Vec<f32> = (0..8)
                                .map(|k| at(n, c, 2 * d + k / 4, 2 * h + (k / 2) % 2, 2 * w + k % 2))
                                .collect();
                            let expected_max = block.iter().cloned().fold(f32::MIN, f32::max);
                            let expected_avg = block.iter().sum::<f32>() / 8.0;
                            assert_eq!(max[out], expected_max);
                            assert!((avg[out] - expected_avg).abs() < 1e-4);
                            out += 1;
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_backward_reaches_first_convolution() {
        type Ad = burn::backend::Autodiff<NdArray>;
        let device = Default::default();

        for arch in [Architecture::Default2017, Architecture::Default2018] {
            let model: PoseAffinityNet<Ad> = config(arch, 8).init_pose_affinity(&device);
            let x = Tensor::<Ad, 5>::random(
                [3, 2, 8, 8, 8],
                burn::tensor::Distribution::Uniform(0.0, 1.0),
                &device,
            );
            let (pose, affinity) = model.forward(x);
            let grads = (pose.sum() + affinity.sum()).backward();

            let first = &model.encoder.stages[0].convs[0];
            assert!(first.weight.val().grad(&grads).is_some(), "{arch}");
        }
    }
}
