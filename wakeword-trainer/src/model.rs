//! Wake-word networks.
//!
//! Three independently exported sub-networks mirror the detector's runtime
//! pipeline:
//!
//! - [`MelFrontend`]: raw audio `[B, 1152]` to mel-like frames `[B, 5, 32]`
//! - [`EmbeddingNet`]: frame window `[B, 76, 32, 1]` to embedding `[B, 1, 1, 96]`
//! - [`WakeNet`]: embedding sequence `[B, 16, 96]` to wake logit `[B, 1]`
//!
//! [`WakeWordModel`] chains the embedding and wake networks over extracted
//! features so both can be trained end to end.

use crate::features::{
    EMB_FEATURE_SIZE, EMB_INPUT_COUNT, MEL_FEATURE_SIZE, MEL_INPUT_COUNT, MEL_OUTPUT_COUNT,
    WAKE_INPUT_COUNT,
};
use burn::module::Module;
use burn::nn::conv::{Conv1d, Conv1dConfig, Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, Lstm, LstmConfig, PaddingConfig2d};
use burn::tensor::activation::{relu, sigmoid};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// Window and stride of the front-end's framing convolution
const FRONTEND_WINDOW: usize = 512;
const FRONTEND_HOP: usize = 160;

/// Learned stand-in for the mel spectrogram stage.
///
/// Training consumes [`crate::features::MelExtractor`] output directly; this
/// network only exists so the exported bundle carries a front-end with the
/// expected tensor contract.
#[derive(Module, Debug)]
pub struct MelFrontend<B: Backend> {
    framing: Conv1d<B>,
    projection: Conv1d<B>,
}

impl<B: Backend> MelFrontend<B> {
    pub fn new(device: &B::Device) -> Self {
        Self {
            framing: Conv1dConfig::new(1, MEL_FEATURE_SIZE, FRONTEND_WINDOW)
                .with_stride(FRONTEND_HOP)
                .init(device),
            projection: Conv1dConfig::new(MEL_FEATURE_SIZE, MEL_FEATURE_SIZE, 1).init(device),
        }
    }

    /// `[B, 1152]` audio to `[B, 5, 32]` frames
    pub fn forward(&self, audio: Tensor<B, 2>) -> Tensor<B, 3> {
        let [batch, samples] = audio.dims();
        let x = audio.reshape([batch, 1, samples]);
        let x = relu(self.framing.forward(x));
        let x = self.projection.forward(x);
        x.swap_dims(1, 2).narrow(1, 0, MEL_OUTPUT_COUNT)
    }
}

/// Hyper-parameters shared by the trainable networks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WakeWordModelConfig {
    pub conv_channels: [usize; 3],
    pub embedding_hidden: usize,
    pub embedding_dropout: f64,
    pub lstm_hidden: [usize; 2],
    pub recurrent_dropout: f64,
    pub head_hidden: usize,
    pub head_dropout: f64,
}

impl Default for WakeWordModelConfig {
    fn default() -> Self {
        Self {
            conv_channels: [32, 64, 128],
            embedding_hidden: 256,
            embedding_dropout: 0.3,
            lstm_hidden: [128, 64],
            recurrent_dropout: 0.3,
            head_hidden: 32,
            head_dropout: 0.2,
        }
    }
}

impl WakeWordModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> WakeWordModel<B> {
        WakeWordModel {
            embedding: self.init_embedding(device),
            wake: self.init_wake(device),
        }
    }

    pub fn init_embedding<B: Backend>(&self, device: &B::Device) -> EmbeddingNet<B> {
        let [c1, c2, c3] = self.conv_channels;
        let conv = |input: usize, output: usize| {
            Conv2dConfig::new([input, output], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device)
        };
        let pool = || MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        EmbeddingNet {
            conv1: conv(1, c1),
            pool1: pool(),
            conv2: conv(c1, c2),
            pool2: pool(),
            conv3: conv(c2, c3),
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            hidden: LinearConfig::new(c3, self.embedding_hidden).init(device),
            dropout: DropoutConfig::new(self.embedding_dropout).init(),
            output: LinearConfig::new(self.embedding_hidden, EMB_FEATURE_SIZE).init(device),
        }
    }

    pub fn init_wake<B: Backend>(&self, device: &B::Device) -> WakeNet<B> {
        let [h1, h2] = self.lstm_hidden;
        WakeNet {
            lstm1: LstmConfig::new(EMB_FEATURE_SIZE, h1, true).init(device),
            lstm2: LstmConfig::new(h1, h2, true).init(device),
            recurrent_dropout: DropoutConfig::new(self.recurrent_dropout).init(),
            hidden: LinearConfig::new(h2, self.head_hidden).init(device),
            head_dropout: DropoutConfig::new(self.head_dropout).init(),
            output: LinearConfig::new(self.head_hidden, 1).init(device),
        }
    }
}

/// Convolutional embedding over a window of mel frames
#[derive(Module, Debug)]
pub struct EmbeddingNet<B: Backend> {
    conv1: Conv2d<B>,
    pool1: MaxPool2d,
    conv2: Conv2d<B>,
    pool2: MaxPool2d,
    conv3: Conv2d<B>,
    global_pool: AdaptiveAvgPool2d,
    hidden: Linear<B>,
    dropout: Dropout,
    output: Linear<B>,
}

impl<B: Backend> EmbeddingNet<B> {
    /// `[B, 76, 32, 1]` frames to `[B, 1, 1, 96]` embedding in (-1, 1)
    pub fn forward(&self, frames: Tensor<B, 4>) -> Tensor<B, 4> {
        let batch = frames.dims()[0];

        // Channels-last in, channels-first for the convolutions
        let x = frames.permute([0, 3, 1, 2]);
        let x = self.pool1.forward(relu(self.conv1.forward(x)));
        let x = self.pool2.forward(relu(self.conv2.forward(x)));
        let x = relu(self.conv3.forward(x));

        let x = self.global_pool.forward(x);
        let channels = x.dims()[1];
        let x = x.reshape([batch, channels]);

        let x = self.dropout.forward(relu(self.hidden.forward(x)));
        let x = self.output.forward(x).tanh();
        x.reshape([batch, 1, 1, EMB_FEATURE_SIZE])
    }
}

/// Recurrent classifier over a sequence of embeddings
#[derive(Module, Debug)]
pub struct WakeNet<B: Backend> {
    lstm1: Lstm<B>,
    lstm2: Lstm<B>,
    recurrent_dropout: Dropout,
    hidden: Linear<B>,
    head_dropout: Dropout,
    output: Linear<B>,
}

impl<B: Backend> WakeNet<B> {
    /// `[B, 16, 96]` embeddings to `[B, 1]` logits
    pub fn forward(&self, embeddings: Tensor<B, 3>) -> Tensor<B, 2> {
        let (x, _) = self.lstm1.forward(embeddings, None);
        let x = self.recurrent_dropout.forward(x);

        let (x, _) = self.lstm2.forward(x, None);
        let [batch, steps, width] = x.dims();
        let last = x.narrow(1, steps - 1, 1).reshape([batch, width]);
        let last = self.recurrent_dropout.forward(last);

        let x = self.head_dropout.forward(relu(self.hidden.forward(last)));
        self.output.forward(x)
    }

    /// Wake probability per sequence
    pub fn predict(&self, embeddings: Tensor<B, 3>) -> Tensor<B, 2> {
        sigmoid(self.forward(embeddings))
    }
}

/// Embedding and wake networks trained together on extracted features
#[derive(Module, Debug)]
pub struct WakeWordModel<B: Backend> {
    pub embedding: EmbeddingNet<B>,
    pub wake: WakeNet<B>,
}

impl<B: Backend> WakeWordModel<B> {
    /// `[B, 5, 32]` features to `[B, 1]` logits.
    ///
    /// The frames are zero-padded to the embedding window and the single
    /// embedding is repeated to fill the wake network's sequence.
    pub fn forward(&self, features: Tensor<B, 3>) -> Tensor<B, 2> {
        let [batch, frames, bins] = features.dims();
        let device = features.device();

        let window = if frames < EMB_INPUT_COUNT {
            let padding = Tensor::zeros([batch, EMB_INPUT_COUNT - frames, bins], &device);
            Tensor::cat(vec![features, padding], 1)
        } else {
            features.narrow(1, 0, EMB_INPUT_COUNT)
        };

        let embedding = self
            .embedding
            .forward(window.reshape([batch, EMB_INPUT_COUNT, bins, 1]));
        let sequence = embedding
            .reshape([batch, 1, EMB_FEATURE_SIZE])
            .repeat_dim(1, WAKE_INPUT_COUNT);

        self.wake.forward(sequence)
    }

    pub fn predict(&self, features: Tensor<B, 3>) -> Tensor<B, 2> {
        sigmoid(self.forward(features))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_frontend_shape() {
        let device = Default::default();
        let frontend = MelFrontend::<TestBackend>::new(&device);
        let out = frontend.forward(Tensor::zeros([2, MEL_INPUT_COUNT], &device));
        assert_eq!(out.dims(), [2, MEL_OUTPUT_COUNT, MEL_FEATURE_SIZE]);
    }

    #[test]
    fn test_embedding_shape_and_range() {
        let device = Default::default();
        let net = WakeWordModelConfig::default().init_embedding::<TestBackend>(&device);
        let input = Tensor::ones([3, EMB_INPUT_COUNT, MEL_FEATURE_SIZE, 1], &device);

        let out = net.forward(input);
        assert_eq!(out.dims(), [3, 1, 1, EMB_FEATURE_SIZE]);

        let values = out.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn test_wake_shape() {
        let device = Default::default();
        let net = WakeWordModelConfig::default().init_wake::<TestBackend>(&device);
        let input = Tensor::zeros([4, WAKE_INPUT_COUNT, EMB_FEATURE_SIZE], &device);

        let probs = net.predict(input);
        assert_eq!(probs.dims(), [4, 1]);

        let values = probs.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_end_to_end_shape() {
        let device = Default::default();
        let model = WakeWordModelConfig::default().init::<TestBackend>(&device);
        let features = Tensor::zeros([2, MEL_OUTPUT_COUNT, MEL_FEATURE_SIZE], &device);
        assert_eq!(model.forward(features).dims(), [2, 1]);
    }
}
