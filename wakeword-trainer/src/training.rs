/// Training loop
///
/// Adam over binary cross-entropy on logits, with the learning rate halved
/// when validation loss plateaus and training stopped once it stops
/// improving. The weights of the best validation epoch are returned.

use crate::dataset::{DatasetError, LabeledFeatures};
use crate::features::{MEL_FEATURE_SIZE, MEL_OUTPUT_COUNT};
use crate::model::{WakeWordModel, WakeWordModelConfig};
use burn::module::{AutodiffModule, Module};
use burn::nn::loss::BinaryCrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Int, Tensor, TensorData};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

/// Probability above which a clip counts as a wake word
pub const DECISION_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("Invalid training configuration: {0}")]
    InvalidConfig(String),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("{0} set is empty")]
    EmptySet(&'static str),

    #[error("Tensor conversion failed: {0}")]
    Tensor(String),
}

/// Optimisation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,

    /// Held-out fraction when no validation directory is given
    pub validation_split: f64,

    /// Epochs without improvement before stopping
    pub early_stopping_patience: usize,

    /// Epochs without improvement before decaying the learning rate
    pub lr_patience: usize,
    pub lr_factor: f64,
    pub min_lr: f64,

    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 32,
            learning_rate: 1e-3,
            validation_split: 0.2,
            early_stopping_patience: 10,
            lr_patience: 5,
            lr_factor: 0.5,
            min_lr: 1e-6,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), TrainError> {
        if self.epochs == 0 {
            return Err(TrainError::InvalidConfig("epochs must be at least 1".into()));
        }

        if self.batch_size == 0 {
            return Err(TrainError::InvalidConfig(
                "batch_size must be at least 1".into(),
            ));
        }

        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(TrainError::InvalidConfig(format!(
                "learning_rate {} must be positive",
                self.learning_rate
            )));
        }

        if !(self.validation_split > 0.0 && self.validation_split < 1.0) {
            return Err(TrainError::InvalidConfig(format!(
                "validation_split {} must be in (0, 1)",
                self.validation_split
            )));
        }

        if !(self.lr_factor > 0.0 && self.lr_factor < 1.0) {
            return Err(TrainError::InvalidConfig(format!(
                "lr_factor {} must be in (0, 1)",
                self.lr_factor
            )));
        }

        if self.min_lr < 0.0 || self.min_lr > self.learning_rate {
            return Err(TrainError::InvalidConfig(format!(
                "min_lr {} must be in [0, learning_rate]",
                self.min_lr
            )));
        }

        Ok(())
    }
}

/// Loss and thresholded classification metrics
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BinaryMetrics {
    pub loss: f64,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
}

impl BinaryMetrics {
    /// Metrics from raw logits against 0/1 labels
    pub fn from_logits(logits: &[f32], labels: &[u8]) -> Self {
        if logits.is_empty() {
            return Self::default();
        }

        let (mut tp, mut fp, mut fn_, mut correct) = (0usize, 0usize, 0usize, 0usize);
        let mut loss = 0.0f64;

        for (&logit, &label) in logits.iter().zip(labels) {
            let x = logit as f64;
            let y = label as f64;
            // Numerically stable BCE on logits
            loss += x.max(0.0) - x * y + (-x.abs()).exp().ln_1p();

            let predicted = sigmoid(logit) > DECISION_THRESHOLD;
            let actual = label == 1;
            match (predicted, actual) {
                (true, true) => tp += 1,
                (true, false) => fp += 1,
                (false, true) => fn_ += 1,
                (false, false) => {}
            }
            if predicted == actual {
                correct += 1;
            }
        }

        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };

        Self {
            loss: loss / logits.len() as f64,
            accuracy: ratio(correct, logits.len()),
            precision: ratio(tp, tp + fp),
            recall: ratio(tp, tp + fn_),
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// One line of training history
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub history: Vec<EpochRecord>,
    pub best_epoch: usize,
    pub stopped_early: bool,
    pub train_samples: usize,
    pub val_samples: usize,

    /// Best weights on the validation set
    pub validation: BinaryMetrics,

    /// Best weights on the test set, when one was given
    pub test: Option<BinaryMetrics>,

    pub training_secs: f64,
}

/// Stack a subset of the features into a `[n, 5, 32]` batch with `[n, 1]` labels
pub fn batch_tensors<B: Backend>(
    data: &LabeledFeatures,
    indices: &[usize],
    device: &B::Device,
) -> (Tensor<B, 3>, Tensor<B, 2, Int>) {
    let n = indices.len();
    let mut flat = Vec::with_capacity(n * MEL_OUTPUT_COUNT * MEL_FEATURE_SIZE);
    for &i in indices {
        flat.extend_from_slice(data.features[i].as_slice());
    }

    let labels: Vec<i64> = indices.iter().map(|&i| data.labels[i] as i64).collect();

    (
        Tensor::from_data(
            TensorData::new(flat, [n, MEL_OUTPUT_COUNT, MEL_FEATURE_SIZE]),
            device,
        ),
        Tensor::from_data(TensorData::new(labels, [n, 1]), device),
    )
}

/// Run `model` over `data` in batches and score it
pub fn evaluate<B: Backend>(
    model: &WakeWordModel<B>,
    data: &LabeledFeatures,
    batch_size: usize,
    device: &B::Device,
) -> Result<BinaryMetrics, TrainError> {
    let indices: Vec<usize> = (0..data.len()).collect();
    let mut logits = Vec::with_capacity(data.len());

    for chunk in indices.chunks(batch_size.max(1)) {
        let (features, _) = batch_tensors::<B>(data, chunk, device);
        let output = model
            .forward(features)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| TrainError::Tensor(format!("{:?}", e)))?;
        logits.extend(output);
    }

    Ok(BinaryMetrics::from_logits(&logits, &data.labels))
}

/// Fits a [`WakeWordModel`] on an autodiff backend
pub struct Trainer<B: AutodiffBackend> {
    config: TrainingConfig,
    model_config: WakeWordModelConfig,
    device: B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(
        config: TrainingConfig,
        model_config: WakeWordModelConfig,
        device: B::Device,
    ) -> Result<Self, TrainError> {
        config.validate()?;
        Ok(Self {
            config,
            model_config,
            device,
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train on `data`, validating on `val` or a held-out share of `data`.
    ///
    /// Returns the inference copy of the best model.
    pub fn train(
        &self,
        data: &LabeledFeatures,
        val: Option<&LabeledFeatures>,
        test: Option<&LabeledFeatures>,
    ) -> Result<(WakeWordModel<B::InnerBackend>, TrainingReport), TrainError> {
        data.ensure_trainable()?;

        let (train, val) = match val {
            Some(val) => (data.clone(), val.clone()),
            None => {
                let mut rng = StdRng::seed_from_u64(self.config.seed);
                data.shuffle_split(self.config.validation_split, &mut rng)
            }
        };

        let start = Instant::now();
        let (model, mut report) = self.fit(&train, &val)?;
        let model = model.valid();

        report.validation = evaluate(&model, &val, self.config.batch_size, &self.device)?;
        report.test = match test {
            Some(test) if !test.is_empty() => Some(evaluate(
                &model,
                test,
                self.config.batch_size,
                &self.device,
            )?),
            _ => None,
        };
        report.training_secs = start.elapsed().as_secs_f64();

        info!(
            "Validation: loss {:.4}, accuracy {:.4}, precision {:.4}, recall {:.4}",
            report.validation.loss,
            report.validation.accuracy,
            report.validation.precision,
            report.validation.recall
        );
        if let Some(test) = &report.test {
            info!(
                "Test: loss {:.4}, accuracy {:.4}, precision {:.4}, recall {:.4}",
                test.loss, test.accuracy, test.precision, test.recall
            );
        }

        Ok((model, report))
    }

    /// Epoch loop with plateau decay, early stopping and best-weights restore
    pub fn fit(
        &self,
        train: &LabeledFeatures,
        val: &LabeledFeatures,
    ) -> Result<(WakeWordModel<B>, TrainingReport), TrainError> {
        if train.is_empty() {
            return Err(TrainError::EmptySet("Training"));
        }
        if val.is_empty() {
            return Err(TrainError::EmptySet("Validation"));
        }

        let cfg = &self.config;
        B::seed(&self.device, cfg.seed);

        let mut model = self.model_config.init::<B>(&self.device);
        let mut optim = AdamConfig::new().init();
        let loss_fn = BinaryCrossEntropyLossConfig::new()
            .with_logits(true)
            .init(&self.device);
        let mut rng = StdRng::seed_from_u64(cfg.seed);

        info!(
            "Training on {} samples, validating on {} ({} parameters)",
            train.len(),
            val.len(),
            model.num_params()
        );

        let mut lr = cfg.learning_rate;
        let mut history = Vec::with_capacity(cfg.epochs);
        let mut best: Option<(f64, usize, WakeWordModel<B>)> = None;
        let mut since_best = 0;
        let mut since_decay = 0;
        let mut stopped_early = false;

        for epoch in 1..=cfg.epochs {
            let mut order: Vec<usize> = (0..train.len()).collect();
            order.shuffle(&mut rng);

            let mut loss_sum = 0.0;
            for chunk in order.chunks(cfg.batch_size) {
                let (features, targets) = batch_tensors::<B>(train, chunk, &self.device);
                let loss = loss_fn.forward(model.forward(features), targets);
                loss_sum += loss.clone().into_scalar().elem::<f64>() * chunk.len() as f64;

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optim.step(lr, model, grads);
            }
            let train_loss = loss_sum / train.len() as f64;

            let metrics = evaluate(&model.valid(), val, cfg.batch_size, &self.device)?;
            history.push(EpochRecord {
                epoch,
                train_loss,
                val_loss: metrics.loss,
                val_accuracy: metrics.accuracy,
                learning_rate: lr,
            });
            info!(
                "Epoch {}/{}: loss {:.4}, val_loss {:.4}, val_accuracy {:.4}, lr {:.2e}",
                epoch, cfg.epochs, train_loss, metrics.loss, metrics.accuracy, lr
            );

            let improved = best
                .as_ref()
                .map(|(best_loss, _, _)| metrics.loss < *best_loss)
                .unwrap_or(true);

            if improved {
                best = Some((metrics.loss, epoch, model.clone()));
                since_best = 0;
                since_decay = 0;
                continue;
            }

            since_best += 1;
            since_decay += 1;

            if since_decay >= cfg.lr_patience && lr > cfg.min_lr {
                lr = (lr * cfg.lr_factor).max(cfg.min_lr);
                since_decay = 0;
                info!("Validation loss plateaued, learning rate reduced to {:.2e}", lr);
            }

            if since_best >= cfg.early_stopping_patience {
                info!("Early stopping after epoch {}", epoch);
                stopped_early = true;
                break;
            }
        }

        let (best_epoch, model) = match best {
            Some((_, epoch, best_model)) => {
                debug!("Restoring weights from epoch {}", epoch);
                (epoch, best_model)
            }
            None => (history.len(), model),
        };

        let report = TrainingReport {
            history,
            best_epoch,
            stopped_early,
            train_samples: train.len(),
            val_samples: val.len(),
            validation: BinaryMetrics::default(),
            test: None,
            training_secs: 0.0,
        };

        Ok((model, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureMatrix;
    use approx::assert_relative_eq;
    use burn::backend::{Autodiff, NdArray};
    use std::path::PathBuf;

    type TestBackend = Autodiff<NdArray>;

    /// Positives carry a constant bright frame pattern, negatives a dark one
    fn separable(positive: usize, negative: usize) -> LabeledFeatures {
        let mut set = LabeledFeatures::default();
        for i in 0..positive + negative {
            let label = if i < positive { 1 } else { 0 };
            let value = if label == 1 { 0.8 } else { -0.8 };
            let features = FeatureMatrix::from_vec(
                vec![value; MEL_OUTPUT_COUNT * MEL_FEATURE_SIZE],
                MEL_OUTPUT_COUNT,
                MEL_FEATURE_SIZE,
            )
            .unwrap();
            set.push(features, label, PathBuf::from(format!("{}.wav", i)));
        }
        set
    }

    #[test]
    fn test_metrics_from_logits() {
        // Predictions: 1, 1, 0, 0 against labels 1, 0, 1, 0
        let metrics = BinaryMetrics::from_logits(&[3.0, 2.0, -2.0, -3.0], &[1, 0, 1, 0]);
        assert_relative_eq!(metrics.accuracy, 0.5);
        assert_relative_eq!(metrics.precision, 0.5);
        assert_relative_eq!(metrics.recall, 0.5);

        // Zero logit: loss is ln 2 whatever the label
        let metrics = BinaryMetrics::from_logits(&[0.0, 0.0], &[1, 0]);
        assert_relative_eq!(metrics.loss, std::f64::consts::LN_2, epsilon = 1e-9);
    }

    #[test]
    fn test_metrics_without_positive_predictions() {
        let metrics = BinaryMetrics::from_logits(&[-5.0, -5.0], &[1, 0]);
        assert_relative_eq!(metrics.precision, 0.0);
        assert_relative_eq!(metrics.recall, 0.0);
        assert_relative_eq!(metrics.accuracy, 0.5);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = TrainingConfig::default();
        assert!(config.validate().is_ok());

        config.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = TrainingConfig::default();
        config.validation_split = 1.0;
        assert!(config.validate().is_err());

        let mut config = TrainingConfig::default();
        config.min_lr = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_insufficient_data() {
        let trainer = Trainer::<TestBackend>::new(
            TrainingConfig::default(),
            WakeWordModelConfig::default(),
            Default::default(),
        )
        .unwrap();

        let result = trainer.train(&separable(5, 40), None, None);
        assert!(matches!(
            result,
            Err(TrainError::Dataset(DatasetError::InsufficientData { .. }))
        ));
    }

    #[test]
    fn test_training_learns_separable_data() {
        let config = TrainingConfig {
            epochs: 15,
            batch_size: 8,
            ..TrainingConfig::default()
        };
        let trainer =
            Trainer::<TestBackend>::new(config, WakeWordModelConfig::default(), Default::default())
                .unwrap();

        let data = separable(12, 24);
        let (model, report) = trainer.train(&data, None, Some(&data)).unwrap();

        assert!(!report.history.is_empty());
        assert!(report.best_epoch >= 1 && report.best_epoch <= report.history.len());
        assert_eq!(report.train_samples + report.val_samples, 36);
        assert!(report.validation.accuracy > 0.5);
        assert!(report.test.is_some());

        let best = report.history[report.best_epoch - 1].val_loss;
        assert!(report.history.iter().all(|r| r.val_loss >= best));

        // Restored weights reproduce the best epoch's validation loss
        let (_, val) = data.shuffle_split(0.2, &mut StdRng::seed_from_u64(42));
        let rescored = evaluate(&model, &val, 8, &Default::default()).unwrap();
        assert_relative_eq!(rescored.loss, best, epsilon = 1e-4);
    }
}
