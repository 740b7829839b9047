//! Training configuration.

use serde::{Deserialize, Serialize};

use super::Loss;
use crate::errors::ModelError;

/// Configuration for joint training of every graph output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Number of training epochs.
    pub epochs: usize,
    /// Learning rate for the optimizer.
    pub learning_rate: f64,
    /// Batch size for training.
    pub batch_size: usize,
    /// Loss function applied to every output.
    pub loss: Loss,
    /// Per-output loss weights; `None` sums the losses unweighted.
    pub loss_weights: Option<Vec<f32>>,
    /// Names of layers whose parameters are not updated.
    pub frozen_layers: Vec<String>,
    /// Whether to log progress during training.
    pub verbose: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            learning_rate: 0.001,
            batch_size: 32,
            loss: Loss::CategoricalCrossEntropy,
            loss_weights: None,
            frozen_layers: Vec::new(),
            verbose: true,
        }
    }
}

impl TrainingConfig {
    /// Creates a new TrainingConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sets the number of epochs.
    pub fn epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Sets the learning rate.
    pub fn learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    /// Sets the batch size.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the loss function.
    pub fn loss(mut self, loss: Loss) -> Self {
        self.loss = loss;
        self
    }

    /// Weights each output's loss in the total.
    pub fn loss_weights(mut self, weights: Vec<f32>) -> Self {
        self.loss_weights = Some(weights);
        self
    }

    /// Excludes the named layers from parameter updates.
    pub fn freeze<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.frozen_layers.extend(names.into_iter().map(Into::into));
        self
    }

    /// Sets whether to log progress.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Loss weights for a model with `outputs` outputs.
    pub fn weights_for(&self, outputs: usize) -> Result<Vec<f32>, ModelError> {
        match &self.loss_weights {
            None => Ok(vec![1.0; outputs]),
            Some(weights) if weights.len() == outputs => Ok(weights.clone()),
            Some(weights) => Err(ModelError::LossWeightCountMismatch {
                expected: outputs,
                actual: weights.len(),
            }),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ModelError> {
        if self.batch_size == 0 {
            return Err(ModelError::TrainingError {
                message: "batch size must be at least 1".to_string(),
            });
        }
        if !(self.learning_rate > 0.0) {
            return Err(ModelError::TrainingError {
                message: format!("learning rate must be positive, got {}", self.learning_rate),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TrainingConfig::default();
        assert_eq!(config.epochs, 10);
        assert!((config.learning_rate - 0.001).abs() < 1e-10);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.loss, Loss::CategoricalCrossEntropy);
    }

    #[test]
    fn test_config_builder() {
        let config = TrainingConfig::new()
            .epochs(50)
            .learning_rate(0.01)
            .batch_size(64)
            .loss(Loss::BinaryCrossEntropy)
            .freeze(["stem/dense_0"]);

        assert_eq!(config.epochs, 50);
        assert!((config.learning_rate - 0.01).abs() < 1e-10);
        assert_eq!(config.batch_size, 64);
        assert!(matches!(config.loss, Loss::BinaryCrossEntropy));
        assert_eq!(config.frozen_layers, vec!["stem/dense_0".to_string()]);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config =
            TrainingConfig::from_json(r#"{"epochs": 3, "loss": "mse", "loss_weights": [1.0, 0.5]}"#)
                .unwrap();

        assert_eq!(config.epochs, 3);
        assert_eq!(config.loss, Loss::Mse);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.weights_for(2).unwrap(), vec![1.0, 0.5]);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(matches!(
            TrainingConfig::from_json("{\"epochs\": \"many\"}"),
            Err(ModelError::SerializationError(_))
        ));
    }

    #[test]
    fn test_weights_for_mismatch() {
        let config = TrainingConfig::new().loss_weights(vec![1.0, 1.0]);
        assert!(matches!(
            config.weights_for(3),
            Err(ModelError::LossWeightCountMismatch {
                expected: 3,
                actual: 2
            })
        ));
        assert_eq!(TrainingConfig::new().weights_for(3).unwrap(), vec![1.0; 3]);
    }

    #[test]
    fn test_validate() {
        assert!(TrainingConfig::new().batch_size(0).validate().is_err());
        assert!(TrainingConfig::new().learning_rate(0.0).validate().is_err());
        assert!(TrainingConfig::new().validate().is_ok());
    }
}
