//! Training loop implementation.

use super::TrainingConfig;
use super::metrics::{EpochMetrics, History, OutputMetrics, check_inputs, count_correct};
use crate::arena::LayerArena;
use crate::data::{Dataset, one_hot};
use crate::errors::ModelError;
use crate::graph::CompiledModel;
use burn::{
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{ElementConversion, Tensor, backend::AutodiffBackend},
};

/// Training result containing the updated arena and metrics.
#[derive(Debug)]
pub struct TrainingResult<B: AutodiffBackend> {
    /// The arena after training. Every graph compiled against it sees the
    /// updated layers.
    pub arena: LayerArena<B>,
    /// Loss and accuracy values per epoch.
    pub history: History,
}

/// Trains every output of a model jointly using the Adam optimizer.
///
/// `labels` holds one label vector per graph output (see
/// [`replicate_labels`](crate::data::replicate_labels)). Each step sums the
/// weighted per-output losses and backpropagates once through all branches
/// and the shared layers. Only layers on the model's path receive updates;
/// layers named in `frozen_layers` keep their parameters.
pub fn train<B: AutodiffBackend>(
    arena: LayerArena<B>,
    model: &CompiledModel,
    dataset: &Dataset,
    labels: &[Vec<usize>],
    config: &TrainingConfig,
    device: &B::Device,
) -> Result<TrainingResult<B>, ModelError> {
    check_inputs(model, dataset, labels)?;
    config.validate()?;
    let weights = config.weights_for(model.num_outputs())?;
    arena.ensure_compiled(model)?;
    let frozen = model.resolve(&config.frozen_layers)?;

    let num_samples = dataset.len();
    let num_outputs = model.num_outputs();
    let feature_size = dataset.sample_size();
    let output_sizes = model.output_sizes();

    let input_tensor = dataset.to_tensor::<B>(device);
    let target_tensors = labels
        .iter()
        .zip(&output_sizes)
        .map(|(labels, &classes)| one_hot::<B>(labels, classes, device))
        .collect::<Result<Vec<_>, _>>()?;

    // Initialize optimizer
    let optimizer_config = AdamConfig::new();
    let mut optimizer = optimizer_config.init();

    let mut current_arena = arena;
    let mut history = History::default();

    for epoch in 0..config.epochs {
        let mut total_loss = 0.0f32;
        let mut output_loss = vec![0.0f32; num_outputs];
        let mut output_correct = vec![0usize; num_outputs];

        let mut start = 0;
        while start < num_samples {
            let end = (start + config.batch_size).min(num_samples);
            let batch = (end - start) as f32;

            // Forward pass
            let inputs = input_tensor.clone().slice([start..end, 0..feature_size]);
            let predictions = current_arena.forward_with_frozen(model, vec![inputs], &frozen);

            // Compute per-output losses
            let mut losses = Vec::with_capacity(num_outputs);
            for (index, prediction) in predictions.into_iter().enumerate() {
                let targets = target_tensors[index]
                    .clone()
                    .slice([start..end, 0..output_sizes[index]]);
                output_correct[index] += count_correct(&prediction, &labels[index][start..end])?;

                let loss = config.loss.compute(prediction, targets);
                let loss_value: f32 = loss.clone().into_scalar().elem();
                output_loss[index] += loss_value * batch;
                losses.push(loss.mul_scalar(weights[index]));
            }
            let loss = Tensor::cat(losses, 0).sum();
            let loss_value: f32 = loss.clone().into_scalar().elem();
            total_loss += loss_value * batch;

            // Backward pass
            let grads = loss.backward();
            let mut grads_params = GradientsParams::from_grads(grads, &current_arena);
            current_arena.freeze_grads(&frozen, &mut grads_params);

            // Update arena parameters
            current_arena = optimizer.step(config.learning_rate, current_arena, grads_params);
            start = end;
        }

        let denominator = num_samples as f32;
        let metrics = EpochMetrics {
            loss: total_loss / denominator,
            outputs: output_loss
                .iter()
                .zip(&output_correct)
                .map(|(&loss, &correct)| OutputMetrics {
                    loss: loss / denominator,
                    accuracy: correct as f32 / denominator,
                })
                .collect(),
        };

        if config.verbose && (epoch % 10 == 0 || epoch == config.epochs - 1) {
            log::info!(
                "Epoch {}/{}: loss = {:.6}",
                epoch + 1,
                config.epochs,
                metrics.loss
            );
        }
        for (index, output) in metrics.outputs.iter().enumerate() {
            log::debug!(
                "Epoch {} output {}: loss = {:.6}, accuracy = {:.4}",
                epoch + 1,
                index,
                output.loss,
                output.accuracy
            );
        }

        history.epochs.push(metrics);
    }

    Ok(TrainingResult {
        arena: current_arena,
        history,
    })
}
