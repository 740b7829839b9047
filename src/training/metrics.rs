//! Per-output metrics, held-out evaluation and training history.

use burn::tensor::{ElementConversion, Tensor, backend::Backend};
use serde::{Deserialize, Serialize};

use super::Loss;
use crate::arena::LayerArena;
use crate::data::{Dataset, one_hot};
use crate::errors::ModelError;
use crate::graph::CompiledModel;

/// Loss and accuracy of one graph output.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutputMetrics {
    pub loss: f32,
    /// Fraction of samples whose argmax matches the label.
    pub accuracy: f32,
}

/// Held-out metrics, one entry per graph output in output order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub outputs: Vec<OutputMetrics>,
}

impl Evaluation {
    /// Index of the output with the highest accuracy. Ties go to the lowest
    /// index; `None` for an empty evaluation.
    pub fn best_output(&self) -> Option<usize> {
        let mut best: Option<(usize, f32)> = None;
        for (index, metrics) in self.outputs.iter().enumerate() {
            match best {
                Some((_, accuracy)) if metrics.accuracy <= accuracy => {}
                _ => best = Some((index, metrics.accuracy)),
            }
        }
        best.map(|(index, _)| index)
    }

    /// Accuracies in output order.
    pub fn accuracies(&self) -> Vec<f32> {
        self.outputs.iter().map(|m| m.accuracy).collect()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

/// Metrics of one training epoch, averaged over samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Weighted sum of the per-output losses.
    pub loss: f32,
    pub outputs: Vec<OutputMetrics>,
}

/// Training history, one entry per epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub epochs: Vec<EpochMetrics>,
}

impl History {
    /// Total loss per epoch.
    pub fn total_losses(&self) -> Vec<f32> {
        self.epochs.iter().map(|e| e.loss).collect()
    }

    /// Loss of one output per epoch.
    pub fn output_losses(&self, output: usize) -> Vec<f32> {
        self.epochs
            .iter()
            .filter_map(|e| e.outputs.get(output).map(|m| m.loss))
            .collect()
    }

    /// Training accuracy of one output per epoch.
    pub fn output_accuracies(&self, output: usize) -> Vec<f32> {
        self.epochs
            .iter()
            .filter_map(|e| e.outputs.get(output).map(|m| m.accuracy))
            .collect()
    }

    /// Metrics of the last epoch, if any ran.
    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }
}

/// Evaluates every output of a model on a labelled dataset.
///
/// For a trained arena pass `arena.valid()` so normalization layers use
/// their running statistics.
pub fn evaluate<B: Backend>(
    arena: &LayerArena<B>,
    model: &CompiledModel,
    dataset: &Dataset,
    labels: &[Vec<usize>],
    loss: Loss,
    device: &B::Device,
) -> Result<Evaluation, ModelError> {
    check_inputs(model, dataset, labels)?;
    arena.ensure_compiled(model)?;

    let predictions = arena.forward_many(model, vec![dataset.to_tensor::<B>(device)]);
    let total = dataset.len() as f32;

    let mut outputs = Vec::with_capacity(predictions.len());
    for ((prediction, labels), classes) in predictions
        .into_iter()
        .zip(labels)
        .zip(model.output_sizes())
    {
        let correct = count_correct(&prediction, labels)?;
        let targets = one_hot::<B>(labels, classes, device)?;
        let loss_value: f32 = loss.compute(prediction, targets).into_scalar().elem();
        outputs.push(OutputMetrics {
            loss: loss_value,
            accuracy: correct as f32 / total,
        });
    }

    Ok(Evaluation { outputs })
}

/// Checks that a dataset and its label copies fit a model.
pub(crate) fn check_inputs(
    model: &CompiledModel,
    dataset: &Dataset,
    labels: &[Vec<usize>],
) -> Result<(), ModelError> {
    if labels.len() != model.num_outputs() {
        return Err(ModelError::LabelCountMismatch {
            expected: model.num_outputs(),
            actual: labels.len(),
        });
    }
    if dataset.is_empty() {
        return Err(ModelError::InvalidDataset {
            message: "dataset has no samples".to_string(),
        });
    }
    if dataset.sample_size() != model.feature_size() {
        return Err(ModelError::ShapeMismatch {
            expected: model.feature_size(),
            actual: dataset.sample_size(),
        });
    }
    if let Some(copy) = labels.iter().find(|copy| copy.len() != dataset.len()) {
        return Err(ModelError::InvalidDataset {
            message: format!(
                "label copy has {} entries for {} samples",
                copy.len(),
                dataset.len()
            ),
        });
    }
    Ok(())
}

/// Counts rows whose argmax equals the label.
pub(crate) fn count_correct<B: Backend>(
    predictions: &Tensor<B, 2>,
    labels: &[usize],
) -> Result<usize, ModelError> {
    let [_, classes] = predictions.dims();
    if classes == 0 {
        return Ok(0);
    }
    let values: Vec<f32> = predictions
        .to_data()
        .to_vec()
        .map_err(ModelError::tensor_data)?;
    Ok(values
        .chunks(classes)
        .zip(labels)
        .filter(|(row, label)| argmax(row) == **label)
        .count())
}

fn argmax(row: &[f32]) -> usize {
    let mut best = 0;
    for (index, value) in row.iter().enumerate() {
        if *value > row[best] {
            best = index;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{InputBuffer, ModelGraph, ops};
    use crate::layers::Activation;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn metrics(accuracy: f32) -> OutputMetrics {
        OutputMetrics {
            loss: 1.0,
            accuracy,
        }
    }

    #[test]
    fn test_best_output_prefers_lowest_index_on_tie() {
        let evaluation = Evaluation {
            outputs: vec![metrics(0.8), metrics(0.9), metrics(0.9), metrics(0.1)],
        };
        assert_eq!(evaluation.best_output(), Some(1));
        assert_eq!(Evaluation { outputs: vec![] }.best_output(), None);
    }

    #[test]
    fn test_count_correct() {
        let device = <TestBackend as Backend>::Device::default();
        let predictions = Tensor::<TestBackend, 2>::from_floats(
            [[0.1, 0.9], [0.8, 0.2], [0.3, 0.7]],
            &device,
        );
        assert_eq!(count_correct(&predictions, &[1, 1, 1]).unwrap(), 2);
    }

    #[test]
    fn test_history_accessors() {
        let history = History {
            epochs: vec![
                EpochMetrics {
                    loss: 2.0,
                    outputs: vec![metrics(0.5), metrics(0.25)],
                },
                EpochMetrics {
                    loss: 1.5,
                    outputs: vec![metrics(0.75), metrics(0.5)],
                },
            ],
        };
        assert_eq!(history.total_losses(), vec![2.0, 1.5]);
        assert_eq!(history.output_accuracies(1), vec![0.25, 0.5]);
        assert_eq!(history.output_losses(0), vec![1.0, 1.0]);
        assert!(history.output_accuracies(2).is_empty());
    }

    #[test]
    fn test_evaluate_reports_every_output() {
        let device = <TestBackend as Backend>::Device::default();
        let input = InputBuffer::new(2);
        let a = ops::dense(2, Activation::Softmax, input.buffer());
        let b = ops::dense(2, Activation::Softmax, input.buffer());
        let graph = ModelGraph::new(vec![input], vec![a, b]);
        let mut arena = LayerArena::<TestBackend>::new();
        let model = arena.compile(&graph, &device).unwrap();

        let dataset = Dataset::from_features(vec![0.0, 1.0, 1.0, 0.0], &[2], vec![0, 1]).unwrap();
        let labels = crate::data::replicate_labels(dataset.labels(), 2);
        let evaluation =
            evaluate(&arena, &model, &dataset, &labels, Loss::CategoricalCrossEntropy, &device)
                .unwrap();

        assert_eq!(evaluation.len(), 2);
        for output in &evaluation.outputs {
            assert!(output.loss.is_finite());
            assert!((0.0..=1.0).contains(&output.accuracy));
        }
    }

    #[test]
    fn test_evaluate_rejects_wrong_label_count() {
        let device = <TestBackend as Backend>::Device::default();
        let input = InputBuffer::new(2);
        let output = ops::dense(2, Activation::Softmax, input.buffer());
        let mut arena = LayerArena::<TestBackend>::new();
        let model = arena
            .compile(&ModelGraph::single(input, output), &device)
            .unwrap();
        let dataset = Dataset::from_features(vec![0.0, 1.0], &[2], vec![0]).unwrap();

        let result = evaluate(
            &arena,
            &model,
            &dataset,
            &[vec![0], vec![0]],
            Loss::Mse,
            &device,
        );
        assert!(matches!(
            result,
            Err(ModelError::LabelCountMismatch {
                expected: 1,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_evaluate_rejects_wrong_sample_size() {
        let device = <TestBackend as Backend>::Device::default();
        let input = InputBuffer::new(3);
        let output = ops::dense(2, Activation::Softmax, input.buffer());
        let mut arena = LayerArena::<TestBackend>::new();
        let model = arena
            .compile(&ModelGraph::single(input, output), &device)
            .unwrap();
        let dataset = Dataset::from_features(vec![0.0, 1.0], &[2], vec![0]).unwrap();

        let result = evaluate(&arena, &model, &dataset, &[vec![0]], Loss::Mse, &device);
        assert!(matches!(
            result,
            Err(ModelError::ShapeMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_evaluate_rejects_uncompiled_arena() {
        let device = <TestBackend as Backend>::Device::default();
        let input = InputBuffer::new(2);
        let output = ops::dense(2, Activation::Softmax, input.buffer());
        let mut trained = LayerArena::<TestBackend>::new();
        let model = trained
            .compile(&ModelGraph::single(input, output), &device)
            .unwrap();
        let dataset = Dataset::from_features(vec![0.0, 1.0], &[2], vec![0]).unwrap();

        let fresh = LayerArena::<TestBackend>::new();
        let result = evaluate(&fresh, &model, &dataset, &[vec![0]], Loss::Mse, &device);
        assert!(matches!(result, Err(ModelError::UnknownLayer { .. })));
    }
}
