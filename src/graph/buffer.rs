//! DataBuffer and InputBuffer - core graph node types.
//!
//! A `DataBuffer` is the symbolic output of a layer applied to one or more
//! upstream buffers. Buffers only carry structure; tensors flow through them
//! when a compiled graph is evaluated against a layer arena.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::operation::Operation;

/// Global counter for unique buffer IDs.
static BUFFER_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Unique identifier for a DataBuffer.
pub type BufferId = usize;

/// DataBuffer represents a node in the computation graph.
///
/// It tracks:
/// - The per-sample shape of the data (batch dimension excluded)
/// - The operation that produced it (if any)
/// - The input buffers used by that operation
#[derive(Clone, Debug)]
pub struct DataBuffer {
    id: BufferId,
    shape: Vec<usize>,
    producer: Option<Operation>,
    inputs: Vec<DataBuffer>,
}

impl DataBuffer {
    /// Creates a new DataBuffer with the given shape and producer.
    pub(crate) fn new(
        shape: Vec<usize>,
        producer: Option<Operation>,
        inputs: Vec<DataBuffer>,
    ) -> Self {
        Self {
            id: BUFFER_ID_COUNTER.fetch_add(1, Ordering::SeqCst),
            shape,
            producer,
            inputs,
        }
    }

    /// Returns the unique ID of this buffer.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Returns the per-sample shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of scalars per sample.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// Returns true if the buffer is a flat feature vector.
    pub fn is_flat(&self) -> bool {
        self.shape.len() == 1
    }

    /// Returns true if this is an input buffer (no producer).
    pub fn is_input(&self) -> bool {
        self.producer.is_none()
    }

    /// Returns the producer operation, if any.
    pub fn producer(&self) -> Option<&Operation> {
        self.producer.as_ref()
    }

    /// Returns the input buffers.
    pub fn inputs(&self) -> &[DataBuffer] {
        &self.inputs
    }
}

/// InputBuffer represents an input to the computation graph.
///
/// This is the entry point for data into the model.
#[derive(Clone, Debug)]
pub struct InputBuffer {
    buffer: DataBuffer,
}

impl InputBuffer {
    /// Creates a new flat InputBuffer with the given size.
    pub fn new(size: usize) -> Self {
        Self::with_shape(&[size])
    }

    /// Creates a new InputBuffer with a multi-dimensional per-sample shape,
    /// e.g. `[28, 28]` for grayscale images.
    pub fn with_shape(shape: &[usize]) -> Self {
        Self {
            buffer: DataBuffer::new(shape.to_vec(), None, vec![]),
        }
    }

    /// Returns the DataBuffer for use in graph building.
    pub fn buffer(&self) -> DataBuffer {
        self.buffer.clone()
    }

    /// Returns the per-sample shape of this input.
    pub fn shape(&self) -> &[usize] {
        self.buffer.shape()
    }

    /// Returns the number of scalars per sample.
    pub fn size(&self) -> usize {
        self.buffer.size()
    }

    /// Returns the buffer ID.
    pub fn id(&self) -> BufferId {
        self.buffer.id
    }
}
