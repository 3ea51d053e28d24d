//! Unit-normalized embedding vectors.

use crate::{Result, VectorError};
use serde::{Deserialize, Serialize};

/// A fixed-dimension embedding vector, normalized to unit length.
///
/// Embeddings are produced by an external model and handed to the engine as
/// raw `f32` slices; [`Embedding::normalized`] validates them (finite
/// components, non-zero norm) and scales them to unit length once, at
/// ingestion. All similarity math downstream is then a plain dot product.
///
/// An embedding is immutable after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Validate and unit-normalize raw components.
    ///
    /// # Errors
    ///
    /// Returns `InvalidVector` when the input is empty, contains NaN/Inf,
    /// or has (near-)zero norm.
    pub fn normalized(mut components: Vec<f32>) -> Result<Self> {
        if components.is_empty() {
            return Err(VectorError::InvalidVector("empty vector".to_string()));
        }

        for (i, &v) in components.iter().enumerate() {
            if v.is_nan() {
                return Err(VectorError::InvalidVector(format!("NaN at index {}", i)));
            }
            if v.is_infinite() {
                return Err(VectorError::InvalidVector(format!("Inf at index {}", i)));
            }
        }

        let norm = components.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm < f32::EPSILON {
            return Err(VectorError::InvalidVector("zero-norm vector".to_string()));
        }

        for v in components.iter_mut() {
            *v /= norm;
        }

        Ok(Self(components))
    }

    /// Vector dimension.
    pub fn dim(&self) -> usize {
        self.0.len()
    }

    /// Components as a slice.
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Check the dimension against an expected value.
    pub fn check_dim(&self, expected: usize) -> Result<()> {
        if self.dim() != expected {
            return Err(VectorError::DimensionMismatch {
                expected,
                actual: self.dim(),
            });
        }
        Ok(())
    }
}

impl AsRef<[f32]> for Embedding {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}
