//! Appearance embedding vectors.

use ndarray::Array1;

use crate::error::IndexError;

/// Fixed-dimension appearance descriptor of a person crop.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector(Array1<f32>);

impl EmbeddingVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(Array1::from_vec(values))
    }

    pub fn from_array(values: Array1<f32>) -> Self {
        Self(values)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_array(&self) -> &Array1<f32> {
        &self.0
    }

    pub fn norm(&self) -> f32 {
        self.0.dot(&self.0).sqrt()
    }

    /// Check dimension and numeric sanity, returning the unit-length copy.
    pub fn normalized(&self, expected_dim: usize) -> Result<EmbeddingVector, IndexError> {
        if self.dim() != expected_dim {
            return Err(IndexError::DimensionMismatch {
                expected: expected_dim,
                got: self.dim(),
            });
        }
        if self.0.iter().any(|v| !v.is_finite()) {
            return Err(IndexError::NonFinite);
        }
        let norm = self.norm();
        if norm <= f32::EPSILON {
            return Err(IndexError::ZeroNorm);
        }
        Ok(Self(&self.0 / norm))
    }

    /// Cosine similarity in [-1, 1]; zero when either side has zero norm.
    pub fn cosine_similarity(&self, other: &EmbeddingVector) -> f32 {
        if self.dim() != other.dim() {
            return 0.0;
        }
        let denom = self.norm() * other.norm();
        if denom <= f32::EPSILON {
            return 0.0;
        }
        (self.0.dot(&other.0) / denom).clamp(-1.0, 1.0)
    }

    /// Dot product; equals cosine similarity when both sides are unit length.
    pub(crate) fn dot(&self, other: &EmbeddingVector) -> f32 {
        self.0.dot(&other.0)
    }

    /// `momentum * self + (1 - momentum) * other`, re-normalised.
    ///
    /// Falls back to `other` when the blend cancels out.
    pub(crate) fn blend(&self, other: &EmbeddingVector, momentum: f32) -> EmbeddingVector {
        let mixed = &self.0 * momentum + &other.0 * (1.0 - momentum);
        let norm = mixed.dot(&mixed).sqrt();
        if norm <= f32::EPSILON {
            other.clone()
        } else {
            Self(mixed / norm)
        }
    }
}

impl From<Vec<f32>> for EmbeddingVector {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_to_unit_length() {
        let v = EmbeddingVector::new(vec![3.0, 4.0]);
        let n = v.normalized(2).unwrap();
        assert!((n.norm() - 1.0).abs() < 1e-6);
        assert!((n.as_array()[0] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn rejects_bad_vectors() {
        assert_eq!(
            EmbeddingVector::new(vec![1.0, 0.0]).normalized(3),
            Err(IndexError::DimensionMismatch {
                expected: 3,
                got: 2
            })
        );
        assert_eq!(
            EmbeddingVector::new(vec![0.0, 0.0]).normalized(2),
            Err(IndexError::ZeroNorm)
        );
        assert_eq!(
            EmbeddingVector::new(vec![f32::NAN, 1.0]).normalized(2),
            Err(IndexError::NonFinite)
        );
    }

    #[test]
    fn cosine_similarity_range() {
        let a = EmbeddingVector::new(vec![1.0, 0.0]);
        let b = EmbeddingVector::new(vec![0.0, 2.0]);
        let c = EmbeddingVector::new(vec![-5.0, 0.0]);
        assert!((a.cosine_similarity(&a) - 1.0).abs() < 1e-6);
        assert!(a.cosine_similarity(&b).abs() < 1e-6);
        assert!((a.cosine_similarity(&c) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn blend_moves_toward_new_observation() {
        let old = EmbeddingVector::new(vec![1.0, 0.0]);
        let new = EmbeddingVector::new(vec![0.0, 1.0]);
        let mixed = old.blend(&new, 0.9);
        assert!((mixed.norm() - 1.0).abs() < 1e-6);
        assert!(mixed.as_array()[0] > mixed.as_array()[1]);
        assert!(mixed.as_array()[1] > 0.0);
    }
}
