//! Error type shared by the lung, the adapter and the composition helpers.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BodyError {
    #[error("invalid lung shape: {0}")]
    InvalidLungShape(String),

    #[error("d_model {d_model} is not divisible by n_heads {n_heads}")]
    HeadSplit { d_model: usize, n_heads: usize },

    #[error("invalid adapter shape: in_dim={in_dim}, out_dim={out_dim}, rank={rank}")]
    InvalidAdapterShape {
        in_dim: usize,
        out_dim: usize,
        rank: usize,
    },

    #[error("dimension mismatch: expected {expected:?}, got {got:?}")]
    DimensionMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("shape error: {0}")]
    Shape(String),
}

impl From<ndarray::ShapeError> for BodyError {
    fn from(e: ndarray::ShapeError) -> Self {
        Self::Shape(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BodyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = BodyError::HeadSplit {
            d_model: 10,
            n_heads: 3,
        };
        assert_eq!(e.to_string(), "d_model 10 is not divisible by n_heads 3");

        let e = BodyError::InvalidAdapterShape {
            in_dim: 0,
            out_dim: 8,
            rank: 2,
        };
        assert_eq!(
            e.to_string(),
            "invalid adapter shape: in_dim=0, out_dim=8, rank=2"
        );

        let e = BodyError::DimensionMismatch {
            expected: (4, 16),
            got: (16, 4),
        };
        assert_eq!(
            e.to_string(),
            "dimension mismatch: expected (4, 16), got (16, 4)"
        );
    }

    #[test]
    fn test_error_clone_eq() {
        let e1 = BodyError::InvalidLungShape("vocab_size must be positive".into());
        let e2 = e1.clone();
        assert_eq!(e1, e2);
    }
}
