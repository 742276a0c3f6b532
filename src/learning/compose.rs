//! Folding an adapter's delta into the lung's weights.
//!
//! The adapter and the lung never reference each other; composition reads the
//! adapter's delta and adds it into a weight buffer the lung exposes.

use crate::core::LungModel;
use crate::error::{BodyError, Result};
use crate::learning::lora::LowRankAdapter;

/// `W_o += weight · Δᵀ` for an adapter mapping hidden (`d_model`) to logits
/// (`vocab_size`).
pub fn compose_output_projection(lung: &mut LungModel, adapter: &LowRankAdapter, weight: f32) -> Result<()> {
    let expected = (lung.d_model(), lung.vocab_size());
    let got = (adapter.in_dim(), adapter.out_dim());
    if expected != got {
        return Err(BodyError::DimensionMismatch { expected, got });
    }

    let delta = adapter.delta_matrix();
    lung.output_weights_mut().scaled_add(weight, &delta.t());
    tracing::debug!(weight, norm = adapter.product_norm(), "composed into output projection");
    Ok(())
}

/// `E += weight · Δᵀ` for an adapter mapping a one-hot token (`vocab_size`)
/// to an embedding offset (`d_model`).
pub fn compose_embeddings(lung: &mut LungModel, adapter: &LowRankAdapter, weight: f32) -> Result<()> {
    let expected = (lung.vocab_size(), lung.d_model());
    let got = (adapter.in_dim(), adapter.out_dim());
    if expected != got {
        return Err(BodyError::DimensionMismatch { expected, got });
    }

    let delta = adapter.delta_matrix();
    lung.embeddings_mut().scaled_add(weight, &delta.t());
    tracing::debug!(weight, norm = adapter.product_norm(), "composed into embeddings");
    Ok(())
}
