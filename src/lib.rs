//! # ARIANNA BODY
//!
//! A small in-memory inference and online-adaptation engine.
//!
//! ## Components
//!
//! 1. **Kernels** — dot, mat-vec (plain and transposed), stable softmax, axpy
//! 2. **Lung** — bidirectional multi-head attention over a token context,
//!    modulated by resonance, presence and a temporal bias
//! 3. **Low-rank adapter** — a LoRA pair trained by a gradient-free
//!    notch-step instead of backpropagation
//! 4. **Field DSL** — line-oriented script that sets the control scalars
//! 5. **Breath loop** — forward pass, adapter re-ranking, experience step and
//!    periodic composition of the adapter into the lung
//!
//! Every instance owns its buffers; nothing is shared or locked. Callers that
//! touch one instance from several threads must serialise access themselves.

pub mod core;
pub mod dsl;
pub mod error;
pub mod kernels;
pub mod learning;
pub mod runtime;

pub use error::{BodyError, Result};

/// Model-wide constants.
pub mod config {
    /// Resonance modulation strength on attention scores.
    pub const RESONANCE_ATTENTION_COUPLING: f32 = 0.3;

    /// Presence modulation strength on logits.
    pub const PRESENCE_LOGIT_COUPLING: f32 = 0.15;

    /// Per-forward multiplicative decay of the presence accumulator.
    pub const PRESENCE_DECAY: f32 = 0.98;

    /// Presence added per occurrence of a token in the context.
    pub const PRESENCE_INCREMENT: f32 = 0.1;

    /// Strength of the prophecy / retrodiction bias on attention scores.
    pub const TEMPORAL_BIAS_STRENGTH: f32 = 0.1;

    /// Focus multiplier: `FOCUS_SCALE_MIN + FOCUS_SCALE_RANGE * focus`.
    pub const FOCUS_SCALE_MIN: f32 = 0.25;
    pub const FOCUS_SCALE_RANGE: f32 = 1.75;

    /// Spread divisor: `max(SPREAD_SCALE_MIN + SPREAD_SCALE_RANGE * spread, SPREAD_SCALE_MIN)`.
    pub const SPREAD_SCALE_MIN: f32 = 0.15;
    pub const SPREAD_SCALE_RANGE: f32 = 2.0;

    /// Half-width of the uniform weight initialisation.
    pub const INIT_SCALE: f32 = 0.08;

    /// Default attention controls.
    pub const DEFAULT_FOCUS: f32 = 0.70;
    pub const DEFAULT_SPREAD: f32 = 0.20;
    pub const DEFAULT_TEMPORAL_ALPHA: f32 = 0.5;

    /// Seed used when none is configured.
    pub const DEFAULT_SEED: u64 = 12345;

    /// Base of the sinusoidal positional encoding.
    pub const POSITIONAL_BASE: f32 = 10_000.0;

    /// Probabilities at or below this are skipped in the entropy sum.
    pub const ENTROPY_EPS: f32 = 1e-12;

    /// Output projections at least this wide run on the rayon pool.
    pub const PARALLEL_VOCAB_THRESHOLD: usize = 4096;

    /// Upper bound on adapter per-step decay.
    pub const MAX_ADAPTER_DECAY: f32 = 0.999;

    /// Std-dev of the exploration noise mixed into the notch-step projection.
    pub const NOTCH_EXPLORATION: f32 = 0.1;

    /// Length of the flat adapter parameter export.
    pub const ADAPTER_PARAMS_LEN: usize = 7;

    /// Length of the flat field-state snapshot.
    pub const FIELD_SNAPSHOT_LEN: usize = 13;

    /// Clamp into [0, 1]; NaN maps to 0.
    pub fn clamp01(x: f32) -> f32 {
        if x.is_nan() {
            0.0
        } else {
            x.clamp(0.0, 1.0)
        }
    }
}
