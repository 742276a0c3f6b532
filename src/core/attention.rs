//! Bidirectional attention heads.
//!
//! Differences from a standard decoder head:
//! 1. No causal mask — the query (built from the last position) scores every
//!    position, including ones "after" it in the active orientation.
//! 2. Scores are scaled by the resonance of the token at each position.
//! 3. A temporal bias shifts mass toward future or past positions.
//! 4. Focus multiplies and spread divides the score before softmax.

use ndarray::{Array1, Array3, ArrayView1, ArrayView2, Axis};
use rand::distributions::Distribution;
use rand::Rng;

use crate::config::{
    clamp01, DEFAULT_FOCUS, DEFAULT_SPREAD, DEFAULT_TEMPORAL_ALPHA, FOCUS_SCALE_MIN,
    FOCUS_SCALE_RANGE, RESONANCE_ATTENTION_COUPLING, SPREAD_SCALE_MIN, SPREAD_SCALE_RANGE,
    TEMPORAL_BIAS_STRENGTH,
};
use crate::core::positional::TimeOrientation;
use crate::kernels::{axpy, dot, matvec, softmax_in_place};

/// Control scalars that reshape attention scores.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AttentionControls {
    /// Sharpness in [0, 1]; higher means more contrast.
    pub focus: f32,

    /// Diffusion in [0, 1]; higher means flatter attention.
    pub spread: f32,

    /// 0 = past, 0.5 = symmetric, 1 = future.
    pub temporal_alpha: f32,

    pub orientation: TimeOrientation,
}

impl Default for AttentionControls {
    fn default() -> Self {
        Self {
            focus: DEFAULT_FOCUS,
            spread: DEFAULT_SPREAD,
            temporal_alpha: DEFAULT_TEMPORAL_ALPHA,
            orientation: TimeOrientation::Forward,
        }
    }
}

impl AttentionControls {
    pub fn set_focus(&mut self, focus: f32) {
        self.focus = clamp01(focus);
    }

    pub fn set_spread(&mut self, spread: f32) {
        self.spread = clamp01(spread);
    }

    pub fn set_temporal_alpha(&mut self, alpha: f32) {
        self.temporal_alpha = clamp01(alpha);
    }

    /// `(temporal_alpha - 0.5) · 2`, in [-1, 1].
    pub fn temporal_bias(&self) -> f32 {
        (self.temporal_alpha - 0.5) * 2.0
    }

    pub fn focus_scale(&self) -> f32 {
        FOCUS_SCALE_MIN + FOCUS_SCALE_RANGE * self.focus
    }

    pub fn spread_divisor(&self) -> f32 {
        (SPREAD_SCALE_MIN + SPREAD_SCALE_RANGE * self.spread).max(SPREAD_SCALE_MIN)
    }

    /// Apply resonance, temporal bias, focus and spread to a raw `q·k/√d`
    /// score. `relative` is `last_pos - t`.
    pub fn modulate(&self, raw: f32, resonance: f32, relative: isize) -> f32 {
        let mut score = raw * (1.0 + resonance * RESONANCE_ATTENTION_COUPLING);

        let sign = relative.signum() as f32;
        let shift = self.temporal_bias() * sign * TEMPORAL_BIAS_STRENGTH;
        match self.orientation {
            // left is future: positions before the query are boosted when bias > 0
            TimeOrientation::Reverse => score += shift,
            // left is past: positions before the query are boosted when bias < 0
            TimeOrientation::Forward => score -= shift,
        }

        score *= self.focus_scale();
        score / self.spread_divisor()
    }
}

/// Per-head query/key/value projections, `[n_heads, head_dim, d_model]` each.
#[derive(Clone, Debug)]
pub struct HeadProjections {
    pub w_q: Array3<f32>,
    pub w_k: Array3<f32>,
    pub w_v: Array3<f32>,
}

impl HeadProjections {
    pub fn zeros(n_heads: usize, head_dim: usize, d_model: usize) -> Self {
        Self {
            w_q: Array3::zeros((n_heads, head_dim, d_model)),
            w_k: Array3::zeros((n_heads, head_dim, d_model)),
            w_v: Array3::zeros((n_heads, head_dim, d_model)),
        }
    }

    /// Fill head by head, Q then K then V, from `dist`.
    pub fn random<R, D>(n_heads: usize, head_dim: usize, d_model: usize, dist: &D, rng: &mut R) -> Self
    where
        R: Rng + ?Sized,
        D: Distribution<f32>,
    {
        let mut proj = Self::zeros(n_heads, head_dim, d_model);
        for h in 0..n_heads {
            for w in [&mut proj.w_q, &mut proj.w_k, &mut proj.w_v] {
                w.index_axis_mut(Axis(0), h)
                    .iter_mut()
                    .for_each(|v| *v = dist.sample(&mut *rng));
            }
        }
        proj
    }

    pub fn n_heads(&self) -> usize {
        self.w_q.shape()[0]
    }

    pub fn head_dim(&self) -> usize {
        self.w_q.shape()[1]
    }

    pub fn param_count(&self) -> usize {
        self.w_q.len() + self.w_k.len() + self.w_v.len()
    }
}

/// Reusable buffers for one head; overwritten on every call.
#[derive(Clone, Debug)]
pub struct HeadScratch {
    pub query: Array1<f32>,
    pub key: Array1<f32>,
    pub value: Array1<f32>,
    /// Softmax attention weights, one per context position.
    pub weights: Array1<f32>,
    /// Attention-weighted sum of values.
    pub output: Array1<f32>,
}

impl HeadScratch {
    pub fn new(ctx_len: usize, head_dim: usize) -> Self {
        Self {
            query: Array1::zeros(head_dim),
            key: Array1::zeros(head_dim),
            value: Array1::zeros(head_dim),
            weights: Array1::zeros(ctx_len),
            output: Array1::zeros(head_dim),
        }
    }
}

/// Run one head over the token matrix `x: [ctx_len, d_model]`.
///
/// `token_resonance[t]` is the resonance of the token at position `t`.
/// On return `scratch.weights` holds the softmax weights and `scratch.output`
/// the head output.
pub fn attend(
    proj: &HeadProjections,
    head: usize,
    x: ArrayView2<'_, f32>,
    token_resonance: ArrayView1<'_, f32>,
    controls: &AttentionControls,
    scratch: &mut HeadScratch,
) {
    let ctx = x.nrows();
    if ctx == 0 {
        return;
    }
    let last = ctx - 1;
    let w_q = proj.w_q.index_axis(Axis(0), head);
    let w_k = proj.w_k.index_axis(Axis(0), head);
    let w_v = proj.w_v.index_axis(Axis(0), head);
    let sqrt_head_dim = (proj.head_dim() as f32).sqrt();

    // Query from the last position only.
    matvec(w_q, x.row(last), scratch.query.view_mut());

    for t in 0..ctx {
        matvec(w_k, x.row(t), scratch.key.view_mut());
        let raw = dot(scratch.query.view(), scratch.key.view()) / sqrt_head_dim;
        let relative = last as isize - t as isize;
        scratch.weights[t] = controls.modulate(raw, token_resonance[t], relative);
    }

    softmax_in_place(scratch.weights.view_mut());

    scratch.output.fill(0.0);
    for t in 0..ctx {
        matvec(w_v, x.row(t), scratch.value.view_mut());
        let w = scratch.weights[t];
        axpy(scratch.output.view_mut(), w, scratch.value.view());
    }
}
