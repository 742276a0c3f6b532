//! Low-rank adapters trained without gradients.
//!
//! The adapter contributes `ΔW · x = (α/r) · B · (A · x)` where
//! A ∈ R^{r × in} and B ∈ R^{out × r}. Both factors start at zero, so a fresh
//! adapter contributes nothing until its first notch-step; the first step
//! takes its rank-space direction from the exploration noise.
//!
//! The learned state is the pair (A, B). `delta_norm` reports its norm
//! `sqrt(‖A‖² + ‖B‖²)`, and 0 whenever either factor is all-zero (the product
//! `B·A` is then zero too). `scale`, `soft_reset` and `clamp` multiply both
//! factors, so that norm moves linearly with the factor.

use ndarray::{concatenate, Array1, Array2, ArrayView1, ArrayViewMut1, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::config::{clamp01, ADAPTER_PARAMS_LEN, DEFAULT_SEED, MAX_ADAPTER_DECAY};
use crate::error::{BodyError, Result};
use crate::kernels::dot;
use crate::learning::notch::{build_target_error, exploration_direction};

/// Shape and hyperparameters of one adapter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub in_dim: usize,
    pub out_dim: usize,
    pub rank: usize,
    pub alpha: f32,

    /// Step size of a notch-step.
    pub lr: f32,

    /// Multiplicative weight decay applied after each notch-step.
    pub decay: f32,

    pub seed: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            in_dim: 64,
            out_dim: 256,
            rank: 4,
            alpha: 8.0,
            lr: 0.01,
            decay: 0.001,
            seed: DEFAULT_SEED,
        }
    }
}

impl AdapterConfig {
    pub fn new(in_dim: usize, out_dim: usize, rank: usize) -> Self {
        Self {
            in_dim,
            out_dim,
            rank,
            ..Default::default()
        }
    }
}

/// A single low-rank adapter with its own deterministic generator.
#[derive(Clone, Debug)]
pub struct LowRankAdapter {
    config: AdapterConfig,

    /// Down-projection: A ∈ R^{r' × in}, r' = effective rank.
    a: Array2<f32>,

    /// Up-projection: B ∈ R^{out × r'}.
    b: Array2<f32>,

    rng: StdRng,

    /// Notch-steps since construction or the last reset.
    update_count: u64,
}

impl LowRankAdapter {
    /// Create an adapter; fails when any dimension is zero.
    ///
    /// Decay is clamped into `[0, 0.999]`.
    pub fn new(mut config: AdapterConfig) -> Result<Self> {
        if config.in_dim == 0 || config.out_dim == 0 || config.rank == 0 {
            return Err(BodyError::InvalidAdapterShape {
                in_dim: config.in_dim,
                out_dim: config.out_dim,
                rank: config.rank,
            });
        }
        config.decay = if config.decay.is_nan() {
            0.0
        } else {
            config.decay.clamp(0.0, MAX_ADAPTER_DECAY)
        };

        let rng = StdRng::seed_from_u64(config.seed);
        let a = Array2::zeros((config.rank, config.in_dim));
        let b = Array2::zeros((config.out_dim, config.rank));

        tracing::debug!(
            in_dim = config.in_dim,
            out_dim = config.out_dim,
            rank = config.rank,
            alpha = config.alpha,
            "adapter created"
        );

        Ok(Self {
            config,
            a,
            b,
            rng,
            update_count: 0,
        })
    }

    /// Zero the learned state. Delta norm is 0 afterwards.
    pub fn reset(&mut self) {
        self.a.fill(0.0);
        self.b.fill(0.0);
        self.update_count = 0;
    }

    /// `α / r` for the configured rank.
    pub fn scaling(&self) -> f32 {
        self.scaling_with(self.config.alpha)
    }

    fn scaling_with(&self, alpha: f32) -> f32 {
        alpha / self.config.rank as f32
    }

    // ---- Application ----

    /// `y += (α/r) · B · (A · x)`.
    ///
    /// # Panics
    /// If `x` is not `in_dim` long or `y` is not `out_dim` long.
    pub fn apply(&self, x: ArrayView1<'_, f32>, y: ArrayViewMut1<'_, f32>) {
        self.apply_with_alpha(x, y, self.config.alpha);
    }

    /// [`apply`](Self::apply) with `alpha` substituted for the stored one.
    pub fn apply_with_alpha(&self, x: ArrayView1<'_, f32>, mut y: ArrayViewMut1<'_, f32>, alpha: f32) {
        let down = self.a.dot(&x);
        let up = self.b.dot(&down);
        y.scaled_add(self.scaling_with(alpha), &up);
    }

    /// Fresh output vector `ΔW · x`.
    pub fn forward(&self, x: ArrayView1<'_, f32>) -> Array1<f32> {
        let mut y = Array1::zeros(self.config.out_dim);
        self.apply(x, y.view_mut());
        y
    }

    /// Like [`apply`](Self::apply) but only touches `y[i]` for `i` in
    /// `indices`. Indices outside `y` or `out_dim` are skipped.
    pub fn apply_sparse(&self, x: ArrayView1<'_, f32>, mut y: ArrayViewMut1<'_, f32>, indices: &[usize]) {
        let down = self.a.dot(&x);
        let scale = self.scaling();
        for &i in indices {
            if i < self.config.out_dim && i < y.len() {
                y[i] += scale * dot(self.b.row(i), down.view());
            }
        }
    }

    // ---- Learning ----

    /// One gradient-free update.
    ///
    /// With `c = lr · signal` and `u` a unit direction in rank space (the
    /// current projection `A·x` plus exploration noise):
    /// `A += c · u ⊗ x`, `B += c · dy ⊗ u`, then both factors are multiplied
    /// by `1 − decay`.
    pub fn notch_step(&mut self, x: ArrayView1<'_, f32>, dy: ArrayView1<'_, f32>, signal: f32) -> Result<()> {
        if x.len() != self.config.in_dim || dy.len() != self.config.out_dim {
            return Err(BodyError::DimensionMismatch {
                expected: (self.config.in_dim, self.config.out_dim),
                got: (x.len(), dy.len()),
            });
        }

        let c = self.config.lr * signal;
        let h = self.a.dot(&x);
        let u = exploration_direction(h.view(), &mut self.rng);

        for (mut row, &ui) in self.a.rows_mut().into_iter().zip(u.iter()) {
            row.scaled_add(c * ui, &x);
        }
        for (mut row, &dyo) in self.b.rows_mut().into_iter().zip(dy.iter()) {
            row.scaled_add(c * dyo, &u);
        }

        let keep = 1.0 - self.config.decay;
        self.a.mapv_inplace(|v| v * keep);
        self.b.mapv_inplace(|v| v * keep);
        self.update_count += 1;
        Ok(())
    }

    /// Build a target-error vector from `probs` and take a notch-step with it.
    #[allow(clippy::too_many_arguments)]
    pub fn experience_step(
        &mut self,
        x: ArrayView1<'_, f32>,
        probs: ArrayView1<'_, f32>,
        target: usize,
        signal: f32,
        push: f32,
        pull: f32,
        topk: usize,
    ) -> Result<()> {
        let dy = build_target_error(probs, target, push, pull, topk);
        self.notch_step(x, dy.view(), signal)
    }

    // ---- Norm control ----

    /// Multiply the learned state by `factor`.
    pub fn scale(&mut self, factor: f32) {
        self.a.mapv_inplace(|v| v * factor);
        self.b.mapv_inplace(|v| v * factor);
    }

    /// Keep `keep_ratio` (clamped to [0, 1]) of the learned state.
    pub fn soft_reset(&mut self, keep_ratio: f32) {
        self.scale(clamp01(keep_ratio));
    }

    /// Rescale down to `max_norm` if the delta norm exceeds it.
    pub fn clamp(&mut self, max_norm: f32) {
        let max_norm = max_norm.max(0.0);
        let norm = self.delta_norm();
        if norm > max_norm {
            tracing::debug!(norm, max_norm, "clamping adapter");
            self.scale(max_norm / norm);
        }
    }

    /// Fold `weight × other` into this adapter by concatenating factors.
    ///
    /// Afterwards `apply(self) == apply(self_before) + weight · apply(other)`
    /// for every input; the effective rank grows by `other.effective_rank()`.
    pub fn merge(&mut self, other: &LowRankAdapter, weight: f32) -> Result<()> {
        if other.config.in_dim != self.config.in_dim || other.config.out_dim != self.config.out_dim {
            return Err(BodyError::DimensionMismatch {
                expected: (self.config.out_dim, self.config.in_dim),
                got: (other.config.out_dim, other.config.in_dim),
            });
        }

        let own = self.scaling();
        let ratio = if own.abs() > f32::EPSILON {
            weight * other.scaling() / own
        } else {
            tracing::warn!("merge into an adapter with zero scaling; using the raw weight");
            weight
        };

        let other_b = &other.b * ratio;
        let a = concatenate(Axis(0), &[self.a.view(), other.a.view()])?;
        let b = concatenate(Axis(1), &[self.b.view(), other_b.view()])?;
        self.a = a;
        self.b = b;

        tracing::debug!(
            weight,
            effective_rank = self.effective_rank(),
            "adapters merged"
        );
        Ok(())
    }

    // ---- Inspection ----

    /// `(‖A‖_F, ‖B‖_F)`.
    pub fn factor_norms(&self) -> (f32, f32) {
        (frobenius(&self.a), frobenius(&self.b))
    }

    /// Norm of the learned state, `sqrt(‖A‖² + ‖B‖²)`; 0 when either
    /// factor is all-zero.
    pub fn delta_norm(&self) -> f32 {
        let (na, nb) = self.factor_norms();
        if na == 0.0 || nb == 0.0 {
            return 0.0;
        }
        (na * na + nb * nb).sqrt()
    }

    /// Exact `‖(α/r) · B · A‖_F`.
    pub fn product_norm(&self) -> f32 {
        frobenius(&self.delta_matrix())
    }

    /// Materialise `(α/r) · B · A`, shape `[out_dim, in_dim]`.
    pub fn delta_matrix(&self) -> Array2<f32> {
        self.b.dot(&self.a) * self.scaling()
    }

    /// Hyperparameters as a flat vector:
    /// `[in_dim, out_dim, rank, alpha, lr, decay, update_count]`.
    pub fn copy_params(&self) -> [f32; ADAPTER_PARAMS_LEN] {
        [
            self.config.in_dim as f32,
            self.config.out_dim as f32,
            self.config.rank as f32,
            self.config.alpha,
            self.config.lr,
            self.config.decay,
            self.update_count as f32,
        ]
    }

    /// Reseed the exploration generator.
    pub fn set_seed(&mut self, seed: u64) {
        self.config.seed = seed;
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn in_dim(&self) -> usize {
        self.config.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.config.out_dim
    }

    pub fn rank(&self) -> usize {
        self.config.rank
    }

    /// Rows of A; equals `rank` until a merge grows it.
    pub fn effective_rank(&self) -> usize {
        self.a.nrows()
    }

    pub fn update_count(&self) -> u64 {
        self.update_count
    }

    pub fn param_count(&self) -> usize {
        self.a.len() + self.b.len()
    }
}

fn frobenius(m: &Array2<f32>) -> f32 {
    m.iter().map(|v| v * v).sum::<f32>().sqrt()
}
