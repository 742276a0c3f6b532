//! The lung — a single-layer bidirectional attention model.
//!
//! Forward pass (one call = one breath):
//! 1. Embed: `X[t] = E[token_t] + P[t]` with `P` from the active orientation
//! 2. Every head attends from the last position over all positions
//! 3. `logits = W_oᵀ · concat(heads)`
//! 4. Presence modulation: `logit[v] *= 1 + presence[v] · 0.15`
//! 5. `probs = softmax(logits)`
//! 6. Presence decays and is bumped for tokens in the context
//! 7. Returns the entropy of `probs`
//!
//! Contexts shorter than `ctx_len` are right-padded with token 0; longer ones
//! use their first `ctx_len` tokens. Out-of-range ids are clamped.

use ndarray::{s, Array1, Array2, ArrayView1, Zip};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::{
    DEFAULT_SEED, INIT_SCALE, PARALLEL_VOCAB_THRESHOLD, PRESENCE_DECAY, PRESENCE_INCREMENT,
    PRESENCE_LOGIT_COUPLING,
};
use crate::core::attention::{attend, AttentionControls, HeadProjections, HeadScratch};
use crate::core::positional::{PositionalTables, TimeOrientation};
use crate::dsl::FieldState;
use crate::error::{BodyError, Result};
use crate::kernels::{
    argmax, axpy, entropy, matvec_t, matvec_t_parallel, softmax_in_place, top_k_excluding,
};

/// Shape and seeding of a lung.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LungConfig {
    pub vocab_size: usize,
    pub d_model: usize,
    pub ctx_len: usize,
    pub n_heads: usize,

    /// Seed for weight and resonance initialisation.
    pub seed: u64,

    /// Per-forward presence decay factor, in [0, 1).
    pub presence_decay: f32,
}

impl Default for LungConfig {
    fn default() -> Self {
        Self {
            vocab_size: 256,
            d_model: 64,
            ctx_len: 16,
            n_heads: 4,
            seed: DEFAULT_SEED,
            presence_decay: PRESENCE_DECAY,
        }
    }
}

impl LungConfig {
    pub fn new(vocab_size: usize, d_model: usize, ctx_len: usize, n_heads: usize) -> Self {
        Self {
            vocab_size,
            d_model,
            ctx_len,
            n_heads,
            ..Default::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Reject zero dimensions and a `d_model` that heads cannot split evenly.
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("vocab_size", self.vocab_size),
            ("d_model", self.d_model),
            ("ctx_len", self.ctx_len),
            ("n_heads", self.n_heads),
        ] {
            if v == 0 {
                return Err(BodyError::InvalidLungShape(format!("{name} must be positive")));
            }
        }
        if self.d_model % self.n_heads != 0 {
            return Err(BodyError::HeadSplit {
                d_model: self.d_model,
                n_heads: self.n_heads,
            });
        }
        if !(0.0..1.0).contains(&self.presence_decay) {
            return Err(BodyError::InvalidLungShape(format!(
                "presence_decay must be in [0, 1), got {}",
                self.presence_decay
            )));
        }
        Ok(())
    }

    pub fn head_dim(&self) -> usize {
        self.d_model / self.n_heads
    }
}

/// Buffers overwritten in full by every forward call.
#[derive(Clone, Debug)]
struct InferenceState {
    logits: Array1<f32>,
    probs: Array1<f32>,
    attention: Array1<f32>,
    hidden: Array1<f32>,
}

/// Scratch space reused across calls.
#[derive(Clone, Debug)]
struct Workspace {
    x: Array2<f32>,
    tokens: Vec<usize>,
    token_resonance: Array1<f32>,
    head: HeadScratch,
}

/// The complete lung.
#[derive(Clone, Debug)]
pub struct LungModel {
    config: LungConfig,
    head_dim: usize,

    /// Embeddings: `[vocab_size, d_model]`.
    embeddings: Array2<f32>,

    positional: PositionalTables,

    heads: HeadProjections,

    /// Output projection: `[d_model, vocab_size]`.
    w_out: Array2<f32>,

    /// Per-token attention boost in [0, 1].
    resonance: Array1<f32>,

    /// Per-token presence in [0, 1].
    presence: Array1<f32>,

    controls: AttentionControls,

    state: InferenceState,
    work: Workspace,
}

impl LungModel {
    /// Build a lung with weights drawn from `StdRng::seed_from_u64(config.seed)`.
    pub fn new(config: LungConfig) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(config.seed);
        Self::with_rng(config, &mut rng)
    }

    /// Build a lung drawing weights from an explicit generator.
    ///
    /// Draw order: embeddings, output projection, per-head Q/K/V, resonance.
    pub fn with_rng<R: Rng + ?Sized>(config: LungConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;

        let LungConfig {
            vocab_size,
            d_model,
            ctx_len,
            n_heads,
            ..
        } = config;
        let head_dim = config.head_dim();
        let init = Uniform::new_inclusive(-INIT_SCALE, INIT_SCALE);

        let embeddings = Array2::from_shape_fn((vocab_size, d_model), |_| init.sample(&mut *rng));
        let w_out = Array2::from_shape_fn((d_model, vocab_size), |_| init.sample(&mut *rng));
        let heads = HeadProjections::random(n_heads, head_dim, d_model, &init, rng);
        let resonance = Array1::from_shape_fn(vocab_size, |_| 0.5 + rng.gen::<f32>() * 0.5);

        tracing::debug!(
            vocab_size,
            d_model,
            ctx_len,
            n_heads,
            seed = config.seed,
            "lung created"
        );

        Ok(Self {
            head_dim,
            embeddings,
            positional: PositionalTables::new(ctx_len, d_model),
            heads,
            w_out,
            resonance,
            presence: Array1::zeros(vocab_size),
            controls: AttentionControls::default(),
            state: InferenceState {
                logits: Array1::zeros(vocab_size),
                probs: Array1::zeros(vocab_size),
                attention: Array1::zeros(ctx_len),
                hidden: Array1::zeros(d_model),
            },
            work: Workspace {
                x: Array2::zeros((ctx_len, d_model)),
                tokens: vec![0; ctx_len],
                token_resonance: Array1::zeros(ctx_len),
                head: HeadScratch::new(ctx_len, head_dim),
            },
            config,
        })
    }

    /// Run one breath over `context` and return the entropy of the resulting
    /// distribution. Overwrites logits, probabilities, attention and the hidden
    /// vector, then updates presence.
    pub fn forward(&mut self, context: &[i32]) -> f32 {
        let vocab_size = self.config.vocab_size;
        let ctx_len = self.config.ctx_len;
        let n_heads = self.config.n_heads;
        let head_dim = self.head_dim;
        let used = context.len().min(ctx_len);

        // Tokens, embeddings and per-position resonance.
        let table = self.positional.select(self.controls.orientation);
        for t in 0..ctx_len {
            // Padding reads as token 0; out-of-range ids embed clamped but
            // get no resonance boost.
            let (token, resonance) = if t < used {
                let token = clamp_token(context[t], vocab_size);
                let in_range = context[t] >= 0 && (context[t] as usize) < vocab_size;
                (token, if in_range { self.resonance[token] } else { 0.0 })
            } else {
                (0, self.resonance[0])
            };
            self.work.tokens[t] = token;
            let mut row = self.work.x.row_mut(t);
            row.assign(&self.embeddings.row(token));
            row += &table.row(t);
            self.work.token_resonance[t] = resonance;
        }

        // Multi-head attention, no causal mask.
        self.state.attention.fill(0.0);
        self.state.hidden.fill(0.0);
        let head_weight = 1.0 / n_heads as f32;
        for h in 0..n_heads {
            attend(
                &self.heads,
                h,
                self.work.x.view(),
                self.work.token_resonance.view(),
                &self.controls,
                &mut self.work.head,
            );
            axpy(
                self.state.attention.view_mut(),
                head_weight,
                self.work.head.weights.view(),
            );
            self.state
                .hidden
                .slice_mut(s![h * head_dim..(h + 1) * head_dim])
                .assign(&self.work.head.output);
        }

        // logits = W_oᵀ · hidden
        if vocab_size >= PARALLEL_VOCAB_THRESHOLD {
            matvec_t_parallel(
                self.w_out.view(),
                self.state.hidden.view(),
                self.state.logits.view_mut(),
            );
        } else {
            matvec_t(
                self.w_out.view(),
                self.state.hidden.view(),
                self.state.logits.view_mut(),
            );
        }

        Zip::from(&mut self.state.logits)
            .and(&self.presence)
            .for_each(|logit, &p| *logit *= 1.0 + p * PRESENCE_LOGIT_COUPLING);

        self.state.probs.assign(&self.state.logits);
        softmax_in_place(self.state.probs.view_mut());

        // Presence only moves after the outputs above are final.
        let decay = self.config.presence_decay;
        self.presence.mapv_inplace(|p| p * decay);
        for &raw in &context[..used] {
            if raw >= 0 && (raw as usize) < vocab_size {
                let p = &mut self.presence[raw as usize];
                *p = (*p + PRESENCE_INCREMENT).min(1.0);
            }
        }

        entropy(self.state.probs.view())
    }

    // ---- Inference state ----

    pub fn logits(&self) -> ArrayView1<'_, f32> {
        self.state.logits.view()
    }

    pub fn probabilities(&self) -> ArrayView1<'_, f32> {
        self.state.probs.view()
    }

    /// Per-position attention averaged over heads.
    pub fn attention(&self) -> ArrayView1<'_, f32> {
        self.state.attention.view()
    }

    /// Concatenated head outputs from the last forward (`d_model`).
    pub fn hidden(&self) -> ArrayView1<'_, f32> {
        self.state.hidden.view()
    }

    pub fn argmax(&self) -> usize {
        argmax(self.state.logits.view())
    }

    /// Probability of `token` from the last forward; 0 for out-of-range ids.
    pub fn token_probability(&self, token: i32) -> f32 {
        if token < 0 || token as usize >= self.config.vocab_size {
            return 0.0;
        }
        self.state.probs[token as usize]
    }

    /// Indices of the `k` largest logits, best first.
    pub fn top_k(&self, k: usize) -> Vec<usize> {
        top_k_excluding(self.state.logits.view(), k, None)
    }

    // ---- Controls ----

    pub fn controls(&self) -> &AttentionControls {
        &self.controls
    }

    pub fn set_focus(&mut self, focus: f32) {
        self.controls.set_focus(focus);
    }

    pub fn set_spread(&mut self, spread: f32) {
        self.controls.set_spread(spread);
    }

    pub fn set_temporal_alpha(&mut self, alpha: f32) {
        self.controls.set_temporal_alpha(alpha);
    }

    pub fn set_rtl(&mut self, use_rtl: bool) {
        self.controls.orientation = TimeOrientation::from_rtl(use_rtl);
    }

    pub fn is_rtl(&self) -> bool {
        self.controls.orientation.is_reverse()
    }

    /// Copy attention focus and spread from the field.
    pub fn apply_field(&mut self, field: &FieldState) {
        self.set_focus(field.attend_focus);
        self.set_spread(field.attend_spread);
    }

    // ---- Resonance and presence ----

    pub fn boost_resonance(&mut self, token: i32, amount: f32) {
        if let Some(t) = self.checked_token(token) {
            self.resonance[t] = (self.resonance[t] + amount).clamp(0.0, 1.0);
        }
    }

    pub fn decay_resonance(&mut self, token: i32, amount: f32) {
        if let Some(t) = self.checked_token(token) {
            self.resonance[t] = (self.resonance[t] - amount).clamp(0.0, 1.0);
        }
    }

    pub fn resonance(&self, token: i32) -> f32 {
        self.checked_token(token).map_or(0.0, |t| self.resonance[t])
    }

    pub fn presence(&self, token: i32) -> f32 {
        self.checked_token(token).map_or(0.0, |t| self.presence[t])
    }

    pub fn reset_presence(&mut self) {
        self.presence.fill(0.0);
    }

    // ---- Weights (for external adapter composition) ----

    pub fn embeddings(&self) -> &Array2<f32> {
        &self.embeddings
    }

    pub fn embeddings_mut(&mut self) -> &mut Array2<f32> {
        &mut self.embeddings
    }

    pub fn output_weights(&self) -> &Array2<f32> {
        &self.w_out
    }

    pub fn output_weights_mut(&mut self) -> &mut Array2<f32> {
        &mut self.w_out
    }

    pub fn config(&self) -> &LungConfig {
        &self.config
    }

    pub fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    pub fn d_model(&self) -> usize {
        self.config.d_model
    }

    pub fn ctx_len(&self) -> usize {
        self.config.ctx_len
    }

    pub fn n_heads(&self) -> usize {
        self.config.n_heads
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    /// Trainable weight count (embeddings, heads, output projection).
    pub fn param_count(&self) -> usize {
        self.embeddings.len() + self.heads.param_count() + self.w_out.len()
    }

    fn checked_token(&self, token: i32) -> Option<usize> {
        if token >= 0 && (token as usize) < self.config.vocab_size {
            Some(token as usize)
        } else {
            None
        }
    }
}

/// Clamp a raw id into `[0, vocab_size - 1]`.
fn clamp_token(token: i32, vocab_size: usize) -> usize {
    if token < 0 {
        0
    } else {
        (token as usize).min(vocab_size - 1)
    }
}
