//! The breath loop: one forward pass, candidate re-ranking, and online
//! adaptation per call.
//!
//! Per breath:
//! 1. Field focus/spread are copied into the lung if the field changed since
//!    the last breath
//! 2. The lung runs its forward pass
//! 3. The top-k candidates are re-ranked with the adapter's sparse contribution
//! 4. With learning on and a target given, the adapter takes an experience step
//!    and is clamped to `max_delta_norm`
//! 5. Every `compose_every` learning steps the adapter is folded into the
//!    output projection and reset

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::core::LungModel;
use crate::dsl::FieldState;
use crate::error::Result;
use crate::learning::{compose_output_projection, AdapterConfig, LowRankAdapter};

/// Breath loop configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreathConfig {
    /// Target-error value at the target token.
    pub push: f32,

    /// Target-error value subtracted at each competing token.
    pub pull: f32,

    /// Candidates re-ranked and competitors pulled per breath.
    pub topk: usize,

    /// `signal = signal_gain · (1 − p(target))`.
    pub signal_gain: f32,

    /// Adapter norm ceiling after every learning step.
    pub max_delta_norm: f32,

    /// Learning steps between compositions; 0 never composes.
    pub compose_every: usize,

    /// Whether targets trigger learning.
    pub learn: bool,
}

impl Default for BreathConfig {
    fn default() -> Self {
        Self {
            push: 1.0,
            pull: 0.5,
            topk: 5,
            signal_gain: 1.0,
            max_delta_norm: 4.0,
            compose_every: 16,
            learn: true,
        }
    }
}

/// What one breath produced.
#[derive(Clone, Debug)]
pub struct BreathOutcome {
    /// Entropy of the lung's distribution.
    pub entropy: f32,

    /// Lung argmax before adaptation.
    pub argmax: usize,

    /// Best candidate after adapter re-ranking.
    pub prediction: usize,

    /// Probability of the target under the lung (0 without a target).
    pub target_prob: f32,

    /// Learning signal used (0 when no step was taken).
    pub signal: f32,

    /// Adapter delta norm after the breath.
    pub delta_norm: f32,

    /// Whether the adapter was folded into the lung this breath.
    pub composed: bool,

    pub elapsed_us: u64,
}

/// Running counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BreathStats {
    pub breaths: u64,
    pub learning_steps: u64,
    pub compositions: u64,
}

/// Owns the lung, its output-side adapter, and the control field.
pub struct BreathLoop {
    lung: LungModel,
    adapter: LowRankAdapter,
    field: FieldState,
    /// Field changed since it was last copied into the lung.
    field_dirty: bool,
    config: BreathConfig,
    stats: BreathStats,
}

impl BreathLoop {
    /// The adapter is sized `d_model → vocab_size` (the dimensions in
    /// `adapter_config` are overwritten) and starts from an empty learned
    /// state.
    pub fn new(lung: LungModel, mut adapter_config: AdapterConfig, config: BreathConfig) -> Result<Self> {
        adapter_config.in_dim = lung.d_model();
        adapter_config.out_dim = lung.vocab_size();
        let adapter = LowRankAdapter::new(adapter_config)?;

        tracing::info!(
            vocab_size = lung.vocab_size(),
            d_model = lung.d_model(),
            rank = adapter.rank(),
            learn = config.learn,
            "breath loop ready"
        );

        Ok(Self {
            lung,
            adapter,
            field: FieldState::default(),
            field_dirty: true,
            config,
            stats: BreathStats::default(),
        })
    }

    /// Run one breath over `context`, learning toward `target` if given.
    pub fn breathe(&mut self, context: &[i32], target: Option<usize>) -> Result<BreathOutcome> {
        let start = Instant::now();
        if self.field_dirty {
            self.lung.apply_field(&self.field);
            self.field_dirty = false;
        }

        let entropy = self.lung.forward(context);
        let argmax = self.lung.argmax();
        let prediction = self.rerank();

        let target = target.filter(|&t| t < self.lung.vocab_size());
        let target_prob = target.map_or(0.0, |t| self.lung.token_probability(t as i32));

        let mut signal = 0.0;
        let mut composed = false;
        if let (true, Some(t)) = (self.config.learn, target) {
            signal = self.config.signal_gain * (1.0 - target_prob);
            self.adapter.experience_step(
                self.lung.hidden(),
                self.lung.probabilities(),
                t,
                signal,
                self.config.push,
                self.config.pull,
                self.config.topk,
            )?;
            self.adapter.clamp(self.config.max_delta_norm);
            self.stats.learning_steps += 1;

            let every = self.config.compose_every as u64;
            if every > 0 && self.stats.learning_steps % every == 0 {
                compose_output_projection(&mut self.lung, &self.adapter, 1.0)?;
                self.adapter.reset();
                self.stats.compositions += 1;
                composed = true;
            }
        }

        self.stats.breaths += 1;
        let outcome = BreathOutcome {
            entropy,
            argmax,
            prediction,
            target_prob,
            signal,
            delta_norm: self.adapter.delta_norm(),
            composed,
            elapsed_us: start.elapsed().as_micros() as u64,
        };
        tracing::debug!(
            entropy = outcome.entropy,
            argmax = outcome.argmax,
            prediction = outcome.prediction,
            signal = outcome.signal,
            "breath"
        );
        Ok(outcome)
    }

    /// Best of the lung's top-k after adding the adapter's contribution to
    /// just those logits.
    fn rerank(&self) -> usize {
        let candidates = self.lung.top_k(self.config.topk.max(1));
        let mut adjusted = self.lung.logits().to_owned();
        self.adapter
            .apply_sparse(self.lung.hidden(), adjusted.view_mut(), &candidates);

        let mut best = candidates.first().copied().unwrap_or(0);
        for &c in &candidates {
            if adjusted[c] > adjusted[best] {
                best = c;
            }
        }
        best
    }

    /// Run a DSL script against the field; returns the applied command count.
    ///
    /// The field's focus and spread reach the lung on the next breath,
    /// replacing any value set directly through [`lung_mut`](Self::lung_mut).
    pub fn exec(&mut self, script: &str) -> usize {
        self.field_dirty = true;
        self.field.exec(script)
    }

    pub fn field(&self) -> &FieldState {
        &self.field
    }

    /// Like [`exec`](Self::exec), marks the field for the next breath.
    pub fn field_mut(&mut self) -> &mut FieldState {
        self.field_dirty = true;
        &mut self.field
    }

    pub fn lung(&self) -> &LungModel {
        &self.lung
    }

    pub fn lung_mut(&mut self) -> &mut LungModel {
        &mut self.lung
    }

    pub fn adapter(&self) -> &LowRankAdapter {
        &self.adapter
    }

    pub fn config(&self) -> &BreathConfig {
        &self.config
    }

    pub fn stats(&self) -> &BreathStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::LungConfig;

    fn breath_loop(config: BreathConfig) -> BreathLoop {
        let lung = LungModel::new(LungConfig::new(16, 8, 4, 2)).unwrap();
        let mut adapter = AdapterConfig::new(0, 0, 4);
        adapter.lr = 0.5;
        BreathLoop::new(lung, adapter, config).unwrap()
    }

    #[test]
    fn test_adapter_sized_from_lung() {
        let b = breath_loop(BreathConfig::default());
        assert_eq!(b.adapter().in_dim(), 8);
        assert_eq!(b.adapter().out_dim(), 16);
        assert_eq!(b.adapter().delta_norm(), 0.0);
    }

    #[test]
    fn test_breath_without_target_does_not_learn() {
        let mut b = breath_loop(BreathConfig::default());
        let out = b.breathe(&[1, 2, 3], None).unwrap();
        assert_eq!(out.signal, 0.0);
        assert_eq!(out.target_prob, 0.0);
        assert_eq!(out.delta_norm, 0.0);
        // Empty adapter leaves the lung's choice alone.
        assert_eq!(out.prediction, out.argmax);
        assert_eq!(b.stats().learning_steps, 0);
        assert_eq!(b.stats().breaths, 1);
    }

    #[test]
    fn test_learning_step_grows_adapter() {
        let config = BreathConfig {
            compose_every: 0,
            ..Default::default()
        };
        let mut b = breath_loop(config);
        let out = b.breathe(&[1, 2, 3], Some(7)).unwrap();
        assert!(out.signal > 0.0);
        assert!(out.delta_norm > 0.0);
        assert_eq!(b.adapter().update_count(), 1);
    }

    #[test]
    fn test_learning_disabled() {
        let config = BreathConfig {
            learn: false,
            ..Default::default()
        };
        let mut b = breath_loop(config);
        let out = b.breathe(&[1, 2, 3], Some(7)).unwrap();
        assert!(out.target_prob > 0.0);
        assert_eq!(out.signal, 0.0);
        assert_eq!(b.adapter().update_count(), 0);
    }

    #[test]
    fn test_composition_period() {
        let config = BreathConfig {
            compose_every: 2,
            ..Default::default()
        };
        let mut b = breath_loop(config);
        let before = b.lung().output_weights().clone();

        let first = b.breathe(&[1, 2, 3], Some(7)).unwrap();
        assert!(!first.composed);
        let second = b.breathe(&[1, 2, 3], Some(7)).unwrap();
        assert!(second.composed);
        assert_eq!(second.delta_norm, 0.0);
        assert_eq!(b.stats().compositions, 1);
        assert_ne!(b.lung().output_weights(), &before);
    }

    #[test]
    fn test_composition_raises_target_probability() {
        let config = BreathConfig {
            compose_every: 1,
            ..Default::default()
        };
        let mut b = breath_loop(config);
        let initial = b.breathe(&[1, 2, 3], Some(7)).unwrap().target_prob;
        let mut last = initial;
        for _ in 0..10 {
            last = b.breathe(&[1, 2, 3], Some(7)).unwrap().target_prob;
        }
        assert!(last > initial);
    }

    #[test]
    fn test_out_of_range_target_ignored() {
        let mut b = breath_loop(BreathConfig::default());
        let out = b.breathe(&[1], Some(99)).unwrap();
        assert_eq!(out.signal, 0.0);
        assert_eq!(out.target_prob, 0.0);
    }

    #[test]
    fn test_direct_lung_controls_survive_breaths() {
        let mut b = breath_loop(BreathConfig::default());
        b.breathe(&[1, 2], None).unwrap();
        b.lung_mut().set_focus(0.3);
        b.lung_mut().set_spread(0.6);
        b.breathe(&[1, 2], None).unwrap();
        b.breathe(&[2, 1], None).unwrap();
        assert_eq!(b.lung().controls().focus, 0.3);
        assert_eq!(b.lung().controls().spread, 0.6);

        // A later script wins again.
        b.exec("ATTEND_FOCUS 0.8");
        b.breathe(&[1, 2], None).unwrap();
        assert_eq!(b.lung().controls().focus, 0.8);
        assert_eq!(b.lung().controls().spread, 0.2);
    }

    #[test]
    fn test_field_script_reaches_lung() {
        let mut b = breath_loop(BreathConfig::default());
        assert_eq!(b.exec("ATTEND_FOCUS 0.9\nATTEND_SPREAD 0.1"), 2);
        b.breathe(&[1, 2], None).unwrap();
        assert_eq!(b.lung().controls().focus, 0.9);
        assert_eq!(b.lung().controls().spread, 0.1);
    }
}
