//! Sinusoidal positional tables in both time orientations.
//!
//! Entry `(pos, i)` is `sin(angle)` for even `i` and `cos(angle)` for odd `i`,
//! with `angle = effective_pos / 10000^(2·⌊i/2⌋ / d_model)`. The forward table
//! uses `effective_pos = pos`; the reverse table reads the context backwards,
//! `effective_pos = ctx_len - 1 - pos`.

use ndarray::{Array2, ArrayView2};

use crate::config::POSITIONAL_BASE;

/// Which way time runs across the context.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TimeOrientation {
    /// Left is past, right is future.
    #[default]
    Forward,
    /// Left is future, right is past.
    Reverse,
}

impl TimeOrientation {
    pub fn from_rtl(use_rtl: bool) -> Self {
        if use_rtl {
            TimeOrientation::Reverse
        } else {
            TimeOrientation::Forward
        }
    }

    pub fn is_reverse(&self) -> bool {
        matches!(self, TimeOrientation::Reverse)
    }
}

/// Build one `ctx_len × d_model` table.
pub fn positional_table(ctx_len: usize, d_model: usize, orientation: TimeOrientation) -> Array2<f32> {
    Array2::from_shape_fn((ctx_len, d_model), |(pos, i)| {
        let effective_pos = match orientation {
            TimeOrientation::Forward => pos,
            TimeOrientation::Reverse => ctx_len - 1 - pos,
        };
        let exponent = (2 * (i / 2)) as f32 / d_model as f32;
        let angle = effective_pos as f32 / POSITIONAL_BASE.powf(exponent);
        if i % 2 == 0 {
            angle.sin()
        } else {
            angle.cos()
        }
    })
}

/// Both tables, built once and never mutated.
#[derive(Clone, Debug)]
pub struct PositionalTables {
    forward: Array2<f32>,
    reverse: Array2<f32>,
}

impl PositionalTables {
    pub fn new(ctx_len: usize, d_model: usize) -> Self {
        Self {
            forward: positional_table(ctx_len, d_model, TimeOrientation::Forward),
            reverse: positional_table(ctx_len, d_model, TimeOrientation::Reverse),
        }
    }

    pub fn select(&self, orientation: TimeOrientation) -> ArrayView2<'_, f32> {
        match orientation {
            TimeOrientation::Forward => self.forward.view(),
            TimeOrientation::Reverse => self.reverse.view(),
        }
    }
}
