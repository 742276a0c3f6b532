//! Pieces of the notch-step: target-error vectors and exploration directions.

use ndarray::{Array1, ArrayView1};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::config::NOTCH_EXPLORATION;
use crate::kernels::top_k_excluding;

/// Norms below this count as "no signal" in rank space.
const DIRECTION_EPS: f32 = 1e-8;

/// Sparse error vector over a distribution.
///
/// `dy[target] = push`; the `topk` most probable entries other than `target`
/// (ties to the lower index, `topk` clamped) get `-pull`; everything else is 0.
/// An out-of-range `target` only receives no push.
pub fn build_target_error(
    probs: ArrayView1<'_, f32>,
    target: usize,
    push: f32,
    pull: f32,
    topk: usize,
) -> Array1<f32> {
    let mut dy = Array1::zeros(probs.len());
    if target < probs.len() {
        dy[target] = push;
    }
    for j in top_k_excluding(probs, topk, Some(target)) {
        dy[j] = -pull;
    }
    dy
}

/// Unit vector in rank space for the next update.
///
/// Follows the current projection `h = A·x` with a little Gaussian noise; when
/// `h` is negligible the direction is pure noise. Falls back to the first
/// basis vector if normalisation is impossible.
pub fn exploration_direction<R: Rng + ?Sized>(h: ArrayView1<'_, f32>, rng: &mut R) -> Array1<f32> {
    let noise: Array1<f32> = Array1::from_shape_fn(h.len(), |_| rng.sample(StandardNormal));
    let h_norm = norm(h);

    let mut u = if h_norm > DIRECTION_EPS {
        &h / h_norm + &(&noise * NOTCH_EXPLORATION)
    } else {
        noise
    };

    let n = norm(u.view());
    if n > DIRECTION_EPS && n.is_finite() {
        u.mapv_inplace(|v| v / n);
    } else {
        tracing::warn!("degenerate exploration direction; using basis vector");
        u.fill(0.0);
        if !u.is_empty() {
            u[0] = 1.0;
        }
    }
    u
}

fn norm(v: ArrayView1<'_, f32>) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}
