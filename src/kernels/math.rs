//! Dense f32 kernels used by the lung and the adapter.
//!
//! All functions are pure over their arguments and assume the caller sized the
//! buffers correctly (checked only by `debug_assert!`).
//!
//! Two transposed mat-vec implementations:
//! 1. `matvec_t` — sequential, one column at a time
//! 2. `matvec_t_parallel` — the same column reductions spread over rayon

use ndarray::{ArrayView1, ArrayView2, ArrayViewMut1};
use rayon::prelude::*;

use crate::config::ENTROPY_EPS;

/// `Σ a[i]·b[i]`, accumulated left to right.
pub fn dot(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut sum = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        sum += x * y;
    }
    sum
}

/// `out[rows] = mat[rows × cols] · x[cols]`.
pub fn matvec(mat: ArrayView2<'_, f32>, x: ArrayView1<'_, f32>, mut out: ArrayViewMut1<'_, f32>) {
    debug_assert_eq!(mat.ncols(), x.len());
    debug_assert_eq!(mat.nrows(), out.len());
    for (o, row) in out.iter_mut().zip(mat.rows()) {
        *o = dot(row, x);
    }
}

/// `out[cols] = mat[rows × cols]ᵀ · x[rows]`.
pub fn matvec_t(
    mat: ArrayView2<'_, f32>,
    x: ArrayView1<'_, f32>,
    mut out: ArrayViewMut1<'_, f32>,
) {
    debug_assert_eq!(mat.nrows(), x.len());
    debug_assert_eq!(mat.ncols(), out.len());
    for (j, o) in out.iter_mut().enumerate() {
        *o = dot(mat.column(j), x);
    }
}

/// Parallel `matvec_t` — distributes output columns across threads.
///
/// Each column is reduced by a single worker in the sequential order, so the
/// result is bit-identical to [`matvec_t`].
pub fn matvec_t_parallel(
    mat: ArrayView2<'_, f32>,
    x: ArrayView1<'_, f32>,
    mut out: ArrayViewMut1<'_, f32>,
) {
    debug_assert_eq!(mat.nrows(), x.len());
    debug_assert_eq!(mat.ncols(), out.len());
    let cols: Vec<f32> = (0..mat.ncols())
        .into_par_iter()
        .map(|j| dot(mat.column(j), x))
        .collect();
    for (o, v) in out.iter_mut().zip(cols) {
        *o = v;
    }
}

/// Numerically stable softmax in place (max subtracted before `exp`).
///
/// A non-finite or zero normaliser falls back to the uniform distribution.
pub fn softmax_in_place(mut x: ArrayViewMut1<'_, f32>) {
    if x.is_empty() {
        return;
    }

    let max_val = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0f32;
    for v in x.iter_mut() {
        *v = (*v - max_val).exp();
        sum += *v;
    }

    if sum > 0.0 && sum.is_finite() {
        let inv_sum = 1.0 / sum;
        x.mapv_inplace(|v| v * inv_sum);
    } else {
        let uniform = 1.0 / x.len() as f32;
        x.fill(uniform);
    }
}

/// `y += a · x`.
pub fn axpy(mut y: ArrayViewMut1<'_, f32>, a: f32, x: ArrayView1<'_, f32>) {
    debug_assert_eq!(y.len(), x.len());
    for (yi, xi) in y.iter_mut().zip(x.iter()) {
        *yi += a * xi;
    }
}

/// Shannon entropy `-Σ p·ln p` over entries with `p > 1e-12`.
pub fn entropy(probs: ArrayView1<'_, f32>) -> f32 {
    let mut h = 0.0f32;
    for &p in probs.iter() {
        if p > ENTROPY_EPS {
            h -= p * p.ln();
        }
    }
    h
}

/// Index of the first maximum (0 for an empty input).
pub fn argmax(x: ArrayView1<'_, f32>) -> usize {
    let mut best = 0;
    let mut best_val = f32::NEG_INFINITY;
    for (i, &v) in x.iter().enumerate() {
        if v > best_val {
            best_val = v;
            best = i;
        }
    }
    best
}

/// Indices of the `k` largest entries by repeated max extraction.
///
/// `O(k·n)`; ties go to the lower index. Entries listed in `exclude` are never
/// selected. `k` is clamped to the number of selectable entries.
pub fn top_k_excluding(x: ArrayView1<'_, f32>, k: usize, exclude: Option<usize>) -> Vec<usize> {
    let n = x.len();
    let mut used = vec![false; n];
    if let Some(e) = exclude {
        if e < n {
            used[e] = true;
        }
    }
    let available = used.iter().filter(|u| !**u).count();
    let k = k.min(available);

    let mut out = Vec::with_capacity(k);
    for _ in 0..k {
        let mut best: Option<usize> = None;
        for (j, &v) in x.iter().enumerate() {
            if used[j] {
                continue;
            }
            match best {
                Some(b) if x[b] >= v => {}
                _ => best = Some(j),
            }
        }
        match best {
            Some(b) => {
                used[b] = true;
                out.push(b);
            }
            None => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, Array1};

    #[test]
    fn test_dot() {
        let a = arr1(&[1.0f32, 2.0, 3.0]);
        let b = arr1(&[4.0f32, -5.0, 6.0]);
        assert!((dot(a.view(), b.view()) - 12.0).abs() < 1e-6);
    }

    #[test]
    fn test_matvec_and_transpose() {
        // 2×3
        let m = arr2(&[[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let x = arr1(&[1.0f32, 0.0, -1.0]);
        let mut out = Array1::zeros(2);
        matvec(m.view(), x.view(), out.view_mut());
        assert!((out[0] + 2.0).abs() < 1e-6);
        assert!((out[1] + 2.0).abs() < 1e-6);

        let y = arr1(&[1.0f32, 2.0]);
        let mut out_t = Array1::zeros(3);
        matvec_t(m.view(), y.view(), out_t.view_mut());
        assert!((out_t[0] - 9.0).abs() < 1e-6);
        assert!((out_t[1] - 12.0).abs() < 1e-6);
        assert!((out_t[2] - 15.0).abs() < 1e-6);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let m = ndarray::Array2::from_shape_fn((7, 33), |(i, j)| ((i * 31 + j * 7) % 13) as f32 * 0.1 - 0.6);
        let x = Array1::from_shape_fn(7, |i| i as f32 * 0.25 - 1.0);
        let mut seq = Array1::zeros(33);
        let mut par = Array1::zeros(33);
        matvec_t(m.view(), x.view(), seq.view_mut());
        matvec_t_parallel(m.view(), x.view(), par.view_mut());
        assert_eq!(seq, par);
    }

    #[test]
    fn test_softmax_stable_large_values() {
        let mut x = arr1(&[1000.0f32, 1001.0, 1002.0]);
        softmax_in_place(x.view_mut());
        assert!((x.sum() - 1.0).abs() < 1e-5);
        assert!(x.iter().all(|v| v.is_finite()));
        assert!(x[2] > x[1] && x[1] > x[0]);
    }

    #[test]
    fn test_softmax_empty() {
        let mut x: Array1<f32> = Array1::zeros(0);
        softmax_in_place(x.view_mut());
        assert_eq!(x.len(), 0);
    }

    #[test]
    fn test_axpy() {
        let mut y = arr1(&[1.0f32, 1.0]);
        let x = arr1(&[2.0f32, -4.0]);
        axpy(y.view_mut(), 0.5, x.view());
        assert!((y[0] - 2.0).abs() < 1e-6);
        assert!((y[1] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_entropy_uniform() {
        let p = arr1(&[0.25f32; 4]);
        assert!((entropy(p.view()) - 4.0f32.ln()).abs() < 1e-5);

        let one_hot = arr1(&[0.0f32, 1.0, 0.0]);
        assert!(entropy(one_hot.view()).abs() < 1e-7);
    }

    #[test]
    fn test_argmax_first_max() {
        let x = arr1(&[0.5f32, 2.0, 2.0, -1.0]);
        assert_eq!(argmax(x.view()), 1);
    }

    #[test]
    fn test_top_k_ties_and_exclusion() {
        let x = arr1(&[0.1f32, 0.3, 0.05, 0.3, 0.2]);
        assert_eq!(top_k_excluding(x.view(), 3, None), vec![1, 3, 4]);
        assert_eq!(top_k_excluding(x.view(), 2, Some(1)), vec![3, 4]);
        // k larger than what is selectable
        assert_eq!(top_k_excluding(x.view(), 10, Some(0)).len(), 4);
        assert!(top_k_excluding(x.view(), 0, None).is_empty());
    }
}
