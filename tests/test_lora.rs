use arianna_body::core::{LungConfig, LungModel};
use arianna_body::learning::{
    build_target_error, compose_output_projection, AdapterConfig, LowRankAdapter,
};
use ndarray::{arr1, Array1};

fn adapter(in_dim: usize, out_dim: usize, rank: usize, seed: u64) -> LowRankAdapter {
    let config = AdapterConfig {
        in_dim,
        out_dim,
        rank,
        alpha: 4.0,
        lr: 0.05,
        decay: 0.01,
        seed,
    };
    LowRankAdapter::new(config).unwrap()
}

fn x() -> Array1<f32> {
    Array1::from_shape_fn(8, |i| ((i as f32) * 0.7).sin())
}

fn dy() -> Array1<f32> {
    Array1::from_shape_fn(6, |o| if o == 2 { 1.0 } else { -0.2 })
}

#[test]
fn zero_dimensions_fail() {
    for (i, o, r) in [(0, 6, 2), (8, 0, 2), (8, 6, 0)] {
        assert!(LowRankAdapter::new(AdapterConfig::new(i, o, r)).is_err());
    }
}

#[test]
fn reset_gives_zero_output() {
    let mut a = adapter(8, 6, 2, 1);
    a.notch_step(x().view(), dy().view(), 1.0).unwrap();
    a.reset();
    assert_eq!(a.delta_norm(), 0.0);
    assert!(a.forward(x().view()).iter().all(|&v| v == 0.0));
}

#[test]
fn single_step_from_zero_increases_norm() {
    let mut a = adapter(8, 6, 2, 1);
    a.reset();
    let before = a.delta_norm();
    a.notch_step(x().view(), dy().view(), 0.5).unwrap();
    assert!(a.delta_norm() > before);
}

#[test]
fn doubling_alpha_doubles_output() {
    let mut a = adapter(8, 6, 4, 2);
    for _ in 0..3 {
        a.notch_step(x().view(), dy().view(), 1.0).unwrap();
    }
    for k in [0.25f32, 1.0, 8.0] {
        let mut single = Array1::zeros(6);
        let mut double = Array1::zeros(6);
        a.apply_with_alpha(x().view(), single.view_mut(), k);
        a.apply_with_alpha(x().view(), double.view_mut(), 2.0 * k);
        for (s, d) in single.iter().zip(double.iter()) {
            assert_eq!(2.0 * s, *d);
        }
    }
}

#[test]
fn scale_soft_reset_and_clamp() {
    let mut a = adapter(8, 6, 2, 3);
    for _ in 0..4 {
        a.notch_step(x().view(), dy().view(), 1.0).unwrap();
    }
    let n = a.delta_norm();

    let mut up = a.clone();
    up.scale(3.0);
    assert!((up.delta_norm() - 3.0 * n).abs() < 1e-4);

    let mut soft = a.clone();
    let mut scaled = a.clone();
    soft.soft_reset(0.4);
    scaled.scale(0.4);
    assert_eq!(soft.delta_norm(), scaled.delta_norm());

    let mut clamped = a.clone();
    clamped.clamp(n / 2.0);
    assert!(clamped.delta_norm() <= n / 2.0 + 1e-5);

    a.clamp(n + 1.0);
    assert_eq!(a.delta_norm(), n);
}

#[test]
fn merging_aligned_adapters_grows_norm() {
    let mut a = adapter(8, 6, 2, 10);
    let mut b = adapter(8, 6, 2, 11);
    a.reset();
    b.reset();
    a.notch_step(x().view(), dy().view(), 1.0).unwrap();
    b.notch_step(x().view(), dy().view(), 1.0).unwrap();

    let before = a.delta_norm();
    let ya = a.forward(x().view());
    let yb = b.forward(x().view());
    a.merge(&b, 1.0).unwrap();
    assert!(a.delta_norm() > before);

    let merged = a.forward(x().view());
    for i in 0..6 {
        assert!((merged[i] - ya[i] - yb[i]).abs() < 1e-5);
    }
}

#[test]
fn same_seed_same_trajectory() {
    let run = |seed| {
        let mut a = adapter(8, 6, 3, seed);
        a.reset();
        for s in [1.0f32, 0.5, 0.25, 2.0] {
            a.notch_step(x().view(), dy().view(), s).unwrap();
        }
        a.delta_norm()
    };
    assert!((run(99) - run(99)).abs() <= 1e-6);
}

#[test]
fn target_error_vector() {
    let probs = arr1(&[0.05f32, 0.4, 0.1, 0.3, 0.15]);
    let dy = build_target_error(probs.view(), 0, 1.0, 0.5, 2);
    assert_eq!(dy[0], 1.0);
    assert!(dy[1] < 0.0);
    assert!(dy[3] < 0.0);
    assert_eq!(dy[2], 0.0);
    assert_eq!(dy[4], 0.0);
}

#[test]
fn factor_norms_recombine_to_delta_norm() {
    let mut a = adapter(8, 6, 2, 4);
    a.notch_step(x().view(), dy().view(), 1.0).unwrap();
    let (na, nb) = a.factor_norms();
    assert!(((na * na + nb * nb).sqrt() - a.delta_norm()).abs() < 1e-4);
}

#[test]
fn copy_params_layout() {
    let a = adapter(8, 6, 2, 4);
    let p = a.copy_params();
    assert_eq!(&p[..6], &[8.0, 6.0, 2.0, 4.0, 0.05, 0.01]);
    assert_eq!(p[6], 0.0);
}

#[test]
fn adapter_drives_lung_through_composition() {
    let mut lung = LungModel::new(LungConfig::new(6, 8, 4, 2)).unwrap();
    let mut a = adapter(8, 6, 2, 5);
    a.reset();

    lung.forward(&[1, 3]);
    let hidden = lung.hidden().to_owned();
    let target = 2usize;
    for _ in 0..5 {
        a.experience_step(hidden.view(), lung.probabilities(), target, 1.0, 1.0, 0.5, 2)
            .unwrap();
    }

    let logits_before = lung.output_weights().t().dot(&hidden);
    compose_output_projection(&mut lung, &a, 1.0).unwrap();
    let logits_after = lung.output_weights().t().dot(&hidden);
    assert!(logits_after[target] > logits_before[target]);
}

#[test]
fn fresh_adapter_has_zero_delta_norm() {
    let mut a = adapter(8, 6, 2, 7);
    assert_eq!(a.delta_norm(), 0.0);
    assert_eq!(a.factor_norms(), (0.0, 0.0));
    a.clamp(0.5);
    assert_eq!(a.factor_norms(), (0.0, 0.0));
}
