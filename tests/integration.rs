//! Integration tests for the Glow flow library

use approx::assert_abs_diff_eq;
use glow_flow::prelude::*;
use ndarray::{array, Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

fn data(rows: usize, cols: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(1.0, 3.0).unwrap();
    let mut x = Array2::from_shape_fn((rows, cols), |_| normal.sample(&mut rng));
    // correlate neighbouring features
    for j in 1..cols {
        let prev = x.column(j - 1).to_owned();
        x.column_mut(j).scaled_add(0.5, &prev);
    }
    x
}

fn config(affine: bool, context_features: usize) -> GlowConfig {
    GlowConfig {
        features: 5,
        hidden_features: 16,
        num_layers: 3,
        num_blocks_per_layer: 2,
        dropout_probability: 0.0,
        context_features,
        use_affine_coupling: affine,
        ..Default::default()
    }
}

fn assert_close(a: &Array2<f64>, b: &Array2<f64>, epsilon: f64) {
    assert_eq!(a.dim(), b.dim());
    for (x, y) in a.iter().zip(b.iter()) {
        assert_abs_diff_eq!(x, y, epsilon = epsilon);
    }
}

/// Full pipeline: build, initialize on data, evaluate, invert, sample
#[test]
fn test_conditional_affine_glow_round_trip() {
    let flow = build_glow_with_rng(&config(true, 2), &mut StdRng::seed_from_u64(1)).unwrap();
    let x = data(64, 5, 2);
    let context = data(64, 2, 3);

    let (z, ld_fwd) = flow.transform().forward(&x, Some(&context)).unwrap();
    let (x_rec, ld_inv) = flow.transform().inverse(&z, Some(&context)).unwrap();

    assert_close(&x, &x_rec, 1e-8);
    for (f, i) in ld_fwd.iter().zip(ld_inv.iter()) {
        assert_abs_diff_eq!(f + i, 0.0, epsilon = 1e-8);
    }
}

#[test]
fn test_additive_glow_round_trip() {
    let flow = build_glow_with_rng(&config(false, 0), &mut StdRng::seed_from_u64(4)).unwrap();
    let x = data(32, 5, 5);

    let noise = flow.transform_to_noise(&x, None).unwrap();
    let (x_rec, _) = flow.transform().inverse(&noise, None).unwrap();

    assert_close(&x, &x_rec, 1e-8);
}

#[test]
fn test_log_prob_is_exact_change_of_variables() {
    let flow = build_glow_with_rng(&config(true, 0), &mut StdRng::seed_from_u64(6)).unwrap();
    let x = data(20, 5, 7);

    // initialize ActNorm layers before comparing
    flow.log_prob(&x, None).unwrap();

    let (z, logabsdet) = flow.transform().forward(&x, None).unwrap();
    let expected = flow.distribution().log_density(&z).unwrap() + &logabsdet;
    assert_eq!(flow.log_prob(&x, None).unwrap(), expected);
}

#[test]
fn test_chain_logabsdet_is_sum_over_steps() {
    let flow = build_glow_with_rng(&config(true, 0), &mut StdRng::seed_from_u64(8)).unwrap();
    let x = data(16, 5, 9);
    let (_, total) = flow.transform().forward(&x, None).unwrap();

    let mut h = x.clone();
    let mut summed = Array1::<f64>::zeros(16);
    for step in flow.transform().steps() {
        let (next, logabsdet) = step.forward(&h, None).unwrap();
        summed += &logabsdet;
        h = next;
    }

    for (a, b) in total.iter().zip(summed.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-12);
    }
}

#[test]
fn test_actnorm_initializes_once_across_flow() {
    let flow = build_glow_with_rng(&config(false, 0), &mut StdRng::seed_from_u64(10)).unwrap();
    let first = data(50, 5, 11);
    let second = data(50, 5, 12) * 100.0;

    let before = flow.log_prob(&first, None).unwrap();
    flow.log_prob(&second, None).unwrap();
    let after = flow.log_prob(&first, None).unwrap();

    assert_eq!(before, after);
}

#[test]
fn test_samples_have_consistent_log_prob() {
    let flow = build_glow_with_rng(&config(true, 0), &mut StdRng::seed_from_u64(13)).unwrap();
    flow.log_prob(&data(100, 5, 14), None).unwrap();

    let mut rng = StdRng::seed_from_u64(15);
    let (samples, log_prob) = flow.sample_and_log_prob(25, None, &mut rng).unwrap();
    let recomputed = flow.log_prob(&samples, None).unwrap();

    for (a, b) in log_prob.iter().zip(recomputed.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-7);
    }
}

#[test]
fn test_context_shape_errors() {
    let flow = build_glow_with_rng(&config(false, 3), &mut StdRng::seed_from_u64(16)).unwrap();
    let x = data(4, 5, 17);
    let mut rng = StdRng::seed_from_u64(18);

    assert!(flow.log_prob(&x, None).unwrap_err().is_shape_error());
    assert!(flow
        .log_prob(&x, Some(&Array2::zeros((4, 2))))
        .unwrap_err()
        .is_shape_error());
    assert!(flow
        .sample(4, Some(&Array2::zeros((3, 3))), &mut rng)
        .unwrap_err()
        .is_shape_error());
    assert!(flow.sample(4, None, &mut rng).unwrap_err().is_shape_error());

    assert_eq!(
        flow.sample(4, Some(&Array2::zeros((4, 3))), &mut rng)
            .unwrap()
            .dim(),
        (4, 5)
    );
}

#[test]
fn test_scenario_actnorm_scale_two() {
    let layer = ActNorm::from_parameters(array![2.0, 2.0, 2.0, 2.0], array![0.0, 0.0, 0.0, 0.0])
        .unwrap();
    let (y, logabsdet) = layer.forward(&array![[1.0, 1.0, 1.0, 1.0]], None).unwrap();

    assert_eq!(y, array![[2.0, 2.0, 2.0, 2.0]]);
    assert_abs_diff_eq!(logabsdet[0], 16.0_f64.ln(), epsilon = 1e-12);
}

#[test]
fn test_scenario_additive_zero_shift_identity() {
    let mask = Mask::new(&[1.0, -1.0, 1.0, -1.0]).unwrap();
    let coupling = MaskedCoupling::additive(mask, |i, o| {
        Ok(Box::new(FnConditioner::zeros(i, o, 2)) as Box<dyn Conditioner>)
    })
    .unwrap();

    let x = data(7, 4, 19);
    let (y, logabsdet) = coupling.forward(&x, Some(&data(7, 2, 20))).unwrap();

    assert_eq!(y, x);
    assert!(logabsdet.iter().all(|&v| v == 0.0));
}

#[test]
fn test_scenario_flipped_masks_cover_all_features() {
    let transform = glow_transform(
        &GlowConfig {
            num_layers: 2,
            ..config(false, 0)
        },
        |i, o| Ok(Box::new(FnConditioner::zeros(i, o, 0)) as Box<dyn Conditioner>),
    )
    .unwrap();
    assert_eq!(transform.len(), 6);

    let masks = mask_schedule(5, 2);
    let mut covered = vec![false; 5];
    for mask in &masks {
        for &j in mask.transform_features() {
            covered[j] = true;
        }
    }
    assert!(covered.iter().all(|&c| c));
}

#[test]
fn test_scenario_identity_lu() {
    let layer = LuLinear::new(4);
    let x = data(3, 4, 21);
    let (y, logabsdet) = layer.forward(&x, None).unwrap();

    assert_close(&x, &y, 1e-12);
    for v in logabsdet.iter() {
        assert_abs_diff_eq!(*v, 0.0, epsilon = 1e-12);
    }
}

#[test]
fn test_concurrent_read_only_evaluation() {
    let flow = build_glow_with_rng(&config(true, 0), &mut StdRng::seed_from_u64(22)).unwrap();
    let x = data(30, 5, 23);
    let reference = flow.log_prob(&x, None).unwrap();

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                assert_eq!(flow.log_prob(&x, None).unwrap(), reference);
            });
        }
    });
}

#[test]
fn test_training_mode_toggle() {
    let config = GlowConfig {
        dropout_probability: 0.3,
        ..config(false, 0)
    };
    let mut flow = build_glow_with_rng(&config, &mut StdRng::seed_from_u64(24)).unwrap();
    let x = data(10, 5, 25);

    let eval = flow.log_prob(&x, None).unwrap();
    flow.set_training(true);
    flow.log_prob(&x, None).unwrap();
    flow.set_training(false);

    assert_eq!(flow.log_prob(&x, None).unwrap(), eval);
}

#[test]
fn test_config_file_round_trip() {
    let config = config(true, 2);
    let file = tempfile::NamedTempFile::new().unwrap();

    config.save(file.path()).unwrap();
    let loaded = GlowConfig::load(file.path()).unwrap();

    assert_eq!(config, loaded);
    assert!(build_glow(&loaded).is_ok());
}
