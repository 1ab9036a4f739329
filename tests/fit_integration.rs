use ionofit::config::FitConfig;
use ionofit::fit::{Fit, FitResult};
use ionofit::source::{MemorySource, RecordSet};
use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

/// Regular lat/lon grid at a fixed 300 km altitude.
fn grid_coords(nlat: usize, nlon: usize) -> (Array1<f64>, Array1<f64>, Array1<f64>) {
    let n = nlat * nlon;
    let mut lat = Array1::<f64>::zeros(n);
    let mut lon = Array1::<f64>::zeros(n);
    let mut idx = 0;
    for i in 0..nlat {
        for j in 0..nlon {
            lat[idx] = 75.0 + 5.0 * i as f64 / (nlat.max(2) - 1) as f64;
            lon[idx] = 260.0 + 20.0 * j as f64 / (nlon.max(2) - 1) as f64;
            idx += 1;
        }
    }
    let alt = Array1::from_elem(n, 300e3);
    (lat, lon, alt)
}

fn base_config(method: &str, kinds: &[&str], maxk: usize, maxl: usize) -> FitConfig {
    FitConfig {
        regularization_list: kinds.iter().map(|s| s.to_string()).collect(),
        regularization_method: method.into(),
        maxk,
        maxl,
        cap_lim: 6.0,
        max_z_int: 10.0,
        errlim: (1.0, 1e30),
        chi2lim: (0.0, 1e9),
        goodfitcode: vec![1],
        param: "dens".into(),
        manual_params: Default::default(),
        snapshot: Default::default(),
    }
}

fn records_with_values(
    lat: Array1<f64>,
    lon: Array1<f64>,
    alt: Array1<f64>,
    values: Vec<Array1<f64>>,
    error: f64,
) -> RecordSet {
    let n = lat.len();
    let nrec = values.len();
    let mut value = Array2::<f64>::zeros((nrec, n));
    for (i, row) in values.iter().enumerate() {
        value.row_mut(i).assign(row);
    }
    RecordSet {
        utime: (0..nrec).map(|i| (60.0 * i as f64, 60.0 * (i + 1) as f64)).collect(),
        lat,
        lon,
        alt,
        value,
        error: Array2::from_elem((nrec, n), error),
        chi2: None,
        fitcode: None,
        mask: None,
    }
}

#[test]
fn constant_field_is_recovered_with_zero_regularization() {
    // 10 samples on a 2×5 grid, constant density, and more basis functions
    // than samples: the min-norm least-squares solve must interpolate the
    // constant exactly at the sample points.
    let (lat, lon, alt) = grid_coords(2, 5);
    let constant = 1.0e11;
    let values = vec![Array1::from_elem(10, constant)];
    let records = records_with_values(lat, lon, alt, values, 1.0e10);

    let mut config = base_config("manual", &["0thorder"], 1, 4);
    config.manual_params.insert("0thorder".into(), 0.0);

    let source = MemorySource {
        records,
        name: "synthetic-constant".into(),
    };
    let fit = Fit::new(config, source).expect("valid configuration");
    let basis = fit.model().clone();
    let result = fit.run(None, None).expect("session completes");

    assert_eq!(result.coeffs.nrows(), 1);
    assert!(result.coeffs.row(0).iter().all(|v| v.is_finite()));
    assert!(
        result.chi_sq[0] < 1e-10,
        "zero-regularization interpolation should drive chi² to zero, got {}",
        result.chi_sq[0]
    );

    // Re-evaluate the fitted model at the sample points.
    let (lat, lon, alt) = grid_coords(2, 5);
    let a = basis.basis(&result.center, lat.view(), lon.view(), alt.view());
    let fitted = a.dot(&result.coeffs.row(0));
    for &v in fitted.iter() {
        assert!(
            (v - constant).abs() / constant < 1e-6,
            "fitted value {v:.6e} does not reproduce the constant"
        );
    }
}

#[test]
fn chi2_session_fits_noisy_data_and_reports_bounded_chi_squared() {
    let (lat, lon, alt) = grid_coords(5, 5);
    let n = lat.len();
    let sigma = 1.0e10;
    let mut rng = StdRng::seed_from_u64(20171119);
    let noise = Normal::new(0.0, sigma).expect("valid normal");

    let mut values = Vec::new();
    for _ in 0..2 {
        let row = Array1::from_shape_fn(n, |_| 1.0e11 + noise.sample(&mut rng));
        values.push(row);
    }
    let records = records_with_values(lat, lon, alt, values, sigma);

    let config = base_config("chi2", &["0thorder"], 1, 4);
    let source = MemorySource {
        records,
        name: "synthetic-noisy".into(),
    };
    let fit = Fit::new(config, source).expect("valid configuration");
    let result = fit.run(None, None).expect("session completes");

    for rec in 0..2 {
        let chi2 = result.chi_sq[rec];
        assert!(chi2.is_finite(), "record {rec} chi² is {chi2}");
        assert!(
            chi2 > 0.0 && chi2 <= n as f64 * 1.01,
            "record {rec} chi² {chi2} outside (0, N]"
        );
        assert!(result.coeffs.row(rec).iter().all(|v| v.is_finite()));
    }

    // Every grid point on the shell is in convex position, so the hull
    // keeps the full footprint.
    assert_eq!(result.hull_vertices.nrows(), n);
    assert_eq!(result.regularization_list, vec!["0thorder".to_string()]);
    assert_eq!(result.reg_method, "chi2");
}

#[test]
fn all_nan_record_degrades_to_nan_slots_without_failing_the_session() {
    let (lat, lon, alt) = grid_coords(2, 5);
    let good = Array1::from_elem(10, 2.0e11);
    let bad = Array1::from_elem(10, f64::NAN);
    let records = records_with_values(lat, lon, alt, vec![good, bad], 1.0e10);

    let mut config = base_config("manual", &["0thorder"], 1, 4);
    config.manual_params.insert("0thorder".into(), 0.0);
    let source = MemorySource {
        records,
        name: "synthetic-gappy".into(),
    };
    let fit = Fit::new(config, source).expect("valid configuration");
    let result = fit.run(None, None).expect("session completes despite the dead record");

    assert_eq!(result.utime.len(), 2);
    assert!(result.coeffs.row(0).iter().all(|v| v.is_finite()));
    assert!(result.chi_sq[0].is_finite());

    // The dead record keeps its slot, filled with NaN end to end.
    assert!(result.coeffs.row(1).iter().all(|v| v.is_nan()));
    assert!(result.chi_sq[1].is_nan());
    assert!(
        result
            .covariance
            .index_axis(ndarray::Axis(0), 1)
            .iter()
            .all(|v| v.is_nan())
    );
}

#[test]
fn masked_points_are_missing_before_filtering() {
    let (lat, lon, alt) = grid_coords(2, 5);
    let values = vec![Array1::from_elem(10, 1.5e11)];
    let mut records = records_with_values(lat, lon, alt, values, 1.0e10);
    // Externally derived validity mask knocks out three bins.
    let mut mask = Array2::from_elem((1, 10), true);
    mask[[0, 0]] = false;
    mask[[0, 4]] = false;
    mask[[0, 9]] = false;
    records.mask = Some(mask);

    let mut config = base_config("manual", &["0thorder"], 1, 2);
    config.manual_params.insert("0thorder".into(), 0.0);
    let source = MemorySource {
        records,
        name: "synthetic-masked".into(),
    };
    let fit = Fit::new(config, source).expect("valid configuration");
    let result = fit.run(None, None).expect("session completes");

    // 7 surviving samples against 4 basis functions still fit cleanly.
    assert!(result.coeffs.row(0).iter().all(|v| v.is_finite()));
    assert!(result.chi_sq[0].is_finite());
}

#[test]
fn unsupported_regularization_kind_fails_before_any_record_is_processed() {
    let (lat, lon, alt) = grid_coords(2, 5);
    let values = vec![Array1::from_elem(10, 1.0e11)];
    let records = records_with_values(lat, lon, alt, values, 1.0e10);
    let config = base_config("chi2", &["laplacian3d"], 1, 2);
    let source = MemorySource {
        records,
        name: "synthetic".into(),
    };
    let err = Fit::new(config, source).err().expect("configuration must be rejected");
    assert!(err.to_string().contains("laplacian3d"));
}

#[test]
fn fit_result_file_round_trip_preserves_all_arrays() {
    let (lat, lon, alt) = grid_coords(2, 5);
    let good = Array1::from_elem(10, 1.0e11);
    let bad = Array1::from_elem(10, f64::NAN);
    let records = records_with_values(lat, lon, alt, vec![good, bad], 1.0e10);

    let mut config = base_config("manual", &["0thorder"], 1, 3);
    config.manual_params.insert("0thorder".into(), 1e-2);
    let source = MemorySource {
        records,
        name: "synthetic-roundtrip".into(),
    };
    let fit = Fit::new(config, source).expect("valid configuration");
    let result = fit.run(None, None).expect("session completes");

    let path = std::env::temp_dir().join("ionofit_integration_roundtrip.json");
    result.save(&path).expect("save coefficient file");
    let back = FitResult::load(&path).expect("load coefficient file");
    std::fs::remove_file(&path).ok();

    assert_eq!(back.utime, result.utime);
    for (x, y) in back.coeffs.iter().zip(result.coeffs.iter()) {
        assert!(
            x.to_bits() == y.to_bits() || (x.is_nan() && y.is_nan()),
            "coefficient mismatch after reload: {x} vs {y}"
        );
    }
    for (x, y) in back.covariance.iter().zip(result.covariance.iter()) {
        assert!(x.to_bits() == y.to_bits() || (x.is_nan() && y.is_nan()));
    }
    for (x, y) in back.chi_sq.iter().zip(result.chi_sq.iter()) {
        assert!(x.to_bits() == y.to_bits() || (x.is_nan() && y.is_nan()));
    }
    for (x, y) in back.hull_vertices.iter().zip(result.hull_vertices.iter()) {
        assert_eq!(x.to_bits(), y.to_bits());
    }
    assert_eq!(back.center, result.center);
    assert_eq!(back.basis, result.basis);
    assert_eq!(back.source_filename, result.source_filename);

    // The reloaded file is directly evaluable: the first record is covered,
    // the disqualified second record refuses evaluation.
    let (lat, lon, alt) = grid_coords(2, 5);
    let n = lat.len();
    let mut r = Array1::<f64>::zeros(n);
    let mut theta = Array1::<f64>::zeros(n);
    let mut phi = Array1::<f64>::zeros(n);
    for j in 0..n {
        let (rj, tj, pj) = ionofit::coords::geodetic_to_spherical(lat[j], lon[j], alt[j]);
        r[j] = rj;
        theta[j] = tj;
        phi[j] = pj;
    }
    let eval = back
        .eval_at(30.0, r.view(), theta.view(), phi.view(), true, true)
        .expect("first record is evaluable");
    assert!(eval.value.iter().all(|v| v.is_finite()));
    assert!(eval.gradient.is_some());
    assert!(eval.value_var.is_some());
    assert!(
        back.eval_at(90.0, r.view(), theta.view(), phi.view(), false, false)
            .is_none(),
        "disqualified record must refuse evaluation"
    );
}
