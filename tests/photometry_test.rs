//! Integration tests: measure synthetic HEALPix maps with known content and check
//! the recovered fluxes and uncertainties.


use approx::assert_relative_eq;
use hpxphot::healpix::coordinate_to_vector;
use hpxphot::stats;
use hpxphot::{
    ApertureSpec, AperturePhotometer, Healpix, MeasureConfig, NoiseModel, Ordering, PhotometryError,
    PixelGeometry, SkyMap, UNSEEN,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Uniform};
use test_maps::{add_gaussian_source, white_noise_map};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
}

/// Flat nside=4 map of ones in Jy/pixel: zero net flux, background equal to
/// the number of inner pixels.
#[test]
fn test_flat_map_nside4() {
    init_tracing();
    let map = SkyMap::constant(4, 1.0, 100.0, "Jy/pixel", Ordering::Ring);
    let phot = AperturePhotometer::new();
    let config = MeasureConfig::new(900.0, NoiseModel::Approximate);

    // nside=4 pixels are ~15 deg across, so the radii are in degrees here.
    let aperture = ApertureSpec::from_arcmin(900.0, 900.0, 1800.0).unwrap();
    for (lon, lat) in [(0.0, 0.0), (45.0, 30.0), (200.0, -60.0), (310.0, 80.0)] {
        let m = phot.measure_detailed(&map, lon, lat, &aperture, &config).unwrap();
        assert!(m.n_inner > 0);
        assert_eq!(m.result.flux_density, 0.0);
        assert_eq!(m.result.background_density, m.n_inner as f64);
        // No scatter in the annulus.
        assert_eq!(m.result.flux_density_error, 0.0);
    }

    // Arcminute radii fall inside a single pixel: at a pixel centre all three
    // discs hold that one pixel and the annulus is empty.
    let center = Healpix.pixel_center(4, 100, Ordering::Ring).unwrap();
    let lat = center.z.asin().to_degrees();
    let lon = center.y.atan2(center.x).to_degrees();
    let small = ApertureSpec::from_arcmin(10.0, 10.0, 20.0).unwrap();
    let err = phot.measure(&map, lon, lat, &small, &config).unwrap_err();
    assert_eq!(
        err,
        PhotometryError::NoGoodPixels {
            n_inner: 1,
            n_outer1: 1,
            n_outer2: 1,
            n_annulus: 0
        }
    );
}

/// Any unit, any position: a constant map has zero net flux.
#[test]
fn test_flat_map_zero_flux_all_units() {
    init_tracing();
    let mut rng = StdRng::seed_from_u64(11);
    let lon_dist = Uniform::new(0.0, 360.0).unwrap();
    let lat_dist = Uniform::new(-89.0, 89.0).unwrap();
    let aperture = ApertureSpec::from_arcmin(60.0, 90.0, 150.0).unwrap();
    let phot = AperturePhotometer::new();

    for unit in ["K_RJ", "mK_CMB", "uK_RJ", "MJy/sr", "Jy/pixel", "average"] {
        let map = SkyMap::constant(64, 2.5, 143.0, unit, Ordering::Nested);
        for noise_model in [NoiseModel::Approximate, NoiseModel::WhiteNoise] {
            let config = MeasureConfig::new(60.0, noise_model);
            for _ in 0..10 {
                let lon = lon_dist.sample(&mut rng);
                let lat = lat_dist.sample(&mut rng);
                let r = phot.measure(&map, lon, lat, &aperture, &config).unwrap();
                assert!(
                    r.flux_density.abs() <= 1e-12 * r.background_density.abs(),
                    "{} at ({}, {}): flux {}",
                    unit,
                    lon,
                    lat,
                    r.flux_density
                );
                assert_eq!(r.flux_density_error, 0.0);
            }
        }
    }
}

/// Blanking every pixel outside the outer radius changes nothing.
#[test]
fn test_sentinels_outside_apertures_are_ignored() {
    init_tracing();
    let (lon, lat) = (123.0, -40.0);
    let mut map = white_noise_map(64, 1.0, 3, 30.0, "K_CMB", Ordering::Ring);
    add_gaussian_source(&mut map, lon, lat, 120.0, 5.0);

    let aperture = ApertureSpec::from_arcmin(120.0, 180.0, 300.0).unwrap();
    let phot = AperturePhotometer::new();
    for noise_model in [NoiseModel::Approximate, NoiseModel::WhiteNoise] {
        let config = MeasureConfig::new(120.0, noise_model);
        let before = phot.measure(&map, lon, lat, &aperture, &config).unwrap();

        let mut blanked = map.clone();
        let center = coordinate_to_vector(lon, lat);
        let cos_limit = (aperture.outer2_rad() + 1f64.to_radians()).cos();
        let mut n_blanked = 0;
        for pix in 0..blanked.len() {
            let v = Healpix.pixel_center(64, pix, Ordering::Ring).unwrap();
            if v.dot(&center) < cos_limit {
                blanked.values[pix] = UNSEEN;
                n_blanked += 1;
            }
        }
        assert!(n_blanked > blanked.len() / 2);

        let after = phot.measure(&blanked, lon, lat, &aperture, &config).unwrap();
        assert_eq!(before, after);
    }
}

/// A bright, isolated source is recovered when the aperture encloses it.
#[test]
fn test_gaussian_source_recovery() {
    init_tracing();
    let (lon, lat) = (30.0, 10.0);
    let mut map = SkyMap::constant(128, 0.0, 857.0, "Jy/pixel", Ordering::Ring);
    add_gaussian_source(&mut map, lon, lat, 120.0, 10.0);
    let truth: f64 = map.values.iter().sum();

    // Flat offset: removed by the background estimate.
    for v in map.values.iter_mut() {
        *v += 3.0;
    }

    let aperture = ApertureSpec::from_arcmin(360.0, 480.0, 720.0).unwrap();
    let r = AperturePhotometer::new()
        .measure(&map, lon, lat, &aperture, &MeasureConfig::new(120.0, NoiseModel::WhiteNoise))
        .unwrap();
    assert_relative_eq!(r.flux_density, truth, max_relative = 0.01);
}

/// The white-noise error matches the scatter of fluxes over many noise
/// realisations.
#[test]
fn test_white_noise_error_matches_monte_carlo() {
    init_tracing();
    let aperture = ApertureSpec::from_arcmin(300.0, 480.0, 1200.0).unwrap();
    let config = MeasureConfig::new(300.0, NoiseModel::WhiteNoise);
    let phot = AperturePhotometer::new();

    let mut fluxes = Vec::new();
    let mut errors = Vec::new();
    for seed in 0..300 {
        let map = white_noise_map(32, 2.0, 1000 + seed, 30.0, "Jy/pixel", Ordering::Ring);
        let r = phot.measure(&map, 80.0, 20.0, &aperture, &config).unwrap();
        fluxes.push(r.flux_density);
        errors.push(r.flux_density_error);
    }
    let scatter = stats::std_dev(&fluxes);
    let predicted = stats::mean(&errors);
    println!("Monte Carlo scatter {:.3}, predicted {:.3}", scatter, predicted);
    assert_relative_eq!(scatter, predicted, max_relative = 0.15);
}

/// With more background pixels the error approaches the analytic white-noise
/// value computed from the true σ.
#[test]
fn test_white_noise_error_converges() {
    init_tracing();
    let sigma = 1.5;
    let map = white_noise_map(128, sigma, 21, 30.0, "Jy/pixel", Ordering::Ring);
    let phot = AperturePhotometer::new();
    let config = MeasureConfig::new(60.0, NoiseModel::WhiteNoise);

    let mut deviations = Vec::new();
    for outer2 in [200.0, 600.0, 1800.0] {
        let aperture = ApertureSpec::from_arcmin(60.0, 120.0, outer2).unwrap();
        let m = phot.measure_detailed(&map, 250.0, 45.0, &aperture, &config).unwrap();
        let n_in = m.n_inner as f64;
        let n_bg = m.n_annulus as f64;
        let analytic = (n_in + std::f64::consts::FRAC_PI_2 * n_in * n_in / n_bg).sqrt() * sigma;
        deviations.push((m.result.flux_density_error / analytic - 1.0).abs());
    }
    assert!(deviations[0] < 0.5, "deviations: {:?}", deviations);
    assert!(deviations[2] < 0.04, "deviations: {:?}", deviations);
}

/// The same sky stored in RING and NESTED order gives the same measurement.
#[test]
fn test_ring_and_nested_agree() {
    init_tracing();
    let nside = 32;
    let ring = white_noise_map(nside, 1.0, 5, 44.0, "mK_RJ", Ordering::Ring);
    let mut nested = ring.clone();
    nested.ordering = Ordering::Nested;
    for (pix, &v) in ring.values.iter().enumerate() {
        let npix = Healpix.ring_to_nested(nside, pix).unwrap();
        nested.values[npix] = v;
    }

    let aperture = ApertureSpec::from_arcmin(240.0, 300.0, 600.0).unwrap();
    let phot = AperturePhotometer::new();
    for noise_model in [NoiseModel::Approximate, NoiseModel::WhiteNoise] {
        let config = MeasureConfig::new(240.0, noise_model);
        let a = phot.measure_detailed(&ring, 15.0, -5.0, &aperture, &config).unwrap();
        let b = phot.measure_detailed(&nested, 15.0, -5.0, &aperture, &config).unwrap();
        assert_eq!(a.n_inner, b.n_inner);
        assert_eq!(a.n_annulus, b.n_annulus);
        assert_relative_eq!(a.result.flux_density, b.result.flux_density, max_relative = 1e-10);
        assert_relative_eq!(
            a.result.flux_density_error,
            b.result.flux_density_error,
            max_relative = 1e-10
        );
        assert_relative_eq!(
            a.result.background_density,
            b.result.background_density,
            max_relative = 1e-12
        );
    }
}

/// Inner aperture pixel count never shrinks as the radius grows.
#[test]
fn test_inner_count_monotonic_in_radius() {
    let map = SkyMap::constant(64, 1.0, 30.0, "K_RJ", Ordering::Ring);
    let phot = AperturePhotometer::new();
    let config = MeasureConfig::new(60.0, NoiseModel::Approximate);
    let mut last = 0;
    for inner in [60.0, 90.0, 120.0, 180.0, 240.0] {
        let aperture = ApertureSpec::from_arcmin(inner, 300.0, 400.0).unwrap();
        let m = phot.measure_detailed(&map, 0.0, 60.0, &aperture, &config).unwrap();
        assert!(m.n_inner >= last);
        last = m.n_inner;
    }

    let center = coordinate_to_vector(0.0, 60.0);
    let small = Healpix.pixels_in_disc(64, &center, 0.05, Ordering::Nested).unwrap();
    let large = Healpix.pixels_in_disc(64, &center, 0.10, Ordering::Nested).unwrap();
    assert!(small.iter().all(|p| large.binary_search(p).is_ok()));
}
