//! # hpxphot
//!
//! **Aperture photometry on HEALPix all-sky maps**, written in Rust.
//!
//! Given a sky position and three radii, `hpxphot` sums the flux inside a
//! circular aperture, subtracts a background estimated from a surrounding
//! annulus, converts the result to janskys and reports an uncertainty.
//!
//! ## Features
//!
//! - **Unit conversion**: K_RJ, K_CMB (with milli/micro prefixes), MJy/sr,
//!   Jy/pixel and aperture averages, all converted to Jy/pixel
//! - **Two noise models**: a beam-counting approximation for correlated noise,
//!   and an exact white-noise error with a robust (MAD) σ
//! - **Built-in HEALPix geometry**: disc queries in RING and NESTED ordering,
//!   behind a [`PixelGeometry`] trait so other backends can be substituted
//! - **Batch mode**: many targets × many maps with nominal survey beams,
//!   aperture correction and per-map failure isolation
//! - **Self-contained I/O**: a pure-Rust reader for HEALPix FITS tables, plus
//!   CSV target catalogs and result tables
//!
//! ## Example
//!
//! ```no_run
//! use hpxphot::{ApertureSpec, AperturePhotometer, MeasureConfig, NoiseModel};
//! use hpxphot::mapfile::{read_healpix_fits, MapReadOptions};
//!
//! let map = read_healpix_fits("maps/lfi_30GHz.fits", &MapReadOptions::default()).unwrap();
//!
//! // 30' source aperture, background from a 40'-60' annulus
//! let aperture = ApertureSpec::from_arcmin(30.0, 40.0, 60.0).unwrap();
//! let config = MeasureConfig::new(33.16, NoiseModel::Approximate);
//!
//! let result = AperturePhotometer::new()
//!     .measure(&map, 209.01, -19.38, &aperture, &config)
//!     .unwrap();
//! println!("{:.3} ± {:.3} Jy", result.flux_density, result.flux_density_error);
//! ```
//!
//! Batch runs go through [`BatchPhotometryRunner`]:
//!
//! ```no_run
//! use hpxphot::{BatchConfig, BatchPhotometryRunner};
//! use hpxphot::catalogs::{read_map_list, read_target_csv};
//!
//! let targets = read_target_csv("targets.csv").unwrap();
//! let maps = read_map_list("maps.txt").unwrap();
//!
//! // No radius: use each band's beam FWHM and apply the aperture correction
//! let runner = BatchPhotometryRunner::new(BatchConfig {
//!     annulus_inner_arcmin: 60.0,
//!     annulus_outer_arcmin: 90.0,
//!     ..Default::default()
//! });
//! let table = runner.run(&targets, &maps).unwrap();
//! let names: Vec<String> = maps.iter().map(|p| p.display().to_string()).collect();
//! table.write_csv("fluxes.csv", &targets, &names).unwrap();
//! ```
//!
//! ## Measurement overview
//!
//! 1. **Disc queries**: collect the pixels whose centres lie within the inner,
//!    outer1 and outer2 radii, dropping `UNSEEN` pixels
//! 2. **Background**: median of the annulus `outer2 \ outer1`, scaled by the
//!    number of inner pixels
//! 3. **Flux**: inner sum minus the scaled background, in Jy
//! 4. **Error**: from the annulus scatter, per the selected [`NoiseModel`]
//!

pub mod bands;
pub mod batch;
pub mod catalogs;
mod error;
pub mod healpix;
pub mod mapfile;
pub mod photometry;
pub mod skymap;
pub mod stats;
mod target;
pub mod units;

pub use batch::{BatchConfig, BatchPhotometryRunner, FitsMapLoader, MapLoader, ResultTable};
pub use error::{PhotometryError, Result};
pub use healpix::{Healpix, Ordering, PixelGeometry};
pub use photometry::{
    measure_aperture_flux, ApertureSpec, AperturePhotometer, MeasureConfig, Measurement,
    NoiseModel, PhotometryResult,
};
pub use skymap::{SkyMap, UNSEEN};
pub use target::Target;
pub use units::{convert_to_jy, MapUnit, PixelArea};

// Sky directions are unit vectors in f64; HEALPix ring boundaries at high
// nside need more than f32 precision.
pub type Vector3 = nalgebra::Vector3<f64>;
