//! Circular aperture photometry on a HEALPix map.
//!
//! A measurement uses three discs centred on the target:
//!
//! ```text
//!   inner      : source aperture, flux is summed here
//!   outer1     : inner edge of the background annulus (may equal inner)
//!   outer2     : outer edge of the background annulus
//! ```
//!
//! Sentinel pixels are removed from each disc, the annulus is `outer2 \ outer1`,
//! and the background level is the annulus median. The flux is
//! `Σ inner − n_inner · median(annulus)`, all converted to Jy/pixel.
//!
//! # Noise models
//!
//! - [`NoiseModel::Approximate`]: scales the annulus standard deviation by the
//!   number of independent beams in the aperture. Only approximate, but closer
//!   to reality for maps with correlated (beam-smoothed) noise.
//! - [`NoiseModel::WhiteNoise`]: exact for white, uncorrelated noise, using a
//!   MAD-based σ. Under-estimates the error on real, structured backgrounds.

use std::collections::HashSet;
use std::f64::consts::{FRAC_PI_2, PI};

use tracing::debug;

use crate::error::{PhotometryError, Result};
use crate::healpix::{coordinate_to_vector, npix_to_nside, Healpix, Ordering, PixelGeometry};
use crate::skymap::{is_unseen, SkyMap};
use crate::stats;
use crate::units::{convert_to_jy, MapUnit, PixelArea};
use crate::Vector3;

/// Effective solid angle of a Gaussian beam in units of FWHM².
const GAUSSIAN_BEAM_AREA: f64 = 1.13;

/// Convert arcminutes to radians.
pub fn arcmin_to_rad(arcmin: f64) -> f64 {
    (arcmin / 60.0).to_radians()
}

/// Uncertainty estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NoiseModel {
    /// Annulus σ scaled by the number of beams in the aperture (model 0).
    #[default]
    Approximate,
    /// White-noise error with a robust σ (model 1).
    WhiteNoise,
}

impl TryFrom<u8> for NoiseModel {
    type Error = PhotometryError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(NoiseModel::Approximate),
            1 => Ok(NoiseModel::WhiteNoise),
            other => Err(PhotometryError::UnknownNoiseModel(other)),
        }
    }
}

/// Radii of the source aperture and the background annulus, stored in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApertureSpec {
    inner_rad: f64,
    outer1_rad: f64,
    outer2_rad: f64,
}

impl ApertureSpec {
    /// Build from radii in arcminutes.
    pub fn from_arcmin(inner: f64, outer1: f64, outer2: f64) -> Result<Self> {
        Self::from_radians(arcmin_to_rad(inner), arcmin_to_rad(outer1), arcmin_to_rad(outer2))
    }

    /// Build from radii that are already in radians.
    ///
    /// Requires `0 < inner <= outer1 <= outer2`, all finite.
    pub fn from_radians(inner: f64, outer1: f64, outer2: f64) -> Result<Self> {
        let finite = inner.is_finite() && outer1.is_finite() && outer2.is_finite();
        if !finite || inner <= 0.0 || inner > outer1 || outer1 > outer2 {
            return Err(PhotometryError::InvalidAperture {
                inner,
                outer1,
                outer2,
            });
        }
        Ok(Self {
            inner_rad: inner,
            outer1_rad: outer1,
            outer2_rad: outer2,
        })
    }

    pub fn inner_rad(&self) -> f64 {
        self.inner_rad
    }

    pub fn outer1_rad(&self) -> f64 {
        self.outer1_rad
    }

    pub fn outer2_rad(&self) -> f64 {
        self.outer2_rad
    }
}

/// Per-measurement settings.
#[derive(Debug, Clone)]
pub struct MeasureConfig {
    /// Angular resolution (FWHM, arcmin) of the map. Only used by
    /// [`NoiseModel::Approximate`], and only needs to be approximate.
    /// A non-positive value yields a NaN error under that model.
    /// Default: 0.0 (unset)
    pub resolution_arcmin: f64,
    /// Default: [`NoiseModel::Approximate`]
    pub noise_model: NoiseModel,
    /// Overrides the map's frequency (GHz).
    /// Default: None
    pub frequency_ghz: Option<f64>,
    /// Overrides the map's unit label.
    /// Default: None
    pub unit: Option<MapUnit>,
    /// Overrides the map's pixel ordering.
    /// Default: None
    pub ordering: Option<Ordering>,
}

impl Default for MeasureConfig {
    fn default() -> Self {
        Self {
            resolution_arcmin: 0.0,
            noise_model: NoiseModel::Approximate,
            frequency_ghz: None,
            unit: None,
            ordering: None,
        }
    }
}

impl MeasureConfig {
    pub fn new(resolution_arcmin: f64, noise_model: NoiseModel) -> Self {
        Self {
            resolution_arcmin,
            noise_model,
            ..Default::default()
        }
    }
}

/// Outcome of one aperture measurement, in Jy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhotometryResult {
    /// Background-subtracted integrated flux density.
    pub flux_density: f64,
    pub flux_density_error: f64,
    /// Background level scaled to the inner aperture (`median * n_inner`).
    pub background_density: f64,
}

impl PhotometryResult {
    /// Value written to flux and error when a measurement failed.
    pub const SENTINEL: f64 = -1.0;

    /// A failed cell: flux and error set to [`Self::SENTINEL`].
    pub fn failed(background_density: f64) -> Self {
        Self {
            flux_density: Self::SENTINEL,
            flux_density_error: Self::SENTINEL,
            background_density,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.flux_density == Self::SENTINEL && self.flux_density_error == Self::SENTINEL
    }

    /// Multiply flux and error by an aperture correction.
    pub fn corrected(&self, apcor: f64) -> Self {
        Self {
            flux_density: self.flux_density * apcor,
            flux_density_error: self.flux_density_error * apcor,
            background_density: self.background_density,
        }
    }
}

/// A [`PhotometryResult`] with the pixel bookkeeping behind it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub result: PhotometryResult,
    pub nside: u32,
    /// Good pixels in the source aperture.
    pub n_inner: usize,
    /// Good pixels in the background annulus.
    pub n_annulus: usize,
    /// Native unit to Jy/pixel factor.
    pub factor: f64,
}

/// Runs aperture photometry against a pixel geometry backend.
#[derive(Debug, Clone, Default)]
pub struct AperturePhotometer<G = Healpix> {
    geometry: G,
}

impl AperturePhotometer<Healpix> {
    pub fn new() -> Self {
        Self { geometry: Healpix }
    }
}

impl<G: PixelGeometry> AperturePhotometer<G> {
    pub fn with_geometry(geometry: G) -> Self {
        Self { geometry }
    }

    /// Measure the flux at (`lon_deg`, `lat_deg`) on `map`.
    pub fn measure(
        &self,
        map: &SkyMap,
        lon_deg: f64,
        lat_deg: f64,
        aperture: &ApertureSpec,
        config: &MeasureConfig,
    ) -> Result<PhotometryResult> {
        self.measure_detailed(map, lon_deg, lat_deg, aperture, config)
            .map(|m| m.result)
    }

    /// As [`Self::measure`], also returning pixel counts and the unit factor.
    pub fn measure_detailed(
        &self,
        map: &SkyMap,
        lon_deg: f64,
        lat_deg: f64,
        aperture: &ApertureSpec,
        config: &MeasureConfig,
    ) -> Result<Measurement> {
        let unit = match config.unit {
            Some(unit) => unit,
            None => map.unit.parse()?,
        };
        self.measure_samples(
            &map.values,
            config.frequency_ghz.unwrap_or(map.frequency_ghz),
            unit,
            config.ordering.unwrap_or(map.ordering),
            &coordinate_to_vector(lon_deg, lat_deg),
            aperture,
            config.resolution_arcmin,
            config.noise_model,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn measure_samples(
        &self,
        values: &[f64],
        frequency_ghz: f64,
        unit: MapUnit,
        ordering: Ordering,
        center: &Vector3,
        aperture: &ApertureSpec,
        resolution_arcmin: f64,
        noise_model: NoiseModel,
    ) -> Result<Measurement> {
        let npix = values.len();
        let nside = npix_to_nside(npix)?;

        let query = |radius: f64| -> Result<Vec<usize>> {
            let pixels = self.geometry.pixels_in_disc(nside, center, radius, ordering)?;
            Ok(pixels
                .into_iter()
                .filter(|&p| !is_unseen(values[p]))
                .collect())
        };
        let inner = query(aperture.inner_rad())?;
        let outer1 = query(aperture.outer1_rad())?;
        let outer2 = query(aperture.outer2_rad())?;

        let outer1_set: HashSet<usize> = outer1.iter().copied().collect();
        let annulus: Vec<f64> = outer2
            .iter()
            .filter(|p| !outer1_set.contains(p))
            .map(|&p| values[p])
            .collect();

        let n_inner = inner.len();
        let n_annulus = annulus.len();
        debug!(
            "Aperture pixels: inner={}, outer1={}, outer2={}, annulus={}",
            n_inner,
            outer1.len(),
            outer2.len(),
            n_annulus
        );
        if n_inner == 0 || outer1.is_empty() || outer2.is_empty() || n_annulus == 0 {
            return Err(PhotometryError::NoGoodPixels {
                n_inner,
                n_outer1: outer1.len(),
                n_outer2: outer2.len(),
                n_annulus,
            });
        }

        let factor =
            convert_to_jy(unit, frequency_ghz, &PixelArea::from_npix(npix), Some(n_inner))?;
        let pixel_sr = 4.0 * PI / npix as f64;
        let n_in = n_inner as f64;

        let inner_flux = inner.iter().map(|&p| values[p]).sum::<f64>() * factor;
        let background = stats::median(&annulus) * factor;
        let background_scaled = background * n_in;
        let flux = inner_flux - background_scaled;

        let error = match noise_model {
            NoiseModel::Approximate => {
                let beam_sr = GAUSSIAN_BEAM_AREA * arcmin_to_rad(resolution_arcmin).powi(2);
                let n_beams = if beam_sr > 0.0 {
                    pixel_sr * n_in / beam_sr
                } else {
                    f64::NAN
                };
                stats::std_dev(&annulus) * factor * n_in / n_beams.sqrt()
            }
            NoiseModel::WhiteNoise => {
                let n_bg = n_annulus as f64;
                factor * (n_in + FRAC_PI_2 * n_in * n_in / n_bg).sqrt() * stats::mad_std(&annulus)
            }
        };

        Ok(Measurement {
            result: PhotometryResult {
                flux_density: flux,
                flux_density_error: error,
                background_density: background_scaled,
            },
            nside,
            n_inner,
            n_annulus,
            factor,
        })
    }
}

/// Flat-argument entry point using the built-in HEALPix backend.
///
/// Radii are in arcminutes, `noise_model` is 0 (approximate) or 1 (white
/// noise), and `nested` selects NESTED pixel ordering.
#[allow(clippy::too_many_arguments)]
pub fn measure_aperture_flux(
    values: &[f64],
    frequency_ghz: f64,
    lon_deg: f64,
    lat_deg: f64,
    resolution_arcmin: f64,
    inner_arcmin: f64,
    outer1_arcmin: f64,
    outer2_arcmin: f64,
    units: &str,
    noise_model: u8,
    nested: bool,
) -> Result<PhotometryResult> {
    let aperture = ApertureSpec::from_arcmin(inner_arcmin, outer1_arcmin, outer2_arcmin)?;
    let noise_model = NoiseModel::try_from(noise_model)?;
    let unit: MapUnit = units.parse()?;
    AperturePhotometer::new()
        .measure_samples(
            values,
            frequency_ghz,
            unit,
            Ordering::from_nested(nested),
            &coordinate_to_vector(lon_deg, lat_deg),
            &aperture,
            resolution_arcmin,
            noise_model,
        )
        .map(|m| m.result)
}
