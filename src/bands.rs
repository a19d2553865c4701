//! Nominal survey bands and their beam widths.
//!
//! Used to pick an aperture radius when none is given: the radius becomes the
//! FWHM of the band the map's frequency falls in.

use crate::error::{PhotometryError, Result};

/// Relative tolerance when matching a map frequency to a band.
const FREQUENCY_TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurveyBand {
    /// Band name; the rounded frequency in GHz.
    pub label: &'static str,
    /// Effective centre frequency in GHz.
    pub frequency_ghz: f64,
    /// Beam full width at half maximum in arcminutes.
    pub fwhm_arcmin: f64,
}

const fn band(label: &'static str, frequency_ghz: f64, fwhm_arcmin: f64) -> SurveyBand {
    SurveyBand {
        label,
        frequency_ghz,
        fwhm_arcmin,
    }
}

/// Planck LFI/HFI, DIRBE and IRAS bands.
pub const SURVEY_BANDS: &[SurveyBand] = &[
    band("30", 28.405889, 33.1587),
    band("44", 44.072241, 28.0852),
    band("70", 70.421396, 13.0812),
    band("100", 100.0, 9.88),
    band("143", 143.0, 7.18),
    band("217", 217.0, 4.87),
    band("353", 353.0, 4.65),
    band("545", 545.0, 4.72),
    band("857", 857.0, 4.39),
    band("1874", 1874.0, 0.86),
    band("2141", 2141.0, 0.86),
    band("2998", 2998.0, 4.3),
    band("3331", 3331.0, 0.86),
    band("4612", 4612.0, 0.86),
    band("4997", 4997.0, 4.0),
    band("11992", 11992.0, 3.8),
    band("16655", 16655.0, 0.86),
    band("24983", 24983.0, 3.8),
    band("33310", 33310.0, 0.86),
];

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= FREQUENCY_TOLERANCE * b.abs()
}

impl SurveyBand {
    /// `true` if `frequency_ghz` is this band's label value or its centre frequency.
    pub fn matches(&self, frequency_ghz: f64) -> bool {
        let label_ghz = self.label.parse::<f64>().unwrap_or(f64::NAN);
        close(frequency_ghz, label_ghz) || close(frequency_ghz, self.frequency_ghz)
    }
}

/// Band containing `frequency_ghz`.
pub fn find_band(frequency_ghz: f64) -> Result<&'static SurveyBand> {
    SURVEY_BANDS
        .iter()
        .find(|b| b.matches(frequency_ghz))
        .ok_or(PhotometryError::UnknownBand(frequency_ghz))
}

/// Nominal beam FWHM in arcminutes for `frequency_ghz`.
pub fn nominal_fwhm_arcmin(frequency_ghz: f64) -> Result<f64> {
    find_band(frequency_ghz).map(|b| b.fwhm_arcmin)
}
