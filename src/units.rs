//! Conversion of native map units to janskys per pixel.
//!
//! Map units are parsed once into a [`MapUnit`], which resolves all of the
//! spelling variants found in HEALPix headers (`K_RJ`, `KRJ`, `mK`, `MJy/sr`, ...).
//! [`convert_to_jy`] then produces the multiplicative factor that turns one pixel
//! sample into a flux density in Jy.
//!
//! Brightness temperatures use the Rayleigh-Jeans relation
//! `S = 2 k ν² T Ω / c²` with `k` expressed in Jy units (`1381 = 1.381e-23 * 1e26`).
//! Thermodynamic (CMB) temperatures are first converted to RJ with [`planck_corr`].

use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use tracing::warn;

use crate::error::{PhotometryError, Result};

/// Speed of light used by the RJ conversion (m/s).
const SPEED_OF_LIGHT: f64 = 2.997e8;
/// Boltzmann constant scaled to Jy (1.381e-23 J/K * 1e26 Jy/(W m^-2 Hz^-1)).
const BOLTZMANN_JY: f64 = 1381.0;

const PLANCK_H: f64 = 6.62606957e-34;
const BOLTZMANN_K: f64 = 1.3806488e-23;
const T_CMB: f64 = 2.725;

/// Prefix applied to a temperature unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempScale {
    Kelvin,
    Milli,
    Micro,
}

impl TempScale {
    fn divisor(self) -> f64 {
        match self {
            TempScale::Kelvin => 1.0,
            TempScale::Milli => 1.0e3,
            TempScale::Micro => 1.0e6,
        }
    }

    fn prefix(self) -> &'static str {
        match self {
            TempScale::Kelvin => "",
            TempScale::Milli => "m",
            TempScale::Micro => "u",
        }
    }
}

/// Unit family of a map, with aliases already resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapUnit {
    /// Rayleigh-Jeans brightness temperature.
    Rj(TempScale),
    /// Thermodynamic (CMB) temperature.
    Cmb(TempScale),
    /// Surface brightness in MJy/sr.
    MJyPerSr,
    /// Already in Jy per pixel.
    JyPerPixel,
    /// Aperture average: the factor divides by the inner pixel count.
    Average,
}

impl MapUnit {
    /// Canonical label, as written back to result files.
    pub fn label(&self) -> String {
        match self {
            MapUnit::Rj(s) => format!("{}K_RJ", s.prefix()),
            MapUnit::Cmb(s) => format!("{}K_CMB", s.prefix()),
            MapUnit::MJyPerSr => "MJy/sr".to_string(),
            MapUnit::JyPerPixel => "Jy/pixel".to_string(),
            MapUnit::Average => "average".to_string(),
        }
    }
}

impl Default for MapUnit {
    fn default() -> Self {
        MapUnit::Rj(TempScale::Kelvin)
    }
}

impl fmt::Display for MapUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for MapUnit {
    type Err = PhotometryError;

    fn from_str(s: &str) -> Result<Self> {
        use TempScale::*;
        let unit = match s.trim() {
            "K" | "K_RJ" | "KRJ" => MapUnit::Rj(Kelvin),
            "mK" | "mK_RJ" | "mKRJ" => MapUnit::Rj(Milli),
            "uK" | "uK_RJ" | "uKRJ" | "µK" | "µK_RJ" | "µKRJ" => MapUnit::Rj(Micro),
            "K_CMB" | "KCMB" => MapUnit::Cmb(Kelvin),
            "mK_CMB" | "mKCMB" => MapUnit::Cmb(Milli),
            "uK_CMB" | "uKCMB" | "µK_CMB" | "µKCMB" => MapUnit::Cmb(Micro),
            "MJy/sr" | "MJY/SR" | "MjySr" => MapUnit::MJyPerSr,
            "Jy/pixel" | "JY/PIXEL" | "JY/PIX" | "JyPix" => MapUnit::JyPerPixel,
            "average" | "Average" | "avg" | "AVG" => MapUnit::Average,
            other => return Err(PhotometryError::UnknownUnit(other.to_string())),
        };
        Ok(unit)
    }
}

/// Pixel size, given either as a total pixel count or as a solid angle per pixel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PixelArea {
    pub npix: Option<usize>,
    pub solid_angle_sr: Option<f64>,
}

impl PixelArea {
    pub fn from_npix(npix: usize) -> Self {
        Self {
            npix: Some(npix),
            solid_angle_sr: None,
        }
    }

    pub fn from_solid_angle(solid_angle_sr: f64) -> Self {
        Self {
            npix: None,
            solid_angle_sr: Some(solid_angle_sr),
        }
    }

    /// Solid angle of one pixel in steradians.
    ///
    /// When both fields are set the pixel count wins and a warning is logged.
    pub fn solid_angle(&self) -> Result<f64> {
        match (self.npix, self.solid_angle_sr) {
            (Some(npix), Some(_)) => {
                warn!(
                    "Only one of npix or pixel solid angle should be given; proceeding with npix"
                );
                Ok(4.0 * PI / npix as f64)
            }
            (Some(npix), None) => Ok(4.0 * PI / npix as f64),
            (None, Some(omega)) => Ok(omega),
            (None, None) => Err(PhotometryError::MissingPixelArea),
        }
    }
}

/// CMB thermodynamic to Rayleigh-Jeans temperature correction at `freq_ghz`.
pub fn planck_corr(freq_ghz: f64) -> f64 {
    let x = PLANCK_H * (freq_ghz * 1.0e9) / BOLTZMANN_K / T_CMB;
    let ex = x.exp();
    (ex - 1.0).powi(2) / (x * x) / ex
}

/// Factor converting one sample in `unit` to Jy/pixel.
///
/// `n_inner` is only consulted for [`MapUnit::Average`], where the factor is the
/// reciprocal of the inner aperture pixel count.
pub fn convert_to_jy(
    unit: MapUnit,
    freq_ghz: f64,
    area: &PixelArea,
    n_inner: Option<usize>,
) -> Result<f64> {
    let rj = |omega: f64| {
        2.0 * BOLTZMANN_JY * (freq_ghz * 1.0e9).powi(2) / SPEED_OF_LIGHT.powi(2) * omega
    };

    let factor = match unit {
        MapUnit::Rj(scale) => rj(area.solid_angle()?) / scale.divisor(),
        MapUnit::Cmb(scale) => rj(area.solid_angle()?) / scale.divisor() / planck_corr(freq_ghz),
        MapUnit::MJyPerSr => area.solid_angle()? * 1.0e6,
        MapUnit::JyPerPixel => 1.0,
        MapUnit::Average => match n_inner {
            Some(n) if n > 0 => 1.0 / n as f64,
            _ => return Err(PhotometryError::MissingApertureCount),
        },
    };
    Ok(factor)
}

/// Same as [`convert_to_jy`], parsing the unit label first.
pub fn convert_label_to_jy(
    label: &str,
    freq_ghz: f64,
    area: &PixelArea,
    n_inner: Option<usize>,
) -> Result<f64> {
    let unit: MapUnit = label.parse()?;
    convert_to_jy(unit, freq_ghz, area, n_inner)
}
