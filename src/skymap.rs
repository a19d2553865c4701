//! In-memory HEALPix map with the header metadata photometry needs.

use crate::error::Result;
use crate::healpix::{npix_to_nside, Ordering};

/// Sentinel marking pixels with no data.
pub const UNSEEN: f64 = -1.6375e30;

/// `true` if `value` is the [`UNSEEN`] sentinel.
///
/// Uses a relative tolerance so that a sentinel stored as `f32` and widened to
/// `f64` is still recognised.
pub fn is_unseen(value: f64) -> bool {
    (value - UNSEEN).abs() <= 1e-5 * UNSEEN.abs()
}

/// A single-column all-sky map.
#[derive(Debug, Clone, PartialEq)]
pub struct SkyMap {
    /// Pixel samples in native units, `12 * nside^2` of them.
    pub values: Vec<f64>,
    /// Observing frequency in GHz.
    pub frequency_ghz: f64,
    /// Unit label as found in the header (e.g. `"K_CMB"`). Parsed lazily so an
    /// unknown label only fails the maps that use it.
    pub unit: String,
    pub ordering: Ordering,
}

impl SkyMap {
    pub fn new(
        values: Vec<f64>,
        frequency_ghz: f64,
        unit: impl Into<String>,
        ordering: Ordering,
    ) -> Self {
        Self {
            values,
            frequency_ghz,
            unit: unit.into(),
            ordering,
        }
    }

    /// Map filled with a single value.
    pub fn constant(
        nside: u32,
        value: f64,
        frequency_ghz: f64,
        unit: impl Into<String>,
        ordering: Ordering,
    ) -> Self {
        let npix = crate::healpix::nside_to_npix(nside);
        Self::new(vec![value; npix], frequency_ghz, unit, ordering)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Resolution parameter, validated against the sample count.
    pub fn nside(&self) -> Result<u32> {
        npix_to_nside(self.values.len())
    }
}
