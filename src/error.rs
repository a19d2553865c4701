//! Error taxonomy for aperture photometry.
//!
//! Errors fall into three scopes:
//!
//! - **per-cell**: the measurement for one (target, map) pair failed, but the map
//!   itself is fine ([`PhotometryError::NoGoodPixels`]).
//! - **map-fatal**: nothing measured on this map can be trusted (malformed pixel
//!   count, unknown units, unknown band, ...). The batch runner marks the whole
//!   map column as failed and moves on to the next map.
//! - **configuration**: the caller asked for something impossible (bad radii,
//!   unknown noise model). These are reported before any map is touched.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PhotometryError {
    /// Map length is not `12 * nside^2` for an even, integral nside.
    #[error("not a standard HEALPix map: {len} samples does not give an even integral nside")]
    MalformedMap { len: usize },

    /// NESTED ordering was requested for an nside that is not a power of two.
    #[error("NESTED ordering requires a power-of-two nside, got {0}")]
    UnsupportedNside(u32),

    /// Map unit label did not match any known unit family.
    #[error("unrecognized map unit '{0}'")]
    UnknownUnit(String),

    /// `average` units were requested without a usable inner pixel count.
    #[error("'average' units require a non-zero inner aperture pixel count")]
    MissingApertureCount,

    /// Neither a pixel count nor a pixel solid angle was supplied.
    #[error("pixel area needs either a total pixel count or a solid angle per pixel")]
    MissingPixelArea,

    /// The map frequency has no entry in the survey band table.
    #[error("no survey band matches frequency {0} GHz")]
    UnknownBand(f64),

    /// One of the aperture regions has no usable (non-sentinel) pixels.
    #[error(
        "no good pixels in aperture (inner={n_inner}, outer1={n_outer1}, outer2={n_outer2}, annulus={n_annulus})"
    )]
    NoGoodPixels {
        n_inner: usize,
        n_outer1: usize,
        n_outer2: usize,
        n_annulus: usize,
    },

    /// Aperture radii are not ordered `inner <= outer1 <= outer2`, or not positive.
    #[error("invalid aperture radii: inner={inner}, outer1={outer1}, outer2={outer2} (rad)")]
    InvalidAperture { inner: f64, outer1: f64, outer2: f64 },

    #[error("unknown noise model {0} (expected 0 or 1)")]
    UnknownNoiseModel(u8),
}

impl PhotometryError {
    /// `true` when the error invalidates every measurement on the current map.
    pub fn is_map_fatal(&self) -> bool {
        matches!(
            self,
            PhotometryError::MalformedMap { .. }
                | PhotometryError::UnsupportedNside(_)
                | PhotometryError::UnknownUnit(_)
                | PhotometryError::MissingApertureCount
                | PhotometryError::UnknownBand(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PhotometryError>;
