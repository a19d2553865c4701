//! Pixel geometry on the sphere.
//!
//! The photometry code only needs two things from a pixelization: the set of
//! pixels whose centres fall inside a disc, and the unit vector for a sky
//! coordinate. Both are behind the [`PixelGeometry`] trait so a different
//! backend (or a test double) can be dropped in without touching the photometry.
//!
//! [`Healpix`] is the built-in backend, supporting RING and NESTED ordering.

mod base;

use std::fmt;
use std::str::FromStr;

use scorus::healpix::utils::{npix2nside, nside2npix};

pub use base::Healpix;

use crate::error::{PhotometryError, Result};
use crate::Vector3;

/// Pixel numbering scheme of a HEALPix map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ordering {
    #[default]
    Ring,
    Nested,
}

impl Ordering {
    pub fn from_nested(nested: bool) -> Self {
        if nested {
            Ordering::Nested
        } else {
            Ordering::Ring
        }
    }
}

impl fmt::Display for Ordering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ordering::Ring => f.write_str("RING"),
            Ordering::Nested => f.write_str("NESTED"),
        }
    }
}

impl FromStr for Ordering {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RING" => Ok(Ordering::Ring),
            "NESTED" | "NEST" => Ok(Ordering::Nested),
            other => Err(format!("unknown HEALPix ordering '{}'", other)),
        }
    }
}

/// A pixelization capable of disc queries.
pub trait PixelGeometry {
    /// All pixels whose centres lie within `radius_rad` (great-circle distance)
    /// of `center`. Indices are unique and sorted ascending.
    fn pixels_in_disc(
        &self,
        nside: u32,
        center: &Vector3,
        radius_rad: f64,
        ordering: Ordering,
    ) -> Result<Vec<usize>>;
}

impl<G: PixelGeometry + ?Sized> PixelGeometry for &G {
    fn pixels_in_disc(
        &self,
        nside: u32,
        center: &Vector3,
        radius_rad: f64,
        ordering: Ordering,
    ) -> Result<Vec<usize>> {
        (**self).pixels_in_disc(nside, center, radius_rad, ordering)
    }
}

/// Unit vector for a longitude / latitude pair in degrees.
///
/// Colatitude is `θ = π/2 - lat`, azimuth `φ = lon`.
pub fn coordinate_to_vector(lon_deg: f64, lat_deg: f64) -> Vector3 {
    let (sin_lon, cos_lon) = lon_deg.to_radians().sin_cos();
    let (sin_lat, cos_lat) = lat_deg.to_radians().sin_cos();
    Vector3::new(cos_lat * cos_lon, cos_lat * sin_lon, sin_lat)
}

/// Total number of pixels for a given nside.
pub fn nside_to_npix(nside: u32) -> usize {
    nside2npix(nside as usize)
}

/// Resolution parameter implied by a map of `npix` samples.
///
/// Accepts only maps whose `sqrt(npix / 12)` is integral and even, which is the
/// check applied to every map before photometry.
pub fn npix_to_nside(npix: usize) -> Result<u32> {
    let nside = (npix as f64 / 12.0).sqrt();
    let rounded = (nside * 10.0).round() / 10.0;
    if npix == 0 || rounded != nside || nside % 2.0 != 0.0 {
        return Err(PhotometryError::MalformedMap { len: npix });
    }
    let nside = npix2nside(npix);
    if nside2npix(nside) != npix {
        return Err(PhotometryError::MalformedMap { len: npix });
    }
    u32::try_from(nside).map_err(|_| PhotometryError::MalformedMap { len: npix })
}
