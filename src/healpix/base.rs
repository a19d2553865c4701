//! HEALPix pixel centres and disc queries for RING and NESTED ordering.
//!
//! Pixel centres and the RING/NESTED index mapping come from
//! [`scorus::healpix`]. The sphere is split into `12 * nside^2` equal-area
//! pixels arranged on `4 * nside - 1` iso-latitude rings, and disc queries work
//! ring by ring:
//!
//! 1. Keep only rings whose latitude `z = cos(θ)` lies inside the disc's
//!    latitude band.
//! 2. On each surviving ring, bound the azimuth window that can intersect the
//!    disc and scan only those pixels.
//! 3. Apply the exact great-circle test `dot(center, pixel) >= cos(radius)`.
//!
//! NESTED results are produced by running the query in RING order and mapping
//! every hit through [`Healpix::ring_to_nested`].

use std::f64::consts::{PI, TAU};

use scorus::coordinates::SphCoord;
use scorus::healpix::pix::{pix2ang_nest, pix2ang_ring, ring2nest, ring2z_ring};

use crate::error::{PhotometryError, Result};
use crate::Vector3;

use super::{nside_to_npix, Ordering, PixelGeometry};

/// Built-in HEALPix backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct Healpix;

/// Layout of one iso-latitude ring in RING ordering.
#[derive(Debug, Clone, Copy)]
struct RingInfo {
    /// First RING pixel index on this ring.
    start: usize,
    /// Number of pixels on this ring.
    npix: usize,
    /// `cos(θ)` of the ring.
    z: f64,
    /// Whether pixel centres are offset by half a pixel in azimuth.
    shifted: bool,
}

impl Healpix {
    /// Unit vector of the centre of pixel `pix`.
    pub fn pixel_center(&self, nside: u32, pix: usize, ordering: Ordering) -> Result<Vector3> {
        check_nside(nside, ordering)?;
        assert!(pix < nside_to_npix(nside), "pixel {} out of range", pix);
        let ang = match ordering {
            Ordering::Ring => pix2ang_ring::<f64>(nside as usize, pix),
            Ordering::Nested => pix2ang_nest::<f64>(nside as usize, pix),
        };
        Ok(sph_to_vector(&ang))
    }

    /// Convert a RING pixel index to the NESTED index of the same pixel.
    pub fn ring_to_nested(&self, nside: u32, pix: usize) -> Result<usize> {
        check_nside(nside, Ordering::Nested)?;
        assert!(pix < nside_to_npix(nside), "pixel {} out of range", pix);
        Ok(ring2nest(nside as usize, pix))
    }

    /// Disc query in RING ordering.
    fn query_disc_ring(&self, nside: u32, center: &Vector3, radius_rad: f64) -> Vec<usize> {
        let n = nside as usize;
        let radius = radius_rad.clamp(0.0, PI);
        let cos_radius = radius.cos();
        let dir = normalize_or_fallback(center);

        let z0 = dir.z.clamp(-1.0, 1.0);
        let theta0 = z0.acos();
        let sin_theta0 = ((1.0 - z0) * (1.0 + z0)).max(0.0).sqrt();
        let mut phi0 = dir.y.atan2(dir.x);
        if phi0 < 0.0 {
            phi0 += TAU;
        }

        let covers_pole = theta0 - radius <= 0.0 || theta0 + radius >= PI;
        let z_max = (theta0 - radius).max(0.0).cos();
        let z_min = (theta0 + radius).min(PI).cos();
        // Slack on the band edges; the dot-product test below is exact.
        let z_slack = 1e-12;

        let mut out = Vec::new();
        for iring in 1..(4 * n) {
            let ring = ring_info(n, iring);
            if ring.z > z_max + z_slack || ring.z < z_min - z_slack {
                continue;
            }

            let mut test = |k: usize| {
                let pix = ring.start + k;
                if dir.dot(&sph_to_vector(&pix2ang_ring::<f64>(n, pix))) >= cos_radius {
                    out.push(pix);
                }
            };

            let sin_theta = ((1.0 - ring.z) * (1.0 + ring.z)).max(0.0).sqrt();
            let denom = sin_theta0 * sin_theta;
            let x = if denom > 0.0 {
                (cos_radius - ring.z * z0) / denom
            } else {
                -1.0
            };

            if covers_pole || x <= -1.0 {
                (0..ring.npix).for_each(&mut test);
                continue;
            }

            let half_width = x.min(1.0).acos();
            let step = TAU / ring.npix as f64;
            let offset = if ring.shifted { 0.5 } else { 0.0 };
            // One pixel of margin on each side of the azimuth window.
            let k_lo = ((phi0 - half_width) / step - offset).floor() as i64 - 1;
            let k_hi = ((phi0 + half_width) / step - offset).ceil() as i64 + 1;

            if (k_hi - k_lo + 1) as usize >= ring.npix {
                (0..ring.npix).for_each(&mut test);
            } else {
                for k in k_lo..=k_hi {
                    test(k.rem_euclid(ring.npix as i64) as usize);
                }
            }
        }

        out.sort_unstable();
        out.dedup();
        out
    }
}

impl PixelGeometry for Healpix {
    fn pixels_in_disc(
        &self,
        nside: u32,
        center: &Vector3,
        radius_rad: f64,
        ordering: Ordering,
    ) -> Result<Vec<usize>> {
        check_nside(nside, ordering)?;
        let ring_pixels = self.query_disc_ring(nside, center, radius_rad);
        match ordering {
            Ordering::Ring => Ok(ring_pixels),
            Ordering::Nested => {
                let mut nested = ring_pixels
                    .into_iter()
                    .map(|p| self.ring_to_nested(nside, p))
                    .collect::<Result<Vec<usize>>>()?;
                nested.sort_unstable();
                Ok(nested)
            }
        }
    }
}

fn check_nside(nside: u32, ordering: Ordering) -> Result<()> {
    if nside == 0 || (ordering == Ordering::Nested && !nside.is_power_of_two()) {
        return Err(PhotometryError::UnsupportedNside(nside));
    }
    Ok(())
}

/// Start, length and azimuth shift of ring `iring` (1-based, from the north
/// pole).
fn ring_info(nside: usize, iring: usize) -> RingInfo {
    let npix = nside_to_npix(nside as u32);
    let ncap = 2 * nside * (nside - 1);

    let northring = if iring > 2 * nside { 4 * nside - iring } else { iring };
    let (mut start, ring_npix, shifted) = if northring < nside {
        (2 * northring * (northring - 1), 4 * northring, true)
    } else {
        let start = ncap + (northring - nside) * 4 * nside;
        (start, 4 * nside, (northring - nside) & 1 == 0)
    };
    if northring != iring {
        start = npix - start - ring_npix;
    }

    RingInfo {
        start,
        npix: ring_npix,
        z: ring2z_ring::<f64>(nside, iring),
        shifted,
    }
}

fn sph_to_vector(ang: &SphCoord<f64>) -> Vector3 {
    let (sin_theta, cos_theta) = ang.pol.sin_cos();
    let (sin_phi, cos_phi) = ang.az.sin_cos();
    Vector3::new(sin_theta * cos_phi, sin_theta * sin_phi, cos_theta)
}

fn normalize_or_fallback(v: &Vector3) -> Vector3 {
    let n = v.norm();
    if n > 0.0 {
        v / n
    } else {
        Vector3::new(1.0, 0.0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::healpix::coordinate_to_vector;
    use approx::assert_relative_eq;
    use scorus::healpix::pix::pix2ring_ring;
    use std::collections::HashSet;

    fn brute_force_disc(
        nside: u32,
        center: &Vector3,
        radius: f64,
        ordering: Ordering,
    ) -> Vec<usize> {
        let hp = Healpix;
        let cos_r = radius.cos();
        let dir = center.normalize();
        (0..nside_to_npix(nside))
            .filter(|&p| dir.dot(&hp.pixel_center(nside, p, ordering).unwrap()) >= cos_r)
            .collect()
    }

    #[test]
    fn ring_centres_are_unit_vectors_and_cover_both_hemispheres() {
        let hp = Healpix;
        let nside = 4;
        let mut sum = Vector3::zeros();
        for p in 0..nside_to_npix(nside) {
            let v = hp.pixel_center(nside, p, Ordering::Ring).unwrap();
            assert_relative_eq!(v.norm(), 1.0, epsilon = 1e-12);
            sum += v;
        }
        // Equal-area pixels are symmetric: centres sum to zero.
        assert!(sum.norm() < 1e-9);
    }

    #[test]
    fn ring_layout_matches_ring_lookup() {
        for nside in [1usize, 2, 4, 6] {
            let mut next = 0;
            for iring in 1..(4 * nside) {
                let ring = ring_info(nside, iring);
                assert_eq!(ring.start, next, "nside {} ring {}", nside, iring);
                assert_eq!(pix2ring_ring(nside, ring.start), iring);
                assert_eq!(pix2ring_ring(nside, ring.start + ring.npix - 1), iring);
                let first = sph_to_vector(&pix2ang_ring::<f64>(nside, ring.start));
                assert_relative_eq!(first.z, ring.z, epsilon = 1e-12);
                next += ring.npix;
            }
            assert_eq!(next, nside_to_npix(nside as u32));
        }
    }

    #[test]
    fn first_ring_pixel_matches_reference() {
        // nside=1, pixel 0: z = 2/3, phi = pi/4.
        let v = Healpix.pixel_center(1, 0, Ordering::Ring).unwrap();
        assert_relative_eq!(v.z, 2.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(v.y.atan2(v.x), PI / 4.0, epsilon = 1e-12);
    }

    #[test]
    fn ring_to_nested_is_a_bijection_preserving_centres() {
        let hp = Healpix;
        for nside in [1u32, 2, 4, 8] {
            let npix = nside_to_npix(nside);
            let mut seen = HashSet::new();
            for p in 0..npix {
                let q = hp.ring_to_nested(nside, p).unwrap();
                assert!(q < npix);
                assert!(seen.insert(q), "duplicate nested index {} (nside {})", q, nside);
                let a = hp.pixel_center(nside, p, Ordering::Ring).unwrap();
                let b = hp.pixel_center(nside, q, Ordering::Nested).unwrap();
                assert!((a - b).norm() < 1e-10, "nside {} ring {} nest {}", nside, p, q);
            }
        }
    }

    #[test]
    fn disc_matches_brute_force() {
        let hp = Healpix;
        let nside = 8;
        let cases = [
            (0.0, 0.0, 10.0),
            (45.0, 30.0, 20.0),
            (359.5, -10.0, 15.0),
            (10.0, 88.0, 5.0),
            (200.0, -89.0, 12.0),
            (120.0, 5.0, 0.5),
        ];
        for (lon, lat, radius_deg) in cases {
            let center = coordinate_to_vector(lon, lat);
            let radius = f64::to_radians(radius_deg);
            for ordering in [Ordering::Ring, Ordering::Nested] {
                let got = hp.pixels_in_disc(nside, &center, radius, ordering).unwrap();
                let expected = brute_force_disc(nside, &center, radius, ordering);
                assert_eq!(
                    got, expected,
                    "lon={} lat={} r={} {:?}",
                    lon, lat, radius_deg, ordering
                );
            }
        }
    }

    #[test]
    fn orderings_select_the_same_sky_region() {
        let hp = Healpix;
        let nside = 16;
        let center = coordinate_to_vector(75.0, -20.0);
        let radius = 6f64.to_radians();
        let ring = hp.pixels_in_disc(nside, &center, radius, Ordering::Ring).unwrap();
        let nest = hp.pixels_in_disc(nside, &center, radius, Ordering::Nested).unwrap();
        let mapped: HashSet<usize> = ring
            .iter()
            .map(|&p| hp.ring_to_nested(nside, p).unwrap())
            .collect();
        assert_eq!(mapped, nest.into_iter().collect::<HashSet<_>>());
    }

    #[test]
    fn whole_sky_disc_returns_every_pixel() {
        let hp = Healpix;
        let nside = 4;
        let all = hp
            .pixels_in_disc(nside, &coordinate_to_vector(0.0, 0.0), PI, Ordering::Ring)
            .unwrap();
        assert_eq!(all, (0..nside_to_npix(nside)).collect::<Vec<_>>());
    }

    #[test]
    fn disc_grows_with_radius() {
        let hp = Healpix;
        let center = coordinate_to_vector(300.0, 40.0);
        let mut last = 0;
        for r_deg in [1.0, 5.0, 10.0, 20.0, 40.0, 90.0] {
            let n = hp
                .pixels_in_disc(16, &center, f64::to_radians(r_deg), Ordering::Ring)
                .unwrap()
                .len();
            assert!(n >= last);
            last = n;
        }
    }

    #[test]
    fn nested_rejects_non_power_of_two() {
        let hp = Healpix;
        let center = coordinate_to_vector(0.0, 0.0);
        assert_eq!(
            hp.pixels_in_disc(6, &center, 0.1, Ordering::Nested),
            Err(PhotometryError::UnsupportedNside(6))
        );
        assert!(hp.pixels_in_disc(6, &center, 0.1, Ordering::Ring).is_ok());
    }
}
