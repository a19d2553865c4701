//! Batch photometry over many targets and many maps.
//!
//! Every (target, map) pair is measured and the results are stored in a dense
//! [`ResultTable`]. Maps are processed one at a time; the targets of each map
//! are measured in parallel.
//!
//! A failure is contained to the smallest scope it affects:
//!
//! - A measurement with no usable pixels, or with a non-finite error, fills one
//!   cell with [`PhotometryResult::SENTINEL`] values.
//! - A map that cannot be loaded or is not usable (bad length, unknown unit,
//!   unknown band, ...) fills its whole column with sentinels and records the
//!   reason in [`ResultTable::map_errors`].
//! - An invalid configuration fails the whole run before any map is read.

use std::borrow::Borrow;
use std::path::{Path, PathBuf};

use anyhow::Context;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::bands::nominal_fwhm_arcmin;
use crate::error::{PhotometryError, Result};
use crate::healpix::{Healpix, Ordering, PixelGeometry};
use crate::mapfile::{read_healpix_fits, MapReadOptions};
use crate::photometry::{
    ApertureSpec, AperturePhotometer, MeasureConfig, NoiseModel, PhotometryResult,
};
use crate::skymap::SkyMap;
use crate::target::Target;
use crate::units::MapUnit;

/// Configuration for a batch run.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Source aperture radius in arcmin. When `None`, each map uses the beam
    /// FWHM of its band and fluxes are aperture corrected.
    /// Default: None
    pub radius_arcmin: Option<f64>,
    /// Inner radius of the background annulus in arcmin.
    /// Default: 60.0
    pub annulus_inner_arcmin: f64,
    /// Outer radius of the background annulus in arcmin.
    /// Default: 90.0
    pub annulus_outer_arcmin: f64,
    /// Default: [`NoiseModel::Approximate`]
    pub noise_model: NoiseModel,
    /// Overrides the pixel ordering of every map.
    /// Default: None
    pub ordering: Option<Ordering>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            radius_arcmin: None,
            annulus_inner_arcmin: 60.0,
            annulus_outer_arcmin: 90.0,
            noise_model: NoiseModel::Approximate,
            ordering: None,
        }
    }
}

/// Correction for the flux of a Gaussian beam that falls outside an aperture
/// of radius `radius` or inside the background annulus.
///
/// All radii share one unit. With `k1 = annulus_inner / radius` and
/// `k2 = annulus_outer / radius`:
///
/// ```text
/// apcor = 1 / [ (1 - 0.5^4) - (0.5^(4 k1²) - 0.5^(4 k2²)) ]
/// ```
pub fn aperture_correction(radius: f64, annulus_inner: f64, annulus_outer: f64) -> f64 {
    let k0: f64 = 1.0;
    let k1 = annulus_inner / radius;
    let k2 = annulus_outer / radius;
    let enclosed = 1.0 - 0.5f64.powf(4.0 * k0 * k0);
    let in_annulus = 0.5f64.powf(4.0 * k1 * k1) - 0.5f64.powf(4.0 * k2 * k2);
    (enclosed - in_annulus).recip()
}

/// Source of sky maps for a batch run.
pub trait MapLoader {
    fn load_map(&self, path: &Path) -> anyhow::Result<SkyMap>;
}

impl<F> MapLoader for F
where
    F: Fn(&Path) -> anyhow::Result<SkyMap>,
{
    fn load_map(&self, path: &Path) -> anyhow::Result<SkyMap> {
        self(path)
    }
}

/// Loads HEALPix FITS files with fixed read options.
#[derive(Debug, Clone, Default)]
pub struct FitsMapLoader {
    pub options: MapReadOptions,
}

impl MapLoader for FitsMapLoader {
    fn load_map(&self, path: &Path) -> anyhow::Result<SkyMap> {
        read_healpix_fits(path, &self.options)
    }
}

/// Dense targets × maps table of results.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    n_targets: usize,
    /// One column of `n_targets` results per map.
    columns: Vec<Vec<PhotometryResult>>,
    map_errors: Vec<Option<String>>,
    aperture_corrections: Vec<Option<f64>>,
}

impl ResultTable {
    pub fn n_targets(&self) -> usize {
        self.n_targets
    }

    pub fn n_maps(&self) -> usize {
        self.columns.len()
    }

    /// Result for target `target` on map `map`.
    pub fn get(&self, target: usize, map: usize) -> Option<&PhotometryResult> {
        self.columns.get(map)?.get(target)
    }

    /// All results for one map, in target order.
    pub fn column(&self, map: usize) -> Option<&[PhotometryResult]> {
        self.columns.get(map).map(Vec::as_slice)
    }

    /// Reason each map failed, or `None` for maps that were measured.
    pub fn map_errors(&self) -> &[Option<String>] {
        &self.map_errors
    }

    /// Aperture correction applied to each map, if any.
    pub fn aperture_corrections(&self) -> &[Option<f64>] {
        &self.aperture_corrections
    }

    /// Write one CSV row per (target, map) cell.
    pub fn write_csv<P, S>(
        &self,
        path: P,
        targets: &[Target],
        map_names: &[S],
    ) -> anyhow::Result<()>
    where
        P: AsRef<Path>,
        S: AsRef<str>,
    {
        let path = path.as_ref();
        if targets.len() != self.n_targets || map_names.len() != self.n_maps() {
            anyhow::bail!(
                "Table is {}x{} but {} targets and {} map names were given",
                self.n_targets,
                self.n_maps(),
                targets.len(),
                map_names.len()
            );
        }
        let mut wtr = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        wtr.write_record([
            "target",
            "lon",
            "lat",
            "map",
            "flux_jy",
            "flux_err_jy",
            "background_jy",
        ])?;
        for (t, target) in targets.iter().enumerate() {
            for (column, name) in self.columns.iter().zip(map_names) {
                let cell = &column[t];
                wtr.write_record([
                    target.name.clone(),
                    target.lon_deg.to_string(),
                    target.lat_deg.to_string(),
                    name.as_ref().to_string(),
                    cell.flux_density.to_string(),
                    cell.flux_density_error.to_string(),
                    cell.background_density.to_string(),
                ])?;
            }
        }
        wtr.flush()
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

/// Outcome of one map.
struct MapColumn {
    results: Vec<PhotometryResult>,
    apcor: Option<f64>,
}

/// Measures every target on every map.
pub struct BatchPhotometryRunner<G = Healpix, L = FitsMapLoader> {
    photometer: AperturePhotometer<G>,
    loader: L,
    config: BatchConfig,
}

impl BatchPhotometryRunner<Healpix, FitsMapLoader> {
    pub fn new(config: BatchConfig) -> Self {
        Self::with_parts(Healpix, FitsMapLoader::default(), config)
    }
}

impl<G, L> BatchPhotometryRunner<G, L>
where
    G: PixelGeometry + Sync,
    L: MapLoader,
{
    pub fn with_parts(geometry: G, loader: L, config: BatchConfig) -> Self {
        Self {
            photometer: AperturePhotometer::with_geometry(geometry),
            loader,
            config,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Measure `targets` on each map file in `maps`.
    pub fn run(&self, targets: &[Target], maps: &[PathBuf]) -> Result<ResultTable> {
        self.run_each(targets, maps.len(), |i| {
            self.loader
                .load_map(&maps[i])
                .with_context(|| format!("Failed to load map {}", maps[i].display()))
        })
    }

    /// Measure `targets` on maps already in memory.
    pub fn run_with_maps(&self, targets: &[Target], maps: &[SkyMap]) -> Result<ResultTable> {
        self.run_each(targets, maps.len(), |i| Ok(&maps[i]))
    }

    fn check_config(&self) -> Result<()> {
        let cfg = &self.config;
        // The annulus must be valid on its own.
        ApertureSpec::from_arcmin(
            cfg.annulus_inner_arcmin,
            cfg.annulus_inner_arcmin,
            cfg.annulus_outer_arcmin,
        )?;
        if let Some(radius) = cfg.radius_arcmin {
            ApertureSpec::from_arcmin(radius, cfg.annulus_inner_arcmin, cfg.annulus_outer_arcmin)?;
        }
        Ok(())
    }

    fn run_each<M, F>(&self, targets: &[Target], n_maps: usize, mut load: F) -> Result<ResultTable>
    where
        M: Borrow<SkyMap>,
        F: FnMut(usize) -> anyhow::Result<M>,
    {
        self.check_config()?;

        let mut table = ResultTable {
            n_targets: targets.len(),
            columns: Vec::with_capacity(n_maps),
            map_errors: Vec::with_capacity(n_maps),
            aperture_corrections: Vec::with_capacity(n_maps),
        };

        for i in 0..n_maps {
            let outcome = load(i).and_then(|map| {
                self.measure_map(targets, Borrow::<SkyMap>::borrow(&map))
                    .map_err(anyhow::Error::from)
            });
            match outcome {
                Ok(column) => {
                    table.columns.push(column.results);
                    table.map_errors.push(None);
                    table.aperture_corrections.push(column.apcor);
                }
                Err(e) => {
                    warn!("Map {} skipped: {:#}", i, e);
                    table
                        .columns
                        .push(vec![PhotometryResult::failed(f64::NAN); targets.len()]);
                    table.map_errors.push(Some(format!("{:#}", e)));
                    table.aperture_corrections.push(None);
                }
            }
        }
        Ok(table)
    }

    fn measure_map(&self, targets: &[Target], map: &SkyMap) -> Result<MapColumn> {
        let cfg = &self.config;
        map.nside()?;
        let unit: MapUnit = map.unit.parse()?;

        let (radius, apcor) = match cfg.radius_arcmin {
            Some(radius) => (radius, None),
            None => {
                let fwhm = nominal_fwhm_arcmin(map.frequency_ghz)?;
                let apcor =
                    aperture_correction(fwhm, cfg.annulus_inner_arcmin, cfg.annulus_outer_arcmin);
                (fwhm, Some(apcor))
            }
        };
        let aperture = ApertureSpec::from_arcmin(
            radius,
            cfg.annulus_inner_arcmin,
            cfg.annulus_outer_arcmin,
        )?;
        let measure_cfg = MeasureConfig {
            unit: Some(unit),
            ordering: cfg.ordering,
            ..MeasureConfig::new(radius, cfg.noise_model)
        };
        info!(
            "Measuring {} targets at {} GHz: radius {:.3} arcmin, apcor {:?}",
            targets.len(),
            map.frequency_ghz,
            radius,
            apcor
        );

        let photometer = &self.photometer;
        let results = targets
            .par_iter()
            .map(|target| {
                match photometer.measure(
                    map,
                    target.lon_deg,
                    target.lat_deg,
                    &aperture,
                    &measure_cfg,
                ) {
                    Ok(r) if !r.flux_density_error.is_finite() => {
                        warn!("{}: non-finite flux error", target.name);
                        Ok(PhotometryResult::failed(r.background_density))
                    }
                    Ok(r) => Ok(apcor.map_or(r, |a| r.corrected(a))),
                    Err(e @ PhotometryError::NoGoodPixels { .. }) => {
                        warn!("{}: {}", target.name, e);
                        Ok(PhotometryResult::failed(f64::NAN))
                    }
                    Err(e) => Err(e),
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(MapColumn { results, apcor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skymap::UNSEEN;
    use approx::assert_relative_eq;

    type FileLoader = fn(&Path) -> anyhow::Result<SkyMap>;

    fn runner(config: BatchConfig) -> BatchPhotometryRunner<Healpix, FileLoader> {
        fn no_files(path: &Path) -> anyhow::Result<SkyMap> {
            anyhow::bail!("no file {}", path.display())
        }
        BatchPhotometryRunner::with_parts(Healpix, no_files as FileLoader, config)
    }

    #[test]
    fn apcor_exceeds_one_for_typical_annulus() {
        let apcor = aperture_correction(5.0, 10.0, 15.0);
        assert!(apcor > 1.0);
        // Annulus far outside the beam leaves only the (1 - 0.5^4) term.
        assert_relative_eq!(aperture_correction(1.0, 50.0, 60.0), 1.0 / 0.9375, epsilon = 1e-12);
        assert_relative_eq!(
            aperture_correction(2.0, 4.0, 6.0),
            aperture_correction(1.0, 2.0, 3.0),
            epsilon = 1e-15
        );
    }

    #[test]
    fn invalid_config_fails_before_any_map() {
        let cfg = BatchConfig {
            radius_arcmin: Some(120.0),
            annulus_inner_arcmin: 60.0,
            annulus_outer_arcmin: 90.0,
            ..Default::default()
        };
        let err = runner(cfg)
            .run(&[Target::new("a", 0.0, 0.0)], &[PathBuf::from("x.fits")])
            .unwrap_err();
        assert!(matches!(err, PhotometryError::InvalidAperture { .. }));

        let cfg = BatchConfig {
            annulus_inner_arcmin: 100.0,
            annulus_outer_arcmin: 90.0,
            ..Default::default()
        };
        assert!(runner(cfg).run_with_maps(&[], &[]).is_err());
    }

    #[test]
    fn load_failures_fill_the_column() {
        let targets = [Target::new("a", 10.0, 10.0), Target::new("b", 20.0, 20.0)];
        let table = runner(BatchConfig::default())
            .run(&targets, &[PathBuf::from("missing.fits")])
            .unwrap();
        assert_eq!(table.n_maps(), 1);
        assert_eq!(table.n_targets(), 2);
        let cell = table.get(1, 0).unwrap();
        assert!(cell.is_failed());
        assert!(cell.background_density.is_nan());
        assert!(table.map_errors()[0].as_deref().unwrap().contains("missing.fits"));
    }

    #[test]
    fn unknown_band_needs_explicit_radius() {
        let map = SkyMap::constant(8, 1.0, 23.0, "K_RJ", Ordering::Ring);
        let targets = [Target::new("a", 0.0, 45.0)];
        let nominal = runner(BatchConfig {
            annulus_inner_arcmin: 700.0,
            annulus_outer_arcmin: 1400.0,
            ..Default::default()
        });
        let table = nominal.run_with_maps(&targets, std::slice::from_ref(&map)).unwrap();
        assert!(table.map_errors()[0].as_deref().unwrap().contains("23"));

        let explicit = runner(BatchConfig {
            radius_arcmin: Some(600.0),
            annulus_inner_arcmin: 700.0,
            annulus_outer_arcmin: 1400.0,
            ..Default::default()
        });
        let table = explicit.run_with_maps(&targets, &[map]).unwrap();
        assert_eq!(table.map_errors()[0], None);
        assert_eq!(table.aperture_corrections()[0], None);
        assert_relative_eq!(table.get(0, 0).unwrap().flux_density, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn empty_aperture_is_a_cell_failure_only() {
        let mut map = SkyMap::constant(8, 1.0, 30.0, "Jy/pixel", Ordering::Ring);
        // Blank the northern cap; the target there has nothing to measure.
        for v in map.values.iter_mut().take(40) {
            *v = UNSEEN;
        }
        let targets = [Target::new("cap", 0.0, 90.0), Target::new("plane", 0.0, 0.0)];
        let table = runner(BatchConfig {
            radius_arcmin: Some(480.0),
            annulus_inner_arcmin: 600.0,
            annulus_outer_arcmin: 900.0,
            ..Default::default()
        })
        .run_with_maps(&targets, &[map])
        .unwrap();
        assert_eq!(table.map_errors()[0], None);
        assert!(table.get(0, 0).unwrap().is_failed());
        assert!(!table.get(1, 0).unwrap().is_failed());
    }
}
