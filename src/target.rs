//! Photometry targets.

/// A named sky position. Longitude and latitude are in degrees, in the same
/// frame as the maps being measured (usually Galactic).
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub name: String,
    pub lon_deg: f64,
    pub lat_deg: f64,
}

impl Target {
    pub fn new(name: impl Into<String>, lon_deg: f64, lat_deg: f64) -> Self {
        Self {
            name: name.into(),
            lon_deg,
            lat_deg,
        }
    }
}
