//! Target catalogs.
//!
//! A target catalog is comma-delimited text with one source per row:
//!
//! ```text
//! # name, glon, glat
//! G353.4-0.4,353.41,-0.36
//! M42,209.01,-19.38
//! ```
//!
//! There is no header row. Fields are trimmed, and lines starting with `#` are
//! skipped.

use std::io::Read;
use std::path::Path;

use anyhow::Context;

use crate::target::Target;

/// Parse a target catalog from any reader.
pub fn load_targets<R: Read>(reader: R) -> anyhow::Result<Vec<Target>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .flexible(true)
        .from_reader(reader);

    let mut targets = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("Failed to read target row {}", i + 1))?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        if record.len() < 3 {
            anyhow::bail!(
                "Target row {} has {} fields, expected name, lon, lat",
                i + 1,
                record.len()
            );
        }
        let lon: f64 = record[1].parse().with_context(|| {
            format!("Invalid longitude '{}' in target row {}", &record[1], i + 1)
        })?;
        let lat: f64 = record[2]
            .parse()
            .with_context(|| format!("Invalid latitude '{}' in target row {}", &record[2], i + 1))?;
        targets.push(Target::new(&record[0], lon, lat));
    }
    Ok(targets)
}

pub fn read_target_csv<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<Target>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open target catalog {}", path.display()))?;
    load_targets(file)
}
