//! Map lists: one map path per line.
//!
//! Only the first whitespace-separated token of a line is used. Blank lines
//! and lines starting with `#` are skipped.

use std::path::{Path, PathBuf};

use anyhow::Context;

/// Parse a map list from an in-memory string.
pub fn load_map_list(data: &str) -> Vec<PathBuf> {
    data.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_whitespace().next())
        .map(PathBuf::from)
        .collect()
}

pub fn read_map_list<P: AsRef<Path>>(path: P) -> anyhow::Result<Vec<PathBuf>> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read map list {}", path.display()))?;
    Ok(load_map_list(&data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_token_per_line() {
        let list = "# Planck maps\nmaps/lfi_30.fits  extra notes\n\n   maps/hfi_857.fits\n";
        assert_eq!(
            load_map_list(list),
            vec![
                PathBuf::from("maps/lfi_30.fits"),
                PathBuf::from("maps/hfi_857.fits")
            ]
        );
        assert!(load_map_list("").is_empty());
    }
}
