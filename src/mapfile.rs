//! Reader for HEALPix maps stored as FITS binary tables.
//!
//! HEALPix maps are written as a `BINTABLE` extension whose columns hold the
//! pixel values, usually with many pixels per row (`TFORM1 = '1024E'`). Only
//! the first binary table is read. Pixel ordering, frequency and unit come
//! from the `ORDERING`, `FREQ` and `TUNITn` keywords.

use std::path::Path;

use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::healpix::{nside_to_npix, Ordering};
use crate::skymap::{is_unseen, SkyMap, UNSEEN};
use crate::units::MapUnit;

const FITS_BLOCK_SIZE: usize = 2880;
const FITS_CARD_SIZE: usize = 80;

/// Options for [`read_healpix_fits`].
#[derive(Debug, Clone, Default)]
pub struct MapReadOptions {
    /// 0-based column to read.
    /// Default: 0
    pub column: usize,
    /// Return `sqrt(Q² + U²)` built from columns 1 and 2 instead of `column`.
    /// No noise-bias correction is applied.
    /// Default: false
    pub polarized_intensity: bool,
    /// Overrides the `ORDERING` keyword. RING if neither is given.
    /// Default: None
    pub ordering: Option<Ordering>,
    /// Overrides the `FREQ` keyword (GHz).
    /// Default: None
    pub frequency_ghz: Option<f64>,
    /// Overrides the `TUNITn` keyword. K_RJ if neither is given.
    /// Default: None
    pub unit: Option<MapUnit>,
}

/// Header keywords of one HDU, in file order.
#[derive(Debug, Default)]
struct Header {
    cards: Vec<(String, String)>,
}

/// Split a header card into keyword and value text.
///
/// String values are returned without their quotes; other values are cut at the
/// comment separator. Cards with no value indicator yield `None`.
fn parse_card(card: &str) -> Option<(String, String)> {
    let key = card.get(0..8)?.trim_end();
    if key.is_empty() || card.get(8..10) != Some("= ") {
        return None;
    }
    let raw = card[10..].trim_start();
    let value = if let Some(quoted) = raw.strip_prefix('\'') {
        let mut out = String::new();
        let mut chars = quoted.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    out.push('\'');
                } else {
                    break;
                }
            } else {
                out.push(c);
            }
        }
        out.trim_end().to_string()
    } else {
        raw.split('/').next().unwrap_or("").trim().to_string()
    };
    Some((key.to_string(), value))
}

impl Header {
    fn get(&self, key: &str) -> Option<&str> {
        self.cards
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Leading numeric part of a value, so `'30 GHz'` reads as 30.
    fn get_f64(&self, key: &str) -> Option<f64> {
        let val = self.get(key)?.trim();
        let num_str: String = val
            .chars()
            .take_while(|c| {
                c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'E' | 'e' | 'D' | 'd')
            })
            .map(|c| if c == 'D' || c == 'd' { 'E' } else { c })
            .collect();
        num_str.parse().ok()
    }

    fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key)?.trim().parse().ok()
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key)?.trim().parse().ok()
    }

    fn require_usize(&self, key: &str) -> Result<usize> {
        self.get_usize(key)
            .with_context(|| format!("Missing or invalid {} keyword in FITS header", key))
    }

    /// Size of the data unit that follows this header, without padding.
    fn data_len(&self) -> Result<usize> {
        let bitpix = self
            .get_i64("BITPIX")
            .context("Missing BITPIX keyword in FITS header")?;
        let naxis = self.get_usize("NAXIS").unwrap_or(0);
        if naxis == 0 {
            return Ok(0);
        }
        let mut elements = 1usize;
        for i in 1..=naxis {
            elements *= self.require_usize(&format!("NAXIS{}", i))?;
        }
        let pcount = self.get_usize("PCOUNT").unwrap_or(0);
        let gcount = self.get_usize("GCOUNT").unwrap_or(1);
        Ok(bitpix.unsigned_abs() as usize / 8 * gcount * (pcount + elements))
    }
}

fn padded(len: usize) -> usize {
    len.div_ceil(FITS_BLOCK_SIZE) * FITS_BLOCK_SIZE
}

/// Read the header starting at `offset`; returns it with the offset of its data.
fn read_header(bytes: &[u8], mut offset: usize) -> Result<(Header, usize)> {
    let mut hdr = Header::default();
    loop {
        let block = bytes
            .get(offset..offset + FITS_BLOCK_SIZE)
            .context("Failed to read FITS header block")?;
        offset += FITS_BLOCK_SIZE;
        for card_bytes in block.chunks_exact(FITS_CARD_SIZE) {
            let card = std::str::from_utf8(card_bytes).unwrap_or("");
            if card.starts_with("END") && card.as_bytes().get(3).map_or(true, |&b| b == b' ') {
                return Ok((hdr, offset));
            }
            if let Some(kv) = parse_card(card) {
                hdr.cards.push(kv);
            }
        }
    }
}

/// One binary table column.
#[derive(Debug, Clone, PartialEq)]
struct Column {
    code: char,
    repeat: usize,
    /// Byte offset within a row.
    offset: usize,
    scale: f64,
    zero: f64,
    null: Option<i64>,
}

/// Parse `TFORMn` into repeat count and type code.
fn parse_tform(tform: &str) -> Result<(usize, char)> {
    let tform = tform.trim();
    let digits: String = tform.chars().take_while(|c| c.is_ascii_digit()).collect();
    let code = tform[digits.len()..]
        .chars()
        .next()
        .with_context(|| format!("Invalid TFORM '{}'", tform))?;
    let repeat = if digits.is_empty() { 1 } else { digits.parse()? };
    Ok((repeat, code))
}

/// Width in bytes of a column with the given repeat and type code.
fn field_width(repeat: usize, code: char) -> Result<usize> {
    let size = match code {
        'X' => return Ok(repeat.div_ceil(8)),
        'L' | 'B' | 'A' => 1,
        'I' => 2,
        'J' | 'E' => 4,
        'K' | 'D' | 'C' | 'P' => 8,
        'M' | 'Q' => 16,
        other => bail!("Unknown TFORM type code '{}'", other),
    };
    Ok(repeat * size)
}

impl Column {
    fn element_size(&self) -> Result<usize> {
        match self.code {
            'I' => Ok(2),
            'J' | 'E' => Ok(4),
            'K' | 'D' => Ok(8),
            other => bail!("Unsupported column type '{}' for map data", other),
        }
    }

    fn decode(&self, raw: &[u8]) -> f64 {
        let value = match self.code {
            'E' => f32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as f64,
            'D' => f64::from_be_bytes([
                raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
            ]),
            _ => {
                let int = match self.code {
                    'I' => i16::from_be_bytes([raw[0], raw[1]]) as i64,
                    'J' => i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as i64,
                    _ => i64::from_be_bytes([
                        raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
                    ]),
                };
                if self.null == Some(int) {
                    return UNSEEN;
                }
                int as f64
            }
        };
        // f32 sentinels widen to a slightly different f64.
        if value.is_nan() || is_unseen(value) {
            return UNSEEN;
        }
        self.zero + self.scale * value
    }
}

struct BinTable {
    columns: Vec<Column>,
    row_bytes: usize,
    nrows: usize,
}

impl BinTable {
    fn from_header(hdr: &Header) -> Result<Self> {
        let row_bytes = hdr.require_usize("NAXIS1")?;
        let nrows = hdr.require_usize("NAXIS2")?;
        let tfields = hdr.require_usize("TFIELDS")?;
        let mut columns = Vec::with_capacity(tfields);
        let mut offset = 0;
        for n in 1..=tfields {
            let tform = hdr
                .get(&format!("TFORM{}", n))
                .with_context(|| format!("Missing TFORM{} keyword", n))?;
            let (repeat, code) = parse_tform(tform)?;
            columns.push(Column {
                code,
                repeat,
                offset,
                scale: hdr.get_f64(&format!("TSCAL{}", n)).unwrap_or(1.0),
                zero: hdr.get_f64(&format!("TZERO{}", n)).unwrap_or(0.0),
                null: hdr.get_i64(&format!("TNULL{}", n)),
            });
            offset += field_width(repeat, code)?;
        }
        if row_bytes == 0 || offset != row_bytes {
            bail!(
                "Column widths add up to {} bytes but NAXIS1 is {}",
                offset,
                row_bytes
            );
        }
        Ok(Self {
            columns,
            row_bytes,
            nrows,
        })
    }

    fn data_len(&self) -> usize {
        self.row_bytes * self.nrows
    }

    /// All values of column `index` (0-based), rows concatenated.
    fn read_column(&self, data: &[u8], index: usize) -> Result<Vec<f64>> {
        let column = self.columns.get(index).with_context(|| {
            format!(
                "Column {} requested but the table has {} columns",
                index,
                self.columns.len()
            )
        })?;
        let size = column.element_size()?;
        let width = size * column.repeat;
        Ok(data
            .par_chunks(self.row_bytes)
            .flat_map_iter(|row| {
                row[column.offset..column.offset + width]
                    .chunks_exact(size)
                    .map(|raw| column.decode(raw))
            })
            .collect())
    }
}

/// Read a HEALPix map from the first binary table extension of a FITS file.
pub fn read_healpix_fits(path: impl AsRef<Path>, options: &MapReadOptions) -> Result<SkyMap> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read FITS file {}", path.display()))?;

    let (primary, data_start) = read_header(&bytes, 0)?;
    let mut offset = data_start + padded(primary.data_len()?);
    let (hdr, data_start) = loop {
        if offset >= bytes.len() {
            bail!("No BINTABLE extension in {}", path.display());
        }
        let (hdr, data_start) = read_header(&bytes, offset)?;
        if hdr.get("XTENSION") == Some("BINTABLE") {
            break (hdr, data_start);
        }
        offset = data_start + padded(hdr.data_len()?);
    };

    let table = BinTable::from_header(&hdr)?;
    let data = bytes
        .get(data_start..data_start + table.data_len())
        .context("FITS table data is truncated")?;
    debug!(
        "BINTABLE: {} rows of {} bytes, {} columns",
        table.nrows,
        table.row_bytes,
        table.columns.len()
    );

    let (values, unit_column) = if options.polarized_intensity {
        let q = table.read_column(data, 1)?;
        let u = table.read_column(data, 2)?;
        let pi = q
            .iter()
            .zip(&u)
            .map(|(&q, &u)| {
                if is_unseen(q) || is_unseen(u) {
                    UNSEEN
                } else {
                    q.hypot(u)
                }
            })
            .collect();
        (pi, 1)
    } else {
        (table.read_column(data, options.column)?, options.column)
    };

    if let Some(nside) = hdr.get_usize("NSIDE") {
        let expected = nside_to_npix(nside as u32);
        if expected != values.len() {
            bail!(
                "NSIDE = {} implies {} pixels but the table holds {}",
                nside,
                expected,
                values.len()
            );
        }
    }

    let frequency_ghz = match options.frequency_ghz {
        Some(f) => f,
        None => hdr
            .get_f64("FREQ")
            .or_else(|| primary.get_f64("FREQ"))
            .with_context(|| format!("No FREQ keyword in {}", path.display()))?,
    };

    let unit = match options.unit {
        Some(unit) => unit.label(),
        None => hdr
            .get(&format!("TUNIT{}", unit_column + 1))
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| MapUnit::default().label()),
    };

    let ordering = match options.ordering {
        Some(ordering) => ordering,
        None => match hdr.get("ORDERING").or_else(|| primary.get("ORDERING")) {
            Some(s) => s.parse().map_err(anyhow::Error::msg)?,
            None => Ordering::Ring,
        },
    };

    info!(
        "Read {} pixels from {} ({} GHz, {}, {})",
        values.len(),
        path.display(),
        frequency_ghz,
        unit,
        ordering
    );
    Ok(SkyMap::new(values, frequency_ghz, unit, ordering))
}
