//! Grid assembly.
//!
//! Places captured tiles onto one canvas by direct grid placement. Tiles
//! are discovered by their `img_x{col}_y{row}.<ext>` filenames; cells with
//! no tile become uniform placeholder patches so the canvas geometry never
//! depends on which captures succeeded. No feature matching, no blending:
//! each tile occupies a disjoint rectangle.
//!
//! Grid row 0 is the bottom of the scanned region, so rows are flipped
//! into image coordinates: tile `(c, r)` lands at pixel
//! `(c * tile_w, (rows - 1 - r) * tile_h)`.

use crate::config::StitchConfig;
use crate::errors::ScanError;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Where one grid cell landed on the canvas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub col: u32,
    pub row: u32,
    /// Top-left pixel of the cell's rectangle in image coordinates.
    pub x_px: u32,
    pub y_px: u32,
    /// Tile file placed there, or `None` for a placeholder patch.
    pub source: Option<PathBuf>,
}

/// The assembled canvas and its cell map.
#[derive(Debug)]
pub struct Composite {
    pub image: RgbImage,
    pub cols: u32,
    pub rows: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub placements: Vec<Placement>,
    /// Cells filled with the placeholder color.
    pub missing: u32,
    /// Tiles whose dimensions had to be corrected before placement.
    pub resized: u32,
}

/// Scan `directory` for tile files named `img_x{col}_y{row}.<ext>`.
///
/// Unrelated files are ignored. When the same cell appears with two
/// extensions the first found wins and the duplicate is logged.
pub fn discover_tiles<P: AsRef<Path>>(
    directory: P,
) -> Result<BTreeMap<(u32, u32), PathBuf>, ScanError> {
    let directory = directory.as_ref();
    let entries = fs::read_dir(directory).map_err(|e| {
        ScanError::Io(format!(
            "failed to read tile directory {:?}: {}",
            directory, e
        ))
    })?;

    let mut tiles = BTreeMap::new();
    for entry in entries {
        let entry = entry.map_err(|e| ScanError::Io(format!("failed to list tiles: {}", e)))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some((col, row)) = parse_tile_name(name) else {
            continue;
        };

        if tiles.contains_key(&(col, row)) {
            log::warn!("Duplicate tile file for cell ({}, {}): {}", col, row, name);
            continue;
        }
        tiles.insert((col, row), entry.path());
    }

    log::info!("Discovered {} tiles in {:?}", tiles.len(), directory);
    Ok(tiles)
}

/// Parse `img_x{col}_y{row}.<ext>` into cell indices.
fn parse_tile_name(name: &str) -> Option<(u32, u32)> {
    let stem = name.strip_prefix("img_x")?;
    let (col_part, rest) = stem.split_once("_y")?;
    let (row_part, _ext) = rest.split_once('.')?;
    let col = col_part.parse().ok()?;
    let row = row_part.parse().ok()?;
    Some((col, row))
}

/// Grid shape and tile size implied by a discovered tile set: indices are
/// zero-based so the grid spans `max + 1` cells per axis, and the first
/// tile on disk declares the tile dimensions.
pub fn infer_layout(
    tiles: &BTreeMap<(u32, u32), PathBuf>,
) -> Result<(u32, u32, u32, u32), ScanError> {
    let first = tiles
        .values()
        .next()
        .ok_or_else(|| ScanError::Image("no tiles to infer a layout from".to_string()))?;

    let img = image::open(first)
        .map_err(|e| ScanError::Image(format!("failed to open tile {:?}: {}", first, e)))?;

    let cols = tiles.keys().map(|(c, _)| c).max().unwrap() + 1;
    let rows = tiles.keys().map(|(_, r)| r).max().unwrap() + 1;
    Ok((cols, rows, img.width(), img.height()))
}

/// Assemble the tiles in `directory` into a `cols * tile_width` by
/// `rows * tile_height` composite.
///
/// Missing cells are filled with the configured placeholder color. A tile
/// whose pixel dimensions disagree with the declared tile size is resized
/// (nearest-neighbor) and counted, with a warning, not an error. The
/// function never mutates or deletes tile files; re-running with an
/// unchanged tile set reproduces the composite pixel for pixel.
pub fn assemble<P: AsRef<Path>>(
    directory: P,
    cols: u32,
    rows: u32,
    tile_width: u32,
    tile_height: u32,
    config: &StitchConfig,
) -> Result<Composite, ScanError> {
    if cols == 0 || rows == 0 || tile_width == 0 || tile_height == 0 {
        return Err(ScanError::Config(format!(
            "invalid assembly geometry: {} x {} cells of {} x {} px",
            cols, rows, tile_width, tile_height
        )));
    }

    let canvas_width = (cols as u64) * (tile_width as u64);
    let canvas_height = (rows as u64) * (tile_height as u64);
    if canvas_width > u32::MAX as u64 || canvas_height > u32::MAX as u64 {
        return Err(ScanError::Config(format!(
            "composite dimensions {} x {} exceed supported size",
            canvas_width, canvas_height
        )));
    }

    let directory = directory.as_ref();
    let tiles = discover_tiles(directory)?;
    if tiles.is_empty() {
        return Err(ScanError::Image(format!(
            "no tiles discovered in {:?}",
            directory
        )));
    }

    for (col, row) in tiles.keys() {
        if *col >= cols || *row >= rows {
            log::warn!(
                "Tile ({}, {}) lies outside the {} x {} grid and is ignored",
                col,
                row,
                cols,
                rows
            );
        }
    }

    let mut image = RgbImage::from_pixel(
        canvas_width as u32,
        canvas_height as u32,
        Rgb(config.placeholder_color),
    );
    let mut placements = Vec::with_capacity((cols as usize) * (rows as usize));
    let mut missing = 0u32;
    let mut resized = 0u32;

    for row in 0..rows {
        for col in 0..cols {
            let x_px = col * tile_width;
            let y_px = (rows - 1 - row) * tile_height;

            let source = match tiles.get(&(col, row)) {
                Some(path) => match load_tile(path, tile_width, tile_height, &mut resized) {
                    Some(tile) => {
                        imageops::replace(&mut image, &tile, x_px as i64, y_px as i64);
                        Some(path.clone())
                    }
                    None => {
                        missing += 1;
                        None
                    }
                },
                None => {
                    missing += 1;
                    None
                }
            };

            placements.push(Placement {
                col,
                row,
                x_px,
                y_px,
                source,
            });
        }
    }

    if missing > 0 {
        log::warn!(
            "Composite has {} placeholder cells out of {}",
            missing,
            cols * rows
        );
    }

    Ok(Composite {
        image,
        cols,
        rows,
        tile_width,
        tile_height,
        placements,
        missing,
        resized,
    })
}

/// Assemble and write the composite to its fixed filename inside the tile
/// directory. Returns the output path.
pub fn assemble_to_file<P: AsRef<Path>>(
    directory: P,
    cols: u32,
    rows: u32,
    tile_width: u32,
    tile_height: u32,
    config: &StitchConfig,
) -> Result<PathBuf, ScanError> {
    let directory = directory.as_ref();
    let composite = assemble(directory, cols, rows, tile_width, tile_height, config)?;

    let path = directory.join(&config.output_filename);
    composite
        .image
        .save(&path)
        .map_err(|e| ScanError::Image(format!("failed to write composite {:?}: {}", path, e)))?;

    log::info!(
        "Composite written: {:?} ({} x {}, {} missing cells)",
        path,
        composite.image.width(),
        composite.image.height(),
        composite.missing
    );
    Ok(path)
}

/// Read one tile, correcting its dimensions if they disagree with the
/// declared tile size. An unreadable tile degrades to a placeholder.
fn load_tile(
    path: &Path,
    tile_width: u32,
    tile_height: u32,
    resized: &mut u32,
) -> Option<RgbImage> {
    let tile = match image::open(path) {
        Ok(img) => img.to_rgb8(),
        Err(e) => {
            log::warn!("Failed to open tile {:?}, using placeholder: {}", path, e);
            return None;
        }
    };

    if tile.dimensions() == (tile_width, tile_height) {
        return Some(tile);
    }

    log::warn!(
        "Tile {:?} is {} x {}, expected {} x {}; resizing",
        path,
        tile.width(),
        tile.height(),
        tile_width,
        tile_height
    );
    *resized += 1;
    Some(imageops::resize(
        &tile,
        tile_width,
        tile_height,
        FilterType::Nearest,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tile_name() {
        assert_eq!(parse_tile_name("img_x3_y1.png"), Some((3, 1)));
        assert_eq!(parse_tile_name("img_x0_y12.jpg"), Some((0, 12)));
        assert_eq!(parse_tile_name("img_x3.png"), None);
        assert_eq!(parse_tile_name("composite.png"), None);
        assert_eq!(parse_tile_name("img_xa_y1.png"), None);
        assert_eq!(parse_tile_name("session_summary.json"), None);
    }

    #[test]
    fn test_zero_geometry_rejected() {
        let config = StitchConfig {
            placeholder_color: [0, 0, 0],
            output_filename: "composite.png".to_string(),
        };
        assert!(matches!(
            assemble(".", 0, 1, 10, 10, &config),
            Err(ScanError::Config(_))
        ));
    }
}
