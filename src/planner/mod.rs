//! Coverage grid planning.
//!
//! Maps a quadrilateral region (four corners in stage coordinates) plus a
//! step size into an ordered sequence of 3-axis stage targets. The region
//! does not have to be an axis-aligned rectangle: positions come from
//! bilinear interpolation of all four corners, so skewed regions and tilted
//! slide planes (differing per-corner Z) are handled by the same path.

use crate::errors::ScanError;
use crate::types::{CornerSet, GridPosition};
use std::collections::HashSet;

/// Plan the coverage grid over `corners` with the given step sizes (mm).
///
/// Column count is `ceil(bottom_edge_length / step_x) + 1`; row count is the
/// analogue over the left edge. Cell `(0, 0)` lands exactly on
/// `bottom_left` and `(cols - 1, rows - 1)` exactly on `top_right`.
///
/// Rows are emitted bottom to top with alternating column direction
/// (serpentine) to cut stage travel between rows. The emitted *set* of
/// positions is the contract; the order is a travel-time optimization.
pub fn plan(
    corners: &CornerSet,
    step_x_mm: f64,
    step_y_mm: f64,
) -> Result<Vec<GridPosition>, ScanError> {
    if !(step_x_mm > 0.0 && step_x_mm.is_finite() && step_y_mm > 0.0 && step_y_mm.is_finite()) {
        return Err(ScanError::Config(format!(
            "grid steps must be positive and finite, got {} x {}",
            step_x_mm, step_y_mm
        )));
    }

    corners.validate()?;

    let width = corners.bottom_left.xy_distance(&corners.bottom_right);
    let height = corners.bottom_left.xy_distance(&corners.top_left);

    let cols = (width / step_x_mm).ceil() as u32 + 1;
    let rows = (height / step_y_mm).ceil() as u32 + 1;

    log::info!(
        "Planned grid {} x {} over region {:.2}mm x {:.2}mm",
        cols,
        rows,
        width,
        height
    );

    let mut positions = Vec::with_capacity((cols as usize) * (rows as usize));

    for row in 0..rows {
        let v = fraction(row, rows);

        // Serpentine: even rows walk left to right, odd rows right to left.
        let serpentine: Box<dyn Iterator<Item = u32>> = if row % 2 == 0 {
            Box::new(0..cols)
        } else {
            Box::new((0..cols).rev())
        };

        for col in serpentine {
            let u = fraction(col, cols);
            let (x, y, z) = interpolate(corners, u, v);
            positions.push(GridPosition { col, row, x, y, z });
        }
    }

    verify_unique_cells(&positions)?;
    Ok(positions)
}

/// Grid dimensions implied by a planned position list.
pub fn grid_dimensions(positions: &[GridPosition]) -> (u32, u32) {
    let cols = positions.iter().map(|p| p.col).max().map_or(0, |c| c + 1);
    let rows = positions.iter().map(|p| p.row).max().map_or(0, |r| r + 1);
    (cols, rows)
}

/// Fail fast on duplicate `(col, row)` identities.
///
/// The tile filename derived from `(col, row)` is the only linkage between a
/// capture and its grid cell, so a collision would silently overwrite a tile.
/// Checked during planning, before any hardware motion; the sweep re-checks
/// whatever list it is handed.
pub fn verify_unique_cells(positions: &[GridPosition]) -> Result<(), ScanError> {
    let mut seen = HashSet::with_capacity(positions.len());
    for pos in positions {
        if !seen.insert((pos.col, pos.row)) {
            return Err(ScanError::Config(format!(
                "duplicate grid cell ({}, {}) in plan",
                pos.col, pos.row
            )));
        }
    }
    Ok(())
}

/// Normalized parameter for index `i` of `n` samples; 0 when the axis has a
/// single sample.
fn fraction(i: u32, n: u32) -> f64 {
    if n > 1 {
        i as f64 / (n - 1) as f64
    } else {
        0.0
    }
}

/// Bilinear interpolation of the four corners, applied independently to X,
/// Y and Z:
///
/// `P(u,v) = (1-u)(1-v)*BL + u(1-v)*BR + u*v*TR + (1-u)*v*TL`
fn interpolate(corners: &CornerSet, u: f64, v: f64) -> (f64, f64, f64) {
    let bl = corners.bottom_left;
    let br = corners.bottom_right;
    let tr = corners.top_right;
    let tl = corners.top_left;

    let w_bl = (1.0 - u) * (1.0 - v);
    let w_br = u * (1.0 - v);
    let w_tr = u * v;
    let w_tl = (1.0 - u) * v;

    (
        w_bl * bl.x + w_br * br.x + w_tr * tr.x + w_tl * tl.x,
        w_bl * bl.y + w_br * br.y + w_tr * tr.y + w_tl * tl.y,
        w_bl * bl.z + w_br * br.z + w_tr * tr.z + w_tl * tl.z,
    )
}
