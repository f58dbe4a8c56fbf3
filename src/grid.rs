//! Regular raster georeference shared by the model grid and raster sources.

use crate::error::{DelwaqError, Result};
use ndarray::Array2;

/// Mean earth radius used for geographic cell areas and lengths.
pub const EARTH_RADIUS: f64 = 6_371_000.0;

/// Regular grid described by its top-left corner and signed resolution.
/// Rows run along `y` (north-up grids have `dy < 0`), columns along `x`.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterGrid {
    pub nrows: usize,
    pub ncols: usize,
    pub x0: f64,
    pub y0: f64,
    pub dx: f64,
    pub dy: f64,
    pub geographic: bool,
}

impl RasterGrid {
    pub fn new(
        nrows: usize,
        ncols: usize,
        x0: f64,
        y0: f64,
        dx: f64,
        dy: f64,
        geographic: bool,
    ) -> Self {
        RasterGrid {
            nrows,
            ncols,
            x0,
            y0,
            dx,
            dy,
            geographic,
        }
    }

    /// Builds a grid from 1-D cell center coordinates, as stored in NetCDF.
    pub fn from_centers(xs: &[f64], ys: &[f64], geographic: bool) -> Result<Self> {
        let dx = regular_step(xs, "x")?;
        let dy = regular_step(ys, "y")?;
        Ok(RasterGrid {
            nrows: ys.len(),
            ncols: xs.len(),
            x0: xs[0] - dx / 2.0,
            y0: ys[0] - dy / 2.0,
            dx,
            dy,
            geographic,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.nrows, self.ncols)
    }

    pub fn x_center(&self, col: usize) -> f64 {
        self.x0 + (col as f64 + 0.5) * self.dx
    }

    pub fn y_center(&self, row: usize) -> f64 {
        self.y0 + (row as f64 + 0.5) * self.dy
    }

    pub fn x_centers(&self) -> Vec<f64> {
        (0..self.ncols).map(|c| self.x_center(c)).collect()
    }

    pub fn y_centers(&self) -> Vec<f64> {
        (0..self.nrows).map(|r| self.y_center(r)).collect()
    }

    /// Cell containing the point, if it lies inside the grid.
    pub fn cell_index(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let col = ((x - self.x0) / self.dx).floor();
        let row = ((y - self.y0) / self.dy).floor();
        if col < 0.0 || row < 0.0 || col >= self.ncols as f64 || row >= self.nrows as f64 {
            return None;
        }
        Some((row as usize, col as usize))
    }

    /// Nearest cell index, clamped to the grid extent.
    pub fn nearest_index(&self, x: f64, y: f64) -> (usize, usize) {
        let col = ((x - self.x0) / self.dx).floor();
        let row = ((y - self.y0) / self.dy).floor();
        let col = col.clamp(0.0, (self.ncols - 1) as f64) as usize;
        let row = row.clamp(0.0, (self.nrows - 1) as f64) as usize;
        (row, col)
    }

    /// Cell bounds as `(xmin, xmax, ymin, ymax)`.
    pub fn cell_bounds(&self, row: usize, col: usize) -> (f64, f64, f64, f64) {
        let xa = self.x0 + col as f64 * self.dx;
        let xb = xa + self.dx;
        let ya = self.y0 + row as f64 * self.dy;
        let yb = ya + self.dy;
        (xa.min(xb), xa.max(xb), ya.min(yb), ya.max(yb))
    }

    /// Cell surface in m2. Geographic grids use the spherical band area.
    pub fn cell_area(&self, row: usize) -> f64 {
        if self.geographic {
            let (_, _, ymin, ymax) = self.cell_bounds(row, 0);
            let dlon = self.dx.abs().to_radians();
            EARTH_RADIUS
                * EARTH_RADIUS
                * dlon
                * (ymax.to_radians().sin() - ymin.to_radians().sin()).abs()
        } else {
            (self.dx * self.dy).abs()
        }
    }

    /// Cell extent in metres along x and y.
    pub fn cell_lengths(&self, row: usize) -> (f64, f64) {
        if self.geographic {
            let lat = self.y_center(row).to_radians();
            let xlen = EARTH_RADIUS * lat.cos() * self.dx.abs().to_radians();
            let ylen = EARTH_RADIUS * self.dy.abs().to_radians();
            (xlen, ylen)
        } else {
            (self.dx.abs(), self.dy.abs())
        }
    }

    pub fn area_grid(&self) -> Array2<f64> {
        Array2::from_shape_fn(self.shape(), |(r, _)| self.cell_area(r))
    }
}

fn regular_step(centers: &[f64], axis: &str) -> Result<f64> {
    if centers.len() < 2 {
        return Err(DelwaqError::grid(format!(
            "coordinate {} needs at least two cells to derive a resolution",
            axis
        )));
    }
    let step = centers[1] - centers[0];
    if step == 0.0 {
        return Err(DelwaqError::grid(format!("coordinate {} is not increasing", axis)));
    }
    let tol = step.abs() * 1e-4;
    for w in centers.windows(2) {
        if ((w[1] - w[0]) - step).abs() > tol {
            return Err(DelwaqError::grid(format!(
                "coordinate {} is not regularly spaced",
                axis
            )));
        }
    }
    Ok(step)
}
