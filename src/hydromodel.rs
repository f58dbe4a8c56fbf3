//! Read access to the upstream hydrologic model (wflow-style staticmaps.nc).

use crate::error::{DelwaqError, Result};
use crate::grid::RasterGrid;
use crate::io::netcdf;
use ndarray::Array2;
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct HydroModel {
    pub root: PathBuf,
    pub grid: RasterGrid,
    file: ::netcdf::File,
}

impl HydroModel {
    pub fn open(root: &Path, staticmaps_fn: &str) -> Result<Self> {
        let path = root.join(staticmaps_fn);
        let file = netcdf::open(&path)?;
        let grid = netcdf::read_grid(&file)?;
        // drain directions are read with north at row 0
        if grid.dy > 0.0 {
            return Err(DelwaqError::grid(format!(
                "{} has an ascending y axis, hydromodel maps must be north-up",
                path.display()
            )));
        }
        debug!(path = %path.display(), nrows = grid.nrows, ncols = grid.ncols, "hydromodel opened");
        Ok(HydroModel {
            root: root.to_path_buf(),
            grid,
            file,
        })
    }

    pub fn has_map(&self, name: &str) -> bool {
        self.file.variable(name).is_some()
    }

    /// Reads a static map with nodata cells set to NaN.
    pub fn map(&self, name: &str) -> Result<Array2<f64>> {
        let (mut data, nodata) = netcdf::read_map(&self.file, &self.grid, name)?;
        if !nodata.is_nan() {
            data.mapv_inplace(|v| if v == nodata { f64::NAN } else { v });
        }
        Ok(data)
    }

    pub fn map_opt(&self, name: &str) -> Result<Option<Array2<f64>>> {
        if self.has_map(name) {
            Ok(Some(self.map(name)?))
        } else {
            Ok(None)
        }
    }

    pub fn require_map(&self, name: &str, role: &str) -> Result<Array2<f64>> {
        if !self.has_map(name) {
            return Err(DelwaqError::missing(format!(
                "hydromodel at {} has no {} map '{}'",
                self.root.display(),
                role,
                name
            )));
        }
        self.map(name)
    }
}
