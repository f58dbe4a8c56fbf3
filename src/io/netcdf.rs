use crate::config::parse_datetime;
use crate::error::{DelwaqError, Result};
use crate::grid::RasterGrid;
use chrono::{Duration, NaiveDateTime};
use ndarray::{Array2, Array3};
use netcdf::{self, AttributeValue};
use std::collections::BTreeMap;
use std::path::Path;

const X_NAMES: [&str; 3] = ["x", "lon", "longitude"];
const Y_NAMES: [&str; 3] = ["y", "lat", "latitude"];

/// Georeferenced map read from a NetCDF variable.
#[derive(Debug, Clone)]
pub struct GriddedMap {
    pub grid: RasterGrid,
    pub data: Array2<f64>,
    pub nodata: f64,
}

pub fn open(path: &Path) -> Result<netcdf::File> {
    if !path.exists() {
        return Err(DelwaqError::missing(format!(
            "NetCDF file not found: {}",
            path.display()
        )));
    }
    Ok(netcdf::open(path)?)
}

fn attribute_f64(value: AttributeValue) -> Option<f64> {
    match value {
        AttributeValue::Double(v) => Some(v),
        AttributeValue::Float(v) => Some(v as f64),
        AttributeValue::Int(v) => Some(v as f64),
        AttributeValue::Uint(v) => Some(v as f64),
        AttributeValue::Short(v) => Some(v as f64),
        AttributeValue::Ushort(v) => Some(v as f64),
        AttributeValue::Schar(v) => Some(v as f64),
        AttributeValue::Uchar(v) => Some(v as f64),
        AttributeValue::Longlong(v) => Some(v as f64),
        AttributeValue::Ulonglong(v) => Some(v as f64),
        _ => None,
    }
}

fn attribute_str(value: AttributeValue) -> Option<String> {
    match value {
        AttributeValue::Str(s) => Some(s),
        _ => None,
    }
}

fn variable_nodata(var: &netcdf::Variable) -> Result<f64> {
    for name in ["_FillValue", "missing_value"] {
        if let Some(attr) = var.attribute(name) {
            if let Some(v) = attribute_f64(attr.value()?) {
                return Ok(v);
            }
        }
    }
    Ok(f64::NAN)
}

fn variable_units(var: &netcdf::Variable) -> Result<Option<String>> {
    match var.attribute("units") {
        Some(attr) => Ok(attribute_str(attr.value()?)),
        None => Ok(None),
    }
}

pub fn global_str(file: &netcdf::File, name: &str) -> Result<Option<String>> {
    match file.attribute(name) {
        Some(attr) => Ok(attribute_str(attr.value()?)),
        None => Ok(None),
    }
}

/// Reads the regular grid from the file's 1-D x/y (or lon/lat) coordinates.
pub fn read_grid(file: &netcdf::File) -> Result<RasterGrid> {
    let find = |names: &[&str]| {
        names
            .iter()
            .find_map(|n| file.variable(n).map(|v| (n.to_string(), v)))
    };
    let (xname, xvar) = find(&X_NAMES)
        .ok_or_else(|| DelwaqError::missing("no x/lon coordinate variable".to_string()))?;
    let (_, yvar) = find(&Y_NAMES)
        .ok_or_else(|| DelwaqError::missing("no y/lat coordinate variable".to_string()))?;
    let xs = xvar.get_values::<f64, _>(..)?;
    let ys = yvar.get_values::<f64, _>(..)?;
    let geographic = xname != "x"
        || variable_units(&xvar)?
            .map(|u| u.starts_with("degree"))
            .unwrap_or(false);
    RasterGrid::from_centers(&xs, &ys, geographic)
}

/// Reads a (y, x) variable; a leading singleton dimension (band/time) is dropped.
pub fn read_map(file: &netcdf::File, grid: &RasterGrid, name: &str) -> Result<(Array2<f64>, f64)> {
    let var = file
        .variable(name)
        .ok_or_else(|| DelwaqError::missing(format!("variable '{}' not found", name)))?;
    let dims: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
    let (nrows, ncols) = grid.shape();
    let ok = match dims.as_slice() {
        [r, c] => *r == nrows && *c == ncols,
        [1, r, c] => *r == nrows && *c == ncols,
        _ => false,
    };
    if !ok {
        return Err(DelwaqError::grid(format!(
            "variable '{}' has dimensions {:?}, expected ({}, {})",
            name, dims, nrows, ncols
        )));
    }
    let values = var.get_values::<f64, _>(..)?;
    let nodata = variable_nodata(&var)?;
    let data = Array2::from_shape_vec((nrows, ncols), values)
        .map_err(|e| DelwaqError::grid(format!("variable '{}': {}", name, e)))?;
    Ok((data, nodata))
}

/// Opens a raster source and reads one variable with its own grid.
pub fn read_gridded_map(path: &Path, name: &str) -> Result<GriddedMap> {
    let file = open(path)?;
    let grid = read_grid(&file)?;
    let (data, nodata) = read_map(&file, &grid, name)?;
    Ok(GriddedMap { grid, data, nodata })
}

/// Parses CF time units such as `days since 2000-01-01 00:00:00`.
pub fn parse_time_units(units: &str) -> Result<(f64, NaiveDateTime)> {
    let (unit, origin) = units
        .split_once(" since ")
        .ok_or_else(|| DelwaqError::Time(format!("unsupported time units '{}'", units)))?;
    let secs = match unit.trim().to_ascii_lowercase().as_str() {
        "seconds" | "second" | "s" => 1.0,
        "minutes" | "minute" | "min" => 60.0,
        "hours" | "hour" | "h" => 3600.0,
        "days" | "day" | "d" => 86400.0,
        other => {
            return Err(DelwaqError::Time(format!("unsupported time unit '{}'", other)));
        }
    };
    Ok((secs, parse_datetime(origin)?))
}

pub fn read_time_axis(file: &netcdf::File) -> Result<Vec<NaiveDateTime>> {
    let var = file
        .variable("time")
        .ok_or_else(|| DelwaqError::missing("no time coordinate".to_string()))?;
    let units = variable_units(&var)?
        .ok_or_else(|| DelwaqError::Time("time coordinate has no units".to_string()))?;
    let (secs, origin) = parse_time_units(&units)?;
    let values = var.get_values::<f64, _>(..)?;
    Ok(values
        .iter()
        .map(|v| origin + Duration::milliseconds((v * secs * 1000.0).round() as i64))
        .collect())
}

/// Reads one timestep of a (time, y, x) variable.
pub fn read_time_slice(
    file: &netcdf::File,
    grid: &RasterGrid,
    name: &str,
    index: usize,
) -> Result<Array2<f64>> {
    let var = file
        .variable(name)
        .ok_or_else(|| DelwaqError::missing(format!("variable '{}' not found", name)))?;
    let dims: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
    if dims.len() != 3 || dims[1] != grid.nrows || dims[2] != grid.ncols {
        return Err(DelwaqError::grid(format!(
            "variable '{}' has dimensions {:?}, expected (time, {}, {})",
            name, dims, grid.nrows, grid.ncols
        )));
    }
    let nodata = variable_nodata(&var)?;
    let values = var.get_values::<f64, _>((index, .., ..))?;
    let mut data = Array2::from_shape_vec(grid.shape(), values)
        .map_err(|e| DelwaqError::grid(format!("variable '{}': {}", name, e)))?;
    if !nodata.is_nan() {
        data.mapv_inplace(|v| if v == nodata { f64::NAN } else { v });
    }
    Ok(data)
}

/// Static maps as persisted in the model's NetCDF mirror.
#[derive(Debug, Clone)]
pub struct StaticMirror {
    pub grid: RasterGrid,
    pub attributes: BTreeMap<String, String>,
    pub hydromaps: BTreeMap<String, Array2<f64>>,
    pub staticmaps: BTreeMap<String, Array3<f64>>,
}

pub fn write_static_mirror(path: &Path, mirror: &StaticMirror, nodata: f64) -> Result<()> {
    let mut file = netcdf::create(path)?;
    let grid = &mirror.grid;
    let ncomp = mirror
        .staticmaps
        .values()
        .next()
        .map(|a| a.dim().0)
        .unwrap_or(1);

    file.add_dimension("y", grid.nrows)?;
    file.add_dimension("x", grid.ncols)?;
    file.add_dimension("comp", ncomp)?;

    let mut x_var = file.add_variable::<f64>("x", &["x"])?;
    x_var.put_attribute("long_name", "x coordinate of cell center")?;
    if grid.geographic {
        x_var.put_attribute("units", "degrees_east")?;
    }
    x_var.put_values(&grid.x_centers(), ..)?;

    let mut y_var = file.add_variable::<f64>("y", &["y"])?;
    y_var.put_attribute("long_name", "y coordinate of cell center")?;
    if grid.geographic {
        y_var.put_attribute("units", "degrees_north")?;
    }
    y_var.put_values(&grid.y_centers(), ..)?;

    let comp_ids: Vec<i32> = (1..=ncomp as i32).collect();
    let mut comp_var = file.add_variable::<i32>("comp", &["comp"])?;
    comp_var.put_attribute("long_name", "Compartment number")?;
    comp_var.put_values(&comp_ids, ..)?;

    for (name, data) in &mirror.hydromaps {
        let mut var = file.add_variable::<f64>(name, &["y", "x"])?;
        var.put_attribute("_FillValue", nodata)?;
        let values: Vec<f64> = data.iter().copied().collect();
        var.put_values(&values, ..)?;
    }

    for (name, data) in &mirror.staticmaps {
        if data.dim().0 != ncomp {
            return Err(DelwaqError::grid(format!(
                "static map '{}' has {} compartments, expected {}",
                name,
                data.dim().0,
                ncomp
            )));
        }
        let mut var = file.add_variable::<f64>(name, &["comp", "y", "x"])?;
        var.put_attribute("_FillValue", nodata)?;
        let values: Vec<f64> = data.iter().copied().collect();
        var.put_values(&values, ..)?;
    }

    for (key, value) in &mirror.attributes {
        file.add_attribute(key, value.as_str())?;
    }
    file.add_attribute("TITLE", "STATIC MAPS FROM DELWAQ_RS")?;

    Ok(())
}

pub fn read_static_mirror(path: &Path) -> Result<StaticMirror> {
    let file = open(path)?;
    let grid = read_grid(&file)?;
    let mut hydromaps = BTreeMap::new();
    let mut staticmaps = BTreeMap::new();

    for var in file.variables() {
        let name = var.name();
        if ["x", "y", "comp"].contains(&name.as_str()) {
            continue;
        }
        let dims: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
        let values = var.get_values::<f64, _>(..)?;
        match dims.as_slice() {
            [_, _] => {
                let data = Array2::from_shape_vec(grid.shape(), values)
                    .map_err(|e| DelwaqError::grid(format!("variable '{}': {}", name, e)))?;
                hydromaps.insert(name, data);
            }
            [ncomp, _, _] => {
                let data = Array3::from_shape_vec((*ncomp, grid.nrows, grid.ncols), values)
                    .map_err(|e| DelwaqError::grid(format!("variable '{}': {}", name, e)))?;
                staticmaps.insert(name, data);
            }
            _ => continue,
        }
    }

    let mut attributes = BTreeMap::new();
    for key in ["mode", "compartments", "boundaries", "fluxes", "emissions"] {
        if let Some(v) = global_str(&file, key)? {
            attributes.insert(key.to_string(), v);
        }
    }

    Ok(StaticMirror {
        grid,
        attributes,
        hydromaps,
        staticmaps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_units() {
        let (secs, origin) = parse_time_units("days since 2000-01-01 00:00:00").unwrap();
        assert_eq!(secs, 86400.0);
        assert_eq!(origin, parse_datetime("2000-01-01").unwrap());

        let (secs, _) = parse_time_units("hours since 2020-05-01T00:00:00").unwrap();
        assert_eq!(secs, 3600.0);
    }

    #[test]
    fn test_parse_time_units_rejects_unknown() {
        assert!(parse_time_units("fortnights since 2000-01-01").is_err());
        assert!(parse_time_units("days").is_err());
    }
}
