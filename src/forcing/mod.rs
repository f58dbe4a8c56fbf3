//! Time series from the hydromodel output converted to segment or exchange
//! aligned forcing in the simulator's units.

pub mod timeseries;
pub mod units;
pub mod writer;

use crate::config::{HydrologyForcingConfig, SeriesForcingConfig, TimeWindow};
use crate::error::{DelwaqError, Result};
use crate::grid::RasterGrid;
use crate::io::netcdf;
use crate::segments::{Pointer, Segments};
use chrono::NaiveDateTime;
use ndarray::{Array2, Array3, Axis};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use timeseries::{Alignment, TimeMethod, align, shift_one_step};
use tracing::{debug, info, warn};
use units::{Quantity, UnitConversion, lookup, lookup_any};

/// Named time x value array (values per segment or per exchange).
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicSeries {
    pub name: String,
    pub unit: String,
    pub times: Vec<NaiveDateTime>,
    pub values: Array2<f64>,
}

impl DynamicSeries {
    pub fn nvalues(&self) -> usize {
        self.values.ncols()
    }

    /// Replaces NaN with zero and returns how many were replaced.
    pub fn zero_missing(&mut self) -> usize {
        let mut n = 0;
        self.values.mapv_inplace(|v| {
            if v.is_nan() {
                n += 1;
                0.0
            } else {
                v
            }
        });
        if n > 0 {
            warn!(series = %self.name, count = n, "missing values set to zero");
        }
        n
    }
}

/// Gridded `(time, y, x)` source aligned to the model grid. A source with
/// the opposite y orientation is read with its rows flipped.
pub struct ForcingSource {
    path: PathBuf,
    file: ::netcdf::File,
    grid: RasterGrid,
    flip_y: bool,
    pub times: Vec<NaiveDateTime>,
}

impl ForcingSource {
    pub fn open(path: &Path, model_grid: &RasterGrid) -> Result<Self> {
        let file = netcdf::open(path)?;
        let grid = netcdf::read_grid(&file)?;
        let flip_y = grid.dy.signum() != model_grid.dy.signum();
        let first_y = if flip_y {
            grid.y_center(grid.nrows.saturating_sub(1))
        } else {
            grid.y_center(0)
        };
        let xtol = 1e-6 * model_grid.dx.abs();
        let ytol = 1e-6 * model_grid.dy.abs();
        if grid.shape() != model_grid.shape()
            || (grid.x_center(0) - model_grid.x_center(0)).abs() > xtol
            || (grid.dx - model_grid.dx).abs() > xtol
            || (first_y - model_grid.y_center(0)).abs() > ytol
            || (grid.dy.abs() - model_grid.dy.abs()).abs() > ytol
        {
            return Err(DelwaqError::grid(format!(
                "{} is not on the model grid ({:?} vs {:?})",
                path.display(),
                grid.shape(),
                model_grid.shape()
            )));
        }
        if flip_y {
            debug!(path = %path.display(), "source y axis is reversed, flipping rows");
        }
        let times = netcdf::read_time_axis(&file)?;
        Ok(ForcingSource {
            path: path.to_path_buf(),
            file,
            grid,
            flip_y,
            times,
        })
    }

    pub fn align(&self, window: &TimeWindow, method: TimeMethod) -> Result<Vec<Alignment>> {
        align(&self.times, &window.timestamps(), method)
    }

    /// Active cell values of `var` per target timestep, NaN kept.
    pub fn cell_series(
        &self,
        var: &str,
        segments: &Segments,
        alignments: &[Alignment],
    ) -> Result<Vec<Vec<f64>>> {
        if self.file.variable(var).is_none() {
            return Err(DelwaqError::missing(format!(
                "variable '{}' not found in {}",
                var,
                self.path.display()
            )));
        }
        let mut cache: HashMap<usize, Vec<f64>> = HashMap::new();
        let mut out = Vec::with_capacity(alignments.len());
        for a in alignments {
            for index in [a.index, a.next] {
                if !cache.contains_key(&index) {
                    let mut slice = netcdf::read_time_slice(&self.file, &self.grid, var, index)?;
                    if self.flip_y {
                        slice.invert_axis(Axis(0));
                    }
                    cache.insert(index, segments.cell_values(&slice));
                }
            }
            let (first, second) = (&cache[&a.index], &cache[&a.next]);
            out.push(
                first
                    .iter()
                    .zip(second)
                    .map(|(x, y)| a.combine(*x, *y))
                    .collect(),
            );
        }
        Ok(out)
    }
}

fn convert(values: &[f64], conv: &UnitConversion, surface: &[f64]) -> impl Iterator<Item = f64> {
    values.iter().zip(surface).map(move |(v, s)| conv.apply(*v, *s))
}

fn comp_surface(segments: &Segments, surface: &Array3<f64>, comp: usize) -> Vec<f64> {
    segments
        .cells
        .iter()
        .map(|&(r, c)| surface[[comp, r, c]])
        .collect()
}

fn time_method(name: &str) -> Result<TimeMethod> {
    name.parse()
}

/// Compartment whose surface converts area-based units of a flux.
fn flux_compartment(segments: &Segments, flux: &str) -> Result<usize> {
    let (from, to) = flux
        .split_once('>')
        .ok_or_else(|| DelwaqError::config(format!("flux '{}' is not of the form 'from>to'", flux)))?;
    segments
        .comp_index(from)
        .or_else(|_| segments.comp_index(to))
}

/// `flow` (time x exchange, pointer order) and `volume` (time x segment).
#[derive(Debug)]
pub struct HydrologyForcing {
    pub flow: DynamicSeries,
    pub volume: DynamicSeries,
}

pub fn hydrology_forcing(
    cfg: &HydrologyForcingConfig,
    window: &TimeWindow,
    grid: &RasterGrid,
    segments: &Segments,
    pointer: &Pointer,
    surface: &Array3<f64>,
) -> Result<HydrologyForcing> {
    let source = ForcingSource::open(&cfg.source, grid)?;
    let alignments = source.align(window, time_method(&cfg.time_method)?)?;
    let times = window.timestamps();
    let ntime = times.len();
    let ncell = segments.ncell;

    let mut flow = Array2::<f64>::zeros((ntime, pointer.nrofexch()));
    for (f, flux) in pointer.fluxes.iter().enumerate() {
        let spec = cfg.fluxes.get(flux).ok_or_else(|| {
            DelwaqError::config(format!("no source variable configured for flux '{}'", flux))
        })?;
        let conv = lookup(Quantity::Flux, &spec.unit)?;
        let area = comp_surface(segments, surface, flux_compartment(segments, flux)?);
        let values = source.cell_series(&spec.var, segments, &alignments)?;
        for (t, row) in values.iter().enumerate() {
            for (i, v) in convert(row, &conv, &area).enumerate() {
                flow[[t, f * ncell + i]] = v;
            }
        }
    }

    let mut volume = Array2::<f64>::zeros((ntime, segments.nrofseg()));
    for (k, comp) in segments.compartments.iter().enumerate() {
        let spec = cfg.volumes.get(comp).ok_or_else(|| {
            DelwaqError::config(format!(
                "no source variable configured for the volume of '{}'",
                comp
            ))
        })?;
        let conv = lookup(Quantity::Volume, &spec.unit)?;
        let area = comp_surface(segments, surface, k);
        let mut rows = source.cell_series(&spec.var, segments, &alignments)?;
        if cfg.add_volume_offset {
            shift_one_step(&mut rows);
        }
        fill_rows(&mut volume, k * ncell, &rows, &conv, &area);
    }

    let mut flow = DynamicSeries {
        name: "flow".to_string(),
        unit: Quantity::Flux.target_unit().to_string(),
        times: times.clone(),
        values: flow,
    };
    let mut volume = DynamicSeries {
        name: "volume".to_string(),
        unit: Quantity::Volume.target_unit().to_string(),
        times,
        values: volume,
    };
    flow.zero_missing();
    volume.zero_missing();
    info!(
        timesteps = ntime,
        exchanges = pointer.nrofexch(),
        segments = segments.nrofseg(),
        offset = cfg.add_volume_offset,
        "hydrology forcing prepared"
    );
    Ok(HydrologyForcing { flow, volume })
}

fn fill_rows(
    out: &mut Array2<f64>,
    first_col: usize,
    rows: &[Vec<f64>],
    conv: &UnitConversion,
    area: &[f64],
) {
    for (t, row) in rows.iter().enumerate() {
        for (i, v) in convert(row, conv, area).enumerate() {
            out[[t, first_col + i]] = v;
        }
    }
}

/// How a single-layer variable spreads over compartments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Spread {
    /// Values in one compartment, zero in the others.
    Single(usize),
    /// Same values in every compartment.
    All,
}

/// Per-segment series for each configured variable.
pub fn segment_forcing(
    cfg: &SeriesForcingConfig,
    quantities: &[Quantity],
    spread: Spread,
    window: &TimeWindow,
    grid: &RasterGrid,
    segments: &Segments,
    surface: &Array3<f64>,
) -> Result<Vec<DynamicSeries>> {
    if cfg.variables.is_empty() {
        return Err(DelwaqError::config(format!(
            "no variables configured for {}",
            cfg.source.display()
        )));
    }
    let source = ForcingSource::open(&cfg.source, grid)?;
    let alignments = source.align(window, time_method(&cfg.time_method)?)?;
    let times = window.timestamps();
    let ncell = segments.ncell;

    let mut out = Vec::with_capacity(cfg.variables.len());
    for spec in &cfg.variables {
        let (quantity, conv) = lookup_any(quantities, &spec.unit)?;
        let values = source.cell_series(&spec.var, segments, &alignments)?;
        let mut data = Array2::<f64>::zeros((times.len(), segments.nrofseg()));
        let comps: Vec<usize> = match spread {
            Spread::Single(k) => vec![k],
            Spread::All => (0..segments.ncomp()).collect(),
        };
        for k in comps {
            let area = comp_surface(segments, surface, k);
            fill_rows(&mut data, k * ncell, &values, &conv, &area);
        }
        let mut series = DynamicSeries {
            name: spec.output_name().to_string(),
            unit: quantity.target_unit().to_string(),
            times: times.clone(),
            values: data,
        };
        series.zero_missing();
        out.push(series);
    }
    info!(
        source = %cfg.source.display(),
        variables = out.len(),
        timesteps = times.len(),
        "segment forcing prepared"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{TimeWindowConfig, VariableSpec, parse_datetime};
    use crate::segments::{build_pointer, number_segments};
    use chrono::Duration;
    use ndarray::array;
    use std::collections::BTreeMap;

    fn grid() -> RasterGrid {
        RasterGrid::new(2, 2, 0.0, 20.0, 10.0, -10.0, false)
    }

    /// Writes `(time, y, x)` variables with a daily axis starting 2020-01-01.
    fn write_source(path: &Path, ntime: usize, vars: &[(&str, Vec<f64>)]) {
        write_source_on(path, &grid(), ntime, vars);
    }

    fn write_source_on(path: &Path, g: &RasterGrid, ntime: usize, vars: &[(&str, Vec<f64>)]) {
        let mut file = ::netcdf::create(path).unwrap();
        file.add_dimension("time", ntime).unwrap();
        file.add_dimension("y", g.nrows).unwrap();
        file.add_dimension("x", g.ncols).unwrap();
        let mut t = file.add_variable::<f64>("time", &["time"]).unwrap();
        t.put_attribute("units", "days since 2020-01-01 00:00:00").unwrap();
        let days: Vec<f64> = (0..ntime).map(|i| i as f64).collect();
        t.put_values(&days, ..).unwrap();
        let mut x = file.add_variable::<f64>("x", &["x"]).unwrap();
        x.put_values(&g.x_centers(), ..).unwrap();
        let mut y = file.add_variable::<f64>("y", &["y"]).unwrap();
        y.put_values(&g.y_centers(), ..).unwrap();
        for (name, values) in vars {
            let mut v = file.add_variable::<f64>(name, &["time", "y", "x"]).unwrap();
            v.put_values(values, ..).unwrap();
        }
    }

    fn window(start: &str, end: &str) -> TimeWindow {
        TimeWindow::from_config(&TimeWindowConfig {
            starttime: start.to_string(),
            endtime: end.to_string(),
            timestepsecs: 86400,
        })
        .unwrap()
    }

    fn spec(var: &str, unit: &str) -> VariableSpec {
        VariableSpec {
            var: var.to_string(),
            unit: unit.to_string(),
            name: None,
        }
    }

    fn setup() -> (Segments, Pointer, Array3<f64>) {
        let active = array![[true, true], [true, false]];
        let seg = number_segments(&active, vec!["sfw".to_string()]).unwrap();
        let ldd = array![[6.0, 2.0], [5.0, f64::NAN]];
        let ptr = build_pointer(
            &seg,
            &ldd,
            &["bd".to_string()],
            &["sfw>sfw".to_string(), "bd>sfw".to_string()],
        )
        .unwrap();
        let surface = Array3::from_elem((1, 2, 2), 100.0);
        (seg, ptr, surface)
    }

    #[test]
    fn test_hydrology_forcing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.nc");
        // per day: cell values day*10 + cell, 4 cells per slice
        let q: Vec<f64> = (0..3).flat_map(|d| (0..4).map(move |c| (d * 10 + c) as f64)).collect();
        let rain: Vec<f64> = vec![86400.0; 12];
        let vol: Vec<f64> = (0..3).flat_map(|d| vec![(d + 1) as f64; 4]).collect();
        write_source(&path, 3, &[("q", q), ("rain", rain), ("vol", vol)]);

        let (seg, ptr, surface) = setup();
        let cfg = HydrologyForcingConfig {
            source: path,
            time: None,
            time_method: "nearest".to_string(),
            add_volume_offset: true,
            fluxes: BTreeMap::from([
                ("sfw>sfw".to_string(), spec("q", "m3/s")),
                ("bd>sfw".to_string(), spec("rain", "mm/d")),
            ]),
            volumes: BTreeMap::from([("sfw".to_string(), spec("vol", "mm"))]),
        };
        let w = window("2020-01-01", "2020-01-03");
        let out = hydrology_forcing(&cfg, &w, &grid(), &seg, &ptr, &surface).unwrap();

        assert_eq!(out.flow.values.dim(), (3, 6));
        assert_eq!(out.flow.values[[1, 0]], 10.0);
        assert_eq!(out.flow.values[[1, 2]], 12.0);
        // 86400 mm/d over 100 m2 is 0.1 m3/s
        assert!((out.flow.values[[2, 4]] - 0.1).abs() < 1e-12);

        // offset: first record repeats, length preserved
        assert_eq!(out.volume.values.dim(), (3, 3));
        assert!((out.volume.values[[0, 0]] - 0.1).abs() < 1e-12);
        assert!((out.volume.values[[1, 0]] - 0.1).abs() < 1e-12);
        assert!((out.volume.values[[2, 0]] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_missing_flux_variable_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.nc");
        write_source(&path, 2, &[("q", vec![1.0; 8])]);
        let (seg, ptr, surface) = setup();
        let cfg = HydrologyForcingConfig {
            source: path,
            time: None,
            time_method: "nearest".to_string(),
            add_volume_offset: false,
            fluxes: BTreeMap::from([("sfw>sfw".to_string(), spec("q", "m3/s"))]),
            volumes: BTreeMap::new(),
        };
        let w = window("2020-01-01", "2020-01-02");
        let err = hydrology_forcing(&cfg, &w, &grid(), &seg, &ptr, &surface).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_segment_forcing_linear_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("climate.nc");
        let temp: Vec<f64> = (0..3).flat_map(|d| vec![273.15 + d as f64 * 2.0; 4]).collect();
        write_source(&path, 3, &[("tas", temp)]);

        let active = array![[true, true], [true, false]];
        let seg = number_segments(&active, vec!["sfw".to_string(), "so".to_string()]).unwrap();
        let surface = Array3::from_elem((2, 2, 2), 100.0);
        let cfg = SeriesForcingConfig {
            source: path,
            time: None,
            time_method: "linear".to_string(),
            variables: vec![VariableSpec {
                var: "tas".to_string(),
                unit: "K".to_string(),
                name: Some("Temp".to_string()),
            }],
            compartment: None,
        };
        let w = TimeWindow {
            start: parse_datetime("2020-01-01 12:00:00").unwrap(),
            end: parse_datetime("2020-01-02 12:00:00").unwrap(),
            step: Duration::seconds(86400),
        };
        let quantities = [Quantity::Temperature, Quantity::Radiation];
        let out = segment_forcing(&cfg, &quantities, Spread::All, &w, &grid(), &seg, &surface)
            .unwrap();
        assert_eq!(out[0].name, "Temp");
        assert_eq!(out[0].unit, "degC");
        assert_eq!(out[0].values.dim(), (2, 6));
        assert!((out[0].values[[0, 0]] - 1.0).abs() < 1e-9);
        assert!((out[0].values[[1, 5]] - 3.0).abs() < 1e-9);

        let late = window("2020-01-02", "2020-01-05");
        let err = segment_forcing(&cfg, &quantities, Spread::All, &late, &grid(), &seg, &surface)
            .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_south_up_source_is_flipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("south_up.nc");
        // rows at y = 5 then y = 15
        let south_up = RasterGrid::new(2, 2, 0.0, 0.0, 10.0, 10.0, false);
        write_source_on(&path, &south_up, 1, &[("q", vec![1.0, 2.0, 3.0, 4.0])]);

        let active = Array2::from_elem((2, 2), true);
        let seg = number_segments(&active, vec!["sfw".to_string()]).unwrap();
        let source = ForcingSource::open(&path, &grid()).unwrap();
        let alignments = source
            .align(&window("2020-01-01", "2020-01-01"), TimeMethod::Nearest)
            .unwrap();
        let values = source.cell_series("q", &seg, &alignments).unwrap();
        // model row 0 lies at y = 15
        assert_eq!(values[0], vec![3.0, 4.0, 1.0, 2.0]);
    }

    #[test]
    fn test_source_shifted_in_y_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shifted.nc");
        let shifted = RasterGrid::new(2, 2, 0.0, 30.0, 10.0, -10.0, false);
        write_source_on(&path, &shifted, 1, &[("q", vec![1.0; 4])]);
        let err = ForcingSource::open(&path, &grid()).err().unwrap();
        assert!(matches!(err, DelwaqError::Grid(_)));
    }

    #[test]
    fn test_zero_missing() {
        let mut s = DynamicSeries {
            name: "x".to_string(),
            unit: "g".to_string(),
            times: vec![parse_datetime("2020-01-01").unwrap()],
            values: array![[1.0, f64::NAN]],
        };
        assert_eq!(s.zero_missing(), 1);
        assert_eq!(s.values[[0, 1]], 0.0);
    }
}
