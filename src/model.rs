//! In-memory DELWAQ / D-Emission model and its on-disk layout.

use crate::config::{
    BasemapsConfig, EmissionRasterConfig, EmissionTableConfig, EmissionVectorConfig,
    GlobalConfig, HydrologyForcingConfig, ModelMode, MonitoringConfig, SeriesForcingConfig,
    TimeWindow, TimeWindowConfig,
};
use crate::emissions::{FillMethod, RasterMethod, VectorMethod, fill_missing, raster, vector};
use crate::error::{DelwaqError, Result};
use crate::forcing::units::Quantity;
use crate::forcing::writer::{ForcingFile, read_header, write_group};
use crate::forcing::{DynamicSeries, Spread, hydrology_forcing, segment_forcing};
use crate::grid::RasterGrid;
use crate::hydromodel::HydroModel;
use crate::io::binary::{write_pointer, write_static};
use crate::io::csv::{PointColumns, read_points};
use crate::io::gpkg::{Feature, read_layer};
use crate::io::netcdf::{StaticMirror, read_gridded_map, read_static_mirror, write_static_mirror};
use crate::io::inc;
use crate::monitoring::{Monitoring, build_monitoring};
use crate::segments::{
    Pointer, Segments, build_pointer, extend_comp_with_zeros, geometrymaps, hydromaps,
    maps_from_hydromodel, number_segments,
};
use geo::{Geometry, Point};
use ndarray::{Array2, Array3, Axis};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const CONFIG_DIR: &str = "config";
pub const STATIC_DIR: &str = "staticdata";
pub const DYNAMIC_DIR: &str = "dynamicdata";
pub const STATIC_MIRROR: &str = "staticmaps.nc";
const NODATA: f64 = -999.0;

/// Binary files of one forcing group, written together with `<group>.hdr`.
#[derive(Debug, Clone)]
pub struct ForcingGroup {
    pub window: TimeWindow,
    pub files: Vec<(String, bool, Vec<DynamicSeries>)>,
}

#[derive(Debug)]
pub struct DelwaqModel {
    pub root: PathBuf,
    pub mode: ModelMode,
    global: GlobalConfig,
    pub grid: Option<RasterGrid>,
    pub hydromaps: BTreeMap<String, Array2<f64>>,
    pub staticmaps: BTreeMap<String, Array3<f64>>,
    pub segments: Option<Segments>,
    pub pointer: Option<Pointer>,
    pub monitoring: Option<Monitoring>,
    pub emissions: BTreeSet<String>,
    pub forcing: BTreeMap<String, ForcingGroup>,
    boundaries: Vec<String>,
}

impl DelwaqModel {
    pub fn new(root: &Path, global: GlobalConfig) -> Result<Self> {
        let mode: ModelMode = global.mode.parse()?;
        Ok(DelwaqModel {
            root: root.to_path_buf(),
            mode,
            global,
            grid: None,
            hydromaps: BTreeMap::new(),
            staticmaps: BTreeMap::new(),
            segments: None,
            pointer: None,
            monitoring: None,
            emissions: BTreeSet::new(),
            forcing: BTreeMap::new(),
            boundaries: Vec::new(),
        })
    }

    /// Restores grid, segments and static maps from a previous build.
    pub fn load(root: &Path, global: GlobalConfig) -> Result<Self> {
        let path = root.join(STATIC_DIR).join(STATIC_MIRROR);
        let mirror = read_static_mirror(&path)?;
        let list = |key: &str| -> Vec<String> {
            mirror
                .attributes
                .get(key)
                .map(|v| {
                    v.split(',')
                        .filter(|s| !s.is_empty())
                        .map(|s| s.to_string())
                        .collect()
                })
                .unwrap_or_default()
        };
        let compartments = list("compartments");
        let boundaries = list("boundaries");
        let fluxes = list("fluxes");
        let emissions = list("emissions").into_iter().collect();

        let mut model = DelwaqModel::new(root, global)?;
        if let Some(saved) = mirror.attributes.get("mode") {
            let saved: ModelMode = saved.parse()?;
            if saved != model.mode {
                warn!(saved = saved.as_str(), requested = model.mode.as_str(), "model mode differs from the saved model");
                model.mode = saved;
            }
        }

        let basmsk = mirror
            .hydromaps
            .get("basmsk")
            .ok_or_else(|| DelwaqError::missing(format!("no basmsk in {}", path.display())))?;
        let active = basmsk.mapv(|v| v.is_finite() && v > 0.0);
        let segments = number_segments(&active, compartments)?;
        if model.mode.builds_pointer() {
            let ldd = mirror
                .hydromaps
                .get("ldd")
                .ok_or_else(|| DelwaqError::missing(format!("no ldd in {}", path.display())))?;
            model.pointer = Some(build_pointer(&segments, ldd, &boundaries, &fluxes)?);
        }
        info!(
            root = %root.display(),
            segments = segments.nrofseg(),
            maps = mirror.staticmaps.len(),
            "model loaded"
        );
        model.grid = Some(mirror.grid);
        model.hydromaps = mirror.hydromaps;
        model.staticmaps = mirror.staticmaps;
        model.segments = Some(segments);
        model.emissions = emissions;
        model.boundaries = boundaries;
        Ok(model)
    }

    fn parts(&self) -> Result<(&RasterGrid, &Segments)> {
        match (&self.grid, &self.segments) {
            (Some(g), Some(s)) => Ok((g, s)),
            _ => Err(DelwaqError::config(
                "segments are not defined, run setup_basemaps first",
            )),
        }
    }

    fn window(&self, step: Option<&TimeWindowConfig>) -> Result<TimeWindow> {
        let cfg = step.or(self.global.time.as_ref()).ok_or_else(|| {
            DelwaqError::config("no time window configured in the step or in global.time")
        })?;
        TimeWindow::from_config(cfg)
    }

    fn surface(&self) -> Result<&Array3<f64>> {
        self.staticmaps
            .get("surface")
            .ok_or_else(|| DelwaqError::missing("surface map not found, run setup_basemaps first"))
    }

    /// Segments, pointer, geometry and extra maps from the hydromodel.
    pub fn setup_basemaps(&mut self, cfg: &BasemapsConfig) -> Result<()> {
        let hydro = HydroModel::open(&self.global.hydromodel_root, &self.global.staticmaps_fn)?;
        let grid = hydro.grid.clone();
        let mut maps = hydromaps(&hydro, &self.global.maps)?;
        let active = maps["basmsk"].mapv(|v| v > 0.0);
        let segments = number_segments(&active, cfg.compartments())?;
        let ptid = segments
            .ptid
            .index_axis(Axis(0), 0)
            .mapv(|v| if v > 0 { v as f64 } else { f64::NAN });
        maps.insert("ptid".to_string(), ptid);

        let boundaries = cfg.boundaries();
        let pointer = if self.mode.builds_pointer() {
            Some(build_pointer(&segments, &maps["ldd"], &boundaries, &cfg.fluxes())?)
        } else {
            None
        };

        let mut staticmaps = geometrymaps(&grid, &segments, &maps);
        staticmaps.extend(maps_from_hydromodel(
            &hydro,
            &self.global.maps,
            &cfg.maps,
            segments.ncomp(),
        )?);

        info!(
            mode = self.mode.as_str(),
            segments = segments.nrofseg(),
            exchanges = pointer.as_ref().map(|p| p.nrofexch()).unwrap_or(0),
            "basemaps prepared"
        );
        self.grid = Some(grid);
        self.hydromaps = maps;
        self.staticmaps = staticmaps;
        self.segments = Some(segments);
        self.pointer = pointer;
        self.emissions.clear();
        self.boundaries = boundaries;
        Ok(())
    }

    pub fn setup_monitoring(&mut self, cfg: &MonitoringConfig) -> Result<()> {
        let (grid, segments) = self.parts()?;
        let monitoring = build_monitoring(cfg, grid, segments, self.hydromaps.get("basins"))?;
        let monpoints = monitoring.points.to_map(segments);
        self.hydromaps.insert("monpoints".to_string(), monpoints);
        self.monitoring = Some(monitoring);
        Ok(())
    }

    fn add_emission(&mut self, name: &str, data: Array2<f64>, compartment: Option<&str>) -> Result<()> {
        let (_, segments) = self.parts()?;
        let comp = match compartment {
            Some(c) => segments.comp_index(c)?,
            None => 0,
        };
        let stacked = extend_comp_with_zeros(&data, comp, segments.ncomp());
        debug!(name, compartment = %segments.compartments[comp], "emission map added");
        self.staticmaps.insert(name.to_string(), stacked);
        self.emissions.insert(name.to_string());
        Ok(())
    }

    fn finish_emission(
        &mut self,
        name: &str,
        mut data: Array2<f64>,
        fill: FillMethod,
        compartment: Option<&str>,
    ) -> Result<()> {
        let (_, segments) = self.parts()?;
        fill_missing(&mut data, &segments.active_mask(), fill)?;
        self.add_emission(name, data, compartment)?;
        info!(name, "emission prepared");
        Ok(())
    }

    pub fn setup_emission_raster(&mut self, cfg: &EmissionRasterConfig) -> Result<()> {
        let method: RasterMethod = cfg.method.parse()?;
        let fill = FillMethod::parse(&cfg.fill_method, cfg.fill_value)?;
        let (grid, _) = self.parts()?;
        let mut src = read_gridded_map(&cfg.source, &cfg.variable)?;
        raster::prepare_source(&mut src, cfg.area_division);
        let mut data = raster::resample(&src, grid, method);
        if cfg.area_division {
            raster::restore_area(&mut data, grid);
        }
        let name = cfg.name.as_deref().unwrap_or(&cfg.variable).to_string();
        self.finish_emission(&name, data, fill, cfg.compartment.as_deref())
    }

    pub fn setup_emission_vector(&mut self, cfg: &EmissionVectorConfig) -> Result<()> {
        let method: VectorMethod = cfg.method.parse()?;
        let fill = FillMethod::parse(&cfg.fill_method, cfg.fill_value)?;
        let (grid, _) = self.parts()?;
        let features = read_layer(&cfg.source, &cfg.layer, cfg.column.as_deref())?;
        if features.is_empty() {
            warn!(layer = %cfg.layer, "no features found");
        }
        let data = vector::rasterize(&features, grid, method, cfg.area_division)?;
        self.finish_emission(&cfg.name, data, fill, cfg.compartment.as_deref())
    }

    pub fn setup_emission_table(&mut self, cfg: &EmissionTableConfig) -> Result<()> {
        let method: VectorMethod = cfg.method.parse()?;
        let fill = FillMethod::parse(&cfg.fill_method, cfg.fill_value)?;
        let (grid, _) = self.parts()?;
        let columns = PointColumns {
            x: &cfg.x_column,
            y: &cfg.y_column,
            id: None,
            name: None,
            value: cfg.column.as_deref(),
        };
        let features: Vec<Feature> = read_points(&cfg.source, &columns)?
            .into_iter()
            .map(|p| Feature {
                geometry: Geometry::Point(Point::new(p.x, p.y)),
                value: p.value,
            })
            .collect();
        let data = vector::rasterize(&features, grid, method, cfg.area_division)?;
        self.finish_emission(&cfg.name, data, fill, cfg.compartment.as_deref())
    }

    pub fn setup_hydrology_forcing(&mut self, cfg: &HydrologyForcingConfig) -> Result<()> {
        if !self.mode.builds_pointer() {
            return Err(DelwaqError::config(
                "hydrology forcing needs exchanges and is not available in demission mode",
            ));
        }
        let window = self.window(cfg.time.as_ref())?;
        let (grid, segments) = self.parts()?;
        let pointer = self
            .pointer
            .as_ref()
            .ok_or_else(|| DelwaqError::config("pointer is not defined, run setup_basemaps first"))?;
        let hydrology = hydrology_forcing(cfg, &window, grid, segments, pointer, self.surface()?)?;
        self.forcing.insert(
            "hydrology".to_string(),
            ForcingGroup {
                window,
                files: vec![
                    ("flow.dat".to_string(), true, vec![hydrology.flow]),
                    ("volume.dat".to_string(), false, vec![hydrology.volume]),
                ],
            },
        );
        Ok(())
    }

    fn setup_segment_forcing(
        &mut self,
        group: &str,
        cfg: &SeriesForcingConfig,
        quantities: &[Quantity],
        all_compartments: bool,
    ) -> Result<()> {
        let window = self.window(cfg.time.as_ref())?;
        let (grid, segments) = self.parts()?;
        let spread = match (&cfg.compartment, all_compartments) {
            (Some(c), _) => Spread::Single(segments.comp_index(c)?),
            (None, true) => Spread::All,
            (None, false) => Spread::Single(0),
        };
        let series = segment_forcing(cfg, quantities, spread, &window, grid, segments, self.surface()?)?;
        self.forcing.insert(
            group.to_string(),
            ForcingGroup {
                window,
                files: vec![(format!("{}.dat", group), false, series)],
            },
        );
        Ok(())
    }

    pub fn setup_sediment_forcing(&mut self, cfg: &SeriesForcingConfig) -> Result<()> {
        self.setup_segment_forcing("sediment", cfg, &[Quantity::Sediment], false)
    }

    pub fn setup_climate_forcing(&mut self, cfg: &SeriesForcingConfig) -> Result<()> {
        self.setup_segment_forcing(
            "climate",
            cfg,
            &[Quantity::Temperature, Quantity::Radiation],
            true,
        )
    }

    fn write_staticdata(&self, dir: &Path, segments: &Segments) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let to_f32 = |v: Vec<f64>| -> Vec<f32> {
            v.into_iter()
                .map(|x| if x.is_finite() { x as f32 } else { 0.0 })
                .collect()
        };

        write_static(&dir.join("surface.dat"), &to_f32(segments.segment_values(self.surface()?)))?;
        for name in &self.emissions {
            let field = self.staticmaps.get(name).ok_or_else(|| {
                DelwaqError::missing(format!("emission map '{}' not found", name))
            })?;
            write_static(&dir.join(format!("{}.dat", name)), &to_f32(segments.segment_values(field)))?;
        }

        if let Some(pointer) = &self.pointer {
            write_pointer(&dir.join("pointer.poi"), &pointer.rows)?;
            let length = self
                .staticmaps
                .get("length")
                .ok_or_else(|| DelwaqError::missing("length map not found"))?;
            let half = segments.segment_values(length);
            write_static(&dir.join("length.dat"), &to_f32(exchange_lengths(pointer, &half)))?;
        }

        let join = |v: &[String]| v.join(",");
        let mut attributes = BTreeMap::new();
        attributes.insert("mode".to_string(), self.mode.as_str().to_string());
        attributes.insert("compartments".to_string(), join(&segments.compartments));
        attributes.insert("boundaries".to_string(), join(&self.boundaries));
        if let Some(p) = &self.pointer {
            attributes.insert("fluxes".to_string(), join(&p.fluxes));
        }
        let emissions: Vec<String> = self.emissions.iter().cloned().collect();
        attributes.insert("emissions".to_string(), join(&emissions));
        attributes.retain(|_, v| !v.is_empty());
        let mirror = StaticMirror {
            grid: self.parts()?.0.clone(),
            attributes,
            hydromaps: self.hydromaps.clone(),
            staticmaps: self.staticmaps.clone(),
        };
        write_static_mirror(&dir.join(STATIC_MIRROR), &mirror, NODATA)?;
        Ok(())
    }

    fn write_dynamicdata(&self, dir: &Path) -> Result<()> {
        for (group, data) in &self.forcing {
            let files: Vec<ForcingFile> = data
                .files
                .iter()
                .map(|(file, per_exchange, series)| ForcingFile {
                    file,
                    per_exchange: *per_exchange,
                    series: series.iter().collect(),
                })
                .collect();
            write_group(dir, group, &files, &data.window.start, data.window.step_secs())?;
        }
        Ok(())
    }

    fn write_config(&self, dir: &Path, segments: &Segments, dynamic_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        match self.global.time.as_ref().map(TimeWindow::from_config).transpose()? {
            Some(window) => inc::write_timers(dir, &window)?,
            None => match self.forcing.values().next() {
                Some(group) => inc::write_timers(dir, &group.window)?,
                None => warn!("no time window configured, timer include files not written"),
            },
        }
        inc::write_nrofseg(dir, segments)?;
        inc::write_attributes(dir, segments)?;
        inc::write_surface(dir)?;
        if let Some(pointer) = &self.pointer {
            inc::write_nrofexch(dir, pointer)?;
            inc::write_boundlist(dir, pointer)?;
        }
        if let Some(monitoring) = &self.monitoring {
            inc::write_monitoring(dir, monitoring)?;
        } else if !dir.join("B2_nrofmon.inc").exists() {
            inc::write_monitoring(dir, &Monitoring::default())?;
        }

        // every segment-aligned file written so far, including earlier runs
        let mut entries = Vec::new();
        if dynamic_dir.is_dir() {
            let mut headers: Vec<PathBuf> = std::fs::read_dir(dynamic_dir)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "hdr"))
                .collect();
            headers.sort();
            for header in headers {
                for file in read_header(&header)? {
                    if !file.per_exchange {
                        entries.push((file.variables.join(" "), file.file));
                    }
                }
            }
        }
        let refs: Vec<(&str, &str)> = entries
            .iter()
            .map(|(n, f)| (n.as_str(), f.as_str()))
            .collect();
        inc::write_hydrology(dir, &refs)?;
        Ok(())
    }

    /// Writes config, staticdata and dynamicdata under the model root.
    pub fn write(&self) -> Result<()> {
        let (_, segments) = self.parts()?;
        let dynamic_dir = self.root.join(DYNAMIC_DIR);
        self.write_staticdata(&self.root.join(STATIC_DIR), segments)?;
        self.write_dynamicdata(&dynamic_dir)?;
        self.write_config(&self.root.join(CONFIG_DIR), segments, &dynamic_dir)?;
        info!(root = %self.root.display(), "model written");
        Ok(())
    }
}

/// Two half lengths per exchange; a boundary side takes the length of the
/// segment on the other side.
pub fn exchange_lengths(pointer: &Pointer, segment_length: &[f64]) -> Vec<f64> {
    let half = |id: i32| -> Option<f64> {
        (id > 0)
            .then(|| segment_length.get(id as usize - 1).copied())
            .flatten()
            .map(|l| l / 2.0)
    };
    let mut out = Vec::with_capacity(pointer.nrofexch() * 2);
    for row in &pointer.rows {
        let (from, to) = (half(row[0]), half(row[1]));
        out.push(from.or(to).unwrap_or(0.0));
        out.push(to.or(from).unwrap_or(0.0));
    }
    out
}
