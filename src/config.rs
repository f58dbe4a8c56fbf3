use crate::error::{DelwaqError, Result};
use chrono::{Duration, NaiveDateTime};
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;

// Variable names of the upstream hydromodel's static maps
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MapNames {
    pub flwdir: String,
    pub basins: String,
    pub rivlen: String,
    pub rivwth: String,
    pub rivmsk: String,
    pub elevtn: String,
}

impl Default for MapNames {
    fn default() -> Self {
        MapNames {
            flwdir: "wflow_ldd".to_string(),
            basins: "wflow_subcatch".to_string(),
            rivlen: "wflow_riverlength".to_string(),
            rivwth: "wflow_riverwidth".to_string(),
            rivmsk: "wflow_river".to_string(),
            elevtn: "wflow_dem".to_string(),
        }
    }
}

impl MapNames {
    /// Resolves a short map name (`rivmsk`, `basins`, ...) to the hydromodel variable.
    pub fn resolve<'a>(&'a self, short: &'a str) -> &'a str {
        match short {
            "flwdir" | "ldd" => &self.flwdir,
            "basins" => &self.basins,
            "rivlen" => &self.rivlen,
            "rivwth" => &self.rivwth,
            "rivmsk" => &self.rivmsk,
            "elevtn" => &self.elevtn,
            other => other,
        }
    }
}

// Model flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelMode {
    Delwaq,
    Demission,
}

impl FromStr for ModelMode {
    type Err = DelwaqError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "delwaq" => Ok(ModelMode::Delwaq),
            "demission" => Ok(ModelMode::Demission),
            other => Err(DelwaqError::config(format!(
                "unknown model mode '{}', expected one of [delwaq, demission]",
                other
            ))),
        }
    }
}

impl ModelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelMode::Delwaq => "delwaq",
            ModelMode::Demission => "demission",
        }
    }

    pub fn builds_pointer(&self) -> bool {
        matches!(self, ModelMode::Delwaq)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeWindowConfig {
    pub starttime: String,
    pub endtime: String,
    #[serde(default = "default_timestep")]
    pub timestepsecs: i64,
}

fn default_timestep() -> i64 {
    86400
}

const TIME_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d"];

pub fn parse_datetime(value: &str) -> Result<NaiveDateTime> {
    let value = value.trim();
    for fmt in TIME_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(t);
        }
    }
    if let Ok(d) = chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(t) = d.and_hms_opt(0, 0, 0) {
            return Ok(t);
        }
    }
    Err(DelwaqError::Time(format!("cannot parse datetime '{}'", value)))
}

/// Validated time window with a fixed step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub step: Duration,
}

impl TimeWindow {
    pub fn from_config(cfg: &TimeWindowConfig) -> Result<Self> {
        let start = parse_datetime(&cfg.starttime)?;
        let end = parse_datetime(&cfg.endtime)?;
        if cfg.timestepsecs <= 0 {
            return Err(DelwaqError::config(format!(
                "timestepsecs must be positive, got {}",
                cfg.timestepsecs
            )));
        }
        if end < start {
            return Err(DelwaqError::config(format!(
                "endtime {} is before starttime {}",
                end, start
            )));
        }
        Ok(TimeWindow {
            start,
            end,
            step: Duration::seconds(cfg.timestepsecs),
        })
    }

    pub fn step_secs(&self) -> i64 {
        self.step.num_seconds()
    }

    /// All timestamps from start to end inclusive.
    pub fn timestamps(&self) -> Vec<NaiveDateTime> {
        let mut times = Vec::new();
        let mut t = self.start;
        while t <= self.end {
            times.push(t);
            t += self.step;
        }
        times
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub mode: String,
    pub hydromodel_root: PathBuf,
    pub staticmaps_fn: String,
    pub maps: MapNames,
    pub time: Option<TimeWindowConfig>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        GlobalConfig {
            mode: "delwaq".to_string(),
            hydromodel_root: PathBuf::from("."),
            staticmaps_fn: "staticmaps.nc".to_string(),
            maps: MapNames::default(),
            time: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BasemapsConfig {
    pub include_soil: bool,
    pub compartments: Option<Vec<String>>,
    pub boundaries: Option<Vec<String>>,
    pub fluxes: Option<Vec<String>>,
    pub maps: Vec<String>,
}

impl Default for BasemapsConfig {
    fn default() -> Self {
        BasemapsConfig {
            include_soil: false,
            compartments: None,
            boundaries: None,
            fluxes: None,
            maps: ["rivmsk", "lndslp", "strord", "N", "SoilThickness", "thetaS"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl BasemapsConfig {
    pub fn compartments(&self) -> Vec<String> {
        match &self.compartments {
            Some(c) => c.clone(),
            None if self.include_soil => vec!["sfw".to_string(), "so".to_string()],
            None => vec!["sfw".to_string()],
        }
    }

    pub fn boundaries(&self) -> Vec<String> {
        self.boundaries
            .clone()
            .unwrap_or_else(|| vec!["bd".to_string()])
    }

    pub fn fluxes(&self) -> Vec<String> {
        if let Some(f) = &self.fluxes {
            return f.clone();
        }
        let mut fluxes = vec!["sfw>sfw".to_string(), "bd>sfw".to_string()];
        if self.include_soil && self.compartments.is_none() {
            fluxes.push("sfw>so".to_string());
            fluxes.push("so>sfw".to_string());
        }
        fluxes
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub mon_points: Option<String>,
    pub mon_areas: Option<String>,
    pub id_column: String,
    pub name_column: String,
    pub x_column: String,
    pub y_column: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        MonitoringConfig {
            mon_points: None,
            mon_areas: None,
            id_column: "id".to_string(),
            name_column: "name".to_string(),
            x_column: "x".to_string(),
            y_column: "y".to_string(),
        }
    }
}

fn default_fill() -> String {
    "zero".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmissionRasterConfig {
    pub source: PathBuf,
    pub variable: String,
    pub name: Option<String>,
    #[serde(default = "default_raster_method")]
    pub method: String,
    #[serde(default = "default_fill")]
    pub fill_method: String,
    #[serde(default)]
    pub fill_value: f64,
    #[serde(default)]
    pub area_division: bool,
    pub compartment: Option<String>,
}

fn default_raster_method() -> String {
    "average".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmissionVectorConfig {
    pub source: PathBuf,
    pub layer: String,
    pub column: Option<String>,
    pub name: String,
    #[serde(default = "default_vector_method")]
    pub method: String,
    #[serde(default = "default_fill")]
    pub fill_method: String,
    #[serde(default)]
    pub fill_value: f64,
    #[serde(default)]
    pub area_division: bool,
    pub compartment: Option<String>,
}

fn default_vector_method() -> String {
    "value".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmissionTableConfig {
    pub source: PathBuf,
    pub name: String,
    pub column: Option<String>,
    #[serde(default = "default_x")]
    pub x_column: String,
    #[serde(default = "default_y")]
    pub y_column: String,
    #[serde(default = "default_vector_method")]
    pub method: String,
    #[serde(default = "default_fill")]
    pub fill_method: String,
    #[serde(default)]
    pub fill_value: f64,
    #[serde(default)]
    pub area_division: bool,
    pub compartment: Option<String>,
}

fn default_x() -> String {
    "x".to_string()
}

fn default_y() -> String {
    "y".to_string()
}

/// One source variable with its declared unit.
#[derive(Debug, Clone, Deserialize)]
pub struct VariableSpec {
    pub var: String,
    pub unit: String,
    /// Output name, defaults to `var`.
    pub name: Option<String>,
}

impl VariableSpec {
    pub fn output_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.var)
    }
}

fn default_time_method() -> String {
    "nearest".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct HydrologyForcingConfig {
    pub source: PathBuf,
    pub time: Option<TimeWindowConfig>,
    #[serde(default = "default_time_method")]
    pub time_method: String,
    #[serde(default = "default_true")]
    pub add_volume_offset: bool,
    /// Flux name (as in the pointer flux list) to source variable.
    pub fluxes: std::collections::BTreeMap<String, VariableSpec>,
    /// Compartment name to source volume variable.
    pub volumes: std::collections::BTreeMap<String, VariableSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeriesForcingConfig {
    pub source: PathBuf,
    pub time: Option<TimeWindowConfig>,
    #[serde(default = "default_time_method")]
    pub time_method: String,
    pub variables: Vec<VariableSpec>,
    pub compartment: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_map_names() {
        let maps = MapNames::default();
        assert_eq!(maps.resolve("flwdir"), "wflow_ldd");
        assert_eq!(maps.resolve("rivmsk"), "wflow_river");
        assert_eq!(maps.resolve("Slope"), "Slope");
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("DelWAQ".parse::<ModelMode>().unwrap(), ModelMode::Delwaq);
        assert!("swan".parse::<ModelMode>().unwrap_err().is_config());
    }

    #[test]
    fn test_time_window() {
        let window = TimeWindow::from_config(&TimeWindowConfig {
            starttime: "2010-01-01 00:00:00".to_string(),
            endtime: "2010-01-03".to_string(),
            timestepsecs: 86400,
        })
        .unwrap();
        assert_eq!(window.timestamps().len(), 3);
        assert_eq!(window.step_secs(), 86400);
    }

    #[test]
    fn test_time_window_rejects_negative_step() {
        let err = TimeWindow::from_config(&TimeWindowConfig {
            starttime: "2010-01-01".to_string(),
            endtime: "2010-01-03".to_string(),
            timestepsecs: -5,
        })
        .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_basemaps_defaults() {
        let cfg = BasemapsConfig {
            include_soil: true,
            ..Default::default()
        };
        assert_eq!(cfg.compartments(), vec!["sfw", "so"]);
        assert_eq!(cfg.fluxes().len(), 4);
        assert_eq!(BasemapsConfig::default().fluxes(), vec!["sfw>sfw", "bd>sfw"]);
    }
}
