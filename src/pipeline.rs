//! YAML build file: a `global` section followed by component steps that run
//! in the order they are listed.

use crate::config::{
    BasemapsConfig, EmissionRasterConfig, EmissionTableConfig, EmissionVectorConfig,
    GlobalConfig, HydrologyForcingConfig, MonitoringConfig, SeriesForcingConfig,
};
use crate::error::{DelwaqError, Result};
use crate::model::DelwaqModel;
use anyhow::Context;
use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone)]
pub enum Step {
    Basemaps(BasemapsConfig),
    Monitoring(MonitoringConfig),
    EmissionRaster(EmissionRasterConfig),
    EmissionVector(EmissionVectorConfig),
    EmissionTable(EmissionTableConfig),
    HydrologyForcing(HydrologyForcingConfig),
    SedimentForcing(SeriesForcingConfig),
    ClimateForcing(SeriesForcingConfig),
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Basemaps(_) => "setup_basemaps",
            Step::Monitoring(_) => "setup_monitoring",
            Step::EmissionRaster(_) => "setup_emission_raster",
            Step::EmissionVector(_) => "setup_emission_vector",
            Step::EmissionTable(_) => "setup_emission_table",
            Step::HydrologyForcing(_) => "setup_hydrology_forcing",
            Step::SedimentForcing(_) => "setup_sediment_forcing",
            Step::ClimateForcing(_) => "setup_climate_forcing",
        }
    }

    pub fn run(&self, model: &mut DelwaqModel) -> Result<()> {
        match self {
            Step::Basemaps(cfg) => model.setup_basemaps(cfg),
            Step::Monitoring(cfg) => model.setup_monitoring(cfg),
            Step::EmissionRaster(cfg) => model.setup_emission_raster(cfg),
            Step::EmissionVector(cfg) => model.setup_emission_vector(cfg),
            Step::EmissionTable(cfg) => model.setup_emission_table(cfg),
            Step::HydrologyForcing(cfg) => model.setup_hydrology_forcing(cfg),
            Step::SedimentForcing(cfg) => model.setup_sediment_forcing(cfg),
            Step::ClimateForcing(cfg) => model.setup_climate_forcing(cfg),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildFile {
    pub global: GlobalConfig,
    pub steps: Vec<Step>,
}

fn section<T: DeserializeOwned>(key: &str, value: Value) -> Result<T> {
    // an empty section means all defaults
    let value = match value {
        Value::Null => Value::Mapping(Mapping::new()),
        v => v,
    };
    serde_yaml::from_value(value)
        .map_err(|e| DelwaqError::config(format!("section '{}': {}", key, e)))
}

/// Repeated components carry a numeric suffix (`setup_emission_raster2`).
fn component_name(key: &str) -> &str {
    key.trim_end_matches(|c: char| c.is_ascii_digit())
}

pub fn parse_build_file(text: &str) -> Result<BuildFile> {
    let root: Value = serde_yaml::from_str(text)?;
    let mapping = match root {
        Value::Mapping(m) => m,
        Value::Null => Mapping::new(),
        _ => return Err(DelwaqError::config("build file must be a mapping of sections")),
    };

    let mut global = GlobalConfig::default();
    let mut steps = Vec::new();
    for (key, value) in mapping {
        let key = key
            .as_str()
            .ok_or_else(|| DelwaqError::config(format!("section name {:?} is not a string", key)))?
            .to_string();
        let step = match component_name(&key) {
            "global" => {
                global = section(&key, value)?;
                continue;
            }
            "setup_basemaps" => Step::Basemaps(section(&key, value)?),
            "setup_monitoring" => Step::Monitoring(section(&key, value)?),
            "setup_emission_raster" => Step::EmissionRaster(section(&key, value)?),
            "setup_emission_vector" => Step::EmissionVector(section(&key, value)?),
            "setup_emission_table" => Step::EmissionTable(section(&key, value)?),
            "setup_hydrology_forcing" => Step::HydrologyForcing(section(&key, value)?),
            "setup_sediment_forcing" => Step::SedimentForcing(section(&key, value)?),
            "setup_climate_forcing" => Step::ClimateForcing(section(&key, value)?),
            other => {
                return Err(DelwaqError::config(format!("unknown component '{}'", other)));
            }
        };
        steps.push(step);
    }
    Ok(BuildFile { global, steps })
}

pub fn read_build_file(path: &Path) -> Result<BuildFile> {
    if !path.exists() {
        return Err(DelwaqError::missing(format!(
            "build file not found: {}",
            path.display()
        )));
    }
    parse_build_file(&std::fs::read_to_string(path)?)
}

/// Runs all steps on a fresh model and writes it.
pub fn build(root: &Path, file: BuildFile) -> anyhow::Result<DelwaqModel> {
    let mut model = DelwaqModel::new(root, file.global)?;
    run_steps(&mut model, &file.steps)?;
    model.write().context("failed to write model")?;
    Ok(model)
}

/// Runs the steps on a model restored from `root` and writes it back.
pub fn update(root: &Path, file: BuildFile) -> anyhow::Result<DelwaqModel> {
    let mut model = DelwaqModel::load(root, file.global)
        .with_context(|| format!("failed to load model from {}", root.display()))?;
    run_steps(&mut model, &file.steps)?;
    model.write().context("failed to write model")?;
    Ok(model)
}

fn run_steps(model: &mut DelwaqModel, steps: &[Step]) -> anyhow::Result<()> {
    for (i, step) in steps.iter().enumerate() {
        info!(step = step.name(), index = i + 1, total = steps.len(), "running step");
        step.run(model)
            .with_context(|| format!("step {} ({}) failed", i + 1, step.name()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ordered_steps() {
        let text = r#"
global:
  mode: demission
  hydromodel_root: /data/wflow
setup_basemaps:
  include_soil: true
setup_emission_raster:
  source: pop.nc
  variable: population
setup_emission_raster2:
  source: cattle.nc
  variable: cattle
  method: mode
setup_monitoring:
"#;
        let file = parse_build_file(text).unwrap();
        assert_eq!(file.global.mode, "demission");
        let names: Vec<&str> = file.steps.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "setup_basemaps",
                "setup_emission_raster",
                "setup_emission_raster",
                "setup_monitoring"
            ]
        );
        match &file.steps[2] {
            Step::EmissionRaster(cfg) => {
                assert_eq!(cfg.variable, "cattle");
                assert_eq!(cfg.method, "mode");
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_unknown_component() {
        let err = parse_build_file("setup_rainfall:\n  source: x.nc\n").unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_missing_required_field() {
        let err = parse_build_file("setup_emission_vector:\n  layer: roads\n").unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_build_without_basemaps_fails() {
        let dir = tempfile::tempdir().unwrap();
        let file = parse_build_file("setup_monitoring:\n  mon_points: segments\n").unwrap();
        assert!(build(dir.path(), file).is_err());
    }
}
