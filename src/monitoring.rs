//! Monitoring points and areas mapped onto segment IDs.

use crate::config::MonitoringConfig;
use crate::error::{DelwaqError, Result};
use crate::grid::RasterGrid;
use crate::io::csv::{PointColumns, read_points};
use crate::segments::Segments;
use ndarray::Array2;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct MonitoringEntry {
    pub id: String,
    pub label: String,
    pub segments: Vec<i32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitoringSet {
    pub entries: Vec<MonitoringEntry>,
}

impl MonitoringSet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn check_unique_ids(&self, kind: &str) -> Result<()> {
        let mut seen = HashSet::new();
        for e in &self.entries {
            if !seen.insert(e.id.as_str()) {
                return Err(DelwaqError::config(format!(
                    "duplicate monitoring {} id '{}'",
                    kind, e.id
                )));
            }
        }
        Ok(())
    }

    /// Grid of entry positions (1-based) on the surface compartment, NaN elsewhere.
    pub fn to_map(&self, segments: &Segments) -> Array2<f64> {
        let mut map = Array2::from_elem(segments.shape(), f64::NAN);
        for (i, entry) in self.entries.iter().enumerate() {
            for seg in &entry.segments {
                let cell = (*seg as usize - 1) % segments.ncell;
                let (r, c) = segments.cells[cell];
                map[[r, c]] = (i + 1) as f64;
            }
        }
        map
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Monitoring {
    pub points: MonitoringSet,
    pub areas: MonitoringSet,
}

impl Monitoring {
    pub fn nrofmon(&self) -> usize {
        self.points.len() + self.areas.len()
    }
}

/// Every segment of every compartment is a monitoring point.
pub fn points_from_segments(segments: &Segments) -> MonitoringSet {
    let entries = (1..=segments.nrofseg() as i32)
        .map(|id| MonitoringEntry {
            id: id.to_string(),
            label: format!("Seg{}", id),
            segments: vec![id],
        })
        .collect();
    MonitoringSet { entries }
}

/// Maps table points to the surface water segment containing them. Points
/// outside the active domain are dropped; ids default to the row number.
pub fn points_from_table(
    path: &Path,
    cfg: &MonitoringConfig,
    grid: &RasterGrid,
    segments: &Segments,
) -> Result<MonitoringSet> {
    let columns = PointColumns {
        x: &cfg.x_column,
        y: &cfg.y_column,
        id: Some(&cfg.id_column),
        name: Some(&cfg.name_column),
        value: None,
    };
    let records = read_points(path, &columns)?;
    let mut entries = Vec::new();
    let mut dropped = 0;
    for (i, rec) in records.iter().enumerate() {
        let id = rec.id.clone().unwrap_or_else(|| (i + 1).to_string());
        match segments.segment_at(grid, rec.x, rec.y) {
            Some(seg) => entries.push(MonitoringEntry {
                label: rec.name.clone().unwrap_or_else(|| format!("Station{}", id)),
                id,
                segments: vec![seg],
            }),
            None => {
                dropped += 1;
                warn!(id = %id, x = rec.x, y = rec.y, "monitoring point outside the model domain");
            }
        }
    }
    if dropped > 0 {
        warn!(dropped, "monitoring points dropped");
    }
    let set = MonitoringSet { entries };
    set.check_unique_ids("point")?;
    Ok(set)
}

pub fn areas_from_compartments(segments: &Segments) -> MonitoringSet {
    let entries = segments
        .compartments
        .iter()
        .enumerate()
        .map(|(k, comp)| {
            let first = (k * segments.ncell) as i32 + 1;
            MonitoringEntry {
                id: (k + 1).to_string(),
                label: comp.clone(),
                segments: (first..first + segments.ncell as i32).collect(),
            }
        })
        .collect();
    MonitoringSet { entries }
}

/// One area per basin id, spanning all compartments.
pub fn areas_from_subcatch(segments: &Segments, basins: &Array2<f64>) -> Result<MonitoringSet> {
    let mut by_basin: BTreeMap<i64, Vec<i32>> = BTreeMap::new();
    for k in 0..segments.ncomp() {
        for (i, &(r, c)) in segments.cells.iter().enumerate() {
            let basin = basins[[r, c]];
            if !basin.is_finite() {
                return Err(DelwaqError::grid(format!(
                    "active cell ({}, {}) has no basin id",
                    r, c
                )));
            }
            by_basin
                .entry(basin as i64)
                .or_default()
                .push((k * segments.ncell + i + 1) as i32);
        }
    }
    let entries = by_basin
        .into_iter()
        .map(|(basin, segs)| MonitoringEntry {
            id: basin.to_string(),
            label: format!("Subcatch{}", basin),
            segments: segs,
        })
        .collect();
    Ok(MonitoringSet { entries })
}

pub fn build_monitoring(
    cfg: &MonitoringConfig,
    grid: &RasterGrid,
    segments: &Segments,
    basins: Option<&Array2<f64>>,
) -> Result<Monitoring> {
    let points = match cfg.mon_points.as_deref() {
        None => MonitoringSet::default(),
        Some("segments") => points_from_segments(segments),
        Some(path) => points_from_table(Path::new(path), cfg, grid, segments)?,
    };
    let areas = match cfg.mon_areas.as_deref() {
        None => MonitoringSet::default(),
        Some("compartments") => areas_from_compartments(segments),
        Some("subcatch") => {
            let basins = basins.ok_or_else(|| {
                DelwaqError::missing("subcatch monitoring areas need the basins map".to_string())
            })?;
            areas_from_subcatch(segments, basins)?
        }
        Some(other) => {
            return Err(DelwaqError::config(format!(
                "unsupported monitoring areas '{}', expected one of [compartments, subcatch]",
                other
            )));
        }
    };
    areas.check_unique_ids("area")?;
    info!(points = points.len(), areas = areas.len(), "monitoring prepared");
    Ok(Monitoring { points, areas })
}
