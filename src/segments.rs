//! Segment numbering, pointer (exchange table) and geometry derived from the
//! upstream hydromodel grid.

use crate::config::MapNames;
use crate::error::{DelwaqError, Result};
use crate::grid::RasterGrid;
use crate::hydromodel::HydroModel;
use ndarray::{Array2, Array3, Axis};
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

/// PCRaster local drain direction of a pit.
pub const LDD_PIT: i32 = 5;

/// Row/column offset of the downstream cell for an LDD code (numeric keypad layout).
pub fn ldd_offset(code: i32) -> Option<(isize, isize)> {
    match code {
        1 => Some((1, -1)),
        2 => Some((1, 0)),
        3 => Some((1, 1)),
        4 => Some((0, -1)),
        5 => Some((0, 0)),
        6 => Some((0, 1)),
        7 => Some((-1, -1)),
        8 => Some((-1, 0)),
        9 => Some((-1, 1)),
        _ => None,
    }
}

/// Base maps extracted from the hydromodel: ldd, basins, basmsk and the river maps.
pub fn hydromaps(hydro: &HydroModel, names: &MapNames) -> Result<BTreeMap<String, Array2<f64>>> {
    let mut maps = BTreeMap::new();
    let ldd = hydro.require_map(&names.flwdir, "flow direction")?;
    let basins = hydro.require_map(&names.basins, "basins")?;
    let basmsk = basins.mapv(|v| if v.is_finite() { 1.0 } else { 0.0 });
    maps.insert("ldd".to_string(), ldd);
    maps.insert("basins".to_string(), basins);
    maps.insert("basmsk".to_string(), basmsk);

    for short in ["rivlen", "rivwth", "rivmsk", "elevtn"] {
        let name = names.resolve(short);
        match hydro.map_opt(name)? {
            Some(map) => {
                maps.insert(short.to_string(), map);
            }
            None => warn!(map = name, "hydromodel map not found, skipping"),
        }
    }
    Ok(maps)
}

/// Segment numbering over the active cells, repeated per compartment.
#[derive(Debug, Clone)]
pub struct Segments {
    pub compartments: Vec<String>,
    pub ncell: usize,
    /// Segment IDs per compartment, 0 on inactive cells.
    pub ptid: Array3<i32>,
    /// Active cells in numbering order.
    pub cells: Vec<(usize, usize)>,
}

impl Segments {
    pub fn ncomp(&self) -> usize {
        self.compartments.len()
    }

    pub fn nrofseg(&self) -> usize {
        self.ncell * self.ncomp()
    }

    pub fn shape(&self) -> (usize, usize) {
        let (_, r, c) = self.ptid.dim();
        (r, c)
    }

    pub fn comp_index(&self, name: &str) -> Result<usize> {
        self.compartments
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| {
                DelwaqError::config(format!(
                    "unknown compartment '{}', model has {:?}",
                    name, self.compartments
                ))
            })
    }

    pub fn is_active(&self, row: usize, col: usize) -> bool {
        self.ptid[[0, row, col]] > 0
    }

    /// Values of a single-layer map at the active cells, in segment order.
    pub fn cell_values(&self, map: &Array2<f64>) -> Vec<f64> {
        self.cells.iter().map(|&(r, c)| map[[r, c]]).collect()
    }

    /// Values of a per-compartment map for every segment, compartment-major.
    pub fn segment_values(&self, field: &Array3<f64>) -> Vec<f64> {
        let mut values = Vec::with_capacity(self.nrofseg());
        for layer in field.axis_iter(Axis(0)) {
            values.extend(self.cells.iter().map(|&(r, c)| layer[[r, c]]));
        }
        values
    }

    /// Segment of the surface water compartment at a point.
    pub fn segment_at(&self, grid: &RasterGrid, x: f64, y: f64) -> Option<i32> {
        let (r, c) = grid.cell_index(x, y)?;
        let id = self.ptid[[0, r, c]];
        (id > 0).then_some(id)
    }

    pub fn active_mask(&self) -> Array2<bool> {
        self.ptid.index_axis(Axis(0), 0).mapv(|v| v > 0)
    }

    /// DELWAQ segment attribute code per compartment (active + vertical position).
    pub fn attribute_codes(&self) -> Vec<String> {
        let n = self.ncomp();
        (0..n)
            .map(|i| {
                let position = if n == 1 {
                    0
                } else if i == 0 {
                    1
                } else if i == n - 1 {
                    3
                } else {
                    2
                };
                format!("{}1", position)
            })
            .collect()
    }
}

/// Numbers active cells `1..=ncell` in row-major order; compartment `k`
/// continues with `k * ncell + id`.
pub fn number_segments(active: &Array2<bool>, compartments: Vec<String>) -> Result<Segments> {
    if compartments.is_empty() {
        return Err(DelwaqError::config("at least one compartment is required"));
    }
    let mut seen = std::collections::HashSet::new();
    for c in &compartments {
        if !seen.insert(c) {
            return Err(DelwaqError::config(format!("duplicate compartment '{}'", c)));
        }
    }
    let (nrows, ncols) = active.dim();
    let cells: Vec<(usize, usize)> = active
        .indexed_iter()
        .filter(|(_, a)| **a)
        .map(|(idx, _)| idx)
        .collect();
    if cells.is_empty() {
        return Err(DelwaqError::grid("hydromodel has no active cells"));
    }
    let ncell = cells.len();
    let ncomp = compartments.len();
    let mut ptid = Array3::<i32>::zeros((ncomp, nrows, ncols));
    for k in 0..ncomp {
        for (i, &(r, c)) in cells.iter().enumerate() {
            ptid[[k, r, c]] = (k * ncell + i + 1) as i32;
        }
    }
    Ok(Segments {
        compartments,
        ncell,
        ptid,
        cells,
    })
}

/// Exchange table with boundaries. Negative IDs in `rows` are boundaries.
#[derive(Debug, Clone)]
pub struct Pointer {
    pub rows: Vec<[i32; 4]>,
    pub boundary_ids: Vec<i32>,
    pub boundary_types: Vec<String>,
    /// Flux names in pointer order; each flux holds `ncell` consecutive rows.
    pub fluxes: Vec<String>,
}

impl Pointer {
    pub fn nrofexch(&self) -> usize {
        self.rows.len()
    }
}

fn split_flux(flux: &str) -> Result<(&str, &str)> {
    flux.split_once('>')
        .ok_or_else(|| DelwaqError::config(format!("flux '{}' is not of the form 'from>to'", flux)))
}

pub fn build_pointer(
    segments: &Segments,
    ldd: &Array2<f64>,
    boundaries: &[String],
    fluxes: &[String],
) -> Result<Pointer> {
    let ncomp = segments.ncomp();
    let (nrows, ncols) = segments.shape();
    if ldd.dim() != (nrows, ncols) {
        return Err(DelwaqError::grid("ldd map does not match the segment grid"));
    }
    info!(
        compartments = ncomp,
        boundaries = boundaries.len(),
        fluxes = fluxes.len(),
        "preparing pointer"
    );

    // Downstream cell per active cell; leaving the domain counts as an outlet.
    let downstream: Vec<Option<(usize, usize)>> = segments
        .cells
        .iter()
        .map(|&(r, c)| {
            let v = ldd[[r, c]];
            let code = if v.is_finite() { v as i32 } else { LDD_PIT };
            let (dr, dc) = ldd_offset(code).unwrap_or((0, 0));
            if (dr, dc) == (0, 0) {
                return None;
            }
            let rr = r as isize + dr;
            let cc = c as isize + dc;
            if rr < 0 || cc < 0 || rr >= nrows as isize || cc >= ncols as isize {
                return None;
            }
            let (rr, cc) = (rr as usize, cc as usize);
            segments.is_active(rr, cc).then_some((rr, cc))
        })
        .collect();

    // downstream segment (or negative outlet) per compartment cell
    let mut ptiddown = Array3::<i32>::zeros((ncomp, nrows, ncols));
    let mut boundary_ids = Vec::new();
    let mut boundary_types = Vec::new();
    let mut lowerid = 0i32;
    for (k, comp) in segments.compartments.iter().enumerate() {
        for (&(r, c), down) in segments.cells.iter().zip(&downstream) {
            ptiddown[[k, r, c]] = match down {
                Some((rr, cc)) => segments.ptid[[k, *rr, *cc]],
                None => {
                    lowerid -= 1;
                    boundary_ids.push(-lowerid);
                    boundary_types.push(format!("{}>out{}", comp, -lowerid));
                    lowerid
                }
            };
        }
    }

    let comp_ids: HashMap<&str, usize> = segments
        .compartments
        .iter()
        .enumerate()
        .map(|(i, c)| (c.as_str(), i))
        .collect();

    let mut rows = Vec::with_capacity(fluxes.len() * segments.ncell);
    for flux in fluxes {
        let (from, to) = split_flux(flux)?;
        let from_comp = comp_ids.get(from).copied();
        let to_comp = comp_ids.get(to).copied();
        let (boundary, comp, inflow) = match (from_comp, to_comp) {
            (Some(a), Some(b)) => {
                for &(r, c) in &segments.cells {
                    let to_id = if a == b {
                        ptiddown[[a, r, c]]
                    } else {
                        segments.ptid[[b, r, c]]
                    };
                    rows.push([segments.ptid[[a, r, c]], to_id, 0, 0]);
                }
                continue;
            }
            (None, Some(b)) => (from, b, true),
            (Some(a), None) => (to, a, false),
            (None, None) => {
                return Err(DelwaqError::config(format!(
                    "flux '{}' does not reference any compartment of {:?}",
                    flux, segments.compartments
                )));
            }
        };
        if !boundaries.iter().any(|b| b == boundary) {
            return Err(DelwaqError::config(format!(
                "flux '{}' references '{}' which is neither a compartment nor a boundary",
                flux, boundary
            )));
        }
        // all cells of a boundary flux share one boundary id
        lowerid -= 1;
        boundary_ids.push(-lowerid);
        boundary_types.push(flux.clone());
        for &(r, c) in &segments.cells {
            let id = segments.ptid[[comp, r, c]];
            rows.push(if inflow {
                [lowerid, id, 0, 0]
            } else {
                [id, lowerid, 0, 0]
            });
        }
    }

    Ok(Pointer {
        rows,
        boundary_ids,
        boundary_types,
        fluxes: fluxes.to_vec(),
    })
}

/// Places a single-layer map in compartment `comp`; other compartments get
/// zero where the map has data and NaN elsewhere.
pub fn extend_comp_with_zeros(map: &Array2<f64>, comp: usize, ncomp: usize) -> Array3<f64> {
    let (nrows, ncols) = map.dim();
    let zeros = map.mapv(|v| if v.is_nan() { f64::NAN } else { 0.0 });
    let mut out = Array3::zeros((ncomp, nrows, ncols));
    for k in 0..ncomp {
        let src = if k == comp { map } else { &zeros };
        out.index_axis_mut(Axis(0), k).assign(src);
    }
    out
}

pub fn extend_comp_with_duplicates(map: &Array2<f64>, ncomp: usize) -> Array3<f64> {
    let (nrows, ncols) = map.dim();
    let mut out = Array3::zeros((ncomp, nrows, ncols));
    for k in 0..ncomp {
        out.index_axis_mut(Axis(0), k).assign(map);
    }
    out
}

/// Surface, length and width per compartment. River cells of the surface
/// water compartment use the river length and width.
pub fn geometrymaps(
    grid: &RasterGrid,
    segments: &Segments,
    maps: &BTreeMap<String, Array2<f64>>,
) -> BTreeMap<String, Array3<f64>> {
    let shape = grid.shape();
    let surface = grid.area_grid();
    let length = Array2::from_shape_fn(shape, |(r, _)| grid.cell_lengths(r).1);
    let width = Array2::from_shape_fn(shape, |(r, _)| grid.cell_lengths(r).0);
    let inactive = segments.active_mask().mapv(|a| !a);
    let mask_inactive = |mut a: Array2<f64>| {
        a.zip_mut_with(&inactive, |v, &off| {
            if off {
                *v = f64::NAN;
            }
        });
        a
    };

    let river = match (maps.get("rivmsk"), maps.get("rivlen"), maps.get("rivwth")) {
        (Some(msk), Some(len), Some(wth)) => Some((msk, len, wth)),
        _ => {
            warn!("river maps incomplete, surface water geometry uses cell dimensions");
            None
        }
    };

    let (sfw_surface, sfw_length, sfw_width) = match river {
        Some((msk, len, wth)) => {
            let is_river = |r: usize, c: usize| msk[[r, c]].is_finite() && msk[[r, c]] > 0.0;
            (
                Array2::from_shape_fn(shape, |(r, c)| {
                    if is_river(r, c) {
                        len[[r, c]] * wth[[r, c]]
                    } else {
                        surface[[r, c]]
                    }
                }),
                Array2::from_shape_fn(shape, |(r, c)| {
                    if is_river(r, c) { len[[r, c]] } else { length[[r, c]] }
                }),
                Array2::from_shape_fn(shape, |(r, c)| {
                    if is_river(r, c) { wth[[r, c]] } else { width[[r, c]] }
                }),
            )
        }
        None => (surface.clone(), length.clone(), width.clone()),
    };

    let ncomp = segments.ncomp();
    let mut out = BTreeMap::new();
    for (name, sfw, other) in [
        ("surface", sfw_surface, surface),
        ("length", sfw_length, length),
        ("width", sfw_width, width),
    ] {
        let sfw = mask_inactive(sfw);
        let mut stacked = extend_comp_with_duplicates(&mask_inactive(other), ncomp);
        stacked.index_axis_mut(Axis(0), 0).assign(&sfw);
        out.insert(name.to_string(), stacked);
    }
    out
}

/// Extra hydromodel maps duplicated over all compartments. A `<name>_River`
/// map, when present, replaces the value on river cells.
pub fn maps_from_hydromodel(
    hydro: &HydroModel,
    names: &MapNames,
    maps: &[String],
    ncomp: usize,
) -> Result<BTreeMap<String, Array3<f64>>> {
    let mut out = BTreeMap::new();
    let rivmsk = hydro.map_opt(&names.rivmsk)?;
    for m in maps {
        let river_name = format!("{}_River", m);
        let base_name = names.resolve(m);
        let base = hydro.map_opt(base_name)?;
        let data = match (hydro.map_opt(&river_name)?, &rivmsk, base) {
            (Some(river), Some(msk), Some(mut base)) => {
                for ((r, c), v) in base.indexed_iter_mut() {
                    if msk[[r, c]].is_finite() && msk[[r, c]] > 0.0 {
                        *v = river[[r, c]];
                    }
                }
                base
            }
            (_, _, Some(base)) => base,
            (Some(river), _, None) => river,
            (None, _, None) => {
                warn!(map = %m, "map not found in hydromodel, skipping");
                continue;
            }
        };
        out.insert(m.clone(), extend_comp_with_duplicates(&data, ncomp));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn active() -> Array2<bool> {
        array![[true, true, false], [false, true, true]]
    }

    #[test]
    fn test_segments_contiguous_over_active_cells() {
        let seg = number_segments(&active(), vec!["sfw".to_string()]).unwrap();
        assert_eq!(seg.ncell, 4);
        assert_eq!(seg.nrofseg(), 4);
        let mut ids: Vec<i32> = seg.ptid.iter().copied().filter(|v| *v > 0).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(seg.ptid[[0, 0, 2]], 0);
    }

    #[test]
    fn test_second_compartment_offset() {
        let seg =
            number_segments(&active(), vec!["sfw".to_string(), "so".to_string()]).unwrap();
        assert_eq!(seg.nrofseg(), 8);
        assert_eq!(seg.ptid[[1, 0, 0]], 5);
        assert_eq!(seg.ptid[[1, 1, 2]], 8);
        assert_eq!(seg.ptid[[1, 1, 0]], 0);
        assert_eq!(seg.attribute_codes(), vec!["11", "31"]);
    }

    #[test]
    fn test_no_active_cells() {
        let none = Array2::from_elem((2, 2), false);
        assert!(number_segments(&none, vec!["sfw".to_string()]).is_err());
    }

    #[test]
    fn test_pointer_lateral_and_boundary() {
        // (0,0) -> (0,1) -> (1,1) -> (1,2) pit
        let ldd = array![[6.0, 2.0, f64::NAN], [f64::NAN, 6.0, 5.0]];
        let seg = number_segments(&active(), vec!["sfw".to_string()]).unwrap();
        let pointer = build_pointer(
            &seg,
            &ldd,
            &["bd".to_string()],
            &["sfw>sfw".to_string(), "bd>sfw".to_string()],
        )
        .unwrap();
        assert_eq!(pointer.nrofexch(), 8);
        assert_eq!(pointer.rows[0], [1, 2, 0, 0]);
        assert_eq!(pointer.rows[1], [2, 3, 0, 0]);
        assert_eq!(pointer.rows[3], [4, -1, 0, 0]);
        // inflow boundary gets the next free id
        assert_eq!(pointer.rows[4], [-2, 1, 0, 0]);
        assert_eq!(pointer.boundary_ids, vec![1, 2]);
        assert_eq!(pointer.boundary_types, vec!["sfw>out1", "bd>sfw"]);
    }

    #[test]
    fn test_pointer_outlets_unique_per_compartment() {
        let ldd = array![[5.0, 5.0, f64::NAN], [f64::NAN, 5.0, 5.0]];
        let seg =
            number_segments(&active(), vec!["sfw".to_string(), "so".to_string()]).unwrap();
        let pointer = build_pointer(
            &seg,
            &ldd,
            &[],
            &["sfw>sfw".to_string(), "so>so".to_string(), "sfw>so".to_string()],
        )
        .unwrap();
        assert_eq!(pointer.boundary_ids, (1..=8).collect::<Vec<_>>());
        assert_eq!(pointer.rows[8], [1, 5, 0, 0]);
        assert_eq!(pointer.rows.len(), 12);
    }

    #[test]
    fn test_pointer_rejects_unknown_boundary() {
        let ldd = Array2::from_elem((2, 3), 5.0);
        let seg = number_segments(&active(), vec!["sfw".to_string()]).unwrap();
        let err = build_pointer(&seg, &ldd, &["bd".to_string()], &["rain>sfw".to_string()])
            .unwrap_err();
        assert!(err.is_config());
        let err = build_pointer(&seg, &ldd, &[], &["sfw-sfw".to_string()]).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_extend_comp() {
        let map = array![[1.0, f64::NAN]];
        let z = extend_comp_with_zeros(&map, 1, 2);
        assert_eq!(z[[0, 0, 0]], 0.0);
        assert!(z[[0, 0, 1]].is_nan());
        assert_eq!(z[[1, 0, 0]], 1.0);
        let d = extend_comp_with_duplicates(&map, 3);
        assert_eq!(d[[2, 0, 0]], 1.0);
    }

    #[test]
    fn test_geometry_uses_river_dimensions() {
        let grid = RasterGrid::new(2, 3, 0.0, 200.0, 100.0, -100.0, false);
        let seg =
            number_segments(&active(), vec!["sfw".to_string(), "so".to_string()]).unwrap();
        let mut maps = BTreeMap::new();
        maps.insert("rivmsk".to_string(), array![[1.0, 0.0, 0.0], [0.0, 0.0, 0.0]]);
        maps.insert("rivlen".to_string(), Array2::from_elem((2, 3), 120.0));
        maps.insert("rivwth".to_string(), Array2::from_elem((2, 3), 5.0));
        let geom = geometrymaps(&grid, &seg, &maps);
        assert_eq!(geom["surface"][[0, 0, 0]], 600.0);
        assert_eq!(geom["surface"][[0, 0, 1]], 10_000.0);
        assert_eq!(geom["surface"][[1, 0, 0]], 10_000.0);
        assert_eq!(geom["length"][[0, 0, 0]], 120.0);
        assert!(geom["width"][[0, 0, 2]].is_nan());
    }

    #[test]
    fn test_segment_values_order() {
        let seg =
            number_segments(&active(), vec!["sfw".to_string(), "so".to_string()]).unwrap();
        let field = Array3::from_shape_fn((2, 2, 3), |(k, r, c)| (k * 100 + r * 10 + c) as f64);
        assert_eq!(
            seg.segment_values(&field),
            vec![0.0, 1.0, 11.0, 12.0, 100.0, 101.0, 111.0, 112.0]
        );
    }
}
