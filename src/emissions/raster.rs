use super::RasterMethod;
use crate::grid::RasterGrid;
use crate::io::netcdf::GriddedMap;
use ndarray::Array2;
use std::collections::HashMap;
use std::ops::Range;

/// Source indices whose cell centers fall in `[lo, hi)` along one axis.
fn center_range(lo: f64, hi: f64, origin: f64, step: f64, n: usize) -> Range<usize> {
    let a = (lo - origin) / step - 0.5;
    let b = (hi - origin) / step - 0.5;
    let (start, end) = if step > 0.0 {
        (a.ceil(), b.ceil())
    } else {
        (b.floor() + 1.0, a.floor() + 1.0)
    };
    let start = start.clamp(0.0, n as f64) as usize;
    let end = end.clamp(0.0, n as f64) as usize;
    start..end.max(start)
}

fn sample_at(src: &GriddedMap, x: f64, y: f64) -> f64 {
    match src.grid.cell_index(x, y) {
        Some((r, c)) => src.data[[r, c]],
        None => f64::NAN,
    }
}

fn average(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Most frequent value; ties resolve to the smallest value.
fn mode(values: &[f64]) -> f64 {
    let mut counts: HashMap<u64, (f64, usize)> = HashMap::new();
    for v in values {
        counts.entry(v.to_bits()).or_insert((*v, 0)).1 += 1;
    }
    counts
        .into_values()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.total_cmp(&a.0)))
        .map(|(v, _)| v)
        .unwrap_or(f64::NAN)
}

/// Converts source nodata to NaN and optionally divides by source cell area.
pub fn prepare_source(src: &mut GriddedMap, area_division: bool) {
    let nodata = src.nodata;
    if !nodata.is_nan() {
        src.data
            .mapv_inplace(|v| if v == nodata { f64::NAN } else { v });
    }
    if area_division {
        let areas = src.grid.area_grid();
        src.data.zip_mut_with(&areas, |v, a| *v /= a);
    }
}

/// Resamples a source raster onto `dst`. `average` and `mode` aggregate the
/// source cells centered inside each target cell and fall back to the
/// source value at the target center when the source is coarser.
pub fn resample(src: &GriddedMap, dst: &RasterGrid, method: RasterMethod) -> Array2<f64> {
    Array2::from_shape_fn(dst.shape(), |(r, c)| {
        let (xc, yc) = (dst.x_center(c), dst.y_center(r));
        let aggregate: fn(&[f64]) -> f64 = match method {
            RasterMethod::Nearest => return sample_at(src, xc, yc),
            RasterMethod::Average => average,
            RasterMethod::Mode => mode,
        };
        let (xmin, xmax, ymin, ymax) = dst.cell_bounds(r, c);
        let cols = center_range(xmin, xmax, src.grid.x0, src.grid.dx, src.grid.ncols);
        let rows = center_range(ymin, ymax, src.grid.y0, src.grid.dy, src.grid.nrows);
        let mut values = Vec::new();
        for sr in rows {
            for sc in cols.clone() {
                let v = src.data[[sr, sc]];
                if !v.is_nan() {
                    values.push(v);
                }
            }
        }
        if values.is_empty() {
            return sample_at(src, xc, yc);
        }
        aggregate(&values)
    })
}

/// Multiplies a per-m2 field by the model cell area.
pub fn restore_area(data: &mut Array2<f64>, dst: &RasterGrid) {
    let areas = dst.area_grid();
    data.zip_mut_with(&areas, |v, a| *v *= a);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(data: Array2<f64>, cell: f64) -> GriddedMap {
        let (nrows, ncols) = data.dim();
        GriddedMap {
            grid: RasterGrid::new(nrows, ncols, 0.0, nrows as f64 * cell, cell, -cell, false),
            data,
            nodata: -9999.0,
        }
    }

    fn model_grid() -> RasterGrid {
        RasterGrid::new(2, 2, 0.0, 2.0, 1.0, -1.0, false)
    }

    #[test]
    fn test_constant_raster_preserved() {
        let src = source(Array2::from_elem((8, 8), 4.2), 0.25);
        for method in [RasterMethod::Average, RasterMethod::Nearest] {
            let out = resample(&src, &model_grid(), method);
            assert!(out.iter().all(|v| (v - 4.2).abs() < 1e-12));
        }
    }

    #[test]
    fn test_average_of_finer_cells() {
        // 4x4 source at 0.5, model at 1.0: each model cell covers 2x2 source cells
        let data = Array2::from_shape_fn((4, 4), |(r, c)| (r * 4 + c) as f64);
        let out = resample(&source(data, 0.5), &model_grid(), RasterMethod::Average);
        assert_eq!(out[[0, 0]], (0.0 + 1.0 + 4.0 + 5.0) / 4.0);
        assert_eq!(out[[1, 1]], (10.0 + 11.0 + 14.0 + 15.0) / 4.0);
    }

    #[test]
    fn test_average_skips_nodata() {
        let mut src = source(
            ndarray::array![
                [-9999.0, 2.0, 1.0, 1.0],
                [4.0, 6.0, 1.0, 1.0],
                [1.0, 1.0, 1.0, 1.0],
                [1.0, 1.0, 1.0, 1.0]
            ],
            0.5,
        );
        prepare_source(&mut src, false);
        let out = resample(&src, &model_grid(), RasterMethod::Average);
        assert_eq!(out[[0, 0]], 4.0);
    }

    #[test]
    fn test_mode() {
        let data = ndarray::array![
            [3.0, 3.0, 1.0, 2.0],
            [1.0, 3.0, 2.0, 1.0],
            [5.0, 5.0, 1.0, 1.0],
            [6.0, 6.0, 1.0, 1.0]
        ];
        let out = resample(&source(data, 0.5), &model_grid(), RasterMethod::Mode);
        assert_eq!(out[[0, 0]], 3.0);
        // tie between 1 and 2 resolves to the smaller value
        assert_eq!(out[[0, 1]], 1.0);
        assert_eq!(out[[1, 0]], 5.0);
    }

    #[test]
    fn test_coarser_source_falls_back_to_center() {
        let src = source(Array2::from_elem((1, 1), 9.0), 2.0);
        let out = resample(&src, &model_grid(), RasterMethod::Average);
        assert!(out.iter().all(|v| *v == 9.0));
    }

    #[test]
    fn test_area_division_round_trip() {
        let mut src = source(Array2::from_elem((4, 4), 1.0), 0.5);
        prepare_source(&mut src, true);
        let mut out = resample(&src, &model_grid(), RasterMethod::Average);
        restore_area(&mut out, &model_grid());
        // a 0.25 m2 source cell holding 1 becomes 4 per m2, times 1 m2
        assert!(out.iter().all(|v| (v - 4.0).abs() < 1e-12));
    }
}
