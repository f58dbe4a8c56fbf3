use super::VectorMethod;
use crate::error::{DelwaqError, Result};
use crate::grid::RasterGrid;
use crate::io::gpkg::Feature;
use geo::{
    Area, BooleanOps, BoundingRect, ChamberlainDuquetteArea, Contains, Geometry, MultiPolygon,
    Point, Rect, coord,
};
use ndarray::Array2;

fn points(geometry: &Geometry<f64>) -> Option<Vec<Point<f64>>> {
    match geometry {
        Geometry::Point(p) => Some(vec![*p]),
        Geometry::MultiPoint(mp) => Some(mp.0.clone()),
        _ => None,
    }
}

fn polygons(geometry: &Geometry<f64>) -> Option<MultiPolygon<f64>> {
    match geometry {
        Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p.clone()])),
        Geometry::MultiPolygon(mp) => Some(mp.clone()),
        _ => None,
    }
}

/// Area in m2 of all parts; geographic coordinates use the spherical area.
pub fn feature_area(polygons: &MultiPolygon<f64>, geographic: bool) -> f64 {
    if geographic {
        polygons.chamberlain_duquette_unsigned_area()
    } else {
        polygons.unsigned_area()
    }
}

/// Cells whose extent overlaps the bounding box.
fn cells_in_bbox(grid: &RasterGrid, bbox: Rect<f64>) -> impl Iterator<Item = (usize, usize)> + '_ {
    let (min, max) = (bbox.min(), bbox.max());
    let (r0, c0) = grid.nearest_index(min.x, if grid.dy < 0.0 { max.y } else { min.y });
    let (r1, c1) = grid.nearest_index(max.x, if grid.dy < 0.0 { min.y } else { max.y });
    (r0.min(r1)..=r0.max(r1)).flat_map(move |r| (c0.min(c1)..=c0.max(c1)).map(move |c| (r, c)))
}

/// Share of the cell covered by the polygons.
fn coverage(grid: &RasterGrid, row: usize, col: usize, polygons: &MultiPolygon<f64>) -> f64 {
    let (xmin, xmax, ymin, ymax) = grid.cell_bounds(row, col);
    let cell = Rect::new(coord! { x: xmin, y: ymin }, coord! { x: xmax, y: ymax });
    let cell_area = cell.unsigned_area();
    if cell_area <= 0.0 {
        return 0.0;
    }
    let cell = MultiPolygon::new(vec![cell.to_polygon()]);
    polygons.intersection(&cell).unsigned_area() / cell_area
}

/// Burns features onto `grid`.
///
/// * `value`: polygons assign their value to cells whose center they contain
///   (later features win), points add their value to the containing cell.
///   With `area_division` polygon values are spread by area: value per m2
///   of the whole feature times the model cell area.
/// * `fraction`: share of each cell covered by polygons, in `[0, 1]`.
///
/// Cells untouched by any feature are NaN.
pub fn rasterize(
    features: &[Feature],
    grid: &RasterGrid,
    method: VectorMethod,
    area_division: bool,
) -> Result<Array2<f64>> {
    let mut out = Array2::from_elem(grid.shape(), f64::NAN);
    let has_points = features.iter().any(|f| points(&f.geometry).is_some());
    if has_points && (method == VectorMethod::Fraction || area_division) {
        return Err(DelwaqError::config(
            "point sources support the 'value' method without area division only".to_string(),
        ));
    }

    for feature in features {
        if let Some(points) = points(&feature.geometry) {
            let value = feature.value.unwrap_or(1.0);
            for p in points {
                if let Some((r, c)) = grid.cell_index(p.x(), p.y()) {
                    let cell = &mut out[[r, c]];
                    *cell = if cell.is_nan() { value } else { *cell + value };
                }
            }
            continue;
        }
        let Some(polygons) = polygons(&feature.geometry) else {
            return Err(DelwaqError::config(
                "only point and polygon geometries can be rasterized".to_string(),
            ));
        };
        let Some(bbox) = polygons.bounding_rect() else {
            continue;
        };
        match method {
            VectorMethod::Value => {
                let mut value = feature.value.unwrap_or(1.0);
                if area_division {
                    let area = feature_area(&polygons, grid.geographic);
                    if area <= 0.0 {
                        continue;
                    }
                    value /= area;
                }
                for (r, c) in cells_in_bbox(grid, bbox) {
                    let center = Point::new(grid.x_center(c), grid.y_center(r));
                    if polygons.contains(&center) {
                        out[[r, c]] = if area_division {
                            value * grid.cell_area(r)
                        } else {
                            value
                        };
                    }
                }
            }
            VectorMethod::Fraction => {
                for (r, c) in cells_in_bbox(grid, bbox) {
                    let share = coverage(grid, r, c, &polygons);
                    if share > 0.0 {
                        let cell = &mut out[[r, c]];
                        let total = if cell.is_nan() { share } else { *cell + share };
                        *cell = total.min(1.0);
                    }
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{LineString, MultiPoint, Polygon};

    fn grid() -> RasterGrid {
        RasterGrid::new(2, 2, 0.0, 2.0, 1.0, -1.0, false)
    }

    fn square(x0: f64, y0: f64, size: f64) -> LineString<f64> {
        LineString::from(vec![
            (x0, y0),
            (x0 + size, y0),
            (x0 + size, y0 + size),
            (x0, y0 + size),
            (x0, y0),
        ])
    }

    fn polygon_feature(exterior: LineString<f64>, value: Option<f64>) -> Feature {
        Feature {
            geometry: Geometry::Polygon(Polygon::new(exterior, vec![])),
            value,
        }
    }

    #[test]
    fn test_hole_excluded() {
        let grid = RasterGrid::new(4, 4, 0.0, 4.0, 1.0, -1.0, false);
        let ring = Polygon::new(square(0.0, 0.0, 4.0), vec![square(1.0, 1.0, 2.0)]);
        let features = vec![Feature {
            geometry: Geometry::Polygon(ring.clone()),
            value: Some(1.0),
        }];
        let out = rasterize(&features, &grid, VectorMethod::Value, false).unwrap();
        assert_eq!(out[[0, 0]], 1.0);
        assert!(out[[1, 1]].is_nan());
        assert!(out[[2, 2]].is_nan());
        assert_eq!(out[[3, 3]], 1.0);
        assert_eq!(feature_area(&MultiPolygon::new(vec![ring]), false), 12.0);
    }

    #[test]
    fn test_value_polygons_and_points() {
        let features = vec![
            polygon_feature(square(0.0, 1.0, 1.0), Some(8.0)),
            Feature {
                geometry: Geometry::MultiPoint(MultiPoint::from(vec![(1.5, 0.5), (1.2, 0.2)])),
                value: Some(2.0),
            },
        ];
        assert!(rasterize(&features, &grid(), VectorMethod::Fraction, false).is_err());
        assert!(rasterize(&features, &grid(), VectorMethod::Value, true).is_err());

        let out = rasterize(&features[..1], &grid(), VectorMethod::Value, false).unwrap();
        assert_eq!(out[[0, 0]], 8.0);
        assert!(out[[1, 1]].is_nan());

        let out = rasterize(&features[1..], &grid(), VectorMethod::Value, false).unwrap();
        assert_eq!(out[[1, 1]], 4.0);
    }

    #[test]
    fn test_fraction() {
        // covers the left half of the grid
        let exterior = LineString::from(vec![
            (0.0, 0.0),
            (1.5, 0.0),
            (1.5, 2.0),
            (0.0, 2.0),
            (0.0, 0.0),
        ]);
        let features = vec![polygon_feature(exterior, None)];
        let out = rasterize(&features, &grid(), VectorMethod::Fraction, false).unwrap();
        assert!((out[[0, 0]] - 1.0).abs() < 1e-9);
        assert!((out[[1, 1]] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_value_area_division_spreads_total() {
        let features = vec![polygon_feature(square(0.0, 0.0, 2.0), Some(100.0))];
        let out = rasterize(&features, &grid(), VectorMethod::Value, true).unwrap();
        assert!(out.iter().all(|v| (v - 25.0).abs() < 1e-12));
    }

    #[test]
    fn test_area_division_over_multipolygon_parts() {
        let parts = MultiPolygon::new(vec![
            Polygon::new(square(0.0, 1.0, 1.0), vec![]),
            Polygon::new(square(1.0, 0.0, 1.0), vec![]),
        ]);
        let features = vec![Feature {
            geometry: Geometry::MultiPolygon(parts),
            value: Some(100.0),
        }];
        let out = rasterize(&features, &grid(), VectorMethod::Value, true).unwrap();
        assert!((out[[0, 0]] - 50.0).abs() < 1e-12);
        assert!((out[[1, 1]] - 50.0).abs() < 1e-12);
        assert!(out[[0, 1]].is_nan());
        let total: f64 = out.iter().filter(|v| !v.is_nan()).sum();
        assert!((total - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_geographic_area_is_spherical() {
        // one degree square at the equator, roughly 111 km by 111 km
        let cell = MultiPolygon::new(vec![Polygon::new(square(0.0, 0.0, 1.0), vec![])]);
        let area = feature_area(&cell, true);
        assert!((area - 1.236e10).abs() / 1.236e10 < 0.01);
    }
}
