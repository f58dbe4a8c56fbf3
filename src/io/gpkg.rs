//! GeoPackage vector layers read through SQLite. Geometries are decoded from
//! the GeoPackage binary header followed by standard WKB.

use crate::error::{DelwaqError, Result};
use geo::{Coord, Geometry, LineString, MultiPoint, MultiPolygon, Point, Polygon};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: Geometry<f64>,
    pub value: Option<f64>,
}

struct WkbReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    little_endian: bool,
}

impl<'a> WkbReader<'a> {
    fn new(bytes: &'a [u8], pos: usize) -> Self {
        WkbReader {
            bytes,
            pos,
            little_endian: true,
        }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos + N;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| DelwaqError::config("truncated geometry blob".to_string()))?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take::<4>()?;
        Ok(if self.little_endian {
            u32::from_le_bytes(b)
        } else {
            u32::from_be_bytes(b)
        })
    }

    fn f64(&mut self) -> Result<f64> {
        let b = self.take::<8>()?;
        Ok(if self.little_endian {
            f64::from_le_bytes(b)
        } else {
            f64::from_be_bytes(b)
        })
    }

    /// Byte order and geometry type; returns (base type, coordinate dimension).
    fn header(&mut self) -> Result<(u32, usize)> {
        self.little_endian = self.u8()? == 1;
        let raw = self.u32()?;
        // EWKB flags in the high bits, ISO dimensions in the thousands
        let ewkb_z = raw & 0x8000_0000 != 0;
        let ewkb_m = raw & 0x4000_0000 != 0;
        let raw = raw & 0x0FFF_FFFF;
        let base = raw % 1000;
        let dims = match raw / 1000 {
            0 => 2 + ewkb_z as usize + ewkb_m as usize,
            1 | 2 => 3,
            3 => 4,
            other => {
                return Err(DelwaqError::config(format!(
                    "unsupported WKB dimension code {}",
                    other
                )));
            }
        };
        Ok((base, dims))
    }

    fn coord(&mut self, dims: usize) -> Result<Coord<f64>> {
        let x = self.f64()?;
        let y = self.f64()?;
        for _ in 2..dims {
            self.f64()?;
        }
        Ok(Coord { x, y })
    }

    fn ring(&mut self, dims: usize) -> Result<LineString<f64>> {
        let n = self.u32()? as usize;
        let coords = (0..n).map(|_| self.coord(dims)).collect::<Result<Vec<_>>>()?;
        Ok(LineString::from(coords))
    }

    /// First ring is the exterior, the rest are holes.
    fn polygon_body(&mut self, dims: usize) -> Result<Polygon<f64>> {
        let n = self.u32()? as usize;
        let mut rings = (0..n).map(|_| self.ring(dims)).collect::<Result<Vec<_>>>()?;
        if rings.is_empty() {
            return Ok(Polygon::new(LineString::new(vec![]), vec![]));
        }
        let exterior = rings.remove(0);
        Ok(Polygon::new(exterior, rings))
    }

    fn geometry(&mut self) -> Result<Geometry<f64>> {
        let (base, dims) = self.header()?;
        match base {
            1 => Ok(Geometry::Point(Point::from(self.coord(dims)?))),
            3 => Ok(Geometry::Polygon(self.polygon_body(dims)?)),
            4 => {
                let n = self.u32()? as usize;
                let mut points = Vec::with_capacity(n);
                for _ in 0..n {
                    let (_, d) = self.header()?;
                    points.push(Point::from(self.coord(d)?));
                }
                Ok(Geometry::MultiPoint(MultiPoint::new(points)))
            }
            6 => {
                let n = self.u32()? as usize;
                let mut polygons = Vec::with_capacity(n);
                for _ in 0..n {
                    let (_, d) = self.header()?;
                    polygons.push(self.polygon_body(d)?);
                }
                Ok(Geometry::MultiPolygon(MultiPolygon::new(polygons)))
            }
            other => Err(DelwaqError::config(format!(
                "unsupported geometry type {} (points and polygons only)",
                other
            ))),
        }
    }
}

/// Decodes a GeoPackage geometry blob.
pub fn decode_gpkg_geometry(blob: &[u8]) -> Result<Geometry<f64>> {
    if blob.len() < 8 || &blob[0..2] != b"GP" {
        return Err(DelwaqError::config("geometry blob lacks GeoPackage header".to_string()));
    }
    let flags = blob[3];
    let envelope = match (flags >> 1) & 0x07 {
        0 => 0,
        1 => 32,
        2 | 3 => 48,
        4 => 64,
        other => {
            return Err(DelwaqError::config(format!(
                "invalid GeoPackage envelope indicator {}",
                other
            )));
        }
    };
    WkbReader::new(blob, 8 + envelope).geometry()
}

fn geometry_column(conn: &Connection, layer: &str) -> Result<String> {
    let mut stmt =
        conn.prepare("SELECT column_name FROM gpkg_geometry_columns WHERE table_name = ?")?;
    let mut rows = stmt.query([layer])?;
    match rows.next()? {
        Some(row) => Ok(row.get(0)?),
        None => Err(DelwaqError::missing(format!(
            "layer '{}' not found in GeoPackage",
            layer
        ))),
    }
}

/// Reads all features of a layer with an optional numeric attribute column.
pub fn read_layer(path: &Path, layer: &str, column: Option<&str>) -> Result<Vec<Feature>> {
    if !path.exists() {
        return Err(DelwaqError::missing(format!(
            "GeoPackage not found: {}",
            path.display()
        )));
    }
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let geom_col = geometry_column(&conn, layer)?;
    let query = match column {
        Some(c) => format!("SELECT \"{}\", \"{}\" FROM \"{}\"", geom_col, c, layer),
        None => format!("SELECT \"{}\", NULL FROM \"{}\"", geom_col, layer),
    };
    let mut stmt = conn.prepare(&query)?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, Option<Vec<u8>>>(0)?,
            row.get::<_, Option<f64>>(1)?,
        ))
    })?;

    let mut features = Vec::new();
    for row in rows {
        let (blob, value) = row?;
        let Some(blob) = blob else { continue };
        features.push(Feature {
            geometry: decode_gpkg_geometry(&blob)?,
            value,
        });
    }
    Ok(features)
}
