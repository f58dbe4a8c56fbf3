use crate::error::{DelwaqError, Result};
use csv::{ReaderBuilder, StringRecord};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

// Point location from a CSV table
#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    pub x: f64,
    pub y: f64,
    pub id: Option<String>,
    pub name: Option<String>,
    pub value: Option<f64>,
}

/// Column names to pick from a point table. Optional columns absent from
/// the header are ignored.
#[derive(Debug, Clone)]
pub struct PointColumns<'a> {
    pub x: &'a str,
    pub y: &'a str,
    pub id: Option<&'a str>,
    pub name: Option<&'a str>,
    pub value: Option<&'a str>,
}

fn column_index(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.eq_ignore_ascii_case(name))
}

fn parse_f64(record: &StringRecord, index: usize, line: usize, column: &str) -> Result<f64> {
    let field = record.get(index).unwrap_or("").trim();
    field.parse::<f64>().map_err(|_| {
        DelwaqError::config(format!(
            "line {}: column '{}' value '{}' is not a number",
            line, column, field
        ))
    })
}

pub fn read_points(path: &Path, columns: &PointColumns) -> Result<Vec<PointRecord>> {
    if !path.exists() {
        return Err(DelwaqError::missing(format!(
            "point table not found: {}",
            path.display()
        )));
    }
    let file = File::open(path)?;
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(b',')
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(BufReader::new(file));

    let headers = rdr.headers()?.clone();
    let x_index = column_index(&headers, columns.x).ok_or_else(|| {
        DelwaqError::config(format!("{} has no column '{}'", path.display(), columns.x))
    })?;
    let y_index = column_index(&headers, columns.y).ok_or_else(|| {
        DelwaqError::config(format!("{} has no column '{}'", path.display(), columns.y))
    })?;
    let id_index = columns.id.and_then(|c| column_index(&headers, c));
    let name_index = columns.name.and_then(|c| column_index(&headers, c));
    let value_index = match columns.value {
        Some(c) => Some(column_index(&headers, c).ok_or_else(|| {
            DelwaqError::config(format!("{} has no column '{}'", path.display(), c))
        })?),
        None => None,
    };

    let mut points = Vec::new();
    for (i, result) in rdr.records().enumerate() {
        let record = result?;
        let line = i + 2;
        let x = parse_f64(&record, x_index, line, columns.x)?;
        let y = parse_f64(&record, y_index, line, columns.y)?;
        let value = match (value_index, columns.value) {
            (Some(idx), Some(col)) => Some(parse_f64(&record, idx, line, col)?),
            _ => None,
        };
        points.push(PointRecord {
            x,
            y,
            id: id_index.and_then(|idx| record.get(idx)).map(|s| s.to_string()),
            name: name_index
                .and_then(|idx| record.get(idx))
                .map(|s| s.to_string()),
            value,
        });
    }
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_points() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stations.csv");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "ID, X, Y, name, load").unwrap();
        writeln!(f, "1, 0.5, 1.5, Upstream, 10").unwrap();
        writeln!(f, "2, 2.5, 0.5, Outlet, 2.5").unwrap();
        drop(f);

        let columns = PointColumns {
            x: "x",
            y: "y",
            id: Some("id"),
            name: Some("name"),
            value: Some("load"),
        };
        let points = read_points(&path, &columns).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].x, 2.5);
        assert_eq!(points[1].id.as_deref(), Some("2"));
        assert_eq!(points[0].name.as_deref(), Some("Upstream"));
        assert_eq!(points[1].value, Some(2.5));
    }

    #[test]
    fn test_missing_value_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.csv");
        std::fs::write(&path, "x,y\n1,2\n").unwrap();
        let columns = PointColumns {
            x: "x",
            y: "y",
            id: None,
            name: None,
            value: Some("load"),
        };
        assert!(read_points(&path, &columns).unwrap_err().is_config());
    }

    #[test]
    fn test_bad_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.csv");
        std::fs::write(&path, "x,y\n1,north\n").unwrap();
        let columns = PointColumns {
            x: "x",
            y: "y",
            id: None,
            name: None,
            value: None,
        };
        assert!(read_points(&path, &columns).is_err());
    }
}
