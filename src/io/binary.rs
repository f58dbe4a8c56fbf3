//! DELWAQ binary files: timed records of little-endian `i32` time followed by
//! `f32` values, and the `i32` exchange pointer table.

use crate::error::{DelwaqError, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Bytes taken by one record holding `nvalues` values.
pub fn record_size(nvalues: usize) -> usize {
    4 + 4 * nvalues
}

pub struct RecordWriter {
    inner: BufWriter<File>,
    nvalues: usize,
    nrecords: usize,
}

impl RecordWriter {
    /// Truncates any existing file at `path`.
    pub fn create(path: &Path, nvalues: usize) -> Result<Self> {
        let file = File::create(path)?;
        Ok(RecordWriter {
            inner: BufWriter::new(file),
            nvalues,
            nrecords: 0,
        })
    }

    pub fn write_record(&mut self, time: i32, values: &[f32]) -> Result<()> {
        if values.len() != self.nvalues {
            return Err(DelwaqError::grid(format!(
                "record at t={} has {} values, expected {}",
                time,
                values.len(),
                self.nvalues
            )));
        }
        self.inner.write_all(&time.to_le_bytes())?;
        for v in values {
            self.inner.write_all(&v.to_le_bytes())?;
        }
        self.nrecords += 1;
        Ok(())
    }

    pub fn finish(mut self) -> Result<usize> {
        self.inner.flush()?;
        Ok(self.nrecords)
    }
}

/// Writes a single static record at time 0.
pub fn write_static(path: &Path, values: &[f32]) -> Result<()> {
    let mut writer = RecordWriter::create(path, values.len())?;
    writer.write_record(0, values)?;
    writer.finish()?;
    Ok(())
}

pub fn read_records(path: &Path, nvalues: usize) -> Result<Vec<(i32, Vec<f32>)>> {
    let mut bytes = Vec::new();
    BufReader::new(File::open(path)?).read_to_end(&mut bytes)?;
    let size = record_size(nvalues);
    if bytes.len() % size != 0 {
        return Err(DelwaqError::grid(format!(
            "{} has {} bytes, not a multiple of record size {}",
            path.display(),
            bytes.len(),
            size
        )));
    }
    let records = bytes
        .chunks_exact(size)
        .map(|chunk| {
            let time = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            let values = chunk[4..]
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            (time, values)
        })
        .collect();
    Ok(records)
}

pub fn write_pointer(path: &Path, rows: &[[i32; 4]]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for row in rows {
        for v in row {
            writer.write_all(&v.to_le_bytes())?;
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_have_fixed_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.dat");
        let mut writer = RecordWriter::create(&path, 3).unwrap();
        writer.write_record(0, &[1.0, 2.0, 3.0]).unwrap();
        writer.write_record(86400, &[4.0, 5.0, 6.0]).unwrap();
        assert_eq!(writer.finish().unwrap(), 2);

        let len = std::fs::metadata(&path).unwrap().len() as usize;
        assert_eq!(len, 2 * record_size(3));

        let records = read_records(&path, 3).unwrap();
        assert_eq!(records[1].0, 86400);
        assert_eq!(records[1].1, vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_wrong_value_count_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = RecordWriter::create(&dir.path().join("v.dat"), 2).unwrap();
        assert!(writer.write_record(0, &[1.0]).is_err());
    }

    #[test]
    fn test_create_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volume.dat");
        write_static(&path, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        write_static(&path, &[9.0]).unwrap();
        let records = read_records(&path, 1).unwrap();
        assert_eq!(records, vec![(0, vec![9.0])]);
    }

    #[test]
    fn test_pointer_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pointer.poi");
        write_pointer(&path, &[[1, 2, 0, 0], [2, -1, 0, 0]]).unwrap();
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(i32::from_le_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]), -1);
    }
}
