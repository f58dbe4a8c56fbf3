use super::DynamicSeries;
use crate::error::{DelwaqError, Result};
use crate::io::binary::{RecordWriter, record_size};
use chrono::NaiveDateTime;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

/// One binary file holding the concatenated values of `series` per record.
pub struct ForcingFile<'a> {
    pub file: &'a str,
    /// Values follow the pointer rows instead of the segments.
    pub per_exchange: bool,
    pub series: Vec<&'a DynamicSeries>,
}

impl ForcingFile<'_> {
    fn nvalues(&self) -> usize {
        self.series.iter().map(|s| s.nvalues()).sum()
    }
}

fn record_time(t: &NaiveDateTime, start: &NaiveDateTime) -> Result<i32> {
    let secs = (*t - *start).num_seconds();
    i32::try_from(secs).map_err(|_| {
        DelwaqError::Time(format!(
            "time {} is too far from {} for a 32-bit record time",
            t, start
        ))
    })
}

fn write_binary(dir: &Path, file: &ForcingFile, start: &NaiveDateTime, pb: &ProgressBar) -> Result<usize> {
    let Some(first) = file.series.first() else {
        return Ok(0);
    };
    if file.series.iter().any(|s| s.times != first.times) {
        return Err(DelwaqError::Time(format!(
            "series written to {} do not share a time axis",
            file.file
        )));
    }
    let mut writer = RecordWriter::create(&dir.join(file.file), file.nvalues())?;
    let mut record = Vec::with_capacity(file.nvalues());
    for (i, t) in first.times.iter().enumerate() {
        record.clear();
        for s in &file.series {
            record.extend(s.values.row(i).iter().map(|v| *v as f32));
        }
        writer.write_record(record_time(t, start)?, &record)?;
        pb.inc(1);
    }
    let n = writer.finish()?;
    debug!(file = file.file, records = n, "forcing file written");
    Ok(n)
}

fn write_header(
    dir: &Path,
    group: &str,
    files: &[ForcingFile],
    start: &NaiveDateTime,
    step_secs: i64,
) -> Result<()> {
    let mut f = BufWriter::new(File::create(dir.join(format!("{}.hdr", group)))?);
    writeln!(f, "group: {}", group)?;
    writeln!(f, "start: {}", start.format("%Y-%m-%d %H:%M:%S"))?;
    writeln!(f, "timestep_seconds: {}", step_secs)?;
    for file in files {
        let ntimes = file.series.first().map(|s| s.times.len()).unwrap_or(0);
        let nvalues = file.nvalues();
        writeln!(f, "file: {}", file.file)?;
        writeln!(
            f,
            "  aligned: {}",
            if file.per_exchange { "exchanges" } else { "segments" }
        )?;
        writeln!(f, "  layout: int32 time (seconds since start), {} x float32, little endian", nvalues)?;
        writeln!(f, "  record_bytes: {}", record_size(nvalues))?;
        writeln!(f, "  records: {}", ntimes)?;
        writeln!(f, "  values: {}", nvalues)?;
        writeln!(f, "  variables:")?;
        for s in &file.series {
            writeln!(f, "    {} [{}] {}", s.name, s.unit, s.nvalues())?;
        }
    }
    f.flush()?;
    Ok(())
}

/// Writes the binary files of a forcing group and its `<group>.hdr`.
/// Existing files are overwritten.
pub fn write_group(
    dir: &Path,
    group: &str,
    files: &[ForcingFile],
    start: &NaiveDateTime,
    step_secs: i64,
) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    let total: usize = files
        .iter()
        .map(|f| f.series.first().map(|s| s.times.len()).unwrap_or(0))
        .sum();

    let pb = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} records ({eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb.set_message(group.to_string());

    for file in files {
        write_binary(dir, file, start, &pb)?;
    }
    pb.finish_and_clear();
    write_header(dir, group, files, start, step_secs)?;
    info!(group, files = files.len(), records = total, "forcing written");
    Ok(())
}

/// File entry recovered from a `.hdr` header.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderFile {
    pub file: String,
    pub per_exchange: bool,
    pub variables: Vec<String>,
}

pub fn read_header(path: &Path) -> Result<Vec<HeaderFile>> {
    let text = std::fs::read_to_string(path)?;
    let mut files: Vec<HeaderFile> = Vec::new();
    let mut in_variables = false;
    for line in text.lines() {
        if let Some(name) = line.strip_prefix("file: ") {
            files.push(HeaderFile {
                file: name.trim().to_string(),
                per_exchange: false,
                variables: Vec::new(),
            });
            in_variables = false;
            continue;
        }
        let Some(current) = files.last_mut() else {
            continue;
        };
        let trimmed = line.trim();
        if let Some(kind) = trimmed.strip_prefix("aligned: ") {
            current.per_exchange = kind == "exchanges";
        } else if trimmed == "variables:" {
            in_variables = true;
        } else if in_variables && line.starts_with("    ") {
            if let Some(name) = trimmed.split_whitespace().next() {
                current.variables.push(name.to_string());
            }
        } else {
            in_variables = false;
        }
    }
    Ok(files)
}
