//! ASCII include files read by the DELWAQ input processor.

use crate::config::TimeWindow;
use crate::error::Result;
use crate::monitoring::{Monitoring, MonitoringSet};
use crate::segments::{Pointer, Segments};
use chrono::NaiveDateTime;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

fn create(dir: &Path, name: &str) -> Result<BufWriter<File>> {
    Ok(BufWriter::new(File::create(dir.join(name))?))
}

fn delwaq_time(t: &NaiveDateTime) -> String {
    t.format("%Y/%m/%d-%H:%M:%S").to_string()
}

/// Timestep as `dddhhmmss`.
pub fn timestep_string(secs: i64) -> String {
    let days = secs / 86400;
    let hours = (secs % 86400) / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    format!("{:03}{:02}{:02}{:02}", days, hours, minutes, seconds)
}

pub fn write_timers(dir: &Path, window: &TimeWindow) -> Result<()> {
    let start = delwaq_time(&window.start);
    let stop = delwaq_time(&window.end);
    let step = timestep_string(window.step_secs());

    let mut f = create(dir, "B1_timestamp.inc")?;
    writeln!(
        f,
        "'T0: {}  (scu=       1s)'",
        window.start.format("%Y.%m.%d %H:%M:%S")
    )?;
    f.flush()?;

    let mut f = create(dir, "B2_sysclock.inc")?;
    writeln!(f, "  1 'DDHHMMSS' 'DDHHMMSS'  ; system clock")?;
    f.flush()?;

    let mut f = create(dir, "B2_simtimers.inc")?;
    writeln!(f, "  {} ; start time", start)?;
    writeln!(f, "  {} ; stop time", stop)?;
    writeln!(f, "  0 ; timestep constant")?;
    writeln!(f, "; dddhhmmss format for timestep")?;
    writeln!(f, "{} ; timestep", step)?;
    f.flush()?;

    let mut f = create(dir, "B2_outputtimes.inc")?;
    for kind in ["monitoring", "map", "history"] {
        writeln!(f, "  {} {} {} ; start, stop and step for {}", start, stop, step, kind)?;
    }
    f.flush()?;
    Ok(())
}

pub fn write_nrofseg(dir: &Path, segments: &Segments) -> Result<()> {
    let mut f = create(dir, "B3_nrofseg.inc")?;
    writeln!(f, "{} ; nr of segments", segments.nrofseg())?;
    f.flush()?;
    Ok(())
}

pub fn write_attributes(dir: &Path, segments: &Segments) -> Result<()> {
    let mut f = create(dir, "B3_attributes.inc")?;
    writeln!(f, "      ; DELWAQ_COMPLETE_ATTRIBUTES")?;
    writeln!(f, " 1    ; one block with input")?;
    writeln!(f, " 1    ; number of attributes, they are :")?;
    writeln!(f, "     1    ;  '1' is active '0' is not")?;
    writeln!(f, " 1    ; data follows in this file")?;
    writeln!(f, " 1    ; all data is given without defaults")?;
    for (comp, code) in segments.compartments.iter().zip(segments.attribute_codes()) {
        writeln!(f, "     {}*{} ; {}", segments.ncell, code, comp)?;
    }
    writeln!(f, " 0    ; no time dependent attributes")?;
    f.flush()?;
    Ok(())
}

pub fn write_nrofexch(dir: &Path, pointer: &Pointer) -> Result<()> {
    let mut f = create(dir, "B4_nrofexch.inc")?;
    writeln!(f, "{} 0 0 ; x, y, z direction", pointer.nrofexch())?;
    f.flush()?;
    let mut f = create(dir, "B4_pointer.inc")?;
    writeln!(f, "0 ; pointers from binary file")?;
    writeln!(f, "'pointer.poi' ; pointers file")?;
    f.flush()?;
    Ok(())
}

pub fn write_boundlist(dir: &Path, pointer: &Pointer) -> Result<()> {
    let mut f = create(dir, "B5_boundlist.inc")?;
    writeln!(f, ";'NodeID' 'Number' 'Type'")?;
    for (id, kind) in pointer.boundary_ids.iter().zip(&pointer.boundary_types) {
        writeln!(f, "'BD_{}' '{}' '{}'", id, id, kind)?;
    }
    f.flush()?;
    Ok(())
}

fn write_area_block(f: &mut impl Write, set: &MonitoringSet) -> Result<()> {
    for entry in &set.entries {
        writeln!(f, "'{}' {}", entry.label, entry.segments.len())?;
        for chunk in entry.segments.chunks(10) {
            let line: Vec<String> = chunk.iter().map(|s| s.to_string()).collect();
            writeln!(f, "{}", line.join(" "))?;
        }
    }
    Ok(())
}

pub fn write_monitoring(dir: &Path, monitoring: &Monitoring) -> Result<()> {
    let mut f = create(dir, "B2_nrofmon.inc")?;
    writeln!(f, "{} ; nr of monitor locations", monitoring.nrofmon())?;
    f.flush()?;

    let mut f = create(dir, "B2_stations.inc")?;
    for entry in &monitoring.points.entries {
        for seg in &entry.segments {
            writeln!(f, "'{}' 1 {}", entry.label, seg)?;
        }
    }
    f.flush()?;

    let mut f = create(dir, "B2_stations-balance.inc")?;
    write_area_block(&mut f, &monitoring.points)?;
    f.flush()?;

    let mut f = create(dir, "B2_monareas.inc")?;
    write_area_block(&mut f, &monitoring.areas)?;
    f.flush()?;
    Ok(())
}

pub fn write_surface(dir: &Path) -> Result<()> {
    let mut f = create(dir, "B7_surf.inc")?;
    writeln!(f, "PARAMETERS Surf ALL BINARY_FILE 'surface.dat' ; from staticdata")?;
    f.flush()?;
    Ok(())
}

/// Lists the binary forcing files written so far.
pub fn write_hydrology(dir: &Path, files: &[(&str, &str)]) -> Result<()> {
    let mut f = create(dir, "B7_hydrology.inc")?;
    for (name, file) in files {
        writeln!(f, "SEG_FUNCTIONS {} ALL BINARY_FILE '{}' ; from dynamicdata", name, file)?;
    }
    f.flush()?;
    Ok(())
}
