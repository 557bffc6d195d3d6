//! Persisting search results: one timestamped directory per run.

use crate::shisetsu::SlotRecord;
use crate::shisetsu::slots::sort_for_output;
use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File name of the CSV merged across all tasks of a run.
pub const MERGED_CSV: &str = "slots.csv";

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> OutputError + '_ {
    move |source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// CSV row shape; the header names are what downstream tooling reads.
#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    #[serde(rename = "施設")]
    facility: String,
    #[serde(rename = "室場")]
    room: String,
    #[serde(rename = "日付")]
    date: String,
    #[serde(rename = "時間帯")]
    time_slot: String,
}

impl From<&SlotRecord> for CsvRow {
    fn from(record: &SlotRecord) -> Self {
        Self {
            facility: record.facility_name.clone(),
            room: record.room_name.clone(),
            date: record.date.clone(),
            time_slot: record.time_slot.clone(),
        }
    }
}

impl From<CsvRow> for SlotRecord {
    fn from(row: CsvRow) -> Self {
        SlotRecord::new(row.facility, row.room, row.date, row.time_slot)
    }
}

/// Name of the run directory for `now`, e.g. `20240601_093000`.
pub fn run_dir_name<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// Create `<base>/<YYYYmmdd_HHMMSS>/`.
pub fn create_run_dir<Tz: TimeZone>(base: &Path, now: &DateTime<Tz>) -> Result<PathBuf, OutputError>
where
    Tz::Offset: std::fmt::Display,
{
    let dir = base.join(run_dir_name(now));
    fs::create_dir_all(&dir).map_err(io_error(&dir))?;
    debug!(dir = %dir.display(), "Created run directory");
    Ok(dir)
}

/// Pretty-printed JSON, UTF-8 kept as-is.
pub fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), OutputError> {
    let text = serde_json::to_string_pretty(value)?;
    fs::write(path, text).map_err(io_error(path))
}

/// Write slots as CSV, sorted by (date, time slot).
pub fn write_slots_csv(path: &Path, records: &[SlotRecord]) -> Result<(), OutputError> {
    let mut sorted = records.to_vec();
    sort_for_output(&mut sorted);

    let mut writer = csv::Writer::from_path(path)?;
    // Serializing an empty list would otherwise omit the header.
    if sorted.is_empty() {
        writer.write_record(["施設", "室場", "日付", "時間帯"])?;
    }
    for record in &sorted {
        writer.serialize(CsvRow::from(record))?;
    }
    writer.flush().map_err(io_error(path))?;
    debug!(path = %path.display(), rows = sorted.len(), "Wrote slot CSV");
    Ok(())
}

pub fn read_slots_csv(path: &Path) -> Result<Vec<SlotRecord>, OutputError> {
    let mut reader = csv::Reader::from_path(path)?;
    reader
        .deserialize::<CsvRow>()
        .map(|row| row.map(SlotRecord::from).map_err(OutputError::from))
        .collect()
}
