//! The normalized slot record every scraping path converges on.

use super::scrape::Row;
use html_scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::debug;

/// One reservable (facility, room, date, time range) reported as available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub facility_name: String,
    pub room_name: String,
    pub date: String,
    pub time_slot: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facility_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_date: Option<String>,
}

/// Uniqueness key of a [`SlotRecord`].
pub type SlotKey<'a> = (&'a str, &'a str, &'a str, &'a str);

impl SlotRecord {
    pub fn new(
        facility_name: impl Into<String>,
        room_name: impl Into<String>,
        date: impl Into<String>,
        time_slot: impl Into<String>,
    ) -> Self {
        Self {
            facility_name: facility_name.into(),
            room_name: room_name.into(),
            date: date.into(),
            time_slot: time_slot.into(),
            facility_code: None,
            room_code: None,
            use_date: None,
        }
    }

    pub fn key(&self) -> SlotKey<'_> {
        (
            &self.facility_name,
            &self.room_name,
            &self.date,
            &self.time_slot,
        )
    }

    /// Build a record from a scraped detail-table row.
    ///
    /// Returns `None` for rows that do not name a facility and a date.
    pub fn from_row(row: &Row) -> Option<Self> {
        let field = |names: &[&str]| {
            names
                .iter()
                .find_map(|name| row.get(*name))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let facility_name = field(&["施設", "施設名"])?;
        let date = field(&["日付"])?;
        Some(Self {
            facility_name,
            room_name: field(&["室場", "室場名"]).unwrap_or_default(),
            date,
            time_slot: field(&["時間帯"]).unwrap_or_default(),
            facility_code: field(&["施設_data-facility-code", "施設コード"]),
            room_code: field(&["室場_data-object-code", "室場コード"]),
            use_date: field(&["日付_data-use-date"]),
        })
    }
}

/// Normalize scraped rows, dropping rows that are not slots.
pub fn from_rows(rows: &[Row]) -> Vec<SlotRecord> {
    let records: Vec<SlotRecord> = rows.iter().filter_map(SlotRecord::from_row).collect();
    if records.len() < rows.len() {
        debug!(
            rows = rows.len(),
            records = records.len(),
            "Skipped rows without facility or date"
        );
    }
    dedup(records)
}

/// Drop repeated keys, keeping the first occurrence and the original order.
pub fn dedup(records: impl IntoIterator<Item = SlotRecord>) -> Vec<SlotRecord> {
    let mut seen: HashSet<(String, String, String, String)> = HashSet::new();
    records
        .into_iter()
        .filter(|r| {
            seen.insert((
                r.facility_name.clone(),
                r.room_name.clone(),
                r.date.clone(),
                r.time_slot.clone(),
            ))
        })
        .collect()
}

/// Sort by (date, time slot), the order persisted files use.
pub fn sort_for_output(records: &mut [SlotRecord]) {
    records.sort_by(|a, b| (&a.date, &a.time_slot).cmp(&(&b.date, &b.time_slot)));
}

static RESULT_ROWS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("table.facilities tr").expect("valid selector"));
static RESULT_CELLS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("td").expect("valid selector"));
static HIDDEN_INPUTS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("input").expect("valid selector"));

/// Parse the results table the browser workflow lands on.
///
/// Columns 1..=4 hold facility, room, date and time slot; hidden inputs
/// carry the facility/room codes and the machine-readable date.
pub fn parse_results_table(html: &str) -> Vec<SlotRecord> {
    let doc = Html::parse_document(html);
    let records = doc.select(&RESULT_ROWS).filter_map(result_row);
    dedup(records)
}

fn result_row(row: ElementRef<'_>) -> Option<SlotRecord> {
    let cells: Vec<String> = row
        .select(&RESULT_CELLS)
        .map(|td| td.text().collect::<String>().trim().to_string())
        .collect();
    if cells.len() < 5 {
        return None;
    }

    let mut record = SlotRecord::new(&cells[1], &cells[2], &cells[3], &cells[4]);
    for input in row.select(&HIDDEN_INPUTS) {
        let (Some(name), Some(value)) = (input.attr("name"), input.attr("value")) else {
            continue;
        };
        if name.contains("FacilityCode") {
            record.facility_code = Some(value.to_string());
        } else if name.contains("ObjectCode") {
            record.room_code = Some(value.to_string());
        } else if name.contains("UseDate") && !name.contains("Display") {
            record.use_date = Some(value.to_string());
        }
    }
    Some(record)
}
