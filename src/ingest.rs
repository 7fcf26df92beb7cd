//! Deal CSV ingest.
//!
//! Header names are matched loosely (`Deal Name`, `dealName` and `deal_name`
//! are the same column). Dates that do not parse become `None` and so are
//! never considered stale.

use std::io::Read;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::types::Deal;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("missing required column '{0}'")]
    MissingColumn(&'static str),

    #[error("unreadable CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("no file uploaded (expected multipart field 'file')")]
    MissingFile,
}

/// Summary returned to the uploader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub imported: usize,
    pub skipped: usize,
}

/// Parsed upload, ready to replace the stored collection.
#[derive(Debug, Clone, Default)]
pub struct ParsedDeals {
    pub deals: Vec<Deal>,
    pub skipped: usize,
}

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const NAIVE_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Parse an activity timestamp. Naive values are taken as UTC.
pub fn parse_activity_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }

    for fmt in NAIVE_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }

    None
}

/// Lowercase and strip everything but letters and digits.
fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

struct ColumnMap {
    record_id: Option<usize>,
    deal_name: usize,
    deal_owner: usize,
    second_owner: Option<usize>,
    last_activity_date: Option<usize>,
    deal_stage: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, IngestError> {
        let normalized: Vec<String> = headers.iter().map(normalize_header).collect();
        let find = |name: &str| normalized.iter().position(|h| h == name);

        Ok(Self {
            record_id: find("recordid"),
            deal_name: find("dealname").ok_or(IngestError::MissingColumn("Deal Name"))?,
            deal_owner: find("dealowner").ok_or(IngestError::MissingColumn("Deal Owner"))?,
            second_owner: find("secondowner"),
            last_activity_date: find("lastactivitydate"),
            deal_stage: find("dealstage"),
        })
    }
}

fn field(record: &csv::StringRecord, index: Option<usize>) -> String {
    index
        .and_then(|i| record.get(i))
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}

/// Parse a deals CSV (header row required).
///
/// Rows without a deal name are skipped and counted. Short rows are accepted;
/// missing trailing fields read as empty.
pub fn parse_deals_csv<R: Read>(reader: R) -> Result<ParsedDeals, IngestError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let columns = ColumnMap::from_headers(csv_reader.headers()?)?;
    let mut parsed = ParsedDeals::default();

    for record in csv_reader.records() {
        let record = record?;
        let deal_name = field(&record, Some(columns.deal_name));
        if deal_name.is_empty() {
            parsed.skipped += 1;
            continue;
        }

        let second_owner = field(&record, columns.second_owner);
        parsed.deals.push(Deal {
            record_id: field(&record, columns.record_id),
            deal_name,
            deal_owner: field(&record, Some(columns.deal_owner)),
            second_owner: (!second_owner.is_empty()).then_some(second_owner),
            last_activity_date: parse_activity_date(&field(&record, columns.last_activity_date)),
            deal_stage: field(&record, columns.deal_stage),
        });
    }

    Ok(parsed)
}
