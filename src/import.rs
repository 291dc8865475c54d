//! CSV import of capture items into the store.
//!
//! Rows are `imageUrl,caption[,title[,category]]`. A leading header row is
//! recognised by an `imageurl` or `caption` cell and skipped.

use std::io::Read;
use thiserror::Error;
use tracing::{debug, info};

use crate::model::CaptureItem;
use crate::store::CaptureStore;

pub const DEFAULT_CSV_CATEGORY: &str = "CSV Import";

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("CSV file is empty or has no usable rows")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvRow {
    pub image_url: String,
    pub caption: String,
    pub title: String,
    pub category: String,
}

impl CsvRow {
    fn from_record(record: &csv::StringRecord) -> Option<Self> {
        if record.len() < 2 {
            return None;
        }
        let cell = |i: usize| {
            record
                .get(i)
                .map(|c| c.trim_matches(|ch: char| ch == '"' || ch == '\'').trim())
                .filter(|c| !c.is_empty())
        };
        let caption = cell(1).unwrap_or_default().to_string();
        Some(Self {
            image_url: cell(0).unwrap_or_default().to_string(),
            title: cell(2).map(str::to_string).unwrap_or_else(|| caption.clone()),
            category: cell(3).unwrap_or(DEFAULT_CSV_CATEGORY).to_string(),
            caption,
        })
    }

    /// Rows without an image or caption are not importable.
    pub fn is_importable(&self) -> bool {
        !self.image_url.is_empty() && !self.caption.is_empty()
    }

    pub fn into_item(self, timestamp: i64) -> CaptureItem {
        CaptureItem {
            image_url: Some(self.image_url),
            caption: self.caption,
            category: self.category,
            timestamp,
            title: Some(self.title),
            ..Default::default()
        }
    }
}

fn is_header(record: &csv::StringRecord) -> bool {
    record.iter().any(|cell| {
        let cell = cell.to_ascii_lowercase();
        cell.contains("imageurl") || cell.contains("caption")
    })
}

/// Parse every row with at least two columns.
pub fn parse_csv<R: Read>(input: R) -> Result<Vec<CsvRow>, ImportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        if line == 0 && is_header(&record) {
            debug!("skipping CSV header");
            continue;
        }
        if record.iter().all(str::is_empty) {
            continue;
        }
        if let Some(row) = CsvRow::from_record(&record) {
            rows.push(row);
        }
    }
    Ok(rows)
}

/// Append importable rows to their categories. Returns the number imported.
pub fn import_rows(store: &mut CaptureStore, rows: Vec<CsvRow>, timestamp: i64) -> usize {
    let mut imported = 0;
    for row in rows.into_iter().filter(CsvRow::is_importable) {
        let category = row.category.clone();
        store.push(&category, row.into_item(timestamp));
        imported += 1;
    }
    info!(imported, "CSV rows imported");
    imported
}

/// Parse `input` and import it; an input with nothing to import is an error.
pub fn import_csv<R: Read>(
    store: &mut CaptureStore,
    input: R,
    timestamp: i64,
) -> Result<usize, ImportError> {
    let rows = parse_csv(input)?;
    if rows.is_empty() {
        return Err(ImportError::Empty);
    }
    Ok(import_rows(store, rows, timestamp))
}
