//! Writing fetched reports to disk.
//!
//! CSV is the primary format. JSON responses are flattened from their
//! conventional `result[0].data` table; when that shape is not there the
//! whole body is written as `<name>.json` instead. Degrading is a normal
//! outcome, not an error: only filesystem failures fail a report.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use dashpull_core::FetchResult;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::EngineError;

/// Format a report ended up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistFormat {
    /// Direct CSV download written verbatim.
    RawCsv,
    /// JSON table flattened to CSV.
    Csv,
    /// JSON body written as-is.
    Json,
}

/// Where and how a report was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedReport {
    pub path: PathBuf,
    pub format: PersistFormat,
    /// Rows written, for flattened tables.
    pub rows: Option<usize>,
    /// Why the JSON fallback was used.
    pub degraded: Option<Degradation>,
}

impl PersistedReport {
    /// Human-readable summary for logs and outcomes.
    pub fn message(&self) -> String {
        let path = self.path.display();
        match (self.format, &self.degraded) {
            (PersistFormat::RawCsv, _) => format!("saved raw CSV to {path}"),
            (PersistFormat::Csv, _) => {
                format!("saved {} rows as CSV to {path}", self.rows.unwrap_or(0))
            }
            (PersistFormat::Json, Some(reason)) => {
                format!("saved as JSON to {path} ({reason})")
            }
            (PersistFormat::Json, None) => format!("saved as JSON to {path}"),
        }
    }
}

/// Reason a JSON response was not flattened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Degradation {
    /// No non-empty `result` list.
    MissingResultList,
    /// `result[0]` carries no `data` field.
    MissingDataField,
    /// `data` exists but is not a table we can flatten.
    UnsupportedShape(&'static str),
    /// Encoding the table failed.
    Encode(String),
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingResultList => write!(f, "no result list in response"),
            Self::MissingDataField => write!(f, "first result has no data field"),
            Self::UnsupportedShape(shape) => write!(f, "unsupported data shape: {shape}"),
            Self::Encode(e) => write!(f, "CSV encoding failed: {e}"),
        }
    }
}

/// Persist one fetch result under `output_dir`, creating it if needed.
pub async fn persist(
    output_dir: &Path,
    report_name: &str,
    result: FetchResult,
) -> Result<PersistedReport, EngineError> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| EngineError::persist(report_name, e))?;

    let stem = file_stem(report_name);
    let csv_path = output_dir.join(format!("{stem}.csv"));

    let persisted = match result {
        FetchResult::RawCsv { content } => {
            write_file(report_name, &csv_path, content.as_bytes()).await?;
            PersistedReport {
                path: csv_path,
                format: PersistFormat::RawCsv,
                rows: None,
                degraded: None,
            }
        }
        FetchResult::StructuredJson { body } => match tabulate(&body) {
            Ok(table) => {
                write_file(report_name, &csv_path, &table.bytes).await?;
                PersistedReport {
                    path: csv_path,
                    format: PersistFormat::Csv,
                    rows: Some(table.rows),
                    degraded: None,
                }
            }
            Err(reason) => {
                debug!(report = %report_name, reason = %reason, "Falling back to JSON");
                let json_path = output_dir.join(format!("{stem}.json"));
                let bytes = serde_json::to_vec_pretty(&body)
                    .map_err(|e| EngineError::persist(report_name, e))?;
                write_file(report_name, &json_path, &bytes).await?;
                PersistedReport {
                    path: json_path,
                    format: PersistFormat::Json,
                    rows: None,
                    degraded: Some(reason),
                }
            }
        },
    };

    info!(report = %report_name, path = %persisted.path.display(), format = ?persisted.format, "Report saved");
    Ok(persisted)
}

async fn write_file(report_name: &str, path: &Path, bytes: &[u8]) -> Result<(), EngineError> {
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| EngineError::persist(report_name, format!("{}: {e}", path.display())))
}

/// File stem for a report name, safe to join onto the output directory.
pub fn file_stem(report_name: &str) -> String {
    let stem: String = report_name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match stem.as_str() {
        "" | "." | ".." => "_".repeat(stem.len().max(1)),
        _ => stem,
    }
}

/// Groups of report names that resolve to the same file stem, each sorted.
pub fn stem_collisions<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<Vec<String>> {
    let mut by_stem: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for name in names {
        by_stem.entry(file_stem(name)).or_default().push(name.to_string());
    }
    by_stem
        .into_values()
        .filter(|names| names.len() > 1)
        .map(|mut names| {
            names.sort();
            names
        })
        .collect()
}

struct Table {
    bytes: Vec<u8>,
    rows: usize,
}

/// Locate `result[0].data` and render it as CSV.
fn tabulate(body: &Value) -> Result<Table, Degradation> {
    let first = body
        .get("result")
        .and_then(Value::as_array)
        .and_then(|results| results.first())
        .ok_or(Degradation::MissingResultList)?;
    let data = first.get("data").ok_or(Degradation::MissingDataField)?;

    let (header, rows) = match data {
        Value::Array(items) => rows_from_array(items)?,
        Value::Object(columns) => rows_from_columns(columns)?,
        _ => return Err(Degradation::UnsupportedShape("scalar data")),
    };

    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    if !header.is_empty() {
        writer
            .write_record(&header)
            .map_err(|e| Degradation::Encode(e.to_string()))?;
    }
    for row in &rows {
        writer
            .write_record(row)
            .map_err(|e| Degradation::Encode(e.to_string()))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| Degradation::Encode(e.to_string()))?;

    Ok(Table {
        bytes,
        rows: rows.len(),
    })
}

type Rows = (Vec<String>, Vec<Vec<String>>);

fn rows_from_array(items: &[Value]) -> Result<Rows, Degradation> {
    if items.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }

    if items.iter().all(Value::is_object) {
        let mut header: Vec<String> = Vec::new();
        for item in items {
            if let Value::Object(record) = item {
                for key in record.keys() {
                    if !header.contains(key) {
                        header.push(key.clone());
                    }
                }
            }
        }
        let rows = items
            .iter()
            .filter_map(Value::as_object)
            .map(|record| {
                header
                    .iter()
                    .map(|key| record.get(key).map(cell).unwrap_or_default())
                    .collect()
            })
            .collect();
        return Ok((header, rows));
    }

    if items.iter().all(Value::is_array) {
        let width = items
            .iter()
            .filter_map(Value::as_array)
            .map(Vec::len)
            .max()
            .unwrap_or(0);
        let header = (0..width).map(|i| i.to_string()).collect();
        let rows = items
            .iter()
            .filter_map(Value::as_array)
            .map(|row| {
                let mut cells: Vec<String> = row.iter().map(cell).collect();
                cells.resize(width, String::new());
                cells
            })
            .collect();
        return Ok((header, rows));
    }

    if items.iter().all(|v| !v.is_object() && !v.is_array()) {
        let rows = items.iter().map(|v| vec![cell(v)]).collect();
        return Ok((vec!["0".to_string()], rows));
    }

    Err(Degradation::UnsupportedShape("mixed row types"))
}

fn rows_from_columns(columns: &Map<String, Value>) -> Result<Rows, Degradation> {
    let mut arrays = Vec::with_capacity(columns.len());
    for value in columns.values() {
        match value {
            Value::Array(values) => arrays.push(values),
            _ => return Err(Degradation::UnsupportedShape("non-list column")),
        }
    }

    let height = arrays.first().map(|a| a.len()).unwrap_or(0);
    if arrays.iter().any(|a| a.len() != height) {
        return Err(Degradation::UnsupportedShape("columns of unequal length"));
    }

    let header = columns.keys().cloned().collect();
    let rows = (0..height)
        .map(|i| arrays.iter().map(|column| cell(&column[i])).collect())
        .collect();
    Ok((header, rows))
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        nested => nested.to_string(),
    }
}
