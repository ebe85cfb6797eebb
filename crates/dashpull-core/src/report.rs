//! Report definitions and the per-run snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// File extension that marks a direct CSV download.
const RAW_CSV_EXTENSION: &str = ".csv";

/// One downloadable dataset: a name, a URL and an optional JSON request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDefinition {
    /// Unique name, also the output file stem.
    pub name: String,
    /// Absolute URL, or a path relative to the dashboard origin.
    pub source: String,
    /// JSON body posted to `source`. Ignored for raw CSV sources.
    pub payload: Option<Value>,
}

impl ReportDefinition {
    /// Create a new definition.
    pub fn new(name: impl Into<String>, source: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            payload,
        }
    }

    /// Resolve the source against `base_url` when it is not already absolute.
    pub fn resolve_url(&self, base_url: &str) -> String {
        if self.source.starts_with("http://") || self.source.starts_with("https://") {
            self.source.clone()
        } else {
            format!("{}{}", base_url.trim_end_matches('/'), self.source)
        }
    }

    /// Returns true if the source points straight at a CSV file.
    ///
    /// Query strings and fragments are ignored; the check is case-insensitive.
    pub fn is_raw_csv(&self) -> bool {
        let path = self
            .source
            .split(['?', '#'])
            .next()
            .unwrap_or_default();
        path.to_ascii_lowercase().ends_with(RAW_CSV_EXTENSION)
    }
}

/// On-disk shape of one entry in the definitions store.
#[derive(Debug, Deserialize)]
struct StoredReport {
    request_url: String,
    #[serde(default)]
    payload: Value,
}

/// Immutable snapshot of the report definitions taken at run start.
///
/// Ordered by name so log output and dispatch order are stable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportSet {
    reports: BTreeMap<String, ReportDefinition>,
}

impl ReportSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the definitions store format: `{name: {request_url, payload}}`.
    pub fn from_store_json(raw: &str) -> Result<Self, CoreError> {
        let entries: BTreeMap<String, StoredReport> = serde_json::from_str(raw)?;
        let mut set = Self::new();
        for (name, entry) in entries {
            if entry.request_url.trim().is_empty() {
                return Err(CoreError::InvalidDefinition {
                    name,
                    reason: "request_url is empty".to_string(),
                });
            }
            let payload = match entry.payload {
                Value::Null => None,
                other => Some(other),
            };
            set.insert(ReportDefinition::new(name, entry.request_url, payload));
        }
        Ok(set)
    }

    /// Insert or replace a definition by name.
    pub fn insert(&mut self, report: ReportDefinition) {
        self.reports.insert(report.name.clone(), report);
    }

    /// Look up a definition by name.
    pub fn get(&self, name: &str) -> Option<&ReportDefinition> {
        self.reports.get(name)
    }

    /// Number of definitions.
    pub fn len(&self) -> usize {
        self.reports.len()
    }

    /// Returns true if there is nothing to extract.
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Iterate definitions in name order.
    pub fn iter(&self) -> impl Iterator<Item = &ReportDefinition> {
        self.reports.values()
    }
}

impl FromIterator<ReportDefinition> for ReportSet {
    fn from_iter<I: IntoIterator<Item = ReportDefinition>>(iter: I) -> Self {
        let mut set = Self::new();
        for report in iter {
            set.insert(report);
        }
        set
    }
}

impl IntoIterator for ReportSet {
    type Item = ReportDefinition;
    type IntoIter = std::collections::btree_map::IntoValues<String, ReportDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.reports.into_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_relative_url() {
        let report = ReportDefinition::new("sales", "/api/v1/chart/data", None);
        assert_eq!(
            report.resolve_url("https://dash.example.com/"),
            "https://dash.example.com/api/v1/chart/data"
        );
    }

    #[test]
    fn test_resolve_absolute_url_untouched() {
        let report = ReportDefinition::new("sales", "https://other.example.com/x", None);
        assert_eq!(
            report.resolve_url("https://dash.example.com"),
            "https://other.example.com/x"
        );
    }

    #[test]
    fn test_is_raw_csv() {
        assert!(ReportDefinition::new("a", "/files/export.csv", None).is_raw_csv());
        assert!(ReportDefinition::new("a", "https://x/Export.CSV?token=1", None).is_raw_csv());
        assert!(!ReportDefinition::new("a", "/api/v1/chart/data", None).is_raw_csv());
        assert!(!ReportDefinition::new("a", "/api/csv/data", None).is_raw_csv());
    }

    #[test]
    fn test_from_store_json() {
        let raw = r#"{
            "sales": {"request_url": "/api/v1/chart/data", "payload": {"form_data": {"x": 1}}},
            "stock": {"request_url": "https://x/stock.csv", "payload": null}
        }"#;
        let set = ReportSet::from_store_json(raw).unwrap();

        assert_eq!(set.len(), 2);
        let sales = set.get("sales").unwrap();
        assert_eq!(sales.payload, Some(json!({"form_data": {"x": 1}})));
        let stock = set.get("stock").unwrap();
        assert_eq!(stock.payload, None);
        assert!(stock.is_raw_csv());
    }

    #[test]
    fn test_from_store_json_rejects_empty_url() {
        let raw = r#"{"broken": {"request_url": "  ", "payload": {}}}"#;
        let err = ReportSet::from_store_json(raw).unwrap_err();
        assert!(matches!(err, CoreError::InvalidDefinition { .. }));
    }

    #[test]
    fn test_iteration_is_name_ordered() {
        let set: ReportSet = ["b", "c", "a"]
            .into_iter()
            .map(|n| ReportDefinition::new(n, "/x", None))
            .collect();
        let names: Vec<_> = set.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
