use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;

/// Maps agency-assigned route and stop numbers to the ids used in the
/// generated GTFS feed.
///
/// Stored as the `tables.json` exported alongside the static feed, keyed by
/// `<YYYY-MM-DD>-<original id>` because the generator may assign a
/// different GTFS id to the same original id on different days:
/// ```json
/// {
///   "routes": { "2017-12-17-3": "3_0" },
///   "stops":  { "2017-12-17-2002": "2002" }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdTables {
    #[serde(default)]
    routes: HashMap<String, String>,
    #[serde(default)]
    stops: HashMap<String, String>,
}

impl IdTables {
    /// Loads the tables from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("reading tables from {path}"))?;
        Self::from_json(&content).with_context(|| format!("parsing {path}"))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// GTFS `route_id` for an original route number on `date`.
    pub fn route_id(&self, date: &str, original_route_id: u32) -> Option<&str> {
        self.routes
            .get(&format!("{date}-{original_route_id}"))
            .map(String::as_str)
    }

    /// GTFS `stop_id` for an original stop number on `date`.
    pub fn stop_id(&self, date: &str, original_stop_id: u32) -> Option<&str> {
        self.stops
            .get(&format!("{date}-{original_stop_id}"))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.stops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "routes": {"2017-12-17-3": "3_0", "2017-12-18-3": "3_1"},
        "stops": {"2017-12-17-2002": "2002_1"}
    }"#;

    #[test]
    fn test_lookup_is_per_day() {
        let tables = IdTables::from_json(SAMPLE).unwrap();
        assert_eq!(tables.route_id("2017-12-17", 3), Some("3_0"));
        assert_eq!(tables.route_id("2017-12-18", 3), Some("3_1"));
        assert_eq!(tables.route_id("2017-12-19", 3), None);
        assert_eq!(tables.stop_id("2017-12-17", 2002), Some("2002_1"));
        assert_eq!(tables.stop_id("2017-12-17", 2003), None);
    }

    #[test]
    fn test_missing_sections_default_to_empty() {
        let tables = IdTables::from_json("{}").unwrap();
        assert!(tables.is_empty());
    }

    #[test]
    fn test_load_missing_file_errors() {
        let err = IdTables::load("/nonexistent/tables.json").unwrap_err();
        assert!(err.to_string().contains("reading tables"));
    }
}
