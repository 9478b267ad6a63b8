use camino::Utf8Path;
use chrono::{DateTime, Utc};
use csv::{QuoteStyle, WriterBuilder};
use std::sync::Mutex;
use tracing::info;

const CSV_HEADER: &str =
    "date,uri,in_sync,incremental,audit,same,created,updated,deleted,to_delete,exception,origin";

/// One per-list sync outcome. Immutable once appended to the reporter.
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub at: DateTime<Utc>,
    pub uri: String,
    pub in_sync: Option<bool>,
    pub incremental: bool,
    pub audit: bool,
    pub same: Option<u64>,
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    pub to_delete: u64,
    pub exception: Option<String>,
    pub origin: String,
}

impl SyncStatus {
    pub fn new(uri: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            uri: uri.into(),
            in_sync: None,
            incremental: false,
            audit: false,
            same: None,
            created: 0,
            updated: 0,
            deleted: 0,
            to_delete: 0,
            exception: None,
            origin: origin.into(),
        }
    }
}

/// In-memory cycle log of per-source outcomes, appended from worker branches
/// and serialized once per cycle.
pub struct Reporter {
    rows: Mutex<Vec<SyncStatus>>,
}

impl Reporter {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
        }
    }

    pub fn log(&self, row: SyncStatus) {
        if let Ok(mut rows) = self.rows.lock() {
            rows.push(row);
        }
    }

    pub fn log_exception(&self, uri: &str, origin: &str, exception: &str) {
        let mut row = SyncStatus::new(uri, origin);
        row.exception = Some(exception.to_string());
        self.log(row);
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<SyncStatus> {
        self.rows.lock().map(|rows| rows.clone()).unwrap_or_default()
    }

    /// Render the cycle as CSV: bare header line, then one fully-quoted
    /// record per row with absent values as the literal `None`.
    pub fn to_csv(&self) -> String {
        let mut writer = WriterBuilder::new()
            .quote_style(QuoteStyle::Always)
            .from_writer(Vec::new());
        for row in self.snapshot() {
            // A serialization failure here would mean an unwritable Vec;
            // ignore and keep the remaining rows.
            let _ = writer.write_record([
                row.at.format("%Y-%m-%d %H:%M:%S").to_string(),
                row.uri.clone(),
                fmt_opt_bool(row.in_sync),
                fmt_bool(row.incremental),
                fmt_bool(row.audit),
                fmt_opt_count(row.same),
                row.created.to_string(),
                row.updated.to_string(),
                row.deleted.to_string(),
                row.to_delete.to_string(),
                row.exception.clone().unwrap_or_else(|| "None".to_string()),
                row.origin.clone(),
            ]);
        }
        let body = writer
            .into_inner()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default();
        format!("{CSV_HEADER}\n{body}")
    }

    pub fn write_to(&self, path: &Utf8Path) -> std::io::Result<()> {
        let count = self.len();
        std::fs::write(path, self.to_csv())?;
        info!(%path, rows = count, "wrote sync status report");
        Ok(())
    }

    pub fn reset(&self) {
        if let Ok(mut rows) = self.rows.lock() {
            rows.clear();
        }
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

fn fmt_bool(value: bool) -> String {
    if value { "True" } else { "False" }.to_string()
}

fn fmt_opt_bool(value: Option<bool>) -> String {
    match value {
        Some(b) => fmt_bool(b),
        None => "None".to_string(),
    }
}

fn fmt_opt_count(value: Option<u64>) -> String {
    match value {
        Some(n) => n.to_string(),
        None => "None".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_has_header_and_quoted_fields() {
        let reporter = Reporter::new();
        let mut row = SyncStatus::new("http://s/rs/resourcelist.xml", "sync::baseline");
        row.in_sync = Some(false);
        row.audit = true;
        row.same = Some(0);
        row.created = 2;
        reporter.log(row);

        let csv = reporter.to_csv();
        let mut lines = csv.lines();
        assert_eq!(lines.next().unwrap(), CSV_HEADER);
        let record = lines.next().unwrap();
        assert!(record.contains("\"http://s/rs/resourcelist.xml\""));
        assert!(record.contains("\"False\""));
        assert!(record.contains("\"True\""));
        assert!(record.contains("\"0\""));
        assert!(record.contains("\"2\""));
        assert!(record.contains("\"sync::baseline\""));
    }

    #[test]
    fn absent_values_serialize_as_none() {
        let reporter = Reporter::new();
        reporter.log(SyncStatus::new("http://s", "runner"));
        let csv = reporter.to_csv();
        let record = csv.lines().nth(1).unwrap();
        // in_sync, same and exception are all unset.
        assert_eq!(record.matches("\"None\"").count(), 3);
    }

    #[test]
    fn reset_clears_rows() {
        let reporter = Reporter::new();
        reporter.log_exception("http://s", "runner", "boom");
        assert_eq!(reporter.len(), 1);
        reporter.reset();
        assert!(reporter.is_empty());
        assert_eq!(reporter.to_csv().lines().count(), 1);
    }
}
