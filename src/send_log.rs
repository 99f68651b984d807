//! Append-only CSV log of send attempts.
//!
//! The file is opened, appended and closed for every record, so no handle is
//! held across the send loop. The header is written only when the file is
//! created (or found empty).
use chrono::{Local, NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use crate::model::{SendRecord, SendStatus, TIMESTAMP_FORMAT};

pub const HEADER: [&str; 5] = ["timestamp", "username", "category", "status", "error"];

#[derive(Debug, Error)]
pub enum SendLogError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error in {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

#[derive(Debug)]
pub struct SendLog {
    path: PathBuf,
    last: Option<NaiveDateTime>,
}

impl SendLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last: None,
        }
    }

    /// Create the parent directory and the header row if the log does not exist yet.
    pub fn ensure(&self) -> Result<(), SendLogError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| SendLogError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        self.open_append().map(|_| ())
    }

    /// Stamp and append one attempt. Timestamps never go backwards within
    /// one `SendLog`, even if the wall clock does.
    pub fn record(
        &mut self,
        username: &str,
        category: &str,
        status: SendStatus,
        error: Option<String>,
    ) -> Result<SendRecord, SendLogError> {
        let mut timestamp = Local::now().naive_local();
        if let Some(last) = self.last {
            timestamp = timestamp.max(last);
        }
        let record = SendRecord {
            timestamp,
            username: username.to_string(),
            category: category.to_string(),
            status,
            error,
        };
        self.append(&record)?;
        self.last = Some(timestamp);
        Ok(record)
    }

    pub fn append(&self, record: &SendRecord) -> Result<(), SendLogError> {
        self.ensure()?;
        let file = self.open_append()?;
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        let ts = record.timestamp.format(TIMESTAMP_FORMAT).to_string();
        wtr.write_record([
            ts.as_str(),
            record.username.as_str(),
            record.category.as_str(),
            record.status.as_str(),
            record.error.as_deref().unwrap_or_default(),
        ])
        .map_err(|source| self.csv_err(source))?;
        wtr.flush().map_err(|source| SendLogError::Io {
            path: self.path.clone(),
            source,
        })
    }

    fn open_append(&self) -> Result<fs::File, SendLogError> {
        let io_err = |source| SendLogError::Io {
            path: self.path.clone(),
            source,
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        if file.metadata().map_err(io_err)?.len() == 0 {
            let mut wtr = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(&file);
            wtr.write_record(HEADER).map_err(|source| self.csv_err(source))?;
            wtr.flush().map_err(io_err)?;
        }
        Ok(file)
    }

    fn csv_err(&self, source: csv::Error) -> SendLogError {
        SendLogError::Csv {
            path: self.path.clone(),
            source,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LogRow {
    timestamp: String,
    username: String,
    category: String,
    status: String,
    #[serde(default)]
    error: String,
}

/// Read every well-formed record; malformed lines are skipped with a warning.
/// A missing file reads as empty.
pub fn read_records(path: &Path) -> Result<Vec<SendRecord>, SendLogError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|source| SendLogError::Csv {
            path: path.to_path_buf(),
            source,
        })?;

    let mut records = Vec::new();
    for (idx, row) in rdr.deserialize::<LogRow>().enumerate() {
        let row = match row {
            Ok(r) => r,
            Err(err) => {
                warn!(%err, path = %path.display(), line = idx + 2, "malformed send-log line");
                continue;
            }
        };
        let Ok(timestamp) = NaiveDateTime::parse_from_str(&row.timestamp, TIMESTAMP_FORMAT) else {
            warn!(path = %path.display(), line = idx + 2, value = %row.timestamp, "bad send-log timestamp");
            continue;
        };
        let status = match row.status.trim().to_ascii_lowercase().as_str() {
            "success" => SendStatus::Success,
            "failed" => SendStatus::Failed,
            other => {
                warn!(path = %path.display(), line = idx + 2, status = other, "unknown send-log status");
                continue;
            }
        };
        records.push(SendRecord {
            timestamp,
            username: row.username,
            category: row.category,
            status,
            error: Some(row.error).filter(|e| !e.is_empty()),
        });
    }
    Ok(records)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryStats {
    pub success: usize,
    pub failed: usize,
}

/// Aggregates over the send log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendStats {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub sent_today: usize,
    pub per_category: BTreeMap<String, CategoryStats>,
    pub last_attempt: Option<NaiveDateTime>,
}

impl SendStats {
    /// `sent_today` counts every attempt (any status) stamped on `today`.
    pub fn from_records(records: &[SendRecord], today: NaiveDate) -> Self {
        let mut stats = SendStats::default();
        for r in records {
            stats.total += 1;
            let cat = stats.per_category.entry(r.category.clone()).or_default();
            match r.status {
                SendStatus::Success => {
                    stats.success += 1;
                    cat.success += 1;
                }
                SendStatus::Failed => {
                    stats.failed += 1;
                    cat.failed += 1;
                }
            }
            if r.timestamp.date() == today {
                stats.sent_today += 1;
            }
            stats.last_attempt = stats.last_attempt.max(Some(r.timestamp));
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn header_written_once_and_rows_appended() {
        let td = tempdir().unwrap();
        let path = td.path().join("logs").join("sent_log.csv");
        let mut log = SendLog::new(&path);
        log.ensure().unwrap();
        log.record("ana", "fashion", SendStatus::Success, None).unwrap();
        log.record("bob", "fashion", SendStatus::Failed, Some("blocked, try later".into()))
            .unwrap();

        // A fresh SendLog on the same file must not repeat the header.
        let mut again = SendLog::new(&path);
        again.record("cy", "cosmetics", SendStatus::Success, None).unwrap();

        let body = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = body.lines().collect();
        assert_eq!(lines[0], "timestamp,username,category,status,error");
        assert_eq!(lines.len(), 4);
        assert!(lines[2].ends_with(",bob,fashion,failed,\"blocked, try later\""));

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[1].error.as_deref(), Some("blocked, try later"));
        assert_eq!(records[0].error, None);
    }

    #[test]
    fn stats_aggregate_by_status_category_and_day() {
        let ts = |s: &str| NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT).unwrap();
        let rec = |t: &str, cat: &str, status| SendRecord {
            timestamp: ts(t),
            username: "u".into(),
            category: cat.into(),
            status,
            error: None,
        };
        let records = vec![
            rec("2026-10-17 10:00:00", "fashion", SendStatus::Success),
            rec("2026-10-18 09:00:00", "fashion", SendStatus::Failed),
            rec("2026-10-18 09:05:00", "cosmetics", SendStatus::Success),
        ];
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let stats = SendStats::from_records(&records, today);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.success, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.sent_today, 2);
        assert_eq!(
            stats.per_category["fashion"],
            CategoryStats {
                success: 1,
                failed: 1
            }
        );
        assert_eq!(stats.last_attempt, Some(ts("2026-10-18 09:05:00")));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let td = tempdir().unwrap();
        let path = td.path().join("sent_log.csv");
        fs::write(
            &path,
            "timestamp,username,category,status,error\n\
             2026-10-18 09:00:00,ana,fashion,success,\n\
             yesterday,bob,fashion,success,\n\
             2026-10-18 09:01:00,cy,fashion,maybe,\n",
        )
        .unwrap();
        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].username, "ana");
    }

    #[test]
    fn missing_log_reads_empty() {
        let td = tempdir().unwrap();
        assert!(read_records(&td.path().join("nope.csv")).unwrap().is_empty());
    }
}
