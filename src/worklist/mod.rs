//! Worklist storage: CSV tables of users to message.
//!
//! This module is split into two submodules:
//! - `builder`: merges category exports into one combined worklist.
//! - `loader`: reads pending users back and persists status changes.
//!
//! Both share the raw table helpers below, which keep unknown columns intact
//! so a status rewrite never drops data.

use csv::StringRecord;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod builder;
pub mod loader;

pub use builder::{build_worklist, extract_usernames, BuildSummary};
pub use loader::{load_pending, status_counts, update_row_status, update_status};

#[derive(Debug, Error)]
pub enum WorklistError {
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
    #[error("{} is missing required columns: {columns}", .path.display())]
    MissingColumns { path: PathBuf, columns: String },
    #[error("no category source could be processed")]
    NoSources,
    #[error("user not found: {0}")]
    UserNotFound(String),
}

/// A category name and the scraper export that lists its users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CategorySource {
    pub name: String,
    pub path: PathBuf,
}

impl CategorySource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Parse `name=path` as given on the command line.
impl std::str::FromStr for CategorySource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((name, path)) if !name.trim().is_empty() && !path.trim().is_empty() => {
                Ok(CategorySource::new(name.trim(), path.trim()))
            }
            _ => Err(format!("expected NAME=PATH, got '{}'", s)),
        }
    }
}

/// A CSV file held in memory as raw string records.
#[derive(Debug, Clone)]
pub(crate) struct Table {
    pub headers: StringRecord,
    pub rows: Vec<StringRecord>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// First column matching any of `names`, in preference order.
    pub fn column_any(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|n| self.column(n))
    }

    /// Names from `required` that are absent from the header row.
    pub fn missing_columns(&self, required: &[&str]) -> Vec<String> {
        required
            .iter()
            .filter(|name| self.column(name).is_none())
            .map(|name| name.to_string())
            .collect()
    }
}

pub(crate) fn read_table(path: &Path) -> Result<Table, WorklistError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_path(path)
        .map_err(|source| WorklistError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
    let headers = rdr
        .headers()
        .map_err(|source| WorklistError::Csv {
            path: path.to_path_buf(),
            source,
        })?
        .clone();
    let rows = rdr
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| WorklistError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(Table { headers, rows })
}

/// Write `table` to a sibling temp file, then rename it over `path`.
pub(crate) fn write_table(path: &Path, table: &Table) -> Result<(), WorklistError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| WorklistError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    let tmp = tmp_path(path);
    let csv_err = |source| WorklistError::Csv {
        path: tmp.clone(),
        source,
    };
    let mut wtr = csv::WriterBuilder::new()
        .flexible(true)
        .from_path(&tmp)
        .map_err(csv_err)?;
    wtr.write_record(&table.headers).map_err(csv_err)?;
    for row in &table.rows {
        wtr.write_record(row).map_err(csv_err)?;
    }
    wtr.flush().map_err(|source| WorklistError::Io {
        path: tmp.clone(),
        source,
    })?;
    drop(wtr);

    fs::rename(&tmp, path).map_err(|source| WorklistError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
