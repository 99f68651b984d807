use csv::StringRecord;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

use super::{read_table, write_table, CategorySource, Table, WorklistError};
use crate::model::{
    UserStatus, COL_CATEGORY, COL_FOLLOWERS_COUNT, COL_FOLLOWER_COUNT, COL_STATUS, COL_USERNAME,
};

/// Outcome of merging category exports into one worklist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub rows: usize,
    pub per_category: BTreeMap<String, usize>,
    pub skipped_sources: Vec<PathBuf>,
    pub skipped_rows: usize,
}

#[derive(Debug)]
struct SourceRow {
    username: String,
    category: String,
    follower_count: u64,
}

/// Merge every category export into the worklist at `output`.
///
/// Each row is tagged with its category and `pending`, then all rows are
/// sorted by follower count, largest first. A source that cannot be read is
/// skipped with a warning; the build only fails when nothing could be read.
#[instrument(skip_all, fields(output = %output.display()))]
pub fn build_worklist(
    sources: &[CategorySource],
    output: &Path,
) -> Result<BuildSummary, WorklistError> {
    let mut summary = BuildSummary::default();
    let mut all_rows: Vec<SourceRow> = Vec::new();
    let mut processed = 0usize;

    for source in sources {
        match read_source(source) {
            Ok((rows, skipped)) => {
                info!(
                    category = %source.name,
                    path = %source.path.display(),
                    users = rows.len(),
                    skipped,
                    "processed category file"
                );
                processed += 1;
                summary.skipped_rows += skipped;
                *summary.per_category.entry(source.name.clone()).or_default() += rows.len();
                all_rows.extend(rows);
            }
            Err(err) => {
                warn!(
                    %err,
                    category = %source.name,
                    path = %source.path.display(),
                    "skipping category file"
                );
                summary.skipped_sources.push(source.path.clone());
            }
        }
    }

    if processed == 0 {
        return Err(WorklistError::NoSources);
    }

    // Stable: ties keep source order.
    all_rows.sort_by(|a, b| b.follower_count.cmp(&a.follower_count));

    let table = Table {
        headers: StringRecord::from(vec![
            COL_USERNAME,
            COL_CATEGORY,
            COL_STATUS,
            COL_FOLLOWER_COUNT,
        ]),
        rows: all_rows
            .iter()
            .map(|row| {
                let count = row.follower_count.to_string();
                StringRecord::from(vec![
                    row.username.as_str(),
                    row.category.as_str(),
                    UserStatus::Pending.as_str(),
                    count.as_str(),
                ])
            })
            .collect(),
    };
    write_table(output, &table)?;

    summary.rows = table.rows.len();
    info!(rows = summary.rows, "worklist written");
    Ok(summary)
}

/// Read one export, returning its usable rows and the number of rows skipped.
fn read_source(source: &CategorySource) -> Result<(Vec<SourceRow>, usize), WorklistError> {
    let table = read_table(&source.path)?;
    let username_col = table.column(COL_USERNAME);
    let count_col = table.column_any(&[COL_FOLLOWERS_COUNT, COL_FOLLOWER_COUNT]);
    let (username_col, count_col) = match (username_col, count_col) {
        (Some(u), Some(c)) => (u, c),
        (u, _) => {
            let mut missing = Vec::new();
            if u.is_none() {
                missing.push(COL_USERNAME);
            }
            if count_col.is_none() {
                missing.push(COL_FOLLOWERS_COUNT);
            }
            return Err(WorklistError::MissingColumns {
                path: source.path.clone(),
                columns: missing.join(", "),
            });
        }
    };

    let mut rows = Vec::with_capacity(table.rows.len());
    let mut skipped = 0usize;
    for (idx, record) in table.rows.iter().enumerate() {
        let username = record.get(username_col).map(str::trim).unwrap_or_default();
        if username.is_empty() {
            warn!(path = %source.path.display(), row = idx + 1, "row without username; skipping");
            skipped += 1;
            continue;
        }
        let raw_count = record.get(count_col).unwrap_or_default();
        let Some(follower_count) = parse_follower_count(raw_count) else {
            warn!(
                path = %source.path.display(),
                row = idx + 1,
                username,
                value = raw_count,
                "invalid follower count; skipping"
            );
            skipped += 1;
            continue;
        };
        rows.push(SourceRow {
            username: username.to_string(),
            category: source.name.clone(),
            follower_count,
        });
    }
    Ok((rows, skipped))
}

/// Empty cells count as zero; exports sometimes carry counts as floats (`1520.0`).
pub(crate) fn parse_follower_count(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(0);
    }
    if let Ok(n) = raw.parse::<u64>() {
        return Some(n);
    }
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() && f >= 0.0 => Some(f as u64),
        _ => None,
    }
}

/// Write `usernames_<file>` next to every CSV export in `dir`, keeping only
/// the `username` column. Returns the files written.
pub fn extract_usernames(dir: &Path) -> Result<Vec<PathBuf>, WorklistError> {
    let io_err = |source| WorklistError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut inputs: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(io_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)?
        .into_iter()
        .map(|entry| entry.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "csv"))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| !n.starts_with("usernames_"))
        })
        .collect();
    inputs.sort();

    let mut written = Vec::new();
    for input in inputs {
        let table = match read_table(&input) {
            Ok(t) => t,
            Err(err) => {
                warn!(%err, path = %input.display(), "failed to read export; skipping");
                continue;
            }
        };
        let Some(col) = table.column(COL_USERNAME) else {
            warn!(path = %input.display(), "no username column; skipping");
            continue;
        };
        let usernames = Table {
            headers: StringRecord::from(vec![COL_USERNAME]),
            rows: table
                .rows
                .iter()
                .map(|r| StringRecord::from(vec![r.get(col).unwrap_or_default()]))
                .collect(),
        };
        let Some(name) = input.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let out = input.with_file_name(format!("usernames_{}", name));
        write_table(&out, &usernames)?;
        info!(from = %input.display(), to = %out.display(), "extracted usernames");
        written.push(out);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn follower_count_parsing() {
        assert_eq!(parse_follower_count("42"), Some(42));
        assert_eq!(parse_follower_count(" 1520.0 "), Some(1520));
        assert_eq!(parse_follower_count(""), Some(0));
        assert_eq!(parse_follower_count("-3"), None);
        assert_eq!(parse_follower_count("lots"), None);
    }

    #[test]
    fn source_missing_count_column_is_rejected() {
        let td = tempdir().unwrap();
        let path = td.path().join("a.csv");
        fs::write(&path, "username,fullName\nana,Ana\n").unwrap();
        let err = read_source(&CategorySource::new("fashion", &path)).unwrap_err();
        match err {
            WorklistError::MissingColumns { columns, .. } => {
                assert_eq!(columns, "followersCount")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bad_rows_are_skipped_not_fatal() {
        let td = tempdir().unwrap();
        let path = td.path().join("a.csv");
        fs::write(&path, "username,followersCount\nana,10\n,5\nbob,many\ncy,\n").unwrap();
        let (rows, skipped) = read_source(&CategorySource::new("fashion", &path)).unwrap();
        assert_eq!(skipped, 2);
        let names: Vec<_> = rows.iter().map(|r| r.username.as_str()).collect();
        assert_eq!(names, vec!["ana", "cy"]);
        assert_eq!(rows[1].follower_count, 0);
    }

    #[test]
    fn extract_usernames_writes_single_column_copies() {
        let td = tempdir().unwrap();
        fs::write(
            td.path().join("fashion.csv"),
            "id,username,followersCount\n1,ana,10\n2,bob,20\n",
        )
        .unwrap();
        fs::write(td.path().join("notes.txt"), "ignore me").unwrap();
        fs::write(td.path().join("usernames_old.csv"), "username\nzed\n").unwrap();

        let written = extract_usernames(td.path()).unwrap();
        assert_eq!(written, vec![td.path().join("usernames_fashion.csv")]);
        let body = fs::read_to_string(&written[0]).unwrap();
        assert_eq!(body, "username\nana\nbob\n");
    }
}
