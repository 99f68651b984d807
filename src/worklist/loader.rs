use csv::StringRecord;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{error, info, warn};

use super::builder::parse_follower_count;
use super::{read_table, write_table, Table, WorklistError};
use crate::model::{
    UserRow, UserStatus, COL_CATEGORY, COL_FOLLOWERS_COUNT, COL_FOLLOWER_COUNT, COL_STATUS,
    COL_USERNAME,
};

const REQUIRED: [&str; 3] = [COL_USERNAME, COL_CATEGORY, COL_STATUS];

/// Load the users still waiting for a message, in worklist order.
///
/// Never fails: a missing file, an unreadable file or absent required
/// columns are logged and yield an empty list.
pub fn load_pending(path: &Path) -> Vec<UserRow> {
    if !path.exists() {
        error!(path = %path.display(), "worklist file not found");
        return Vec::new();
    }
    let table = match read_table(path) {
        Ok(t) => t,
        Err(err) => {
            error!(%err, path = %path.display(), "failed to read worklist");
            return Vec::new();
        }
    };
    let missing = table.missing_columns(&REQUIRED);
    if !missing.is_empty() {
        error!(
            path = %path.display(),
            missing = %missing.join(", "),
            "worklist is missing required columns"
        );
        return Vec::new();
    }

    // Required columns were checked above.
    let username_col = table.column(COL_USERNAME).unwrap_or_default();
    let category_col = table.column(COL_CATEGORY).unwrap_or_default();
    let status_col = table.column(COL_STATUS).unwrap_or_default();
    let count_col = table.column_any(&[COL_FOLLOWER_COUNT, COL_FOLLOWERS_COUNT]);

    let mut users = Vec::new();
    for (idx, record) in table.rows.iter().enumerate() {
        let status = record.get(status_col).unwrap_or_default();
        if !status.trim().eq_ignore_ascii_case(UserStatus::Pending.as_str()) {
            continue;
        }
        let username = record.get(username_col).map(str::trim).unwrap_or_default();
        if username.is_empty() {
            warn!(path = %path.display(), row = idx + 1, "pending row without username; skipping");
            continue;
        }
        let follower_count = count_col
            .and_then(|c| record.get(c))
            .and_then(parse_follower_count)
            .unwrap_or(0);

        let mut extra = BTreeMap::new();
        for (col, header) in table.headers.iter().enumerate() {
            if col == username_col
                || col == category_col
                || col == status_col
                || Some(col) == count_col
            {
                continue;
            }
            if let Some(value) = record.get(col) {
                extra.insert(header.to_string(), value.to_string());
            }
        }

        users.push(UserRow {
            username: username.to_string(),
            category: record.get(category_col).unwrap_or_default().trim().to_string(),
            status: UserStatus::Pending,
            follower_count,
            extra,
        });
    }

    info!(path = %path.display(), users = users.len(), "loaded pending users");
    users
}

/// Set the status of the first row whose username matches and rewrite the table.
pub fn update_status(path: &Path, username: &str, status: UserStatus) -> Result<(), WorklistError> {
    rewrite_status(path, username, status, |_, _| true)
}

/// Set the status of the row `user` was loaded from: the first still-pending
/// row with the same username and category. A username listed under several
/// categories therefore has each of its rows updated separately.
pub fn update_row_status(
    path: &Path,
    user: &UserRow,
    status: UserStatus,
) -> Result<(), WorklistError> {
    rewrite_status(path, &user.username, status, |table, record| {
        let cell = |name: &str| table.column(name).and_then(|c| record.get(c)).map(str::trim);
        cell(COL_CATEGORY) == Some(user.category.as_str())
            && cell(COL_STATUS)
                .is_some_and(|s| s.eq_ignore_ascii_case(UserStatus::Pending.as_str()))
    })
}

fn rewrite_status<F>(
    path: &Path,
    username: &str,
    status: UserStatus,
    matches: F,
) -> Result<(), WorklistError>
where
    F: Fn(&Table, &StringRecord) -> bool,
{
    let mut table = read_table(path)?;
    let (Some(username_col), Some(status_col)) =
        (table.column(COL_USERNAME), table.column(COL_STATUS))
    else {
        return Err(WorklistError::MissingColumns {
            path: path.to_path_buf(),
            columns: table.missing_columns(&[COL_USERNAME, COL_STATUS]).join(", "),
        });
    };

    let Some(idx) = table.rows.iter().position(|r| {
        r.get(username_col).map(str::trim) == Some(username) && matches(&table, r)
    }) else {
        error!(username, path = %path.display(), "user not found in worklist");
        return Err(WorklistError::UserNotFound(username.to_string()));
    };
    let row = &mut table.rows[idx];

    let mut fields: Vec<String> = row.iter().map(str::to_string).collect();
    if fields.len() <= status_col {
        fields.resize(status_col + 1, String::new());
    }
    fields[status_col] = status.as_str().to_string();
    *row = fields.into_iter().collect();

    write_table(path, &table)?;
    info!(username, status = status.as_str(), "updated user status");
    Ok(())
}

/// Row counts per status, keyed by the lowercased stored value.
pub fn status_counts(path: &Path) -> Result<BTreeMap<String, usize>, WorklistError> {
    let table = read_table(path)?;
    let Some(status_col) = table.column(COL_STATUS) else {
        return Err(WorklistError::MissingColumns {
            path: path.to_path_buf(),
            columns: COL_STATUS.to_string(),
        });
    };
    let mut counts = BTreeMap::new();
    for record in &table.rows {
        let status = record
            .get(status_col)
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        *counts.entry(status).or_insert(0) += 1;
    }
    Ok(counts)
}
