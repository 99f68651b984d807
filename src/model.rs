use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Worklist column names.
pub const COL_USERNAME: &str = "username";
pub const COL_CATEGORY: &str = "category";
pub const COL_STATUS: &str = "status";
pub const COL_FOLLOWER_COUNT: &str = "followerCount";
/// Column name used by the scraper exports; accepted wherever `followerCount` is.
pub const COL_FOLLOWERS_COUNT: &str = "followersCount";

/// Format of send-log timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Pending,
    Sent,
    Failed,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Pending => "pending",
            UserStatus::Sent => "sent",
            UserStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(UserStatus::Pending),
            "sent" => Ok(UserStatus::Sent),
            "failed" => Ok(UserStatus::Failed),
            other => Err(format!("unknown user status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SendStatus {
    Success,
    Failed,
}

impl SendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendStatus::Success => "success",
            SendStatus::Failed => "failed",
        }
    }

    /// Worklist status a user moves to after an attempt with this outcome.
    pub fn user_status(&self) -> UserStatus {
        match self {
            SendStatus::Success => UserStatus::Sent,
            SendStatus::Failed => UserStatus::Failed,
        }
    }
}

/// One row of the combined worklist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    pub username: String,
    pub category: String,
    pub status: UserStatus,
    pub follower_count: u64,
    /// Any additional worklist columns, available to templates by header name.
    pub extra: BTreeMap<String, String>,
}

impl UserRow {
    pub fn new(username: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            category: category.into(),
            status: UserStatus::Pending,
            follower_count: 0,
            extra: BTreeMap::new(),
        }
    }

    /// Look up a template variable by column name.
    pub fn field(&self, name: &str) -> Option<Cow<'_, str>> {
        match name {
            COL_USERNAME => Some(Cow::Borrowed(self.username.as_str())),
            COL_CATEGORY => Some(Cow::Borrowed(self.category.as_str())),
            COL_STATUS => Some(Cow::Borrowed(self.status.as_str())),
            COL_FOLLOWER_COUNT | COL_FOLLOWERS_COUNT => {
                Some(Cow::Owned(self.follower_count.to_string()))
            }
            other => self.extra.get(other).map(|v| Cow::Borrowed(v.as_str())),
        }
    }
}

/// A message body with `{variable}` placeholders.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Template {
    pub text: String,
    #[serde(default)]
    pub variables: Vec<String>,
}

/// One line of the append-only send log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRecord {
    pub timestamp: NaiveDateTime,
    pub username: String,
    pub category: String,
    pub status: SendStatus,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_status_parses_case_insensitively() {
        assert_eq!("PENDING".parse::<UserStatus>().unwrap(), UserStatus::Pending);
        assert_eq!(" Sent ".parse::<UserStatus>().unwrap(), UserStatus::Sent);
        assert!("queued".parse::<UserStatus>().is_err());
    }

    #[test]
    fn field_lookup_covers_fixed_and_extra_columns() {
        let mut row = UserRow::new("ana", "fashion");
        row.follower_count = 1200;
        row.extra.insert("name".into(), "Ana".into());

        assert_eq!(row.field("username").as_deref(), Some("ana"));
        assert_eq!(row.field("followersCount").as_deref(), Some("1200"));
        assert_eq!(row.field("name").as_deref(), Some("Ana"));
        assert!(row.field("city").is_none());
    }
}
