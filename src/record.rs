use serde::Serialize;

use crate::models::Id;
use crate::repo::{RepoError, RepoResult};

/// Static table descriptor implemented by every row type.
///
/// `COLUMNS` is the full column set of the table; filters are checked against
/// it before any SQL is generated, so a typo'd key surfaces as
/// [`RepoError::UnknownColumn`] instead of a malformed statement.
pub trait Record: Sized + Send + Sync {
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];
    /// Listing order, when the entity defines one (e.g. posts newest-first).
    const ORDER_BY: Option<&'static str> = None;

    fn id(&self) -> Id;
}

/// Creation-shape counterpart of a [`Record`]: which columns an insert writes
/// and the values bound to them. Relationship fields held as full entities
/// collapse to their ids here.
pub trait Insert: Send + Sync {
    type Output: Record;
    const COLUMNS: &'static [&'static str];

    fn values(&self) -> Vec<ColumnValue>;
    /// Reject creation shapes with missing/empty required fields.
    fn validate(&self) -> RepoResult<()>;
}

/// A value bound to one column in a filter or insert.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Int(i64),
    Text(String),
}

impl From<i64> for ColumnValue {
    fn from(v: i64) -> Self {
        ColumnValue::Int(v)
    }
}

impl From<i32> for ColumnValue {
    fn from(v: i32) -> Self {
        ColumnValue::Int(v as i64)
    }
}

impl From<&str> for ColumnValue {
    fn from(v: &str) -> Self {
        ColumnValue::Text(v.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(v: String) -> Self {
        ColumnValue::Text(v)
    }
}

impl ColumnValue {
    /// Equality against a row field in its serde_json form; used by the
    /// in-memory backend so the same filter runs on both stores.
    fn eq_json(&self, v: &serde_json::Value) -> bool {
        match self {
            ColumnValue::Int(i) => v.as_i64() == Some(*i),
            ColumnValue::Text(s) => v.as_str() == Some(s.as_str()),
        }
    }
}

/// Conjunctive equality predicate over an entity's columns.
///
/// ```ignore
/// let user = repo.get_user(Filter::new().eq("username", "alice")).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct Filter {
    clauses: Vec<(&'static str, ColumnValue)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &'static str, value: impl Into<ColumnValue>) -> Self {
        self.clauses.push((column, value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> &[(&'static str, ColumnValue)] {
        &self.clauses
    }

    /// Every filter key must name a column of `T`.
    pub fn validate<T: Record>(&self) -> RepoResult<()> {
        for (column, _) in &self.clauses {
            if !T::COLUMNS.contains(column) {
                return Err(RepoError::UnknownColumn(*column));
            }
        }
        Ok(())
    }

    /// Row predicate for the in-memory backend. Rows serialize with their
    /// column names as field names, so the comparison mirrors the SQL one.
    pub fn matches<T: Record + Serialize>(&self, row: &T) -> bool {
        let fields = match serde_json::to_value(row) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => return false,
        };
        self.clauses
            .iter()
            .all(|(column, value)| fields.get(*column).map_or(false, |v| value.eq_json(v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;

    #[test]
    fn filter_rejects_unknown_column() {
        let filter = Filter::new().eq("usernme", "alice");
        let err = filter.validate::<User>().unwrap_err();
        assert!(matches!(err, RepoError::UnknownColumn("usernme")));
    }

    #[test]
    fn filter_accepts_known_columns() {
        let filter = Filter::new().eq("username", "alice").eq("id", 3i64);
        assert!(filter.validate::<User>().is_ok());
    }

    #[test]
    fn filter_matches_row_fields() {
        let user = User {
            id: 7,
            username: "alice".into(),
            password_hash: "x".into(),
        };
        assert!(Filter::new().eq("id", 7i64).matches(&user));
        assert!(Filter::new().eq("username", "alice").matches(&user));
        assert!(!Filter::new().eq("username", "bob").matches(&user));
        assert!(Filter::new().matches(&user));
    }
}
