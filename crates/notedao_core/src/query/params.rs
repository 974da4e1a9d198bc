//! Named query parameters.

use crate::repo::error::{RepoError, RepoResult};
use rusqlite::types::{ToSqlOutput, Value};
use rusqlite::ToSql;
use std::collections::BTreeMap;

/// Per-call mapping from placeholder name (without the leading `:`) to value.
///
/// Binding is by name, so iteration order never affects results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    values: BTreeMap<String, Value>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value, replacing any previous value of the same name.
    /// A leading `:` on `name` is ignored.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.values.insert(placeholder_name(name.into()), value.into())
    }

    /// Builder form of [`ParameterSet::insert`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Adds any `ToSql` value, such as `&str` or a date type.
    pub fn bind(mut self, name: impl Into<String>, value: impl ToSql) -> RepoResult<Self> {
        let value = match value.to_sql()? {
            ToSqlOutput::Borrowed(value) => Value::from(value),
            ToSqlOutput::Owned(value) => value,
            _ => {
                return Err(RepoError::InvalidData(
                    "unsupported parameter value".to_string(),
                ))
            }
        };
        self.values.insert(placeholder_name(name.into()), value);
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Comma-separated names, for log lines that must not carry values.
    pub(crate) fn names(&self) -> String {
        self.values.keys().cloned().collect::<Vec<_>>().join(",")
    }
}

fn placeholder_name(name: String) -> String {
    match name.strip_prefix(':') {
        Some(bare) => bare.to_string(),
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::ParameterSet;
    use rusqlite::types::Value;

    #[test]
    fn bind_accepts_borrowed_text() {
        let params = ParameterSet::new().bind("type", "general").unwrap();
        assert_eq!(
            params.get("type"),
            Some(&Value::Text("general".to_string()))
        );
    }

    #[test]
    fn insert_replaces_previous_value() {
        let mut params = ParameterSet::new().with("n", 1_i64);
        let previous = params.insert("n", 2_i64);
        assert_eq!(previous, Some(Value::Integer(1)));
        assert_eq!(params.len(), 1);
        assert_eq!(params.names(), "n");
    }

    #[test]
    fn leading_colon_is_not_part_of_the_name() {
        let params = ParameterSet::new().with(":type", 1_i64);
        assert!(params.contains("type"));
    }
}
