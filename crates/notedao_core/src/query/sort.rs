//! Allow-listed ordering for named queries.

use crate::model::entity::EntitySchema;
use crate::repo::error::{RepoError, RepoResult};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub const fn sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = RepoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(Self::Ascending),
            "desc" | "descending" => Ok(Self::Descending),
            _ => Err(RepoError::InvalidSortOrder(value.to_string())),
        }
    }
}

/// Property name plus direction. The property is checked against the
/// entity's mapped fields before any SQL is composed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub order: SortOrder,
}

impl SortSpec {
    pub fn new(field: impl Into<String>, order: SortOrder) -> Self {
        Self {
            field: field.into(),
            order,
        }
    }

    pub fn ascending(field: impl Into<String>) -> Self {
        Self::new(field, SortOrder::Ascending)
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self::new(field, SortOrder::Descending)
    }

    /// Parses caller-supplied text. Returns `None` when either part is blank.
    pub fn parse(field: &str, order: &str) -> RepoResult<Option<Self>> {
        if field.trim().is_empty() || order.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(Self::new(field.trim(), order.parse()?)))
    }

    /// Renders `ORDER BY` against `alias` once the field is allow-listed.
    pub(crate) fn order_by_sql(&self, schema: &EntitySchema, alias: &str) -> RepoResult<String> {
        let field = schema
            .field(&self.field)
            .ok_or_else(|| RepoError::UnknownField {
                entity: schema.name,
                field: self.field.clone(),
            })?;
        Ok(format!(
            " ORDER BY {}.{} {}",
            quote_ident(alias),
            quote_ident(field.column),
            self.order.sql()
        ))
    }
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::{SortOrder, SortSpec};
    use crate::model::note::NOTE_SCHEMA;
    use crate::repo::error::RepoError;

    #[test]
    fn parse_skips_blank_inputs() {
        assert_eq!(SortSpec::parse("", "asc").unwrap(), None);
        assert_eq!(SortSpec::parse("content", "  ").unwrap(), None);
    }

    #[test]
    fn parse_accepts_case_insensitive_direction() {
        let spec = SortSpec::parse("content", "DESC").unwrap().unwrap();
        assert_eq!(spec.order, SortOrder::Descending);
    }

    #[test]
    fn parse_rejects_injected_direction() {
        let err = SortSpec::parse("content", "asc; DROP TABLE note").unwrap_err();
        assert!(matches!(err, RepoError::InvalidSortOrder(_)));
    }

    #[test]
    fn order_by_rejects_unmapped_field() {
        let err = SortSpec::ascending("content; --")
            .order_by_sql(&NOTE_SCHEMA, "q")
            .unwrap_err();
        assert!(matches!(err, RepoError::UnknownField { .. }));
    }

    #[test]
    fn order_by_uses_mapped_column() {
        let sql = SortSpec::descending("type")
            .order_by_sql(&NOTE_SCHEMA, "q")
            .unwrap();
        assert_eq!(sql, " ORDER BY \"q\".\"type\" DESC");
    }
}
