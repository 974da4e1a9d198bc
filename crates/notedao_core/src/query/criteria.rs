//! Predicate builder over field paths, for filter screens.

use crate::model::entity::{Entity, EntitySchema};
use crate::query::params::ParameterSet;
use crate::query::path::{FieldPath, PropertyPath, QueryRoot, ROOT_ALIAS};
use crate::query::sort::{quote_ident, SortOrder};
use crate::query::wildcard::add_sql_percent_wildcards;
use crate::repo::error::RepoResult;
use rusqlite::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl Comparison {
    const fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Like => "LIKE",
        }
    }
}

/// Conjunction of predicates on one entity root.
///
/// Paths are resolved through [`QueryRoot`], so predicates can reach across
/// up to three joins. Values are always bound, never inlined.
#[derive(Debug, Clone)]
pub struct CriteriaQuery {
    root: QueryRoot,
    predicates: Vec<String>,
    order: Vec<String>,
    params: ParameterSet,
}

impl CriteriaQuery {
    pub fn new(schema: &'static EntitySchema) -> Self {
        Self {
            root: QueryRoot::new(schema),
            predicates: Vec::new(),
            order: Vec::new(),
            params: ParameterSet::new(),
        }
    }

    pub fn of<T: Entity>() -> Self {
        Self::new(T::schema())
    }

    pub fn root(&self) -> &QueryRoot {
        &self.root
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.params
    }

    /// Adds `path <op> value`. A blank path adds nothing.
    pub fn filter(
        &mut self,
        path: &str,
        comparison: Comparison,
        value: impl Into<Value>,
    ) -> RepoResult<&mut Self> {
        let Some(property) = self.property(path)? else {
            return Ok(self);
        };
        let name = format!("p{}", self.params.len() + 1);
        self.predicates.push(format!(
            "{} {} :{name}",
            property.sql(),
            comparison.sql()
        ));
        self.params.insert(name, value);
        Ok(self)
    }

    /// Case-insensitive substring match; blank text adds nothing.
    pub fn contains(&mut self, path: &str, text: &str) -> RepoResult<&mut Self> {
        if text.trim().is_empty() {
            return Ok(self);
        }
        self.filter(path, Comparison::Like, add_sql_percent_wildcards(text))
    }

    pub fn is_null(&mut self, path: &str) -> RepoResult<&mut Self> {
        if let Some(property) = self.property(path)? {
            self.predicates.push(format!("{} IS NULL", property.sql()));
        }
        Ok(self)
    }

    pub fn order_by(&mut self, path: &str, order: SortOrder) -> RepoResult<&mut Self> {
        if let Some(property) = self.property(path)? {
            self.order
                .push(format!("{} {}", property.sql(), order.sql()));
        }
        Ok(self)
    }

    /// `SELECT DISTINCT root.*` with joins, predicates and ordering.
    pub fn select_sql(&self) -> String {
        let mut sql = format!(
            "SELECT DISTINCT {}.*{}{}",
            quote_ident(ROOT_ALIAS),
            self.root.from_sql(),
            self.where_sql()
        );
        if !self.order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&self.order.join(", "));
        }
        sql
    }

    /// Distinct root identity count under the same predicates.
    pub fn count_sql(&self) -> String {
        format!(
            "SELECT COUNT(DISTINCT {}.{}){}{}",
            quote_ident(ROOT_ALIAS),
            quote_ident(self.root.schema().id.column),
            self.root.from_sql(),
            self.where_sql()
        )
    }

    fn where_sql(&self) -> String {
        if self.predicates.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.predicates.join(" AND "))
        }
    }

    fn property(&mut self, path: &str) -> RepoResult<Option<PropertyPath>> {
        match FieldPath::parse(path)? {
            Some(path) => self.root.resolve(&path).map(Some),
            None => Ok(None),
        }
    }
}
