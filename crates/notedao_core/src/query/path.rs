//! Dotted field paths resolved against the entity join graph.
//!
//! # Responsibility
//! - Parse `a.b.c` paths into relation hops plus a leaf property.
//! - Allocate join aliases on a [`QueryRoot`] and render column references.
//!
//! # Invariants
//! - A path has between 1 and [`MAX_PATH_SEGMENTS`] segments.
//! - The same relation prefix on one root always reuses the same alias.

use crate::model::entity::{Entity, EntitySchema, Relation, RelationKind};
use crate::query::sort::quote_ident;
use crate::repo::error::{RepoError, RepoResult};

/// Root field, or up to three joins followed by a leaf field.
pub const MAX_PATH_SEGMENTS: usize = 4;

pub(crate) const ROOT_ALIAS: &str = "root";

/// Parsed, depth-checked field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Returns `None` for a blank path.
    pub fn parse(path: &str) -> RepoResult<Option<Self>> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let segments: Vec<String> = trimmed.split('.').map(str::to_string).collect();
        if segments.iter().any(|segment| segment.trim().is_empty()) {
            return Err(RepoError::InvalidPath {
                path: path.to_string(),
                reason: "empty segment",
            });
        }
        if segments.len() > MAX_PATH_SEGMENTS {
            return Err(RepoError::PathDepthExceeded {
                path: path.to_string(),
                segments: segments.len(),
                max: MAX_PATH_SEGMENTS,
            });
        }
        Ok(Some(Self { segments }))
    }

    /// Relation names to traverse, in order.
    pub fn relations(&self) -> &[String] {
        &self.segments[..self.segments.len() - 1]
    }

    pub fn leaf(&self) -> &str {
        &self.segments[self.segments.len() - 1]
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }
}

#[derive(Debug, Clone)]
struct Join {
    alias: String,
    /// Alias of the side the relation starts from.
    source_alias: String,
    /// Dotted relation prefix this join resolves, e.g. `notebook.parent`.
    prefix: String,
    source: &'static EntitySchema,
    relation: Relation,
}

impl Join {
    fn sql(&self) -> String {
        let target = self.relation.target_schema();
        let on = match self.relation.kind {
            RelationKind::ManyToOne { column } => format!(
                "{}.{} = {}.{}",
                quote_ident(&self.alias),
                quote_ident(target.id.column),
                quote_ident(&self.source_alias),
                quote_ident(column)
            ),
            RelationKind::OneToMany { mapped_by } => format!(
                "{}.{} = {}.{}",
                quote_ident(&self.alias),
                quote_ident(mapped_by),
                quote_ident(&self.source_alias),
                quote_ident(self.source.id.column)
            ),
        };
        format!(
            " INNER JOIN {} AS {} ON {on}",
            quote_ident(target.table),
            quote_ident(&self.alias)
        )
    }
}

/// FROM-clause builder for one entity table plus the joins paths require.
#[derive(Debug, Clone)]
pub struct QueryRoot {
    schema: &'static EntitySchema,
    joins: Vec<Join>,
}

impl QueryRoot {
    pub fn new(schema: &'static EntitySchema) -> Self {
        Self {
            schema,
            joins: Vec::new(),
        }
    }

    pub fn of<T: Entity>() -> Self {
        Self::new(T::schema())
    }

    pub fn schema(&self) -> &'static EntitySchema {
        self.schema
    }

    pub fn join_count(&self) -> usize {
        self.joins.len()
    }

    /// Joins every relation of `path` and references its leaf.
    pub fn resolve(&mut self, path: &FieldPath) -> RepoResult<PropertyPath> {
        let mut schema = self.schema;
        let mut alias = ROOT_ALIAS.to_string();
        let mut prefix = String::new();

        for relation_name in path.relations() {
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(relation_name);

            let relation = *schema
                .relation(relation_name)
                .ok_or_else(|| RepoError::UnknownRelation {
                    entity: schema.name,
                    relation: relation_name.clone(),
                })?;
            alias = self.join_alias(&alias, &prefix, schema, relation);
            schema = relation.target_schema();
        }

        leaf_reference(schema, &alias, path.leaf())
    }

    pub(crate) fn from_sql(&self) -> String {
        let mut sql = format!(
            " FROM {} AS {}",
            quote_ident(self.schema.table),
            quote_ident(ROOT_ALIAS)
        );
        for join in &self.joins {
            sql.push_str(&join.sql());
        }
        sql
    }

    fn join_alias(
        &mut self,
        source_alias: &str,
        prefix: &str,
        source: &'static EntitySchema,
        relation: Relation,
    ) -> String {
        if let Some(existing) = self.joins.iter().find(|join| join.prefix == prefix) {
            return existing.alias.clone();
        }
        let alias = format!("j{}", self.joins.len() + 1);
        self.joins.push(Join {
            alias: alias.clone(),
            source_alias: source_alias.to_string(),
            prefix: prefix.to_string(),
            source,
            relation,
        });
        alias
    }
}

/// Bindable column reference produced by path resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyPath {
    pub alias: String,
    pub entity: &'static str,
    pub field: &'static str,
    pub column: &'static str,
}

impl PropertyPath {
    /// Qualified column reference, e.g. `"j1"."title"`.
    pub fn sql(&self) -> String {
        format!("{}.{}", quote_ident(&self.alias), quote_ident(self.column))
    }
}

fn leaf_reference(schema: &'static EntitySchema, alias: &str, field: &str) -> RepoResult<PropertyPath> {
    let mapping = schema.field(field).ok_or_else(|| RepoError::UnknownField {
        entity: schema.name,
        field: field.to_string(),
    })?;
    Ok(PropertyPath {
        alias: alias.to_string(),
        entity: schema.name,
        field: mapping.name,
        column: mapping.column,
    })
}
