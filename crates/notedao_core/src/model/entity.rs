//! Entity contract and schema descriptors.
//!
//! # Responsibility
//! - Describe how an entity type maps onto a table: identity, fields,
//!   relations and the named queries it declares.
//! - Carry rows between the session and typed entities as [`Record`]s.
//!
//! # Invariants
//! - `Entity::field_values` yields one value per `EntitySchema::fields`
//!   entry, in declaration order.
//! - The identity column is never part of `fields`.

use crate::repo::error::{RepoError, RepoResult};
use rusqlite::types::{FromSql, Value, ValueRef};

/// Integral identity shared by every entity. Unset until first persistence.
pub type EntityId = i64;

/// One property-to-column mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMapping {
    /// Property name used by field paths and sort specs.
    pub name: &'static str,
    pub column: &'static str,
}

impl FieldMapping {
    pub const fn new(name: &'static str, column: &'static str) -> Self {
        Self { name, column }
    }
}

/// How a relation joins its owner to the target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// Owner column references the target's identity.
    ManyToOne { column: &'static str },
    /// Target column references the owner's identity.
    OneToMany { mapped_by: &'static str },
}

/// Named edge in the entity join graph.
#[derive(Debug, Clone, Copy)]
pub struct Relation {
    pub name: &'static str,
    pub kind: RelationKind,
    /// Function pointer so schemas can reference each other cyclically.
    pub target: fn() -> &'static EntitySchema,
}

impl Relation {
    pub const fn many_to_one(
        name: &'static str,
        column: &'static str,
        target: fn() -> &'static EntitySchema,
    ) -> Self {
        Self {
            name,
            kind: RelationKind::ManyToOne { column },
            target,
        }
    }

    pub const fn one_to_many(
        name: &'static str,
        mapped_by: &'static str,
        target: fn() -> &'static EntitySchema,
    ) -> Self {
        Self {
            name,
            kind: RelationKind::OneToMany { mapped_by },
            target,
        }
    }

    pub fn target_schema(&self) -> &'static EntitySchema {
        (self.target)()
    }
}

/// Query declared alongside an entity and registered when it is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamedQueryDef {
    pub name: &'static str,
    pub sql: &'static str,
}

impl NamedQueryDef {
    pub const fn new(name: &'static str, sql: &'static str) -> Self {
        Self { name, sql }
    }
}

/// Static description of an entity table.
#[derive(Debug)]
pub struct EntitySchema {
    /// Entity name used in logs and errors.
    pub name: &'static str,
    pub table: &'static str,
    pub id: FieldMapping,
    pub fields: &'static [FieldMapping],
    pub relations: &'static [Relation],
    pub named_queries: &'static [NamedQueryDef],
}

impl EntitySchema {
    /// Resolves a property name (identity included) to its mapping.
    pub fn field(&self, name: &str) -> Option<&FieldMapping> {
        if self.id.name == name {
            return Some(&self.id);
        }
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|relation| relation.name == name)
    }

    /// Identity column followed by every field column.
    pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        std::iter::once(self.id.column).chain(self.fields.iter().map(|field| field.column))
    }

    /// Whether both schemas store the same columns in the same order.
    pub fn is_column_compatible(&self, other: &EntitySchema) -> bool {
        self.columns().eq(other.columns())
    }
}

/// Runtime type descriptor bound to one repository.
#[derive(Debug, Clone, Copy)]
pub struct EntityHandle {
    schema: &'static EntitySchema,
}

impl EntityHandle {
    pub const fn new(schema: &'static EntitySchema) -> Self {
        Self { schema }
    }

    pub fn of<T: Entity>() -> Self {
        Self::new(T::schema())
    }

    pub const fn schema(&self) -> &'static EntitySchema {
        self.schema
    }
}

/// One result row: column names paired with engine values.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Record {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Builds the snapshot record of an entity from its identity and fields.
    pub(crate) fn from_entity(schema: &EntitySchema, id: EntityId, values: Vec<Value>) -> Self {
        let columns = schema.columns().map(str::to_string).collect();
        let values = std::iter::once(Value::Integer(id)).chain(values).collect();
        Self { columns, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Raw value of a column, matched case-insensitively.
    pub fn value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|name| name.eq_ignore_ascii_case(column))
            .map(|index| &self.values[index])
    }

    /// Decodes a column into `V`.
    pub fn get<V: FromSql>(&self, column: &str) -> RepoResult<V> {
        let value = self.value(column).ok_or_else(|| {
            RepoError::InvalidData(format!("result row has no column `{column}`"))
        })?;
        V::column_result(ValueRef::from(value)).map_err(|err| {
            RepoError::InvalidData(format!("cannot decode column `{column}`: {err}"))
        })
    }

    pub(crate) fn id(&self, schema: &EntitySchema) -> Option<EntityId> {
        match self.value(schema.id.column) {
            Some(Value::Integer(id)) => Some(*id),
            _ => None,
        }
    }

    /// Decodes the single column of a one-column row.
    fn single<V: FromSql>(&self) -> RepoResult<V> {
        if self.values.len() != 1 {
            return Err(RepoError::InvalidData(format!(
                "expected one column, got {}",
                self.values.len()
            )));
        }
        V::column_result(ValueRef::from(&self.values[0]))
            .map_err(|err| RepoError::InvalidData(format!("cannot decode scalar: {err}")))
    }
}

/// Result shape a query row can be decoded into.
pub trait FromRecord: Sized {
    fn from_record(record: &Record) -> RepoResult<Self>;
}

impl FromRecord for Record {
    fn from_record(record: &Record) -> RepoResult<Self> {
        Ok(record.clone())
    }
}

macro_rules! scalar_from_record {
    ($($ty:ty),*) => {
        $(impl FromRecord for $ty {
            fn from_record(record: &Record) -> RepoResult<Self> {
                record.single()
            }
        })*
    };
}

scalar_from_record!(i64, f64, bool, String, Option<i64>, Option<f64>, Option<String>);

/// Typed record mapped onto one table.
pub trait Entity: FromRecord {
    fn schema() -> &'static EntitySchema;
    fn id(&self) -> Option<EntityId>;
    fn set_id(&mut self, id: EntityId);
    /// Column values for every mapped field, in `schema().fields` order.
    fn field_values(&self) -> Vec<Value>;
}
