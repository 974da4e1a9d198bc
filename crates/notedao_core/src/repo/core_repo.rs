//! Generic repository over one entity type.
//!
//! # Responsibility
//! - Expose CRUD, named-query, typed-query and criteria operations for `T`.
//! - Translate entity values to and from session records.
//!
//! # Invariants
//! - Constructing a repository forces `FlushMode::Commit` on its session.
//! - Sort fields are resolved against the bound schema before any SQL is built.
//! - Parameter values are bound by name and never spliced into SQL text.

use crate::model::entity::{Entity, EntityHandle, EntityId, EntitySchema, FromRecord, Record};
use crate::query::criteria::CriteriaQuery;
use crate::query::page::PageWindow;
use crate::query::params::ParameterSet;
use crate::query::path::{FieldPath, PropertyPath, QueryRoot};
use crate::query::sort::{quote_ident, SortSpec};
use crate::repo::error::{RepoError, RepoResult};
use crate::session::{FlushMode, Session};
use log::debug;
use rusqlite::types::Value;
use rusqlite::Connection;
use std::marker::PhantomData;

const WINDOW_ALIAS: &str = "q";
const NATIVE_QUERY_LABEL: &str = "native";
const TYPED_QUERY_LABEL: &str = "typed";
const CRITERIA_QUERY_LABEL: &str = "criteria";

/// Whether a write is made durable before the call returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlushPolicy {
    #[default]
    Immediate,
    /// Left queued until the next flush or commit.
    Deferred,
}

/// Data-access object for entity type `T`, borrowing one session.
pub struct Repository<'s, T: Entity> {
    session: &'s Session,
    handle: EntityHandle,
    _entity: PhantomData<fn() -> T>,
}

impl<'s, T: Entity> Repository<'s, T> {
    /// Binds `T` to the session and verifies its table layout.
    pub fn try_new(session: &'s Session) -> RepoResult<Self> {
        let handle = EntityHandle::of::<T>();
        attach_schema(session, handle.schema())?;
        session.set_flush_mode(FlushMode::Commit);
        Ok(Self {
            session,
            handle,
            _entity: PhantomData,
        })
    }

    pub fn entity_handle(&self) -> EntityHandle {
        self.handle
    }

    /// Rebinds the repository to a column-compatible schema.
    pub fn set_entity_handle(&mut self, handle: EntityHandle) -> RepoResult<()> {
        let expected = T::schema();
        if !expected.is_column_compatible(handle.schema()) {
            return Err(RepoError::IncompatibleSchema {
                expected: expected.name,
                actual: handle.schema().name,
            });
        }
        attach_schema(self.session, handle.schema())?;
        self.handle = handle;
        Ok(())
    }

    fn schema(&self) -> &'static EntitySchema {
        self.handle.schema()
    }

    // ---- writes ----

    /// Inserts `entity` and flushes. The identity is set once the row is
    /// durable.
    pub fn persist(&self, entity: &mut T) -> RepoResult<EntityId> {
        let id = self
            .session
            .persist(self.schema(), entity.id(), entity.field_values())?;
        self.session.flush()?;
        entity.set_id(id);
        Ok(id)
    }

    /// Merges `entity`: update when its row exists, insert otherwise.
    pub fn save_or_update(&self, entity: &mut T, policy: FlushPolicy) -> RepoResult<EntityId> {
        let id = self
            .session
            .merge(self.schema(), entity.id(), entity.field_values())?;
        entity.set_id(id);
        if policy == FlushPolicy::Immediate {
            self.session.flush()?;
        }
        Ok(id)
    }

    /// Same as `save_or_update` with an immediate flush.
    pub fn update(&self, entity: &mut T) -> RepoResult<EntityId> {
        self.save_or_update(entity, FlushPolicy::Immediate)
    }

    /// Merges every entity, then flushes once.
    pub fn save_list(&self, mut entities: Vec<T>) -> RepoResult<Vec<T>> {
        for entity in &mut entities {
            self.save_or_update(entity, FlushPolicy::Deferred)?;
        }
        self.session.flush()?;
        Ok(entities)
    }

    // ---- lookups ----

    /// Absence is `Ok(None)`, never an error.
    pub fn find(&self, id: EntityId) -> RepoResult<Option<T>> {
        self.find_by_id::<T>(id)
    }

    /// Identity lookup of any entity type through the same session.
    pub fn find_by_id<E: Entity>(&self, id: EntityId) -> RepoResult<Option<E>> {
        let schema = if E::schema().name == T::schema().name {
            self.schema()
        } else {
            E::schema()
        };
        self.session
            .find_record(schema, id)?
            .map(|record| E::from_record(&record))
            .transpose()
    }

    // ---- removal ----

    /// Schedules removal of the row with `id` without loading it.
    pub fn delete(&self, id: EntityId) -> RepoResult<()> {
        let schema = self.schema();
        self.session.get_reference(schema, id)?;
        self.session.remove(schema, id);
        Ok(())
    }

    /// Re-attaches `entity` if needed and schedules its removal. Does not
    /// report whether a row was actually deleted; an entity that never got
    /// an identity has nothing to remove.
    pub fn delete_object(&self, entity: &T) -> RepoResult<bool> {
        self.stage_removal(entity)?;
        Ok(true)
    }

    /// Schedules removal of every item, then flushes once. One failing row
    /// fails the whole batch.
    pub fn delete_items(&self, entities: &[T]) -> RepoResult<bool> {
        for entity in entities {
            self.stage_removal(entity)?;
        }
        self.session.flush()?;
        Ok(true)
    }

    fn stage_removal(&self, entity: &T) -> RepoResult<()> {
        let schema = self.schema();
        let Some(id) = entity.id() else {
            return Ok(());
        };
        if !self.session.contains(schema, id) {
            self.session
                .merge(schema, Some(id), entity.field_values())?;
        }
        self.session.remove(schema, id);
        Ok(())
    }

    // ---- named queries ----

    pub fn find_with_named_query(&self, name: &str) -> RepoResult<Vec<T>> {
        self.find_with_named_query_sorted(name, &ParameterSet::new(), PageWindow::UNBOUNDED, None)
    }

    pub fn find_with_named_query_params(
        &self,
        name: &str,
        params: &ParameterSet,
    ) -> RepoResult<Vec<T>> {
        self.find_with_named_query_sorted(name, params, PageWindow::UNBOUNDED, None)
    }

    /// A zero `limit` returns every row.
    pub fn find_with_named_query_limit(&self, name: &str, limit: u32) -> RepoResult<Vec<T>> {
        self.find_with_named_query_sorted(name, &ParameterSet::new(), PageWindow::first(limit), None)
    }

    pub fn find_with_named_query_params_limit(
        &self,
        name: &str,
        params: &ParameterSet,
        limit: u32,
    ) -> RepoResult<Vec<T>> {
        self.find_with_named_query_sorted(name, params, PageWindow::first(limit), None)
    }

    pub fn find_with_named_query_window(
        &self,
        name: &str,
        window: PageWindow,
    ) -> RepoResult<Vec<T>> {
        self.find_with_named_query_sorted(name, &ParameterSet::new(), window, None)
    }

    pub fn find_with_named_query_params_window(
        &self,
        name: &str,
        params: &ParameterSet,
        window: PageWindow,
    ) -> RepoResult<Vec<T>> {
        self.find_with_named_query_sorted(name, params, window, None)
    }

    /// Runs a named query wrapped with optional ordering and a page window.
    ///
    /// The sort field must be a mapped property of the bound entity.
    pub fn find_with_named_query_sorted(
        &self,
        name: &str,
        params: &ParameterSet,
        window: PageWindow,
        sort: Option<&SortSpec>,
    ) -> RepoResult<Vec<T>> {
        let sql = self.session.named_query_text(name)?;
        let sql = self.compose_select(&sql, sort, window)?;
        let records = self.session.query(name, &sql, params)?;
        self.map_entities(records)
    }

    /// Runs literal SQL and decodes each row as `R`.
    pub fn find_with_typed_query<R: FromRecord>(
        &self,
        sql: &str,
        params: &ParameterSet,
        window: PageWindow,
    ) -> RepoResult<Vec<R>> {
        let sql = self.compose_select(sql, None, window)?;
        self.session
            .query(TYPED_QUERY_LABEL, &sql, params)?
            .iter()
            .map(R::from_record)
            .collect()
    }

    /// Runs engine-native SQL with no parameters; values must be inlined by
    /// the caller.
    pub fn find_by_native_query(&self, sql: &str) -> RepoResult<Vec<T>> {
        let records = self
            .session
            .query(NATIVE_QUERY_LABEL, sql, &ParameterSet::new())?;
        self.map_entities(records)
    }

    pub fn count_total_record(&self, name: &str) -> RepoResult<i64> {
        self.count_total_record_params(name, &ParameterSet::new())
    }

    pub fn count_total_record_params(&self, name: &str, params: &ParameterSet) -> RepoResult<i64> {
        let sql = self.session.named_query_text(name)?;
        let records = self.session.query(name, &sql, params)?;
        single_integer(name, &records)
    }

    pub fn count_total_record_with_typed_query(
        &self,
        sql: &str,
        params: &ParameterSet,
    ) -> RepoResult<i64> {
        let records = self.session.query(TYPED_QUERY_LABEL, sql, params)?;
        single_integer(TYPED_QUERY_LABEL, &records)
    }

    /// Runs a named bulk statement. Pending writes are not flushed first.
    pub fn execute_named_query(&self, name: &str, params: &ParameterSet) -> RepoResult<usize> {
        let sql = self.session.named_query_text(name)?;
        self.session.execute(name, &sql, params)
    }

    // ---- criteria ----

    pub fn find_with_criteria(
        &self,
        criteria: &CriteriaQuery,
        window: PageWindow,
    ) -> RepoResult<Vec<T>> {
        self.check_criteria_root(criteria)?;
        let sql = format!("{}{}", criteria.select_sql(), window.sql_suffix());
        let records = self
            .session
            .query(CRITERIA_QUERY_LABEL, &sql, criteria.parameters())?;
        self.map_entities(records)
    }

    pub fn count_with_criteria(&self, criteria: &CriteriaQuery) -> RepoResult<i64> {
        self.check_criteria_root(criteria)?;
        let records = self.session.query(
            CRITERIA_QUERY_LABEL,
            &criteria.count_sql(),
            criteria.parameters(),
        )?;
        single_integer(CRITERIA_QUERY_LABEL, &records)
    }

    fn check_criteria_root(&self, criteria: &CriteriaQuery) -> RepoResult<()> {
        let root = criteria.root().schema();
        if root.is_column_compatible(self.schema()) {
            Ok(())
        } else {
            Err(RepoError::IncompatibleSchema {
                expected: self.schema().name,
                actual: root.name,
            })
        }
    }

    // ---- session state ----

    /// Discards staged changes to `entity` and reloads it from the database.
    pub fn refresh(&self, entity: &mut T) -> RepoResult<()> {
        let schema = self.schema();
        let id = entity
            .id()
            .ok_or(RepoError::MissingIdentity { entity: schema.name })?;
        let record = self.session.refresh_record(schema, id)?;
        *entity = T::from_record(&record)?;
        Ok(())
    }

    /// Resolves a dotted path on `root`. A blank path yields `None`.
    pub fn get_property_path(
        &self,
        root: &mut QueryRoot,
        path: &str,
    ) -> RepoResult<Option<PropertyPath>> {
        match FieldPath::parse(path)? {
            Some(path) => root.resolve(&path).map(Some),
            None => Ok(None),
        }
    }

    /// Whether `entity` is tracked by the session. `None` is never tracked.
    pub fn session_contains(&self, entity: Option<&T>) -> bool {
        entity
            .and_then(|entity| entity.id())
            .is_some_and(|id| self.session.contains(self.schema(), id))
    }

    fn map_entities(&self, records: Vec<Record>) -> RepoResult<Vec<T>> {
        let schema = self.schema();
        records
            .into_iter()
            .map(|record| T::from_record(&self.session.attach(schema, record)))
            .collect()
    }

    /// Wraps `sql` as a sub-select when ordering or a bounded window applies.
    fn compose_select(
        &self,
        sql: &str,
        sort: Option<&SortSpec>,
        window: PageWindow,
    ) -> RepoResult<String> {
        let sql = sql.trim().trim_end_matches(';').trim_end();
        if sort.is_none() && !window.is_bounded() {
            return Ok(sql.to_string());
        }
        let order = match sort {
            Some(sort) => sort.order_by_sql(self.schema(), WINDOW_ALIAS)?,
            None => String::new(),
        };
        // The newline keeps a trailing `--` comment from eating the `)`.
        Ok(format!(
            "SELECT * FROM ({sql}\n) AS {}{order}{}",
            quote_ident(WINDOW_ALIAS),
            window.sql_suffix()
        ))
    }
}

/// Extracts the one numeric value a count query must yield.
fn single_integer(label: &str, records: &[Record]) -> RepoResult<i64> {
    let failure = |reason: String| RepoError::ScalarResult {
        query: label.to_string(),
        reason,
    };
    let record = match records {
        [record] => record,
        [] => return Err(failure("no rows".to_string())),
        rows => return Err(failure(format!("{} rows", rows.len()))),
    };
    match record.values() {
        [Value::Integer(value)] => Ok(*value),
        [Value::Real(value)] => Ok(*value as i64),
        [_] => Err(failure("non-numeric value".to_string())),
        columns => Err(failure(format!("{} columns", columns.len()))),
    }
}

fn attach_schema(session: &Session, schema: &'static EntitySchema) -> RepoResult<()> {
    ensure_schema_ready(session.connection(), schema)?;
    session.bind(schema)?;
    debug!(
        "event=repository_bind module=repo status=ok entity={} table={}",
        schema.name, schema.table
    );
    Ok(())
}

fn ensure_schema_ready(conn: &Connection, schema: &'static EntitySchema) -> RepoResult<()> {
    if !table_exists(conn, schema.table)? {
        return Err(RepoError::MissingRequiredTable(schema.table));
    }
    let present = table_columns(conn, schema.table)?;
    for column in schema.columns() {
        if !present.iter().any(|name| name.eq_ignore_ascii_case(column)) {
            return Err(RepoError::MissingRequiredColumn {
                table: schema.table,
                column,
            });
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_columns(conn: &Connection, table: &str) -> RepoResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::single_integer;
    use crate::model::entity::Record;
    use crate::repo::error::RepoError;
    use rusqlite::types::Value;

    fn row(values: Vec<Value>) -> Record {
        let columns = (0..values.len()).map(|i| format!("c{i}")).collect();
        Record::new(columns, values)
    }

    #[test]
    fn single_integer_truncates_real_values() {
        assert_eq!(single_integer("q", &[row(vec![Value::Real(3.9)])]).unwrap(), 3);
    }

    #[test]
    fn single_integer_rejects_wrong_shapes() {
        for records in [
            vec![],
            vec![row(vec![Value::Integer(1)]), row(vec![Value::Integer(2)])],
            vec![row(vec![Value::Text("3".to_string())])],
            vec![row(vec![Value::Integer(1), Value::Integer(2)])],
        ] {
            let err = single_integer("q", &records).unwrap_err();
            assert!(matches!(err, RepoError::ScalarResult { .. }));
        }
    }
}
