//! Persistence session over one SQLite connection.
//!
//! # Responsibility
//! - Track loaded and staged entities in an identity map.
//! - Queue writes and apply them on explicit flush.
//! - Resolve named queries and bind parameters by name.
//! - Expose an explicit unit of work (`begin`/`commit`/`rollback`).
//!
//! # Invariants
//! - In `FlushMode::Commit` no read ever applies pending writes.
//! - A flush is atomic: it runs inside a savepoint and either applies every
//!   pending write or none of them.
//! - A failed flush clears the queue and the identity map.
//! - The session is single-threaded; it is `!Sync` by construction.

mod tracking;

pub use tracking::EntityKey;

use crate::config::SessionConfig;
use crate::db::{open_db, open_db_in_memory};
use crate::model::entity::{EntityId, EntitySchema, Record};
use crate::query::params::ParameterSet;
use crate::query::sort::quote_ident;
use crate::repo::error::{BindingFault, RepoError, RepoResult};
use log::{debug, error, info, warn};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Statement};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracking::{PendingWrite, UnitState};

/// When pending writes become visible to the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Only explicit `flush`/`commit` applies pending writes.
    #[default]
    Commit,
    /// Queries apply pending writes before they run.
    Auto,
}

/// Single unit-of-work context: identity map, write queue, named queries.
pub struct Session {
    conn: Connection,
    flush_mode: Cell<FlushMode>,
    in_transaction: Cell<bool>,
    flush_count: Cell<u64>,
    bound: RefCell<BTreeMap<&'static str, &'static EntitySchema>>,
    named_queries: RefCell<BTreeMap<String, String>>,
    unit: RefCell<UnitState>,
}

impl Session {
    /// Wraps a migrated connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            flush_mode: Cell::new(FlushMode::Commit),
            in_transaction: Cell::new(false),
            flush_count: Cell::new(0),
            bound: RefCell::new(BTreeMap::new()),
            named_queries: RefCell::new(BTreeMap::new()),
            unit: RefCell::new(UnitState::default()),
        }
    }

    /// Opens the configured database and applies session settings.
    pub fn open(config: &SessionConfig) -> RepoResult<Self> {
        let conn = match &config.database_path {
            Some(path) => open_db(path)?,
            None => open_db_in_memory()?,
        };
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        let session = Self::new(conn);
        session.set_flush_mode(config.flush_mode);
        Ok(session)
    }

    pub fn in_memory() -> RepoResult<Self> {
        Ok(Self::new(open_db_in_memory()?))
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn flush_mode(&self) -> FlushMode {
        self.flush_mode.get()
    }

    pub fn set_flush_mode(&self, mode: FlushMode) {
        self.flush_mode.set(mode);
    }

    /// Number of `flush` invocations so far, empty ones included.
    pub fn flush_count(&self) -> u64 {
        self.flush_count.get()
    }

    pub fn pending_writes(&self) -> usize {
        self.unit.borrow().pending_len()
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction.get()
    }

    // ---- binding and named queries ----

    /// Binds a schema and registers the named queries it declares.
    pub fn bind(&self, schema: &'static EntitySchema) -> RepoResult<()> {
        for query in schema.named_queries {
            self.register_named_query(query.name, query.sql)?;
        }
        self.bound.borrow_mut().insert(schema.name, schema);
        debug!(
            "event=bind module=session status=ok entity={} named_queries={}",
            schema.name,
            schema.named_queries.len()
        );
        Ok(())
    }

    /// Unbinds a schema and drops the named queries it declared.
    pub fn unbind(&self, schema: &'static EntitySchema) {
        let mut named_queries = self.named_queries.borrow_mut();
        for query in schema.named_queries {
            if named_queries.get(query.name).map(String::as_str) == Some(query.sql) {
                named_queries.remove(query.name);
            }
        }
        self.bound.borrow_mut().remove(schema.name);
    }

    /// Whether a schema named `entity` is bound.
    pub fn is_bound(&self, entity: &str) -> bool {
        self.bound.borrow().contains_key(entity)
    }

    /// Registers `sql` under `name`. Re-registering identical text is a no-op.
    pub fn register_named_query(&self, name: &str, sql: &str) -> RepoResult<()> {
        let mut named_queries = self.named_queries.borrow_mut();
        match named_queries.get(name) {
            Some(existing) if existing == sql => Ok(()),
            Some(_) => Err(RepoError::DuplicateNamedQuery(name.to_string())),
            None => {
                named_queries.insert(name.to_string(), sql.to_string());
                Ok(())
            }
        }
    }

    /// Raw text of a registered named query.
    pub fn named_query_text(&self, name: &str) -> RepoResult<String> {
        self.named_queries
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| RepoError::QueryNotFound(name.to_string()))
    }

    // ---- identity map ----

    /// Whether the row is tracked and not scheduled for removal.
    pub fn contains(&self, schema: &EntitySchema, id: EntityId) -> bool {
        self.unit.borrow().is_managed(EntityKey::new(schema, id))
    }

    /// Stages an insert. A caller-assigned identity is kept as is.
    pub(crate) fn persist(
        &self,
        schema: &'static EntitySchema,
        id: Option<EntityId>,
        values: Vec<Value>,
    ) -> RepoResult<EntityId> {
        let id = match id {
            Some(id) => {
                self.unit.borrow_mut().reserve_id(schema.table, id);
                id
            }
            None => self.allocate_id(schema)?,
        };

        let mut unit = self.unit.borrow_mut();
        if unit.is_managed(EntityKey::new(schema, id)) {
            unit.stage_update(schema, id, values);
        } else {
            unit.stage_insert(schema, id, values);
        }
        Ok(id)
    }

    /// Stages an update when the row exists (or is staged), else an insert.
    pub(crate) fn merge(
        &self,
        schema: &'static EntitySchema,
        id: Option<EntityId>,
        values: Vec<Value>,
    ) -> RepoResult<EntityId> {
        let Some(id) = id else {
            let id = self.allocate_id(schema)?;
            self.unit.borrow_mut().stage_insert(schema, id, values);
            return Ok(id);
        };

        let tracked = self
            .unit
            .borrow()
            .tracked(EntityKey::new(schema, id))
            .is_some();
        if tracked || self.row_exists(schema, id)? {
            self.unit.borrow_mut().stage_update(schema, id, values);
        } else {
            let mut unit = self.unit.borrow_mut();
            unit.reserve_id(schema.table, id);
            unit.stage_insert(schema, id, values);
        }
        Ok(id)
    }

    /// Resolves a lazy reference without loading the row.
    pub(crate) fn get_reference(&self, schema: &'static EntitySchema, id: EntityId) -> RepoResult<()> {
        let key = EntityKey::new(schema, id);
        match self.unit.borrow().tracked(key) {
            Some(tracked) if tracked.removed => {
                return Err(RepoError::EntityNotFound {
                    entity: schema.name,
                    id,
                })
            }
            Some(_) => return Ok(()),
            None => {}
        }
        if self.row_exists(schema, id)? {
            Ok(())
        } else {
            Err(RepoError::EntityNotFound {
                entity: schema.name,
                id,
            })
        }
    }

    pub(crate) fn remove(&self, schema: &'static EntitySchema, id: EntityId) {
        self.unit.borrow_mut().stage_delete(schema, id);
    }

    /// Identity-map lookup falling back to a row load.
    pub(crate) fn find_record(
        &self,
        schema: &'static EntitySchema,
        id: EntityId,
    ) -> RepoResult<Option<Record>> {
        let key = EntityKey::new(schema, id);
        match self.unit.borrow().tracked(key) {
            Some(tracked) if tracked.removed => return Ok(None),
            Some(tracked) => return Ok(Some(tracked.snapshot.clone())),
            None => {}
        }

        let record = self.load_record(schema, id)?;
        if let Some(record) = &record {
            self.unit.borrow_mut().track(key, record.clone());
        }
        Ok(record)
    }

    /// Reloads a row, discarding staged changes for it.
    pub(crate) fn refresh_record(
        &self,
        schema: &'static EntitySchema,
        id: EntityId,
    ) -> RepoResult<Record> {
        let record = self
            .load_record(schema, id)?
            .ok_or(RepoError::EntityNotFound {
                entity: schema.name,
                id,
            })?;
        let key = EntityKey::new(schema, id);
        let mut unit = self.unit.borrow_mut();
        unit.discard_pending(key);
        unit.track(key, record.clone());
        Ok(record)
    }

    /// Routes a query row through the identity map.
    ///
    /// A managed row wins over the freshly read one; a full row that is not
    /// yet tracked becomes tracked.
    pub(crate) fn attach(&self, schema: &'static EntitySchema, record: Record) -> Record {
        let Some(id) = record.id(schema) else {
            return record;
        };
        let key = EntityKey::new(schema, id);
        let mut unit = self.unit.borrow_mut();
        if let Some(tracked) = unit.tracked(key) {
            return if tracked.removed {
                record
            } else {
                tracked.snapshot.clone()
            };
        }
        if schema.columns().all(|column| record.value(column).is_some()) {
            unit.track(key, record.clone());
        }
        record
    }

    // ---- query execution ----

    /// Runs a row-returning statement with named parameters.
    ///
    /// `label` names the query in logs and errors; parameter values are never
    /// logged.
    pub fn query(&self, label: &str, sql: &str, params: &ParameterSet) -> RepoResult<Vec<Record>> {
        self.auto_flush()?;
        let started_at = Instant::now();
        let result = self.query_inner(label, sql, params);
        match &result {
            Ok(records) => debug!(
                "event=query module=session status=ok label={label} params=[{}] rows={} duration_ms={}",
                params.names(),
                records.len(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=query module=session status=error label={label} params=[{}] duration_ms={} error={err}",
                params.names(),
                started_at.elapsed().as_millis()
            ),
        }
        result
    }

    /// Runs a bulk update/delete statement and returns the affected rows.
    pub fn execute(&self, label: &str, sql: &str, params: &ParameterSet) -> RepoResult<usize> {
        self.auto_flush()?;
        let started_at = Instant::now();
        let result = self.conn.prepare(sql).map_err(RepoError::from).and_then(|mut stmt| {
            bind_parameters(&mut stmt, label, params)?;
            Ok(stmt.raw_execute()?)
        });
        match &result {
            Ok(affected) => debug!(
                "event=execute module=session status=ok label={label} params=[{}] affected={affected} duration_ms={}",
                params.names(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=execute module=session status=error label={label} duration_ms={} error={err}",
                started_at.elapsed().as_millis()
            ),
        }
        result
    }

    fn query_inner(&self, label: &str, sql: &str, params: &ParameterSet) -> RepoResult<Vec<Record>> {
        let mut stmt = self.conn.prepare(sql)?;
        bind_parameters(&mut stmt, label, params)?;
        read_records(&mut stmt)
    }

    // ---- flush and unit of work ----

    /// Applies every pending write inside a savepoint: inserts, then
    /// updates, then deletes.
    pub fn flush(&self) -> RepoResult<()> {
        self.flush_count.set(self.flush_count.get() + 1);
        let writes = self.unit.borrow_mut().take_pending();
        if writes.is_empty() {
            return Ok(());
        }

        let started_at = Instant::now();
        self.conn.execute_batch("SAVEPOINT session_flush;")?;
        match self.apply_writes(&writes) {
            Ok(()) => {
                self.conn.execute_batch("RELEASE session_flush;")?;
                self.unit.borrow_mut().forget_removed();
                info!(
                    "event=flush module=session status=ok writes={} duration_ms={}",
                    writes.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                if let Err(rollback_err) = self
                    .conn
                    .execute_batch("ROLLBACK TO session_flush; RELEASE session_flush;")
                {
                    error!(
                        "event=flush module=session status=error error_code=savepoint_rollback_failed error={rollback_err}"
                    );
                }
                self.unit.borrow_mut().clear();
                error!(
                    "event=flush module=session status=error writes={} duration_ms={} error={err}",
                    writes.len(),
                    started_at.elapsed().as_millis()
                );
                Err(err)
            }
        }
    }

    pub fn begin(&self) -> RepoResult<()> {
        if self.in_transaction.get() {
            return Err(RepoError::TransactionState("transaction already active"));
        }
        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        self.in_transaction.set(true);
        debug!("event=unit_of_work module=session status=begin");
        Ok(())
    }

    /// Flushes pending writes and commits. On flush failure the transaction
    /// stays open for the caller to roll back.
    pub fn commit(&self) -> RepoResult<()> {
        if !self.in_transaction.get() {
            return Err(RepoError::TransactionState("no active transaction"));
        }
        self.flush()?;
        self.conn.execute_batch("COMMIT;")?;
        self.in_transaction.set(false);
        debug!("event=unit_of_work module=session status=commit");
        Ok(())
    }

    /// Discards pending writes and the identity map, then rolls back.
    pub fn rollback(&self) -> RepoResult<()> {
        if !self.in_transaction.get() {
            return Err(RepoError::TransactionState("no active transaction"));
        }
        self.unit.borrow_mut().clear();
        self.in_transaction.set(false);
        self.conn.execute_batch("ROLLBACK;")?;
        debug!("event=unit_of_work module=session status=rollback");
        Ok(())
    }

    /// Runs `work` in a transaction: commit on `Ok`, roll back on `Err`.
    pub fn unit_of_work<R>(&self, work: impl FnOnce(&Self) -> RepoResult<R>) -> RepoResult<R> {
        self.begin()?;
        let outcome = work(self).and_then(|value| self.commit().map(|()| value));
        if let Err(err) = &outcome {
            if let Err(rollback_err) = self.rollback() {
                error!(
                    "event=unit_of_work module=session status=error error_code=rollback_failed error={rollback_err} cause={err}"
                );
            }
        }
        outcome
    }

    fn auto_flush(&self) -> RepoResult<()> {
        if self.flush_mode.get() == FlushMode::Auto && self.pending_writes() > 0 {
            self.flush()?;
        }
        Ok(())
    }

    fn apply_writes(&self, writes: &[PendingWrite]) -> RepoResult<()> {
        for write in writes {
            match write {
                PendingWrite::Insert { schema, id, values } => {
                    let mut stmt = self.conn.prepare_cached(&insert_sql(schema))?;
                    let id_value = Value::Integer(*id);
                    stmt.execute(params_from_iter(std::iter::once(&id_value).chain(values)))?;
                }
                PendingWrite::Update { schema, id, values } => {
                    if schema.fields.is_empty() {
                        continue;
                    }
                    let mut stmt = self.conn.prepare_cached(&update_sql(schema))?;
                    let id_value = Value::Integer(*id);
                    let changed =
                        stmt.execute(params_from_iter(values.iter().chain(std::iter::once(&id_value))))?;
                    if changed == 0 {
                        return Err(RepoError::EntityNotFound {
                            entity: schema.name,
                            id: *id,
                        });
                    }
                }
                PendingWrite::Delete { schema, id } => {
                    let mut stmt = self.conn.prepare_cached(&delete_sql(schema))?;
                    stmt.execute([id])?;
                }
            }
        }
        Ok(())
    }

    fn allocate_id(&self, schema: &'static EntitySchema) -> RepoResult<EntityId> {
        if let Some(id) = self.unit.borrow_mut().next_id(schema.table) {
            return Ok(id);
        }
        let max_persisted: Option<EntityId> = self.conn.query_row(
            &format!(
                "SELECT MAX({}) FROM {};",
                quote_ident(schema.id.column),
                quote_ident(schema.table)
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(self
            .unit
            .borrow_mut()
            .seed_ids(schema.table, max_persisted.unwrap_or(0)))
    }

    fn row_exists(&self, schema: &EntitySchema, id: EntityId) -> RepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            &format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1);",
                quote_ident(schema.table),
                quote_ident(schema.id.column)
            ),
            [id],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn load_record(&self, schema: &EntitySchema, id: EntityId) -> RepoResult<Option<Record>> {
        let mut stmt = self.conn.prepare_cached(&select_by_id_sql(schema))?;
        let columns = column_names(&stmt);
        let values = stmt
            .query_row([id], |row| {
                (0..columns.len())
                    .map(|index| row.get::<_, Value>(index))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })
            .optional()?;
        Ok(values.map(|values| Record::new(columns, values)))
    }
}

/// Binds every supplied parameter by name and rejects unbound placeholders.
fn bind_parameters(stmt: &mut Statement<'_>, label: &str, params: &ParameterSet) -> RepoResult<()> {
    for (name, value) in params.iter() {
        let index = stmt
            .parameter_index(&format!(":{name}"))?
            .ok_or_else(|| RepoError::ParameterBinding {
                query: label.to_string(),
                parameter: name.to_string(),
                fault: BindingFault::Unknown,
            })?;
        stmt.raw_bind_parameter(index, value)?;
    }

    for index in 1..=stmt.parameter_count() {
        let placeholder = stmt.parameter_name(index);
        let bound = placeholder
            .and_then(|name| name.strip_prefix(':'))
            .is_some_and(|name| params.contains(name));
        if !bound {
            return Err(RepoError::ParameterBinding {
                query: label.to_string(),
                parameter: placeholder.unwrap_or("?").to_string(),
                fault: BindingFault::Unbound,
            });
        }
    }
    Ok(())
}

fn read_records(stmt: &mut Statement<'_>) -> RepoResult<Vec<Record>> {
    let columns = column_names(stmt);
    let mut rows = stmt.raw_query();
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        let values = (0..columns.len())
            .map(|index| row.get::<_, Value>(index))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        records.push(Record::new(columns.clone(), values));
    }
    Ok(records)
}

fn column_names(stmt: &Statement<'_>) -> Vec<String> {
    stmt.column_names().into_iter().map(str::to_string).collect()
}

fn column_list(schema: &EntitySchema) -> String {
    schema
        .columns()
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(", ")
}

fn insert_sql(schema: &EntitySchema) -> String {
    let placeholders = (1..=schema.fields.len() + 1)
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({placeholders});",
        quote_ident(schema.table),
        column_list(schema)
    )
}

fn update_sql(schema: &EntitySchema) -> String {
    let assignments = schema
        .fields
        .iter()
        .enumerate()
        .map(|(index, field)| format!("{} = ?{}", quote_ident(field.column), index + 1))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} SET {assignments} WHERE {} = ?{};",
        quote_ident(schema.table),
        quote_ident(schema.id.column),
        schema.fields.len() + 1
    )
}

fn delete_sql(schema: &EntitySchema) -> String {
    format!(
        "DELETE FROM {} WHERE {} = ?1;",
        quote_ident(schema.table),
        quote_ident(schema.id.column)
    )
}

fn select_by_id_sql(schema: &EntitySchema) -> String {
    format!(
        "SELECT {} FROM {} WHERE {} = ?1;",
        column_list(schema),
        quote_ident(schema.table),
        quote_ident(schema.id.column)
    )
}
