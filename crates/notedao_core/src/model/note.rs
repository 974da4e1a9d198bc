//! Note entity.
//!
//! # Invariants
//! - `uid_pk` is `None` until the note is first persisted.
//! - `last_modified_date` is epoch milliseconds.

use crate::model::entity::{
    Entity, EntityId, EntitySchema, FieldMapping, FromRecord, NamedQueryDef, Record, Relation,
};
use crate::model::notebook::NOTEBOOK_SCHEMA;
use crate::repo::error::RepoResult;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub const NOTE_FIND_ALL: &str = "Note.findAll";
pub const NOTE_COUNT: &str = "Note.count";
pub const NOTE_FIND_BY_TYPE: &str = "Note.findByType";
pub const NOTE_COUNT_BY_TYPE: &str = "Note.countByType";
pub const NOTE_DELETE_BY_TYPE: &str = "Note.deleteByType";

pub static NOTE_SCHEMA: EntitySchema = EntitySchema {
    name: "Note",
    table: "note",
    id: FieldMapping::new("uid_pk", "uidpk"),
    fields: &[
        FieldMapping::new("last_modified_date", "last_modified_date"),
        FieldMapping::new("content", "content"),
        FieldMapping::new("type", "type"),
        FieldMapping::new("notebook_id", "notebook_uidpk"),
    ],
    relations: &[Relation::many_to_one(
        "notebook",
        "notebook_uidpk",
        notebook_schema,
    )],
    named_queries: &[
        NamedQueryDef::new(NOTE_FIND_ALL, "SELECT * FROM note"),
        NamedQueryDef::new(NOTE_COUNT, "SELECT COUNT(*) FROM note"),
        NamedQueryDef::new(NOTE_FIND_BY_TYPE, "SELECT * FROM note WHERE type = :type"),
        NamedQueryDef::new(
            NOTE_COUNT_BY_TYPE,
            "SELECT COUNT(*) FROM note WHERE type = :type",
        ),
        NamedQueryDef::new(NOTE_DELETE_BY_TYPE, "DELETE FROM note WHERE type = :type"),
    ],
};

fn notebook_schema() -> &'static EntitySchema {
    &NOTEBOOK_SCHEMA
}

/// Free-form text note, optionally filed in a notebook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub uid_pk: Option<EntityId>,
    pub last_modified_date: Option<i64>,
    pub content: Option<String>,
    /// Serialized as `type` to match the column name.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub notebook_id: Option<EntityId>,
}

impl Note {
    /// Creates an unsaved note stamped with the current time.
    pub fn new(kind: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            uid_pk: None,
            last_modified_date: Some(now_millis()),
            content: Some(content.into()),
            kind: Some(kind.into()),
            notebook_id: None,
        }
    }

    pub fn in_notebook(mut self, notebook_id: EntityId) -> Self {
        self.notebook_id = Some(notebook_id);
        self
    }

    /// Replaces the content and refreshes the modification stamp.
    pub fn edit(&mut self, content: impl Into<String>) {
        self.content = Some(content.into());
        self.last_modified_date = Some(now_millis());
    }
}

impl FromRecord for Note {
    fn from_record(record: &Record) -> RepoResult<Self> {
        Ok(Self {
            uid_pk: record.get("uidpk")?,
            last_modified_date: record.get("last_modified_date")?,
            content: record.get("content")?,
            kind: record.get("type")?,
            notebook_id: record.get("notebook_uidpk")?,
        })
    }
}

impl Entity for Note {
    fn schema() -> &'static EntitySchema {
        &NOTE_SCHEMA
    }

    fn id(&self) -> Option<EntityId> {
        self.uid_pk
    }

    fn set_id(&mut self, id: EntityId) {
        self.uid_pk = Some(id);
    }

    fn field_values(&self) -> Vec<Value> {
        vec![
            self.last_modified_date.into(),
            self.content.clone().into(),
            self.kind.clone().into(),
            self.notebook_id.into(),
        ]
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX)
        })
}
