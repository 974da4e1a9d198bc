//! Notebook entity: a titled, nestable container of notes.

use crate::model::entity::{
    Entity, EntityId, EntitySchema, FieldMapping, FromRecord, NamedQueryDef, Record, Relation,
};
use crate::model::note::NOTE_SCHEMA;
use crate::repo::error::RepoResult;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

pub const NOTEBOOK_FIND_ALL: &str = "Notebook.findAll";
pub const NOTEBOOK_COUNT: &str = "Notebook.count";

pub static NOTEBOOK_SCHEMA: EntitySchema = EntitySchema {
    name: "Notebook",
    table: "notebook",
    id: FieldMapping::new("uid_pk", "uidpk"),
    fields: &[
        FieldMapping::new("title", "title"),
        FieldMapping::new("parent_id", "parent_uidpk"),
    ],
    relations: &[
        Relation::many_to_one("parent", "parent_uidpk", notebook_schema),
        Relation::one_to_many("notes", "notebook_uidpk", note_schema),
    ],
    named_queries: &[
        NamedQueryDef::new(NOTEBOOK_FIND_ALL, "SELECT * FROM notebook"),
        NamedQueryDef::new(NOTEBOOK_COUNT, "SELECT COUNT(*) FROM notebook"),
    ],
};

fn notebook_schema() -> &'static EntitySchema {
    &NOTEBOOK_SCHEMA
}

fn note_schema() -> &'static EntitySchema {
    &NOTE_SCHEMA
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notebook {
    pub uid_pk: Option<EntityId>,
    /// Unique across all notebooks.
    pub title: String,
    pub parent_id: Option<EntityId>,
}

impl Notebook {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            uid_pk: None,
            title: title.into(),
            parent_id: None,
        }
    }

    pub fn nested_in(mut self, parent_id: EntityId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

impl FromRecord for Notebook {
    fn from_record(record: &Record) -> RepoResult<Self> {
        Ok(Self {
            uid_pk: record.get("uidpk")?,
            title: record.get("title")?,
            parent_id: record.get("parent_uidpk")?,
        })
    }
}

impl Entity for Notebook {
    fn schema() -> &'static EntitySchema {
        &NOTEBOOK_SCHEMA
    }

    fn id(&self) -> Option<EntityId> {
        self.uid_pk
    }

    fn set_id(&mut self, id: EntityId) {
        self.uid_pk = Some(id);
    }

    fn field_values(&self) -> Vec<Value> {
        vec![self.title.clone().into(), self.parent_id.into()]
    }
}
