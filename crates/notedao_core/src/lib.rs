//! Generic repository layer over SQLite.
//!
//! A [`Session`] owns one connection together with its identity map and
//! pending write queue; a [`Repository`] borrows the session and exposes
//! CRUD, named-query and criteria operations for one [`Entity`] type.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;
pub mod session;

pub use config::{ConfigError, SessionConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{init_from_config, init_logging, logging_status, LoggingError};
pub use model::entity::{
    Entity, EntityHandle, EntityId, EntitySchema, FieldMapping, FromRecord, NamedQueryDef, Record,
    Relation, RelationKind,
};
pub use model::note::{Note, NOTE_SCHEMA};
pub use model::notebook::{Notebook, NOTEBOOK_SCHEMA};
pub use query::criteria::{Comparison, CriteriaQuery};
pub use query::page::PageWindow;
pub use query::params::ParameterSet;
pub use query::path::{FieldPath, PropertyPath, QueryRoot, MAX_PATH_SEGMENTS};
pub use query::sort::{SortOrder, SortSpec};
pub use query::wildcard::{add_sql_percent_wildcards, remove_sql_percent_wildcards, SQL_WILDCARD};
pub use repo::core_repo::{FlushPolicy, Repository};
pub use repo::error::{BindingFault, RepoError, RepoResult};
pub use session::{EntityKey, FlushMode, Session};

/// Minimal health-check API.
pub fn ping() -> &'static str {
    "pong"
}

pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
