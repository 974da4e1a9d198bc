//! Repository layer: generic data access plus its error taxonomy.
//!
//! # Invariants
//! - Repositories never own the connection; they borrow one `Session`.
//! - Engine faults surface as `RepoError::Db`, never as panics.

pub mod core_repo;
pub mod error;
