//! Query-side value types: parameters, windows, ordering and field paths.
//!
//! # Invariants
//! - User-supplied values reach SQL only through bound parameters.
//! - Identifiers reach SQL only after schema allow-list resolution.

pub mod criteria;
pub mod page;
pub mod params;
pub mod path;
pub mod sort;
pub mod wildcard;
