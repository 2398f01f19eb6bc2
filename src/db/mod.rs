//! Database module: pool setup and SQL repositories.
//!
//! `repo` holds SQL-only functions that map rows into the domain entities
//! declared in `crate::model`. Higher layers (ledger, appointment store)
//! wrap these functions behind the collaborator traits; business decisions
//! stay out of here.

pub mod repo;

// Re-export the repository API at `crate::db::*` for convenience.
pub use repo::*;
