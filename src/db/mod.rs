//! Database module: view models and SQL repositories.
//!
//! - `model`: slim view models returned by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! External modules import from `beatmap_sync::db`; the repository API is
//! re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{CollectionEntry, LocalBeatmap};
