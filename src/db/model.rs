//! View models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! lives in the pipelines.

use chrono::{DateTime, Utc};

use crate::model::RankedStatus;

/// Local beatmap slice compared against the remote catalog by the freshness check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalBeatmap {
    pub id: i64,
    pub last_updated: DateTime<Utc>,
}

/// Beatmap slice written into the collection artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionEntry {
    pub ranked_status: RankedStatus,
    pub checksum: String,
}
