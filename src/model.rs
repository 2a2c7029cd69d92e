use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RankedStatus {
    Graveyard,
    Wip,
    Pending,
    Ranked,
    Approved,
    Qualified,
    Loved,
}

impl RankedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankedStatus::Graveyard => "graveyard",
            RankedStatus::Wip => "wip",
            RankedStatus::Pending => "pending",
            RankedStatus::Ranked => "ranked",
            RankedStatus::Approved => "approved",
            RankedStatus::Qualified => "qualified",
            RankedStatus::Loved => "loved",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "graveyard" => Some(RankedStatus::Graveyard),
            "wip" => Some(RankedStatus::Wip),
            "pending" => Some(RankedStatus::Pending),
            "ranked" => Some(RankedStatus::Ranked),
            "approved" => Some(RankedStatus::Approved),
            "qualified" => Some(RankedStatus::Qualified),
            "loved" => Some(RankedStatus::Loved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovedStatus {
    PendingApproved,
    Approved,
    Rejected,
}

impl ApprovedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovedStatus::PendingApproved => "pending_approved",
            ApprovedStatus::Approved => "approved",
            ApprovedStatus::Rejected => "rejected",
        }
    }

    pub fn parse_status(s: &str) -> Option<Self> {
        match s {
            "pending_approved" => Some(ApprovedStatus::PendingApproved),
            "approved" => Some(ApprovedStatus::Approved),
            "rejected" => Some(ApprovedStatus::Rejected),
            _ => None,
        }
    }
}

/// Result of fetching a submission's source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The file no longer exists upstream; the submission is dropped.
    Delete,
    /// The file was stored locally and is ready for review.
    Process,
    /// Transient failure; the submission waits for a later run.
    Postponed,
}

/// Resumable position in the ranked catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub last_date: DateTime<Utc>,
    pub last_beatmapset: i64,
}

impl SyncCursor {
    pub fn new(last_date: DateTime<Utc>, last_beatmapset: i64) -> Self {
        Self {
            last_date,
            last_beatmapset,
        }
    }
}

impl Default for SyncCursor {
    /// Position before the first ranked beatmapset.
    fn default() -> Self {
        let last_date = Utc
            .with_ymd_and_hms(2007, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default();
        Self::new(last_date, 0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beatmap {
    pub id: i64,
    pub beatmapset_id: i64,
    pub ranked_status: RankedStatus,
    pub mode: String,
    pub version: String,
    pub checksum: Option<String>,
    pub total_length: i64,
    pub difficulty_rating: f64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub approved_status: ApprovedStatus,
    pub created_at: DateTime<Utc>,
}
