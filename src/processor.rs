//! Validation and persistence of a single beatmap.
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::config::Validation;
use crate::db::{self, Pool};
use crate::error::{Result, SyncError};
use crate::model::Beatmap;

static FORMAT_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*osu file format v(\d+)").expect("valid header pattern"));

/// Checks a beatmap against the configured rules and upserts it.
#[derive(Debug, Clone)]
pub struct BeatmapProcessor {
    pool: Pool,
    rules: Arc<Validation>,
}

impl BeatmapProcessor {
    pub fn new(pool: Pool, rules: Validation) -> Self {
        Self {
            pool,
            rules: Arc::new(rules),
        }
    }

    /// Validate `beatmap` (and its `.osu` source when given) then persist it.
    /// Rule violations surface as `SyncError::Validation`.
    #[instrument(skip_all, fields(id = beatmap.id))]
    pub async fn process(&self, beatmap: &Beatmap, source: Option<&[u8]>) -> Result<()> {
        validate(&self.rules, beatmap, source)?;
        db::upsert_beatmap(&self.pool, beatmap).await?;
        debug!(status = beatmap.ranked_status.as_str(), "beatmap persisted");
        Ok(())
    }
}

fn validate(rules: &Validation, beatmap: &Beatmap, source: Option<&[u8]>) -> Result<()> {
    let reject = |reason: String| SyncError::Validation {
        id: beatmap.id,
        reason,
    };

    if !rules.modes.is_empty() && !rules.modes.iter().any(|m| m == &beatmap.mode) {
        return Err(reject(format!("mode {} is not collected", beatmap.mode)));
    }
    if beatmap.total_length < rules.min_total_length {
        return Err(reject(format!(
            "length {}s is below {}s",
            beatmap.total_length, rules.min_total_length
        )));
    }
    if rules.require_checksum && beatmap.checksum.as_deref().map_or(true, str::is_empty) {
        return Err(reject("missing checksum".into()));
    }
    if let Some(source) = source {
        if format_version(source).is_none() {
            return Err(reject("source file is not an osu! beatmap".into()));
        }
    }
    Ok(())
}

/// Version from the `osu file format vN` header, if the file has one.
pub fn format_version(source: &[u8]) -> Option<u32> {
    let source = source.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(source);
    let head = &source[..source.len().min(64)];
    let head = String::from_utf8_lossy(head);
    FORMAT_HEADER
        .captures(&head)
        .and_then(|caps| caps.get(1))
        .and_then(|v| v.as_str().parse().ok())
}
