use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::model::{Beatmap, RankedStatus, SyncCursor};

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: i64,
}

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub beatmapsets: Vec<ApiBeatmapset>,
    pub cursor: Option<ApiCursor>,
}

#[derive(Debug, Deserialize)]
pub struct ApiBeatmapset {
    pub id: i64,
    pub ranked_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub beatmaps: Vec<ApiBeatmap>,
}

#[derive(Debug, Deserialize)]
pub struct ApiBeatmap {
    pub id: i64,
    pub beatmapset_id: i64,
    pub mode: String,
    pub status: RankedStatus,
    pub version: String,
    pub checksum: Option<String>,
    pub total_length: i64,
    pub difficulty_rating: f64,
    pub last_updated: DateTime<Utc>,
}

/// Search cursor; the API sends its fields as numbers or strings.
#[derive(Debug, Deserialize)]
pub struct ApiCursor {
    pub approved_date: Option<Value>,
    pub id: Option<Value>,
}

impl ApiCursor {
    pub fn to_sync_cursor(&self) -> Option<SyncCursor> {
        let millis = self.approved_date.as_ref().and_then(value_as_i64)?;
        let id = self.id.as_ref().and_then(value_as_i64)?;
        let last_date = Utc.timestamp_millis_opt(millis).single()?;
        Some(SyncCursor::new(last_date, id))
    }
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

impl From<ApiBeatmap> for Beatmap {
    fn from(api: ApiBeatmap) -> Self {
        Beatmap {
            id: api.id,
            beatmapset_id: api.beatmapset_id,
            ranked_status: api.status,
            mode: api.mode,
            version: api.version,
            checksum: api.checksum,
            total_length: api.total_length,
            difficulty_rating: api.difficulty_rating,
            last_updated: api.last_updated,
        }
    }
}
