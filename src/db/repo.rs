use super::model::{CollectionEntry, LocalBeatmap};
use crate::error::{Result, SyncError};
use crate::model::{ApprovedStatus, Beatmap, RankedStatus, Submission, SyncCursor};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{}", expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(sqlx::Error::from)?;
    Ok(())
}

/// Drop every beatmap and submission and rewind the cursor to its initial value.
#[instrument(skip_all)]
pub async fn reset(pool: &Pool) -> Result<()> {
    let initial = SyncCursor::default();
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM submissions")
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM beatmaps").execute(&mut *tx).await?;
    sqlx::query(
        "UPDATE sync_state SET last_date = ?, last_beatmapset = ?, updated_at = CURRENT_TIMESTAMP WHERE id = 1",
    )
    .bind(initial.last_date)
    .bind(initial.last_beatmapset)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn retrieve_state(pool: &Pool) -> Result<SyncCursor> {
    let row: Option<(DateTime<Utc>, i64)> =
        sqlx::query_as("SELECT last_date, last_beatmapset FROM sync_state WHERE id = 1")
            .fetch_optional(pool)
            .await?;
    Ok(row
        .map(|(last_date, last_beatmapset)| SyncCursor::new(last_date, last_beatmapset))
        .unwrap_or_default())
}

#[instrument(skip_all, fields(last_beatmapset = cursor.last_beatmapset))]
pub async fn update_state(pool: &Pool, cursor: &SyncCursor) -> Result<()> {
    sqlx::query(
        "INSERT INTO sync_state (id, last_date, last_beatmapset) VALUES (1, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET last_date = excluded.last_date, \
         last_beatmapset = excluded.last_beatmapset, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(cursor.last_date)
    .bind(cursor.last_beatmapset)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all, fields(id = beatmap.id))]
pub async fn upsert_beatmap(pool: &Pool, beatmap: &Beatmap) -> Result<()> {
    sqlx::query(
        "INSERT INTO beatmaps (id, beatmapset_id, ranked_status, mode, version, checksum, total_length, difficulty_rating, last_updated) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET beatmapset_id = excluded.beatmapset_id, \
         ranked_status = excluded.ranked_status, mode = excluded.mode, version = excluded.version, \
         checksum = excluded.checksum, total_length = excluded.total_length, \
         difficulty_rating = excluded.difficulty_rating, last_updated = excluded.last_updated, \
         updated_at = CURRENT_TIMESTAMP",
    )
    .bind(beatmap.id)
    .bind(beatmap.beatmapset_id)
    .bind(beatmap.ranked_status.as_str())
    .bind(&beatmap.mode)
    .bind(&beatmap.version)
    .bind(beatmap.checksum.as_deref())
    .bind(beatmap.total_length)
    .bind(beatmap.difficulty_rating)
    .bind(beatmap.last_updated)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_beatmap(pool: &Pool, id: i64) -> Result<Option<Beatmap>> {
    let row = sqlx::query(
        "SELECT id, beatmapset_id, ranked_status, mode, version, checksum, total_length, difficulty_rating, last_updated \
         FROM beatmaps WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(beatmap_from_row).transpose()
}

fn beatmap_from_row(row: &SqliteRow) -> Result<Beatmap> {
    let id: i64 = row.try_get("id")?;
    let status: String = row.try_get("ranked_status")?;
    Ok(Beatmap {
        id,
        beatmapset_id: row.try_get("beatmapset_id")?,
        ranked_status: parse_ranked_status(id, &status)?,
        mode: row.try_get("mode")?,
        version: row.try_get("version")?,
        checksum: row.try_get("checksum")?,
        total_length: row.try_get("total_length")?,
        difficulty_rating: row.try_get("difficulty_rating")?,
        last_updated: row.try_get("last_updated")?,
    })
}

fn parse_ranked_status(id: i64, status: &str) -> Result<RankedStatus> {
    RankedStatus::parse_status(status).ok_or_else(|| {
        SyncError::Database(sqlx::Error::Decode(
            format!("beatmap {} has unknown ranked status {}", id, status).into(),
        ))
    })
}

/// Every beatmap whose status is not `ranked`, ordered by id.
#[instrument(skip_all)]
pub async fn list_unranked_beatmaps(pool: &Pool) -> Result<Vec<LocalBeatmap>> {
    let rows: Vec<(i64, DateTime<Utc>)> = sqlx::query_as(
        "SELECT id, last_updated FROM beatmaps WHERE ranked_status != ? ORDER BY id",
    )
    .bind(RankedStatus::Ranked.as_str())
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(id, last_updated)| LocalBeatmap { id, last_updated })
        .collect())
}

#[instrument(skip_all)]
pub async fn list_collection_entries(pool: &Pool) -> Result<Vec<CollectionEntry>> {
    let rows = sqlx::query(
        "SELECT id, ranked_status, checksum FROM beatmaps WHERE checksum IS NOT NULL AND checksum != '' ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    rows.iter()
        .map(|row| {
            let id: i64 = row.try_get("id")?;
            let status: String = row.try_get("ranked_status")?;
            Ok(CollectionEntry {
                ranked_status: parse_ranked_status(id, &status)?,
                checksum: row.try_get("checksum")?,
            })
        })
        .collect()
}

/// Submissions in `status`, ordered by id.
#[instrument(skip_all, fields(status = status.as_str()))]
pub async fn list_submissions(pool: &Pool, status: ApprovedStatus) -> Result<Vec<Submission>> {
    let rows: Vec<(i64, String, DateTime<Utc>)> = sqlx::query_as(
        "SELECT id, approved_status, created_at FROM submissions WHERE approved_status = ? ORDER BY id",
    )
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|(id, approved_status, created_at)| {
            let approved_status = ApprovedStatus::parse_status(&approved_status).ok_or_else(|| {
                SyncError::Database(sqlx::Error::Decode(
                    format!("submission {} has unknown status {}", id, approved_status).into(),
                ))
            })?;
            Ok(Submission {
                id,
                approved_status,
                created_at,
            })
        })
        .collect()
}

/// Create (or reset) a pending submission for beatmap `id`.
#[instrument(skip_all, fields(id = id))]
pub async fn create_submission(pool: &Pool, id: i64) -> Result<()> {
    sqlx::query(
        "INSERT INTO submissions (id, approved_status) VALUES (?, ?) \
         ON CONFLICT(id) DO UPDATE SET approved_status = excluded.approved_status, created_at = CURRENT_TIMESTAMP",
    )
    .bind(id)
    .bind(ApprovedStatus::PendingApproved.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

/// Returns the number of rows removed (0 or 1).
#[instrument(skip_all, fields(id = id))]
pub async fn delete_submission(pool: &Pool, id: i64) -> Result<u64> {
    let result = sqlx::query("DELETE FROM submissions WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn submission_exists(pool: &Pool, id: i64) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM submissions WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

#[instrument(skip_all)]
pub async fn count_submissions(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM submissions")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_pool() -> Pool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn beatmap(id: i64, status: RankedStatus) -> Beatmap {
        Beatmap {
            id,
            beatmapset_id: id / 10,
            ranked_status: status,
            mode: "osu".into(),
            version: "Insane".into(),
            checksum: Some(format!("{:032x}", id)),
            total_length: 120,
            difficulty_rating: 5.25,
            last_updated: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn state_starts_at_seed_and_follows_updates() {
        let pool = setup_pool().await;
        assert_eq!(retrieve_state(&pool).await.unwrap(), SyncCursor::default());

        let cursor = SyncCursor::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(), 1000);
        update_state(&pool, &cursor).await.unwrap();
        assert_eq!(retrieve_state(&pool).await.unwrap(), cursor);

        reset(&pool).await.unwrap();
        assert_eq!(retrieve_state(&pool).await.unwrap(), SyncCursor::default());
    }

    #[tokio::test]
    async fn upsert_replaces_existing_beatmap() {
        let pool = setup_pool().await;
        let mut map = beatmap(7, RankedStatus::Pending);
        upsert_beatmap(&pool, &map).await.unwrap();
        map.ranked_status = RankedStatus::Ranked;
        map.version = "Extra".into();
        upsert_beatmap(&pool, &map).await.unwrap();

        let stored = fetch_beatmap(&pool, 7).await.unwrap().unwrap();
        assert_eq!(stored, map);
        assert!(fetch_beatmap(&pool, 8).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unranked_listing_skips_ranked_beatmaps() {
        let pool = setup_pool().await;
        upsert_beatmap(&pool, &beatmap(1, RankedStatus::Ranked)).await.unwrap();
        upsert_beatmap(&pool, &beatmap(2, RankedStatus::Pending)).await.unwrap();
        upsert_beatmap(&pool, &beatmap(3, RankedStatus::Loved)).await.unwrap();

        let ids: Vec<i64> = list_unranked_beatmaps(&pool)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn submissions_create_list_delete() {
        let pool = setup_pool().await;
        create_submission(&pool, 42).await.unwrap();
        create_submission(&pool, 7).await.unwrap();
        // Re-creating resets instead of failing.
        create_submission(&pool, 42).await.unwrap();

        let pending = list_submissions(&pool, ApprovedStatus::PendingApproved)
            .await
            .unwrap();
        let ids: Vec<i64> = pending.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![7, 42]);
        assert!(list_submissions(&pool, ApprovedStatus::Rejected)
            .await
            .unwrap()
            .is_empty());

        assert_eq!(delete_submission(&pool, 42).await.unwrap(), 1);
        assert_eq!(delete_submission(&pool, 42).await.unwrap(), 0);
        assert!(!submission_exists(&pool, 42).await.unwrap());
        assert_eq!(count_submissions(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn collection_entries_require_checksum() {
        let pool = setup_pool().await;
        upsert_beatmap(&pool, &beatmap(1, RankedStatus::Ranked)).await.unwrap();
        let mut no_checksum = beatmap(2, RankedStatus::Ranked);
        no_checksum.checksum = None;
        upsert_beatmap(&pool, &no_checksum).await.unwrap();

        let entries = list_collection_entries(&pool).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].ranked_status, RankedStatus::Ranked);
    }

    #[test]
    fn memory_urls_pass_through() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("postgres://localhost/db"),
            "postgres://localhost/db"
        );
    }

    #[test]
    fn file_urls_keep_query() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("nested").join("beatmaps.db");
        let url = format!("sqlite://{}?mode=rwc", path.display());
        assert_eq!(prepare_sqlite_url(&url), url);
        assert!(path.parent().unwrap().exists());
    }
}
