#![allow(dead_code)]

use async_trait::async_trait;
use beatmap_sync::catalog::{CatalogPage, CatalogService};
use beatmap_sync::collection::ArtifactBuilder;
use beatmap_sync::config::Validation;
use beatmap_sync::db::{self, Pool};
use beatmap_sync::error::{Result, SyncError};
use beatmap_sync::model::{Beatmap, RankedStatus, SyncCursor};
use beatmap_sync::pipeline::SyncContext;
use beatmap_sync::processor::BeatmapProcessor;
use beatmap_sync::storage::{FileStorage, LocalStorage};
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const OSU_SOURCE: &[u8] = b"osu file format v14\r\n\r\n[General]\r\nAudioFilename: audio.mp3\r\n";

pub async fn setup_pool() -> Pool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

pub fn beatmap(id: i64, status: RankedStatus) -> Beatmap {
    Beatmap {
        id,
        beatmapset_id: id / 10,
        ranked_status: status,
        mode: "osu".into(),
        version: format!("Diff {}", id),
        checksum: Some(format!("{:032x}", id)),
        total_length: 120,
        difficulty_rating: 4.5,
        last_updated: at(2024, 1, 1),
    }
}

pub fn page(beatmaps: Vec<Beatmap>, next: SyncCursor, has_more: bool) -> CatalogPage {
    CatalogPage {
        beatmaps,
        next_cursor: next,
        has_more,
    }
}

/// What the file host answers for one id.
#[derive(Debug, Clone)]
pub enum FileReply {
    Body(Vec<u8>),
    Empty,
    Fail,
}

#[derive(Clone, Default)]
pub struct RecordingCatalog {
    reject_token: bool,
    pages: Arc<Mutex<VecDeque<Result<CatalogPage>>>>,
    beatmaps: Arc<Mutex<HashMap<i64, Beatmap>>>,
    failing_lookups: Arc<Mutex<HashSet<i64>>>,
    files: Arc<Mutex<HashMap<i64, FileReply>>>,
    listed: Arc<Mutex<Vec<SyncCursor>>>,
    lookups: Arc<Mutex<Vec<i64>>>,
    downloads: Arc<Mutex<Vec<i64>>>,
}

impl RecordingCatalog {
    pub fn with_pages(pages: Vec<Result<CatalogPage>>) -> Self {
        Self {
            pages: Arc::new(Mutex::new(VecDeque::from(pages))),
            ..Default::default()
        }
    }

    pub fn rejecting_token() -> Self {
        Self {
            reject_token: true,
            ..Default::default()
        }
    }

    pub async fn add_beatmap(&self, beatmap: Beatmap) {
        self.beatmaps.lock().await.insert(beatmap.id, beatmap);
    }

    pub async fn fail_lookup(&self, id: i64) {
        self.failing_lookups.lock().await.insert(id);
    }

    pub async fn add_file(&self, id: i64, reply: FileReply) {
        self.files.lock().await.insert(id, reply);
    }

    pub async fn listed(&self) -> Vec<SyncCursor> {
        self.listed.lock().await.clone()
    }

    pub async fn lookups(&self) -> Vec<i64> {
        let mut ids = self.lookups.lock().await.clone();
        ids.sort_unstable();
        ids
    }

    pub async fn downloads(&self) -> Vec<i64> {
        self.downloads.lock().await.clone()
    }
}

#[async_trait]
impl CatalogService for RecordingCatalog {
    async fn retrieve_token(&self) -> Result<()> {
        if self.reject_token {
            return Err(SyncError::Auth("invalid client".into()));
        }
        Ok(())
    }

    async fn list_ranked(&self, cursor: &SyncCursor) -> Result<CatalogPage> {
        self.listed.lock().await.push(cursor.clone());
        let next = self.pages.lock().await.pop_front();
        next.unwrap_or_else(|| Ok(page(Vec::new(), cursor.clone(), false)))
    }

    async fn retrieve_beatmap(&self, id: i64) -> Result<Option<Beatmap>> {
        self.lookups.lock().await.push(id);
        if self.failing_lookups.lock().await.contains(&id) {
            return Err(SyncError::Transient(format!("lookup {} timed out", id)));
        }
        Ok(self.beatmaps.lock().await.get(&id).cloned())
    }

    async fn retrieve_source_file(&self, id: i64) -> Result<Option<Vec<u8>>> {
        self.downloads.lock().await.push(id);
        match self.files.lock().await.get(&id).cloned() {
            Some(FileReply::Body(bytes)) => Ok(Some(bytes)),
            Some(FileReply::Empty) => Ok(Some(Vec::new())),
            Some(FileReply::Fail) => Err(SyncError::Transient("502 bad gateway".into())),
            None => Ok(None),
        }
    }
}

#[derive(Clone, Default)]
pub struct CountingBuilder {
    rebuilds: Arc<AtomicUsize>,
}

impl CountingBuilder {
    pub fn count(&self) -> usize {
        self.rebuilds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactBuilder for CountingBuilder {
    async fn rebuild(&self) -> Result<()> {
        self.rebuilds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn rules() -> Validation {
    Validation {
        modes: vec!["osu".into()],
        min_total_length: 30,
        require_checksum: true,
    }
}

/// Storage whose writes always fail, as on a full or read-only disk.
#[derive(Clone, Default)]
pub struct FailingStorage {
    stores: Arc<AtomicUsize>,
}

impl FailingStorage {
    pub fn stores(&self) -> usize {
        self.stores.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileStorage for FailingStorage {
    async fn store(&self, _bytes: &[u8], path: &str) -> Result<()> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        Err(SyncError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("no space left for {}", path),
        )))
    }

    async fn read(&self, _path: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn delete(&self, _path: &str) -> Result<()> {
        Ok(())
    }
}

pub fn context(
    pool: &Pool,
    catalog: &RecordingCatalog,
    storage: &LocalStorage,
    builder: &CountingBuilder,
) -> SyncContext {
    context_with_storage(pool, catalog, Arc::new(storage.clone()), builder)
}

pub fn context_with_storage(
    pool: &Pool,
    catalog: &RecordingCatalog,
    storage: Arc<dyn FileStorage>,
    builder: &CountingBuilder,
) -> SyncContext {
    SyncContext::new(
        pool.clone(),
        Arc::new(catalog.clone()),
        storage,
        BeatmapProcessor::new(pool.clone(), rules()),
        Arc::new(builder.clone()),
    )
}
