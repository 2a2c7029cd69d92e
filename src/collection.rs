//! Regenerates the osu! `collection.db` artifact from the local beatmap table.
//!
//! Layout (little-endian): `i32` version, `i32` collection count, then per
//! collection an osu string name, an `i32` beatmap count and one osu string
//! MD5 checksum per beatmap. An osu string is `0x0b`, the ULEB128 byte length,
//! then UTF-8 bytes.
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, instrument};

use crate::db::{self, CollectionEntry, Pool};
use crate::error::{Result, SyncError};
use crate::model::RankedStatus;

pub const COLLECTION_DB_VERSION: i32 = 20150203;

/// Rebuilds a derived output after every pipeline run.
#[async_trait]
pub trait ArtifactBuilder: Send + Sync {
    async fn rebuild(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub name: String,
    pub checksums: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CollectionFile {
    pool: Pool,
    path: PathBuf,
    prefix: String,
}

impl CollectionFile {
    pub fn new(pool: Pool, path: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            path: path.into(),
            prefix: prefix.into(),
        }
    }
}

#[async_trait]
impl ArtifactBuilder for CollectionFile {
    #[instrument(skip_all, fields(path = %self.path.display()))]
    async fn rebuild(&self) -> Result<()> {
        let entries = db::list_collection_entries(&self.pool)
            .await
            .map_err(|err| SyncError::Build(err.to_string()))?;
        let beatmaps = entries.len();
        let collections = group_by_status(&self.prefix, entries);
        let bytes = encode_collection_db(COLLECTION_DB_VERSION, &collections)?;

        let build_err = |err: std::io::Error| SyncError::Build(err.to_string());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(build_err)?;
        }
        let staging = self.path.with_extension("tmp");
        fs::write(&staging, &bytes).await.map_err(build_err)?;
        fs::rename(&staging, &self.path).await.map_err(build_err)?;

        info!(
            collections = collections.len(),
            beatmaps,
            "collection file rebuilt"
        );
        Ok(())
    }
}

/// One collection per ranked status, in status order.
pub fn group_by_status(prefix: &str, entries: Vec<CollectionEntry>) -> Vec<Collection> {
    let mut grouped: BTreeMap<RankedStatus, Vec<String>> = BTreeMap::new();
    for entry in entries {
        grouped
            .entry(entry.ranked_status)
            .or_default()
            .push(entry.checksum);
    }
    grouped
        .into_iter()
        .map(|(status, checksums)| Collection {
            name: format!("{} {}", prefix, status.as_str()).trim().to_string(),
            checksums,
        })
        .collect()
}

pub fn encode_collection_db(version: i32, collections: &[Collection]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&version.to_le_bytes());
    write_count(&mut buf, collections.len())?;
    for collection in collections {
        write_osu_string(&mut buf, &collection.name);
        write_count(&mut buf, collection.checksums.len())?;
        for checksum in &collection.checksums {
            write_osu_string(&mut buf, checksum);
        }
    }
    Ok(buf)
}

fn write_count(buf: &mut Vec<u8>, count: usize) -> Result<()> {
    let count = i32::try_from(count)
        .map_err(|_| SyncError::Build(format!("{} entries do not fit a collection", count)))?;
    buf.extend_from_slice(&count.to_le_bytes());
    Ok(())
}

fn write_osu_string(buf: &mut Vec<u8>, value: &str) {
    buf.push(0x0b);
    write_uleb128(buf, value.len());
    buf.extend_from_slice(value.as_bytes());
}

fn write_uleb128(buf: &mut Vec<u8>, mut value: usize) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}
