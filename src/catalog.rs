//! Remote catalog contract and the cursor-driven pager over it.
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::model::{Beatmap, SyncCursor};

/// One page of the ranked catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogPage {
    pub beatmaps: Vec<Beatmap>,
    /// Cursor to resume from once this page has been processed.
    pub next_cursor: SyncCursor,
    pub has_more: bool,
}

impl CatalogPage {
    /// A page may be empty while more remain, so both must hold.
    pub fn is_exhausted(&self) -> bool {
        self.beatmaps.is_empty() && !self.has_more
    }
}

#[async_trait]
pub trait CatalogService: Send + Sync {
    /// Acquire (or refresh) the access token. Failures are `SyncError::Auth`.
    async fn retrieve_token(&self) -> Result<()>;

    async fn list_ranked(&self, cursor: &SyncCursor) -> Result<CatalogPage>;

    /// `None` when the beatmap no longer exists upstream.
    async fn retrieve_beatmap(&self, id: i64) -> Result<Option<Beatmap>>;

    /// Raw `.osu` file; `None` when the host answers with an empty body.
    async fn retrieve_source_file(&self, id: i64) -> Result<Option<Vec<u8>>>;
}

/// Walks the ranked catalog page by page from a starting cursor.
pub struct CatalogPager {
    catalog: Arc<dyn CatalogService>,
    cursor: SyncCursor,
    pages: usize,
}

impl CatalogPager {
    pub fn new(catalog: Arc<dyn CatalogService>, cursor: SyncCursor) -> Self {
        Self {
            catalog,
            cursor,
            pages: 0,
        }
    }

    /// Cursor the next fetch will start from.
    pub fn cursor(&self) -> &SyncCursor {
        &self.cursor
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Fetch the next page, or `None` once the catalog is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<CatalogPage>> {
        let page = self.catalog.list_ranked(&self.cursor).await?;
        debug!(
            items = page.beatmaps.len(),
            has_more = page.has_more,
            last_beatmapset = page.next_cursor.last_beatmapset,
            "fetched catalog page"
        );
        if page.is_exhausted() {
            return Ok(None);
        }
        if page.has_more && page.next_cursor == self.cursor {
            return Err(SyncError::Transient(format!(
                "catalog cursor stalled at beatmapset {}",
                self.cursor.last_beatmapset
            )));
        }
        self.cursor = page.next_cursor.clone();
        self.pages += 1;
        Ok(Some(page))
    }
}
