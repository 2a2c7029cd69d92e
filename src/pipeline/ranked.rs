use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::SyncContext;
use crate::catalog::CatalogPager;
use crate::db;
use crate::error::Result;
use crate::model::SyncCursor;
use crate::queue::ConcurrentQueue;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankedSyncReport {
    pub pages: usize,
    pub processed: usize,
    /// Beatmaps the processor rejected; not counted as failures.
    pub skipped: usize,
    pub failed: usize,
    /// Cursor persisted by the last checkpoint, if any page was drained.
    pub cursor: Option<SyncCursor>,
}

/// Walk the ranked catalog from the stored cursor, processing every beatmap
/// and checkpointing the cursor after each drained page.
#[instrument(skip_all)]
pub async fn process_ranked_beatmaps(
    ctx: &SyncContext,
    queue: &ConcurrentQueue,
) -> Result<RankedSyncReport> {
    info!("ranked sync start");
    ctx.catalog.retrieve_token().await?;
    let start = db::retrieve_state(&ctx.pool).await?;
    debug!(last_date = %start.last_date, last_beatmapset = start.last_beatmapset, "resuming");

    let mut pager = CatalogPager::new(ctx.catalog.clone(), start);
    let mut report = RankedSyncReport::default();
    let skipped = Arc::new(AtomicUsize::new(0));

    while let Some(page) = pager.next_page().await? {
        let items = page.beatmaps.len();
        queue.enqueue_all(page.beatmaps.into_iter().map(|beatmap| {
            let processor = ctx.processor.clone();
            let skipped = skipped.clone();
            async move {
                match processor.process(&beatmap, None).await {
                    Err(err) if err.is_validation() => {
                        debug!(id = beatmap.id, "{}", err);
                        skipped.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                    other => other,
                }
            }
        }));
        let drained = queue.drain().await;

        db::update_state(&ctx.pool, &page.next_cursor).await?;
        report.pages += 1;
        report.processed += drained.succeeded;
        report.failed += drained.failed;
        info!(
            page = report.pages,
            items,
            failed = drained.failed,
            last_beatmapset = page.next_cursor.last_beatmapset,
            "page checkpointed"
        );
        report.cursor = Some(page.next_cursor);
    }

    let skipped = skipped.load(Ordering::SeqCst);
    report.processed -= skipped.min(report.processed);
    report.skipped = skipped;

    ctx.artifact.rebuild().await?;
    info!(
        pages = report.pages,
        processed = report.processed,
        skipped = report.skipped,
        failed = report.failed,
        "ranked sync end"
    );
    Ok(report)
}
