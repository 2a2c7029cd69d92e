use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use super::SyncContext;
use crate::db::{self, LocalBeatmap};
use crate::error::Result;
use crate::queue::ConcurrentQueue;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreshnessReport {
    pub checked: usize,
    pub missing: usize,
    pub requeued: usize,
    pub unchanged: usize,
    pub failed: usize,
}

async fn check(
    ctx: SyncContext,
    local: LocalBeatmap,
    report: Arc<Mutex<FreshnessReport>>,
) -> Result<()> {
    let id = local.id;
    match ctx.catalog.retrieve_beatmap(id).await? {
        None => {
            db::delete_submission(&ctx.pool, id).await?;
            debug!(id, "gone upstream, submission dropped");
            report.lock().await.missing += 1;
        }
        Some(remote) if remote.last_updated > local.last_updated => {
            db::delete_submission(&ctx.pool, id).await?;
            db::create_submission(&ctx.pool, id).await?;
            info!(
                id,
                local = %local.last_updated,
                remote = %remote.last_updated,
                "updated upstream, resubmitted"
            );
            report.lock().await.requeued += 1;
        }
        Some(_) => report.lock().await.unchanged += 1,
    }
    Ok(())
}

/// Compare every local beatmap that is not ranked against the catalog and
/// turn the ones updated upstream into fresh submissions.
#[instrument(skip_all)]
pub async fn check_submissions_last_update(
    ctx: &SyncContext,
    queue: &ConcurrentQueue,
) -> Result<FreshnessReport> {
    info!("freshness check start");
    ctx.catalog.retrieve_token().await?;
    let locals = db::list_unranked_beatmaps(&ctx.pool).await?;
    let report = Arc::new(Mutex::new(FreshnessReport {
        checked: locals.len(),
        ..Default::default()
    }));

    queue.enqueue_all(
        locals
            .into_iter()
            .map(|local| check(ctx.clone(), local, report.clone())),
    );
    let drained = queue.drain().await;

    let mut report = report.lock().await.clone();
    report.failed = drained.failed;

    ctx.artifact.rebuild().await?;
    info!(
        checked = report.checked,
        requeued = report.requeued,
        missing = report.missing,
        failed = report.failed,
        "freshness check end"
    );
    Ok(report)
}
