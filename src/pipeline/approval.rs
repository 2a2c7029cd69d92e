//! Two-stage review of pending submissions: throttled downloads, then
//! validation and promotion.
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::SyncContext;
use crate::db;
use crate::error::{Result, SyncError};
use crate::model::{ApprovedStatus, DownloadOutcome, RankedStatus};
use crate::queue::{ConcurrentQueue, RateLimitedQueue};
use crate::storage::source_file_path;

/// What stage 2 decided for one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Valid and ranked; the submission and its file are gone.
    Promoted,
    /// Valid but not ranked; the submission is gone, the file stays.
    Dismissed,
    /// Broke a validation rule; the submission is gone, the file stays.
    Rejected,
    /// No longer listed upstream; left as is.
    Missing,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApprovalReport {
    pub pending: usize,
    pub deleted: usize,
    pub postponed: usize,
    pub promoted: usize,
    pub dismissed: usize,
    pub rejected: usize,
    pub missing: usize,
    /// Tasks that failed in either stage.
    pub failed: usize,
}

type Outcomes = Arc<Mutex<HashMap<i64, DownloadOutcome>>>;
type Verdicts = Arc<Mutex<HashMap<i64, Verdict>>>;

/// Fetch and store the source file of submission `id`. Never fails: any
/// remote or storage error postpones the submission.
pub async fn download_submission_file(ctx: &SyncContext, id: i64) -> DownloadOutcome {
    match ctx.catalog.retrieve_source_file(id).await {
        Ok(Some(bytes)) if !bytes.is_empty() => {
            match ctx.storage.store(&bytes, &source_file_path(id)).await {
                Ok(()) => DownloadOutcome::Process,
                Err(err) => {
                    warn!(id, error = %err, "could not store source file, postponing");
                    DownloadOutcome::Postponed
                }
            }
        }
        Ok(_) => DownloadOutcome::Delete,
        Err(err) => {
            warn!(id, error = %err, "download failed, postponing");
            DownloadOutcome::Postponed
        }
    }
}

async fn classify(ctx: SyncContext, id: i64, outcomes: Outcomes) -> Result<()> {
    let outcome = download_submission_file(&ctx, id).await;
    // A failed delete records nothing, so the submission counts as postponed.
    if outcome == DownloadOutcome::Delete {
        db::delete_submission(&ctx.pool, id).await?;
        info!(id, "source file gone upstream, submission deleted");
    }
    outcomes.lock().await.insert(id, outcome);
    Ok(())
}

async fn review(ctx: SyncContext, id: i64, verdicts: Verdicts) -> Result<()> {
    let Some(beatmap) = ctx.catalog.retrieve_beatmap(id).await? else {
        debug!(id, "beatmap missing upstream, skipping");
        verdicts.lock().await.insert(id, Verdict::Missing);
        return Ok(());
    };

    let path = source_file_path(id);
    let source = ctx.storage.read(&path).await?.ok_or_else(|| {
        SyncError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("stored source file {} vanished", path),
        ))
    })?;

    let verdict = match ctx.processor.process(&beatmap, Some(source.as_slice())).await {
        Ok(()) if beatmap.ranked_status == RankedStatus::Ranked => {
            if db::delete_submission(&ctx.pool, id).await? > 0 {
                ctx.storage.delete(&path).await?;
            }
            Verdict::Promoted
        }
        Ok(()) => {
            db::delete_submission(&ctx.pool, id).await?;
            Verdict::Dismissed
        }
        Err(err) if err.is_validation() => {
            info!(id, "{}", err);
            db::delete_submission(&ctx.pool, id).await?;
            Verdict::Rejected
        }
        Err(err) => return Err(err),
    };
    debug!(id, ?verdict, "submission reviewed");
    verdicts.lock().await.insert(id, verdict);
    Ok(())
}

/// Review every pending submission: download its source file on the
/// throttled `downloads` queue, then validate and promote or discard it on
/// `processing`. Postponed submissions wait for the next run.
#[instrument(skip_all)]
pub async fn approve_submissions(
    ctx: &SyncContext,
    downloads: &RateLimitedQueue,
    processing: &ConcurrentQueue,
) -> Result<ApprovalReport> {
    info!("submission approval start");
    ctx.catalog.retrieve_token().await?;
    let submissions = db::list_submissions(&ctx.pool, ApprovedStatus::PendingApproved).await?;
    let mut report = ApprovalReport {
        pending: submissions.len(),
        ..Default::default()
    };

    let outcomes: Outcomes = Arc::new(Mutex::new(HashMap::new()));
    downloads.enqueue_all(
        submissions
            .iter()
            .map(|s| classify(ctx.clone(), s.id, outcomes.clone())),
    );
    report.failed += downloads.drain().await.failed;

    let outcomes = std::mem::take(&mut *outcomes.lock().await);
    let mut ready = Vec::new();
    for submission in &submissions {
        // A task that never recorded an outcome (timeout, panic) is retried later.
        match outcomes
            .get(&submission.id)
            .copied()
            .unwrap_or(DownloadOutcome::Postponed)
        {
            DownloadOutcome::Delete => report.deleted += 1,
            DownloadOutcome::Postponed => report.postponed += 1,
            DownloadOutcome::Process => ready.push(submission.id),
        }
    }
    info!(
        ready = ready.len(),
        deleted = report.deleted,
        postponed = report.postponed,
        "downloads classified"
    );

    let verdicts: Verdicts = Arc::new(Mutex::new(HashMap::new()));
    processing.enqueue_all(
        ready
            .into_iter()
            .map(|id| review(ctx.clone(), id, verdicts.clone())),
    );
    report.failed += processing.drain().await.failed;

    for verdict in verdicts.lock().await.values() {
        match verdict {
            Verdict::Promoted => report.promoted += 1,
            Verdict::Dismissed => report.dismissed += 1,
            Verdict::Rejected => report.rejected += 1,
            Verdict::Missing => report.missing += 1,
        }
    }

    ctx.artifact.rebuild().await?;
    info!(
        pending = report.pending,
        promoted = report.promoted,
        dismissed = report.dismissed,
        rejected = report.rejected,
        failed = report.failed,
        "submission approval end"
    );
    Ok(report)
}
