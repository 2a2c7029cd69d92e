//! The three synchronization runs and the collaborators they share.
use std::sync::Arc;

use crate::catalog::CatalogService;
use crate::collection::ArtifactBuilder;
use crate::db::Pool;
use crate::processor::BeatmapProcessor;
use crate::storage::FileStorage;

pub mod approval;
pub mod freshness;
pub mod ranked;

pub use approval::{approve_submissions, download_submission_file, ApprovalReport, Verdict};
pub use freshness::{check_submissions_last_update, FreshnessReport};
pub use ranked::{process_ranked_beatmaps, RankedSyncReport};

/// Everything a pipeline run talks to. Cheap to clone into queued tasks.
#[derive(Clone)]
pub struct SyncContext {
    pub pool: Pool,
    pub catalog: Arc<dyn CatalogService>,
    pub storage: Arc<dyn FileStorage>,
    pub processor: BeatmapProcessor,
    pub artifact: Arc<dyn ArtifactBuilder>,
}

impl SyncContext {
    pub fn new(
        pool: Pool,
        catalog: Arc<dyn CatalogService>,
        storage: Arc<dyn FileStorage>,
        processor: BeatmapProcessor,
        artifact: Arc<dyn ArtifactBuilder>,
    ) -> Self {
        Self {
            pool,
            catalog,
            storage,
            processor,
            artifact,
        }
    }
}
