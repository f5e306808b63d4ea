use shelflife_core::StoreId;

use crate::error::AnalysisError;
use crate::job::{AnalysisJob, StoreSnapshot};

/// Executor for the analysis jobs of one store.
pub trait AnalysisScheduler: Send + Sync + 'static {
    /// The only store whose jobs this scheduler accepts.
    fn store_id(&self) -> StoreId;

    /// Run `job` after checking that both the job and its snapshot belong to this store.
    fn run<J: AnalysisJob>(&self, job: J) -> Result<J::Output, AnalysisError> {
        if job.store_id() != self.store_id() {
            return Err(AnalysisError::InvalidInput(format!(
                "job for store {} submitted to the scheduler of store {}",
                job.store_id(),
                self.store_id()
            )));
        }
        if job.input().store_id() != job.store_id() {
            return Err(AnalysisError::InvalidInput(format!(
                "snapshot of store {} given to a job of store {}",
                job.input().store_id(),
                job.store_id()
            )));
        }
        job.run()
    }
}

/// Runs jobs immediately, in-process.
#[derive(Debug, Copy, Clone)]
pub struct LocalAnalysisScheduler {
    store_id: StoreId,
}

impl LocalAnalysisScheduler {
    pub fn for_store(store_id: StoreId) -> Self {
        Self { store_id }
    }
}

impl AnalysisScheduler for LocalAnalysisScheduler {
    fn store_id(&self) -> StoreId {
        self.store_id
    }
}
