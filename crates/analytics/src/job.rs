use shelflife_core::StoreId;

use crate::error::AnalysisError;

/// A caller-supplied snapshot that belongs to exactly one store.
pub trait StoreSnapshot {
    fn store_id(&self) -> StoreId;
}

/// A store-scoped analysis unit.
///
/// Inputs are snapshots supplied by callers; the job never reads storage itself and
/// never mutates catalog state.
pub trait AnalysisJob: Send + Sync + 'static {
    type Input: StoreSnapshot + Send + Sync + 'static;
    type Output: Send + 'static;

    /// The store this job belongs to.
    fn store_id(&self) -> StoreId;

    /// The snapshot the job analyses.
    fn input(&self) -> &Self::Input;

    /// Execute the analysis.
    fn run(&self) -> Result<Self::Output, AnalysisError>;
}
