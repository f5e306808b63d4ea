use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shelflife_analytics::AnalysisError;
use shelflife_core::StoreId;

use crate::repository::RepositoryError;
use crate::sync::{BatchOutcome, SyncStoreError};

/// Independently failing parts of an automation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pricing,
    Sync,
    Waste,
    Correlation,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pricing => "pricing",
            Stage::Sync => "sync",
            Stage::Waste => "waste",
            Stage::Correlation => "correlation",
        }
    }
}

/// Which stages a run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSet {
    pub pricing: bool,
    pub sync: bool,
    pub waste: bool,
    pub correlation: bool,
}

impl StageSet {
    pub const ALL: StageSet = StageSet {
        pricing: true,
        sync: true,
        waste: true,
        correlation: true,
    };

    pub const PRICING: StageSet = StageSet {
        pricing: true,
        sync: true,
        waste: false,
        correlation: false,
    };

    pub const WASTE: StageSet = StageSet {
        pricing: false,
        sync: false,
        waste: true,
        correlation: false,
    };

    pub const CORRELATION: StageSet = StageSet {
        pricing: false,
        sync: false,
        waste: false,
        correlation: true,
    };

    pub fn union(self, other: StageSet) -> StageSet {
        StageSet {
            pricing: self.pricing || other.pricing,
            sync: self.sync || other.sync,
            waste: self.waste || other.waste,
            correlation: self.correlation || other.correlation,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.pricing || self.sync || self.waste || self.correlation)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StageError {
    #[error("repository: {0}")]
    Repository(#[from] RepositoryError),
    #[error("analysis: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("sync queue: {0}")]
    Queue(#[from] SyncStoreError),
    /// The stage task panicked or was cancelled by the runtime.
    #[error("stage aborted: {0}")]
    Aborted(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StageOutcome {
    /// `count`: products repriced, items delivered, predictions or pairs written.
    Ok { count: usize },
    Failed { error: String },
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    #[serde(flatten)]
    pub outcome: StageOutcome,
}

/// Summary of one automation pass for one store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub store_id: StoreId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub updated_count: usize,
    /// Names of the repriced products.
    pub products: Vec<String>,
    pub stages: Vec<StageReport>,
    pub sync: Option<BatchOutcome>,
}

impl RunReport {
    pub fn stage(&self, stage: Stage) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.stage == stage).map(|s| &s.outcome)
    }

    pub fn failed_stages(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| matches!(s.outcome, StageOutcome::Failed { .. }))
            .count()
    }
}
