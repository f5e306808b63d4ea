//! `shelflife-analytics`
//!
//! **Responsibility:** heuristic analyses over catalog and order snapshots.
//!
//! - Waste prediction: per-product waste quantity/value, cause and confidence.
//! - Weekly trend: bucketing of stored predictions for reporting.
//! - Co-purchase correlation: product pairs bought together.
//!
//! Jobs are storage-agnostic and side-effect free: callers (infra) load the inputs and
//! persist the outputs.

pub mod correlation;
pub mod error;
pub mod job;
pub mod scheduler;
pub mod trend;
pub mod waste;

pub use correlation::{
    analyze_co_purchases, CoPurchase, CorrelationJob, OrderHistory, ProductCorrelation,
    ProductPair, DEFAULT_MIN_FREQUENCY, DEFAULT_TOP_N,
};
pub use error::AnalysisError;
pub use job::{AnalysisJob, StoreSnapshot};
pub use scheduler::{AnalysisScheduler, LocalAnalysisScheduler};
pub use trend::{weekly_trend, week_start, WeeklyWastePoint};
pub use waste::{
    predict, predict_product, PredictionRun, WasteCause, WastePrediction, WastePredictionJob,
    WasteSnapshot, DEFAULT_HORIZON_DAYS,
};
