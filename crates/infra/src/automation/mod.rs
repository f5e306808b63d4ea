//! Automation scheduler: drives pricing, queue processing, waste prediction and
//! correlation per store, on a cadence or on demand.

pub mod engine;
pub mod report;
pub mod runner;

pub use engine::{AutomationEngine, AutomationSettings, PricingOutcome, Repositories};
pub use report::{RunReport, Stage, StageError, StageOutcome, StageReport, StageSet};
pub use runner::{AutomationRunnerHandle, AutomationSchedule};
