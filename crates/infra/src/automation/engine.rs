//! One automation pass: pricing, queue processing, waste prediction, correlation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use shelflife_analytics::{
    AnalysisScheduler, CorrelationJob, LocalAnalysisScheduler, OrderHistory, PredictionRun,
    WastePredictionJob, WasteSnapshot, DEFAULT_HORIZON_DAYS, DEFAULT_MIN_FREQUENCY, DEFAULT_TOP_N,
};
use shelflife_core::StoreId;
use shelflife_pricing::{default_rules, find_overlaps, PriceChange, PricingEngine, PricingRule};

use crate::notify::{EngineEvent, EventSink};
use crate::repository::{
    CorrelationRepository, OrderRepository, PredictionRepository, ProductRepository,
    RuleRepository,
};
use crate::sync::{BatchOutcome, SyncQueueProcessor};

use super::report::{RunReport, Stage, StageError, StageOutcome, StageReport, StageSet};

#[derive(Debug, Clone)]
pub struct AutomationSettings {
    pub horizon_days: u32,
    pub correlation_top_n: usize,
    pub correlation_min_frequency: u32,
    /// Items processed per scheduled queue batch.
    pub sync_batch: usize,
    /// Seed the default rule set for stores that have no rules.
    pub seed_default_rules: bool,
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self {
            horizon_days: DEFAULT_HORIZON_DAYS,
            correlation_top_n: DEFAULT_TOP_N,
            correlation_min_frequency: DEFAULT_MIN_FREQUENCY,
            sync_batch: 50,
            seed_default_rules: true,
        }
    }
}

/// Repositories the engine works against.
#[derive(Clone)]
pub struct Repositories {
    pub products: Arc<dyn ProductRepository>,
    pub rules: Arc<dyn RuleRepository>,
    pub predictions: Arc<dyn PredictionRepository>,
    pub correlations: Arc<dyn CorrelationRepository>,
    pub orders: Arc<dyn OrderRepository>,
}

/// Result of the pricing stage.
#[derive(Debug, Clone, Default)]
pub struct PricingOutcome {
    pub applied: Vec<PriceChange>,
    pub enqueued: usize,
}

/// Pricing & waste-risk automation for any store.
///
/// Stages never share a failure: each returns its own `Result`, and `run_once` reports
/// them side by side. Runs of the same store are serialized; different stores run in
/// parallel.
pub struct AutomationEngine {
    repos: Repositories,
    processor: SyncQueueProcessor,
    sink: Arc<dyn EventSink>,
    pricing: PricingEngine,
    settings: AutomationSettings,
    run_locks: Mutex<HashMap<StoreId, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for AutomationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationEngine")
            .field("processor", &self.processor)
            .field("pricing", &self.pricing)
            .field("settings", &self.settings)
            .finish()
    }
}

impl AutomationEngine {
    pub fn new(
        repos: Repositories,
        processor: SyncQueueProcessor,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            repos,
            processor,
            sink,
            pricing: PricingEngine::new(),
            settings: AutomationSettings::default(),
            run_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_pricing(mut self, pricing: PricingEngine) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_settings(mut self, settings: AutomationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    pub fn processor(&self) -> &SyncQueueProcessor {
        &self.processor
    }

    pub fn settings(&self) -> &AutomationSettings {
        &self.settings
    }

    /// Active rules of the store, seeding the default set when the store has none.
    pub async fn load_rules(&self, store_id: StoreId) -> Result<Vec<PricingRule>, StageError> {
        let all = self.repos.rules.list_rules(store_id).await?;
        if all.is_empty() && self.settings.seed_default_rules {
            info!(store = %store_id, "no pricing rules configured, seeding defaults");
            for rule in default_rules(store_id) {
                self.repos.rules.save_rule(rule).await?;
            }
        }
        Ok(self.repos.rules.active_rules(store_id).await?)
    }

    /// Evaluate rules, enqueue one sync item per target, then write the new price.
    ///
    /// The price is written only once its sync items are durable: if the enqueue fails the
    /// product keeps its old price, so the next run sees the same change and queues it again.
    pub async fn run_pricing(
        &self,
        store_id: StoreId,
        now: DateTime<Utc>,
    ) -> Result<PricingOutcome, StageError> {
        let rules = self.load_rules(store_id).await?;
        for overlap in find_overlaps(&rules) {
            warn!(
                store = %store_id,
                first = %overlap.first_name,
                second = %overlap.second_name,
                "overlapping pricing rules; smallest min_days wins"
            );
        }

        let products = self.repos.products.list_products(store_id).await?;
        let changes = self.pricing.evaluate(&products, &rules, now);

        let mut outcome = PricingOutcome::default();
        for change in changes {
            let ids = self.processor.enqueue_changes(std::slice::from_ref(&change)).await?;
            outcome.enqueued += ids.len();

            let annotation = change.annotation();
            if let Err(e) = self
                .repos
                .products
                .update_price(store_id, change.product_id, change.new_price, &annotation)
                .await
            {
                // The queued items still carry the new price; the next run queues it again.
                warn!(store = %store_id, product_id = %change.product_id, error = %e, "failed to write price");
                continue;
            }

            self.sink.emit(EngineEvent::PriceChanged {
                store_id,
                product_id: change.product_id,
                old_price: change.old_price,
                new_price: change.new_price,
                annotation,
                at: now,
            });
            outcome.applied.push(change);
        }

        info!(
            store = %store_id,
            evaluated = products.len(),
            updated = outcome.applied.len(),
            enqueued = outcome.enqueued,
            "pricing stage finished"
        );
        Ok(outcome)
    }

    pub async fn run_sync(
        &self,
        store_id: StoreId,
        max_batch: usize,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, StageError> {
        Ok(self.processor.process_queue(store_id, max_batch, cancel).await?)
    }

    /// Predict waste for every product and append the run.
    pub async fn run_waste(
        &self,
        store_id: StoreId,
        now: DateTime<Utc>,
    ) -> Result<PredictionRun, StageError> {
        let products = self.repos.products.list_products(store_id).await?;
        let snapshot = WasteSnapshot {
            store_id,
            products,
            as_of: now,
        };
        let job = WastePredictionJob::new(store_id, snapshot)
            .with_horizon_days(self.settings.horizon_days);
        let run = LocalAnalysisScheduler::for_store(store_id).run(job)?;

        self.repos.predictions.append_run(&run).await?;
        info!(
            store = %store_id,
            predictions = run.predictions.len(),
            total_value = %run.total_predicted_value,
            "waste prediction stage finished"
        );
        Ok(run)
    }

    /// Recalculate co-purchase correlations and upsert the top pairs.
    pub async fn run_correlation(
        &self,
        store_id: StoreId,
        now: DateTime<Utc>,
    ) -> Result<usize, StageError> {
        let line_items = self.repos.orders.line_items(store_id).await?;
        let history = OrderHistory {
            store_id,
            line_items,
            as_of: now,
        };
        let job = CorrelationJob::new(store_id, history)
            .with_top_n(self.settings.correlation_top_n)
            .with_min_frequency(self.settings.correlation_min_frequency);
        let correlations = LocalAnalysisScheduler::for_store(store_id).run(job)?;

        let written = self.repos.correlations.upsert(&correlations).await?;
        info!(store = %store_id, pairs = written, "correlation stage finished");
        Ok(written)
    }

    /// Weekly waste series over the last `weeks` weeks.
    pub async fn waste_trend(
        &self,
        store_id: StoreId,
        weeks: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<shelflife_analytics::WeeklyWastePoint>, StageError> {
        let since = now - Duration::weeks(weeks as i64 + 1);
        let predictions = self.repos.predictions.predictions_since(store_id, since).await?;
        Ok(shelflife_analytics::weekly_trend(&predictions, weeks, now))
    }

    /// Run the selected stages once.
    ///
    /// Pricing is followed by queue processing (so fresh changes go out in the same pass);
    /// waste prediction and correlation run concurrently with them. Each stage runs on its
    /// own task so that even a panic is reported as that stage's failure.
    ///
    /// A run waits for any other run of the same store (scheduled or manual) to finish, so
    /// two runs never price from the same snapshot.
    pub async fn run_once(
        self: &Arc<Self>,
        store_id: StoreId,
        stages: StageSet,
        cancel: &CancellationToken,
    ) -> RunReport {
        let _running = self.run_lock(store_id).lock_owned().await;
        let started_at = Utc::now();
        let run_id = Uuid::now_v7();

        let pricing_and_sync = {
            let engine = Arc::clone(self);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let pricing = if stages.pricing {
                    Some(engine.run_pricing(store_id, started_at).await)
                } else {
                    None
                };
                let sync = if stages.sync {
                    Some(engine.run_sync(store_id, engine.settings.sync_batch, &cancel).await)
                } else {
                    None
                };
                (pricing, sync)
            })
        };
        let waste = {
            let engine = Arc::clone(self);
            tokio::spawn(async move {
                if stages.waste {
                    Some(engine.run_waste(store_id, started_at).await)
                } else {
                    None
                }
            })
        };
        let correlation = {
            let engine = Arc::clone(self);
            tokio::spawn(async move {
                if stages.correlation {
                    Some(engine.run_correlation(store_id, started_at).await)
                } else {
                    None
                }
            })
        };

        let (pricing_and_sync, waste, correlation) = tokio::join!(pricing_and_sync, waste, correlation);

        let (pricing, sync) = match pricing_and_sync {
            Ok(pair) => pair,
            Err(e) => {
                let aborted = || StageError::Aborted(e.to_string());
                (
                    stages.pricing.then(|| Err(aborted())),
                    stages.sync.then(|| Err(aborted())),
                )
            }
        };
        let waste = waste.unwrap_or_else(|e| Some(Err(StageError::Aborted(e.to_string()))));
        let correlation =
            correlation.unwrap_or_else(|e| Some(Err(StageError::Aborted(e.to_string()))));

        let mut report = RunReport {
            run_id,
            store_id,
            started_at,
            finished_at: Utc::now(),
            updated_count: 0,
            products: Vec::new(),
            stages: Vec::with_capacity(4),
            sync: None,
        };

        let pricing_outcome = match pricing {
            Some(Ok(p)) => {
                report.updated_count = p.applied.len();
                report.products = p.applied.iter().map(|c| c.product_name.clone()).collect();
                StageOutcome::Ok {
                    count: p.applied.len(),
                }
            }
            Some(Err(e)) => self.stage_failed(store_id, Stage::Pricing, &e),
            None => StageOutcome::Skipped,
        };
        let sync_outcome = match sync {
            Some(Ok(batch)) => {
                report.sync = Some(batch);
                StageOutcome::Ok {
                    count: batch.processed,
                }
            }
            Some(Err(e)) => self.stage_failed(store_id, Stage::Sync, &e),
            None => StageOutcome::Skipped,
        };
        let waste_outcome = match waste {
            Some(Ok(run)) => StageOutcome::Ok {
                count: run.predictions.len(),
            },
            Some(Err(e)) => self.stage_failed(store_id, Stage::Waste, &e),
            None => StageOutcome::Skipped,
        };
        let correlation_outcome = match correlation {
            Some(Ok(n)) => StageOutcome::Ok { count: n },
            Some(Err(e)) => self.stage_failed(store_id, Stage::Correlation, &e),
            None => StageOutcome::Skipped,
        };

        for (stage, outcome) in [
            (Stage::Pricing, pricing_outcome),
            (Stage::Sync, sync_outcome),
            (Stage::Waste, waste_outcome),
            (Stage::Correlation, correlation_outcome),
        ] {
            report.stages.push(StageReport { stage, outcome });
        }
        report.finished_at = Utc::now();

        self.sink.emit(EngineEvent::RunCompleted {
            store_id,
            updated_count: report.updated_count,
            failed_stages: report.failed_stages(),
            at: report.finished_at,
        });
        info!(
            store = %store_id,
            run_id = %run_id,
            updated = report.updated_count,
            failed_stages = report.failed_stages(),
            "automation run finished"
        );
        report
    }

    fn run_lock(&self, store_id: StoreId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.run_locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(store_id).or_default())
    }

    fn stage_failed(&self, store_id: StoreId, stage: Stage, err: &StageError) -> StageOutcome {
        error!(store = %store_id, stage = stage.as_str(), error = %err, "automation stage failed");
        self.sink.emit(EngineEvent::StageFailed {
            store_id,
            stage,
            error: err.to_string(),
            at: Utc::now(),
        });
        StageOutcome::Failed {
            error: err.to_string(),
        }
    }
}
