use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use shelflife_core::StoreId;

use super::engine::AutomationEngine;
use super::report::StageSet;

/// Cadences of the periodic driver.
#[derive(Debug, Clone)]
pub struct AutomationSchedule {
    /// Pricing evaluation followed by a queue batch.
    pub pricing_interval: Duration,
    pub waste_interval: Duration,
    pub correlation_interval: Duration,
}

impl Default for AutomationSchedule {
    fn default() -> Self {
        Self {
            pricing_interval: Duration::from_secs(60 * 60),
            waste_interval: Duration::from_secs(6 * 60 * 60),
            correlation_interval: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Handle for a running per-store driver (trigger + shutdown).
#[derive(Debug)]
pub struct AutomationRunnerHandle {
    store_id: StoreId,
    trigger: mpsc::Sender<()>,
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl AutomationRunnerHandle {
    pub fn store_id(&self) -> StoreId {
        self.store_id
    }

    /// Request a full run as soon as possible.
    ///
    /// Triggers are coalesced: while one is already pending this is a no-op.
    pub fn trigger(&self) {
        let _ = self.trigger.try_send(());
    }

    /// Stop the driver. A run in progress finishes its claimed queue items first.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

impl AutomationSchedule {
    /// Spawn the store's driver on the current tokio runtime.
    ///
    /// Every stage runs once on startup, then on its own cadence. Cancelling `parent`
    /// stops the driver as well.
    pub fn spawn_for_store(
        &self,
        engine: Arc<AutomationEngine>,
        store_id: StoreId,
        parent: &CancellationToken,
    ) -> AutomationRunnerHandle {
        let (trigger_tx, trigger_rx) = mpsc::channel::<()>(1);
        let cancel = parent.child_token();

        let join = tokio::spawn(runner_loop(
            self.clone(),
            engine,
            store_id,
            trigger_rx,
            cancel.clone(),
        ));

        AutomationRunnerHandle {
            store_id,
            trigger: trigger_tx,
            cancel,
            join: Some(join),
        }
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn runner_loop(
    schedule: AutomationSchedule,
    engine: Arc<AutomationEngine>,
    store_id: StoreId,
    mut trigger_rx: mpsc::Receiver<()>,
    cancel: CancellationToken,
) {
    info!(store = %store_id, ?schedule, "automation runner started");

    let mut pricing = ticker(schedule.pricing_interval);
    let mut waste = ticker(schedule.waste_interval);
    let mut correlation = ticker(schedule.correlation_interval);

    loop {
        let stages = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(()) = trigger_rx.recv() => StageSet::ALL,
            _ = pricing.tick() => StageSet::PRICING,
            _ = waste.tick() => StageSet::WASTE,
            _ = correlation.tick() => StageSet::CORRELATION,
        };

        // Absorb a trigger that arrived together with a tick.
        let stages = match trigger_rx.try_recv() {
            Ok(()) => stages.union(StageSet::ALL),
            Err(_) => stages,
        };

        debug!(store = %store_id, ?stages, "automation run starting");
        let report = engine.run_once(store_id, stages, &cancel).await;
        debug!(store = %store_id, run_id = %report.run_id, "automation run done");
    }

    info!(store = %store_id, "automation runner stopped");
}
