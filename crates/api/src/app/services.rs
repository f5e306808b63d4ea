use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{mpsc::RecvTimeoutError, Arc, Mutex},
    time::Duration,
};

use anyhow::Context;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use tokio::sync::mpsc::unbounded_channel;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use shelflife_core::StoreId;
use shelflife_events::{Event, EventBus, InMemoryEventBus, Subscription};
use shelflife_infra::{
    automation::{AutomationEngine, AutomationRunnerHandle, AutomationSchedule, AutomationSettings, Repositories},
    config::EngineConfig,
    notify::{EngineEvent, EventSink},
    repository::{
        InMemoryCorrelationRepository, InMemoryOrderRepository, InMemoryPredictionRepository,
        InMemoryProductRepository, InMemoryRuleRepository,
    },
    sync::{
        HttpSyncTarget, InMemorySyncQueueStore, PostgresSyncQueueStore, SyncQueueProcessor,
        SyncQueueStore, SyncTarget,
    },
};
use shelflife_pricing::PricingEngine;

/// Engine notification sink that fans out to SSE subscribers over the in-process bus.
///
/// With no subscriber events are dropped; a closed stream is pruned on the next publish.
#[derive(Debug, Default)]
pub struct RealtimeSink {
    bus: InMemoryEventBus<EngineEvent>,
}

impl RealtimeSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription<EngineEvent> {
        self.bus.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }
}

impl EventSink for RealtimeSink {
    fn emit(&self, event: EngineEvent) {
        tracing::debug!(event_type = event.event_type(), store = %event.store_id(), "engine event");
        if let Err(e) = self.bus.publish(event) {
            tracing::warn!(error = %e, "failed to publish engine event");
        }
    }
}

/// Everything the handlers need: the engine, the inventory/sales feeds it reads, and the
/// per-store periodic runners.
pub struct AppServices {
    engine: Arc<AutomationEngine>,
    products: Arc<InMemoryProductRepository>,
    orders: Arc<InMemoryOrderRepository>,
    realtime: Arc<RealtimeSink>,
    schedule: AutomationSchedule,
    runners: Mutex<HashMap<StoreId, AutomationRunnerHandle>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for AppServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppServices")
            .field("engine", &self.engine)
            .field("schedule", &self.schedule)
            .finish()
    }
}

impl AppServices {
    /// Wire services around an explicit queue store and target list.
    pub fn new(
        config: &EngineConfig,
        queue: Arc<dyn SyncQueueStore>,
        targets: Vec<Arc<dyn SyncTarget>>,
    ) -> Self {
        let realtime = Arc::new(RealtimeSink::new());
        let sink: Arc<dyn EventSink> = realtime.clone();

        let processor = targets
            .into_iter()
            .fold(
                SyncQueueProcessor::builder(queue, sink.clone()).config(config.processor.clone()),
                |builder, target| builder.target(target),
            )
            .build();

        let products = Arc::new(InMemoryProductRepository::new());
        let orders = Arc::new(InMemoryOrderRepository::new());
        let repos = Repositories {
            products: products.clone(),
            rules: Arc::new(InMemoryRuleRepository::new()),
            predictions: Arc::new(InMemoryPredictionRepository::new()),
            correlations: Arc::new(InMemoryCorrelationRepository::new()),
            orders: orders.clone(),
        };

        let engine = AutomationEngine::new(repos, processor, sink)
            .with_pricing(PricingEngine::new().with_epsilon(config.price_epsilon))
            .with_settings(AutomationSettings {
                sync_batch: config.sync_batch,
                ..AutomationSettings::default()
            });

        Self {
            engine: Arc::new(engine),
            products,
            orders,
            realtime,
            schedule: config.schedule.clone(),
            runners: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// In-memory queue, no HTTP targets (dev/test).
    pub fn in_memory(config: &EngineConfig, targets: Vec<Arc<dyn SyncTarget>>) -> Self {
        Self::new(config, InMemorySyncQueueStore::arc(), targets)
    }

    /// Production wiring: Postgres queue when a database URL is configured, one HTTP target
    /// per configured system.
    pub async fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        let queue: Arc<dyn SyncQueueStore> = match &config.database_url {
            Some(url) => {
                let pool = sqlx::PgPool::connect(url)
                    .await
                    .context("failed to connect to Postgres")?;
                let store = PostgresSyncQueueStore::new(pool);
                store
                    .ensure_schema()
                    .await
                    .context("failed to create the sync queue schema")?;
                Arc::new(store)
            }
            None => InMemorySyncQueueStore::arc(),
        };

        let mut targets: Vec<Arc<dyn SyncTarget>> = Vec::with_capacity(config.targets.len());
        for t in &config.targets {
            let target = HttpSyncTarget::new(&t.name, &t.url, config.processor.target_timeout)
                .with_context(|| format!("failed to build sync target {}", t.name))?;
            targets.push(Arc::new(target));
        }

        Ok(Self::new(config, queue, targets))
    }

    pub fn engine(&self) -> &Arc<AutomationEngine> {
        &self.engine
    }

    pub fn products(&self) -> &InMemoryProductRepository {
        &self.products
    }

    pub fn orders(&self) -> &InMemoryOrderRepository {
        &self.orders
    }

    pub fn subscribe_events(&self) -> Subscription<EngineEvent> {
        self.realtime.subscribe()
    }

    /// Open event subscriptions (SSE clients still connected as of the last event).
    pub fn event_subscribers(&self) -> usize {
        self.realtime.subscriber_count()
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Start the periodic runner of `store_id` unless it is already running.
    pub fn ensure_runner(&self, store_id: StoreId) {
        let Ok(mut runners) = self.runners.lock() else {
            tracing::error!(store = %store_id, "runner registry lock poisoned");
            return;
        };
        runners.entry(store_id).or_insert_with(|| {
            self.schedule
                .spawn_for_store(self.engine.clone(), store_id, &self.shutdown)
        });
    }

    /// Ask the store's runner for an immediate full run, starting it if needed.
    pub fn trigger(&self, store_id: StoreId) {
        self.ensure_runner(store_id);
        if let Ok(runners) = self.runners.lock() {
            if let Some(handle) = runners.get(&store_id) {
                handle.trigger();
            }
        }
    }

    /// Cancel every runner and wait for in-flight runs to wind down.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handles: Vec<AutomationRunnerHandle> = match self.runners.lock() {
            Ok(mut runners) => runners.drain().map(|(_, h)| h).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            handle.shutdown().await;
        }
    }
}

/// SSE stream of the store's engine events.
///
/// A blocking task drains the bus subscription into the response channel and stops once
/// the client disconnects or the bus goes away.
pub fn store_sse_stream(
    subscription: Subscription<EngineEvent>,
    store_id: StoreId,
) -> Sse<UnboundedReceiverStream<Result<SseEvent, Infallible>>> {
    let (tx, rx) = unbounded_channel::<Result<SseEvent, Infallible>>();

    tokio::task::spawn_blocking(move || loop {
        match subscription.recv_timeout(Duration::from_secs(1)) {
            Ok(event) if event.store_id() == store_id => {
                let data = match serde_json::to_string(&event) {
                    Ok(data) => data,
                    Err(_) => continue,
                };
                if tx.send(Ok(SseEvent::default().event(event.event_type()).data(data))).is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) if tx.is_closed() => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    });

    Sse::new(UnboundedReceiverStream::new(rx))
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
