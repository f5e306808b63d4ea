use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use reqwest::StatusCode;
use serde_json::json;

use shelflife_api::app::{build_app, AppServices};
use shelflife_core::{OrderId, ProductId, StoreId};
use shelflife_infra::config::EngineConfig;
use shelflife_infra::sync::{ScriptedSyncTarget, SyncTarget, TargetError};

struct TestServer {
    base_url: String,
    target: Arc<ScriptedSyncTarget>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let target = Arc::new(ScriptedSyncTarget::new("pos"));
        let targets: Vec<Arc<dyn SyncTarget>> = vec![target.clone()];
        let services = Arc::new(AppServices::in_memory(&EngineConfig::default(), targets));

        // Same router as prod, bound to an ephemeral port.
        let app = build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            target,
            handle,
        }
    }

    fn store_url(&self, store_id: StoreId, path: &str) -> String {
        format!("{}/stores/{}{}", self.base_url, store_id, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn put_product(
    client: &reqwest::Client,
    srv: &TestServer,
    store_id: StoreId,
    product_id: ProductId,
    name: &str,
    hours_to_expiry: i64,
) {
    let res = client
        .put(srv.store_url(store_id, "/products"))
        .json(&json!([{
            "id": product_id,
            "name": name,
            "price": "10.00",
            "quantity": 12,
            "category": "dairy",
            "expiration_date": Utc::now() + ChronoDuration::hours(hours_to_expiry),
        }]))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_is_unscoped() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(format!("{}/health", srv.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn malformed_store_id_is_rejected() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(format!("{}/stores/not-a-store/sync-queue", srv.base_url))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_id");
}

#[tokio::test]
async fn manual_run_reprices_and_syncs() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let store_id = StoreId::new();
    let milk = ProductId::new();
    put_product(&client, &srv, store_id, milk, "Milk 1L", 36).await;

    let res = client
        .post(srv.store_url(store_id, "/automation/run"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let report: serde_json::Value = res.json().await.unwrap();
    assert_eq!(report["updated_count"], 1);
    assert_eq!(report["products"], json!(["Milk 1L"]));
    assert_eq!(report["sync"]["processed"], 1);
    assert_eq!(report["sync"]["failed"], 0);

    let items: serde_json::Value = client
        .get(srv.store_url(store_id, "/sync-queue?status=completed"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let items = items.as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["old_price"], "10.00");
    assert_eq!(items[0]["new_price"], "6.00");
    assert_eq!(srv.target.calls().len(), 1);

    let products: serde_json::Value = client
        .get(srv.store_url(store_id, "/products"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(products[0]["price"], "6.00");
}

#[tokio::test]
async fn failed_item_can_be_retried_until_exhausted() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let store_id = StoreId::new();
    let product_id = ProductId::new();
    srv.target
        .fail_product(product_id, TargetError::from_status(400, "unknown sku"));
    put_product(&client, &srv, store_id, product_id, "Cream", 12).await;

    let report: serde_json::Value = client
        .post(srv.store_url(store_id, "/automation/run"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["sync"]["failed"], 1);

    let failed: serde_json::Value = client
        .get(srv.store_url(store_id, "/sync-queue?status=failed"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let item_id = failed[0]["id"].as_str().unwrap().to_string();
    assert_eq!(failed[0]["error_message"], "permanent: HTTP 400: unknown sku");

    for _ in 0..2 {
        let res = client
            .post(srv.store_url(store_id, &format!("/sync-queue/{item_id}/retry")))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let item: serde_json::Value = res.json().await.unwrap();
        assert_eq!(item["status"], "pending");

        let res = client
            .post(srv.store_url(store_id, "/sync-queue/process"))
            .json(&json!({ "max_batch": 10 }))
            .send()
            .await
            .unwrap();
        let batch: serde_json::Value = res.json().await.unwrap();
        assert_eq!(batch, json!({ "processed": 0, "failed": 1 }));
    }

    let res = client
        .post(srv.store_url(store_id, &format!("/sync-queue/{item_id}/retry")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "attempts_exhausted");

    let stats: serde_json::Value = client
        .get(srv.store_url(store_id, "/sync-queue/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["failed"], 1);
    assert_eq!(stats["exhausted"], 1);
}

#[tokio::test]
async fn analytics_endpoints_reflect_the_last_run() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let store_id = StoreId::new();
    put_product(&client, &srv, store_id, ProductId::new(), "Yogurt", 48).await;

    let res = client
        .get(srv.store_url(store_id, "/waste/predictions"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let (bread, butter) = (ProductId::new(), ProductId::new());
    let mut lines = Vec::new();
    for _ in 0..3 {
        let order_id = OrderId::new();
        lines.push(json!({ "order_id": order_id, "product_id": bread, "product_name": "Bread", "quantity": 1 }));
        lines.push(json!({ "order_id": order_id, "product_id": butter, "product_name": "Butter", "quantity": 2 }));
    }
    let res = client
        .post(srv.store_url(store_id, "/orders"))
        .json(&lines)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client
        .post(srv.store_url(store_id, "/automation/run"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let run: serde_json::Value = client
        .get(srv.store_url(store_id, "/waste/predictions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(run["predictions"].as_array().unwrap().len(), 1);
    assert_eq!(run["predictions"][0]["cause"], "expiration");

    let trend: serde_json::Value = client
        .get(srv.store_url(store_id, "/waste/trend?weeks=4"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(trend.as_array().unwrap().len(), 4);

    let pairs: serde_json::Value = client
        .get(srv.store_url(store_id, "/correlations?limit=5"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pairs.as_array().unwrap().len(), 1);
    assert_eq!(pairs[0]["frequency"], 3);
}

#[tokio::test]
async fn default_rules_are_listed_without_overlaps() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let store_id = StoreId::new();

    let rules: serde_json::Value = client
        .get(srv.store_url(store_id, "/pricing-rules"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(rules.as_array().unwrap().len(), 4);

    let overlaps: serde_json::Value = client
        .get(srv.store_url(store_id, "/pricing-rules/overlaps"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(overlaps, json!([]));
}

#[tokio::test]
async fn stores_do_not_see_each_other() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let (a, b) = (StoreId::new(), StoreId::new());
    put_product(&client, &srv, a, ProductId::new(), "Milk 1L", 36).await;

    let report: serde_json::Value = client
        .post(srv.store_url(b, "/automation/run"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["updated_count"], 0);

    let items: serde_json::Value = client
        .get(srv.store_url(a, "/sync-queue"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(items, json!([]));
}

#[tokio::test]
async fn trigger_is_accepted() {
    let srv = TestServer::spawn().await;
    let res = reqwest::Client::new()
        .post(srv.store_url(StoreId::new(), "/automation/trigger"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn process_batch_size_is_bounded() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let store_id = StoreId::new();

    for max_batch in [0, 501, usize::MAX] {
        let res = client
            .post(srv.store_url(store_id, "/sync-queue/process"))
            .json(&json!({ "max_batch": max_batch }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "max_batch {max_batch}");
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["error"], "validation_error");
    }

    let res = client
        .post(srv.store_url(store_id, "/sync-queue/process"))
        .json(&json!({ "max_batch": 500 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn event_stream_carries_only_the_store_events() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let store_id = StoreId::new();
    let other_store = StoreId::new();
    let milk = ProductId::new();
    let other_milk = ProductId::new();
    put_product(&client, &srv, store_id, milk, "Milk 1L", 36).await;
    put_product(&client, &srv, other_store, other_milk, "Milk 1L", 36).await;

    let mut stream = client
        .get(srv.store_url(store_id, "/events"))
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), StatusCode::OK);

    for store in [other_store, store_id] {
        let res = client
            .post(srv.store_url(store, "/automation/run"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    let mut seen = String::new();
    let found = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while let Ok(Some(chunk)) = stream.chunk().await {
            seen.push_str(&String::from_utf8_lossy(&chunk));
            if seen.contains("pricing.price.changed") && seen.contains(&milk.to_string()) {
                return true;
            }
        }
        false
    })
    .await;

    assert!(matches!(found, Ok(true)), "stream so far: {seen}");
    assert!(!seen.contains(&other_milk.to_string()));
}
