use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::{Value, json};

use tyrehub_api::app::{self, services::AppServices};
use tyrehub_core::TyreId;
use tyrehub_events::integration::{ORDER_CREATED, TYRES_GET, TyreQuery, TyreQueryReply};
use tyrehub_events::{Message, MessageBus, rpc};
use tyrehub_infra::AppConfig;
use tyrehub_infra::workers::WorkerHandle;

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    workers: Vec<WorkerHandle>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_inner(false).await
    }

    async fn spawn_with_consumers() -> Self {
        Self::spawn_inner(true).await
    }

    async fn spawn_inner(with_consumers: bool) -> Self {
        // Same router as prod, in-memory services, ephemeral port.
        let services = Arc::new(AppServices::in_memory());
        let workers = if with_consumers {
            let config = AppConfig::from_lookup(|_| None).unwrap();
            services.spawn_consumers(&config).await.unwrap()
        } else {
            Vec::new()
        };

        let app = app::build_app(services.clone(), "http://localhost:3000");
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
            services,
            workers,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn tyre_body(cost: &str) -> Value {
    json!({
        "brand": "Michelin",
        "model": "Pilot Sport 4",
        "size": "225/45R17",
        "load_rate": 94,
        "speed_rate": "Y",
        "season": "Summer",
        "supplier": "TyreCo",
        "fuel_efficiency": "C",
        "weather_efficiency": "A",
        "noise_level": 71,
        "ev_approved": false,
        "cost": cost,
        "quantity": 10
    })
}

async fn create(client: &reqwest::Client, srv: &TestServer, body: &Value) -> Value {
    let res = client.post(srv.url("/api/tyres")).json(body).send().await.unwrap();
    if res.status() != StatusCode::CREATED {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        panic!("expected 201 Created, got {status} body={body}");
    }
    res.json().await.unwrap()
}

async fn quantity_eventually(
    client: &reqwest::Client,
    srv: &TestServer,
    id: i64,
    expected: i64,
) {
    // Stock changes arrive through the bus consumer, not the request path.
    for _ in 0..100 {
        let res = client
            .get(srv.url(&format!("/api/tyres/{id}")))
            .send()
            .await
            .unwrap();
        let body: Value = res.json().await.unwrap();
        if body["quantity"] == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    panic!("quantity of tyre {id} did not reach {expected}");
}

#[tokio::test]
async fn health_reports_ok() {
    let srv = TestServer::spawn().await;

    let res = reqwest::get(srv.url("/health")).await.unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!({ "status": "ok" }));
}

#[tokio::test]
async fn tyre_lifecycle_recomputes_retail_cost() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    // Create
    let created = create(&client, &srv, &tyre_body("100.00")).await;
    let id = created["id"].as_i64().unwrap();
    assert_eq!(created["retail_cost"], "135.00");
    assert_eq!(created["cost"], "100.00");

    // Patch cost
    let res = client
        .patch(srv.url(&format!("/api/tyres/{id}")))
        .json(&json!({ "cost": "150.00" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let patched: Value = res.json().await.unwrap();
    assert_eq!(patched["retail_cost"], "202.50");
    assert_eq!(patched["brand"], "Michelin");

    // Replace
    let res = client
        .put(srv.url(&format!("/api/tyres/{id}")))
        .json(&tyre_body("200.00"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let replaced: Value = res.json().await.unwrap();
    assert_eq!(replaced["retail_cost"], "270.00");
    assert_eq!(replaced["id"], id);

    // Delete
    let res = client
        .delete(srv.url(&format!("/api/tyres/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client
        .get(srv.url(&format!("/api/tyres/{id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn list_is_empty_then_ordered_by_id() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/api/tyres")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!([]));

    let first = create(&client, &srv, &tyre_body("10.00")).await;
    let second = create(&client, &srv, &tyre_body("20.00")).await;

    let body: Value = client
        .get(srv.url("/api/tyres"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<_> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["id"].clone())
        .collect();
    assert_eq!(ids, vec![first["id"].clone(), second["id"].clone()]);
}

#[tokio::test]
async fn patch_without_cost_leaves_retail_cost_alone() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let created = create(&client, &srv, &tyre_body("99.99")).await;
    let id = created["id"].as_i64().unwrap();

    let res = client
        .patch(srv.url(&format!("/api/tyres/{id}")))
        .json(&json!({ "quantity": 3, "retail_cost": "1.00" }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let patched: Value = res.json().await.unwrap();
    assert_eq!(patched["quantity"], 3);
    assert_eq!(patched["retail_cost"], "134.99");
}

#[tokio::test]
async fn client_supplied_retail_cost_is_ignored() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let mut body = tyre_body("100.00");
    body["retail_cost"] = json!("9999.99");
    body["id"] = json!(777);
    let created = create(&client, &srv, &body).await;

    assert_eq!(created["retail_cost"], "135.00");
    assert_ne!(created["id"], 777);
}

#[tokio::test]
async fn invalid_payloads_are_unprocessable() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let mut bad_speed = tyre_body("100.00");
    bad_speed["speed_rate"] = json!("Q9");
    let mut negative_cost = tyre_body("100.00");
    negative_cost["cost"] = json!("-5.00");
    let mut missing_brand = tyre_body("100.00");
    missing_brand.as_object_mut().unwrap().remove("brand");
    let mut negative_quantity = tyre_body("100.00");
    negative_quantity["quantity"] = json!(-1);

    for body in [bad_speed, negative_cost, missing_brand, negative_quantity] {
        let res = client
            .post(srv.url("/api/tyres"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY, "body: {body}");
        let err: Value = res.json().await.unwrap();
        assert_eq!(err["error"], "validation_error");
    }

    let res = client.get(srv.url("/api/tyres")).send().await.unwrap();
    let body: Value = res.json().await.unwrap();
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn patch_with_unknown_speed_rate_is_rejected_and_changes_nothing() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let created = create(&client, &srv, &tyre_body("100.00")).await;
    let id = created["id"].as_i64().unwrap();

    let res = client
        .patch(srv.url(&format!("/api/tyres/{id}")))
        .json(&json!({ "speed_rate": "Z9", "cost": "500.00" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let err: Value = res.json().await.unwrap();
    assert_eq!(err["error"], "validation_error");

    let res = client
        .get(srv.url(&format!("/api/tyres/{id}")))
        .send()
        .await
        .unwrap();
    let current: Value = res.json().await.unwrap();
    assert_eq!(current, created);
}

#[tokio::test]
async fn malformed_json_is_unprocessable() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/api/tyres"))
        .header("content-type", "application/json")
        .body("{\"brand\": ")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn missing_ids_are_not_found() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let url = srv.url("/api/tyres/4242");

    let res = client.get(&url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client.put(&url).json(&tyre_body("10.00")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .patch(&url)
        .json(&json!({ "cost": "10.00" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client.delete(&url).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn non_numeric_id_is_a_bad_request() {
    let srv = TestServer::spawn().await;

    let res = reqwest::get(srv.url("/api/tyres/abc")).await.unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_id");
}

#[tokio::test]
async fn orders_on_the_bus_change_stock_seen_over_http() {
    let mut srv = TestServer::spawn_with_consumers().await;
    let client = reqwest::Client::new();

    let created = create(&client, &srv, &tyre_body("100.00")).await;
    let id = created["id"].as_i64().unwrap();

    let buy = Message::json(&json!({
        "type": "BUY",
        "items": [{ "tyre_id": id, "quantity": 5 }, { "tyre_id": 9999, "quantity": 1 }]
    }))
    .unwrap();
    srv.services.bus.publish(ORDER_CREATED, buy).await.unwrap();
    quantity_eventually(&client, &srv, id, 15).await;

    let sell = Message::json(&json!({
        "type": "SELL",
        "items": [{ "tyre_id": id, "quantity": 7 }]
    }))
    .unwrap();
    srv.services.bus.publish(ORDER_CREATED, sell).await.unwrap();
    quantity_eventually(&client, &srv, id, 8).await;

    let request = Message::json(&TyreQuery {
        tyre_id: TyreId::new(id),
    })
    .unwrap();
    let reply = rpc::request(
        srv.services.bus.as_ref(),
        TYRES_GET,
        request,
        Duration::from_secs(2),
    )
    .await
    .unwrap();
    let reply: TyreQueryReply = reply.decode().unwrap();
    assert!(reply.ok);
    let snapshot = reply.tyre.unwrap();
    assert_eq!(snapshot.retail_cost.to_string(), "135.00");
    assert_eq!(snapshot.quantity, 8);

    for worker in srv.workers.drain(..) {
        worker.shutdown().await;
    }
}
