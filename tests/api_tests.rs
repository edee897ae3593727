mod common;

use async_trait::async_trait;
use axum::extract::Path;
use axum::http::{Method, StatusCode};
use axum::Json;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use common::*;
use resource_gate::auth::{AuditRecord, AuditSink};
use resource_gate::config::{GROUP_RESOURCE, LOG_RESOURCE, USER_RESOURCE};
use resource_gate::query::{ListQuery, Predicate};
use resource_gate::store::Row;
use resource_gate::{app_with, identity, AppError, QueryExecutor, Resource};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn seed_orders(fx: &Fixture) {
    for (id, status, customer, age) in [
        (3, "new", Some("Ada"), Some(40)),
        (7, "paid", Some("Grace"), None),
        (8, "paid", None, Some(17)),
    ] {
        insert(
            fx,
            "shop_order",
            json!({ "id": id, "status": status, "customer": customer, "age": age }),
        )
        .await;
    }
}

fn ids(body: &Value) -> Vec<i64> {
    body.as_array()
        .unwrap()
        .iter()
        .map(|row| row["id"].as_i64().unwrap())
        .collect()
}

#[tokio::test]
async fn empty_list_reports_zero_total() {
    let fx = fixture().await;
    let reply = call(&fx, Method::GET, &api("/shop_order?limit=5000"), Some(SUPER), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!([]));
    assert_eq!(reply.headers["x-total"], "0");
}

#[tokio::test]
async fn limit_out_of_range_is_a_validation_error() {
    let fx = fixture().await;
    let reply = call(&fx, Method::GET, &api("/shop_order?limit=10001"), Some(SUPER), None).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(reply.body["error"]["details"]["path"], json!("query.limit"));
}

#[tokio::test]
async fn bulk_read_omits_missing_ids() {
    let fx = fixture().await;
    seed_orders(&fx).await;
    let reply = call(&fx, Method::GET, &api("/shop_order/3,7,999"), Some(SUPER), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    let mut found = ids(&reply.body);
    found.sort();
    assert_eq!(found, vec![3, 7]);
}

#[tokio::test]
async fn list_filters_sorts_and_counts() {
    let fx = fixture().await;
    seed_orders(&fx).await;

    let adults = call(&fx, Method::GET, &api("/shop_order?filter[age_gte]=18"), Some(SUPER), None).await;
    assert_eq!(ids(&adults.body), vec![3]);
    assert_eq!(adults.headers["x-total"], "1");

    let paid = call(
        &fx,
        Method::GET,
        &api("/shop_order?filter[status]=paid&sort[field]=id&sort[order]=DESC&limit=1"),
        Some(SUPER),
        None,
    )
    .await;
    assert_eq!(ids(&paid.body), vec![8]);
    assert_eq!(paid.headers["x-total"], "2");

    let some = call(&fx, Method::GET, &api("/shop_order?filter[id_in]=3,8&sort[field]=id"), Some(SUPER), None).await;
    assert_eq!(ids(&some.body), vec![3, 8]);

    let named = call(&fx, Method::GET, &api("/shop_order?filter[customer_has]=RAC"), Some(SUPER), None).await;
    assert_eq!(ids(&named.body), vec![7]);

    let anonymous = call(&fx, Method::GET, &api("/shop_order?filter[customer_isNull]=true"), Some(SUPER), None).await;
    assert_eq!(ids(&anonymous.body), vec![8]);
}

#[tokio::test]
async fn bad_filter_value_names_the_key() {
    let fx = fixture().await;
    let reply = call(&fx, Method::GET, &api("/shop_order?filter[age_gte]=old"), Some(SUPER), None).await;
    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(reply.body["error"]["details"]["path"], json!("filter.age_gte"));
}

#[tokio::test]
async fn patch_without_ids_fails_before_the_handler() {
    let fx = fixture().await;
    seed_orders(&fx).await;
    for path in ["/shop_order", "/shop_order/3,,7"] {
        let reply = call(&fx, Method::PATCH, &api(path), Some(SUPER), Some(json!({ "status": "new" }))).await;
        assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY, "{}", path);
        assert_eq!(reply.body["error"]["details"]["path"], json!("params.ids"));
        assert_eq!(reply.body["error"]["message"], json!("params.ids: Ids empty"));
    }
    assert!(fx.executor.rows(LOG_RESOURCE).is_empty());
    let untouched = fx.executor.rows("shop_order");
    assert_eq!(untouched.iter().filter(|r| r["status"] == json!("new")).count(), 1);
}

#[tokio::test]
async fn patch_and_delete_echo_ids() {
    let fx = fixture().await;
    seed_orders(&fx).await;

    let patched = call(&fx, Method::PATCH, &api("/shop_order/7,8"), Some(SUPER), Some(json!({ "status": "new" }))).await;
    assert_eq!(patched.status, StatusCode::OK);
    assert_eq!(patched.body, json!(["7", "8"]));
    assert!(fx.executor.rows("shop_order").iter().all(|r| r["status"] == json!("new")));

    let deleted = call(&fx, Method::DELETE, &api("/shop_order/3"), Some(SUPER), None).await;
    assert_eq!(deleted.body, json!(["3"]));
    assert_eq!(fx.executor.rows("shop_order").len(), 2);
}

#[tokio::test]
async fn put_inserts_then_updates_by_natural_key() {
    let fx = fixture().await;
    let created = call(
        &fx,
        Method::PUT,
        &api("/shop_order"),
        Some(SUPER),
        Some(json!({ "reference": "A-1", "status": "new" })),
    )
    .await;
    assert_eq!(created.status, StatusCode::OK);
    let id = created.body["id"].as_i64().unwrap();

    let updated = call(
        &fx,
        Method::PUT,
        &api("/shop_order"),
        Some(SUPER),
        Some(json!({ "reference": "A-1", "status": "paid" })),
    )
    .await;
    assert_eq!(updated.body["id"].as_i64(), Some(id));
    assert_eq!(updated.body["status"], json!("paid"));
    assert_eq!(fx.executor.rows("shop_order").len(), 1);

    let invalid = call(&fx, Method::PUT, &api("/shop_order"), Some(SUPER), Some(json!({ "status": "lost" }))).await;
    assert_eq!(invalid.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(invalid.body["error"]["details"]["path"], json!("body.status"));
}

#[tokio::test]
async fn derived_keys_round_trip_through_the_api() {
    let fx = fixture().await;
    let created = call(
        &fx,
        Method::PUT,
        &api("/shop_line"),
        Some(SUPER),
        Some(json!({ "order_id": 3, "line": 2, "sku": "X" })),
    )
    .await;
    assert_eq!(created.status, StatusCode::OK);
    let token = created.body["id"].as_str().unwrap().to_string();
    let line = fx.ctx.catalog.get("shop_line").unwrap();
    assert_eq!(identity::decode(line, &token).unwrap().values(), &[json!(3), json!(2)]);

    let read = call(&fx, Method::GET, &api(&format!("/shop_line/{}", token)), Some(SUPER), None).await;
    assert_eq!(read.body[0]["sku"], json!("X"));
    assert_eq!(read.body[0]["id"], json!(token));

    let bad = call(&fx, Method::GET, &api("/shop_line/not-a-token"), Some(SUPER), None).await;
    assert_eq!(bad.status, StatusCode::BAD_REQUEST);

    let wrong_types = URL_SAFE_NO_PAD.encode(br#"["abc",true]"#);
    let bad = call(&fx, Method::GET, &api(&format!("/shop_line/{}", wrong_types)), Some(SUPER), None).await;
    assert_eq!(bad.status, StatusCode::BAD_REQUEST);
    assert_eq!(bad.body["error"]["code"], json!("invalid_id"));
}

#[tokio::test]
async fn gate_denies_by_rules() {
    let fx = fixture().await;
    seed_orders(&fx).await;

    let read = call(&fx, Method::GET, &api("/shop_order/3"), Some(READER), None).await;
    assert_eq!(read.status, StatusCode::OK);

    let update = call(&fx, Method::PATCH, &api("/shop_order/3"), Some(READER), Some(json!({ "status": "paid" }))).await;
    assert_eq!(update.status, StatusCode::FORBIDDEN);
    assert_eq!(update.body["error"]["message"], json!("You can't `update` the `shop_order`"));

    let staff_users = call(&fx, Method::GET, &api("/admin_user"), Some(STAFF), None).await;
    assert_eq!(staff_users.status, StatusCode::FORBIDDEN);

    let admin_groups = call(&fx, Method::DELETE, &api("/admin_group/1"), Some(ADMIN), None).await;
    assert_eq!(admin_groups.status, StatusCode::FORBIDDEN);

    let log_delete = call(&fx, Method::DELETE, &api("/admin_log/1"), Some(SUPER), None).await;
    assert_eq!(log_delete.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn locked_and_unknown_users_are_rejected() {
    let fx = fixture().await;
    let locked = call(&fx, Method::GET, &api("/shop_order"), Some(LOCKED), None).await;
    assert_eq!(locked.status, StatusCode::FORBIDDEN);

    let unknown = call(&fx, Method::GET, &api("/shop_order"), Some(404), None).await;
    assert_eq!(unknown.status, StatusCode::FORBIDDEN);
    assert_eq!(unknown.body["error"]["code"], json!("user_not_found"));

    let anonymous = call(&fx, Method::GET, &api("/shop_order"), None, None).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn mutations_are_audited_and_reads_are_not() {
    let fx = fixture().await;
    seed_orders(&fx).await;

    call(&fx, Method::GET, &api("/shop_order/3"), Some(SUPER), None).await;
    assert!(fx.executor.rows(LOG_RESOURCE).is_empty());

    let reply = call(&fx, Method::PATCH, &api("/shop_order/3,7"), Some(SUPER), Some(json!({ "status": "paid" }))).await;
    assert_eq!(reply.status, StatusCode::OK);

    let log = fx.executor.rows(LOG_RESOURCE);
    assert_eq!(log.len(), 1);
    assert_eq!(log[0]["user_id"], json!(SUPER));
    assert_eq!(log[0]["action"], json!("shop_order/update"));
    assert_eq!(log[0]["args"], json!({ "data": { "status": "paid" }, "ids": ["3", "7"] }));
    assert_eq!(log[0]["ret"], json!(["3", "7"]));

    let failed = call(&fx, Method::PUT, &api("/shop_order"), Some(SUPER), Some(json!({ "age": "x" }))).await;
    assert_eq!(failed.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(fx.executor.rows(LOG_RESOURCE).len(), 1);
}

struct FailingSink;

#[async_trait]
impl AuditSink for FailingSink {
    async fn record(&self, _record: &AuditRecord) -> Result<(), AppError> {
        Err(AppError::Store("audit store offline".into()))
    }
}

#[tokio::test]
async fn audit_failures_do_not_change_the_response() {
    let fx = fixture_with(|ctx| ctx.with_audit_sink(Arc::new(FailingSink))).await;
    seed_orders(&fx).await;
    let reply = call(&fx, Method::DELETE, &api("/shop_order/7"), Some(SUPER), None).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!(["7"]));
    assert_eq!(fx.executor.rows("shop_order").len(), 2);
}

#[tokio::test]
async fn self_service_routes_need_only_an_identity() {
    let fx = fixture().await;

    let me = call(&fx, Method::GET, &api("/me"), Some(LOCKED), None).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(me.body["email"], json!("u3@example.com"));
    assert_eq!(me.body["group_ids"], json!([1]));

    let casl = call(&fx, Method::GET, &api("/casl"), Some(READER), None).await;
    assert_eq!(casl.status, StatusCode::OK);
    assert_eq!(casl.body[0], json!({ "subject": "shop_order", "action": "read" }));
    assert_eq!(casl.body.as_array().unwrap().len(), 2);

    let anonymous = call(&fx, Method::GET, &api("/me"), None, None).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn openapi_and_health_are_public() {
    let fx = fixture().await;
    let doc = call(&fx, Method::GET, &api("/openapi.json"), None, None).await;
    assert_eq!(doc.status, StatusCode::OK);
    assert!(doc.body["components"]["schemas"].get("shop_order_filter").is_some());

    let health = call(&fx, Method::GET, "/health", None, None).await;
    assert_eq!(health.body, json!({ "status": "ok" }));
    let ready = call(&fx, Method::GET, "/ready", None, None).await;
    assert_eq!(ready.status, StatusCode::OK);
}

#[tokio::test]
async fn admin_writes_cannot_break_the_rule_engine() {
    let fx = fixture().await;

    let bad_role = call(
        &fx,
        Method::PUT,
        &api(&format!("/{}", USER_RESOURCE)),
        Some(SUPER),
        Some(json!({ "email": "new@example.com", "role": 7 })),
    )
    .await;
    assert_eq!(bad_role.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(bad_role.body["error"]["details"]["path"], json!("body.role"));

    let promoted = call(
        &fx,
        Method::PATCH,
        &api(&format!("/{}/{}", USER_RESOURCE, STAFF)),
        Some(SUPER),
        Some(json!({ "role": 32 })),
    )
    .await;
    assert_eq!(promoted.status, StatusCode::OK);

    let bad_rules = call(
        &fx,
        Method::PUT,
        &api(&format!("/{}", GROUP_RESOURCE)),
        Some(SUPER),
        Some(json!({ "name": "broken", "rules": [{ "verb": "read" }] })),
    )
    .await;
    assert_eq!(bad_rules.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(bad_rules.body["error"]["details"]["path"], json!("body.rules"));
    assert_eq!(fx.executor.rows(GROUP_RESOURCE).len(), 1);
}

async fn retry(Path(id): Path<i64>) -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(1)).await;
    Json(json!({ "retried": id }))
}

#[tokio::test(start_paused = true)]
async fn hand_written_post_routes_infer_action_and_are_audited() {
    let mut fx = fixture().await;
    fx.router = app_with(fx.ctx.clone(), |routes| routes.route(Method::POST, "/task/:id/retry", retry));
    let path = api("/task/42/retry");

    let denied = call(&fx, Method::POST, &path, Some(STAFF), Some(json!({ "reason": "stuck" }))).await;
    assert_eq!(denied.status, StatusCode::FORBIDDEN);
    assert_eq!(denied.body["error"]["details"], json!({ "action": "retry", "subject": "task" }));

    let done = call(&fx, Method::POST, &path, Some(SUPER), Some(json!({ "reason": "stuck" }))).await;
    assert_eq!(done.status, StatusCode::OK);
    assert_eq!(done.body, json!({ "retried": 42 }));

    let log = fx.executor.rows(LOG_RESOURCE);
    assert_eq!(log.len(), 1);
    assert_eq!(log[0]["action"], json!("task/retry"));
    assert_eq!(log[0]["args"], json!({ "data": { "reason": "stuck" }, "id": "42" }));
    assert_eq!(log[0]["ret"], json!({ "retried": 42 }));
}

#[tokio::test(start_paused = true)]
async fn exclusive_actions_run_one_at_a_time_per_user() {
    let mut fx = fixture().await;
    fx.router = app_with(fx.ctx.clone(), |routes| routes.route(Method::POST, "/task/:id/retry", retry));
    let path = api("/task/1/retry");

    let (first, second, other_user) = tokio::join!(
        call(&fx, Method::POST, &path, Some(SUPER), None),
        call(&fx, Method::POST, &path, Some(SUPER), None),
        call(&fx, Method::POST, &path, Some(ADMIN), None),
    );
    let mut same_user = [first.status.as_u16(), second.status.as_u16()];
    same_user.sort();
    assert_eq!(same_user, [200, 429]);
    assert_eq!(other_user.status, StatusCode::OK);

    let too_soon = call(&fx, Method::POST, &path, Some(SUPER), None).await;
    assert_eq!(too_soon.status, StatusCode::TOO_MANY_REQUESTS);

    tokio::time::advance(Duration::from_millis(301)).await;
    let released = call(&fx, Method::POST, &path, Some(SUPER), None).await;
    assert_eq!(released.status, StatusCode::OK);
}

/// Delegates to the fixture store but reports a fixed planner estimate.
struct Estimating {
    inner: Arc<dyn QueryExecutor>,
    estimate: u64,
    exact_counts: Arc<AtomicUsize>,
}

#[async_trait]
impl QueryExecutor for Estimating {
    async fn select(&self, resource: &Resource, query: &ListQuery) -> Result<Vec<Row>, AppError> {
        self.inner.select(resource, query).await
    }

    async fn select_where(&self, resource: &Resource, predicate: &Predicate) -> Result<Vec<Row>, AppError> {
        self.inner.select_where(resource, predicate).await
    }

    async fn count(&self, resource: &Resource, predicate: &Predicate) -> Result<u64, AppError> {
        self.exact_counts.fetch_add(1, Ordering::SeqCst);
        self.inner.count(resource, predicate).await
    }

    async fn estimate_rows(&self, _resource: &Resource) -> Result<Option<u64>, AppError> {
        Ok(Some(self.estimate))
    }

    async fn insert(&self, resource: &Resource, values: &Row) -> Result<Row, AppError> {
        self.inner.insert(resource, values).await
    }

    async fn upsert(&self, resource: &Resource, values: &Row, target: &[String]) -> Result<Row, AppError> {
        self.inner.upsert(resource, values, target).await
    }

    async fn update(&self, resource: &Resource, predicate: &Predicate, values: &Row) -> Result<u64, AppError> {
        self.inner.update(resource, predicate, values).await
    }

    async fn delete(&self, resource: &Resource, predicate: &Predicate) -> Result<u64, AppError> {
        self.inner.delete(resource, predicate).await
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.inner.ping().await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

#[tokio::test]
async fn large_unfiltered_lists_report_the_estimate() {
    let exact_counts = Arc::new(AtomicUsize::new(0));
    let counter = exact_counts.clone();
    let fx = fixture_with(move |mut ctx| {
        ctx.executor = Arc::new(Estimating {
            inner: ctx.executor.clone(),
            estimate: 250_000,
            exact_counts: counter,
        });
        ctx
    })
    .await;
    seed_orders(&fx).await;

    let all = call(&fx, Method::GET, &api("/shop_order"), Some(SUPER), None).await;
    assert_eq!(all.status, StatusCode::OK);
    assert_eq!(all.headers["x-total"], "250000");
    assert_eq!(all.body.as_array().unwrap().len(), 3);
    assert_eq!(exact_counts.load(Ordering::SeqCst), 0);

    let paid = call(&fx, Method::GET, &api("/shop_order?filter[status]=paid"), Some(SUPER), None).await;
    assert_eq!(paid.headers["x-total"], "2");
    assert_eq!(exact_counts.load(Ordering::SeqCst), 1);
}
