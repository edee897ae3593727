use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use resource_gate::auth::Rule;
use resource_gate::config::{GROUP_RESOURCE, USER_RESOURCE};
use resource_gate::{app, scan, AppContext, CatalogConfig, MemoryExecutor, QueryExecutor, Settings};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

pub const PREFIX: &str = "/api/admin";

pub const SUPER: i64 = 1;
pub const STAFF: i64 = 2;
pub const LOCKED: i64 = 3;
/// Guest in the "order readers" group.
pub const READER: i64 = 4;
pub const ADMIN: i64 = 5;

pub struct Fixture {
    pub ctx: AppContext,
    pub executor: MemoryExecutor,
    pub router: Router,
}

#[allow(dead_code)]
pub fn catalog_config() -> CatalogConfig {
    serde_json::from_value(json!({ "entities": [
        { "group": "shop", "name": "order", "primary_key": "id", "columns": [
            { "name": "id", "type": "serial", "nullable": false },
            { "name": "status", "type": "text", "values": ["new", "paid"] },
            { "name": "customer", "type": "varchar(64)" },
            { "name": "age", "type": "integer" },
            { "name": "reference", "type": "varchar(32)", "unique": true }
        ]},
        { "group": "shop", "name": "line", "primary_key": ["order_id", "line"], "columns": [
            { "name": "order_id", "type": "integer", "nullable": false, "reference": "shop_order" },
            { "name": "line", "type": "integer", "nullable": false },
            { "name": "sku", "type": "text" }
        ]}
    ]}))
    .unwrap()
}

fn user(id: i64, role: i64, group_ids: Value) -> serde_json::Map<String, Value> {
    json!({
        "id": id,
        "name": format!("user {}", id),
        "email": format!("u{}@example.com", id),
        "role": role,
        "group_ids": group_ids
    })
    .as_object()
    .unwrap()
    .clone()
}

/// Seeds users of each tier and one group granting `read` on `shop_order`.
#[allow(dead_code)]
pub async fn seed_accounts(ctx: &AppContext) {
    let groups = ctx.catalog.get(GROUP_RESOURCE).unwrap();
    let rules = serde_json::to_value(vec![Rule::allow("shop_order", "read")]).unwrap();
    let group = json!({ "id": 1, "name": "order readers", "rules": rules });
    ctx.executor.insert(groups, group.as_object().unwrap()).await.unwrap();

    let users = ctx.catalog.get(USER_RESOURCE).unwrap();
    for row in [
        user(SUPER, 64, Value::Null),
        user(STAFF, 16, json!([])),
        user(LOCKED, 0, json!([1])),
        user(READER, 1, json!([1])),
        user(ADMIN, 32, Value::Null),
    ] {
        ctx.executor.insert(users, &row).await.unwrap();
    }
}

#[allow(dead_code)]
pub async fn fixture_with(configure: impl FnOnce(AppContext) -> AppContext) -> Fixture {
    let catalog = scan(&catalog_config().with_builtins()).unwrap();
    let executor = MemoryExecutor::new();
    let ctx = AppContext::startup(Settings::default(), catalog, Arc::new(executor.clone())).unwrap();
    let ctx = configure(ctx);
    seed_accounts(&ctx).await;
    let router = app(ctx.clone());
    Fixture { ctx, executor, router }
}

#[allow(dead_code)]
pub async fn fixture() -> Fixture {
    fixture_with(|ctx| ctx).await
}

#[allow(dead_code)]
pub async fn insert(fx: &Fixture, resource: &str, row: Value) {
    let resource = fx.ctx.catalog.get(resource).unwrap();
    fx.executor.insert(resource, row.as_object().unwrap()).await.unwrap();
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

#[allow(dead_code)]
pub async fn call(fx: &Fixture, method: Method, path: &str, user: Option<i64>, body: Option<Value>) -> Reply {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(id) = user {
        builder = builder.header("x-session-user", id.to_string());
    }
    let request = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = fx.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    Reply { status, headers, body }
}

#[allow(dead_code)]
pub fn api(path: &str) -> String {
    format!("{}{}", PREFIX, path)
}
