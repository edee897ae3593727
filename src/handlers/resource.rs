//! Generated resource handlers: bulk read, list, upsert, bulk update, bulk delete.
//! The resource is attached to each route as an `Extension<Arc<Resource>>`.

use crate::config::Resource;
use crate::error::AppError;
use crate::identity::{parse_ids, with_virtual_id, KeyValue};
use crate::query::{count_total, translate, ListParams, Predicate};
use crate::state::AppContext;
use crate::store::Row;
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Query, RawPathParams, State},
    http::request::Parts,
    response::IntoResponse,
    Extension, Json,
};
use serde_json::{Map, Value};
use std::sync::Arc;

pub const X_TOTAL: &str = "x-total";

/// Comma-joined id tokens from the `ids` path segment, decoded for the route's resource.
/// A missing segment or an empty element is rejected before the handler runs.
#[derive(Clone, Debug)]
pub struct Ids {
    pub tokens: Vec<String>,
    pub keys: Vec<KeyValue>,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Ids {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let resource = parts
            .extensions
            .get::<Arc<Resource>>()
            .cloned()
            .ok_or_else(|| AppError::Store("route carries no resource".into()))?;
        let raw = match RawPathParams::from_request_parts(parts, state).await {
            Ok(params) => params
                .iter()
                .find(|(name, _)| *name == "ids")
                .map(|(_, value)| value.to_string())
                .unwrap_or_default(),
            Err(_) => String::new(),
        };
        let keys = parse_ids(&resource, &raw)?;
        let tokens = raw.split(',').map(|t| t.trim().to_string()).collect();
        Ok(Ids { tokens, keys })
    }
}

fn project(resource: &Resource, rows: Vec<Row>) -> Vec<Value> {
    rows.into_iter()
        .map(|row| Value::Object(with_virtual_id(resource, row)))
        .collect()
}

/// GET /<resource>/:ids: ids with no row are omitted.
pub async fn read_many(
    State(ctx): State<AppContext>,
    Extension(resource): Extension<Arc<Resource>>,
    ids: Ids,
) -> Result<Json<Vec<Value>>, AppError> {
    let predicate = Predicate::by_keys(&resource, ids.keys);
    let rows = ctx.executor.select_where(&resource, &predicate).await?;
    Ok(Json(project(&resource, rows)))
}

/// GET /<resource>: filtered page plus the `x-total` header.
pub async fn list(
    State(ctx): State<AppContext>,
    Extension(resource): Extension<Arc<Resource>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<impl IntoResponse, AppError> {
    let params = ListParams::from_pairs(&pairs)?;
    let query = translate(&resource, &params.filter, Some(&params.sort), params.limit, params.offset)?;
    let executor = ctx.executor.as_ref();
    let (rows, total) = tokio::try_join!(
        executor.select(&resource, &query),
        count_total(executor, &resource, &query.predicate, ctx.settings.approx_count_threshold),
    )?;
    Ok(([(X_TOTAL, total.to_string())], Json(project(&resource, rows))))
}

/// PUT /<resource>: insert, or update the row matching the first key or unique set
/// fully present in the body.
pub async fn upsert(
    State(ctx): State<AppContext>,
    Extension(resource): Extension<Arc<Resource>>,
    Json(body): Json<Map<String, Value>>,
) -> Result<Json<Value>, AppError> {
    let values = ctx.schemas_of(&resource.name)?.create.validate(&body)?;
    let present = |column: &str| values.get(column).is_some_and(|v| !v.is_null());
    let row = match resource.conflict_target(&present) {
        Some(target) => ctx.executor.upsert(&resource, &values, target).await?,
        None => ctx.executor.insert(&resource, &values).await?,
    };
    Ok(Json(Value::Object(with_virtual_id(&resource, row))))
}

/// PATCH /<resource>/:ids, echoing the ids.
pub async fn update_many(
    State(ctx): State<AppContext>,
    Extension(resource): Extension<Arc<Resource>>,
    ids: Ids,
    Json(body): Json<Map<String, Value>>,
) -> Result<Json<Vec<String>>, AppError> {
    let values = ctx.schemas_of(&resource.name)?.update.validate(&body)?;
    let predicate = Predicate::by_keys(&resource, ids.keys);
    let updated = ctx.executor.update(&resource, &predicate, &values).await?;
    tracing::debug!(resource = %resource.name, updated, "bulk update");
    Ok(Json(ids.tokens))
}

/// DELETE /<resource>/:ids, echoing the ids.
pub async fn delete_many(
    State(ctx): State<AppContext>,
    Extension(resource): Extension<Arc<Resource>>,
    ids: Ids,
) -> Result<Json<Vec<String>>, AppError> {
    let predicate = Predicate::by_keys(&resource, ids.keys);
    let deleted = ctx.executor.delete(&resource, &predicate).await?;
    tracing::debug!(resource = %resource.name, deleted, "bulk delete");
    Ok(Json(ids.tokens))
}
