//! Audit trail of successful mutating calls.

use super::gate::AuditContext;
use crate::config::{Catalog, Resource, LOG_RESOURCE};
use crate::error::{AppError, ConfigError};
use crate::schema::format_date_time;
use crate::state::AppContext;
use crate::store::{QueryExecutor, Row};
use async_trait::async_trait;
use axum::{
    body::{self, Body},
    extract::{RawPathParams, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq)]
pub struct AuditRecord {
    pub user_id: i64,
    pub subject: String,
    pub action: String,
    pub args: Value,
    pub result: Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    /// `<subject>/<action>`, as stored.
    pub fn qualified_action(&self) -> String {
        format!("{}/{}", self.subject, self.action)
    }
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: &AuditRecord) -> Result<(), AppError>;
}

/// Appends to `admin_log` through the executor.
pub struct CatalogAuditSink {
    executor: Arc<dyn QueryExecutor>,
    log: Arc<Resource>,
}

impl CatalogAuditSink {
    pub fn new(catalog: &Catalog, executor: Arc<dyn QueryExecutor>) -> Result<Self, ConfigError> {
        let log = catalog.get(LOG_RESOURCE).cloned().ok_or_else(|| ConfigError::MissingReference {
            kind: "resource",
            id: LOG_RESOURCE.to_string(),
        })?;
        Ok(Self { executor, log })
    }
}

#[async_trait]
impl AuditSink for CatalogAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<(), AppError> {
        let mut row = Row::new();
        row.insert("user_id".into(), Value::from(record.user_id));
        row.insert("action".into(), Value::String(record.qualified_action()));
        row.insert("args".into(), record.args.clone());
        row.insert("ret".into(), record.result.clone());
        row.insert("created_at".into(), Value::String(format_date_time(record.timestamp)));
        self.executor.insert(&self.log, &row).await?;
        Ok(())
    }
}

fn json_or_null(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes).unwrap_or(Value::Null)
}

/// Innermost layer: after a 2xx response on a request carrying an [`AuditContext`],
/// persist `{ data: body, ..path params }` and the response payload. `ids` is stored as
/// the split token list. Sink failures are
/// logged and never change the response.
pub async fn record_audit(
    State(ctx): State<AppContext>,
    params: Option<RawPathParams>,
    request: Request,
    next: Next,
) -> Response {
    let Some(audit) = request.extensions().get::<AuditContext>().cloned() else {
        return next.run(request).await;
    };

    let (parts, body) = request.into_parts();
    let bytes = match body::to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(e) => return AppError::BadRequest(format!("request body: {}", e)).into_response(),
    };
    let mut args = Map::new();
    args.insert("data".into(), json_or_null(&bytes));
    for (name, value) in params.iter().flat_map(|p| p.iter()) {
        let value = match name {
            "ids" => value.split(',').map(|id| Value::String(id.trim().to_string())).collect(),
            _ => Value::String(value.to_string()),
        };
        args.insert(name.to_string(), value);
    }

    let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;
    if !response.status().is_success() {
        return response;
    }

    let (parts, body) = response.into_parts();
    let payload = match body::to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(error = %e, action = %audit.action, subject = %audit.subject, "response not buffered for audit");
            return Response::from_parts(parts, Body::empty());
        }
    };
    let record = AuditRecord {
        user_id: audit.user_id,
        subject: audit.subject,
        action: audit.action,
        args: Value::Object(args),
        result: json_or_null(&payload),
        timestamp: Utc::now(),
    };
    if let Err(e) = ctx.audit.record(&record).await {
        tracing::warn!(error = %e, user_id = record.user_id, action = %record.qualified_action(), "audit write failed");
    }
    Response::from_parts(parts, Body::from(payload))
}
