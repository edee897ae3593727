//! Route metadata and the authenticate / authorize middleware.

use crate::error::AppError;
use crate::state::AppContext;
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

/// Header carrying the user id, set by the upstream login proxy.
pub const SESSION_HEADER: &str = "x-session-user";

/// Action reported when a gated route has a subject but no action.
pub const EMPTY_ACTION: &str = "EmptyAction";

/// (subject, action) a route is checked against.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteOptions {
    pub subject: Option<String>,
    pub action: Option<String>,
    /// Not gated at all.
    pub hidden: bool,
    /// Guarded by the per-user exclusive lock.
    pub exclusive: bool,
}

impl RouteOptions {
    /// Subject is the first path segment; the action follows the verb, or for POST the
    /// third segment, else the second (`/task/:id/retry` is `retry`, `/task/clean` is `clean`).
    pub fn infer(method: &Method, path: &str) -> Self {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let action = match *method {
            Method::GET => Some("read"),
            Method::PUT => Some("create"),
            Method::PATCH => Some("update"),
            Method::DELETE => Some("delete"),
            Method::POST => segments.get(2).or(segments.get(1)).copied(),
            _ => None,
        };
        RouteOptions {
            subject: segments.first().map(|s| s.to_string()),
            action: action.map(str::to_string),
            hidden: false,
            exclusive: *method == Method::POST,
        }
    }

    pub fn explicit(subject: impl Into<String>, action: impl Into<String>) -> Self {
        RouteOptions {
            subject: Some(subject.into()),
            action: Some(action.into()),
            ..Default::default()
        }
    }

    /// Always permitted once the caller is identified.
    pub fn open() -> Self {
        RouteOptions {
            subject: Some(String::new()),
            ..Default::default()
        }
    }

    pub fn hidden() -> Self {
        RouteOptions {
            hidden: true,
            ..Default::default()
        }
    }
}

/// The identified caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Session {
    pub user_id: i64,
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Session {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<Session>().copied().ok_or(AppError::Unauthorized)
    }
}

#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve(&self, headers: &HeaderMap) -> Result<Option<Session>, AppError>;
}

/// Trusts [`SESSION_HEADER`].
#[derive(Clone, Debug, Default)]
pub struct HeaderSessionResolver;

#[async_trait]
impl SessionResolver for HeaderSessionResolver {
    async fn resolve(&self, headers: &HeaderMap) -> Result<Option<Session>, AppError> {
        let Some(raw) = headers.get(SESSION_HEADER) else {
            return Ok(None);
        };
        let user_id = raw
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .ok_or(AppError::Unauthorized)?;
        Ok(Some(Session { user_id }))
    }
}

/// Attached by [`authorize`] to requests performing a mutating action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditContext {
    pub user_id: i64,
    pub subject: String,
    pub action: String,
}

/// Router-wide: attaches the [`Session`] when the caller can be identified.
pub async fn authenticate(State(ctx): State<AppContext>, mut request: Request, next: Next) -> Result<Response, AppError> {
    if let Some(session) = ctx.sessions.resolve(request.headers()).await? {
        request.extensions_mut().insert(session);
    }
    Ok(next.run(request).await)
}

/// State of one [`authorize`] layer.
#[derive(Clone)]
pub struct Gate {
    pub ctx: AppContext,
    pub route: Arc<RouteOptions>,
}

pub async fn authorize(State(gate): State<Gate>, mut request: Request, next: Next) -> Result<Response, AppError> {
    let route = &gate.route;
    if route.hidden {
        return Ok(next.run(request).await);
    }
    let session = request
        .extensions()
        .get::<Session>()
        .copied()
        .ok_or(AppError::Unauthorized)?;
    let subject = route.subject.as_deref().unwrap_or_default();
    if subject.is_empty() {
        return Ok(next.run(request).await);
    }
    let action = match route.action.as_deref() {
        Some(action) if !action.is_empty() => action,
        _ => return Err(AppError::forbidden(EMPTY_ACTION, subject)),
    };
    let rules = gate.ctx.rules.rules_for(session.user_id).await?;
    if !rules.can(action, subject) {
        tracing::debug!(user_id = session.user_id, action, subject, "denied");
        return Err(AppError::forbidden(action, subject));
    }
    if action != "read" {
        request.extensions_mut().insert(AuditContext {
            user_id: session.user_id,
            subject: subject.to_string(),
            action: action.to_string(),
        });
    }
    Ok(next.run(request).await)
}
