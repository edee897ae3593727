//! Self-service routes for the identified caller, and the API document.

use crate::auth::{Account, Rule, Session};
use crate::error::AppError;
use crate::state::AppContext;
use axum::{extract::State, Json};

/// GET /me
pub async fn me(State(ctx): State<AppContext>, session: Session) -> Result<Json<Account>, AppError> {
    ctx.directory
        .account(session.user_id)
        .await?
        .map(Json)
        .ok_or(AppError::UserNotFound(session.user_id))
}

/// GET /casl: the caller's merged rule list, in precedence order.
pub async fn casl(State(ctx): State<AppContext>, session: Session) -> Result<Json<Vec<Rule>>, AppError> {
    let rules = ctx.rules.rules_for(session.user_id).await?;
    Ok(Json(rules.rules().to_vec()))
}

pub async fn openapi_json(State(ctx): State<AppContext>) -> Json<utoipa::openapi::OpenApi> {
    Json(ctx.openapi.as_ref().clone())
}
