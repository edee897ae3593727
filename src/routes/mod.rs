//! Router assembly: the gated resource API under the configured prefix, plus common routes.

pub mod common;
pub mod resource;

pub use common::common_routes;
pub use resource::{api_routes, ApiRoutes};

use crate::state::AppContext;
use axum::Router;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

pub fn app(ctx: AppContext) -> Router {
    app_with(ctx, |routes| routes)
}

/// [`app`] with extra gated routes mounted next to the generated ones.
pub fn app_with(ctx: AppContext, extend: impl FnOnce(ApiRoutes) -> ApiRoutes) -> Router {
    let prefix = ctx.settings.api_prefix.trim_end_matches('/').to_string();
    let api = extend(api_routes(ctx.clone())).into_router();
    let router = if prefix.is_empty() {
        api
    } else {
        Router::new().nest(&prefix, api)
    };
    router
        .merge(common_routes(ctx.clone()))
        .layer(RequestBodyLimitLayer::new(ctx.settings.body_limit_bytes))
        .layer(TraceLayer::new_for_http())
}
