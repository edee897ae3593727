//! Route registration with the per-route pipeline:
//! authenticate (router-wide), authorize, optional exclusive lock, record_audit, handler.

use crate::auth::{authenticate, authorize, record_audit, Gate, RouteOptions};
use crate::config::Resource;
use crate::handlers::{casl, delete_many, list, me, openapi_json, read_many, update_many, upsert};
use crate::kv::exclusive_lock;
use crate::state::AppContext;
use axum::{
    handler::Handler,
    http::Method,
    middleware::from_fn_with_state,
    routing::{on, MethodFilter, MethodRouter},
    Extension, Router,
};
use std::sync::Arc;

/// Collects gated routes; paths are relative to the API prefix.
pub struct ApiRoutes {
    ctx: AppContext,
    router: Router<AppContext>,
}

impl ApiRoutes {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            router: Router::new(),
        }
    }

    /// Register with (subject, action) inferred from the method and path.
    pub fn route<H, T>(self, method: Method, path: &str, handler: H) -> Self
    where
        H: Handler<T, AppContext>,
        T: 'static,
    {
        let options = RouteOptions::infer(&method, path);
        self.route_with(method, path, options, handler)
    }

    pub fn route_with<H, T>(self, method: Method, path: &str, options: RouteOptions, handler: H) -> Self
    where
        H: Handler<T, AppContext>,
        T: 'static,
    {
        match MethodFilter::try_from(method.clone()) {
            Ok(filter) => self.mount(path, options, on(filter, handler)),
            Err(_) => {
                tracing::warn!(%method, path, "unsupported method, route skipped");
                self
            }
        }
    }

    fn mount(mut self, path: &str, options: RouteOptions, handler: MethodRouter<AppContext>) -> Self {
        let mut method_router: MethodRouter<AppContext> =
            handler.layer(from_fn_with_state(self.ctx.clone(), record_audit));
        if options.exclusive {
            method_router = method_router.layer(from_fn_with_state(self.ctx.clone(), exclusive_lock));
        }
        if !options.hidden {
            let gate = Gate {
                ctx: self.ctx.clone(),
                route: Arc::new(options),
            };
            method_router = method_router.layer(from_fn_with_state(gate, authorize));
        }
        self.router = self.router.route(path, method_router);
        self
    }

    fn resource_route<H, T>(self, resource: &Arc<Resource>, method: Method, path: &str, handler: H) -> Self
    where
        H: Handler<T, AppContext>,
        T: 'static,
    {
        let options = RouteOptions::infer(&method, path);
        match MethodFilter::try_from(method) {
            Ok(filter) => {
                let handler = on(filter, handler).layer(Extension(resource.clone()));
                self.mount(path, options, handler)
            }
            Err(_) => self,
        }
    }

    /// The five generated operations. PATCH and DELETE are also bound on the collection
    /// path so a missing id list is reported as such.
    pub fn resource(self, resource: &Arc<Resource>) -> Self {
        let collection = format!("/{}", resource.name);
        let by_ids = format!("/{}/:ids", resource.name);
        self.resource_route(resource, Method::GET, &collection, list)
            .resource_route(resource, Method::PUT, &collection, upsert)
            .resource_route(resource, Method::PATCH, &collection, update_many)
            .resource_route(resource, Method::DELETE, &collection, delete_many)
            .resource_route(resource, Method::GET, &by_ids, read_many)
            .resource_route(resource, Method::PATCH, &by_ids, update_many)
            .resource_route(resource, Method::DELETE, &by_ids, delete_many)
    }

    /// Finish with the router-wide authenticate layer.
    pub fn into_router(self) -> Router {
        let ctx = self.ctx;
        self.router
            .layer(from_fn_with_state(ctx.clone(), authenticate))
            .with_state(ctx)
    }
}

/// Every catalog resource plus `/me`, `/casl` and the hidden `/openapi.json`.
pub fn api_routes(ctx: AppContext) -> ApiRoutes {
    let catalog = ctx.catalog.clone();
    let routes = catalog
        .iter()
        .fold(ApiRoutes::new(ctx), |routes, resource| routes.resource(resource));
    routes
        .route_with(Method::GET, "/me", RouteOptions::open(), me)
        .route_with(Method::GET, "/casl", RouteOptions::open(), casl)
        .route_with(Method::GET, "/openapi.json", RouteOptions::hidden(), openapi_json)
}

