//! resource-gate: catalog-driven REST resources behind a capability-based authorization
//! gate with an audit trail.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod kv;
pub mod migration;
pub mod query;
pub mod routes;
pub mod schema;
pub mod settings;
pub mod sql;
pub mod state;
pub mod store;

pub use auth::{can, AuditSink, Rule, RuleSet, RuleStore, Session, UserDirectory};
pub use config::{load_from_path, scan, Catalog, CatalogConfig, Resource};
pub use error::{AppError, ConfigError};
pub use kv::{KvStore, MemoryKv};
pub use migration::apply_migrations;
pub use routes::{api_routes, app, app_with, common_routes, ApiRoutes};
pub use settings::Settings;
pub use state::AppContext;
pub use store::{ensure_database_exists, MemoryExecutor, PgExecutor, QueryExecutor};
