//! Query execution contract and its PostgreSQL / in-memory implementations.

pub mod memory;
pub mod postgres;

pub use memory::MemoryExecutor;
pub use postgres::{ensure_database_exists, PgExecutor};

use crate::config::Resource;
use crate::error::AppError;
use crate::query::{ListQuery, Predicate};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// One record, keyed by column name.
pub type Row = Map<String, Value>;

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// One page of rows.
    async fn select(&self, resource: &Resource, query: &ListQuery) -> Result<Vec<Row>, AppError>;

    /// Every row matching `predicate`, unpaged.
    async fn select_where(&self, resource: &Resource, predicate: &Predicate) -> Result<Vec<Row>, AppError>;

    async fn count(&self, resource: &Resource, predicate: &Predicate) -> Result<u64, AppError>;

    /// Cheap size estimate of the whole table, if the store keeps one.
    async fn estimate_rows(&self, resource: &Resource) -> Result<Option<u64>, AppError>;

    async fn insert(&self, resource: &Resource, values: &Row) -> Result<Row, AppError>;

    /// Insert, or update the row that conflicts on `target`.
    async fn upsert(&self, resource: &Resource, values: &Row, target: &[String]) -> Result<Row, AppError>;

    /// Returns the number of rows changed.
    async fn update(&self, resource: &Resource, predicate: &Predicate, values: &Row) -> Result<u64, AppError>;

    /// Returns the number of rows removed.
    async fn delete(&self, resource: &Resource, predicate: &Predicate) -> Result<u64, AppError>;

    async fn ping(&self) -> Result<(), AppError>;

    async fn close(&self);
}
