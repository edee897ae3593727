//! PostgreSQL executor on a sqlx pool.

use super::{QueryExecutor, Row};
use crate::config::Resource;
use crate::error::{AppError, ConfigError};
use crate::query::{ListQuery, Predicate};
use crate::sql::{self, PgBindValue, QueryBuf};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::{ConnectOptions, Row as _};
use std::str::FromStr;

#[derive(Clone)]
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn bind(q: &QueryBuf) -> sqlx::query::Query<'_, sqlx::Postgres, sqlx::postgres::PgArguments> {
        tracing::debug!(sql = %q.sql, params = ?q.params, "query");
        let mut query = sqlx::query(&q.sql);
        for p in &q.params {
            query = query.bind(PgBindValue::from_json(p));
        }
        query
    }

    async fn fetch_rows(&self, q: &QueryBuf) -> Result<Vec<Row>, AppError> {
        let rows = Self::bind(q).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_json).collect()
    }

    async fn fetch_row(&self, q: &QueryBuf) -> Result<Row, AppError> {
        let row = Self::bind(q).fetch_one(&self.pool).await?;
        row_to_json(&row)
    }

    async fn execute(&self, q: &QueryBuf) -> Result<u64, AppError> {
        Ok(Self::bind(q).execute(&self.pool).await?.rows_affected())
    }
}

/// Generated selects return a single `row` column holding `row_to_json(...)`.
fn row_to_json(row: &PgRow) -> Result<Row, AppError> {
    match row.try_get::<Value, _>(0)? {
        Value::Object(map) => Ok(map),
        other => Err(AppError::Store(format!("expected a json object row, got {}", other))),
    }
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    async fn select(&self, resource: &Resource, query: &ListQuery) -> Result<Vec<Row>, AppError> {
        self.fetch_rows(&sql::select(resource, query)).await
    }

    async fn select_where(&self, resource: &Resource, predicate: &Predicate) -> Result<Vec<Row>, AppError> {
        self.fetch_rows(&sql::select_all(resource, predicate)).await
    }

    async fn count(&self, resource: &Resource, predicate: &Predicate) -> Result<u64, AppError> {
        let q = sql::count(resource, predicate);
        let n: i64 = Self::bind(&q).fetch_one(&self.pool).await?.try_get(0)?;
        Ok(n.max(0) as u64)
    }

    async fn estimate_rows(&self, resource: &Resource) -> Result<Option<u64>, AppError> {
        let q = sql::estimate(resource);
        let row = Self::bind(&q).fetch_optional(&self.pool).await?;
        let estimate: Option<i64> = match row {
            Some(r) => r.try_get(0)?,
            None => None,
        };
        Ok(estimate.filter(|n| *n >= 0).map(|n| n as u64))
    }

    async fn insert(&self, resource: &Resource, values: &Row) -> Result<Row, AppError> {
        self.fetch_row(&sql::insert(resource, values)).await
    }

    async fn upsert(&self, resource: &Resource, values: &Row, target: &[String]) -> Result<Row, AppError> {
        self.fetch_row(&sql::upsert(resource, values, target)).await
    }

    async fn update(&self, resource: &Resource, predicate: &Predicate, values: &Row) -> Result<u64, AppError> {
        match sql::update(resource, predicate, values) {
            Some(q) => self.execute(&q).await,
            None => Ok(0),
        }
    }

    async fn delete(&self, resource: &Resource, predicate: &Predicate) -> Result<u64, AppError> {
        self.execute(&sql::delete(resource, predicate)).await
    }

    async fn ping(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Create the database named in `database_url` if missing. Connects to the `postgres`
/// maintenance database on the same server.
pub async fn ensure_database_exists(database_url: &str) -> Result<(), AppError> {
    let (admin_url, db_name) = parse_db_name_from_url(database_url)?;
    if db_name.is_empty() || db_name == "postgres" {
        return Ok(());
    }
    let opts = sqlx::postgres::PgConnectOptions::from_str(&admin_url)
        .map_err(|e| ConfigError::Load(format!("invalid DATABASE_URL: {}", e)))?;
    let mut conn: sqlx::PgConnection = opts.connect().await?;
    let exists: (bool,) = sqlx::query_as("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(&db_name)
        .fetch_one(&mut conn)
        .await?;
    if !exists.0 {
        tracing::info!(database = %db_name, "creating database");
        sqlx::query(&format!("CREATE DATABASE {}", sql::quoted(&db_name)))
            .execute(&mut conn)
            .await?;
    }
    Ok(())
}

fn parse_db_name_from_url(url: &str) -> Result<(String, String), ConfigError> {
    let path_start = url
        .rfind('/')
        .ok_or_else(|| ConfigError::Load("DATABASE_URL: no path".into()))?
        + 1;
    let path_and_query = url.get(path_start..).unwrap_or("");
    let db_name = path_and_query.split('?').next().unwrap_or("").trim();
    let base = url.get(..path_start).unwrap_or(url);
    Ok((format!("{}postgres", base), db_name.to_string()))
}
