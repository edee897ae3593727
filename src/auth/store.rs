//! Per-user rule sets: group rules, then role tier rules, then system overrides.

use super::cache::BoundedCache;
use super::rules::{system_overrides, Role, Rule, RuleSet};
use crate::config::{Catalog, Resource, GROUP_RESOURCE, USER_RESOURCE};
use crate::error::{AppError, ConfigError};
use crate::identity::KeyValue;
use crate::query::Predicate;
use crate::schema::synthesize;
use crate::store::QueryExecutor;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// A row of `admin_user`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    pub email: String,
    #[serde(default)]
    pub icon: Option<String>,
    pub role: i64,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub group_ids: Vec<i64>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn account(&self, user_id: i64) -> Result<Option<Account>, AppError>;

    /// Rules of each listed group, in the order given. Unknown groups are skipped.
    async fn group_rules(&self, group_ids: &[i64]) -> Result<Vec<Vec<Rule>>, AppError>;
}

/// Reads accounts and groups from the built-in resources.
pub struct CatalogDirectory {
    executor: Arc<dyn QueryExecutor>,
    users: Arc<Resource>,
    groups: Arc<Resource>,
}

impl CatalogDirectory {
    pub fn new(catalog: &Catalog, executor: Arc<dyn QueryExecutor>) -> Result<Self, ConfigError> {
        let lookup = |name: &str| {
            catalog.get(name).cloned().ok_or_else(|| ConfigError::MissingReference {
                kind: "resource",
                id: name.to_string(),
            })
        };
        Ok(Self {
            executor,
            users: lookup(USER_RESOURCE)?,
            groups: lookup(GROUP_RESOURCE)?,
        })
    }
}

#[async_trait]
impl UserDirectory for CatalogDirectory {
    async fn account(&self, user_id: i64) -> Result<Option<Account>, AppError> {
        let predicate = Predicate::by_keys(&self.users, vec![KeyValue(vec![Value::from(user_id)])]);
        let rows = self.executor.select_where(&self.users, &predicate).await?;
        rows.into_iter()
            .next()
            .map(|row| {
                serde_json::from_value(Value::Object(row))
                    .map_err(|e| AppError::Store(format!("{} {}: {}", USER_RESOURCE, user_id, e)))
            })
            .transpose()
    }

    async fn group_rules(&self, group_ids: &[i64]) -> Result<Vec<Vec<Rule>>, AppError> {
        if group_ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys = group_ids.iter().map(|id| KeyValue(vec![Value::from(*id)])).collect();
        let rows = self
            .executor
            .select_where(&self.groups, &Predicate::by_keys(&self.groups, keys))
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for id in group_ids {
            let Some(row) = rows.iter().find(|r| r.get("id").and_then(Value::as_i64) == Some(*id)) else {
                continue;
            };
            let rules = match row.get("rules") {
                None | Some(Value::Null) => Vec::new(),
                Some(raw) => serde_json::from_value(raw.clone())
                    .map_err(|e| AppError::Store(format!("{} {} rules: {}", GROUP_RESOURCE, id, e)))?,
            };
            out.push(rules);
        }
        Ok(out)
    }
}

/// Create the account for `email` with `role`, or move an existing account to `role`.
/// The email goes through the same checks as an API write.
pub async fn grant_role(
    catalog: &Catalog,
    executor: &dyn QueryExecutor,
    email: &str,
    role: Role,
) -> Result<Account, AppError> {
    let users = catalog
        .get(USER_RESOURCE)
        .ok_or_else(|| AppError::ResourceNotFound(USER_RESOURCE.to_string()))?;
    let mut body = serde_json::Map::new();
    body.insert("email".into(), Value::String(email.trim().to_string()));
    body.insert("role".into(), Value::from(role as i64));
    let body = synthesize(users).create.validate(&body)?;

    let row = executor.upsert(users, &body, &["email".to_string()]).await?;
    let account: Account = serde_json::from_value(Value::Object(row))
        .map_err(|e| AppError::Store(format!("{} {}: {}", USER_RESOURCE, email, e)))?;
    tracing::info!(user_id = account.id, email = %account.email, role = account.role, "role granted");
    Ok(account)
}

/// Cached rule sets keyed by user id.
pub struct RuleStore {
    directory: Arc<dyn UserDirectory>,
    cache: BoundedCache<i64, Arc<RuleSet>, AppError>,
}

impl RuleStore {
    pub fn new(directory: Arc<dyn UserDirectory>, capacity: usize, ttl: Duration) -> Self {
        Self {
            directory,
            cache: BoundedCache::new(capacity, ttl),
        }
    }

    pub fn directory(&self) -> &Arc<dyn UserDirectory> {
        &self.directory
    }

    pub async fn rules_for(&self, user_id: i64) -> Result<Arc<RuleSet>, AppError> {
        self.cache
            .get_or_try_init(user_id, || self.compute(user_id))
            .await
            .map_err(AppError::from)
    }

    async fn compute(&self, user_id: i64) -> Result<Arc<RuleSet>, AppError> {
        let account = self
            .directory
            .account(user_id)
            .await?
            .ok_or(AppError::UserNotFound(user_id))?;
        let role = Role::try_from(account.role)?;
        let mut rules: Vec<Rule> = self
            .directory
            .group_rules(&account.group_ids)
            .await?
            .into_iter()
            .flatten()
            .collect();
        rules.extend(role.rules());
        rules.extend(system_overrides());
        tracing::debug!(user_id, rules = rules.len(), "rule set computed");
        Ok(Arc::new(RuleSet::new(rules)))
    }

    pub fn invalidate(&self, user_id: i64) {
        self.cache.invalidate(&user_id);
    }

    pub fn clear(&self) {
        self.cache.clear();
    }
}
