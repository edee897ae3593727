//! Shared application context, built once at startup and cloned into every route.

use crate::auth::{
    AuditSink, CatalogAuditSink, CatalogDirectory, HeaderSessionResolver, RuleStore, SessionResolver, UserDirectory,
};
use crate::config::{Catalog, Resource};
use crate::error::{AppError, ConfigError};
use crate::kv::{KvStore, MemoryKv};
use crate::schema::{openapi, synthesize, ResourceSchemas};
use crate::settings::Settings;
use crate::store::QueryExecutor;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub catalog: Arc<Catalog>,
    /// Synthesized schemas keyed by resource name.
    pub schemas: Arc<HashMap<String, Arc<ResourceSchemas>>>,
    pub executor: Arc<dyn QueryExecutor>,
    pub directory: Arc<dyn UserDirectory>,
    pub rules: Arc<RuleStore>,
    pub audit: Arc<dyn AuditSink>,
    pub sessions: Arc<dyn SessionResolver>,
    pub kv: Arc<dyn KvStore>,
    pub openapi: Arc<utoipa::openapi::OpenApi>,
}

impl AppContext {
    /// Synthesize schemas and wire the catalog-backed collaborators.
    pub fn startup(settings: Settings, catalog: Catalog, executor: Arc<dyn QueryExecutor>) -> Result<Self, ConfigError> {
        let schemas: HashMap<String, Arc<ResourceSchemas>> = catalog
            .iter()
            .map(|r| (r.name.clone(), Arc::new(synthesize(r))))
            .collect();
        let directory: Arc<dyn UserDirectory> = Arc::new(CatalogDirectory::new(&catalog, executor.clone())?);
        let audit = Arc::new(CatalogAuditSink::new(&catalog, executor.clone())?);
        let document = openapi::document(&settings.api_prefix, &catalog, &schemas);
        tracing::info!(resources = catalog.len(), "application context ready");
        Ok(Self {
            rules: Arc::new(RuleStore::new(
                directory.clone(),
                settings.rule_cache_capacity,
                settings.rule_cache_ttl,
            )),
            settings: Arc::new(settings),
            catalog: Arc::new(catalog),
            schemas: Arc::new(schemas),
            executor,
            directory,
            audit,
            sessions: Arc::new(HeaderSessionResolver),
            kv: Arc::new(MemoryKv::new()),
            openapi: Arc::new(document),
        })
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = sink;
        self
    }

    pub fn with_session_resolver(mut self, resolver: Arc<dyn SessionResolver>) -> Self {
        self.sessions = resolver;
        self
    }

    pub fn with_kv(mut self, kv: Arc<dyn KvStore>) -> Self {
        self.kv = kv;
        self
    }

    /// Replaces the directory and resets the rule cache around it.
    pub fn with_directory(mut self, directory: Arc<dyn UserDirectory>) -> Self {
        self.rules = Arc::new(RuleStore::new(
            directory.clone(),
            self.settings.rule_cache_capacity,
            self.settings.rule_cache_ttl,
        ));
        self.directory = directory;
        self
    }

    pub fn resource(&self, name: &str) -> Result<&Arc<Resource>, AppError> {
        self.catalog
            .get(name)
            .ok_or_else(|| AppError::ResourceNotFound(name.to_string()))
    }

    pub fn schemas_of(&self, name: &str) -> Result<&Arc<ResourceSchemas>, AppError> {
        self.schemas
            .get(name)
            .ok_or_else(|| AppError::ResourceNotFound(name.to_string()))
    }

    pub async fn shutdown(&self) {
        self.rules.clear();
        self.executor.close().await;
        tracing::info!("application context closed");
    }
}
