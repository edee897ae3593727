//! Load entity definitions and build the catalog.

use crate::config::resolved::{cast_type, declared_length, Catalog, ColumnMeta, PkConfig, Resource, SemanticType};
use crate::config::types::*;
use crate::config::validate;
use crate::error::ConfigError;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Read a catalog file (`{ "entities": [...] }`).
pub async fn load_from_path(path: impl AsRef<Path>) -> Result<CatalogConfig, ConfigError> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    let config: CatalogConfig =
        serde_json::from_str(&raw).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
    tracing::debug!(path = %path.display(), entities = config.entities.len(), "catalog file loaded");
    Ok(config)
}

/// Build the catalog from validated definitions. Run once at startup.
pub fn scan(config: &CatalogConfig) -> Result<Catalog, ConfigError> {
    validate(config)?;

    let mut owner: HashMap<String, String> = HashMap::new();
    for e in &config.entities {
        owner.insert(e.table_name(), e.resource_name());
    }
    for e in &config.entities {
        owner.insert(e.resource_name(), e.resource_name());
    }
    let resolve_target = |target: &str| -> Result<String, ConfigError> {
        owner.get(target).cloned().ok_or_else(|| ConfigError::MissingReference {
            kind: "table",
            id: target.to_string(),
        })
    };

    let mut resources = Vec::with_capacity(config.entities.len());
    for e in &config.entities {
        let columns = e
            .all_columns()
            .iter()
            .map(|c| column_meta(&e.resource_name(), c))
            .collect::<Result<Vec<ColumnMeta>, _>>()?;
        let pk = e.primary_key.columns();

        let mut unique = vec![pk.clone()];
        unique.extend(e.unique.iter().filter(|set| !set.is_empty()).cloned());
        unique.extend(columns.iter().filter(|c| c.unique).map(|c| vec![c.name.clone()]));
        unique.dedup();

        let mut references = BTreeMap::new();
        for c in e.all_columns() {
            if let Some(target) = &c.reference {
                references.insert(c.name.clone(), resolve_target(target)?);
            }
        }
        for fk in &e.foreign_keys {
            if let [single] = fk.columns.as_slice() {
                references.insert(single.clone(), resolve_target(&fk.table)?);
            }
        }
        for rel in e.relations.iter().filter(|r| r.kind == RelationKind::One) {
            if let [single] = rel.fields.as_slice() {
                references.insert(single.clone(), resolve_target(&rel.table)?);
            }
        }

        resources.push(Resource {
            name: e.resource_name(),
            schema_name: e.schema_name().to_string(),
            table_name: e.table_name(),
            columns,
            primary_key: PkConfig::from_columns(pk),
            unique,
            references,
        });
    }

    let catalog = Catalog::new(resources);
    tracing::info!(resources = catalog.len(), "catalog scanned");
    Ok(catalog)
}

fn column_meta(entity: &str, c: &ColumnConfig) -> Result<ColumnMeta, ConfigError> {
    let pg_type = c.type_.ddl();
    let generated = c.type_.name().to_lowercase().contains("serial");
    let mut validation = c.validation.clone();
    if validation.max_length.is_none() {
        validation.max_length = declared_length(&pg_type);
    }
    let pattern = validation
        .pattern
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|err| ConfigError::Validation(format!("{}.{}: bad pattern: {}", entity, c.name, err)))?;
    Ok(ColumnMeta {
        name: c.name.clone(),
        semantic: SemanticType::infer(&pg_type, !c.values.is_empty()),
        cast: cast_type(&pg_type),
        pg_type,
        nullable: c.nullable,
        has_default: c.default.is_some() || generated,
        default: c.default.clone(),
        generated,
        read_only: c.read_only,
        unique: c.unique,
        on_update_now: c.on_update_now,
        enum_values: c.values.clone(),
        items: c.items.as_deref().map(|t| SemanticType::infer(t, false)),
        validation,
        pattern,
    })
}
