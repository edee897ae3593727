//! Catalog validation: name collisions and referential integrity.

use crate::config::CatalogConfig;
use crate::error::ConfigError;
use std::collections::HashSet;

/// Path segments taken by the self-service routes.
pub const RESERVED_NAMES: &[&str] = &["me", "casl", "openapi.json"];

pub fn validate(config: &CatalogConfig) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    let mut tables = HashSet::new();
    for e in &config.entities {
        if e.name.is_empty() {
            return Err(ConfigError::Validation("entity name must not be empty".into()));
        }
        let name = e.resource_name();
        if RESERVED_NAMES.contains(&name.as_str()) {
            return Err(ConfigError::Validation(format!("resource name `{}` is reserved", name)));
        }
        if !names.insert(name.clone()) {
            return Err(ConfigError::DuplicateResource(name));
        }
        tables.insert(e.table_name());
    }

    for e in &config.entities {
        let entity = e.resource_name();
        let columns = e.all_columns();
        let mut seen = HashSet::new();
        for c in &columns {
            if !seen.insert(c.name.as_str()) {
                return Err(ConfigError::DuplicateColumn {
                    entity: entity.clone(),
                    column: c.name.clone(),
                });
            }
            if let Some(target) = &c.reference {
                if !names.contains(target) && !tables.contains(target) {
                    return Err(ConfigError::MissingReference {
                        kind: "resource",
                        id: target.clone(),
                    });
                }
            }
        }

        let pk = e.primary_key.columns();
        if pk.is_empty() {
            return Err(ConfigError::InvalidPrimaryKey {
                entity,
                column: String::new(),
            });
        }
        for key in &pk {
            if !seen.contains(key.as_str()) {
                return Err(ConfigError::InvalidPrimaryKey {
                    entity: entity.clone(),
                    column: key.clone(),
                });
            }
        }

        for set in &e.unique {
            for col in set {
                if !seen.contains(col.as_str()) {
                    return Err(ConfigError::MissingReference {
                        kind: "unique column",
                        id: format!("{}.{}", entity, col),
                    });
                }
            }
        }

        for fk in &e.foreign_keys {
            if !tables.contains(&fk.table) && !names.contains(&fk.table) {
                return Err(ConfigError::MissingReference {
                    kind: "table",
                    id: fk.table.clone(),
                });
            }
            for col in &fk.columns {
                if !seen.contains(col.as_str()) {
                    return Err(ConfigError::MissingReference {
                        kind: "foreign key column",
                        id: format!("{}.{}", entity, col),
                    });
                }
            }
        }

        for rel in &e.relations {
            if !tables.contains(&rel.table) && !names.contains(&rel.table) {
                return Err(ConfigError::MissingReference {
                    kind: "table",
                    id: rel.table.clone(),
                });
            }
        }

        for idx in &e.indexes {
            if let Some(col) = idx.columns.iter().find(|c| !seen.contains(c.as_str())) {
                return Err(ConfigError::MissingReference {
                    kind: "index column",
                    id: format!("{}.{}", entity, col),
                });
            }
        }
    }
    Ok(())
}
