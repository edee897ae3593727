//! Idempotent DDL for every catalog entity: schemas, enum types, tables, indexes, foreign keys.

use crate::config::types::*;
use crate::config::validate;
use crate::error::AppError;
use crate::sql::{qualified_table, quoted};
use sqlx::PgPool;
use std::collections::BTreeSet;

/// A DDL statement; `may_fail` marks statements without an IF NOT EXISTS form.
#[derive(Clone, Debug, PartialEq)]
pub struct DdlStatement {
    pub sql: String,
    pub may_fail: bool,
}

impl DdlStatement {
    fn strict(sql: String) -> Self {
        Self { sql, may_fail: false }
    }

    fn lenient(sql: String) -> Self {
        Self { sql, may_fail: true }
    }
}

fn literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Statements in dependency order.
pub fn ddl_statements(config: &CatalogConfig) -> Vec<DdlStatement> {
    let mut out = Vec::new();

    let mut schemas: BTreeSet<String> = config.entities.iter().map(|e| e.schema_name().to_string()).collect();
    for e in &config.entities {
        for c in &e.columns {
            if let Some((schema, _)) = c.type_.name().split_once('.') {
                schemas.insert(schema.to_string());
            }
        }
    }
    for s in &schemas {
        out.push(DdlStatement::strict(format!("CREATE SCHEMA IF NOT EXISTS {}", quoted(s))));
    }

    for e in &config.entities {
        for c in e.columns.iter().filter(|c| !c.values.is_empty()) {
            let Some((schema, name)) = c.type_.name().split_once('.') else {
                continue;
            };
            let values: Vec<String> = c.values.iter().map(|v| literal(v)).collect();
            out.push(DdlStatement::lenient(format!(
                "CREATE TYPE {} AS ENUM ({})",
                qualified_table(schema, name),
                values.join(", ")
            )));
        }
    }

    for e in &config.entities {
        let mut defs: Vec<String> = Vec::new();
        for c in e.all_columns() {
            let ty = if c.type_.name().contains('.') {
                let (schema, name) = c.type_.name().split_once('.').unwrap_or(("public", c.type_.name()));
                qualified_table(schema, name)
            } else {
                c.type_.ddl()
            };
            let mut def = format!("{} {}", quoted(&c.name), ty);
            if !c.nullable {
                def.push_str(" NOT NULL");
            }
            if let Some(d) = &c.default {
                def.push_str(" DEFAULT ");
                match d {
                    ColumnDefaultConfig::Literal(s) => def.push_str(s),
                    ColumnDefaultConfig::Expression { expression } => def.push_str(expression),
                }
            }
            if c.unique {
                def.push_str(" UNIQUE");
            }
            defs.push(def);
        }
        let pk: Vec<String> = e.primary_key.columns().iter().map(|c| quoted(c)).collect();
        defs.push(format!("PRIMARY KEY ({})", pk.join(", ")));
        for u in e.unique.iter().filter(|u| !u.is_empty()) {
            let cols: Vec<String> = u.iter().map(|c| quoted(c)).collect();
            defs.push(format!("UNIQUE ({})", cols.join(", ")));
        }
        out.push(DdlStatement::strict(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n  {}\n)",
            qualified_table(e.schema_name(), &e.table_name()),
            defs.join(",\n  ")
        )));

        for idx in &e.indexes {
            let cols: Vec<String> = idx.columns.iter().map(|c| quoted(c)).collect();
            out.push(DdlStatement::strict(format!(
                "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
                if idx.unique { "UNIQUE " } else { "" },
                quoted(&idx.name),
                qualified_table(e.schema_name(), &e.table_name()),
                cols.join(", ")
            )));
        }
    }

    for e in &config.entities {
        for fk in &e.foreign_keys {
            let Some(target) = config
                .entities
                .iter()
                .find(|t| t.table_name() == fk.table || t.resource_name() == fk.table)
            else {
                continue;
            };
            let references = if fk.references.is_empty() {
                target.primary_key.columns()
            } else {
                fk.references.clone()
            };
            let constraint = format!("{}_{}_fkey", e.table_name(), fk.columns.join("_"));
            out.push(DdlStatement::lenient(format!(
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON UPDATE {} ON DELETE {}",
                qualified_table(e.schema_name(), &e.table_name()),
                quoted(&constraint),
                fk.columns.iter().map(|c| quoted(c)).collect::<Vec<_>>().join(", "),
                qualified_table(target.schema_name(), &target.table_name()),
                references.iter().map(|c| quoted(c)).collect::<Vec<_>>().join(", "),
                fk.on_update.as_deref().unwrap_or("NO ACTION"),
                fk.on_delete.as_deref().unwrap_or("NO ACTION"),
            )));
        }
    }

    out
}

/// Apply DDL for the whole catalog. Safe to run on every start.
pub async fn apply_migrations(pool: &PgPool, config: &CatalogConfig) -> Result<(), AppError> {
    validate(config)?;
    let statements = ddl_statements(config);
    for stmt in &statements {
        tracing::debug!(sql = %stmt.sql, "ddl");
        match sqlx::query(&stmt.sql).execute(pool).await {
            Ok(_) => {}
            Err(e) if stmt.may_fail => tracing::debug!(error = %e, "ddl skipped"),
            Err(e) => return Err(e.into()),
        }
    }
    tracing::info!(statements = statements.len(), "migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_tables_are_created_with_constraints() {
        let stmts = ddl_statements(&CatalogConfig::default().with_builtins());
        assert_eq!(stmts[0].sql, "CREATE SCHEMA IF NOT EXISTS \"public\"");
        let user = stmts
            .iter()
            .find(|s| s.sql.contains("\"public\".\"admin_user\" ("))
            .unwrap();
        assert!(user.sql.contains("\"email\" varchar(255) NOT NULL UNIQUE"));
        assert!(user.sql.contains("\"role\" smallint NOT NULL DEFAULT 0"));
        assert!(user.sql.contains("\"updated_at\" timestamptz NOT NULL DEFAULT NOW()"));
        assert!(user.sql.contains("PRIMARY KEY (\"id\")"));
        assert!(stmts
            .iter()
            .any(|s| s.sql.starts_with("CREATE INDEX IF NOT EXISTS \"admin_log_user_id_idx\"")));
    }

    #[test]
    fn enum_types_and_foreign_keys_are_lenient() {
        let cfg: CatalogConfig = serde_json::from_value(json!({ "entities": [
            { "name": "customer", "table": "customers", "primary_key": "id",
              "columns": [{ "name": "id", "type": "serial", "nullable": false }] },
            { "name": "order", "schema": "shop", "primary_key": "id", "columns": [
                { "name": "id", "type": "serial", "nullable": false },
                { "name": "status", "type": "shop.status", "values": ["new", "paid"] },
                { "name": "customer_id", "type": "integer" }
            ], "foreign_keys": [{ "columns": ["customer_id"], "table": "customers", "on_delete": "CASCADE" }] }
        ]}))
        .unwrap();
        let stmts = ddl_statements(&cfg);
        let ty = stmts.iter().find(|s| s.sql.starts_with("CREATE TYPE")).unwrap();
        assert_eq!(ty.sql, "CREATE TYPE \"shop\".\"status\" AS ENUM ('new', 'paid')");
        assert!(ty.may_fail);
        let fk = stmts.last().unwrap();
        assert!(fk.may_fail);
        assert_eq!(
            fk.sql,
            "ALTER TABLE \"shop\".\"order\" ADD CONSTRAINT \"order_customer_id_fkey\" FOREIGN KEY (\"customer_id\") \
             REFERENCES \"public\".\"customers\" (\"id\") ON UPDATE NO ACTION ON DELETE CASCADE"
        );
    }
}
