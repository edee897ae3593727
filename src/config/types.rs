//! Declarative entity definitions, deserialized from the catalog JSON file.

use serde::{Deserialize, Deserializer, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PrimaryKeyConfig {
    Single(String),
    Composite(Vec<String>),
}

impl PrimaryKeyConfig {
    pub fn columns(&self) -> Vec<String> {
        match self {
            PrimaryKeyConfig::Single(s) => vec![s.clone()],
            PrimaryKeyConfig::Composite(v) => v.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnTypeConfig {
    Simple(String),
    Parameterized { name: String, params: Option<Vec<u32>> },
}

impl ColumnTypeConfig {
    pub fn name(&self) -> &str {
        match self {
            ColumnTypeConfig::Simple(s) => s.as_str(),
            ColumnTypeConfig::Parameterized { name, .. } => name.as_str(),
        }
    }

    /// Type as written in DDL, e.g. `varchar(255)`.
    pub fn ddl(&self) -> String {
        match self {
            ColumnTypeConfig::Simple(s) => s.clone(),
            ColumnTypeConfig::Parameterized { name, params } => {
                let p = params
                    .as_ref()
                    .map(|v| v.iter().map(|n| n.to_string()).collect::<Vec<_>>().join(", "))
                    .unwrap_or_default();
                if p.is_empty() {
                    name.clone()
                } else {
                    format!("{}({})", name, p)
                }
            }
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub enum ColumnDefaultConfig {
    Literal(String),
    Expression { expression: String },
}

impl<'de> Deserialize<'de> for ColumnDefaultConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = serde_json::Value::deserialize(deserializer)?;
        match v {
            serde_json::Value::String(s) => Ok(ColumnDefaultConfig::Literal(s)),
            serde_json::Value::Number(n) => Ok(ColumnDefaultConfig::Literal(n.to_string())),
            serde_json::Value::Bool(b) => Ok(ColumnDefaultConfig::Literal(b.to_string())),
            serde_json::Value::Object(mut obj) => {
                if let Some(serde_json::Value::String(s)) = obj.remove("expression") {
                    return Ok(ColumnDefaultConfig::Expression { expression: s });
                }
                if let Some(serde_json::Value::String(s)) = obj.remove("value").or_else(|| obj.remove("literal")) {
                    return Ok(ColumnDefaultConfig::Literal(s));
                }
                Err(serde::de::Error::custom(format!(
                    "column default must be a literal, {{ \"expression\": \"...\" }}, or {{ \"value\": \"...\" }}; got object with keys: {:?}",
                    obj.keys().collect::<Vec<_>>()
                )))
            }
            other => Err(serde::de::Error::custom(format!(
                "column default must be a literal or {{ \"expression\": \"...\" }}; got {}",
                type_name_of_json(&other)
            ))),
        }
    }
}

fn type_name_of_json(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Per-column input constraints, enforced on create/update bodies.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationRule {
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub min_length: Option<u32>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub minimum: Option<f64>,
    #[serde(default)]
    pub maximum: Option<f64>,
    /// Closed set of accepted values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub one_of: Vec<serde_json::Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColumnConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: ColumnTypeConfig,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub default: Option<ColumnDefaultConfig>,
    #[serde(default)]
    pub unique: bool,
    /// Server-maintained column: present in reads, never accepted on writes.
    #[serde(default)]
    pub read_only: bool,
    /// Set to NOW() on every update.
    #[serde(default)]
    pub on_update_now: bool,
    /// Enumerated values (text or custom enum type).
    #[serde(default)]
    pub values: Vec<String>,
    /// Element type for json array columns, e.g. "integer".
    #[serde(default)]
    pub items: Option<String>,
    /// Resource name this column refers to, when not expressed as a foreign key.
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub validation: ValidationRule,
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForeignKeyConfig {
    pub columns: Vec<String>,
    /// Referenced storage table name.
    pub table: String,
    /// Referenced columns; defaults to the referenced table's primary key.
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub on_update: Option<String>,
    #[serde(default)]
    pub on_delete: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    One,
    Many,
}

/// Relation declared without a storage-level constraint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationConfig {
    pub kind: RelationKind,
    #[serde(default)]
    pub fields: Vec<String>,
    pub table: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexConfig {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EntityConfig {
    /// Name prefix; the resource name is `<group>_<name>`.
    #[serde(default)]
    pub group: Option<String>,
    pub name: String,
    /// PostgreSQL schema, default `public`.
    #[serde(default)]
    pub schema: Option<String>,
    /// Storage table name, default the resource name.
    #[serde(default)]
    pub table: Option<String>,
    pub primary_key: PrimaryKeyConfig,
    pub columns: Vec<ColumnConfig>,
    #[serde(default)]
    pub unique: Vec<Vec<String>>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyConfig>,
    #[serde(default)]
    pub relations: Vec<RelationConfig>,
    #[serde(default)]
    pub indexes: Vec<IndexConfig>,
    /// Append read-only created_at / updated_at columns.
    #[serde(default)]
    pub timestamps: bool,
}

impl EntityConfig {
    pub fn resource_name(&self) -> String {
        match self.group.as_deref().filter(|g| !g.is_empty()) {
            Some(group) => format!("{}_{}", group, self.name),
            None => self.name.clone(),
        }
    }

    pub fn table_name(&self) -> String {
        self.table.clone().unwrap_or_else(|| self.resource_name())
    }

    pub fn schema_name(&self) -> &str {
        self.schema.as_deref().unwrap_or("public")
    }

    /// Declared columns plus the timestamp pair when `timestamps` is set.
    pub fn all_columns(&self) -> Vec<ColumnConfig> {
        let mut columns = self.columns.clone();
        if self.timestamps {
            for (name, on_update_now) in [("created_at", false), ("updated_at", true)] {
                if !columns.iter().any(|c| c.name == name) {
                    columns.push(timestamp_column(name, on_update_now));
                }
            }
        }
        columns
    }
}

pub(crate) fn timestamp_column(name: &str, on_update_now: bool) -> ColumnConfig {
    ColumnConfig {
        name: name.to_string(),
        type_: ColumnTypeConfig::Simple("timestamptz".into()),
        nullable: false,
        default: Some(ColumnDefaultConfig::Expression {
            expression: "NOW()".into(),
        }),
        unique: false,
        read_only: true,
        on_update_now,
        values: Vec::new(),
        items: None,
        reference: None,
        validation: ValidationRule::default(),
    }
}

/// All entity definitions, as loaded from `CATALOG_PATH`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub entities: Vec<EntityConfig>,
}
