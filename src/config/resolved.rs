//! Resolved catalog: entity definitions validated and flattened for runtime use.

use crate::config::{ColumnDefaultConfig, ValidationRule};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Semantic type tag driving schema synthesis, filter keys and value coercion.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SemanticType {
    Integer,
    Number,
    Boolean,
    String,
    Date,
    DateTime,
    Uuid,
    Enum,
    Json,
}

impl SemanticType {
    /// Infer from a PostgreSQL type name. Enumerated values win over the storage type.
    pub fn infer(pg_type: &str, has_values: bool) -> Self {
        if has_values {
            return SemanticType::Enum;
        }
        let lower = base_type(pg_type);
        match lower.as_str() {
            "serial" | "bigserial" | "smallserial" | "int" | "int2" | "int4" | "int8" | "integer"
            | "bigint" | "smallint" => SemanticType::Integer,
            "numeric" | "decimal" | "real" | "float4" | "float8" | "double precision" | "float" => {
                SemanticType::Number
            }
            "bool" | "boolean" => SemanticType::Boolean,
            "date" => SemanticType::Date,
            "json" | "jsonb" => SemanticType::Json,
            "uuid" => SemanticType::Uuid,
            s if s.starts_with("timestamp") => SemanticType::DateTime,
            _ => SemanticType::String,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SemanticType::Integer => "integer",
            SemanticType::Number => "number",
            SemanticType::Boolean => "boolean",
            SemanticType::String => "string",
            SemanticType::Date => "date",
            SemanticType::DateTime => "date-time",
            SemanticType::Uuid => "uuid",
            SemanticType::Enum => "enum",
            SemanticType::Json => "json",
        }
    }
}

fn base_type(pg_type: &str) -> String {
    let lower = pg_type.trim().to_lowercase();
    match lower.find('(') {
        Some(i) => lower[..i].trim().to_string(),
        None => lower,
    }
}

/// Type used in `$n::<type>` casts when binding values for this column.
pub fn cast_type(pg_type: &str) -> String {
    let base = base_type(pg_type);
    match base.as_str() {
        "serial" => "integer".into(),
        "bigserial" => "bigint".into(),
        "smallserial" => "smallint".into(),
        "varchar" | "character varying" | "char" | "character" | "bpchar" => "text".into(),
        "timestamp with time zone" => "timestamptz".into(),
        "timestamp without time zone" => "timestamp".into(),
        "decimal" => "numeric".into(),
        // schema-qualified custom types keep their spelling
        _ if pg_type.contains('.') => pg_type.trim().to_string(),
        _ => base,
    }
}

/// Declared length of `varchar(n)` / `char(n)`.
pub(crate) fn declared_length(pg_type: &str) -> Option<u32> {
    let lower = pg_type.to_lowercase();
    if !(lower.starts_with("varchar") || lower.starts_with("char")) {
        return None;
    }
    let open = lower.find('(')?;
    let close = lower.find(')')?;
    lower.get(open + 1..close)?.trim().parse().ok()
}

#[derive(Clone, Debug)]
pub struct ColumnMeta {
    pub name: String,
    pub semantic: SemanticType,
    /// Declared storage type, as used in DDL.
    pub pg_type: String,
    /// Cast applied to bound parameters.
    pub cast: String,
    pub nullable: bool,
    pub has_default: bool,
    pub default: Option<ColumnDefaultConfig>,
    /// Serial columns: filled by the store on insert.
    pub generated: bool,
    pub read_only: bool,
    pub unique: bool,
    pub on_update_now: bool,
    pub enum_values: Vec<String>,
    /// Element type of json array columns.
    pub items: Option<SemanticType>,
    pub validation: ValidationRule,
    /// `validation.pattern`, compiled once at scan.
    pub pattern: Option<Regex>,
}

impl ColumnMeta {
    pub fn is_array(&self) -> bool {
        self.items.is_some()
    }
}

/// How a resource identifies its rows in URLs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PkConfig {
    /// A single primary-key column named `id`.
    Simple { field: String },
    /// Composite key, or a single key column not named `id`; exposed through an opaque token.
    Derived { fields: Vec<String> },
}

impl PkConfig {
    pub fn from_columns(columns: Vec<String>) -> Self {
        match columns.as_slice() {
            [only] if only == "id" => PkConfig::Simple { field: only.clone() },
            _ => PkConfig::Derived { fields: columns },
        }
    }

    pub fn fields(&self) -> &[String] {
        match self {
            PkConfig::Simple { field } => std::slice::from_ref(field),
            PkConfig::Derived { fields } => fields,
        }
    }

    pub fn is_derived(&self) -> bool {
        matches!(self, PkConfig::Derived { .. })
    }
}

#[derive(Clone, Debug)]
pub struct Resource {
    pub name: String,
    pub schema_name: String,
    pub table_name: String,
    pub columns: Vec<ColumnMeta>,
    pub primary_key: PkConfig,
    /// Unique column sets, primary key first; upsert conflict targets.
    pub unique: Vec<Vec<String>>,
    /// Column name -> referenced resource name.
    pub references: BTreeMap<String, String>,
}

impl Resource {
    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn is_key_column(&self, name: &str) -> bool {
        self.primary_key.fields().iter().any(|f| f == name)
    }

    pub fn writable_columns(&self) -> impl Iterator<Item = &ColumnMeta> {
        self.columns.iter().filter(|c| !c.read_only)
    }

    /// First unique set whose columns are all present in `present`.
    pub fn conflict_target<'a>(&'a self, present: &dyn Fn(&str) -> bool) -> Option<&'a [String]> {
        self.unique
            .iter()
            .find(|set| !set.is_empty() && set.iter().all(|c| present(c)))
            .map(|v| v.as_slice())
    }
}

/// Registry of all resources, built once by [`crate::config::scan`].
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    resources: Vec<Arc<Resource>>,
    by_name: HashMap<String, Arc<Resource>>,
    by_table: HashMap<String, Arc<Resource>>,
}

impl Catalog {
    pub(crate) fn new(resources: Vec<Resource>) -> Self {
        let resources: Vec<Arc<Resource>> = resources.into_iter().map(Arc::new).collect();
        let by_name = resources.iter().map(|r| (r.name.clone(), r.clone())).collect();
        let by_table = resources
            .iter()
            .map(|r| (r.table_name.clone(), r.clone()))
            .collect();
        Self {
            resources,
            by_name,
            by_table,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Resource>> {
        self.by_name.get(name)
    }

    pub fn by_table(&self, table: &str) -> Option<&Arc<Resource>> {
        self.by_table.get(table)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Resource>> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
