//! Per-resource read / create / update / filter schemas and the value coercion they drive.

pub mod openapi;

use crate::auth::Rule;
use crate::config::{ColumnMeta, Resource, SemanticType, ValidationRule};
use crate::error::AppError;
use crate::query::FilterOp;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use regex::Regex;
use serde_json::{Map, Number, Value};

/// Format tag for json columns holding capability rules.
pub const RULES_FORMAT: &str = "rules";

#[derive(Clone, Debug, PartialEq)]
pub enum FieldKind {
    Integer,
    Number,
    Boolean,
    String,
    Date,
    DateTime,
    Uuid,
    Enum(Vec<String>),
    Json,
    Array(Box<FieldKind>),
}

impl FieldKind {
    pub fn of(column: &ColumnMeta) -> FieldKind {
        match (column.semantic, column.items) {
            (_, Some(items)) => FieldKind::Array(Box::new(FieldKind::scalar(items, &[]))),
            (semantic, None) => FieldKind::scalar(semantic, &column.enum_values),
        }
    }

    fn scalar(semantic: SemanticType, values: &[String]) -> FieldKind {
        match semantic {
            SemanticType::Integer => FieldKind::Integer,
            SemanticType::Number => FieldKind::Number,
            SemanticType::Boolean => FieldKind::Boolean,
            SemanticType::String => FieldKind::String,
            SemanticType::Date => FieldKind::Date,
            SemanticType::DateTime => FieldKind::DateTime,
            SemanticType::Uuid => FieldKind::Uuid,
            SemanticType::Enum => FieldKind::Enum(values.to_vec()),
            SemanticType::Json => FieldKind::Json,
        }
    }

    /// Coerce a JSON or query-string value into this kind. `path` names the value in errors.
    pub fn coerce(&self, value: &Value, path: &str) -> Result<Value, AppError> {
        let fail = |what: &str| AppError::validation(path, format!("must be {}", what));
        match self {
            FieldKind::Integer => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
                Value::Number(n) => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Ok(Value::from(f as i64)),
                    _ => Err(fail("an integer")),
                },
                Value::String(s) => s.trim().parse::<i64>().map(Value::from).map_err(|_| fail("an integer")),
                _ => Err(fail("an integer")),
            },
            FieldKind::Number => match value {
                Value::Number(_) => Ok(value.clone()),
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| fail("a number")),
                _ => Err(fail("a number")),
            },
            FieldKind::Boolean => match value {
                Value::Bool(_) => Ok(value.clone()),
                Value::String(s) => match s.as_str() {
                    "true" | "1" => Ok(Value::Bool(true)),
                    "false" | "0" => Ok(Value::Bool(false)),
                    _ => Err(fail("a boolean")),
                },
                _ => Err(fail("a boolean")),
            },
            FieldKind::String => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Number(n) => Ok(Value::String(n.to_string())),
                Value::Bool(b) => Ok(Value::String(b.to_string())),
                _ => Err(fail("a string")),
            },
            FieldKind::Date => value
                .as_str()
                .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
                .map(|d| Value::String(d.format("%Y-%m-%d").to_string()))
                .ok_or_else(|| fail("a date (YYYY-MM-DD)")),
            FieldKind::DateTime => value
                .as_str()
                .and_then(parse_date_time)
                .map(|t| Value::String(format_date_time(t)))
                .ok_or_else(|| fail("a date-time")),
            FieldKind::Uuid => value
                .as_str()
                .and_then(|s| uuid::Uuid::parse_str(s.trim()).ok())
                .map(|u| Value::String(u.to_string()))
                .ok_or_else(|| fail("a uuid")),
            FieldKind::Enum(values) => match value.as_str() {
                Some(s) if values.iter().any(|v| v == s) => Ok(value.clone()),
                _ => Err(AppError::validation(
                    path,
                    format!("must be one of: {}", values.join(", ")),
                )),
            },
            FieldKind::Json => Ok(value.clone()),
            FieldKind::Array(items) => match value {
                Value::Array(elems) => elems
                    .iter()
                    .enumerate()
                    .map(|(i, v)| items.coerce(v, &format!("{}.{}", path, i)))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                _ => Err(fail("an array")),
            },
        }
    }
}

/// Accepts RFC 3339, naive `YYYY-MM-DD[T ]HH:MM:SS` (UTC) and bare dates (midnight UTC).
pub fn parse_date_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(t.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

pub fn format_date_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Clone, Debug)]
pub struct FieldSchema {
    pub name: String,
    pub kind: FieldKind,
    pub nullable: bool,
    pub required: bool,
    pub read_only: bool,
    /// Referenced resource, for documentation.
    pub reference: Option<String>,
    pub rule: ValidationRule,
    pub pattern: Option<Regex>,
}

#[derive(Clone, Debug)]
pub struct ObjectSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

impl ObjectSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn required(&self) -> impl Iterator<Item = &FieldSchema> {
        self.fields.iter().filter(|f| f.required)
    }

    /// Check and coerce a request body. Keys outside the schema (read-only columns,
    /// the virtual id) are dropped. Errors carry the path `body.<field>`.
    pub fn validate(&self, body: &Map<String, Value>) -> Result<Map<String, Value>, AppError> {
        let mut out = Map::new();
        for field in &self.fields {
            let path = format!("body.{}", field.name);
            match body.get(&field.name) {
                None if field.required => return Err(AppError::validation(path, "is required")),
                None => {}
                Some(Value::Null) if field.nullable => {
                    out.insert(field.name.clone(), Value::Null);
                }
                Some(Value::Null) => return Err(AppError::validation(path, "must not be null")),
                Some(v) => {
                    let coerced = field.kind.coerce(v, &path)?;
                    check_rule(&path, &coerced, field)?;
                    out.insert(field.name.clone(), coerced);
                }
            }
        }
        Ok(out)
    }
}

fn check_rule(path: &str, v: &Value, field: &FieldSchema) -> Result<(), AppError> {
    let rule = &field.rule;
    if let Some(format) = &rule.format {
        check_format(path, v, format)?;
    }
    if !rule.one_of.is_empty() && !rule.one_of.contains(v) {
        let allowed: Vec<String> = rule.one_of.iter().map(Value::to_string).collect();
        return Err(AppError::validation(path, format!("must be one of: {}", allowed.join(", "))));
    }
    if let Some(s) = v.as_str() {
        let len = s.chars().count();
        if let Some(max) = rule.max_length {
            if len > max as usize {
                return Err(AppError::validation(path, format!("must be at most {} characters", max)));
            }
        }
        if let Some(min) = rule.min_length {
            if len < min as usize {
                return Err(AppError::validation(path, format!("must be at least {} characters", min)));
            }
        }
        if let Some(re) = &field.pattern {
            if !re.is_match(s) {
                return Err(AppError::validation(path, "does not match required pattern"));
            }
        }
    }
    if let Some(n) = v.as_f64() {
        if let Some(min) = rule.minimum {
            if n < min {
                return Err(AppError::validation(path, format!("must be at least {}", min)));
            }
        }
        if let Some(max) = rule.maximum {
            if n > max {
                return Err(AppError::validation(path, format!("must be at most {}", max)));
            }
        }
    }
    Ok(())
}

fn check_format(path: &str, v: &Value, format: &str) -> Result<(), AppError> {
    if format == RULES_FORMAT {
        return serde_json::from_value::<Vec<Rule>>(v.clone())
            .map(|_| ())
            .map_err(|err| AppError::validation(path, format!("must be a list of rules: {}", err)));
    }
    let Some(s) = v.as_str() else {
        return Ok(());
    };
    let ok = match format.to_lowercase().as_str() {
        "email" => {
            let mut parts = s.splitn(2, '@');
            matches!((parts.next(), parts.next()), (Some(local), Some(domain)) if !local.is_empty() && domain.contains('.'))
        }
        "uuid" => uuid::Uuid::parse_str(s).is_ok(),
        "uri" | "url" => s.starts_with("http://") || s.starts_with("https://"),
        _ => true,
    };
    if ok {
        Ok(())
    } else {
        Err(AppError::validation(path, format!("must be a valid {}", format)))
    }
}

/// One accepted filter key, e.g. `age_gte`.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterKey {
    pub key: String,
    pub column: String,
    pub op: FilterOp,
    pub kind: FieldKind,
}

#[derive(Clone, Debug)]
pub struct FilterSchema {
    pub name: String,
    pub keys: Vec<FilterKey>,
    /// Column searched by the free-text `q` key.
    pub q_target: Option<String>,
}

impl FilterSchema {
    pub fn key(&self, key: &str) -> Option<&FilterKey> {
        self.keys.iter().find(|k| k.key == key)
    }
}

#[derive(Clone, Debug)]
pub struct ResourceSchemas {
    pub read: ObjectSchema,
    pub create: ObjectSchema,
    pub update: ObjectSchema,
    pub filter: FilterSchema,
}

pub fn synthesize(resource: &Resource) -> ResourceSchemas {
    let mut read_fields = Vec::with_capacity(resource.columns.len() + 1);
    if resource.primary_key.is_derived() && !resource.has_column("id") {
        read_fields.push(FieldSchema {
            name: "id".into(),
            kind: FieldKind::String,
            nullable: false,
            required: true,
            read_only: true,
            reference: None,
            rule: ValidationRule::default(),
            pattern: None,
        });
    }
    read_fields.extend(resource.columns.iter().map(|c| FieldSchema {
        name: c.name.clone(),
        kind: FieldKind::of(c),
        nullable: c.nullable,
        required: !c.nullable,
        read_only: c.read_only,
        reference: resource.references.get(&c.name).cloned(),
        rule: c.validation.clone(),
        pattern: c.pattern.clone(),
    }));

    let writable = |all_optional: bool| -> Vec<FieldSchema> {
        resource
            .writable_columns()
            .map(|c| FieldSchema {
                name: c.name.clone(),
                kind: FieldKind::of(c),
                nullable: c.nullable,
                required: !all_optional && !c.nullable && !c.has_default,
                read_only: false,
                reference: resource.references.get(&c.name).cloned(),
                rule: c.validation.clone(),
                pattern: c.pattern.clone(),
            })
            .collect()
    };

    ResourceSchemas {
        read: ObjectSchema {
            name: format!("{}_read", resource.name),
            fields: read_fields,
        },
        create: ObjectSchema {
            name: format!("{}_create", resource.name),
            fields: writable(false),
        },
        update: ObjectSchema {
            name: format!("{}_update", resource.name),
            fields: writable(true),
        },
        filter: filter_schema(resource),
    }
}

fn filter_schema(resource: &Resource) -> FilterSchema {
    let mut keys = Vec::new();
    for c in &resource.columns {
        let kind = FieldKind::of(c);
        let mut ops: Vec<FilterOp> = match (c.semantic, c.items) {
            (_, Some(_)) | (SemanticType::Json, _) => vec![],
            (SemanticType::Integer | SemanticType::Number | SemanticType::Date, _) => {
                vec![FilterOp::Eq, FilterOp::Gte, FilterOp::Lte]
            }
            (SemanticType::DateTime, _) => vec![FilterOp::Gte, FilterOp::Lte],
            (SemanticType::String | SemanticType::Uuid, _) => vec![FilterOp::Eq, FilterOp::Has],
            (SemanticType::Enum | SemanticType::Boolean, _) => vec![FilterOp::Eq],
        };
        let single_reference = resource.references.contains_key(&c.name) && !c.is_array();
        if resource.is_key_column(&c.name) || single_reference || !c.enum_values.is_empty() {
            ops.push(FilterOp::In);
        }
        if c.nullable {
            ops.push(FilterOp::IsNull);
        }
        for op in ops {
            let kind = match op {
                FilterOp::In => FieldKind::Array(Box::new(kind.clone())),
                FilterOp::IsNull => FieldKind::Boolean,
                FilterOp::Has => FieldKind::String,
                _ => kind.clone(),
            };
            keys.push(FilterKey {
                key: op.key_for(&c.name),
                column: c.name.clone(),
                op,
                kind,
            });
        }
    }
    let q_target = ["name", "title", "id"]
        .into_iter()
        .find(|f| resource.has_column(f))
        .map(str::to_string);
    FilterSchema {
        name: format!("{}_filter", resource.name),
        keys,
        q_target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{scan, CatalogConfig};
    use serde_json::json;

    fn people() -> std::sync::Arc<Resource> {
        let cfg: CatalogConfig = serde_json::from_value(json!({ "entities": [
            { "name": "person", "primary_key": "id", "columns": [
                { "name": "id", "type": "serial", "nullable": false },
                { "name": "name", "type": "varchar(32)", "nullable": false },
                { "name": "age", "type": "integer" },
                { "name": "born", "type": "date", "nullable": false },
                { "name": "seen_at", "type": "timestamptz", "nullable": false },
                { "name": "kind", "type": "text", "nullable": false, "values": ["a", "b"], "default": "'a'" },
                { "name": "tags", "type": "jsonb", "items": "text" }
            ], "timestamps": true }
        ]}))
        .unwrap();
        scan(&cfg).unwrap().get("person").unwrap().clone()
    }

    fn keys(s: &FilterSchema) -> Vec<&str> {
        s.keys.iter().map(|k| k.key.as_str()).collect()
    }

    #[test]
    fn filter_keys_follow_semantic_types() {
        let schemas = synthesize(&people());
        assert_eq!(
            keys(&schemas.filter),
            [
                "id", "id_gte", "id_lte", "id_in",
                "name", "name_has",
                "age", "age_gte", "age_lte", "age_isNull",
                "born", "born_gte", "born_lte",
                "seen_at_gte", "seen_at_lte",
                "kind", "kind_in",
                "tags_isNull",
                "created_at_gte", "created_at_lte",
                "updated_at_gte", "updated_at_lte",
            ]
        );
        assert_eq!(schemas.filter.q_target.as_deref(), Some("name"));
    }

    #[test]
    fn create_requires_non_nullable_without_default() {
        let schemas = synthesize(&people());
        let required: Vec<_> = schemas.create.required().map(|f| f.name.as_str()).collect();
        assert_eq!(required, ["name", "born", "seen_at"]);
        assert!(schemas.create.field("created_at").is_none());
        assert!(schemas.read.field("created_at").unwrap().read_only);
        assert_eq!(schemas.update.required().count(), 0);
    }

    #[test]
    fn body_validation_reports_paths() {
        let schemas = synthesize(&people());
        let err = schemas
            .create
            .validate(json!({ "name": "x", "born": "2000-01-01" }).as_object().unwrap())
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { ref path, .. } if path == "body.seen_at"));

        let err = schemas
            .update
            .validate(json!({ "name": "a".repeat(33) }).as_object().unwrap())
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { ref path, .. } if path == "body.name"));

        let ok = schemas
            .update
            .validate(json!({ "age": "42", "tags": ["x"], "created_at": "ignored" }).as_object().unwrap())
            .unwrap();
        assert_eq!(ok.get("age"), Some(&json!(42)));
        assert!(!ok.contains_key("created_at"));
    }

    #[test]
    fn role_tiers_and_group_rules_are_checked_on_write() {
        use crate::config::{GROUP_RESOURCE, USER_RESOURCE};
        let catalog = scan(&CatalogConfig::default().with_builtins()).unwrap();

        let user = synthesize(catalog.get(USER_RESOURCE).unwrap());
        let err = user.update.validate(json!({ "role": 7 }).as_object().unwrap()).unwrap_err();
        assert!(matches!(err, AppError::Validation { ref path, .. } if path == "body.role"));
        let ok = user.update.validate(json!({ "role": "16" }).as_object().unwrap()).unwrap();
        assert_eq!(ok.get("role"), Some(&json!(16)));

        let group = synthesize(catalog.get(GROUP_RESOURCE).unwrap());
        let err = group
            .update
            .validate(json!({ "rules": [{ "action": "read" }] }).as_object().unwrap())
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { ref path, .. } if path == "body.rules"));
        let rules = json!({ "rules": [{ "subject": ["shop_order"], "action": "read", "inverted": true }] });
        assert!(group.update.validate(rules.as_object().unwrap()).is_ok());
    }

    #[test]
    fn patterns_reject_non_matching_strings() {
        let cfg: CatalogConfig = serde_json::from_value(json!({ "entities": [
            { "name": "country", "primary_key": "code", "columns": [
                { "name": "code", "type": "varchar(2)", "nullable": false, "validation": { "pattern": "^[A-Z]+$" } }
            ]}
        ]}))
        .unwrap();
        let catalog = scan(&cfg).unwrap();
        let schemas = synthesize(catalog.get("country").unwrap());
        assert!(schemas.create.validate(json!({ "code": "FR" }).as_object().unwrap()).is_ok());
        let err = schemas.create.validate(json!({ "code": "fr" }).as_object().unwrap()).unwrap_err();
        assert!(matches!(err, AppError::Validation { ref path, .. } if path == "body.code"));
    }

    #[test]
    fn coercion_normalizes_date_times() {
        let v = FieldKind::DateTime.coerce(&json!("2024-03-01 10:00:00"), "x").unwrap();
        assert_eq!(v, json!("2024-03-01T10:00:00.000Z"));
        assert!(FieldKind::Integer.coerce(&json!("ten"), "filter.age").is_err());
        assert_eq!(FieldKind::Boolean.coerce(&json!("false"), "x").unwrap(), json!(false));
    }
}
