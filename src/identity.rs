//! Opaque id tokens for resources addressed by derived keys.

use crate::config::{PkConfig, Resource, SemanticType};
use crate::error::AppError;
use crate::schema::FieldKind;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::{Map, Value};

/// Primary-key values of one row, in key-column order.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyValue(pub Vec<Value>);

impl KeyValue {
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Key values read from a row, if every key column is present.
    pub fn from_row(resource: &Resource, row: &Map<String, Value>) -> Option<KeyValue> {
        resource
            .primary_key
            .fields()
            .iter()
            .map(|f| row.get(f).filter(|v| !v.is_null()).cloned())
            .collect::<Option<Vec<_>>>()
            .map(KeyValue)
    }
}

/// Token for a row: the id itself for simple keys, base64url JSON for derived ones.
pub fn encode(resource: &Resource, row: &Map<String, Value>) -> Option<String> {
    let key = KeyValue::from_row(resource, row)?;
    encode_key(&resource.primary_key, &key)
}

pub fn encode_key(pk: &PkConfig, key: &KeyValue) -> Option<String> {
    match pk {
        PkConfig::Simple { .. } => match key.0.first()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        },
        PkConfig::Derived { .. } => {
            let packed = serde_json::to_vec(&key.0).ok()?;
            Some(URL_SAFE_NO_PAD.encode(packed))
        }
    }
}

/// Reverse of [`encode`]. Any malformed token is `InvalidIdValue`.
pub fn decode(resource: &Resource, token: &str) -> Result<KeyValue, AppError> {
    let invalid = || AppError::InvalidIdValue(token.to_string());
    match &resource.primary_key {
        PkConfig::Simple { field } => {
            let semantic = resource
                .column(field)
                .map(|c| c.semantic)
                .unwrap_or(SemanticType::String);
            let value = match semantic {
                SemanticType::Integer => token
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| invalid())?,
                SemanticType::Uuid => uuid::Uuid::parse_str(token)
                    .map(|u| Value::String(u.to_string()))
                    .map_err(|_| invalid())?,
                _ => Value::String(token.to_string()),
            };
            Ok(KeyValue(vec![value]))
        }
        PkConfig::Derived { fields } => {
            let bytes = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
            let values: Vec<Value> = serde_json::from_slice(&bytes).map_err(|_| invalid())?;
            if values.len() != fields.len()
                || values.iter().any(|v| v.is_null() || v.is_array() || v.is_object())
            {
                return Err(invalid());
            }
            fields
                .iter()
                .zip(values)
                .map(|(field, value)| match resource.column(field) {
                    Some(column) => FieldKind::of(column).coerce(&value, field).map_err(|_| invalid()),
                    None => Ok(value),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(KeyValue)
        }
    }
}

/// Split a comma-joined id list. An empty list or empty element fails before any decoding.
pub fn parse_ids(resource: &Resource, raw: &str) -> Result<Vec<KeyValue>, AppError> {
    let parts: Vec<&str> = raw.split(',').map(str::trim).collect();
    if raw.trim().is_empty() || parts.iter().any(|p| p.is_empty()) {
        return Err(AppError::validation("params.ids", "Ids empty"));
    }
    parts.into_iter().map(|p| decode(resource, p)).collect()
}

/// Prepend the virtual `id` field on rows of derived-key resources.
pub fn with_virtual_id(resource: &Resource, row: Map<String, Value>) -> Map<String, Value> {
    if !resource.primary_key.is_derived() {
        return row;
    }
    let Some(token) = encode(resource, &row) else {
        return row;
    };
    let mut out = Map::with_capacity(row.len() + 1);
    out.insert("id".into(), Value::String(token));
    for (k, v) in row {
        if k != "id" {
            out.insert(k, v);
        }
    }
    out
}
