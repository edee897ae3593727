//! Flat filter objects to typed predicates, sort and paging.

pub mod params;

pub use params::{ListParams, SortOrder, SortParam};

use crate::config::Resource;
use crate::error::AppError;
use crate::identity::KeyValue;
use crate::schema::FieldKind;
use crate::store::QueryExecutor;
use serde_json::{Map, Value};

pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 10_000;

/// Filter key operators, selected by the key suffix after the last `_`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    Gt,
    Lt,
    Gte,
    Lte,
    Like,
    In,
    Has,
    IsNull,
}

impl FilterOp {
    pub fn suffix(self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Gt => "gt",
            FilterOp::Lt => "lt",
            FilterOp::Gte => "gte",
            FilterOp::Lte => "lte",
            FilterOp::Like => "like",
            FilterOp::In => "in",
            FilterOp::Has => "has",
            FilterOp::IsNull => "isNull",
        }
    }

    pub fn from_suffix(s: &str) -> Option<FilterOp> {
        Some(match s {
            "eq" => FilterOp::Eq,
            "gt" => FilterOp::Gt,
            "lt" => FilterOp::Lt,
            "gte" => FilterOp::Gte,
            "lte" => FilterOp::Lte,
            "like" => FilterOp::Like,
            "in" => FilterOp::In,
            "has" => FilterOp::Has,
            "isNull" => FilterOp::IsNull,
            _ => return None,
        })
    }

    /// Public filter key for a column; equality uses the bare column name.
    pub fn key_for(self, column: &str) -> String {
        match self {
            FilterOp::Eq => column.to_string(),
            op => format!("{}_{}", column, op.suffix()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Gt,
    Lt,
    Gte,
    Lte,
}

impl Comparison {
    pub fn sql(self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Gt => ">",
            Comparison::Lt => "<",
            Comparison::Gte => ">=",
            Comparison::Lte => "<=",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// Never matches NULL.
    Compare {
        column: String,
        op: Comparison,
        value: Value,
    },
    /// LIKE pattern; `has` filters arrive escaped and wrapped in `%`.
    Like {
        column: String,
        pattern: String,
        case_insensitive: bool,
    },
    /// Empty `values` matches nothing.
    In { column: String, values: Vec<Value> },
    IsNull { column: String, is_null: bool },
    /// Rows whose primary key is one of `keys`.
    KeyIn { columns: Vec<String>, keys: Vec<KeyValue> },
}

/// Conditions joined with AND.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Predicate(pub Vec<Condition>);

impl Predicate {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.0
    }

    pub fn by_keys(resource: &Resource, keys: Vec<KeyValue>) -> Self {
        Predicate(vec![Condition::KeyIn {
            columns: resource.primary_key.fields().to_vec(),
            keys,
        }])
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListQuery {
    pub predicate: Predicate,
    pub order_by: Option<OrderBy>,
    pub limit: u32,
    pub offset: u64,
}

/// Escape LIKE metacharacters so the value matches literally.
pub fn escape_like(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    for ch in value.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

pub fn translate(
    resource: &Resource,
    filter: &Map<String, Value>,
    sort: Option<&SortParam>,
    limit: Option<u32>,
    offset: Option<u64>,
) -> Result<ListQuery, AppError> {
    let limit = limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(AppError::validation(
            "query.limit",
            format!("must be between 1 and {}", MAX_LIMIT),
        ));
    }

    let mut conditions = Vec::new();
    for (key, value) in filter {
        if key == "q" {
            if let Some(condition) = free_text(resource, value) {
                conditions.push(condition);
            }
            continue;
        }
        let Some((column, op)) = split_key(resource, key) else {
            tracing::debug!(resource = %resource.name, key = %key, "ignoring unknown filter key");
            continue;
        };
        conditions.push(condition(resource, key, column, op, value)?);
    }

    let order_by = sort.and_then(|s| {
        s.field
            .as_deref()
            .filter(|f| resource.has_column(f))
            .map(|f| OrderBy {
                column: f.to_string(),
                descending: s.order == SortOrder::Desc,
            })
    });

    Ok(ListQuery {
        predicate: Predicate(conditions),
        order_by,
        limit,
        offset: offset.unwrap_or(0),
    })
}

fn split_key<'a>(resource: &Resource, key: &'a str) -> Option<(&'a str, FilterOp)> {
    if let Some((prefix, suffix)) = key.rsplit_once('_') {
        if let Some(op) = FilterOp::from_suffix(suffix) {
            if resource.has_column(prefix) {
                return Some((prefix, op));
            }
        }
    }
    resource.has_column(key).then_some((key, FilterOp::Eq))
}

fn free_text(resource: &Resource, value: &Value) -> Option<Condition> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        return None;
    }
    let column = ["name", "title", "id"].into_iter().find(|c| resource.has_column(c))?;
    Some(Condition::Like {
        column: column.to_string(),
        pattern: format!("%{}%", escape_like(&text)),
        case_insensitive: true,
    })
}

fn condition(
    resource: &Resource,
    key: &str,
    column: &str,
    op: FilterOp,
    value: &Value,
) -> Result<Condition, AppError> {
    let path = format!("filter.{}", key);
    let meta = resource
        .column(column)
        .ok_or_else(|| AppError::validation(&path, "unknown field"))?;
    let kind = FieldKind::of(meta);
    let scalar = |v: &Value| -> Result<Value, AppError> {
        match v {
            Value::Array(items) => match items.last() {
                Some(last) if items.len() == 1 => kind.coerce(last, &path),
                _ => Err(AppError::validation(&path, "must be a single value")),
            },
            other => kind.coerce(other, &path),
        }
    };
    let compare = |op: Comparison| -> Result<Condition, AppError> {
        Ok(Condition::Compare {
            column: column.to_string(),
            op,
            value: scalar(value)?,
        })
    };
    let text = || -> Result<String, AppError> {
        match FieldKind::String.coerce(value, &path)? {
            Value::String(s) => Ok(s),
            _ => Err(AppError::validation(&path, "must be a string")),
        }
    };

    match op {
        FilterOp::Eq => compare(Comparison::Eq),
        FilterOp::Gt => compare(Comparison::Gt),
        FilterOp::Lt => compare(Comparison::Lt),
        FilterOp::Gte => compare(Comparison::Gte),
        FilterOp::Lte => compare(Comparison::Lte),
        FilterOp::Like => Ok(Condition::Like {
            column: column.to_string(),
            pattern: text()?,
            case_insensitive: false,
        }),
        FilterOp::Has => Ok(Condition::Like {
            column: column.to_string(),
            pattern: format!("%{}%", escape_like(&text()?)),
            case_insensitive: true,
        }),
        FilterOp::In => {
            let items = match value {
                Value::Array(items) => items.clone(),
                other => vec![other.clone()],
            };
            let values = items
                .iter()
                .map(|v| kind.coerce(v, &path))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Condition::In {
                column: column.to_string(),
                values,
            })
        }
        FilterOp::IsNull => match FieldKind::Boolean.coerce(value, &path)? {
            Value::Bool(is_null) => Ok(Condition::IsNull {
                column: column.to_string(),
                is_null,
            }),
            _ => Err(AppError::validation(&path, "must be a boolean")),
        },
    }
}

/// Total for the `x-total` header. Unfiltered counts switch to the store's estimate
/// once it exceeds `approx_threshold`.
pub async fn count_total(
    executor: &dyn QueryExecutor,
    resource: &Resource,
    predicate: &Predicate,
    approx_threshold: u64,
) -> Result<u64, AppError> {
    if predicate.is_empty() {
        if let Some(estimate) = executor.estimate_rows(resource).await? {
            if estimate > approx_threshold {
                return Ok(estimate);
            }
        }
    }
    executor.count(resource, predicate).await
}
