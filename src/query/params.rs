//! Deep-object query string: `limit`, `offset`, `sort[field]`, `sort[order]`, `filter[key]`.

use crate::error::AppError;
use serde_json::{Map, Value};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SortParam {
    pub field: Option<String>,
    pub order: SortOrder,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ListParams {
    pub limit: Option<u32>,
    pub offset: Option<u64>,
    pub sort: SortParam,
    pub filter: Map<String, Value>,
}

impl ListParams {
    /// Build from raw query pairs. `_in` keys split on commas and accumulate across
    /// repeated keys; any other repeated key keeps its last value.
    pub fn from_pairs(pairs: &[(String, String)]) -> Result<Self, AppError> {
        let mut params = ListParams::default();
        for (key, value) in pairs {
            match key.as_str() {
                "limit" => {
                    params.limit = Some(
                        value
                            .trim()
                            .parse()
                            .map_err(|_| AppError::validation("query.limit", "must be an integer"))?,
                    )
                }
                "offset" => {
                    params.offset = Some(
                        value
                            .trim()
                            .parse()
                            .map_err(|_| AppError::validation("query.offset", "must be a non-negative integer"))?,
                    )
                }
                "sort[field]" => params.sort.field = Some(value.clone()).filter(|v| !v.is_empty()),
                "sort[order]" => {
                    params.sort.order = match value.to_ascii_uppercase().as_str() {
                        "ASC" => SortOrder::Asc,
                        "DESC" => SortOrder::Desc,
                        _ => return Err(AppError::validation("query.sort.order", "must be ASC or DESC")),
                    }
                }
                other => {
                    let Some(name) = other.strip_prefix("filter[").and_then(|k| k.strip_suffix(']')) else {
                        continue;
                    };
                    if name.ends_with("_in") {
                        let entry = params
                            .filter
                            .entry(name.to_string())
                            .or_insert_with(|| Value::Array(Vec::new()));
                        if let Value::Array(items) = entry {
                            items.extend(
                                value
                                    .split(',')
                                    .map(str::trim)
                                    .filter(|s| !s.is_empty())
                                    .map(|s| Value::String(s.to_string())),
                            );
                        }
                    } else {
                        params.filter.insert(name.to_string(), Value::String(value.clone()));
                    }
                }
            }
        }
        Ok(params)
    }
}
