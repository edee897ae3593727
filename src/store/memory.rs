//! In-process executor evaluating predicates over row vectors. Used by tests and demos.

use super::{QueryExecutor, Row};
use crate::config::{ColumnDefaultConfig, ColumnMeta, Resource, SemanticType};
use crate::error::AppError;
use crate::query::{Comparison, Condition, ListQuery, Predicate};
use crate::schema::{format_date_time, parse_date_time, FieldKind};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Default)]
struct Table {
    rows: Vec<Row>,
    next_id: i64,
}

#[derive(Clone, Default)]
pub struct MemoryExecutor {
    tables: Arc<RwLock<HashMap<String, Table>>>,
}

impl MemoryExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current rows of a resource, in insertion order.
    pub fn rows(&self, resource: &str) -> Vec<Row> {
        self.tables
            .read()
            .map(|t| t.get(resource).map(|t| t.rows.clone()).unwrap_or_default())
            .unwrap_or_default()
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Table>>, AppError> {
        self.tables
            .write()
            .map_err(|e| AppError::Store(format!("failed to acquire write lock: {}", e)))
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Table>>, AppError> {
        self.tables
            .read()
            .map_err(|e| AppError::Store(format!("failed to acquire read lock: {}", e)))
    }

    fn matching(&self, resource: &Resource, predicate: &Predicate) -> Result<Vec<Row>, AppError> {
        let tables = self.read()?;
        Ok(tables
            .get(&resource.name)
            .map(|t| {
                t.rows
                    .iter()
                    .filter(|row| matches(resource, predicate, row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn now() -> Value {
    Value::String(format_date_time(chrono::Utc::now()))
}

fn default_value(column: &ColumnMeta, table: &mut Table) -> Value {
    if column.generated {
        table.next_id += 1;
        return Value::from(table.next_id);
    }
    match &column.default {
        Some(ColumnDefaultConfig::Expression { expression }) => {
            let expr = expression.to_lowercase();
            if expr.contains("now") || expr.contains("current_timestamp") {
                now()
            } else if expr.contains("uuid") {
                Value::String(uuid::Uuid::new_v4().to_string())
            } else {
                Value::Null
            }
        }
        Some(ColumnDefaultConfig::Literal(raw)) => {
            let text = raw
                .trim()
                .split("::")
                .next()
                .unwrap_or("")
                .trim_matches('\'')
                .to_string();
            if column.semantic == SemanticType::Json {
                return serde_json::from_str(&text).unwrap_or(Value::Null);
            }
            FieldKind::of(column)
                .coerce(&Value::String(text), &column.name)
                .unwrap_or(Value::Null)
        }
        None => Value::Null,
    }
}

fn compare(column: Option<&ColumnMeta>, a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => {
            if column.map(|c| c.semantic) == Some(SemanticType::DateTime) {
                if let (Some(x), Some(y)) = (parse_date_time(x), parse_date_time(y)) {
                    return Some(x.cmp(&y));
                }
            }
            Some(x.cmp(y))
        }
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ if a == b => Some(Ordering::Equal),
        _ => None,
    }
}

fn equal(column: Option<&ColumnMeta>, a: &Value, b: &Value) -> bool {
    compare(column, a, b) == Some(Ordering::Equal)
}

fn text_of(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// SQL LIKE with `\` as the escape character.
fn like(text: &str, pattern: &str) -> bool {
    #[derive(Clone, Copy, PartialEq)]
    enum Tok {
        Lit(char),
        One,
        Many,
    }
    let mut toks = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        toks.push(match c {
            '\\' => Tok::Lit(chars.next().unwrap_or('\\')),
            '%' => Tok::Many,
            '_' => Tok::One,
            c => Tok::Lit(c),
        });
    }
    let text: Vec<char> = text.chars().collect();
    // dp[j]: pattern prefix of length j matches the text prefix so far
    let mut dp = vec![false; toks.len() + 1];
    dp[0] = true;
    for j in 1..=toks.len() {
        dp[j] = dp[j - 1] && toks[j - 1] == Tok::Many;
    }
    for ch in text {
        let mut next = vec![false; toks.len() + 1];
        for j in 1..=toks.len() {
            next[j] = match toks[j - 1] {
                Tok::Many => next[j - 1] || dp[j],
                Tok::One => dp[j - 1],
                Tok::Lit(c) => dp[j - 1] && c == ch,
            };
        }
        dp = next;
    }
    dp[toks.len()]
}

fn condition_holds(resource: &Resource, condition: &Condition, row: &Row) -> bool {
    let get = |c: &str| row.get(c).unwrap_or(&Value::Null);
    match condition {
        Condition::Compare { column, op, value } => {
            let actual = get(column);
            if actual.is_null() {
                return false;
            }
            let Some(ord) = compare(resource.column(column), actual, value) else {
                return false;
            };
            match op {
                Comparison::Eq => ord == Ordering::Equal,
                Comparison::Gt => ord == Ordering::Greater,
                Comparison::Lt => ord == Ordering::Less,
                Comparison::Gte => ord != Ordering::Less,
                Comparison::Lte => ord != Ordering::Greater,
            }
        }
        Condition::Like {
            column,
            pattern,
            case_insensitive,
        } => match text_of(get(column)) {
            Some(text) if *case_insensitive => like(&text.to_lowercase(), &pattern.to_lowercase()),
            Some(text) => like(&text, pattern),
            None => false,
        },
        Condition::In { column, values } => {
            let actual = get(column);
            !actual.is_null() && values.iter().any(|v| equal(resource.column(column), actual, v))
        }
        Condition::IsNull { column, is_null } => get(column).is_null() == *is_null,
        Condition::KeyIn { columns, keys } => keys.iter().any(|key| {
            columns
                .iter()
                .zip(key.values())
                .all(|(c, v)| equal(resource.column(c), get(c), v))
        }),
    }
}

fn matches(resource: &Resource, predicate: &Predicate, row: &Row) -> bool {
    predicate
        .conditions()
        .iter()
        .all(|c| condition_holds(resource, c, row))
}

fn check_unique(resource: &Resource, table: &Table, row: &Row, skip: Option<usize>) -> Result<(), AppError> {
    for set in &resource.unique {
        let clash = table.rows.iter().enumerate().any(|(i, other)| {
            Some(i) != skip
                && set.iter().all(|c| {
                    let v = row.get(c).unwrap_or(&Value::Null);
                    !v.is_null() && equal(resource.column(c), v, other.get(c).unwrap_or(&Value::Null))
                })
        });
        if clash {
            return Err(AppError::Store(format!(
                "duplicate key value violates unique constraint on {}({})",
                resource.name,
                set.join(", ")
            )));
        }
    }
    Ok(())
}

fn insert_row(resource: &Resource, table: &mut Table, values: &Row) -> Result<Row, AppError> {
    let mut row = Row::new();
    for c in &resource.columns {
        let v = match values.get(&c.name) {
            Some(v) => {
                if c.generated {
                    if let Some(n) = v.as_i64() {
                        table.next_id = table.next_id.max(n);
                    }
                }
                v.clone()
            }
            None => default_value(c, table),
        };
        if v.is_null() && !c.nullable {
            return Err(AppError::Store(format!(
                "null value in column \"{}\" of {} violates not-null constraint",
                c.name, resource.name
            )));
        }
        row.insert(c.name.clone(), v);
    }
    check_unique(resource, table, &row, None)?;
    table.rows.push(row.clone());
    Ok(row)
}

fn apply_update(resource: &Resource, row: &mut Row, values: &Row) {
    for c in &resource.columns {
        if let Some(v) = values.get(&c.name) {
            row.insert(c.name.clone(), v.clone());
        } else if c.on_update_now {
            row.insert(c.name.clone(), now());
        }
    }
}

#[async_trait]
impl QueryExecutor for MemoryExecutor {
    async fn select(&self, resource: &Resource, query: &ListQuery) -> Result<Vec<Row>, AppError> {
        let mut rows = self.matching(resource, &query.predicate)?;
        if let Some(order) = &query.order_by {
            let meta = resource.column(&order.column);
            rows.sort_by(|a, b| {
                let a = a.get(&order.column).unwrap_or(&Value::Null);
                let b = b.get(&order.column).unwrap_or(&Value::Null);
                // NULLs sort last ascending, first descending
                let ord = match (a.is_null(), b.is_null()) {
                    (true, true) => Ordering::Equal,
                    (true, false) => Ordering::Greater,
                    (false, true) => Ordering::Less,
                    (false, false) => compare(meta, a, b).unwrap_or(Ordering::Equal),
                };
                if order.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        Ok(rows
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect())
    }

    async fn select_where(&self, resource: &Resource, predicate: &Predicate) -> Result<Vec<Row>, AppError> {
        self.matching(resource, predicate)
    }

    async fn count(&self, resource: &Resource, predicate: &Predicate) -> Result<u64, AppError> {
        Ok(self.matching(resource, predicate)?.len() as u64)
    }

    async fn estimate_rows(&self, resource: &Resource) -> Result<Option<u64>, AppError> {
        let tables = self.read()?;
        Ok(Some(tables.get(&resource.name).map(|t| t.rows.len() as u64).unwrap_or(0)))
    }

    async fn insert(&self, resource: &Resource, values: &Row) -> Result<Row, AppError> {
        let mut tables = self.write()?;
        let table = tables.entry(resource.name.clone()).or_default();
        insert_row(resource, table, values)
    }

    async fn upsert(&self, resource: &Resource, values: &Row, target: &[String]) -> Result<Row, AppError> {
        let mut tables = self.write()?;
        let table = tables.entry(resource.name.clone()).or_default();
        let existing = table.rows.iter().position(|row| {
            target.iter().all(|c| {
                let v = values.get(c).unwrap_or(&Value::Null);
                !v.is_null() && equal(resource.column(c), v, row.get(c).unwrap_or(&Value::Null))
            })
        });
        let Some(index) = existing else {
            return insert_row(resource, table, values);
        };
        let mut updated = table.rows[index].clone();
        apply_update(resource, &mut updated, values);
        check_unique(resource, table, &updated, Some(index))?;
        table.rows[index] = updated.clone();
        Ok(updated)
    }

    async fn update(&self, resource: &Resource, predicate: &Predicate, values: &Row) -> Result<u64, AppError> {
        if values.is_empty() {
            return Ok(0);
        }
        let mut tables = self.write()?;
        let Some(table) = tables.get_mut(&resource.name) else {
            return Ok(0);
        };
        let targets: Vec<usize> = table
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| matches(resource, predicate, row))
            .map(|(i, _)| i)
            .collect();
        for &i in &targets {
            let mut updated = table.rows[i].clone();
            apply_update(resource, &mut updated, values);
            check_unique(resource, table, &updated, Some(i))?;
            table.rows[i] = updated;
        }
        Ok(targets.len() as u64)
    }

    async fn delete(&self, resource: &Resource, predicate: &Predicate) -> Result<u64, AppError> {
        let mut tables = self.write()?;
        let Some(table) = tables.get_mut(&resource.name) else {
            return Ok(0);
        };
        let before = table.rows.len();
        table.rows.retain(|row| !matches(resource, predicate, row));
        Ok((before - table.rows.len()) as u64)
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{scan, Catalog, CatalogConfig};
    use crate::identity::KeyValue;
    use crate::query::translate;
    use serde_json::json;

    fn catalog() -> Catalog {
        scan(&CatalogConfig::default().with_builtins()).unwrap()
    }

    fn row(v: Value) -> Row {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn like_honours_wildcards_and_escapes() {
        assert!(like("hello", "h%o"));
        assert!(like("hello", "_ello"));
        assert!(!like("hello", "h_o"));
        assert!(like("50%", "50\\%"));
        assert!(!like("500", "50\\%"));
        assert!(like("", "%"));
    }

    #[tokio::test]
    async fn insert_fills_serial_ids_and_defaults() {
        let catalog = catalog();
        let user = catalog.get("admin_user").unwrap();
        let store = MemoryExecutor::new();
        let a = store.insert(user, &row(json!({ "email": "a@x.io" }))).await.unwrap();
        let b = store.insert(user, &row(json!({ "email": "b@x.io", "role": 16 }))).await.unwrap();
        assert_eq!(a.get("id"), Some(&json!(1)));
        assert_eq!(b.get("id"), Some(&json!(2)));
        assert_eq!(a.get("role"), Some(&json!(0)));
        assert!(a.get("created_at").unwrap().is_string());
        assert!(store.insert(user, &row(json!({ "email": "a@x.io" }))).await.is_err());
    }

    #[tokio::test]
    async fn comparisons_skip_nulls_and_keys_select_rows() {
        let catalog = catalog();
        let user = catalog.get("admin_user").unwrap();
        let store = MemoryExecutor::new();
        for (email, name) in [("a@x.io", Some("Ann")), ("b@x.io", None), ("c@x.io", Some("Cid"))] {
            store
                .insert(user, &row(json!({ "email": email, "name": name })))
                .await
                .unwrap();
        }
        let filter = row(json!({ "name_has": "N" }));
        let q = translate(user, &filter, None, None, None).unwrap();
        assert_eq!(store.count(user, &q.predicate).await.unwrap(), 1);

        let keys = vec![KeyValue(vec![json!(3)]), KeyValue(vec![json!(1)]), KeyValue(vec![json!(99)])];
        let rows = store.select_where(user, &Predicate::by_keys(user, keys)).await.unwrap();
        assert_eq!(rows.len(), 2);

        let filter = row(json!({ "name_isNull": true }));
        let q = translate(user, &filter, None, None, None).unwrap();
        assert_eq!(store.count(user, &q.predicate).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_updates_on_conflict() {
        let catalog = catalog();
        let group = catalog.get("admin_group").unwrap();
        let store = MemoryExecutor::new();
        let target = vec!["name".to_string()];
        let first = store
            .upsert(group, &row(json!({ "name": "ops", "rules": [] })), &target)
            .await
            .unwrap();
        let second = store
            .upsert(group, &row(json!({ "name": "ops", "rules": [{ "subject": "all", "action": "read" }] })), &target)
            .await
            .unwrap();
        assert_eq!(first.get("id"), second.get("id"));
        assert_eq!(store.rows("admin_group").len(), 1);
        assert_eq!(second["rules"][0]["action"], json!("read"));
    }
}
