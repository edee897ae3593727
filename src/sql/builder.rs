//! Builds parameterized SELECT, COUNT, INSERT, UPSERT, UPDATE and DELETE for a resource.

use crate::config::{ColumnMeta, Resource};
use crate::query::{Condition, ListQuery, Predicate};
use serde_json::{Map, Value};

/// Quote identifier for PostgreSQL (safe: only from the catalog).
pub fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

pub fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

fn table_of(resource: &Resource) -> String {
    qualified_table(&resource.schema_name, &resource.table_name)
}

#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        Self::default()
    }

    fn push_param(&mut self, v: Value) -> usize {
        self.params.push(v);
        self.params.len()
    }

    /// Placeholder cast to the column's type.
    fn typed_param(&mut self, column: Option<&ColumnMeta>, v: Value) -> String {
        let n = self.push_param(v);
        match column {
            Some(c) => format!("${}::{}", n, c.cast),
            None => format!("${}", n),
        }
    }
}

/// Column list with enum and numeric columns projected so row_to_json yields strings and numbers.
fn select_column_list(resource: &Resource) -> String {
    resource
        .columns
        .iter()
        .map(|c| {
            let q = quoted(&c.name);
            if c.cast.contains('.') {
                format!("{}::text AS {}", q, q)
            } else if c.cast == "numeric" {
                format!("{}::float8 AS {}", q, q)
            } else {
                q
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn where_clause(q: &mut QueryBuf, resource: &Resource, predicate: &Predicate) -> String {
    let parts: Vec<String> = predicate
        .conditions()
        .iter()
        .map(|c| condition_sql(q, resource, c))
        .collect();
    if parts.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", parts.join(" AND "))
    }
}

fn condition_sql(q: &mut QueryBuf, resource: &Resource, condition: &Condition) -> String {
    match condition {
        Condition::Compare { column, op, value } => {
            let ph = q.typed_param(resource.column(column), value.clone());
            format!("{} {} {}", quoted(column), op.sql(), ph)
        }
        Condition::Like {
            column,
            pattern,
            case_insensitive,
        } => {
            let n = q.push_param(Value::String(pattern.clone()));
            let op = if *case_insensitive { "ILIKE" } else { "LIKE" };
            format!("{}::text {} ${}::text ESCAPE '\\'", quoted(column), op, n)
        }
        Condition::In { column, values } => {
            if values.is_empty() {
                return "FALSE".into();
            }
            let meta = resource.column(column);
            let phs: Vec<String> = values.iter().map(|v| q.typed_param(meta, v.clone())).collect();
            format!("{} IN ({})", quoted(column), phs.join(", "))
        }
        Condition::IsNull { column, is_null } => {
            let test = if *is_null { "IS NULL" } else { "IS NOT NULL" };
            format!("{} {}", quoted(column), test)
        }
        Condition::KeyIn { columns, keys } => {
            if keys.is_empty() {
                return "FALSE".into();
            }
            let tuples: Vec<String> = keys
                .iter()
                .map(|key| {
                    let phs: Vec<String> = columns
                        .iter()
                        .zip(key.values())
                        .map(|(c, v)| q.typed_param(resource.column(c), v.clone()))
                        .collect();
                    if phs.len() == 1 {
                        phs.join("")
                    } else {
                        format!("({})", phs.join(", "))
                    }
                })
                .collect();
            let lhs = if columns.len() == 1 {
                quoted(&columns[0])
            } else {
                format!("({})", columns.iter().map(|c| quoted(c)).collect::<Vec<_>>().join(", "))
            };
            format!("{} IN ({})", lhs, tuples.join(", "))
        }
    }
}

/// Rows as one json column: `SELECT row_to_json(r) FROM (SELECT ... ) r`.
pub fn select(resource: &Resource, query: &ListQuery) -> QueryBuf {
    let mut q = QueryBuf::new();
    let filter = where_clause(&mut q, resource, &query.predicate);
    let order = query
        .order_by
        .as_ref()
        .map(|o| {
            format!(
                " ORDER BY {} {}",
                quoted(&o.column),
                if o.descending { "DESC" } else { "ASC" }
            )
        })
        .unwrap_or_default();
    q.sql = format!(
        "SELECT row_to_json(r) AS \"row\" FROM (SELECT {} FROM {}{}{} LIMIT {} OFFSET {}) r",
        select_column_list(resource),
        table_of(resource),
        filter,
        order,
        query.limit,
        query.offset
    );
    q
}

/// Every row matching the predicate, unpaged. Used for key lookups.
pub fn select_all(resource: &Resource, predicate: &Predicate) -> QueryBuf {
    let mut q = QueryBuf::new();
    let filter = where_clause(&mut q, resource, predicate);
    q.sql = format!(
        "SELECT row_to_json(r) AS \"row\" FROM (SELECT {} FROM {}{}) r",
        select_column_list(resource),
        table_of(resource),
        filter
    );
    q
}

pub fn count(resource: &Resource, predicate: &Predicate) -> QueryBuf {
    let mut q = QueryBuf::new();
    let filter = where_clause(&mut q, resource, predicate);
    q.sql = format!("SELECT COUNT(*) FROM {}{}", table_of(resource), filter);
    q
}

/// Planner row estimate from pg_class; -1 when the table was never analyzed.
pub fn estimate(resource: &Resource) -> QueryBuf {
    let mut q = QueryBuf::new();
    q.push_param(Value::String(table_of(resource)));
    q.sql = "SELECT reltuples::bigint FROM pg_class WHERE oid = to_regclass($1)".into();
    q
}

fn insert_head(q: &mut QueryBuf, resource: &Resource, body: &Map<String, Value>) -> String {
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for c in &resource.columns {
        let Some(v) = body.get(&c.name) else { continue };
        cols.push(quoted(&c.name));
        placeholders.push(q.typed_param(Some(c), v.clone()));
    }
    if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES", table_of(resource))
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table_of(resource),
            cols.join(", "),
            placeholders.join(", ")
        )
    }
}

fn returning_row(resource: &Resource, statement: String) -> String {
    format!(
        "WITH w AS ({} RETURNING {}) SELECT row_to_json(w) AS \"row\" FROM w",
        statement,
        select_column_list(resource)
    )
}

/// INSERT of the columns present in `body`; omitted columns take their DB default.
pub fn insert(resource: &Resource, body: &Map<String, Value>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let head = insert_head(&mut q, resource, body);
    q.sql = returning_row(resource, head);
    q
}

/// INSERT ... ON CONFLICT (target) DO UPDATE for every other present column.
pub fn upsert(resource: &Resource, body: &Map<String, Value>, target: &[String]) -> QueryBuf {
    let mut q = QueryBuf::new();
    let head = insert_head(&mut q, resource, body);
    let mut sets: Vec<String> = resource
        .columns
        .iter()
        .filter(|c| body.contains_key(&c.name) && !target.contains(&c.name))
        .map(|c| format!("{} = EXCLUDED.{}", quoted(&c.name), quoted(&c.name)))
        .collect();
    sets.extend(
        resource
            .columns
            .iter()
            .filter(|c| c.on_update_now && !body.contains_key(&c.name))
            .map(|c| format!("{} = NOW()", quoted(&c.name))),
    );
    if sets.is_empty() {
        if let Some(first) = target.first() {
            sets.push(format!("{} = EXCLUDED.{}", quoted(first), quoted(first)));
        }
    }
    let conflict = target.iter().map(|c| quoted(c)).collect::<Vec<_>>().join(", ");
    q.sql = returning_row(
        resource,
        format!("{} ON CONFLICT ({}) DO UPDATE SET {}", head, conflict, sets.join(", ")),
    );
    q
}

/// UPDATE of the present columns on every row matching the predicate. None when there is nothing to set.
pub fn update(resource: &Resource, predicate: &Predicate, body: &Map<String, Value>) -> Option<QueryBuf> {
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    for c in &resource.columns {
        if let Some(v) = body.get(&c.name) {
            let ph = q.typed_param(Some(c), v.clone());
            sets.push(format!("{} = {}", quoted(&c.name), ph));
        }
    }
    if sets.is_empty() {
        return None;
    }
    for c in resource.columns.iter().filter(|c| c.on_update_now && !body.contains_key(&c.name)) {
        sets.push(format!("{} = NOW()", quoted(&c.name)));
    }
    let filter = where_clause(&mut q, resource, predicate);
    q.sql = format!("UPDATE {} SET {}{}", table_of(resource), sets.join(", "), filter);
    Some(q)
}

pub fn delete(resource: &Resource, predicate: &Predicate) -> QueryBuf {
    let mut q = QueryBuf::new();
    let filter = where_clause(&mut q, resource, predicate);
    q.sql = format!("DELETE FROM {}{}", table_of(resource), filter);
    q
}
