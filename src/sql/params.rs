//! Bind JSON values as PostgreSQL text parameters.
//!
//! Every placeholder in generated SQL carries an explicit `::<type>` cast, so values travel
//! as text and PostgreSQL's input functions do the conversion.

use serde_json::Value;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::Database;

#[derive(Clone, Debug, PartialEq)]
pub enum PgBindValue {
    Null,
    Text(String),
}

impl PgBindValue {
    pub fn from_json(v: &Value) -> Self {
        match v {
            Value::Null => PgBindValue::Null,
            Value::Bool(b) => PgBindValue::Text(b.to_string()),
            Value::Number(n) => PgBindValue::Text(n.to_string()),
            Value::String(s) => PgBindValue::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => PgBindValue::Text(v.to_string()),
        }
    }
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        match self {
            PgBindValue::Null => <Option<&str> as Encode<Postgres>>::encode_by_ref(&None, buf),
            PgBindValue::Text(s) => <&str as Encode<Postgres>>::encode_by_ref(&s.as_str(), buf),
        }
    }
}

impl sqlx::Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }
}
