//! Statement rendering for PostgreSQL.
//!
//! DDL renders through the statement's own `Display`. Backfill constants
//! become typed placeholders so tenant ids and other values are always
//! bound, never spliced into the SQL text.

use std::fmt::{self, Write};

use grc_migrate_core::statement::{Statement, Value};
use sqlx::Postgres;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;

pub(crate) struct Rendered {
    pub(crate) sql: String,
    pub(crate) params: Vec<Value>,
}

impl Rendered {
    pub(crate) fn query(&self) -> Query<'_, Postgres, PgArguments> {
        let mut query = sqlx::query(&self.sql);
        for value in &self.params {
            query = match value {
                Value::Null => query.bind(None::<String>),
                Value::Bool(b) => query.bind(*b),
                Value::Int(n) => query.bind(*n),
                Value::Text(s) => query.bind(s.as_str()),
                Value::Timestamp(ts) => query.bind(*ts),
            };
        }
        query
    }
}

fn cast(value: &Value) -> &'static str {
    match value {
        Value::Null | Value::Text(_) => "TEXT",
        Value::Bool(_) => "BOOLEAN",
        Value::Int(_) => "BIGINT",
        Value::Timestamp(_) => "TIMESTAMPTZ",
    }
}

pub(crate) fn render(statement: &Statement) -> Result<Rendered, fmt::Error> {
    let mut params = Vec::new();
    let sql = match statement {
        Statement::InsertSelect(copy) => {
            let mut sql = String::new();
            copy.write_sql(&mut sql, |out, value| {
                if value.is_null() {
                    return out.write_str("NULL");
                }
                params.push(value.clone());
                write!(out, "${}::{}", params.len(), cast(value))
            })?;
            sql
        }
        other => other.to_string(),
    };
    Ok(Rendered { sql, params })
}
