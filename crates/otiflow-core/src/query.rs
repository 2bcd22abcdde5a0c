use regex::Regex;
use serde_json::{Map, Value};
use sqlx::{sqlite::SqliteRow, Column, Pool, Row, Sqlite, TypeInfo, ValueRef};

use crate::ingest::RelationHandle;
use crate::{Error, Result};

const FORBIDDEN_KEYWORDS: &str = concat!(
    r"(?i)\b(insert|update|delete|drop|alter|create|replace|attach|detach|pragma|vacuum|",
    r"reindex|begin|commit|rollback|savepoint|release|load_extension)\b",
);
const TABLE_REFERENCE: &str = r#"(?i)\b(?:from|join)\s+["`\[]?([A-Za-z_][A-Za-z0-9_]*)"#;
const INTERNAL_NAMES: &str = r"(?i)\b(workflows|workflow_logs|sqlite_[a-z_]+|sales_wf_\d+)\b";

/// Vets generated SQL before it reaches the database.
pub struct QueryGuard {
    forbidden: Regex,
    table_ref: Regex,
    internal: Regex,
}

impl QueryGuard {
    pub fn new() -> Result<Self> {
        Ok(Self {
            forbidden: Regex::new(FORBIDDEN_KEYWORDS)?,
            table_ref: Regex::new(TABLE_REFERENCE)?,
            internal: Regex::new(INTERNAL_NAMES)?,
        })
    }

    /// Accepts a single read-only SELECT touching no relation but `relation`.
    ///
    /// Returns the statement without its trailing semicolon.
    pub fn check(&self, sql: &str, relation: &RelationHandle) -> Result<String> {
        let statement = sql.trim().trim_end_matches(';').trim();

        if statement.is_empty() {
            return Err(Error::RejectedQuery("empty statement".into()));
        }
        if statement.contains(';') {
            return Err(Error::RejectedQuery("only a single statement is allowed".into()));
        }
        if !statement
            .get(..6)
            .is_some_and(|head| head.eq_ignore_ascii_case("select"))
        {
            return Err(Error::RejectedQuery(
                "Invalid query type. Only SELECT statements are allowed.".into(),
            ));
        }
        if let Some(m) = self.forbidden.find(statement) {
            return Err(Error::RejectedQuery(format!("keyword `{}` is not allowed", m.as_str())));
        }

        let own = relation.name();
        let referenced = self
            .table_ref
            .captures_iter(statement)
            .filter_map(|caps| caps.get(1))
            .chain(self.internal.find_iter(statement));
        for table in referenced {
            if !table.as_str().eq_ignore_ascii_case(own) {
                return Err(Error::RejectedQuery(format!(
                    "relation `{}` is not accessible",
                    table.as_str()
                )));
            }
        }

        Ok(statement.to_string())
    }

    /// Runs a vetted statement and returns one JSON object per row.
    pub async fn run_select(
        &self,
        pool: &Pool<Sqlite>,
        sql: &str,
        relation: &RelationHandle,
    ) -> Result<Vec<Value>> {
        let statement = self.check(sql, relation)?;
        let rows = sqlx::query(&statement).fetch_all(pool).await?;
        Ok(rows.iter().map(row_to_json).collect())
    }
}

fn row_to_json(row: &SqliteRow) -> Value {
    let mut object = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        object.insert(column.name().to_string(), cell_to_json(row, index));
    }
    Value::Object(object)
}

fn cell_to_json(row: &SqliteRow, index: usize) -> Value {
    let Ok(raw) = row.try_get_raw(index) else {
        return Value::Null;
    };
    if raw.is_null() {
        return Value::Null;
    }

    match raw.type_info().name() {
        "INTEGER" | "BOOLEAN" => row
            .try_get_unchecked::<i64, _>(index)
            .map_or(Value::Null, Value::from),
        "REAL" => row
            .try_get_unchecked::<f64, _>(index)
            .map_or(Value::Null, Value::from),
        _ => row
            .try_get_unchecked::<String, _>(index)
            .map_or(Value::Null, Value::from),
    }
}
