//! MariaDB Executor
//!
//! Runs introspection, DDL and row operations against a MariaDB/MySQL server.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlPoolOptions, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, MySqlPool, Row as _, TypeInfo, ValueRef};

use super::{Connector, Database, Role};
use crate::error::{Error, Result};
use crate::registry::ConnectionTarget;
use crate::schema::{ColumnSchema, ForeignKeySchema, IndexSchema, Schema, SchemaChange, TableSchema};
use crate::sync::ClearStatement;
use crate::value::{quote_ident, Row, Value};

/// MariaDB executor holding a single-connection pool for one target
pub struct MariaDbExecutor {
    name: String,
    pool: MySqlPool,
    role: Role,
}

impl MariaDbExecutor {
    /// Connect to a target.
    ///
    /// Master sessions are switched to read-only; replica sessions run with
    /// foreign key checks disabled so tables can be cleared and refilled in
    /// any order.
    pub async fn connect(target: &ConnectionTarget, role: Role) -> Result<Self> {
        let config = &target.config;
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.dbname);

        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(config.connect_timeout())
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    let statement = match role {
                        Role::Master => "SET SESSION TRANSACTION READ ONLY",
                        Role::Replica => "SET SESSION FOREIGN_KEY_CHECKS = 0",
                    };
                    sqlx::query(statement).execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .connect_with(options)
            .await?;

        tracing::info!(database = %target, ?role, "Connected");

        Ok(Self {
            name: target.name.clone(),
            pool,
            role,
        })
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.role {
            Role::Replica => Ok(()),
            Role::Master => Err(Error::Internal(format!(
                "refusing to write to master database '{}'",
                self.name
            ))),
        }
    }

    async fn load_tables(&self) -> Result<Vec<TableSchema>> {
        let rows = sqlx::query(
            "SELECT TABLE_NAME FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_TYPE = 'BASE TABLE' \
             ORDER BY TABLE_NAME",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok(TableSchema::new(text(row, 0)?)))
            .collect()
    }

    async fn load_columns(&self, tables: &mut [TableSchema]) -> Result<()> {
        let rows = sqlx::query(
            "SELECT TABLE_NAME, COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE, COLUMN_DEFAULT, EXTRA \
             FROM information_schema.COLUMNS WHERE TABLE_SCHEMA = DATABASE() \
             ORDER BY TABLE_NAME, ORDINAL_POSITION",
        )
        .fetch_all(&self.pool)
        .await?;

        for row in &rows {
            let Some(table) = find_table(tables, &text(row, 0)?) else {
                continue;
            };
            let mut column = ColumnSchema::new(text(row, 1)?, text(row, 2)?);
            column.nullable = text(row, 3)? == "YES";
            column.default = optional_text(row, 4)?;
            column.extra = normalize_extra(&text(row, 5)?);
            table.columns.push(column);
        }
        Ok(())
    }

    async fn load_indexes(&self, tables: &mut [TableSchema]) -> Result<()> {
        let rows = sqlx::query(
            "SELECT TABLE_NAME, INDEX_NAME, COLUMN_NAME, IF(NON_UNIQUE = 0, 'YES', 'NO') \
             FROM information_schema.STATISTICS WHERE TABLE_SCHEMA = DATABASE() \
             ORDER BY TABLE_NAME, INDEX_NAME = 'PRIMARY' DESC, INDEX_NAME, SEQ_IN_INDEX",
        )
        .fetch_all(&self.pool)
        .await?;

        for row in &rows {
            let Some(table) = find_table(tables, &text(row, 0)?) else {
                continue;
            };
            let name = text(row, 1)?;
            let column = text(row, 2)?;
            match table.indexes.iter_mut().find(|i| i.name == name) {
                Some(index) => index.columns.push(column),
                None => {
                    let unique = text(row, 3)? == "YES";
                    table.indexes.push(IndexSchema::new(name, vec![column], unique));
                }
            }
        }
        Ok(())
    }

    async fn load_foreign_keys(&self, tables: &mut [TableSchema]) -> Result<()> {
        let rows = sqlx::query(
            "SELECT k.TABLE_NAME, k.CONSTRAINT_NAME, k.COLUMN_NAME, \
                    k.REFERENCED_TABLE_NAME, k.REFERENCED_COLUMN_NAME, \
                    r.DELETE_RULE, r.UPDATE_RULE \
             FROM information_schema.KEY_COLUMN_USAGE k \
             JOIN information_schema.REFERENTIAL_CONSTRAINTS r \
               ON r.CONSTRAINT_SCHEMA = k.CONSTRAINT_SCHEMA \
              AND r.CONSTRAINT_NAME = k.CONSTRAINT_NAME \
              AND r.TABLE_NAME = k.TABLE_NAME \
             WHERE k.TABLE_SCHEMA = DATABASE() AND k.REFERENCED_TABLE_NAME IS NOT NULL \
             ORDER BY k.TABLE_NAME, k.CONSTRAINT_NAME, k.ORDINAL_POSITION",
        )
        .fetch_all(&self.pool)
        .await?;

        for row in &rows {
            let Some(table) = find_table(tables, &text(row, 0)?) else {
                continue;
            };
            let name = text(row, 1)?;
            let column = text(row, 2)?;
            let referenced_column = text(row, 4)?;
            match table.foreign_keys.iter_mut().find(|f| f.name == name) {
                Some(fk) => {
                    fk.columns.push(column);
                    fk.referenced_columns.push(referenced_column);
                }
                None => table.foreign_keys.push(ForeignKeySchema {
                    name,
                    columns: vec![column],
                    referenced_table: text(row, 3)?,
                    referenced_columns: vec![referenced_column],
                    on_delete: text(row, 5)?,
                    on_update: text(row, 6)?,
                }),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Database for MariaDbExecutor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load_schema(&self) -> Result<Schema> {
        let mut tables = self.load_tables().await?;
        self.load_columns(&mut tables).await?;
        self.load_indexes(&mut tables).await?;
        self.load_foreign_keys(&mut tables).await?;
        Ok(Schema::new(tables))
    }

    async fn apply_schema_changes(&self, changes: &[SchemaChange]) -> Result<()> {
        self.ensure_writable()?;
        if changes.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for change in changes {
            let sql = change.to_sql();
            tracing::debug!("Executing: {}", preview(&sql, 200));

            if let Err(e) = sqlx::query(&sql).execute(&mut *tx).await {
                // DDL commits implicitly on MySQL, so this only undoes what the
                // server still considers open
                let rollback = tx.rollback().await;
                return Err(batch_error(&self.name, &sql, e, rollback));
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        let row: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)))
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0 as u64)
    }

    async fn fetch_chunk(&self, table: &str, limit: u64, offset: u64) -> Result<Vec<Row>> {
        let rows = sqlx::query(&select_chunk_sql(table))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_row).collect()
    }

    async fn find_by_identity(
        &self,
        table: &str,
        column: &str,
        value: &Value,
    ) -> Result<Option<Row>> {
        if value.is_null() {
            return Ok(None);
        }

        let sql = find_sql(table, column);
        let row = bind_value(sqlx::query(&sql), value)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(decode_row).transpose()
    }

    async fn insert_row(&self, table: &str, row: &Row) -> Result<()> {
        self.ensure_writable()?;

        let sql = insert_sql(table, &row.columns);
        let mut query = sqlx::query(&sql);
        for value in &row.values {
            query = bind_value(query, value);
        }

        query.execute(&self.pool).await.map_err(|e| {
            Error::QueryExecution(format!("Failed to insert into '{}': {}", table, e))
        })?;
        Ok(())
    }

    async fn update_by_identity(&self, table: &str, column: &str, row: &Row) -> Result<u64> {
        self.ensure_writable()?;

        let identity = row.get(column).ok_or_else(|| {
            Error::Internal(format!("row for '{}' has no column '{}'", table, column))
        })?;

        let sql = update_sql(table, &row.columns, column);
        let mut query = sqlx::query(&sql);
        for value in &row.values {
            query = bind_value(query, value);
        }
        query = bind_value(query, identity);

        let result = query.execute(&self.pool).await.map_err(|e| {
            Error::QueryExecution(format!("Failed to update '{}': {}", table, e))
        })?;
        Ok(result.rows_affected())
    }

    async fn clear_table(&self, statement: &ClearStatement) -> Result<()> {
        self.ensure_writable()?;

        let sql = statement.to_sql();
        let mut query = sqlx::query(&sql);
        for value in statement.params() {
            query = bind_value(query, &value);
        }

        query.execute(&self.pool).await.map_err(|e| {
            Error::QueryExecution(format!("Failed to clear '{}': {}", statement.table(), e))
        })?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Opens [`MariaDbExecutor`] connections
#[derive(Debug, Default, Clone, Copy)]
pub struct MariaDbConnector;

#[async_trait]
impl Connector for MariaDbConnector {
    async fn connect(&self, target: &ConnectionTarget, role: Role) -> Result<Box<dyn Database>> {
        Ok(Box::new(MariaDbExecutor::connect(target, role).await?))
    }
}

/// Error for a failed schema batch; a failed rollback is logged, never
/// reported in place of the statement's own error
fn batch_error(
    database: &str,
    sql: &str,
    cause: sqlx::Error,
    rollback: std::result::Result<(), sqlx::Error>,
) -> Error {
    if let Err(e) = rollback {
        tracing::error!(database, "Rollback failed: {}", e);
    }
    Error::QueryExecution(format!("Failed to apply '{}...': {}", preview(sql, 80), cause))
}

/// Leading part of a statement for log lines, cut on a char boundary
fn preview(sql: &str, max: usize) -> &str {
    match sql.char_indices().nth(max) {
        Some((end, _)) => &sql[..end],
        None => sql,
    }
}

fn find_table<'a>(tables: &'a mut [TableSchema], name: &str) -> Option<&'a mut TableSchema> {
    tables.iter_mut().find(|t| t.name == name)
}

// information_schema text columns come back with varying collations and
// blob flags between server versions; decode them without the type check
fn text(row: &MySqlRow, index: usize) -> Result<String> {
    Ok(optional_text(row, index)?.unwrap_or_default())
}

fn optional_text(row: &MySqlRow, index: usize) -> Result<Option<String>> {
    Ok(row.try_get_unchecked::<Option<String>, _>(index)?)
}

/// Keep only the EXTRA attributes that can be replayed in a column definition
fn normalize_extra(extra: &str) -> String {
    let lower = extra.to_ascii_lowercase();
    if lower.contains("generated") && !lower.contains("default_generated") {
        // VIRTUAL/STORED GENERATED columns need their expression, which EXTRA lacks
        return String::new();
    }

    extra
        .split_whitespace()
        .filter(|word| !word.eq_ignore_ascii_case("DEFAULT_GENERATED"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn select_chunk_sql(table: &str) -> String {
    format!("SELECT * FROM {} LIMIT ? OFFSET ?", quote_ident(table))
}

fn find_sql(table: &str, column: &str) -> String {
    format!(
        "SELECT * FROM {} WHERE {} = ? LIMIT 1",
        quote_ident(table),
        quote_ident(column)
    )
}

fn insert_sql(table: &str, columns: &[String]) -> String {
    let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders = vec!["?"; columns.len()];
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        cols.join(", "),
        placeholders.join(", ")
    )
}

fn update_sql(table: &str, columns: &[String], identity: &str) -> String {
    let set: Vec<String> = columns
        .iter()
        .map(|c| format!("{} = ?", quote_ident(c)))
        .collect();
    format!(
        "UPDATE {} SET {} WHERE {} = ?",
        quote_ident(table),
        set.join(", "),
        quote_ident(identity)
    )
}

fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::UInt(u) => query.bind(*u),
        Value::Float(f) => query.bind(*f),
        Value::String(s) => query.bind(s.clone()),
        Value::Bytes(b) => query.bind(b.clone()),
        Value::Date(d) => query.bind(*d),
        Value::Time(t) => query.bind(*t),
        Value::DateTime(dt) => query.bind(*dt),
        Value::Timestamp(ts) => query.bind(*ts),
    }
}

fn decode_row(row: &MySqlRow) -> Result<Row> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());

    for (i, column) in row.columns().iter().enumerate() {
        columns.push(column.name().to_string());
        values.push(decode_value(row, i, column.type_info().name())?);
    }

    Ok(Row::new(columns, values))
}

fn decode_value(row: &MySqlRow, i: usize, type_name: &str) -> Result<Value> {
    if row.try_get_raw(i)?.is_null() {
        return Ok(Value::Null);
    }

    let value = match type_name {
        "BOOLEAN" => Value::Bool(row.try_get::<bool, _>(i)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            Value::Int(row.try_get_unchecked::<i64, _>(i)?)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" => Value::UInt(row.try_get_unchecked::<u64, _>(i)?),
        "FLOAT" => Value::Float(f64::from(row.try_get::<f32, _>(i)?)),
        "DOUBLE" => Value::Float(row.try_get::<f64, _>(i)?),
        "DATE" => Value::Date(row.try_get::<NaiveDate, _>(i)?),
        "TIME" => Value::Time(row.try_get::<NaiveTime, _>(i)?),
        "DATETIME" => Value::DateTime(row.try_get::<NaiveDateTime, _>(i)?),
        "TIMESTAMP" => Value::Timestamp(row.try_get::<DateTime<Utc>, _>(i)?),
        "YEAR" => Value::UInt(u64::from(row.try_get_unchecked::<u16, _>(i)?)),
        "BIT" | "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB"
        | "GEOMETRY" => Value::Bytes(row.try_get_unchecked::<Vec<u8>, _>(i)?),
        // DECIMAL, JSON, ENUM, SET and the text types
        _ => Value::String(row.try_get_unchecked::<String, _>(i)?),
    };

    Ok(value)
}
