//! In-Memory Executor
//!
//! A [`Database`] kept entirely in process, used to exercise schema
//! reconciliation and synchronization without a server. Tables are listed
//! by name, rows keep insertion order, and identity lookups compare values
//! by their textual form.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Connector, Database, Role};
use crate::error::{Error, Result};
use crate::registry::ConnectionTarget;
use crate::schema::{ColumnPosition, Schema, SchemaChange, TableSchema};
use crate::sync::ClearStatement;
use crate::value::{Row, Value};

/// Operation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub fetches: u64,
    pub inserts: u64,
    pub updates: u64,
    pub clears: u64,
    /// Schema batches that were committed
    pub schema_batches: u64,
}

#[derive(Debug, Clone)]
struct MemoryTable {
    schema: TableSchema,
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: Vec<MemoryTable>,
    stats: MemoryStats,
    /// Fail a schema batch once this many changes have been applied
    fail_schema_after: Option<usize>,
    fail_writes: HashSet<String>,
    fail_load: bool,
}

/// In-process database
#[derive(Debug)]
pub struct MemoryDatabase {
    name: String,
    state: Mutex<MemoryState>,
}

impl MemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Add a table with rows given in column order
    pub fn with_table(mut self, schema: TableSchema, rows: Vec<Vec<Value>>) -> Self {
        if let Ok(state) = self.state.get_mut() {
            state.tables.retain(|t| t.schema.name != schema.name);
            state.tables.push(MemoryTable { schema, rows });
        }
        self
    }

    /// Current rows of a table, empty if the table does not exist
    pub fn rows(&self, table: &str) -> Vec<Row> {
        let state = self.lock();
        state
            .tables
            .iter()
            .find(|t| t.schema.name == table)
            .map(|t| t.rows.iter().map(|values| to_row(&t.schema, values)).collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> MemoryStats {
        self.lock().stats
    }

    /// Make the next schema batch fail after `applied` changes
    pub fn fail_schema_changes_after(&self, applied: usize) {
        self.lock().fail_schema_after = Some(applied);
    }

    /// Make inserts and updates on a table fail
    pub fn fail_writes_to(&self, table: &str) {
        self.lock().fail_writes.insert(table.to_string());
    }

    /// Make schema introspection fail
    pub fn fail_schema_load(&self) {
        self.lock().fail_load = true;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MemoryState {
    fn table(&self, name: &str) -> Result<&MemoryTable> {
        self.tables
            .iter()
            .find(|t| t.schema.name == name)
            .ok_or_else(|| unknown_table(name))
    }

    fn check_writable(&self, table: &str) -> Result<()> {
        if self.fail_writes.contains(table) {
            return Err(Error::QueryExecution(format!(
                "write to '{}' rejected",
                table
            )));
        }
        Ok(())
    }
}

fn unknown_table(name: &str) -> Error {
    Error::QueryExecution(format!("Table '{}' doesn't exist", name))
}

fn unknown_column(table: &str, column: &str) -> Error {
    Error::QueryExecution(format!("Unknown column '{}' in '{}'", column, table))
}

fn table_mut<'a>(tables: &'a mut [MemoryTable], name: &str) -> Result<&'a mut MemoryTable> {
    tables
        .iter_mut()
        .find(|t| t.schema.name == name)
        .ok_or_else(|| unknown_table(name))
}

fn column_index(table: &MemoryTable, column: &str) -> Result<usize> {
    table
        .schema
        .columns
        .iter()
        .position(|c| c.name == column)
        .ok_or_else(|| unknown_column(&table.schema.name, column))
}

fn to_row(schema: &TableSchema, values: &[Value]) -> Row {
    Row::new(
        schema.columns.iter().map(|c| c.name.clone()).collect(),
        values.to_vec(),
    )
}

fn position_index(table: &MemoryTable, position: &ColumnPosition) -> Result<usize> {
    match position {
        ColumnPosition::First => Ok(0),
        ColumnPosition::After(column) => Ok(column_index(table, column)? + 1),
    }
}

/// Value a new column takes in existing rows
fn default_value(default: Option<&str>) -> Value {
    match default.map(str::trim) {
        None => Value::Null,
        Some(d) if d.eq_ignore_ascii_case("null") => Value::Null,
        Some(d) => Value::String(d.trim_matches('\'').to_string()),
    }
}

fn apply_change(tables: &mut Vec<MemoryTable>, change: &SchemaChange) -> Result<()> {
    match change {
        SchemaChange::DropForeignKey { table, name } => {
            let t = table_mut(tables, table)?;
            let before = t.schema.foreign_keys.len();
            t.schema.foreign_keys.retain(|fk| fk.name != *name);
            if t.schema.foreign_keys.len() == before {
                return Err(Error::QueryExecution(format!(
                    "Can't DROP FOREIGN KEY '{}'",
                    name
                )));
            }
        }
        SchemaChange::DropIndex { table, index } => {
            let t = table_mut(tables, table)?;
            let before = t.schema.indexes.len();
            t.schema.indexes.retain(|i| i.name != index.name);
            if t.schema.indexes.len() == before {
                return Err(Error::QueryExecution(format!(
                    "Can't DROP INDEX '{}'",
                    index.name
                )));
            }
        }
        SchemaChange::DropTable { table } => {
            let before = tables.len();
            tables.retain(|t| t.schema.name != *table);
            if tables.len() == before {
                return Err(unknown_table(table));
            }
        }
        SchemaChange::CreateTable { table } => {
            if tables.iter().any(|t| t.schema.name == table.name) {
                return Err(Error::QueryExecution(format!(
                    "Table '{}' already exists",
                    table.name
                )));
            }
            tables.push(MemoryTable {
                schema: table.clone(),
                rows: Vec::new(),
            });
        }
        SchemaChange::AddColumn {
            table,
            column,
            position,
        } => {
            let t = table_mut(tables, table)?;
            if t.schema.column(&column.name).is_some() {
                return Err(Error::QueryExecution(format!(
                    "Duplicate column name '{}'",
                    column.name
                )));
            }
            let at = position_index(t, position)?;
            let fill = default_value(column.default.as_deref());
            t.schema.columns.insert(at, column.clone());
            for row in &mut t.rows {
                row.insert(at, fill.clone());
            }
        }
        SchemaChange::ModifyColumn {
            table,
            column,
            position,
        } => {
            let t = table_mut(tables, table)?;
            let from = column_index(t, &column.name)?;
            match position {
                None => t.schema.columns[from] = column.clone(),
                Some(position) => {
                    t.schema.columns.remove(from);
                    let moved: Vec<Value> = t.rows.iter_mut().map(|r| r.remove(from)).collect();
                    let to = position_index(t, position)?;
                    t.schema.columns.insert(to, column.clone());
                    for (row, value) in t.rows.iter_mut().zip(moved) {
                        row.insert(to, value);
                    }
                }
            }
        }
        SchemaChange::DropColumn { table, column } => {
            let t = table_mut(tables, table)?;
            let at = column_index(t, column)?;
            t.schema.columns.remove(at);
            for row in &mut t.rows {
                row.remove(at);
            }
        }
        SchemaChange::AddIndex { table, index } => {
            let t = table_mut(tables, table)?;
            if t.schema.index(&index.name).is_some() {
                return Err(Error::QueryExecution(format!(
                    "Duplicate key name '{}'",
                    index.name
                )));
            }
            for column in &index.columns {
                column_index(t, column)?;
            }
            t.schema.indexes.push(index.clone());
        }
        SchemaChange::AddForeignKey { table, foreign_key } => {
            let t = table_mut(tables, table)?;
            if t.schema.foreign_key(&foreign_key.name).is_some() {
                return Err(Error::QueryExecution(format!(
                    "Duplicate foreign key constraint name '{}'",
                    foreign_key.name
                )));
            }
            t.schema.foreign_keys.push(foreign_key.clone());
        }
    }
    Ok(())
}

/// Values of `row` laid out in the table's column order
fn layout(table: &MemoryTable, row: &Row) -> Result<Vec<Value>> {
    let mut values = vec![Value::Null; table.schema.columns.len()];
    for (column, value) in row.iter() {
        values[column_index(table, column)?] = value.clone();
    }
    Ok(values)
}

/// Reject a row that would duplicate a unique key
fn check_unique(table: &MemoryTable, values: &[Value], skip: Option<usize>) -> Result<()> {
    for index in table.schema.indexes.iter().filter(|i| i.unique) {
        let positions: Vec<usize> = index
            .columns
            .iter()
            .map(|c| column_index(table, c))
            .collect::<Result<_>>()?;
        let key: Option<Vec<String>> = positions.iter().map(|&p| values[p].match_key()).collect();
        let Some(key) = key else {
            continue;
        };

        let duplicate = table.rows.iter().enumerate().any(|(i, row)| {
            Some(i) != skip
                && positions
                    .iter()
                    .zip(&key)
                    .all(|(&p, k)| row[p].match_key().as_deref() == Some(k.as_str()))
        });
        if duplicate {
            return Err(Error::QueryExecution(format!(
                "Duplicate entry '{}' for key '{}'",
                key.join("-"),
                index.name
            )));
        }
    }
    Ok(())
}

#[async_trait]
impl Database for MemoryDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load_schema(&self) -> Result<Schema> {
        let state = self.lock();
        if state.fail_load {
            return Err(Error::QueryExecution("introspection failed".into()));
        }
        let mut tables: Vec<TableSchema> = state.tables.iter().map(|t| t.schema.clone()).collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Schema::new(tables))
    }

    async fn apply_schema_changes(&self, changes: &[SchemaChange]) -> Result<()> {
        let mut state = self.lock();
        let mut working = state.tables.clone();

        for (applied, change) in changes.iter().enumerate() {
            if state.fail_schema_after == Some(applied) {
                state.fail_schema_after = None;
                return Err(Error::QueryExecution(format!(
                    "injected failure on '{}'",
                    change.to_sql()
                )));
            }
            apply_change(&mut working, change)?;
        }

        state.tables = working;
        state.stats.schema_batches += 1;
        Ok(())
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        Ok(self.lock().table(table)?.rows.len() as u64)
    }

    async fn fetch_chunk(&self, table: &str, limit: u64, offset: u64) -> Result<Vec<Row>> {
        let mut state = self.lock();
        state.stats.fetches += 1;
        let t = state.table(table)?;
        Ok(t.rows
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|values| to_row(&t.schema, values))
            .collect())
    }

    async fn find_by_identity(
        &self,
        table: &str,
        column: &str,
        value: &Value,
    ) -> Result<Option<Row>> {
        let state = self.lock();
        let t = state.table(table)?;
        let at = column_index(t, column)?;
        let Some(key) = value.match_key() else {
            return Ok(None);
        };

        Ok(t.rows
            .iter()
            .find(|row| row[at].match_key().as_deref() == Some(key.as_str()))
            .map(|values| to_row(&t.schema, values)))
    }

    async fn insert_row(&self, table: &str, row: &Row) -> Result<()> {
        let mut state = self.lock();
        state.check_writable(table)?;
        let t = table_mut(&mut state.tables, table)?;
        let values = layout(t, row)?;
        check_unique(t, &values, None)?;
        t.rows.push(values);
        state.stats.inserts += 1;
        Ok(())
    }

    async fn update_by_identity(&self, table: &str, column: &str, row: &Row) -> Result<u64> {
        let mut state = self.lock();
        state.check_writable(table)?;
        let key = row
            .get(column)
            .and_then(Value::match_key)
            .ok_or_else(|| unknown_column(table, column))?;

        let t = table_mut(&mut state.tables, table)?;
        let at = column_index(t, column)?;
        let values = layout(t, row)?;

        let matching: Vec<usize> = t
            .rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r[at].match_key().as_deref() == Some(key.as_str()))
            .map(|(i, _)| i)
            .collect();
        for &i in &matching {
            check_unique(t, &values, Some(i))?;
            t.rows[i] = values.clone();
        }

        state.stats.updates += 1;
        Ok(matching.len() as u64)
    }

    async fn clear_table(&self, statement: &ClearStatement) -> Result<()> {
        let mut state = self.lock();
        let t = table_mut(&mut state.tables, statement.table())?;
        let schema = t.schema.clone();
        t.rows.retain(|values| statement.keeps(&to_row(&schema, values)));
        state.stats.clears += 1;
        Ok(())
    }

    async fn close(&self) {}
}

/// Hands out prepared [`MemoryDatabase`]s by target name
#[derive(Default)]
pub struct MemoryConnector {
    databases: Mutex<HashMap<String, MemoryDatabase>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the database returned for the target with this name
    pub fn with_database(self, database: MemoryDatabase) -> Self {
        if let Ok(mut databases) = self.databases.lock() {
            databases.insert(database.name.clone(), database);
        }
        self
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, target: &ConnectionTarget, _role: Role) -> Result<Box<dyn Database>> {
        let database = self
            .databases
            .lock()
            .map_err(|_| Error::Internal("memory connector poisoned".into()))?
            .remove(&target.name);

        match database {
            Some(db) => Ok(Box::new(db)),
            None => Err(Error::QueryExecution(format!(
                "Can't connect to '{}'",
                target
            ))),
        }
    }
}
