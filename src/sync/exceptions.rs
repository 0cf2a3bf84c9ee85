//! Exception Rules
//!
//! Per-table protected values. A replica row whose column holds one of the
//! configured values survives clearing and is never overwritten; a master row
//! holding one is never copied.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::{quote_ident, Row, Value};

/// How many rules of a table take part in clearing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClearPolicy {
    /// Keep a row if any rule of its table protects it
    #[default]
    AllRules,
    /// Keep a row only if the table's first declared rule protects it
    FirstRule,
}

/// Protected values of one column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRule {
    pub column: String,
    pub values: Vec<String>,
}

impl ColumnRule {
    /// Whether the row's value in this column is one of the protected values
    pub fn protects(&self, row: &Row) -> bool {
        row.get(&self.column)
            .and_then(Value::match_key)
            .map_or(false, |key| self.values.iter().any(|v| *v == key))
    }
}

/// Exception rules for every table, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExceptionRules {
    tables: Vec<(String, Vec<ColumnRule>)>,
}

impl ExceptionRules {
    /// Build rules from the `[except_values]` table.
    ///
    /// Each column maps to a value or a (possibly nested) list of values;
    /// nested lists are flattened and scalars become one-element lists.
    pub fn from_config(config: &toml::Table) -> Result<Self> {
        let mut tables = Vec::with_capacity(config.len());

        for (table, columns) in config {
            let columns = columns.as_table().ok_or_else(|| {
                Error::Config(format!(
                    "except_values.{} must be a table of column = [values]",
                    table
                ))
            })?;
            if columns.is_empty() {
                return Err(Error::Config(format!(
                    "except_values.{} does not name any column",
                    table
                )));
            }

            let mut rules = Vec::with_capacity(columns.len());
            for (column, raw) in columns {
                let mut values = Vec::new();
                flatten(raw, &mut values)
                    .map_err(|e| Error::Config(format!("except_values.{}.{}: {}", table, column, e)))?;
                if values.is_empty() {
                    return Err(Error::Config(format!(
                        "except_values.{}.{} must list at least one value",
                        table, column
                    )));
                }
                rules.push(ColumnRule {
                    column: column.clone(),
                    values,
                });
            }
            tables.push((table.clone(), rules));
        }

        Ok(Self { tables })
    }

    /// Rules configured for a table, if any
    pub fn rules_for(&self, table: &str) -> Option<&[ColumnRule]> {
        self.tables
            .iter()
            .find(|(name, _)| name == table)
            .map(|(_, rules)| rules.as_slice())
    }

    /// Whether any rule of the table protects this row
    pub fn is_protected(&self, table: &str, row: &Row) -> bool {
        self.rules_for(table)
            .map_or(false, |rules| rules.iter().any(|rule| rule.protects(row)))
    }

    /// Statement that empties a replica table while keeping protected rows
    pub fn clear_statement(&self, table: &str, policy: ClearPolicy) -> ClearStatement {
        match self.rules_for(table) {
            None => ClearStatement::Truncate {
                table: table.to_string(),
            },
            Some(rules) => {
                let rules = match policy {
                    ClearPolicy::AllRules => rules.to_vec(),
                    ClearPolicy::FirstRule => rules.iter().take(1).cloned().collect(),
                };
                ClearStatement::DeleteUnprotected {
                    table: table.to_string(),
                    rules,
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Number of tables with rules
    pub fn len(&self) -> usize {
        self.tables.len()
    }
}

fn flatten(value: &toml::Value, out: &mut Vec<String>) -> std::result::Result<(), String> {
    match value {
        toml::Value::String(s) => out.push(s.clone()),
        toml::Value::Integer(i) => out.push(i.to_string()),
        toml::Value::Float(f) => out.push(f.to_string()),
        toml::Value::Boolean(b) => out.push(if *b { "1" } else { "0" }.to_string()),
        toml::Value::Datetime(dt) => out.push(dt.to_string()),
        toml::Value::Array(items) => {
            for item in items {
                flatten(item, out)?;
            }
        }
        toml::Value::Table(_) => return Err("values must be scalars or lists".into()),
    }
    Ok(())
}

/// How a replica table is emptied before synchronization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearStatement {
    /// No rules: remove every row
    Truncate { table: String },
    /// Remove every row not protected by one of the rules
    DeleteUnprotected {
        table: String,
        rules: Vec<ColumnRule>,
    },
}

impl ClearStatement {
    pub fn table(&self) -> &str {
        match self {
            ClearStatement::Truncate { table } | ClearStatement::DeleteUnprotected { table, .. } => {
                table
            }
        }
    }

    /// SQL with `?` placeholders, bound in order from [`ClearStatement::params`].
    ///
    /// A row whose protection column is NULL is not protected and is deleted.
    /// Values compare byte for byte, whatever the column collation, so the
    /// server keeps exactly the rows [`ColumnRule::protects`] accepts.
    pub fn to_sql(&self) -> String {
        match self {
            ClearStatement::Truncate { table } => format!("TRUNCATE TABLE {}", quote_ident(table)),
            ClearStatement::DeleteUnprotected { table, rules } => {
                let conditions: Vec<String> = rules
                    .iter()
                    .map(|rule| {
                        format!(
                            "IFNULL(CAST({} AS BINARY) IN ({}), 0)",
                            quote_ident(&rule.column),
                            vec!["?"; rule.values.len()].join(", ")
                        )
                    })
                    .collect();
                format!(
                    "DELETE FROM {} WHERE NOT ({})",
                    quote_ident(table),
                    conditions.join(" OR ")
                )
            }
        }
    }

    pub fn params(&self) -> Vec<Value> {
        match self {
            ClearStatement::Truncate { .. } => Vec::new(),
            ClearStatement::DeleteUnprotected { rules, .. } => rules
                .iter()
                .flat_map(|rule| rule.values.iter().cloned().map(Value::String))
                .collect(),
        }
    }

    /// Whether a row survives this statement
    pub fn keeps(&self, row: &Row) -> bool {
        match self {
            ClearStatement::Truncate { .. } => false,
            ClearStatement::DeleteUnprotected { rules, .. } => {
                rules.iter().any(|rule| rule.protects(row))
            }
        }
    }
}
