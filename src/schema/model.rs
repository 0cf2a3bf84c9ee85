//! Schema Model
//!
//! Structural description of a database (tables, columns, indexes and
//! foreign keys) as introspected from a backend.

use serde::{Deserialize, Serialize};

use crate::value::{quote_ident, quote_literal};

/// Name of the index that holds the primary key
pub const PRIMARY_INDEX: &str = "PRIMARY";

/// Full schema of one database, tables in enumeration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub tables: Vec<TableSchema>,
}

/// Table schema information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name
    pub name: String,
    /// Columns in declaration order
    pub columns: Vec<ColumnSchema>,
    /// Indexes, including the primary key
    pub indexes: Vec<IndexSchema>,
    /// Foreign key constraints declared on this table
    pub foreign_keys: Vec<ForeignKeySchema>,
}

/// Column schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    /// Full column type, e.g. `varchar(255)` or `int(10) unsigned`
    pub column_type: String,
    pub nullable: bool,
    /// Default as reported by the server; `None` when there is none
    pub default: Option<String>,
    /// Extra attributes that belong in the definition (`auto_increment`, `on update ...`)
    pub extra: String,
}

/// Index schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSchema {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Foreign key schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeySchema {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_delete: String,
    pub on_update: String,
}

impl Schema {
    pub fn new(tables: Vec<TableSchema>) -> Self {
        Self { tables }
    }

    /// Get schema for a table
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// All table names, in enumeration order
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }

    /// Compute a hash of the schema.
    ///
    /// Only used to label schemas in logs; [`diff`](super::diff) decides
    /// whether two schemas differ.
    pub fn fingerprint(&self) -> String {
        let mut hasher = crc32fast::Hasher::new();

        for table in &self.tables {
            field(&mut hasher, b't', table.name.as_bytes());
            for col in &table.columns {
                field(&mut hasher, b'c', col.name.as_bytes());
                field(&mut hasher, b'y', col.column_type.to_lowercase().as_bytes());
                field(&mut hasher, b'n', &[col.nullable as u8]);
                match &col.default {
                    Some(default) => field(&mut hasher, b'd', default.as_bytes()),
                    None => field(&mut hasher, b'-', &[]),
                }
                field(&mut hasher, b'e', col.extra.trim().to_lowercase().as_bytes());
            }
            for idx in &table.indexes {
                field(&mut hasher, b'i', idx.name.as_bytes());
                for column in &idx.columns {
                    field(&mut hasher, b'k', column.as_bytes());
                }
                field(&mut hasher, b'u', &[idx.unique as u8]);
            }
            for fk in &table.foreign_keys {
                field(&mut hasher, b'f', fk.definition().as_bytes());
            }
        }

        format!("{:08x}", hasher.finalize())
    }
}

/// Tagged, length-prefixed so adjacent fields cannot run together
fn field(hasher: &mut crc32fast::Hasher, tag: u8, bytes: &[u8]) {
    hasher.update(&[tag]);
    hasher.update(&(bytes.len() as u32).to_le_bytes());
    hasher.update(bytes);
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn foreign_key(&self, name: &str) -> Option<&ForeignKeySchema> {
        self.foreign_keys.iter().find(|f| f.name == name)
    }

    /// Column used to match master rows to replica rows: the first declared column
    pub fn identity_column(&self) -> Option<&ColumnSchema> {
        self.columns.first()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            nullable: true,
            default: None,
            extra: String::new(),
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_extra(mut self, extra: impl Into<String>) -> Self {
        self.extra = extra.into();
        self
    }

    /// Column definition as used in CREATE TABLE / ADD COLUMN / MODIFY COLUMN
    pub fn definition(&self) -> String {
        let mut def = format!("{} {}", quote_ident(&self.name), self.column_type);

        def.push_str(if self.nullable { " NULL" } else { " NOT NULL" });

        if let Some(default) = &self.default {
            def.push_str(" DEFAULT ");
            def.push_str(&render_default(default));
        }

        let extra = self.extra.trim();
        if !extra.is_empty() {
            def.push(' ');
            def.push_str(extra);
        }

        def
    }

    /// Whether two columns would produce the same definition
    pub fn same_definition(&self, other: &ColumnSchema) -> bool {
        self.name == other.name
            && self.column_type.eq_ignore_ascii_case(&other.column_type)
            && self.nullable == other.nullable
            && self.default == other.default
            && self.extra.trim().eq_ignore_ascii_case(other.extra.trim())
    }
}

impl IndexSchema {
    pub fn new(name: impl Into<String>, columns: Vec<String>, unique: bool) -> Self {
        Self {
            name: name.into(),
            columns,
            unique,
        }
    }

    pub fn primary(columns: Vec<String>) -> Self {
        Self::new(PRIMARY_INDEX, columns, true)
    }

    pub fn is_primary(&self) -> bool {
        self.name == PRIMARY_INDEX
    }

    fn column_list(&self) -> String {
        column_list(&self.columns)
    }

    /// Definition inside CREATE TABLE or after ALTER TABLE ... ADD
    pub fn definition(&self) -> String {
        if self.is_primary() {
            format!("PRIMARY KEY ({})", self.column_list())
        } else if self.unique {
            format!("UNIQUE KEY {} ({})", quote_ident(&self.name), self.column_list())
        } else {
            format!("KEY {} ({})", quote_ident(&self.name), self.column_list())
        }
    }
}

impl ForeignKeySchema {
    /// Definition after ALTER TABLE ... ADD
    pub fn definition(&self) -> String {
        format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
            quote_ident(&self.name),
            column_list(&self.columns),
            quote_ident(&self.referenced_table),
            column_list(&self.referenced_columns),
            self.on_delete,
            self.on_update
        )
    }
}

pub(crate) fn column_list(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render a default as reported by information_schema back into DDL.
///
/// MariaDB reports string defaults already quoted and expressions bare;
/// MySQL reports strings bare. Quoted text, numbers, NULL and anything that
/// looks like an expression pass through, everything else gets quoted.
fn render_default(default: &str) -> String {
    let trimmed = default.trim();
    let lower = trimmed.to_ascii_lowercase();

    if lower == "null"
        || trimmed.starts_with('\'')
        || trimmed.parse::<f64>().is_ok()
        || lower.starts_with("current_timestamp")
        || trimmed.contains('(')
    {
        trimmed.to_string()
    } else {
        quote_literal(trimmed)
    }
}
