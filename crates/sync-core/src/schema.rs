//! Table references and discovered table definitions.
//!
//! Discovery itself belongs to each source connector; the engine only uses
//! the result to validate binding configuration (unknown tables, unknown
//! cursor columns, nullable cursors) before polling.

use crate::types::ColumnType;
use serde::{Deserialize, Serialize};

// ============================================================================
// Error Types
// ============================================================================

/// Error type for schema lookups.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// Table not found in the source
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Column not found in table definition
    #[error("Column '{column}' not found in table '{table}'")]
    ColumnNotFound { table: String, column: String },
}

// ============================================================================
// Table references
// ============================================================================

/// Optionally schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    /// Schema (namespace) name, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Table or view name
    pub table: String,
}

impl TableRef {
    /// Create a table reference.
    pub fn new(schema: Option<String>, table: impl Into<String>) -> Self {
        Self {
            schema,
            table: table.into(),
        }
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.table),
            None => f.write_str(&self.table),
        }
    }
}

// ============================================================================
// Definitions
// ============================================================================

/// Column definition as reported by the source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ColumnDefinition {
    /// Column name
    pub name: String,

    /// Column type
    #[serde(rename = "type")]
    pub column_type: ColumnType,

    /// Whether this column is nullable
    #[serde(default)]
    pub nullable: bool,
}

impl ColumnDefinition {
    /// Create a new non-nullable column definition.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
        }
    }

    /// Mark this column nullable.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Table definition as reported by the source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableDefinition {
    /// Table reference
    pub table: TableRef,
    /// Columns in ordinal order
    pub columns: Vec<ColumnDefinition>,
    /// Primary key column names, empty if none
    #[serde(default)]
    pub primary_key: Vec<String>,
}

impl TableDefinition {
    /// Create a table definition.
    pub fn new(table: TableRef, columns: Vec<ColumnDefinition>) -> Self {
        Self {
            table,
            columns,
            primary_key: Vec::new(),
        }
    }

    /// Set the primary key.
    pub fn with_primary_key(mut self, key: Vec<String>) -> Self {
        self.primary_key = key;
        self
    }

    /// Look up a column by name.
    pub fn get_column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Look up a column by name, failing if absent.
    pub fn require_column(&self, name: &str) -> Result<&ColumnDefinition, SchemaError> {
        self.get_column(name)
            .ok_or_else(|| SchemaError::ColumnNotFound {
                table: self.table.to_string(),
                column: name.to_string(),
            })
    }

    /// JSON schema of documents emitted for this table.
    pub fn json_schema(&self) -> serde_json::Value {
        let properties: serde_json::Map<String, serde_json::Value> = self
            .columns
            .iter()
            .map(|c| {
                let mut schema = c.column_type.json_schema();
                if c.nullable {
                    if let Some(obj) = schema.as_object_mut() {
                        obj.insert("nullable".to_string(), serde_json::Value::Bool(true));
                    }
                }
                (c.name.clone(), schema)
            })
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "x-primary-key": self.primary_key,
        })
    }
}
