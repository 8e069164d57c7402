//! Table discovery through `information_schema`.

use sync_core::{ColumnDefinition, ColumnType, SourceError, TableDefinition, TableRef};
use tokio_postgres::Client;

use crate::connector::classify_error;

const COLUMNS_QUERY: &str = "\
SELECT column_name::text, data_type::text, udt_name::text, is_nullable::text \
FROM information_schema.columns \
WHERE table_schema = $1 AND table_name = $2 \
ORDER BY ordinal_position";

const PRIMARY_KEY_QUERY: &str = "\
SELECT kcu.column_name::text \
FROM information_schema.table_constraints tc \
JOIN information_schema.key_column_usage kcu \
  ON tc.constraint_name = kcu.constraint_name \
 AND tc.table_schema = kcu.table_schema \
 AND tc.table_name = kcu.table_name \
WHERE tc.constraint_type = 'PRIMARY KEY' \
  AND tc.table_schema = $1 AND tc.table_name = $2 \
ORDER BY kcu.ordinal_position";

/// Map an `information_schema` type to a [`ColumnType`].
///
/// `udt_name` is consulted for arrays, whose element type is the udt name
/// without its leading underscore.
pub fn column_type_from_pg(data_type: &str, udt_name: &str) -> ColumnType {
    match data_type {
        "boolean" => ColumnType::Bool,
        "smallint" => ColumnType::SmallInt,
        "integer" => ColumnType::Int,
        "bigint" => ColumnType::BigInt,
        "real" => ColumnType::Float,
        "double precision" => ColumnType::Double,
        "numeric" => ColumnType::Decimal,
        "text" | "character varying" | "character" | "name" | "USER-DEFINED" => ColumnType::Text,
        "bytea" => ColumnType::Bytes,
        "uuid" => ColumnType::Uuid,
        "date" => ColumnType::Date,
        "time without time zone" => ColumnType::Time,
        "timestamp without time zone" => ColumnType::Timestamp,
        "timestamp with time zone" => ColumnType::TimestampTz,
        "json" | "jsonb" => ColumnType::Json,
        "ARRAY" => {
            let element = udt_name.strip_prefix('_').unwrap_or(udt_name);
            ColumnType::array(udt_to_column_type(element))
        }
        other => ColumnType::Unknown {
            name: other.to_string(),
        },
    }
}

fn udt_to_column_type(udt: &str) -> ColumnType {
    match udt {
        "bool" => ColumnType::Bool,
        "int2" => ColumnType::SmallInt,
        "int4" => ColumnType::Int,
        "int8" => ColumnType::BigInt,
        "float4" => ColumnType::Float,
        "float8" => ColumnType::Double,
        "numeric" => ColumnType::Decimal,
        "text" | "varchar" | "bpchar" => ColumnType::Text,
        "uuid" => ColumnType::Uuid,
        "date" => ColumnType::Date,
        "timestamp" => ColumnType::Timestamp,
        "timestamptz" => ColumnType::TimestampTz,
        "json" | "jsonb" => ColumnType::Json,
        other => ColumnType::Unknown {
            name: other.to_string(),
        },
    }
}

pub(crate) async fn describe_table(
    client: &Client,
    table: &TableRef,
) -> Result<Option<TableDefinition>, SourceError> {
    let schema = table.schema.as_deref().unwrap_or("public");

    let rows = client
        .query(COLUMNS_QUERY, &[&schema, &table.table])
        .await
        .map_err(classify_error)?;
    if rows.is_empty() {
        return Ok(None);
    }

    let mut columns = Vec::with_capacity(rows.len());
    for row in &rows {
        let name: String = row.get(0);
        let data_type: String = row.get(1);
        let udt_name: String = row.get(2);
        let nullable: String = row.get(3);

        let mut column = ColumnDefinition::new(name, column_type_from_pg(&data_type, &udt_name));
        column.nullable = nullable == "YES";
        columns.push(column);
    }

    let primary_key = client
        .query(PRIMARY_KEY_QUERY, &[&schema, &table.table])
        .await
        .map_err(classify_error)?
        .iter()
        .map(|row| row.get::<_, String>(0))
        .collect();

    Ok(Some(
        TableDefinition::new(
            TableRef::new(Some(schema.to_string()), table.table.clone()),
            columns,
        )
        .with_primary_key(primary_key),
    ))
}
