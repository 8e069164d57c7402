//! PostgreSQL source connector.
//!
//! Implements [`sync_core::SourceConnector`] over `tokio-postgres`. Queries
//! are prepared so cursor parameters can be bound with the types the server
//! infers for each placeholder, then streamed with `query_raw`.

mod connector;
mod params;
mod rows;
mod sanity;
mod schema;
mod text;

pub use connector::{sanitize_connection_string, PostgresConnector, PostgresSession};
pub use params::{to_sql_param, NullParam, ParamError, SqlParam};
pub use rows::{convert_row, ConversionError};
pub use sanity::parse_setting_duration;
pub use schema::column_type_from_pg;
