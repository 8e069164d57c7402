//! Query rendering.
//!
//! A binding and its cursor state render to a [`Query`]: SQL text with
//! dialect placeholders plus the bound cursor values. Rendering is a pure
//! function of its inputs; it never talks to the source.
//!
//! # Templates
//!
//! A binding may override the default query with a template:
//!
//! | Tag | Expands to |
//! |---|---|
//! | `{{table}}` | quoted, schema-qualified table |
//! | `{{schema}}` | quoted schema |
//! | `{{name}}` | binding name, verbatim |
//! | `{{cursor_columns}}` | quoted cursor columns, comma separated |
//! | `{{cursor_values}}` | one placeholder per cursor value |
//! | `{{cursor.N}}` | placeholder for the N-th (1-based) cursor value |
//! | `{{#incremental}}…{{/incremental}}` | kept only when a cursor value exists |
//! | `{{^incremental}}…{{/incremental}}` | kept only on the first poll |
//!
//! The rendered SQL is not validated.

use sync_core::{CursorPredicate, Dialect, Query, TableDefinition, Value};

use crate::config::BindingConfig;
use crate::state::CursorState;

/// Rendering failure. Always a configuration error of the binding.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    #[error("binding has neither a table nor a template")]
    NoTable,

    #[error("table '{0}' does not exist in the source")]
    UnknownTable(String),

    #[error("column '{column}' does not exist in table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("cursor state has {state} values but {columns} cursor columns are configured")]
    ArityMismatch { columns: usize, state: usize },

    #[error("template error at offset {offset}: {message}")]
    Template { offset: usize, message: String },
}

/// Renders binding queries for one dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryRenderer {
    dialect: Dialect,
}

impl QueryRenderer {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Check every column the binding names against the table definition.
    pub fn validate(
        &self,
        binding: &BindingConfig,
        table: &TableDefinition,
    ) -> Result<(), RenderError> {
        let named = binding
            .cursor
            .iter()
            .chain(&binding.key)
            .chain(&binding.row_identity);
        for column in named {
            if table.get_column(column).is_none() {
                return Err(RenderError::UnknownColumn {
                    table: table.table.to_string(),
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }

    /// Render the next query of `binding` given its persisted cursor.
    ///
    /// When `table` is given, the binding's columns are validated first.
    pub fn render(
        &self,
        binding: &BindingConfig,
        cursor: &CursorState,
        table: Option<&TableDefinition>,
    ) -> Result<Query, RenderError> {
        if let Some(table) = table {
            self.validate(binding, table)?;
        }
        if !cursor.is_empty() && cursor.values.len() != binding.cursor.len() {
            return Err(RenderError::ArityMismatch {
                columns: binding.cursor.len(),
                state: cursor.values.len(),
            });
        }

        let predicate = (!binding.cursor.is_empty()).then(|| CursorPredicate {
            columns: binding.cursor.clone(),
            after: (!cursor.is_empty()).then(|| cursor.values.clone()),
            inclusive: binding.cursor_inclusive,
        });

        let mut params = Vec::new();
        let sql = match &binding.template {
            Some(template) => self.render_template(template, binding, cursor, &mut params)?,
            None => self.render_default(binding, cursor, &mut params)?,
        };

        Ok(Query {
            sql,
            params,
            dialect: self.dialect,
            table: binding.table_ref(),
            cursor: predicate,
            templated: binding.template.is_some(),
        })
    }

    fn bind(&self, params: &mut Vec<Value>, value: &Value) -> String {
        params.push(value.clone());
        self.dialect.placeholder(params.len())
    }

    fn quoted_columns(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.dialect.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn render_default(
        &self,
        binding: &BindingConfig,
        cursor: &CursorState,
        params: &mut Vec<Value>,
    ) -> Result<String, RenderError> {
        let table = binding.table_ref().ok_or(RenderError::NoTable)?;
        let mut sql = format!("SELECT * FROM {}", self.dialect.quote_table(&table));

        if binding.cursor.is_empty() {
            return Ok(sql);
        }
        if !cursor.is_empty() {
            let predicate = self.cursor_predicate(
                &binding.cursor,
                &cursor.values,
                binding.cursor_inclusive,
                params,
            );
            sql.push_str(" WHERE ");
            sql.push_str(&predicate);
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&self.quoted_columns(&binding.cursor));
        Ok(sql)
    }

    /// `columns > values` in lexicographic tuple order.
    fn cursor_predicate(
        &self,
        columns: &[String],
        values: &[Value],
        inclusive: bool,
        params: &mut Vec<Value>,
    ) -> String {
        let op = if inclusive { ">=" } else { ">" };
        let q = |c: &String| self.dialect.quote_identifier(c);

        if columns.len() == 1 {
            return format!("{} {op} {}", q(&columns[0]), self.bind(params, &values[0]));
        }

        if self.dialect.supports_row_values() {
            let placeholders: Vec<String> = values.iter().map(|v| self.bind(params, v)).collect();
            return format!(
                "({}) {op} ({})",
                self.quoted_columns(columns),
                placeholders.join(", ")
            );
        }

        // (a > x) OR (a = x AND b > y) OR ...
        let last = columns.len() - 1;
        let mut terms = Vec::with_capacity(columns.len());
        for i in 0..columns.len() {
            let mut parts = Vec::with_capacity(i + 1);
            for j in 0..i {
                parts.push(format!("{} = {}", q(&columns[j]), self.bind(params, &values[j])));
            }
            let term_op = if i == last { op } else { ">" };
            parts.push(format!(
                "{} {term_op} {}",
                q(&columns[i]),
                self.bind(params, &values[i])
            ));
            terms.push(format!("({})", parts.join(" AND ")));
        }
        terms.join(" OR ")
    }

    fn render_template(
        &self,
        template: &str,
        binding: &BindingConfig,
        cursor: &CursorState,
        params: &mut Vec<Value>,
    ) -> Result<String, RenderError> {
        let incremental = !cursor.is_empty();
        let mut out = String::with_capacity(template.len());
        // (enabled, offset) per open section
        let mut sections: Vec<(bool, usize)> = Vec::new();
        let mut rest = template;
        let mut offset = 0;

        loop {
            let active = sections.iter().all(|(enabled, _)| *enabled);
            let Some(start) = rest.find("{{") else {
                if active {
                    out.push_str(rest);
                }
                break;
            };
            if active {
                out.push_str(&rest[..start]);
            }

            let tag_offset = offset + start;
            let err = |message: String| RenderError::Template {
                offset: tag_offset,
                message,
            };
            let body = &rest[start + 2..];
            let end = body
                .find("}}")
                .ok_or_else(|| err("unterminated tag".to_string()))?;
            let tag = body[..end].trim();

            match tag {
                "#incremental" => sections.push((incremental, tag_offset)),
                "^incremental" => sections.push((!incremental, tag_offset)),
                "/incremental" => {
                    sections
                        .pop()
                        .ok_or_else(|| err("closing tag without an open section".to_string()))?;
                }
                "table" => {
                    let table = binding
                        .table_ref()
                        .ok_or_else(|| err("{{table}} used but the binding has no table".into()))?;
                    if active {
                        out.push_str(&self.dialect.quote_table(&table));
                    }
                }
                "schema" => {
                    let schema = binding.schema.as_ref().ok_or_else(|| {
                        err("{{schema}} used but the binding has no schema".to_string())
                    })?;
                    if active {
                        out.push_str(&self.dialect.quote_identifier(schema));
                    }
                }
                "name" => {
                    if active {
                        out.push_str(&binding.name);
                    }
                }
                "cursor_columns" => {
                    if binding.cursor.is_empty() {
                        return Err(err("binding has no cursor columns".to_string()));
                    }
                    if active {
                        out.push_str(&self.quoted_columns(&binding.cursor));
                    }
                }
                "cursor_values" => {
                    if binding.cursor.is_empty() {
                        return Err(err("binding has no cursor columns".to_string()));
                    }
                    if active {
                        if !incremental {
                            return Err(err(first_run_message(tag)));
                        }
                        let placeholders: Vec<String> =
                            cursor.values.iter().map(|v| self.bind(params, v)).collect();
                        out.push_str(&placeholders.join(", "));
                    }
                }
                _ if tag.starts_with("cursor.") => {
                    let n: usize = tag["cursor.".len()..]
                        .parse()
                        .map_err(|_| err(format!("invalid cursor index in {{{{{tag}}}}}")))?;
                    if n == 0 || n > binding.cursor.len() {
                        return Err(err(format!(
                            "{{{{{tag}}}}} is out of range for {} cursor columns",
                            binding.cursor.len()
                        )));
                    }
                    if active {
                        if !incremental {
                            return Err(err(first_run_message(tag)));
                        }
                        let placeholder = self.bind(params, &cursor.values[n - 1]);
                        out.push_str(&placeholder);
                    }
                }
                _ => return Err(err(format!("unknown placeholder {{{{{tag}}}}}"))),
            }

            let consumed = start + 2 + end + 2;
            rest = &rest[consumed..];
            offset += consumed;
        }

        if let Some((_, open)) = sections.last() {
            return Err(RenderError::Template {
                offset: *open,
                message: "section is never closed".to_string(),
            });
        }
        Ok(out)
    }
}

fn first_run_message(tag: &str) -> String {
    format!("{{{{{tag}}}}} has no value on the first poll; wrap it in {{{{#incremental}}}}")
}
