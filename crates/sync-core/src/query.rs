//! Rendered queries and SQL dialect details.

use crate::schema::TableRef;
use crate::values::Value;
use serde::{Deserialize, Serialize};

/// SQL dialect of a source.
///
/// The engine treats queries as opaque text; the dialect only decides
/// identifier quoting, parameter placeholders and whether tuple
/// comparisons can use row-value constructors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// `"ident"`, `$1`, row values supported
    #[default]
    Postgres,
    /// `` `ident` ``, `?`, row values supported
    MySql,
    /// `"ident"`, `?`, no row values (chained AND/OR expansion)
    Ansi,
}

impl Dialect {
    /// Quote an identifier, doubling embedded quote characters.
    pub fn quote_identifier(&self, ident: &str) -> String {
        match self {
            Dialect::MySql => format!("`{}`", ident.replace('`', "``")),
            Dialect::Postgres | Dialect::Ansi => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Quote an optionally schema-qualified table.
    pub fn quote_table(&self, table: &TableRef) -> String {
        match &table.schema {
            Some(schema) => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(&table.table)
            ),
            None => self.quote_identifier(&table.table),
        }
    }

    /// Placeholder for the parameter at 1-based `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::MySql | Dialect::Ansi => "?".to_string(),
        }
    }

    /// Whether `(a, b) > (x, y)` is understood by the source.
    pub fn supports_row_values(&self) -> bool {
        !matches!(self, Dialect::Ansi)
    }
}

/// Structured description of the cursor filter a query applies.
///
/// SQL sources ignore this and execute [`Query::sql`]; sources that do
/// not speak SQL (such as the in-memory test source) filter with it.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorPredicate {
    /// Cursor columns in ordering priority
    pub columns: Vec<String>,
    /// Lower bound tuple, `None` on the first (backfill) poll
    pub after: Option<Vec<Value>>,
    /// Whether rows equal to the bound are included
    pub inclusive: bool,
}

/// A query ready to execute against a source.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// SQL text with dialect placeholders
    pub sql: String,
    /// Bound parameters, in placeholder order
    pub params: Vec<Value>,
    /// Dialect the SQL was rendered for
    pub dialect: Dialect,
    /// Table the query reads, if known
    pub table: Option<TableRef>,
    /// Cursor filter, if the binding is cursor-incremental
    pub cursor: Option<CursorPredicate>,
    /// Whether the SQL came from a user template
    pub templated: bool,
}

impl Query {
    /// SQL with parameters substituted as literals.
    ///
    /// For display only; placeholders inside quoted literals are left alone.
    pub fn inline(&self) -> String {
        let mut out = String::with_capacity(self.sql.len());
        let mut chars = self.sql.chars().peekable();
        let mut in_literal = false;
        let mut next_positional = 0usize;

        while let Some(c) = chars.next() {
            if c == '\'' {
                in_literal = !in_literal;
                out.push(c);
                continue;
            }
            if in_literal {
                out.push(c);
                continue;
            }
            match (self.dialect, c) {
                (Dialect::Postgres, '$') if chars.peek().is_some_and(|n| n.is_ascii_digit()) => {
                    let mut digits = String::new();
                    while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                        digits.push(*d);
                        chars.next();
                    }
                    let literal = digits
                        .parse::<usize>()
                        .ok()
                        .and_then(|i| i.checked_sub(1))
                        .and_then(|i| self.params.get(i))
                        .map(|v| v.to_sql_literal());
                    match literal {
                        Some(literal) => out.push_str(&literal),
                        None => {
                            out.push('$');
                            out.push_str(&digits);
                        }
                    }
                }
                (Dialect::MySql | Dialect::Ansi, '?') => {
                    match self.params.get(next_positional) {
                        Some(v) => out.push_str(&v.to_sql_literal()),
                        None => out.push('?'),
                    }
                    next_positional += 1;
                }
                _ => out.push(c),
            }
        }
        out
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.inline())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(dialect: Dialect, sql: &str, params: Vec<Value>) -> Query {
        Query {
            sql: sql.to_string(),
            params,
            dialect,
            table: None,
            cursor: None,
            templated: false,
        }
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(Dialect::Postgres.quote_identifier("a\"b"), "\"a\"\"b\"");
        assert_eq!(Dialect::MySql.quote_identifier("a`b"), "`a``b`");
        assert_eq!(
            Dialect::Ansi.quote_table(&TableRef::new(Some("s".into()), "t")),
            "\"s\".\"t\""
        );
    }

    #[test]
    fn test_inline_numbered_placeholders() {
        let params: Vec<Value> = (1..=10).map(|i| Value::Int(i * 100)).collect();
        let q = query(Dialect::Postgres, "SELECT $1, $10, '$2'", params);
        assert_eq!(q.inline(), "SELECT 100, 1000, '$2'");
    }

    #[test]
    fn test_inline_positional_placeholders() {
        let q = query(
            Dialect::Ansi,
            "WHERE a > ? OR (a = ? AND b > ?)",
            vec![Value::Int(1), Value::Int(1), Value::Text("x".into())],
        );
        assert_eq!(q.inline(), "WHERE a > 1 OR (a = 1 AND b > 'x')");
    }

    #[test]
    fn test_row_value_support() {
        assert!(Dialect::Postgres.supports_row_values());
        assert!(Dialect::MySql.supports_row_values());
        assert!(!Dialect::Ansi.supports_row_values());
    }
}
