//! SQL inspection and rewriting.
//!
//! - [`inspector`]: parse a single statement and classify it
//! - [`optimizer`]: dialect-aware rewrites applied before execution
//! - [`normalize`]: literal and expression cleanup that needs no schema
//!   beyond column types

pub mod inspector;
pub mod normalize;
pub mod optimizer;

use std::collections::HashMap;

use sqlparser::ast::{Expr, Query, Statement};
use sqlparser::dialect::{
    Dialect as ParserDialect, DuckDbDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect,
};
use sqlparser::parser::{Parser, ParserError};

use crate::models::Dialect;
use crate::models::metadata::case_variants;

pub use inspector::{SqlInspector, SqlStatementType};
pub use optimizer::SqlOptimizer;

/// sqlparser dialect for a data source dialect.
pub fn parser_dialect(dialect: Dialect) -> Box<dyn ParserDialect + Send + Sync> {
    match dialect {
        Dialect::MySql => Box::new(MySqlDialect {}),
        Dialect::Postgres => Box::new(PostgreSqlDialect {}),
        Dialect::Sqlite => Box::new(SQLiteDialect {}),
        Dialect::DuckDb => Box::new(DuckDbDialect {}),
    }
}

/// Parse a standalone expression such as a literal.
pub(crate) fn parse_expr(text: &str, dialect: &dyn ParserDialect) -> Option<Expr> {
    Parser::new(dialect)
        .try_with_sql(text)
        .and_then(|mut parser| parser.parse_expr())
        .ok()
}

/// Parse text that must be exactly one query.
pub(crate) fn parse_query(text: &str, dialect: &dyn ParserDialect) -> Result<Query, ParserError> {
    let mut statements = Parser::parse_sql(dialect, text)?;
    match (statements.pop(), statements.is_empty()) {
        (Some(Statement::Query(query)), true) => Ok(*query),
        _ => Err(ParserError::ParserError(format!(
            "expected a single query: {}",
            text
        ))),
    }
}

/// Column types per table, for schema-aware rewrites.
///
/// Tables and columns are registered under every case variant of their name,
/// and lookups try the spelling given first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaTypes {
    tables: HashMap<String, HashMap<String, String>>,
}

impl SchemaTypes {
    /// `columns` is expected to already hold the case variants of each
    /// column name, as produced by `DBTable::column_type`.
    pub fn insert_table(&mut self, table: &str, columns: HashMap<String, String>) {
        for variant in case_variants(table) {
            self.tables
                .entry(variant)
                .or_default()
                .extend(columns.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Declared type of `column`. With a table, only that table is searched;
    /// without one, the column must resolve to the same type everywhere it
    /// occurs.
    pub fn column_type(&self, table: Option<&str>, column: &str) -> Option<&str> {
        match table {
            Some(table) => self.table(table)?.get(column).map(String::as_str),
            None => {
                let mut found: Option<&str> = None;
                for columns in self.tables.values() {
                    if let Some(ty) = columns.get(column) {
                        match found {
                            Some(prev) if !prev.eq_ignore_ascii_case(ty) => return None,
                            _ => found = Some(ty),
                        }
                    }
                }
                found
            }
        }
    }

    fn table(&self, name: &str) -> Option<&HashMap<String, String>> {
        self.tables
            .get(name)
            .or_else(|| self.tables.get(&name.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn types() -> SchemaTypes {
        let mut types = SchemaTypes::default();
        let mut orders = HashMap::new();
        for v in case_variants("status") {
            orders.insert(v, "VARCHAR(16)".to_string());
        }
        for v in case_variants("id") {
            orders.insert(v, "INT".to_string());
        }
        types.insert_table("orders", orders);

        let mut users = HashMap::new();
        for v in case_variants("id") {
            users.insert(v, "BIGINT".to_string());
        }
        types.insert_table("users", users);
        types
    }

    #[test]
    fn test_lookup_with_table() {
        let types = types();
        assert_eq!(types.column_type(Some("ORDERS"), "Status"), Some("VARCHAR(16)"));
        assert_eq!(types.column_type(Some("users"), "id"), Some("BIGINT"));
        assert_eq!(types.column_type(Some("missing"), "id"), None);
    }

    #[test]
    fn test_unqualified_lookup_requires_agreement() {
        let types = types();
        assert_eq!(types.column_type(None, "status"), Some("VARCHAR(16)"));
        // INT vs BIGINT: ambiguous
        assert_eq!(types.column_type(None, "id"), None);
    }

    #[test]
    fn test_parse_query_rejects_multiple_statements() {
        let dialect = parser_dialect(Dialect::Sqlite);
        assert!(parse_query("SELECT 1", dialect.as_ref()).is_ok());
        assert!(parse_query("SELECT 1; SELECT 2", dialect.as_ref()).is_err());
    }
}
