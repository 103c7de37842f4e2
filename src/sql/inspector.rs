//! SQL statement inspection.
//!
//! Parses model-generated SQL with the data source's grammar and decides
//! whether it is a read query that may be executed. Only plain queries
//! (SELECT, set operations, VALUES, WITH ... SELECT) qualify; everything else,
//! including data-modifying CTEs, is reported as a non-query.
//!
//! Uses [sqlparser](https://docs.rs/sqlparser/) so that classification works
//! on the AST rather than on keywords in the text.

use std::ops::ControlFlow;

use sqlparser::ast::{Query, Statement, Visit, Visitor};
use sqlparser::dialect::Dialect as ParserDialect;
use sqlparser::parser::{Parser, ParserError};

use crate::models::Dialect;
use crate::sql::parser_dialect;

/// Type of SQL statement detected by the inspector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlStatementType {
    /// SELECT, set operations and VALUES
    Query,
    /// SHOW, DESCRIBE and EXPLAIN of a query
    Metadata,
    /// INSERT, UPDATE, DELETE, MERGE, COPY
    DmlWrite,
    /// CREATE, DROP, ALTER, TRUNCATE
    Ddl,
    /// BEGIN, COMMIT, ROLLBACK, SAVEPOINT
    Transaction,
    /// CALL, EXECUTE, PREPARE
    ProcedureCall,
    /// GRANT, SET, USE, PRAGMA, ATTACH and friends
    Administrative,
    Unknown,
}

/// Dialect-bound parser front end.
pub struct SqlInspector {
    dialect: Dialect,
    grammar: Box<dyn ParserDialect + Send + Sync>,
}

impl SqlInspector {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            grammar: parser_dialect(dialect),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Parse `sql` as exactly one statement.
    ///
    /// Parser errors are returned untouched; an empty input or more than one
    /// statement is reported as a parser error as well.
    pub fn syntax_valid(&self, sql: &str) -> Result<Statement, ParserError> {
        let mut statements = Parser::parse_sql(self.grammar.as_ref(), sql)?;
        match statements.len() {
            1 => Ok(statements.remove(0)),
            0 => Err(ParserError::ParserError("Empty SQL statement".to_string())),
            n => Err(ParserError::ParserError(format!(
                "Expected a single SQL statement, found {}",
                n
            ))),
        }
    }

    /// Whether `sql` parses as a single read query. Unparseable text is not a query.
    pub fn is_query_sql(&self, sql: &str) -> bool {
        self.syntax_valid(sql).is_ok_and(|stmt| is_query(&stmt))
    }
}

/// Whether `stmt` is a read query.
///
/// A `Query` node may still wrap a write (`WITH x AS (...) INSERT ...` or a
/// data-modifying CTE), so any statement nested inside disqualifies it.
pub fn is_query(stmt: &Statement) -> bool {
    match stmt {
        Statement::Query(query) => !contains_statement(query),
        _ => false,
    }
}

struct NestedStatement;

impl Visitor for NestedStatement {
    type Break = ();

    fn pre_visit_statement(&mut self, _statement: &Statement) -> ControlFlow<Self::Break> {
        ControlFlow::Break(())
    }
}

fn contains_statement(query: &Query) -> bool {
    query.visit(&mut NestedStatement).is_break()
}

/// Classify a parsed statement into a statement type plus an operation name
/// suitable for log lines and error messages.
pub fn classify_statement(stmt: &Statement) -> (SqlStatementType, &'static str) {
    match stmt {
        Statement::Query(_) if is_query(stmt) => (SqlStatementType::Query, "SELECT"),
        Statement::Query(_) => (SqlStatementType::DmlWrite, "WITH"),

        Statement::ShowTables { .. } => (SqlStatementType::Metadata, "SHOW TABLES"),
        Statement::ShowColumns { .. } => (SqlStatementType::Metadata, "SHOW COLUMNS"),
        Statement::ShowDatabases { .. } => (SqlStatementType::Metadata, "SHOW DATABASES"),
        Statement::ShowSchemas { .. } => (SqlStatementType::Metadata, "SHOW SCHEMAS"),
        Statement::ShowCreate { .. } => (SqlStatementType::Metadata, "SHOW CREATE"),
        Statement::ShowVariable { .. } => (SqlStatementType::Metadata, "SHOW VARIABLE"),
        Statement::ShowVariables { .. } => (SqlStatementType::Metadata, "SHOW VARIABLES"),
        Statement::ExplainTable { .. } => (SqlStatementType::Metadata, "DESCRIBE"),
        Statement::Explain { statement, .. } => match classify_statement(statement) {
            (SqlStatementType::Query, _) => (SqlStatementType::Metadata, "EXPLAIN"),
            inner => inner,
        },

        Statement::Insert(_) => (SqlStatementType::DmlWrite, "INSERT"),
        Statement::Update { .. } => (SqlStatementType::DmlWrite, "UPDATE"),
        Statement::Delete(_) => (SqlStatementType::DmlWrite, "DELETE"),
        Statement::Merge { .. } => (SqlStatementType::DmlWrite, "MERGE"),
        Statement::Copy { .. } => (SqlStatementType::DmlWrite, "COPY"),

        Statement::CreateTable { .. } => (SqlStatementType::Ddl, "CREATE TABLE"),
        Statement::CreateView { .. } => (SqlStatementType::Ddl, "CREATE VIEW"),
        Statement::CreateIndex(_) => (SqlStatementType::Ddl, "CREATE INDEX"),
        Statement::CreateSchema { .. } => (SqlStatementType::Ddl, "CREATE SCHEMA"),
        Statement::CreateDatabase { .. } => (SqlStatementType::Ddl, "CREATE DATABASE"),
        Statement::CreateSecret { .. } => (SqlStatementType::Ddl, "CREATE SECRET"),
        Statement::AlterTable { .. } => (SqlStatementType::Ddl, "ALTER TABLE"),
        Statement::AlterView { .. } => (SqlStatementType::Ddl, "ALTER VIEW"),
        Statement::Drop { .. } => (SqlStatementType::Ddl, "DROP"),
        Statement::Truncate { .. } => (SqlStatementType::Ddl, "TRUNCATE"),

        Statement::StartTransaction { .. } => (SqlStatementType::Transaction, "BEGIN"),
        Statement::Commit { .. } => (SqlStatementType::Transaction, "COMMIT"),
        Statement::Rollback { .. } => (SqlStatementType::Transaction, "ROLLBACK"),
        Statement::Savepoint { .. } => (SqlStatementType::Transaction, "SAVEPOINT"),

        Statement::Call { .. } => (SqlStatementType::ProcedureCall, "CALL"),
        Statement::Execute { .. } => (SqlStatementType::ProcedureCall, "EXECUTE"),
        Statement::Prepare { .. } => (SqlStatementType::ProcedureCall, "PREPARE"),

        Statement::Grant { .. } => (SqlStatementType::Administrative, "GRANT"),
        Statement::Revoke { .. } => (SqlStatementType::Administrative, "REVOKE"),
        Statement::Set(_) => (SqlStatementType::Administrative, "SET"),
        Statement::Use(_) => (SqlStatementType::Administrative, "USE"),
        Statement::Pragma { .. } => (SqlStatementType::Administrative, "PRAGMA"),
        Statement::Install { .. } => (SqlStatementType::Administrative, "INSTALL"),
        Statement::Load { .. } => (SqlStatementType::Administrative, "LOAD"),
        Statement::AttachDatabase { .. } => (SqlStatementType::Administrative, "ATTACH"),
        Statement::AttachDuckDBDatabase { .. } => (SqlStatementType::Administrative, "ATTACH"),
        Statement::DetachDuckDBDatabase { .. } => (SqlStatementType::Administrative, "DETACH"),

        _ => (SqlStatementType::Unknown, "Unknown"),
    }
}
