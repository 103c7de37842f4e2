//! Expression cleanup applied as the last optimizer step.
//!
//! Folds integer arithmetic between literals, drops parentheses around a
//! single literal or column, and coerces comparison literals to the declared
//! type of the column they are compared with. Identifier casing and quoting
//! are never touched. Every rewrite is best effort: an expression that cannot
//! be handled is left as it was.

use std::collections::HashMap;
use std::ops::ControlFlow;

use sqlparser::ast::{
    BinaryOperator, Expr, Ident, Statement, TableFactor, UnaryOperator, Visit, VisitMut, Visitor,
    VisitorMut,
};
use sqlparser::dialect::Dialect as ParserDialect;

use crate::db::types::{TypeCategory, categorize_type};
use crate::models::Dialect;
use crate::sql::{SchemaTypes, parse_expr, parser_dialect};

/// Normalize `stmt` in place.
pub fn normalize(stmt: &mut Statement, dialect: Dialect, schema: Option<&SchemaTypes>) {
    let aliases = match schema {
        Some(schema) if !schema.is_empty() => {
            let mut collector = AliasCollector::default();
            let _ = Visit::visit(&*stmt, &mut collector);
            collector.aliases
        }
        _ => HashMap::new(),
    };

    let mut normalizer = Normalizer {
        dialect,
        grammar: parser_dialect(dialect),
        schema: schema.filter(|s| !s.is_empty()),
        aliases,
    };
    let _ = VisitMut::visit(stmt, &mut normalizer);
}

/// Maps table aliases to the table they stand for.
#[derive(Default)]
struct AliasCollector {
    aliases: HashMap<String, String>,
}

impl Visitor for AliasCollector {
    type Break = ();

    fn pre_visit_table_factor(&mut self, factor: &TableFactor) -> ControlFlow<Self::Break> {
        if let TableFactor::Table {
            name,
            alias: Some(alias),
            ..
        } = factor
        {
            self.aliases
                .insert(alias.name.value.clone(), last_name_part(&name.to_string()));
        }
        ControlFlow::Continue(())
    }
}

struct Normalizer<'a> {
    dialect: Dialect,
    grammar: Box<dyn ParserDialect + Send + Sync>,
    schema: Option<&'a SchemaTypes>,
    aliases: HashMap<String, String>,
}

impl VisitorMut for Normalizer<'_> {
    type Break = ();

    fn post_visit_expr(&mut self, expr: &mut Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::Nested(inner) if is_atom(inner.as_ref()) => {
                let inner = inner.as_ref().clone();
                *expr = inner;
            }
            Expr::BinaryOp { left, op, right } => {
                match fold_integers(left, op, right) {
                    Some(folded) => {
                        if let Some(folded) = parse_expr(&folded.to_string(), self.grammar.as_ref())
                        {
                            *expr = folded;
                        }
                    }
                    None if is_comparison(op) => {
                        self.coerce(left, right);
                        self.coerce(right, left);
                    }
                    None => {}
                }
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

impl Normalizer<'_> {
    /// Rewrite `literal` to suit the declared type of `column`.
    fn coerce(&self, column: &Expr, literal: &mut Expr) {
        let Some(schema) = self.schema else {
            return;
        };
        if !matches!(literal, Expr::Value(_)) {
            return;
        }
        let Some(data_type) = self.column_type(schema, column) else {
            return;
        };
        let category = categorize_type(data_type, self.dialect);
        let text = literal.to_string();

        let replacement = match quoted_content(&text) {
            Some(content) if category.is_numeric() && is_plain_number(&content) => {
                parse_expr(content.trim(), self.grammar.as_ref())
            }
            None if category == TypeCategory::Text && is_plain_number(&text) => {
                parse_expr(&format!("'{}'", text), self.grammar.as_ref())
            }
            _ => None,
        };
        if let Some(replacement) = replacement {
            *literal = replacement;
        }
    }

    fn column_type<'s>(&self, schema: &'s SchemaTypes, column: &Expr) -> Option<&'s str> {
        match column {
            Expr::Identifier(ident) => schema.column_type(None, &ident.value),
            Expr::CompoundIdentifier(parts) => {
                let (column, qualifier) = match parts.as_slice() {
                    [.., qualifier, column] => (column, qualifier),
                    _ => return None,
                };
                let table = self
                    .aliases
                    .get(&qualifier.value)
                    .map(String::as_str)
                    .unwrap_or(qualifier.value.as_str());
                schema
                    .column_type(Some(table), &column.value)
                    .or_else(|| schema.column_type(None, &column.value))
            }
            _ => None,
        }
    }
}

fn is_atom(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) | Expr::Value(_)
    )
}

fn is_comparison(op: &BinaryOperator) -> bool {
    matches!(
        op,
        BinaryOperator::Eq
            | BinaryOperator::NotEq
            | BinaryOperator::Lt
            | BinaryOperator::LtEq
            | BinaryOperator::Gt
            | BinaryOperator::GtEq
    )
}

/// Integer value of a literal, including a negated one.
fn integer_literal(expr: &Expr) -> Option<i64> {
    match expr {
        Expr::Value(_) => expr.to_string().parse().ok(),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => integer_literal(expr).and_then(i64::checked_neg),
        Expr::Nested(inner) => integer_literal(inner),
        _ => None,
    }
}

/// Division is left alone: integer and decimal division differ per dialect.
fn fold_integers(left: &Expr, op: &BinaryOperator, right: &Expr) -> Option<i64> {
    let (l, r) = (integer_literal(left)?, integer_literal(right)?);
    match op {
        BinaryOperator::Plus => l.checked_add(r),
        BinaryOperator::Minus => l.checked_sub(r),
        BinaryOperator::Multiply => l.checked_mul(r),
        _ => None,
    }
}

/// Content of a single-quoted literal, with doubled quotes collapsed.
fn quoted_content(text: &str) -> Option<String> {
    let inner = text.strip_prefix('\'')?.strip_suffix('\'')?;
    Some(inner.replace("''", "'"))
}

fn is_plain_number(text: &str) -> bool {
    let text = text.trim();
    !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+'))
        && (text.parse::<i64>().is_ok() || text.parse::<f64>().is_ok_and(f64::is_finite))
}

/// Last dotted part of an object name, without quotes.
pub(crate) fn last_name_part(name: &str) -> String {
    let last = name.rsplit('.').next().unwrap_or(name);
    unquote(last)
}

pub(crate) fn unquote(name: &str) -> String {
    name.trim_matches(|c| matches!(c, '"' | '`' | '[' | ']'))
        .to_string()
}

/// Comparable identity of an identifier.
pub(crate) fn ident_key(ident: &Ident) -> String {
    ident.value.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::metadata::case_variants;
    use crate::sql::SqlInspector;

    fn run(sql: &str, schema: Option<&SchemaTypes>) -> String {
        let mut stmt = SqlInspector::new(Dialect::Sqlite).syntax_valid(sql).unwrap();
        normalize(&mut stmt, Dialect::Sqlite, schema);
        stmt.to_string()
    }

    fn schema() -> SchemaTypes {
        let mut columns = HashMap::new();
        for v in case_variants("status") {
            columns.insert(v, "TEXT".to_string());
        }
        for v in case_variants("amount") {
            columns.insert(v, "INTEGER".to_string());
        }
        let mut types = SchemaTypes::default();
        types.insert_table("orders", columns);
        types
    }

    #[test]
    fn test_fold_integer_arithmetic() {
        assert_eq!(run("SELECT 1 + 2 * 3 FROM t", None), "SELECT 7 FROM t");
        assert_eq!(run("SELECT 10 - 20 FROM t", None), "SELECT -10 FROM t");
        // Division is kept as written
        assert_eq!(run("SELECT 7 / 2 FROM t", None), "SELECT 7 / 2 FROM t");
    }

    #[test]
    fn test_unwrap_parenthesized_atoms() {
        assert_eq!(
            run("SELECT (a) FROM t WHERE (b) = (1)", None),
            "SELECT a FROM t WHERE b = 1"
        );
        assert_eq!(
            run("SELECT * FROM t WHERE (a = 1 OR b = 2)", None),
            "SELECT * FROM t WHERE (a = 1 OR b = 2)"
        );
    }

    #[test]
    fn test_coerce_literal_to_text_column() {
        let schema = schema();
        assert_eq!(
            run("SELECT * FROM orders WHERE status = 3", Some(&schema)),
            "SELECT * FROM orders WHERE status = '3'"
        );
    }

    #[test]
    fn test_coerce_numeric_string_to_number() {
        let schema = schema();
        assert_eq!(
            run("SELECT * FROM orders AS o WHERE o.amount > '100'", Some(&schema)),
            "SELECT * FROM orders AS o WHERE o.amount > 100"
        );
        // Not numeric: untouched
        assert_eq!(
            run("SELECT * FROM orders WHERE amount = 'abc'", Some(&schema)),
            "SELECT * FROM orders WHERE amount = 'abc'"
        );
    }

    #[test]
    fn test_identifier_case_preserved() {
        assert_eq!(
            run("SELECT \"Name\" FROM \"Users\"", None),
            "SELECT \"Name\" FROM \"Users\""
        );
    }
}
