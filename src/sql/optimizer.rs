//! Rule-based rewrites applied to generated SQL before execution.
//!
//! Rules run in a fixed order, each on the whole statement:
//!
//! 1. CTE inlining, only for MySQL servers older than 8.0
//! 2. Wrapping `IN`/`ANY`/`ALL` subqueries that carry a `LIMIT`
//! 3. Adding missing `GROUP BY` columns
//! 4. Capping the outer `LIMIT`
//! 5. [`normalize`](crate::sql::normalize)
//!
//! Every rule is idempotent. New AST fragments are produced by parsing small
//! SQL snippets in the statement's own dialect so the output stays in that
//! dialect.

use std::ops::ControlFlow;

use sqlparser::ast::{
    Expr, GroupByExpr, LimitClause, Query, Select, SelectItem, SetExpr, Statement, TableFactor,
    Visit, VisitMut, Visitor, VisitorMut,
};
use sqlparser::dialect::Dialect as ParserDialect;
use sqlparser::parser::ParserError;
use tracing::debug;

use crate::models::{DBServerVersion, Dialect};
use crate::sql::inspector::SqlInspector;
use crate::sql::normalize::{ident_key, last_name_part, normalize, unquote};
use crate::sql::{SchemaTypes, parse_expr, parse_query, parser_dialect};

/// Aggregate functions recognized by the GROUP BY repair.
const AGGREGATE_FUNCTIONS: &[&str] = &[
    "COUNT",
    "SUM",
    "AVG",
    "MIN",
    "MAX",
    "GROUP_CONCAT",
    "STRING_AGG",
    "ARRAY_AGG",
    "LIST",
    "JSON_AGG",
    "JSONB_AGG",
    "JSON_ARRAYAGG",
    "JSON_OBJECTAGG",
    "JSON_GROUP_ARRAY",
    "JSON_GROUP_OBJECT",
    "BOOL_AND",
    "BOOL_OR",
    "BIT_AND",
    "BIT_OR",
    "EVERY",
    "STDDEV",
    "STDDEV_POP",
    "STDDEV_SAMP",
    "VARIANCE",
    "VAR_POP",
    "VAR_SAMP",
    "MEDIAN",
    "MODE",
    "ANY_VALUE",
    "TOTAL",
];

const LIMITED_SUBQUERY_ALIAS: &str = "limited_subquery";
const CAPPED_RESULT_ALIAS: &str = "capped_result";

/// Dialect- and version-aware SQL rewriter.
pub struct SqlOptimizer {
    dialect: Dialect,
    version: Option<DBServerVersion>,
    grammar: Box<dyn ParserDialect + Send + Sync>,
}

impl SqlOptimizer {
    pub fn new(dialect: Dialect, version: Option<DBServerVersion>) -> Self {
        Self {
            dialect,
            version,
            grammar: parser_dialect(dialect),
        }
    }

    /// Parse `sql` and optimize it. Parse errors are returned untouched.
    pub fn optimize_sql(
        &self,
        sql: &str,
        schema: Option<&SchemaTypes>,
        limit: Option<u64>,
    ) -> Result<String, ParserError> {
        let stmt = SqlInspector::new(self.dialect).syntax_valid(sql)?;
        Ok(self.optimize(stmt, schema, limit))
    }

    /// Apply every rule to `stmt` and render it back to SQL.
    ///
    /// Statements other than queries are rendered unchanged.
    pub fn optimize(
        &self,
        mut stmt: Statement,
        schema: Option<&SchemaTypes>,
        limit: Option<u64>,
    ) -> String {
        if let Statement::Query(query) = &mut stmt {
            if self.lacks_cte_support() {
                inline_ctes(query, self.grammar.as_ref());
            }
            wrap_limited_subqueries(query, self.grammar.as_ref());
            repair_group_by(query);
            if let Some(cap) = limit.filter(|cap| *cap > 0) {
                cap_limit(query, cap, self.grammar.as_ref());
            }
            normalize(&mut stmt, self.dialect, schema);
        }
        let sql = stmt.to_string();
        debug!(dialect = %self.dialect, sql = %sql, "Optimized SQL");
        sql
    }

    fn lacks_cte_support(&self) -> bool {
        self.dialect == Dialect::MySql && self.version.is_some_and(|v| v.major < 8)
    }
}

// =============================================================================
// CTE inlining
// =============================================================================

struct CteDefinition {
    name: String,
    alias: String,
    query: Query,
}

struct CteInliner<'a> {
    grammar: &'a dyn ParserDialect,
}

impl VisitorMut for CteInliner<'_> {
    type Break = ();

    fn pre_visit_query(&mut self, query: &mut Query) -> ControlFlow<Self::Break> {
        inline_own_ctes(query, self.grammar);
        ControlFlow::Continue(())
    }
}

fn inline_ctes(query: &mut Query, grammar: &dyn ParserDialect) {
    let _ = VisitMut::visit(query, &mut CteInliner { grammar });
}

/// Replace references to `query`'s own CTEs with derived tables and drop its
/// `WITH` clause. Recursive CTEs cannot be inlined and are kept.
fn inline_own_ctes(query: &mut Query, grammar: &dyn ParserDialect) {
    if query.with.as_ref().is_none_or(|with| with.recursive) {
        return;
    }
    let Some(with) = query.with.take() else {
        return;
    };

    let mut definitions: Vec<CteDefinition> = Vec::new();
    for cte in with.cte_tables {
        let mut cte_query = *cte.query;
        inline_ctes(&mut cte_query, grammar);
        substitute_ctes(&mut cte_query, &definitions, grammar);
        definitions.push(CteDefinition {
            name: cte.alias.name.value.clone(),
            alias: cte.alias.to_string(),
            query: cte_query,
        });
    }
    substitute_ctes(query, &definitions, grammar);
}

struct CteSubstitution<'a> {
    definitions: &'a [CteDefinition],
    grammar: &'a dyn ParserDialect,
}

impl VisitorMut for CteSubstitution<'_> {
    type Break = ();

    // Post-visit so an inserted subquery is not walked again.
    fn post_visit_table_factor(&mut self, factor: &mut TableFactor) -> ControlFlow<Self::Break> {
        let TableFactor::Table { name, alias, .. } = factor else {
            return ControlFlow::Continue(());
        };
        let reference = name.to_string();
        if reference.contains('.') {
            return ControlFlow::Continue(());
        }
        let reference = unquote(&reference);
        let Some(definition) = self
            .definitions
            .iter()
            .rev()
            .find(|d| d.name.eq_ignore_ascii_case(&reference))
        else {
            return ControlFlow::Continue(());
        };

        let alias = alias
            .as_ref()
            .map(|a| a.to_string())
            .unwrap_or_else(|| definition.alias.clone());
        if let Some(derived) = derived_table(&alias, definition.query.clone(), self.grammar) {
            *factor = derived;
        }
        ControlFlow::Continue(())
    }
}

fn substitute_ctes(query: &mut Query, definitions: &[CteDefinition], grammar: &dyn ParserDialect) {
    if definitions.is_empty() {
        return;
    }
    let _ = VisitMut::visit(
        query,
        &mut CteSubstitution {
            definitions,
            grammar,
        },
    );
}

/// `(<subquery>) AS <alias>` as a table factor.
fn derived_table(alias: &str, subquery: Query, grammar: &dyn ParserDialect) -> Option<TableFactor> {
    let shell = parse_query(&format!("SELECT * FROM (SELECT 1) AS {}", alias), grammar).ok()?;
    let SetExpr::Select(select) = *shell.body else {
        return None;
    };
    let mut factor = select.from.into_iter().next()?.relation;
    match &mut factor {
        TableFactor::Derived { subquery: slot, .. } => **slot = subquery,
        _ => return None,
    }
    Some(factor)
}

// =============================================================================
// Subqueries with LIMIT
// =============================================================================

struct LimitedSubqueryWrapper<'a> {
    grammar: &'a dyn ParserDialect,
}

impl VisitorMut for LimitedSubqueryWrapper<'_> {
    type Break = ();

    fn post_visit_expr(&mut self, expr: &mut Expr) -> ControlFlow<Self::Break> {
        match expr {
            Expr::InSubquery { subquery, .. } => wrap_if_limited(subquery, self.grammar),
            Expr::AnyOp { right, .. } | Expr::AllOp { right, .. } => {
                if let Expr::Subquery(subquery) = right.as_mut() {
                    wrap_if_limited(subquery, self.grammar);
                }
            }
            _ => {}
        }
        ControlFlow::Continue(())
    }
}

fn wrap_limited_subqueries(query: &mut Query, grammar: &dyn ParserDialect) {
    let _ = VisitMut::visit(query, &mut LimitedSubqueryWrapper { grammar });
}

/// Turn `q LIMIT n` into `SELECT <q's columns> FROM (q LIMIT n) AS alias`.
fn wrap_if_limited(subquery: &mut Query, grammar: &dyn ParserDialect) {
    if subquery.limit_clause.is_none() && subquery.fetch.is_none() {
        return;
    }
    let columns = output_columns(subquery);
    let text = format!(
        "SELECT {} FROM (SELECT 1) AS {}",
        columns, LIMITED_SUBQUERY_ALIAS
    );
    let Ok(mut outer) = parse_query(&text, grammar) else {
        return;
    };
    let Some(slot) = first_derived_subquery(&mut outer) else {
        return;
    };
    std::mem::swap(slot, subquery);
    std::mem::swap(subquery, &mut outer);
}

/// Output column list of a query, or `*` when any column has no usable name.
fn output_columns(query: &Query) -> String {
    let SetExpr::Select(select) = query.body.as_ref() else {
        return "*".to_string();
    };
    let mut names = Vec::with_capacity(select.projection.len());
    for item in &select.projection {
        let name = match item {
            SelectItem::ExprWithAlias { alias, .. } => alias.to_string(),
            SelectItem::UnnamedExpr(Expr::Identifier(ident)) => ident.to_string(),
            SelectItem::UnnamedExpr(Expr::CompoundIdentifier(parts)) => match parts.last() {
                Some(ident) => ident.to_string(),
                None => return "*".to_string(),
            },
            _ => return "*".to_string(),
        };
        names.push(format!("{}.{}", LIMITED_SUBQUERY_ALIAS, name));
    }
    if names.is_empty() {
        "*".to_string()
    } else {
        names.join(", ")
    }
}

fn first_derived_subquery(query: &mut Query) -> Option<&mut Query> {
    let SetExpr::Select(select) = query.body.as_mut() else {
        return None;
    };
    match &mut select.from.first_mut()?.relation {
        TableFactor::Derived { subquery, .. } => Some(subquery.as_mut()),
        _ => None,
    }
}

// =============================================================================
// GROUP BY repair
// =============================================================================

struct GroupByRepair;

impl VisitorMut for GroupByRepair {
    type Break = ();

    fn pre_visit_query(&mut self, query: &mut Query) -> ControlFlow<Self::Break> {
        let orders_by_aggregate = query
            .order_by
            .as_ref()
            .is_some_and(|order_by| contains_aggregate(order_by));
        repair_set_expr(query.body.as_mut(), orders_by_aggregate);
        ControlFlow::Continue(())
    }
}

fn repair_group_by(query: &mut Query) {
    let _ = VisitMut::visit(query, &mut GroupByRepair);
}

fn repair_set_expr(body: &mut SetExpr, orders_by_aggregate: bool) {
    match body {
        SetExpr::Select(select) => repair_select(select, orders_by_aggregate),
        // ORDER BY of a set operation applies to the combined result
        SetExpr::SetOperation { left, right, .. } => {
            repair_set_expr(left, false);
            repair_set_expr(right, false);
        }
        _ => {}
    }
}

/// Only the SELECT's own projection is inspected; correlated references in
/// nested queries are not analysed.
fn repair_select(select: &mut Select, orders_by_aggregate: bool) {
    let GroupByExpr::Expressions(grouped, _) = &mut select.group_by else {
        return;
    };

    let mut has_aggregate = false;
    let mut plain_columns: Vec<(Expr, Option<String>)> = Vec::new();
    for item in &select.projection {
        let (expr, alias) = match item {
            SelectItem::UnnamedExpr(expr) => (expr, None),
            SelectItem::ExprWithAlias { expr, alias } => (expr, Some(ident_key(alias))),
            // Wildcards cannot be grouped by name
            _ => return,
        };
        if contains_aggregate(expr) {
            has_aggregate = true;
        } else if matches!(expr, Expr::Identifier(_) | Expr::CompoundIdentifier(_)) {
            plain_columns.push((expr.clone(), alias));
        }
    }

    let needs_repair = has_aggregate || !grouped.is_empty() || orders_by_aggregate;
    if !needs_repair || plain_columns.is_empty() {
        return;
    }

    let mut already: Vec<Vec<String>> = grouped.iter().filter_map(column_path).collect();
    for (column, alias) in plain_columns {
        let Some(path) = column_path(&column) else {
            continue;
        };
        let covered = already.iter().any(|grouped| {
            same_column(grouped, &path)
                || alias
                    .as_ref()
                    .is_some_and(|a| grouped.len() == 1 && grouped[0] == *a)
        });
        if covered {
            continue;
        }
        already.push(path);
        grouped.push(column);
    }
}

/// Case-folded identifier parts of a column reference.
fn column_path(expr: &Expr) -> Option<Vec<String>> {
    match expr {
        Expr::Identifier(ident) => Some(vec![ident_key(ident)]),
        Expr::CompoundIdentifier(parts) if !parts.is_empty() => {
            Some(parts.iter().map(ident_key).collect())
        }
        Expr::Nested(inner) => column_path(inner),
        _ => None,
    }
}

/// Two references name the same column when the shorter one is a suffix of
/// the longer: `a` matches `t.a`, but `t.a` never matches `u.a`.
fn same_column(a: &[String], b: &[String]) -> bool {
    a.iter().rev().zip(b.iter().rev()).all(|(x, y)| x == y)
}

/// Finds aggregate calls outside nested queries and window functions.
#[derive(Default)]
struct AggregateFinder {
    depth: usize,
}

impl Visitor for AggregateFinder {
    type Break = ();

    fn pre_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.depth += 1;
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<Self::Break> {
        self.depth = self.depth.saturating_sub(1);
        ControlFlow::Continue(())
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<Self::Break> {
        if self.depth > 0 {
            return ControlFlow::Continue(());
        }
        match expr {
            Expr::Function(function) if function.over.is_none() => {
                let name = last_name_part(&function.name.to_string()).to_uppercase();
                if AGGREGATE_FUNCTIONS.contains(&name.as_str()) {
                    return ControlFlow::Break(());
                }
                ControlFlow::Continue(())
            }
            _ => ControlFlow::Continue(()),
        }
    }
}

fn contains_aggregate<V: Visit>(node: &V) -> bool {
    Visit::visit(node, &mut AggregateFinder::default()).is_break()
}

// =============================================================================
// LIMIT cap
// =============================================================================

/// Set the outer LIMIT (or `FETCH FIRST`) to `min(existing, cap)`.
fn cap_limit(query: &mut Query, cap: u64, grammar: &dyn ParserDialect) {
    let Some(cap_expr) = parse_expr(&cap.to_string(), grammar) else {
        return;
    };

    // PERCENT and WITH TIES do not bound the row count, so cap from outside
    if query.fetch.as_ref().is_some_and(|f| f.percent || f.with_ties) {
        wrap_with_limit(query, cap, grammar);
        return;
    }
    if let Some(fetch) = &mut query.fetch {
        // FETCH FIRST ROWS ONLY without a quantity is one row
        if let Some(quantity) = &mut fetch.quantity {
            if literal_limit(quantity).is_none_or(|n| n > cap) {
                *quantity = cap_expr;
            }
        }
        return;
    }

    match &mut query.limit_clause {
        Some(LimitClause::LimitOffset { limit, .. }) => match limit {
            Some(existing) if literal_limit(existing).is_some_and(|n| n <= cap) => {}
            _ => *limit = Some(cap_expr),
        },
        Some(LimitClause::OffsetCommaLimit { limit, .. }) => {
            if literal_limit(limit).is_none_or(|n| n > cap) {
                *limit = cap_expr;
            }
        }
        None => {
            if let Ok(shell) = parse_query(&format!("SELECT 1 LIMIT {}", cap), grammar) {
                query.limit_clause = shell.limit_clause;
            }
        }
    }
}

/// Turn `q` into `SELECT * FROM (q) AS capped_result LIMIT cap`.
fn wrap_with_limit(query: &mut Query, cap: u64, grammar: &dyn ParserDialect) {
    let text = format!(
        "SELECT * FROM (SELECT 1) AS {} LIMIT {}",
        CAPPED_RESULT_ALIAS, cap
    );
    let Ok(mut outer) = parse_query(&text, grammar) else {
        return;
    };
    let Some(slot) = first_derived_subquery(&mut outer) else {
        return;
    };
    std::mem::swap(slot, query);
    std::mem::swap(query, &mut outer);
}

/// Numeric LIMIT value. `LIMIT ALL`, placeholders and expressions count as
/// unbounded.
fn literal_limit(expr: &Expr) -> Option<u64> {
    match expr {
        Expr::Value(_) => expr.to_string().parse().ok(),
        _ => None,
    }
}
