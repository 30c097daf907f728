//! Trivial query evaluation shared by the bundled backends.
//!
//! Neither bundled backend stores relational data, so the only queries they
//! answer are constant projections such as `SELECT 1` or
//! `SELECT 'ok' AS status, 2`. That is enough for connection health checks.
//! Parsing goes through sqlparser so malformed SQL is rejected the same way a
//! real driver would reject it.

use serde::Serialize;
use serde_json::Value;
use sqlparser::ast as sp;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser as SqlParser;

use super::error::{BackendError, BackendResult};

/// Rows returned from a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// Column names in order.
    pub columns: Vec<String>,
    /// Rows, each with one value per column.
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of the first row, if any.
    pub fn scalar(&self) -> Option<&Value> {
        self.rows.first().and_then(|row| row.first())
    }
}

/// Evaluate a constant `SELECT` statement.
pub fn evaluate(sql: &str) -> BackendResult<QueryResult> {
    let sql = sql.trim();
    if sql.is_empty() {
        return Err(BackendError::UnsupportedQuery("empty query".into()));
    }

    let dialect = GenericDialect {};
    let statements = SqlParser::parse_sql(&dialect, sql)?;

    match statements.as_slice() {
        [sp::Statement::Query(query)] => evaluate_query(query),
        [other] => Err(BackendError::UnsupportedQuery(other.to_string())),
        _ => Err(BackendError::UnsupportedQuery(
            "exactly one statement required".into(),
        )),
    }
}

fn evaluate_query(query: &sp::Query) -> BackendResult<QueryResult> {
    let select = match query.body.as_ref() {
        sp::SetExpr::Select(s) => s,
        other => return Err(BackendError::UnsupportedQuery(other.to_string())),
    };

    if !select.from.is_empty() {
        return Err(BackendError::UnsupportedQuery(
            "queries against tables are not supported".into(),
        ));
    }
    if select.selection.is_some() {
        return Err(BackendError::UnsupportedQuery(
            "WHERE clauses are not supported".into(),
        ));
    }

    let mut columns = Vec::with_capacity(select.projection.len());
    let mut row = Vec::with_capacity(select.projection.len());

    for item in &select.projection {
        match item {
            sp::SelectItem::UnnamedExpr(expr) => {
                columns.push(expr.to_string());
                row.push(literal(expr)?);
            }
            sp::SelectItem::ExprWithAlias { expr, alias } => {
                columns.push(alias.value.clone());
                row.push(literal(expr)?);
            }
            other => return Err(BackendError::UnsupportedQuery(other.to_string())),
        }
    }

    Ok(QueryResult {
        columns,
        rows: vec![row],
    })
}

fn literal(expr: &sp::Expr) -> BackendResult<Value> {
    match expr {
        sp::Expr::Value(v) => convert_value(v),
        sp::Expr::Nested(inner) => literal(inner),
        sp::Expr::UnaryOp {
            op: sp::UnaryOperator::Minus,
            expr,
        } => negate(literal(expr)?),
        other => Err(BackendError::UnsupportedQuery(format!(
            "unsupported expression: {}",
            other
        ))),
    }
}

fn convert_value(v: &sp::ValueWithSpan) -> BackendResult<Value> {
    match &v.value {
        sp::Value::Null => Ok(Value::Null),
        sp::Value::Boolean(b) => Ok(Value::Bool(*b)),
        sp::Value::Number(s, _) => parse_number(s),
        sp::Value::SingleQuotedString(s) => Ok(Value::String(s.clone())),
        sp::Value::DoubleQuotedString(s) => Ok(Value::String(s.clone())),
        other => Err(BackendError::UnsupportedQuery(format!(
            "unsupported value: {}",
            other
        ))),
    }
}

fn parse_number(s: &str) -> BackendResult<Value> {
    if let Ok(i) = s.parse::<i64>() {
        return Ok(Value::from(i));
    }
    s.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| BackendError::UnsupportedQuery(format!("invalid number: {}", s)))
}

fn negate(value: Value) -> BackendResult<Value> {
    let number = match &value {
        Value::Number(n) => n,
        _ => {
            return Err(BackendError::UnsupportedQuery(format!(
                "cannot negate {}",
                value
            )))
        }
    };

    if let Some(i) = number.as_i64().and_then(i64::checked_neg) {
        return Ok(Value::from(i));
    }
    number
        .as_f64()
        .and_then(|f| serde_json::Number::from_f64(-f))
        .map(Value::Number)
        .ok_or_else(|| BackendError::UnsupportedQuery(format!("cannot negate {}", value)))
}
