// Expressions
//
// The narrow slice of expression evaluation the pipeline needs: constants,
// parameters and field lookups, boolean conditions over them, and the
// LIMIT/OFFSET evaluation rule used by scans and the limit operators.

use serde_json::Value;

use crate::query::executor::context::Context;
use crate::query::executor::item::Item;
use crate::query::executor::result::{QueryError, QueryResult};

/// A scalar expression evaluated against the current item
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Constant(Value),
    /// `$name`
    NamedParameter(String),
    /// `$1`, `$2`, ...
    PositionalParameter(usize),
    /// Nested field path into the item's document
    Field(Vec<String>),
    /// `META().id`
    MetaId,
    /// The whole document
    SelfValue,
}

impl Expression {
    pub fn constant(value: impl Into<Value>) -> Self {
        Expression::Constant(value.into())
    }

    /// Field path from dotted notation, e.g. `address.city`
    pub fn field(path: &str) -> Self {
        Expression::Field(path.split('.').map(str::to_string).collect())
    }

    /// Evaluate the expression. `Ok(None)` stands for MISSING.
    pub fn evaluate(&self, item: Option<&Item>, context: &Context) -> QueryResult<Option<Value>> {
        match self {
            Expression::Constant(value) => Ok(Some(value.clone())),
            Expression::NamedParameter(name) => context
                .named_arg(name)
                .cloned()
                .map(Some)
                .ok_or_else(|| QueryError::Plan(format!("No value for named parameter ${}", name))),
            Expression::PositionalParameter(position) => context
                .positional_arg(*position)
                .cloned()
                .map(Some)
                .ok_or_else(|| {
                    QueryError::Plan(format!("No value for positional parameter ${}", position))
                }),
            Expression::Field(path) => Ok(item.and_then(|item| item.field(path.as_slice())).cloned()),
            Expression::MetaId => Ok(item
                .and_then(Item::key)
                .map(|key| Value::String(key.to_string()))),
            Expression::SelfValue => Ok(item.map(|item| item.value().clone())),
        }
    }
}

/// Boolean condition used by filters
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals(Expression, Expression),
    Exists(Expression),
    Not(Box<Condition>),
    And(Vec<Condition>),
}

impl Condition {
    pub fn equals(left: Expression, right: Expression) -> Self {
        Condition::Equals(left, right)
    }

    pub fn negate(self) -> Self {
        Condition::Not(Box::new(self))
    }

    /// Only a definite TRUE passes; MISSING compares unequal.
    pub fn evaluate(&self, item: Option<&Item>, context: &Context) -> QueryResult<bool> {
        match self {
            Condition::Equals(left, right) => {
                let left = left.evaluate(item, context)?;
                let right = right.evaluate(item, context)?;
                Ok(matches!((left, right), (Some(l), Some(r)) if l == r))
            }
            Condition::Exists(expr) => Ok(expr.evaluate(item, context)?.is_some()),
            Condition::Not(inner) => Ok(!inner.evaluate(item, context)?),
            Condition::And(terms) => {
                for term in terms {
                    if !term.evaluate(item, context)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }
}

/// Evaluate a LIMIT or OFFSET expression.
///
/// No expression, MISSING or a non-numeric value gives `default`; negative
/// values clamp to zero and fractions are truncated.
pub fn eval_limit_offset(
    expr: Option<&Expression>,
    parent: Option<&Item>,
    default: i64,
    context: &Context,
) -> QueryResult<i64> {
    let Some(expr) = expr else {
        return Ok(default);
    };
    let value = match expr.evaluate(parent, context)? {
        Some(Value::Number(n)) => n,
        _ => return Ok(default),
    };
    let count = match value.as_i64() {
        Some(count) => count,
        None => match value.as_f64() {
            Some(f) if f >= i64::MAX as f64 => i64::MAX,
            Some(f) => f as i64,
            None => default,
        },
    };
    Ok(count.max(0))
}
