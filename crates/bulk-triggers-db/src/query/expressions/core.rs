//! Query expressions: columns, literals, functions, aggregates, CASE and
//! arithmetic.
//!
//! Expressions that produce a computed value can carry a declared output
//! type (`output_field`). The compiler casts typed subqueries to that type.
//!
//! # Examples
//!
//! ```
//! use bulk_triggers_db::query::expressions::{AggregateFunc, Expression, ExpressionKind};
//!
//! let raised = Expression::f("revenue") * Expression::value(2);
//! assert_eq!(raised.kind(), ExpressionKind::Other);
//!
//! let total = Expression::aggregate(AggregateFunc::Sum, Expression::col("amount"));
//! assert!(!total.contains_subquery());
//! ```

use std::ops;

use crate::fields::FieldType;
use crate::query::compiler::Query;
use crate::query::lookups::Q;
use crate::value::Value;

/// A query expression that produces a value in SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A column reference.
    Col(String),
    /// A literal value, sent as a parameter.
    Value(Value),
    /// A reference to another field of the same row.
    F(String),
    /// A reference to a column of the enclosing query.
    OuterRef(String),
    /// A database function call.
    Func {
        name: String,
        args: Vec<Expression>,
        output_field: Option<FieldType>,
    },
    /// An aggregate function.
    Aggregate {
        func: AggregateFunc,
        field: Box<Expression>,
        distinct: bool,
    },
    /// `CASE WHEN ... THEN ... ELSE ... END`.
    Case {
        whens: Vec<When>,
        default: Option<Box<Expression>>,
        output_field: Option<FieldType>,
    },
    /// A scalar subquery.
    Subquery {
        query: Box<Query>,
        output_field: Option<FieldType>,
    },
    /// Raw SQL with parameters.
    RawSQL(String, Vec<Value>),
    Add(Box<Expression>, Box<Expression>),
    Sub(Box<Expression>, Box<Expression>),
    Mul(Box<Expression>, Box<Expression>),
    Div(Box<Expression>, Box<Expression>),
}

/// Coarse classification used by the bulk engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionKind {
    /// A scalar subquery.
    Subquery,
    /// A conditional CASE expression.
    Case,
    /// Anything else.
    Other,
}

/// Aggregate function types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunc {
    /// Returns the SQL function name.
    pub const fn sql_name(&self) -> &'static str {
        match self {
            Self::Count => "COUNT",
            Self::Sum => "SUM",
            Self::Avg => "AVG",
            Self::Min => "MIN",
            Self::Max => "MAX",
        }
    }
}

/// One `WHEN condition THEN result` branch of a CASE expression.
#[derive(Debug, Clone, PartialEq)]
pub struct When {
    pub condition: Q,
    pub then: Expression,
}

impl When {
    pub fn new(condition: Q, then: Expression) -> Self {
        Self { condition, then }
    }
}

impl Expression {
    pub fn col(name: impl Into<String>) -> Self {
        Self::Col(name.into())
    }

    pub fn f(name: impl Into<String>) -> Self {
        Self::F(name.into())
    }

    pub fn value(v: impl Into<Value>) -> Self {
        Self::Value(v.into())
    }

    pub fn outer_ref(name: impl Into<String>) -> Self {
        Self::OuterRef(name.into())
    }

    pub fn func(name: impl Into<String>, args: Vec<Self>) -> Self {
        Self::Func {
            name: name.into(),
            args,
            output_field: None,
        }
    }

    pub fn aggregate(func: AggregateFunc, field: Self) -> Self {
        Self::Aggregate {
            func,
            field: Box::new(field),
            distinct: false,
        }
    }

    pub fn case(whens: Vec<When>, default: Option<Self>) -> Self {
        Self::Case {
            whens,
            default: default.map(Box::new),
            output_field: None,
        }
    }

    /// Wraps a query as a scalar subquery.
    pub fn subquery(query: Query) -> Self {
        Self::Subquery {
            query: Box::new(query),
            output_field: None,
        }
    }

    pub fn raw(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self::RawSQL(sql.into(), params)
    }

    /// The declared output type, if any.
    pub const fn output_field(&self) -> Option<&FieldType> {
        match self {
            Self::Func { output_field, .. }
            | Self::Case { output_field, .. }
            | Self::Subquery { output_field, .. } => output_field.as_ref(),
            _ => None,
        }
    }

    /// Returns `true` for expressions that can carry a declared output type.
    pub const fn accepts_output_field(&self) -> bool {
        matches!(
            self,
            Self::Func { .. } | Self::Case { .. } | Self::Subquery { .. }
        )
    }

    /// Sets the declared output type. A no-op for expressions that cannot
    /// carry one.
    pub fn with_output_field(mut self, field_type: FieldType) -> Self {
        match &mut self {
            Self::Func { output_field, .. }
            | Self::Case { output_field, .. }
            | Self::Subquery { output_field, .. } => *output_field = Some(field_type),
            _ => {}
        }
        self
    }

    pub const fn kind(&self) -> ExpressionKind {
        match self {
            Self::Subquery { .. } => ExpressionKind::Subquery,
            Self::Case { .. } => ExpressionKind::Case,
            _ => ExpressionKind::Other,
        }
    }

    /// Returns `true` when this expression is, or contains, a subquery.
    pub fn contains_subquery(&self) -> bool {
        match self {
            Self::Subquery { .. } => true,
            Self::Case { whens, default, .. } => {
                whens.iter().any(|w| w.then.contains_subquery())
                    || default.as_ref().is_some_and(|d| d.contains_subquery())
            }
            Self::Func { args, .. } => args.iter().any(Self::contains_subquery),
            Self::Aggregate { field, .. } => field.contains_subquery(),
            Self::Add(l, r) | Self::Sub(l, r) | Self::Mul(l, r) | Self::Div(l, r) => {
                l.contains_subquery() || r.contains_subquery()
            }
            _ => false,
        }
    }

    /// Renames every column reference `from` to `to`, including the
    /// conditions of CASE branches.
    pub fn rename_column(&mut self, from: &str, to: &str) {
        match self {
            Self::Col(name) | Self::F(name) => {
                if name == from {
                    *name = to.to_string();
                }
            }
            Self::Func { args, .. } => {
                for arg in args {
                    arg.rename_column(from, to);
                }
            }
            Self::Aggregate { field, .. } => field.rename_column(from, to),
            Self::Case { whens, default, .. } => {
                for when in whens {
                    when.condition.rename_field(from, to);
                    when.then.rename_column(from, to);
                }
                if let Some(default) = default {
                    default.rename_column(from, to);
                }
            }
            Self::Add(l, r) | Self::Sub(l, r) | Self::Mul(l, r) | Self::Div(l, r) => {
                l.rename_column(from, to);
                r.rename_column(from, to);
            }
            Self::Value(_) | Self::OuterRef(_) | Self::Subquery { .. } | Self::RawSQL(..) => {}
        }
    }
}

impl From<Value> for Expression {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

macro_rules! arithmetic {
    ($($trait:ident :: $method:ident => $variant:ident),* $(,)?) => {
        $(
            impl ops::$trait for Expression {
                type Output = Self;

                fn $method(self, rhs: Self) -> Self::Output {
                    Self::$variant(Box::new(self), Box::new(rhs))
                }
            }
        )*
    };
}

arithmetic! {
    Add::add => Add,
    Sub::sub => Sub,
    Mul::mul => Mul,
    Div::div => Div,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sum_subquery() -> Expression {
        let mut q = Query::new("crm_line");
        q.select_expression(
            Expression::aggregate(AggregateFunc::Sum, Expression::col("amount")),
            "total",
        );
        Expression::subquery(q)
    }

    #[test]
    fn test_kind() {
        assert_eq!(sum_subquery().kind(), ExpressionKind::Subquery);
        assert_eq!(
            Expression::case(vec![], None).kind(),
            ExpressionKind::Case
        );
        assert_eq!(Expression::f("x").kind(), ExpressionKind::Other);
    }

    #[test]
    fn test_with_output_field() {
        let e = sum_subquery().with_output_field(FieldType::IntegerField);
        assert_eq!(e.output_field(), Some(&FieldType::IntegerField));
        let plain = Expression::value(1).with_output_field(FieldType::IntegerField);
        assert_eq!(plain.output_field(), None);
        assert!(!plain.accepts_output_field());
    }

    #[test]
    fn test_contains_subquery_nested() {
        let case = Expression::case(
            vec![When::new(Q::exact("id", 1), sum_subquery())],
            None,
        );
        assert!(case.contains_subquery());
        let sum = Expression::f("a") + sum_subquery();
        assert!(sum.contains_subquery());
        assert!(!(Expression::f("a") + Expression::value(1)).contains_subquery());
    }

    #[test]
    fn test_arithmetic_operators() {
        let e = Expression::f("a") - Expression::value(2);
        assert!(matches!(e, Expression::Sub(_, _)));
        let e = Expression::f("a") / Expression::value(2);
        assert!(matches!(e, Expression::Div(_, _)));
    }

    #[test]
    fn test_rename_column_in_case() {
        let mut e = Expression::case(
            vec![When::new(
                Q::exact("place_ptr_id", 1),
                Expression::value("x"),
            )],
            Some(Expression::col("place_ptr_id")),
        );
        e.rename_column("place_ptr_id", "id");
        assert_eq!(
            e,
            Expression::case(
                vec![When::new(Q::exact("id", 1), Expression::value("x"))],
                Some(Expression::col("id")),
            )
        );
    }
}
