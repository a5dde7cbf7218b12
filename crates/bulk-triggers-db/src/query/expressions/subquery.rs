//! Builders for correlated subqueries.
//!
//! A correlated subquery filters on a column of the enclosing statement with
//! [`Lookup::OuterRef`](crate::query::lookups::Lookup::OuterRef). Inside an
//! `UPDATE`, the enclosing table is the table being updated.
//!
//! # Examples
//!
//! ```
//! use bulk_triggers_db::fields::FieldType;
//! use bulk_triggers_db::query::expressions::{AggregateFunc, Expression, SubqueryExpression};
//! use bulk_triggers_db::query::Q;
//!
//! // (SELECT SUM("amount") FROM "crm_line" WHERE "account_id" = <outer>."id")
//! let total = SubqueryExpression::aggregate("crm_line", AggregateFunc::Sum, "amount")
//!     .filter(Q::outer_ref("account_id", "id"))
//!     .output_field(FieldType::IntegerField)
//!     .into_expression();
//! assert!(total.contains_subquery());
//! ```

use super::core::{AggregateFunc, Expression};
use crate::fields::FieldType;
use crate::query::compiler::{Query, WhereNode};
use crate::query::lookups::Q;

/// Builds a scalar subquery expression.
#[derive(Debug, Clone)]
pub struct SubqueryExpression {
    query: Query,
    output_field: Option<FieldType>,
}

impl SubqueryExpression {
    /// Wraps an existing query.
    pub fn new(query: Query) -> Self {
        Self {
            query,
            output_field: None,
        }
    }

    /// `SELECT <func>("column") FROM "table"`.
    pub fn aggregate(table: &str, func: AggregateFunc, column: &str) -> Self {
        let mut query = Query::new(table);
        query.select_expression(
            Expression::aggregate(func, Expression::col(column)),
            format!("{}_{column}", func.sql_name().to_lowercase()),
        );
        Self::new(query)
    }

    /// `SELECT "column" FROM "table"`, limited to one row.
    pub fn column(table: &str, column: &str) -> Self {
        let mut query = Query::new(table);
        query.select_columns(&[column]);
        query.limit = Some(1);
        Self::new(query)
    }

    /// ANDs a filter into the inner query.
    pub fn filter(mut self, q: Q) -> Self {
        self.query.add_filter(WhereNode::from_q(&q));
        self
    }

    /// Declares the output type.
    pub fn output_field(mut self, field_type: FieldType) -> Self {
        self.output_field = Some(field_type);
        self
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn into_expression(self) -> Expression {
        Expression::Subquery {
            query: Box::new(self.query),
            output_field: self.output_field,
        }
    }
}

impl From<SubqueryExpression> for Expression {
    fn from(sub: SubqueryExpression) -> Self {
        sub.into_expression()
    }
}
