//! Keeping SQL expressions away from handlers.
//!
//! Update assignments arrive as [`UpdateValue`]s: either a concrete value,
//! which can be applied to the in-memory records before BEFORE handlers run,
//! or an [`Expression`] the database computes. Expressions are never written
//! onto a record. Subqueries get special treatment: their value only exists
//! after the write, so the update path refreshes the affected rows from the
//! database before handlers see them.

use bulk_triggers_core::logging::ENGINE_TARGET;
use bulk_triggers_core::{TriggerError, TriggerResult};
use bulk_triggers_db::query::fetch_by_pks;
use bulk_triggers_db::{
    DbExecutor, Expression, ExpressionKind, FieldDef, Model, Record, SubqueryExpression, Value,
};

/// The right-hand side of an update assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateValue {
    Concrete(Value),
    Expression(Expression),
}

impl UpdateValue {
    pub const fn is_expression(&self) -> bool {
        matches!(self, Self::Expression(_))
    }

    /// Whether the database must run a subquery to produce this value.
    pub fn is_subquery(&self) -> bool {
        match self {
            Self::Concrete(_) => false,
            Self::Expression(expr) => expr.contains_subquery(),
        }
    }

    pub const fn kind(&self) -> Option<ExpressionKind> {
        match self {
            Self::Concrete(_) => None,
            Self::Expression(expr) => Some(expr.kind()),
        }
    }

    /// The value a record may hold before the write. Literal expressions
    /// unwrap to their value; anything else computed in SQL has none.
    pub fn in_memory_value(&self) -> Option<Value> {
        match self {
            Self::Concrete(value) | Self::Expression(Expression::Value(value)) => Some(value.clone()),
            Self::Expression(_) => None,
        }
    }

    pub fn into_expression(self) -> Expression {
        match self {
            Self::Concrete(value) => Expression::Value(value),
            Self::Expression(expr) => expr,
        }
    }
}

impl From<Value> for UpdateValue {
    fn from(value: Value) -> Self {
        Self::Concrete(value)
    }
}

impl From<Expression> for UpdateValue {
    fn from(expr: Expression) -> Self {
        Self::Expression(expr)
    }
}

impl From<SubqueryExpression> for UpdateValue {
    fn from(sub: SubqueryExpression) -> Self {
        Self::Expression(sub.into_expression())
    }
}

macro_rules! concrete_from {
    ($($t:ty),*) => {
        $(
            impl From<$t> for UpdateValue {
                fn from(value: $t) -> Self {
                    Self::Concrete(Value::from(value))
                }
            }
        )*
    };
}

concrete_from!(bool, i32, i64, f64, String, &str);

/// Whether any assignment needs a subquery.
pub fn has_subquery(assignments: &[(String, UpdateValue)]) -> bool {
    assignments.iter().any(|(_, value)| value.is_subquery())
}

/// Gives `expr`, and every branch of a CASE inside it, the type of `field`
/// where it has none.
///
/// # Errors
///
/// Returns `OutputFieldUnresolved` when an expression needs a type and
/// `field` has no scalar cast.
pub fn complete_output_field(expr: Expression, field: &FieldDef) -> TriggerResult<Expression> {
    let expr = match expr {
        Expression::Case {
            whens,
            default,
            output_field,
        } => {
            let whens = whens
                .into_iter()
                .map(|mut when| {
                    when.then = complete_output_field(when.then, field)?;
                    Ok(when)
                })
                .collect::<TriggerResult<Vec<_>>>()?;
            let default = default
                .map(|d| complete_output_field(*d, field).map(Box::new))
                .transpose()?;
            Expression::Case {
                whens,
                default,
                output_field,
            }
        }
        other => other,
    };
    if !expr.accepts_output_field() || expr.output_field().is_some() {
        return Ok(expr);
    }
    if field.field_type.cast_type().is_none() {
        return Err(unresolved(field.name, &expr));
    }
    Ok(expr.with_output_field(field.field_type.clone()))
}

fn unresolved(field: &str, expr: &Expression) -> TriggerError {
    TriggerError::OutputFieldUnresolved {
        field: field.to_string(),
        expression: format!("{expr:?}"),
    }
}

/// Completes the output type of every assignment for model `M`.
///
/// # Errors
///
/// Returns `OutputFieldUnresolved` for an expression assigned to a field
/// `M` does not declare, or whose type cannot be inferred.
pub fn complete_output_fields<M: Model>(
    assignments: Vec<(String, Expression)>,
) -> TriggerResult<Vec<(String, Expression)>> {
    let meta = M::meta();
    assignments
        .into_iter()
        .map(|(column, expr)| match meta.get_field(&column) {
            Some(field) => Ok((column, complete_output_field(expr, field)?)),
            None if matches!(expr, Expression::Value(_)) => Ok((column, expr)),
            None => Err(unresolved(&column, &expr)),
        })
        .collect()
}

/// Reloads every non-pk concrete field of `instances` from the database.
///
/// Returns a snapshot of each instance taken before the refresh, aligned by
/// position. An instance whose row is gone, or a value that does not fit
/// its field, is left as it was and logged.
///
/// # Errors
///
/// Returns database errors from the reload query.
pub async fn refresh_from_db<M: Model>(
    db: &dyn DbExecutor,
    instances: &mut [M],
) -> TriggerResult<Vec<M>> {
    let snapshots = instances.to_vec();
    let pks: Vec<Value> = instances.iter().filter_map(Model::pk).collect();
    let mut fresh = fetch_by_pks::<M>(db, &pks).await?;
    let fields: Vec<&FieldDef> = M::meta()
        .concrete_fields()
        .filter(|f| !f.primary_key)
        .collect();

    for instance in instances.iter_mut() {
        let Some(pk) = instance.pk() else {
            continue;
        };
        let Some(row) = fresh.remove(&pk.key()) else {
            tracing::warn!(target: ENGINE_TARGET, model = M::table_name(), pk = %pk, "row vanished before refresh");
            continue;
        };
        for field in &fields {
            let value = row.field_value(&field.attname).unwrap_or(Value::Null);
            if let Err(err) = instance.set_field_value(&field.attname, value) {
                tracing::warn!(
                    target: ENGINE_TARGET,
                    model = M::table_name(),
                    field = field.name,
                    error = %err,
                    "refreshed value not applied"
                );
            }
        }
    }
    Ok(snapshots)
}

/// Checks that every record belongs to `M`.
///
/// # Errors
///
/// Returns `TypeError` naming the first foreign record's model.
pub fn validate_records<M: Model>(operation: &str, records: &[&dyn Record]) -> TriggerResult<()> {
    match records.iter().find(|r| r.model_name() != M::table_name()) {
        Some(other) => Err(TriggerError::TypeError(format!(
            "{operation} expected instances of {}, got {}",
            M::meta().model_name,
            other.model_name()
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{schema_db, Account};
    use bulk_triggers_db::{bulk_create, AggregateFunc, BulkCreateOptions, FieldType, Q, RelatedRecord, When};

    fn revenue_subquery() -> Expression {
        SubqueryExpression::aggregate("crm_line", AggregateFunc::Sum, "amount")
            .filter(Q::outer_ref("account_id", "id"))
            .into_expression()
    }

    #[test]
    fn test_detection() {
        let plain = UpdateValue::from(5);
        let literal = UpdateValue::from(Expression::value("x"));
        let column = UpdateValue::from(Expression::f("revenue"));
        let sub = UpdateValue::from(revenue_subquery());
        let nested = UpdateValue::from(Expression::case(
            vec![When::new(Q::exact("status", "won"), revenue_subquery())],
            None,
        ));

        assert!(!plain.is_expression());
        assert_eq!(plain.in_memory_value(), Some(Value::Int(5)));
        assert_eq!(literal.in_memory_value(), Some(Value::from("x")));
        assert_eq!(column.in_memory_value(), None);
        assert_eq!(sub.kind(), Some(ExpressionKind::Subquery));
        assert!(sub.is_subquery());
        assert!(nested.is_subquery());
        assert_eq!(nested.kind(), Some(ExpressionKind::Case));
        assert!(!column.is_subquery());
        assert!(has_subquery(&[("revenue".into(), nested)]));
    }

    #[test]
    fn test_completes_nested_case() {
        let field = FieldDef::new("revenue", FieldType::IntegerField);
        let expr = Expression::case(
            vec![When::new(Q::exact("status", "won"), revenue_subquery())],
            Some(Expression::value(0)),
        );
        let Expression::Case {
            whens,
            output_field,
            ..
        } = complete_output_field(expr, &field).unwrap()
        else {
            panic!("expected CASE");
        };
        assert_eq!(output_field, Some(FieldType::IntegerField));
        assert_eq!(whens[0].then.output_field(), Some(&FieldType::IntegerField));
    }

    #[test]
    fn test_declared_type_is_kept() {
        let field = FieldDef::new("revenue", FieldType::IntegerField);
        let expr = revenue_subquery().with_output_field(FieldType::FloatField);
        let done = complete_output_field(expr, &field).unwrap();
        assert_eq!(done.output_field(), Some(&FieldType::FloatField));
    }

    #[test]
    fn test_unresolvable_type_fails() {
        let field = FieldDef::new("payload", FieldType::JsonField);
        let err = complete_output_field(revenue_subquery(), &field).unwrap_err();
        assert!(matches!(err, TriggerError::OutputFieldUnresolved { ref field, .. } if field == "payload"));

        let err = complete_output_fields::<Account>(vec![("ghost".into(), revenue_subquery())])
            .unwrap_err();
        assert!(err.to_string().starts_with("Cannot resolve output field for 'ghost'"));
    }

    #[test]
    fn test_validate_records() {
        let account = Account::saved(1, "a", "open", 1);
        let foreign = RelatedRecord::new("crm_line", vec![]);
        assert!(validate_records::<Account>("bulk_update", &[&account]).is_ok());
        let err = validate_records::<Account>("bulk_update", &[&account, &foreign]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "TypeError: bulk_update expected instances of Account, got crm_line"
        );
    }

    #[tokio::test]
    async fn test_refresh_copies_values_and_snapshots() {
        let db = schema_db().await;
        let mut stored = vec![Account::new("a", "open", 10), Account::new("b", "open", 20)];
        bulk_create(db.as_ref(), &mut stored, &BulkCreateOptions::default())
            .await
            .unwrap();
        db.execute_sql("UPDATE crm_account SET revenue = revenue * 2", &[])
            .await
            .unwrap();

        let mut instances = stored.clone();
        instances.push(Account::saved(99, "ghost", "open", 7));
        let snapshots = refresh_from_db(db.as_ref(), &mut instances).await.unwrap();

        assert_eq!(snapshots[0].revenue, 10);
        assert_eq!(instances[0].revenue, 20);
        assert_eq!(instances[1].revenue, 40);
        assert_eq!(instances[2].revenue, 7);
    }
}
