//! Detecting trigger mutations and folding them into one UPDATE.
//!
//! BEFORE handlers may change fields the caller never asked to update.
//! [`detect_modified_fields`] finds them by comparing each record with its
//! original, and [`build_case_statements`] turns them into one
//! `CASE WHEN pk = ? THEN ? ... END` assignment per field, so every row keeps
//! its own value and the batch still costs a single statement.

use bulk_triggers_core::logging::ENGINE_TARGET;
use bulk_triggers_db::query::bulk::case_for_column;
use bulk_triggers_db::{Expression, FieldDef, Model, Value};

/// The concrete, non-pk fields whose value differs between `new` and
/// `originals`, in declaration order.
///
/// Records are compared pairwise by position. Relations compare by their
/// key column, so no related row is ever loaded.
pub fn detect_modified_fields<M: Model>(new: &[M], originals: &[M]) -> Vec<&'static str> {
    detect_modified_fields_except(new, originals, &[])
}

/// Like [`detect_modified_fields`], ignoring the fields in `excluded`.
///
/// The update path excludes fields assigned a database-side expression:
/// their in-memory value is not the value being written.
pub fn detect_modified_fields_except<M: Model>(
    new: &[M],
    originals: &[M],
    excluded: &[&str],
) -> Vec<&'static str> {
    M::meta()
        .concrete_fields()
        .filter(|field| !field.primary_key)
        .filter(|field| !excluded.iter().any(|name| field.answers_to(name)))
        .filter(|field| {
            new.iter().zip(originals).any(|(record, original)| {
                record.field_value(&field.attname) != original.field_value(&field.attname)
            })
        })
        .map(|field| field.name)
        .collect()
}

/// One CASE assignment per field in `modified` that is not already in
/// `included`, keyed by column.
///
/// Records without a primary key are left out. Fields the model does not
/// declare are skipped with a warning.
pub fn build_case_statements<M: Model>(
    instances: &[M],
    included: &[&str],
    modified: &[&str],
) -> Vec<(String, Expression)> {
    let meta = M::meta();
    let mut assignments = Vec::new();
    for name in modified {
        let Some(field) = meta.get_field(name) else {
            tracing::warn!(
                target: ENGINE_TARGET,
                model = M::table_name(),
                field = *name,
                "skipping unknown field in CASE reconciliation"
            );
            continue;
        };
        if field.primary_key || !field.is_concrete() {
            continue;
        }
        if included.iter().any(|inc| field.answers_to(inc)) {
            continue;
        }
        let rows: Vec<(Value, Expression)> = instances
            .iter()
            .filter_map(|obj| {
                let pk = obj.pk()?;
                let value = obj.field_value(&field.attname).unwrap_or(Value::Null);
                Some((pk, Expression::Value(value)))
            })
            .collect();
        if rows.is_empty() {
            continue;
        }
        assignments.push((
            field.attname.clone(),
            case_statement(M::pk_field_name(), field, rows),
        ));
    }
    assignments
}

/// The CASE expression writing `rows` into `field`.
///
/// A branch holding an expression that lacks an output type gets the
/// field's type.
pub fn case_statement(pk_column: &str, field: &FieldDef, rows: Vec<(Value, Expression)>) -> Expression {
    let rows = rows
        .into_iter()
        .map(|(pk, then)| {
            let then = if then.accepts_output_field() && then.output_field().is_none() {
                then.with_output_field(field.field_type.clone())
            } else {
                then
            };
            (pk, then)
        })
        .collect();
    case_for_column(
        pk_column,
        &field.attname,
        rows,
        Some(field.field_type.clone()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Account;
    use bulk_triggers_db::query::expressions::SubqueryExpression;
    use bulk_triggers_db::{AggregateFunc, FieldType, Q};

    #[test]
    fn test_detects_changed_fields_in_declaration_order() {
        let originals = vec![
            Account::saved(1, "a", "open", 10),
            Account::saved(2, "b", "open", 20),
        ];
        let mut new = originals.clone();
        new[1].revenue = 25;
        new[0].status = "won".into();
        assert_eq!(detect_modified_fields(&new, &originals), vec!["status", "revenue"]);
    }

    #[test]
    fn test_relations_compare_by_key_and_null_counts() {
        let originals = vec![Account::saved(1, "a", "open", 10)];
        let mut new = originals.clone();
        new[0].owner_id = Some(4);
        assert_eq!(detect_modified_fields(&new, &originals), vec!["owner"]);
    }

    #[test]
    fn test_pk_and_excluded_fields_ignored() {
        let originals = vec![Account::saved(1, "a", "open", 10)];
        let mut new = originals.clone();
        new[0].id = Some(9);
        new[0].revenue = 99;
        assert!(detect_modified_fields_except(&new, &originals, &["revenue"]).is_empty());
        assert!(detect_modified_fields(&[], &originals).is_empty());
    }

    #[test]
    fn test_case_per_row_values() {
        let records = vec![
            Account::saved(1, "a", "gold", 10),
            Account::saved(2, "b", "silver", 20),
            Account::new("unsaved", "bronze", 0),
        ];
        let assignments = build_case_statements(&records, &["revenue"], &["status", "revenue"]);
        assert_eq!(assignments.len(), 1);
        let (column, expr) = &assignments[0];
        assert_eq!(column, "status");
        match expr {
            Expression::Case {
                whens,
                output_field,
                ..
            } => {
                assert_eq!(whens.len(), 2);
                assert_eq!(whens[0].then, Expression::Value(Value::from("gold")));
                assert_eq!(whens[1].then, Expression::Value(Value::from("silver")));
                assert_eq!(output_field, &Some(FieldType::CharField));
            }
            other => panic!("expected CASE, got {other:?}"),
        }
    }

    #[test]
    fn test_relation_uses_key_column_and_unknown_skipped() {
        let mut record = Account::saved(1, "a", "open", 10);
        record.owner_id = Some(3);
        let assignments = build_case_statements(&[record], &[], &["owner", "nonexistent", "id"]);
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].0, "owner_id");
    }

    #[test]
    fn test_case_backfills_nested_output_type() {
        let field = FieldDef::new("revenue", FieldType::IntegerField);
        let subquery = SubqueryExpression::aggregate("crm_line", AggregateFunc::Sum, "amount")
            .filter(Q::outer_ref("account_id", "id"))
            .into_expression();
        let expr = case_statement("id", &field, vec![(Value::Int(1), subquery)]);
        let Expression::Case { whens, .. } = expr else {
            panic!("expected CASE");
        };
        assert_eq!(whens[0].then.output_field(), Some(&FieldType::IntegerField));
    }
}
