//! SQL query AST and compiler.
//!
//! [`Query`] describes a SELECT; [`SqlCompiler`] turns it, and the UPDATE,
//! INSERT and DELETE statements the bulk layer issues, into parameterized SQL.
//! PostgreSQL gets `$1, $2, ...` placeholders and SQLite/MySQL get `?`.
//!
//! One parameter list is threaded through a whole statement, so placeholder
//! numbering stays correct across nested subqueries. A subquery is compiled
//! with the enclosing statement's table as its outer scope, which is what
//! [`Lookup::OuterRef`] and [`Expression::OuterRef`] resolve against.

use super::expressions::Expression;
use super::lookups::{Lookup, Q};
use crate::fields::FieldType;
use crate::value::Value;

/// The type of database backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackendType {
    /// PostgreSQL (`$1, $2, ...` placeholders).
    PostgreSQL,
    /// SQLite (`?` placeholders).
    SQLite,
    /// MySQL (`?` placeholders).
    MySQL,
}

/// What an INSERT does when a row hits a unique constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OnConflict {
    /// Fail the statement.
    #[default]
    Error,
    /// Skip the conflicting row.
    Ignore,
    /// Overwrite `update` columns of the row that already holds the
    /// `unique` columns.
    Update {
        unique: Vec<String>,
        update: Vec<String>,
    },
}

/// A column ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

/// A selected column.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectColumn {
    /// A column name, optionally `table.column`.
    Column(String),
    /// An expression with an alias.
    Expression(Expression, String),
    /// All columns.
    Star,
}

/// A WHERE clause node.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereNode {
    Condition { column: String, lookup: Lookup },
    And(Vec<WhereNode>),
    Or(Vec<WhereNode>),
    Not(Box<WhereNode>),
}

impl WhereNode {
    /// Converts a `Q` filter.
    pub fn from_q(q: &Q) -> Self {
        match q {
            Q::Filter { field, lookup } => Self::Condition {
                column: field.clone(),
                lookup: lookup.clone(),
            },
            Q::And(children) => Self::And(children.iter().map(Self::from_q).collect()),
            Q::Or(children) => Self::Or(children.iter().map(Self::from_q).collect()),
            Q::Not(inner) => Self::Not(Box::new(Self::from_q(inner))),
        }
    }

    /// `column IN (values)`
    pub fn column_in(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self::Condition {
            column: column.into(),
            lookup: Lookup::In(values),
        }
    }
}

/// An `INNER JOIN table ON left = right` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub table: String,
    /// Qualified column on the already-joined side.
    pub left: String,
    /// Qualified column on the joined table.
    pub right: String,
}

/// A SELECT statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub select: Vec<SelectColumn>,
    pub joins: Vec<Join>,
    pub where_clause: Option<WhereNode>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub distinct: bool,
}

impl Query {
    /// Creates `SELECT * FROM table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            select: vec![SelectColumn::Star],
            joins: Vec::new(),
            where_clause: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            distinct: false,
        }
    }

    /// Replaces the select list with plain columns.
    pub fn select_columns(&mut self, columns: &[&str]) {
        self.select = columns
            .iter()
            .map(|c| SelectColumn::Column((*c).to_string()))
            .collect();
    }

    /// Replaces the select list with a single aliased expression.
    pub fn select_expression(&mut self, expr: Expression, alias: impl Into<String>) {
        self.select = vec![SelectColumn::Expression(expr, alias.into())];
    }

    /// ANDs a condition into the WHERE clause.
    pub fn add_filter(&mut self, node: WhereNode) {
        self.where_clause = Some(match self.where_clause.take() {
            None => node,
            Some(WhereNode::And(mut children)) => {
                children.push(node);
                WhereNode::And(children)
            }
            Some(existing) => WhereNode::And(vec![existing, node]),
        });
    }

    /// Returns `true` when the select list is exactly one column or expression.
    pub fn selects_single_value(&self) -> bool {
        matches!(
            self.select.as_slice(),
            [SelectColumn::Column(_) | SelectColumn::Expression(..)]
        )
    }
}

/// Translates query ASTs into parameterized SQL.
pub struct SqlCompiler {
    backend: DatabaseBackendType,
}

impl SqlCompiler {
    pub const fn new(backend: DatabaseBackendType) -> Self {
        Self { backend }
    }

    pub const fn backend(&self) -> DatabaseBackendType {
        self.backend
    }

    fn placeholder(&self, index: usize) -> String {
        match self.backend {
            DatabaseBackendType::PostgreSQL => format!("${index}"),
            DatabaseBackendType::SQLite | DatabaseBackendType::MySQL => "?".to_string(),
        }
    }

    fn push_param(&self, value: &Value, params: &mut Vec<Value>) -> String {
        params.push(value.clone());
        self.placeholder(params.len())
    }

    /// The SQL type a typed expression is cast to on this backend.
    pub fn cast_type(&self, field_type: &FieldType) -> Option<&'static str> {
        match self.backend {
            DatabaseBackendType::SQLite => field_type.cast_type(),
            DatabaseBackendType::PostgreSQL => match field_type {
                FieldType::BigAutoField
                | FieldType::BigIntegerField
                | FieldType::ForeignKey { .. }
                | FieldType::OneToOneField { .. } => Some("BIGINT"),
                FieldType::BooleanField => Some("BOOLEAN"),
                FieldType::FloatField => Some("DOUBLE PRECISION"),
                FieldType::DateField => Some("DATE"),
                FieldType::DateTimeField => Some("TIMESTAMP WITH TIME ZONE"),
                FieldType::TimeField => Some("TIME"),
                FieldType::UuidField => Some("UUID"),
                FieldType::JsonField => Some("JSONB"),
                other => other.cast_type(),
            },
            DatabaseBackendType::MySQL => match field_type {
                FieldType::FloatField => Some("DOUBLE"),
                FieldType::DecimalField { .. } => Some("DECIMAL"),
                FieldType::CharField | FieldType::TextField | FieldType::UuidField => {
                    Some("CHAR")
                }
                FieldType::DateField => Some("DATE"),
                FieldType::DateTimeField => Some("DATETIME"),
                FieldType::TimeField => Some("TIME"),
                FieldType::JsonField | FieldType::ManyToManyField { .. } => None,
                _ => Some("SIGNED"),
            },
        }
    }

    /// Compiles a SELECT.
    pub fn compile_select(&self, query: &Query) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = self.select_into(query, &mut params, None);
        (sql, params)
    }

    /// Compiles a SELECT whose outer references resolve against `outer_table`.
    pub fn compile_select_correlated(
        &self,
        query: &Query,
        outer_table: &str,
    ) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let sql = self.select_into(query, &mut params, Some(outer_table));
        (sql, params)
    }

    /// Compiles `SELECT COUNT(*) AS "count"` over the query's FROM and WHERE.
    pub fn compile_count(&self, query: &Query) -> (String, Vec<Value>) {
        let mut counting = query.clone();
        counting.select_expression(Expression::raw("COUNT(*)", vec![]), "count");
        counting.order_by.clear();
        counting.limit = None;
        counting.offset = None;
        self.compile_select(&counting)
    }

    fn select_into(&self, query: &Query, params: &mut Vec<Value>, outer: Option<&str>) -> String {
        let mut sql = String::from("SELECT ");
        if query.distinct {
            sql.push_str("DISTINCT ");
        }

        let columns: Vec<String> = if query.select.is_empty() {
            vec!["*".to_string()]
        } else {
            query
                .select
                .iter()
                .map(|col| match col {
                    SelectColumn::Column(name) => quote(name),
                    SelectColumn::Expression(expr, alias) => {
                        let expr_sql = self.expr_into(expr, params, &query.table, outer);
                        format!("{expr_sql} AS \"{alias}\"")
                    }
                    SelectColumn::Star if query.joins.is_empty() => "*".to_string(),
                    SelectColumn::Star => {
                        let mut tables = vec![format!("\"{}\".*", query.table)];
                        tables.extend(query.joins.iter().map(|j| format!("\"{}\".*", j.table)));
                        tables.join(", ")
                    }
                })
                .collect()
        };
        sql.push_str(&columns.join(", "));
        sql.push_str(&format!(" FROM \"{}\"", query.table));

        for join in &query.joins {
            sql.push_str(&format!(
                " INNER JOIN \"{}\" ON {} = {}",
                join.table,
                quote(&join.left),
                quote(&join.right)
            ));
        }

        if let Some(ref where_clause) = query.where_clause {
            sql.push_str(" WHERE ");
            self.where_into(where_clause, &mut sql, params, outer);
        }

        if !query.order_by.is_empty() {
            let orders: Vec<String> = query
                .order_by
                .iter()
                .map(|o| {
                    let dir = if o.descending { "DESC" } else { "ASC" };
                    format!("{} {dir}", quote(&o.column))
                })
                .collect();
            sql.push_str(&format!(" ORDER BY {}", orders.join(", ")));
        }

        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = query.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        sql
    }

    /// Compiles a multi-row INSERT.
    ///
    /// With no columns this is `INSERT ... DEFAULT VALUES`, which inserts one
    /// row. `returning` appends `RETURNING "column"`.
    pub fn compile_insert(
        &self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<Value>],
        on_conflict: &OnConflict,
        returning: Option<&str>,
    ) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mysql = self.backend == DatabaseBackendType::MySQL;
        let verb = if mysql && *on_conflict == OnConflict::Ignore {
            "INSERT IGNORE INTO"
        } else {
            "INSERT INTO"
        };

        let mut sql = if columns.is_empty() {
            format!("{verb} \"{table}\" DEFAULT VALUES")
        } else {
            let cols: Vec<String> = columns.iter().map(|c| format!("\"{c}\"")).collect();
            let tuples: Vec<String> = rows
                .iter()
                .map(|row| {
                    let phs: Vec<String> =
                        row.iter().map(|v| self.push_param(v, &mut params)).collect();
                    format!("({})", phs.join(", "))
                })
                .collect();
            format!(
                "{verb} \"{table}\" ({}) VALUES {}",
                cols.join(", "),
                tuples.join(", ")
            )
        };

        match on_conflict {
            OnConflict::Error => {}
            OnConflict::Ignore if !mysql => sql.push_str(" ON CONFLICT DO NOTHING"),
            OnConflict::Ignore => {}
            OnConflict::Update { update, .. } if mysql => {
                let sets: Vec<String> = update
                    .iter()
                    .map(|c| format!("{} = VALUES({})", quote(c), quote(c)))
                    .collect();
                sql.push_str(&format!(" ON DUPLICATE KEY UPDATE {}", sets.join(", ")));
            }
            OnConflict::Update { unique, update } => {
                let targets: Vec<String> = unique.iter().map(|c| quote(c)).collect();
                let sets: Vec<String> = update
                    .iter()
                    .map(|c| format!("{} = EXCLUDED.{}", quote(c), quote(c)))
                    .collect();
                sql.push_str(&format!(
                    " ON CONFLICT ({}) DO UPDATE SET {}",
                    targets.join(", "),
                    sets.join(", ")
                ));
            }
        }
        if let Some(column) = returning {
            sql.push_str(&format!(" RETURNING \"{column}\""));
        }

        (sql, params)
    }

    /// Compiles `UPDATE table SET col = expr, ... WHERE ...`.
    pub fn compile_update(
        &self,
        table: &str,
        assignments: &[(String, Expression)],
        where_clause: &WhereNode,
    ) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let set_parts: Vec<String> = assignments
            .iter()
            .map(|(column, expr)| {
                let value_sql = self.expr_into(expr, &mut params, table, None);
                format!("\"{column}\" = {value_sql}")
            })
            .collect();

        let mut sql = format!("UPDATE \"{table}\" SET {} WHERE ", set_parts.join(", "));
        self.where_into(where_clause, &mut sql, &mut params, None);
        (sql, params)
    }

    /// Compiles `DELETE FROM table WHERE ...`.
    pub fn compile_delete(&self, table: &str, where_clause: &WhereNode) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM \"{table}\" WHERE ");
        self.where_into(where_clause, &mut sql, &mut params, None);
        (sql, params)
    }

    fn where_into(
        &self,
        node: &WhereNode,
        sql: &mut String,
        params: &mut Vec<Value>,
        outer: Option<&str>,
    ) {
        match node {
            WhereNode::Condition { column, lookup } => {
                self.lookup_into(column, lookup, sql, params, outer);
            }
            WhereNode::And(children) | WhereNode::Or(children) if children.is_empty() => {
                sql.push_str(if matches!(node, WhereNode::And(_)) {
                    "1=1"
                } else {
                    "1=0"
                });
            }
            WhereNode::And(children) | WhereNode::Or(children) => {
                let joiner = if matches!(node, WhereNode::And(_)) {
                    " AND "
                } else {
                    " OR "
                };
                sql.push('(');
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(joiner);
                    }
                    self.where_into(child, sql, params, outer);
                }
                sql.push(')');
            }
            WhereNode::Not(inner) => {
                sql.push_str("NOT (");
                self.where_into(inner, sql, params, outer);
                sql.push(')');
            }
        }
    }

    fn lookup_into(
        &self,
        column: &str,
        lookup: &Lookup,
        sql: &mut String,
        params: &mut Vec<Value>,
        outer: Option<&str>,
    ) {
        let col = quote(column);
        let fragment = match lookup {
            Lookup::Exact(Value::Null) | Lookup::IsNull(true) => format!("{col} IS NULL"),
            Lookup::IsNull(false) => format!("{col} IS NOT NULL"),
            Lookup::Exact(val) => format!("{col} = {}", self.push_param(val, params)),
            Lookup::IExact(val) => {
                format!("LOWER({col}) = LOWER({})", self.push_param(val, params))
            }
            Lookup::Contains(val) => {
                let ph = self.push_param(&Value::String(format!("%{val}%")), params);
                format!("{col} LIKE {ph}")
            }
            Lookup::In(vals) if vals.is_empty() => "1=0".to_string(),
            Lookup::In(vals) => {
                let phs: Vec<String> = vals.iter().map(|v| self.push_param(v, params)).collect();
                format!("{col} IN ({})", phs.join(", "))
            }
            Lookup::Gt(val) => format!("{col} > {}", self.push_param(val, params)),
            Lookup::Gte(val) => format!("{col} >= {}", self.push_param(val, params)),
            Lookup::Lt(val) => format!("{col} < {}", self.push_param(val, params)),
            Lookup::Lte(val) => format!("{col} <= {}", self.push_param(val, params)),
            Lookup::Range(low, high) => {
                let low = self.push_param(low, params);
                let high = self.push_param(high, params);
                format!("{col} BETWEEN {low} AND {high}")
            }
            Lookup::OuterRef(outer_col) => {
                format!("{col} = {}", outer_column(outer, outer_col))
            }
        };
        sql.push_str(&fragment);
    }

    /// Compiles an expression. `here` is the table of the statement that
    /// directly contains it; `outer` is that statement's enclosing table.
    fn expr_into(
        &self,
        expr: &Expression,
        params: &mut Vec<Value>,
        here: &str,
        outer: Option<&str>,
    ) -> String {
        match expr {
            Expression::Col(name) | Expression::F(name) => quote(name),
            Expression::Value(val) => self.push_param(val, params),
            Expression::OuterRef(name) => outer_column(outer, name),
            Expression::Func { name, args, .. } => {
                let parts: Vec<String> = args
                    .iter()
                    .map(|a| self.expr_into(a, params, here, outer))
                    .collect();
                format!("{name}({})", parts.join(", "))
            }
            Expression::Aggregate {
                func,
                field,
                distinct,
            } => {
                let field_sql = self.expr_into(field, params, here, outer);
                let distinct = if *distinct { "DISTINCT " } else { "" };
                format!("{}({distinct}{field_sql})", func.sql_name())
            }
            Expression::Case {
                whens,
                default,
                output_field,
            } => {
                let mut sql = "CASE".to_string();
                for when in whens {
                    sql.push_str(" WHEN ");
                    self.where_into(&WhereNode::from_q(&when.condition), &mut sql, params, outer);
                    sql.push_str(" THEN ");
                    sql.push_str(&self.expr_into(&when.then, params, here, outer));
                }
                if let Some(default) = default {
                    sql.push_str(" ELSE ");
                    sql.push_str(&self.expr_into(default, params, here, outer));
                }
                sql.push_str(" END");
                match output_field {
                    Some(ft) if self.backend == DatabaseBackendType::PostgreSQL => {
                        self.cast(sql, ft)
                    }
                    _ => sql,
                }
            }
            Expression::Subquery {
                query,
                output_field,
            } => {
                let sub = format!("({})", self.select_into(query, params, Some(here)));
                match output_field {
                    Some(ft) => self.cast(sub, ft),
                    None => sub,
                }
            }
            Expression::RawSQL(raw, raw_params) => {
                params.extend(raw_params.iter().cloned());
                raw.clone()
            }
            Expression::Add(l, r) => self.binary(l, "+", r, params, here, outer),
            Expression::Sub(l, r) => self.binary(l, "-", r, params, here, outer),
            Expression::Mul(l, r) => self.binary(l, "*", r, params, here, outer),
            Expression::Div(l, r) => self.binary(l, "/", r, params, here, outer),
        }
    }

    fn binary(
        &self,
        left: &Expression,
        op: &str,
        right: &Expression,
        params: &mut Vec<Value>,
        here: &str,
        outer: Option<&str>,
    ) -> String {
        let l = self.expr_into(left, params, here, outer);
        let r = self.expr_into(right, params, here, outer);
        format!("({l} {op} {r})")
    }

    fn cast(&self, sql: String, field_type: &FieldType) -> String {
        match self.cast_type(field_type) {
            Some(ty) => format!("CAST({sql} AS {ty})"),
            None => sql,
        }
    }
}

/// Quotes an identifier, qualifying `table.column` when present.
fn quote(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{part}\""))
        .collect::<Vec<_>>()
        .join(".")
}

fn outer_column(outer: Option<&str>, column: &str) -> String {
    match outer {
        Some(table) => format!("\"{table}\".\"{column}\""),
        None => quote(column),
    }
}
