//! Minimal SELECT syntax tree with a single render step
//!
//! Values never appear in the rendered text: every literal becomes a `$n`
//! placeholder and is returned alongside the SQL in bind order.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::schema::{STANDARD_TIME_ZONE, TABLE_ALIAS};

/// Bound parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// Text parameter
    Text(String),
    /// Timestamp parameter
    Timestamp(DateTime<Utc>),
}

/// Aggregate function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFn {
    /// `SUM`
    Sum,
    /// `MAX`
    Max,
    /// `MIN`
    Min,
    /// `AVG`
    Avg,
    /// `COUNT`
    Count,
}

impl AggregateFn {
    fn keyword(self) -> &'static str {
        match self {
            Self::Sum => "SUM",
            Self::Max => "MAX",
            Self::Min => "MIN",
            Self::Avg => "AVG",
            Self::Count => "COUNT",
        }
    }
}

/// Scalar expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// Column of the fact table
    Column(&'static str),
    /// Aggregate over a column
    Aggregate {
        /// Function
        function: AggregateFn,
        /// Column
        column: &'static str,
        /// `DISTINCT` modifier
        distinct: bool,
    },
    /// `date_trunc(unit, column at time zone 'GMT')`
    TimeBucket {
        /// `date_trunc` unit
        unit: &'static str,
        /// Timestamp column
        column: &'static str,
    },
    /// Reference to a select alias
    Alias(&'static str),
}

impl Expr {
    /// Aggregate without `DISTINCT`
    pub fn aggregate(function: AggregateFn, column: &'static str) -> Self {
        Self::Aggregate {
            function,
            column,
            distinct: false,
        }
    }

    fn render(&self, out: &mut String) {
        match self {
            Self::Column(column) => {
                let _ = write!(out, "{TABLE_ALIAS}.{column}");
            }
            Self::Aggregate {
                function,
                column,
                distinct,
            } => {
                let modifier = if *distinct { "DISTINCT " } else { "" };
                let _ = write!(out, "{}({modifier}{TABLE_ALIAS}.{column})", function.keyword());
            }
            Self::TimeBucket { unit, column } => {
                let _ = write!(
                    out,
                    "date_trunc('{unit}', {TABLE_ALIAS}.{column} at time zone '{STANDARD_TIME_ZONE}')"
                );
            }
            Self::Alias(alias) => out.push_str(alias),
        }
    }
}

/// Selected expression with its output name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectItem {
    /// Expression
    pub expr: Expr,
    /// Output alias
    pub alias: Option<&'static str>,
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `>=`
    GtEq,
    /// `<=`
    LtEq,
}

impl CompareOp {
    fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::GtEq => ">=",
            Self::LtEq => "<=",
        }
    }
}

/// WHERE term; terms are AND-ed without grouping parentheses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// `column IS NOT NULL`
    NotNull(&'static str),
    /// `column [NOT] IN (...)`
    In {
        /// Column
        column: &'static str,
        /// Members
        values: Vec<String>,
        /// `NOT IN`
        negated: bool,
    },
    /// `column LIKE pattern`
    Like {
        /// Column
        column: &'static str,
        /// Pattern including wildcards
        pattern: String,
    },
    /// `column op value`
    Compare {
        /// Column
        column: &'static str,
        /// Operator
        op: CompareOp,
        /// Operand
        value: SqlValue,
    },
}

impl Predicate {
    /// Column the predicate constrains
    pub fn column(&self) -> &'static str {
        match self {
            Self::NotNull(column)
            | Self::In { column, .. }
            | Self::Like { column, .. }
            | Self::Compare { column, .. } => column,
        }
    }
}

/// ORDER BY term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderItem {
    /// Expression
    pub expr: Expr,
    /// Descending order
    pub descending: bool,
}

/// Rendered statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedSql {
    /// SQL text with `$n` placeholders
    pub sql: String,
    /// Parameters in placeholder order
    pub params: Vec<SqlValue>,
}

/// SELECT over the fact table
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SelectQuery {
    /// Select list
    pub columns: Vec<SelectItem>,
    /// Fact table name
    pub from: String,
    /// WHERE terms
    pub predicates: Vec<Predicate>,
    /// GROUP BY terms
    pub group_by: Vec<Expr>,
    /// ORDER BY terms
    pub order_by: Vec<OrderItem>,
    /// LIMIT
    pub limit: Option<u32>,
    /// OFFSET
    pub offset: Option<u32>,
}

impl SelectQuery {
    /// Empty query over `table`
    pub fn from_table(table: impl Into<String>) -> Self {
        Self {
            from: table.into(),
            ..Self::default()
        }
    }

    /// Append a select item
    pub fn select(&mut self, expr: Expr, alias: Option<&'static str>) {
        self.columns.push(SelectItem { expr, alias });
    }

    /// Whether a predicate equal to `predicate` is present
    pub fn has_predicate(&self, predicate: &Predicate) -> bool {
        self.predicates.iter().any(|p| p == predicate)
    }

    /// Render the statement
    pub fn render(&self) -> RenderedSql {
        let mut sql = String::from("SELECT ");
        let mut params = Vec::new();

        for (i, item) in self.columns.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            item.expr.render(&mut sql);
            if let Some(alias) = item.alias {
                let _ = write!(sql, " AS {alias}");
            }
        }

        let _ = write!(sql, " FROM {} {TABLE_ALIAS}", self.from);

        if !self.predicates.is_empty() {
            sql.push_str(" WHERE ");
            for (i, predicate) in self.predicates.iter().enumerate() {
                if i > 0 {
                    sql.push_str(" AND ");
                }
                render_predicate(predicate, &mut sql, &mut params);
            }
        }

        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            for (i, expr) in self.group_by.iter().enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                expr.render(&mut sql);
            }
        }

        if !self.order_by.is_empty() {
            sql.push_str(" ORDER BY ");
            for (i, item) in self.order_by.iter().enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                item.expr.render(&mut sql);
                sql.push_str(if item.descending { " DESC" } else { " ASC" });
            }
        }

        if let Some(limit) = self.limit {
            let _ = write!(sql, " LIMIT {limit}");
        }
        if let Some(offset) = self.offset {
            let _ = write!(sql, " OFFSET {offset}");
        }

        RenderedSql { sql, params }
    }
}

fn bind(params: &mut Vec<SqlValue>, value: SqlValue) -> String {
    params.push(value);
    format!("${}", params.len())
}

fn render_predicate(predicate: &Predicate, sql: &mut String, params: &mut Vec<SqlValue>) {
    match predicate {
        Predicate::NotNull(column) => {
            let _ = write!(sql, "{TABLE_ALIAS}.{column} IS NOT NULL");
        }
        Predicate::In {
            column,
            values,
            negated,
        } => {
            if values.is_empty() {
                // Empty IN lists are not valid SQL
                sql.push_str(if *negated { "TRUE" } else { "FALSE" });
                return;
            }
            let keyword = if *negated { "NOT IN" } else { "IN" };
            let placeholders: Vec<String> = values
                .iter()
                .map(|v| bind(params, SqlValue::Text(v.clone())))
                .collect();
            let _ = write!(
                sql,
                "{TABLE_ALIAS}.{column} {keyword} ({})",
                placeholders.join(", ")
            );
        }
        Predicate::Like { column, pattern } => {
            let placeholder = bind(params, SqlValue::Text(pattern.clone()));
            let _ = write!(sql, "{TABLE_ALIAS}.{column} LIKE {placeholder}");
        }
        Predicate::Compare { column, op, value } => {
            let placeholder = bind(params, value.clone());
            let _ = write!(sql, "{TABLE_ALIAS}.{column} {} {placeholder}", op.symbol());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_render_full_statement() {
        let mut query = SelectQuery::from_table("billing_data");
        query.select(Expr::aggregate(AggregateFn::Sum, "billingamount"), Some("cost"));
        query.select(
            Expr::TimeBucket {
                unit: "day",
                column: "starttime",
            },
            Some("time_series"),
        );
        query.select(Expr::Column("clusterid"), None);
        query.predicates.push(Predicate::NotNull("clusterid"));
        query.predicates.push(Predicate::In {
            column: "instancetype",
            values: vec!["K8S_NODE".into(), "ECS_TASK_FARGATE".into()],
            negated: false,
        });
        query.predicates.push(Predicate::Compare {
            column: "starttime",
            op: CompareOp::GtEq,
            value: SqlValue::Timestamp(Utc.timestamp_millis_opt(0).unwrap()),
        });
        query.predicates.push(Predicate::Compare {
            column: "accountid",
            op: CompareOp::Eq,
            value: SqlValue::Text("acc".into()),
        });
        query.group_by.push(Expr::TimeBucket {
            unit: "day",
            column: "starttime",
        });
        query.group_by.push(Expr::Column("clusterid"));
        query.order_by.push(OrderItem {
            expr: Expr::Alias("time_series"),
            descending: false,
        });

        let rendered = query.render();
        assert_eq!(
            rendered.sql,
            "SELECT SUM(t0.billingamount) AS cost, \
             date_trunc('day', t0.starttime at time zone 'GMT') AS time_series, t0.clusterid \
             FROM billing_data t0 \
             WHERE t0.clusterid IS NOT NULL AND t0.instancetype IN ($1, $2) \
             AND t0.starttime >= $3 AND t0.accountid = $4 \
             GROUP BY date_trunc('day', t0.starttime at time zone 'GMT'), t0.clusterid \
             ORDER BY time_series ASC"
        );
        assert_eq!(rendered.params.len(), 4);
        assert_eq!(rendered.params[0], SqlValue::Text("K8S_NODE".into()));
        assert_eq!(rendered.params[3], SqlValue::Text("acc".into()));
    }

    #[test]
    fn test_render_not_in_like_and_paging() {
        let mut query = SelectQuery::from_table("billing_data_hourly");
        query.select(
            Expr::Aggregate {
                function: AggregateFn::Count,
                column: "workloadname",
                distinct: true,
            },
            Some("count"),
        );
        query.predicates.push(Predicate::In {
            column: "workloadname",
            values: vec!["Unallocated".into()],
            negated: true,
        });
        query.predicates.push(Predicate::Like {
            column: "namespace",
            pattern: "%kube%".into(),
        });
        query.limit = Some(10);
        query.offset = Some(20);

        let rendered = query.render();
        assert_eq!(
            rendered.sql,
            "SELECT COUNT(DISTINCT t0.workloadname) AS count FROM billing_data_hourly t0 \
             WHERE t0.workloadname NOT IN ($1) AND t0.namespace LIKE $2 LIMIT 10 OFFSET 20"
        );
        assert_eq!(rendered.params[1], SqlValue::Text("%kube%".into()));
    }

    #[test]
    fn test_empty_in_list_renders_constant() {
        let mut query = SelectQuery::from_table("billing_data");
        query.select(Expr::Column("appid"), None);
        query.predicates.push(Predicate::In {
            column: "appid",
            values: vec![],
            negated: false,
        });
        assert_eq!(
            query.render().sql,
            "SELECT t0.appid FROM billing_data t0 WHERE FALSE"
        );
    }
}
