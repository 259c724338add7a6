//! Closed SQL tree the compiler builds and renders.
//!
//! Only the node kinds the compiler consumes are represented; anything else
//! is rejected when converting from the parser's tree (see `sql_parse`).

use crate::dialect::Dialect;
use crate::models::SortDirection;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    Number(String),
    String(String),
    Boolean(bool),
    Null,
}

/// Aggregate functions recognised when deciding whether a projection aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregation {
    Count,
    Sum,
    Min,
    Max,
    Avg,
    Total,
    Median,
    Mode,
    Stddev,
    StddevPop,
    StddevSamp,
    Variance,
    VarPop,
    VarSamp,
    StringAgg,
    GroupConcat,
    ArrayAgg,
    ListAgg,
    ApproxCountDistinct,
    AnyValue,
    BoolAnd,
    BoolOr,
    CountIf,
}

impl Aggregation {
    pub fn from_name(name: &str) -> Option<Self> {
        let agg = match name.to_ascii_lowercase().as_str() {
            "count" => Aggregation::Count,
            "sum" => Aggregation::Sum,
            "min" => Aggregation::Min,
            "max" => Aggregation::Max,
            "avg" => Aggregation::Avg,
            "total" => Aggregation::Total,
            "median" => Aggregation::Median,
            "mode" => Aggregation::Mode,
            "stddev" => Aggregation::Stddev,
            "stddev_pop" => Aggregation::StddevPop,
            "stddev_samp" => Aggregation::StddevSamp,
            "variance" => Aggregation::Variance,
            "var_pop" => Aggregation::VarPop,
            "var_samp" => Aggregation::VarSamp,
            "string_agg" => Aggregation::StringAgg,
            "group_concat" => Aggregation::GroupConcat,
            "array_agg" => Aggregation::ArrayAgg,
            "listagg" => Aggregation::ListAgg,
            "approx_count_distinct" => Aggregation::ApproxCountDistinct,
            "any_value" => Aggregation::AnyValue,
            "bool_and" => Aggregation::BoolAnd,
            "bool_or" => Aggregation::BoolOr,
            "count_if" => Aggregation::CountIf,
            _ => return None,
        };
        Some(agg)
    }

    pub fn sql_name(&self) -> &'static str {
        match self {
            Aggregation::Count => "COUNT",
            Aggregation::Sum => "SUM",
            Aggregation::Min => "MIN",
            Aggregation::Max => "MAX",
            Aggregation::Avg => "AVG",
            Aggregation::Total => "TOTAL",
            Aggregation::Median => "MEDIAN",
            Aggregation::Mode => "MODE",
            Aggregation::Stddev => "STDDEV",
            Aggregation::StddevPop => "STDDEV_POP",
            Aggregation::StddevSamp => "STDDEV_SAMP",
            Aggregation::Variance => "VARIANCE",
            Aggregation::VarPop => "VAR_POP",
            Aggregation::VarSamp => "VAR_SAMP",
            Aggregation::StringAgg => "STRING_AGG",
            Aggregation::GroupConcat => "GROUP_CONCAT",
            Aggregation::ArrayAgg => "ARRAY_AGG",
            Aggregation::ListAgg => "LISTAGG",
            Aggregation::ApproxCountDistinct => "APPROX_COUNT_DISTINCT",
            Aggregation::AnyValue => "ANY_VALUE",
            Aggregation::BoolAnd => "BOOL_AND",
            Aggregation::BoolOr => "BOOL_OR",
            Aggregation::CountIf => "COUNT_IF",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SqlExpr {
    Column {
        table: Option<String>,
        name: String,
    },
    Literal(Literal),
    /// `*`, only valid as a function argument.
    Wildcard,
    /// Niladic built-ins written without parentheses (`CURRENT_DATE`).
    Keyword(String),
    Function {
        name: String,
        args: Vec<SqlExpr>,
    },
    Aggregate {
        agg: Aggregation,
        args: Vec<SqlExpr>,
        distinct: bool,
        filter: Option<Box<SqlExpr>>,
    },
    Case {
        operand: Option<Box<SqlExpr>>,
        branches: Vec<(SqlExpr, SqlExpr)>,
        else_expr: Option<Box<SqlExpr>>,
    },
    BinaryOp {
        op: SqlBinaryOperator,
        left: Box<SqlExpr>,
        right: Box<SqlExpr>,
    },
    UnaryOp {
        op: SqlUnaryOperator,
        expr: Box<SqlExpr>,
    },
    IsNull {
        expr: Box<SqlExpr>,
        negated: bool,
    },
    InList {
        expr: Box<SqlExpr>,
        list: Vec<SqlExpr>,
        negated: bool,
    },
    Between {
        expr: Box<SqlExpr>,
        low: Box<SqlExpr>,
        high: Box<SqlExpr>,
        negated: bool,
    },
    Like {
        expr: Box<SqlExpr>,
        pattern: Box<SqlExpr>,
        negated: bool,
        case_insensitive: bool,
    },
    Cast {
        expr: Box<SqlExpr>,
        data_type: String,
    },
    Nested(Box<SqlExpr>),
    Subquery(Box<SelectQuery>),
}

impl SqlExpr {
    pub fn column(table: Option<&str>, name: &str) -> Self {
        SqlExpr::Column {
            table: table.map(str::to_string),
            name: name.to_string(),
        }
    }

    pub fn number(value: i64) -> Self {
        SqlExpr::Literal(Literal::Number(value.to_string()))
    }

    pub fn null() -> Self {
        SqlExpr::Literal(Literal::Null)
    }

    pub fn eq(left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::BinaryOp {
            op: SqlBinaryOperator::Eq,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// AND together a list of predicates; `None` when the list is empty.
    pub fn conjunction(mut predicates: Vec<SqlExpr>) -> Option<SqlExpr> {
        let first = if predicates.is_empty() {
            return None;
        } else {
            predicates.remove(0)
        };
        Some(predicates.into_iter().fold(first, |acc, next| SqlExpr::BinaryOp {
            op: SqlBinaryOperator::And,
            left: Box::new(acc),
            right: Box::new(next),
        }))
    }

    /// Whether any node of the tree is an aggregate call.
    pub fn contains_aggregate(&self) -> bool {
        let mut found = false;
        self.walk(&mut |e| {
            if matches!(e, SqlExpr::Aggregate { .. }) {
                found = true;
            }
        });
        found
    }

    /// Pre-order traversal over the expression and its children.
    /// Subqueries are opaque: their inner expressions are not visited.
    pub fn walk(&self, visit: &mut impl FnMut(&SqlExpr)) {
        visit(self);
        match self {
            SqlExpr::Column { .. }
            | SqlExpr::Literal(_)
            | SqlExpr::Wildcard
            | SqlExpr::Keyword(_)
            | SqlExpr::Subquery(_) => {}
            SqlExpr::Function { args, .. } => args.iter().for_each(|a| a.walk(visit)),
            SqlExpr::Aggregate { args, filter, .. } => {
                args.iter().for_each(|a| a.walk(visit));
                if let Some(filter) = filter {
                    filter.walk(visit);
                }
            }
            SqlExpr::Case {
                operand,
                branches,
                else_expr,
            } => {
                if let Some(operand) = operand {
                    operand.walk(visit);
                }
                for (when, then) in branches {
                    when.walk(visit);
                    then.walk(visit);
                }
                if let Some(else_expr) = else_expr {
                    else_expr.walk(visit);
                }
            }
            SqlExpr::BinaryOp { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            SqlExpr::UnaryOp { expr, .. }
            | SqlExpr::IsNull { expr, .. }
            | SqlExpr::Cast { expr, .. }
            | SqlExpr::Nested(expr) => expr.walk(visit),
            SqlExpr::InList { expr, list, .. } => {
                expr.walk(visit);
                list.iter().for_each(|a| a.walk(visit));
            }
            SqlExpr::Between {
                expr, low, high, ..
            } => {
                expr.walk(visit);
                low.walk(visit);
                high.walk(visit);
            }
            SqlExpr::Like { expr, pattern, .. } => {
                expr.walk(visit);
                pattern.walk(visit);
            }
        }
    }

    /// Rebuild the tree bottom-up, letting `replace` substitute any node.
    /// Returning `None` from `replace` keeps the node and descends into it.
    pub fn transform(&self, replace: &mut dyn FnMut(&SqlExpr) -> Option<SqlExpr>) -> SqlExpr {
        if let Some(replaced) = replace(self) {
            return replaced;
        }
        fn boxed(
            e: &SqlExpr,
            replace: &mut dyn FnMut(&SqlExpr) -> Option<SqlExpr>,
        ) -> Box<SqlExpr> {
            Box::new(e.transform(replace))
        }
        match self {
            SqlExpr::Column { .. }
            | SqlExpr::Literal(_)
            | SqlExpr::Wildcard
            | SqlExpr::Keyword(_)
            | SqlExpr::Subquery(_) => self.clone(),
            SqlExpr::Function { name, args } => SqlExpr::Function {
                name: name.clone(),
                args: args.iter().map(|a| a.transform(replace)).collect(),
            },
            SqlExpr::Aggregate {
                agg,
                args,
                distinct,
                filter,
            } => SqlExpr::Aggregate {
                agg: *agg,
                args: args.iter().map(|a| a.transform(replace)).collect(),
                distinct: *distinct,
                filter: filter.as_ref().map(|f| boxed(f, replace)),
            },
            SqlExpr::Case {
                operand,
                branches,
                else_expr,
            } => SqlExpr::Case {
                operand: operand.as_ref().map(|o| boxed(o, replace)),
                branches: branches
                    .iter()
                    .map(|(w, t)| (w.transform(replace), t.transform(replace)))
                    .collect(),
                else_expr: else_expr.as_ref().map(|e| boxed(e, replace)),
            },
            SqlExpr::BinaryOp { op, left, right } => SqlExpr::BinaryOp {
                op: *op,
                left: boxed(left, replace),
                right: boxed(right, replace),
            },
            SqlExpr::UnaryOp { op, expr } => SqlExpr::UnaryOp {
                op: *op,
                expr: boxed(expr, replace),
            },
            SqlExpr::IsNull { expr, negated } => SqlExpr::IsNull {
                expr: boxed(expr, replace),
                negated: *negated,
            },
            SqlExpr::InList {
                expr,
                list,
                negated,
            } => SqlExpr::InList {
                expr: boxed(expr, replace),
                list: list.iter().map(|a| a.transform(replace)).collect(),
                negated: *negated,
            },
            SqlExpr::Between {
                expr,
                low,
                high,
                negated,
            } => SqlExpr::Between {
                expr: boxed(expr, replace),
                low: boxed(low, replace),
                high: boxed(high, replace),
                negated: *negated,
            },
            SqlExpr::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
            } => SqlExpr::Like {
                expr: boxed(expr, replace),
                pattern: boxed(pattern, replace),
                negated: *negated,
                case_insensitive: *case_insensitive,
            },
            SqlExpr::Cast { expr, data_type } => SqlExpr::Cast {
                expr: boxed(expr, replace),
                data_type: data_type.clone(),
            },
            SqlExpr::Nested(expr) => SqlExpr::Nested(boxed(expr, replace)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlBinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Concat,
    And,
    Or,
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl SqlBinaryOperator {
    fn sql(&self) -> &'static str {
        match self {
            SqlBinaryOperator::Add => "+",
            SqlBinaryOperator::Subtract => "-",
            SqlBinaryOperator::Multiply => "*",
            SqlBinaryOperator::Divide => "/",
            SqlBinaryOperator::Modulo => "%",
            SqlBinaryOperator::Concat => "||",
            SqlBinaryOperator::And => "AND",
            SqlBinaryOperator::Or => "OR",
            SqlBinaryOperator::Eq => "=",
            SqlBinaryOperator::Neq => "<>",
            SqlBinaryOperator::Gt => ">",
            SqlBinaryOperator::Gte => ">=",
            SqlBinaryOperator::Lt => "<",
            SqlBinaryOperator::Lte => "<=",
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            SqlBinaryOperator::Or => 1,
            SqlBinaryOperator::And => 2,
            SqlBinaryOperator::Eq
            | SqlBinaryOperator::Neq
            | SqlBinaryOperator::Gt
            | SqlBinaryOperator::Gte
            | SqlBinaryOperator::Lt
            | SqlBinaryOperator::Lte => 4,
            SqlBinaryOperator::Concat => 5,
            SqlBinaryOperator::Add | SqlBinaryOperator::Subtract => 6,
            SqlBinaryOperator::Multiply | SqlBinaryOperator::Divide | SqlBinaryOperator::Modulo => 7,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlUnaryOperator {
    Not,
    Minus,
    Plus,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SelectItem {
    pub expr: SqlExpr,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TableRef {
    pub name: String,
    pub schema: Option<String>,
    pub catalog: Option<String>,
    pub alias: Option<String>,
    pub subquery: Option<Box<SelectQuery>>,
}

impl TableRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn derived(query: SelectQuery, alias: impl Into<String>) -> Self {
        Self {
            alias: Some(alias.into()),
            subquery: Some(Box::new(query)),
            ..Default::default()
        }
    }

    /// The name columns of this table are qualified with.
    pub fn reference_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlJoinType {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Join {
    pub join_type: SqlJoinType,
    pub table: TableRef,
    pub on: Vec<SqlExpr>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderItem {
    pub expr: SqlExpr,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cte {
    pub alias: String,
    pub query: SelectQuery,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SelectQuery {
    pub with: Vec<Cte>,
    pub select: Vec<SelectItem>,
    pub from: Option<TableRef>,
    pub joins: Vec<Join>,
    pub filters: Vec<SqlExpr>,
    pub group_by: Vec<SqlExpr>,
    pub having: Vec<SqlExpr>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

pub struct SqlRenderer<'d> {
    dialect: &'d dyn Dialect,
}

impl<'d> SqlRenderer<'d> {
    pub fn new(dialect: &'d dyn Dialect) -> Self {
        Self { dialect }
    }

    pub fn render_select(&self, query: &SelectQuery) -> String {
        let mut sql = String::new();

        if !query.with.is_empty() {
            let ctes: Vec<String> = query
                .with
                .iter()
                .map(|cte| {
                    format!(
                        "{} AS ({})",
                        self.dialect.quote_ident(&cte.alias),
                        self.render_select(&cte.query)
                    )
                })
                .collect();
            sql.push_str(&format!("WITH {} ", ctes.join(", ")));
        }

        let select_items: Vec<String> = query
            .select
            .iter()
            .map(|item| {
                let expr_sql = self.render_expr(&item.expr);
                match &item.alias {
                    Some(alias) => format!("{expr_sql} AS {}", self.dialect.quote_ident(alias)),
                    None => expr_sql,
                }
            })
            .collect();
        sql.push_str(&format!("SELECT {}", select_items.join(", ")));

        if let Some(from) = &query.from {
            sql.push_str(&format!(" FROM {}", self.render_table_ref(from)));
        }

        for join in &query.joins {
            let join_kw = match join.join_type {
                SqlJoinType::Inner => "JOIN",
                SqlJoinType::Left => "LEFT JOIN",
                SqlJoinType::Right => "RIGHT JOIN",
                SqlJoinType::Full => "FULL JOIN",
                SqlJoinType::Cross => "CROSS JOIN",
            };
            sql.push_str(&format!(" {join_kw} {}", self.render_table_ref(&join.table)));
            if !join.on.is_empty() {
                let on_clause: Vec<String> = join.on.iter().map(|e| self.render_expr(e)).collect();
                sql.push_str(&format!(" ON {}", on_clause.join(" AND ")));
            }
        }

        if let Some(predicate) = SqlExpr::conjunction(query.filters.clone()) {
            sql.push_str(&format!(" WHERE {}", self.render_expr(&predicate)));
        }

        if !query.group_by.is_empty() {
            let groups: Vec<String> = query.group_by.iter().map(|g| self.render_expr(g)).collect();
            sql.push_str(&format!(" GROUP BY {}", groups.join(", ")));
        }

        if let Some(predicate) = SqlExpr::conjunction(query.having.clone()) {
            sql.push_str(&format!(" HAVING {}", self.render_expr(&predicate)));
        }

        if !query.order_by.is_empty() {
            let orders: Vec<String> = query
                .order_by
                .iter()
                .map(|o| {
                    let expr = self.render_expr(&o.expr);
                    let dir = match o.direction {
                        SortDirection::Asc => "ASC",
                        SortDirection::Desc => "DESC",
                    };
                    format!("{expr} {dir}")
                })
                .collect();
            sql.push_str(&format!(" ORDER BY {}", orders.join(", ")));
        }

        if let Some(clause) = self.dialect.render_limit_offset(query.limit, query.offset) {
            sql.push(' ');
            sql.push_str(&clause);
        }

        sql
    }

    fn render_table_ref(&self, table: &TableRef) -> String {
        if let Some(subquery) = &table.subquery {
            let alias = table.alias.as_deref().unwrap_or(&table.name);
            return format!(
                "({}) AS {}",
                self.render_select(subquery),
                self.dialect.quote_ident(alias)
            );
        }
        let mut parts = Vec::new();
        if let Some(catalog) = &table.catalog {
            parts.push(self.dialect.quote_ident(catalog));
        }
        if let Some(schema) = &table.schema {
            parts.push(self.dialect.quote_ident(schema));
        }
        parts.push(self.dialect.quote_ident(&table.name));
        let name = parts.join(".");
        match &table.alias {
            Some(alias) => format!("{name} {}", self.dialect.quote_ident(alias)),
            None => name,
        }
    }

    pub fn render_expr(&self, expr: &SqlExpr) -> String {
        match expr {
            SqlExpr::Column { table, name } => match table {
                Some(t) => format!(
                    "{}.{}",
                    self.dialect.quote_ident(t),
                    self.dialect.quote_ident(name)
                ),
                None => self.dialect.quote_ident(name),
            },
            SqlExpr::Literal(literal) => self.dialect.render_literal(literal),
            SqlExpr::Wildcard => "*".to_string(),
            SqlExpr::Keyword(word) => word.clone(),
            SqlExpr::Function { name, args } => {
                let rendered_args: Vec<String> = args.iter().map(|a| self.render_expr(a)).collect();
                self.dialect.render_function(name, rendered_args)
            }
            SqlExpr::Aggregate {
                agg,
                args,
                distinct,
                filter,
            } => {
                let rendered_args: Vec<String> = args.iter().map(|a| self.render_expr(a)).collect();
                let mut sql = self
                    .dialect
                    .render_aggregation(agg, &rendered_args.join(", "), *distinct);
                if let Some(filter) = filter {
                    sql.push_str(&format!(" FILTER (WHERE {})", self.render_expr(filter)));
                }
                sql
            }
            SqlExpr::Case {
                operand,
                branches,
                else_expr,
            } => {
                let mut parts = Vec::new();
                parts.push("CASE".to_string());
                if let Some(operand) = operand {
                    parts.push(format!(" {}", self.render_expr(operand)));
                }
                for (when, then) in branches {
                    parts.push(format!(
                        " WHEN {} THEN {}",
                        self.render_expr(when),
                        self.render_expr(then)
                    ));
                }
                if let Some(else_expr) = else_expr {
                    parts.push(format!(" ELSE {}", self.render_expr(else_expr)));
                }
                parts.push(" END".to_string());
                parts.join("")
            }
            SqlExpr::BinaryOp { op, left, right } => {
                let prec = op.precedence();
                let left_sql = self.render_operand(left, prec, false);
                let right_sql = self.render_operand(right, prec, true);
                format!("{left_sql} {} {right_sql}", op.sql())
            }
            SqlExpr::UnaryOp { op, expr } => match op {
                SqlUnaryOperator::Not => format!("NOT {}", self.render_operand(expr, 3, false)),
                SqlUnaryOperator::Minus => format!("-{}", self.render_operand(expr, 8, false)),
                SqlUnaryOperator::Plus => format!("+{}", self.render_operand(expr, 8, false)),
            },
            SqlExpr::IsNull { expr, negated } => {
                let not_kw = if *negated { "NOT " } else { "" };
                format!("{} IS {not_kw}NULL", self.render_operand(expr, 4, false))
            }
            SqlExpr::InList {
                expr,
                list,
                negated,
            } => {
                let rendered_values: Vec<String> =
                    list.iter().map(|v| self.render_expr(v)).collect();
                let not_kw = if *negated { "NOT " } else { "" };
                format!(
                    "{} {}IN ({})",
                    self.render_operand(expr, 4, false),
                    not_kw,
                    rendered_values.join(", ")
                )
            }
            SqlExpr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let not_kw = if *negated { "NOT " } else { "" };
                format!(
                    "{} {not_kw}BETWEEN {} AND {}",
                    self.render_operand(expr, 4, false),
                    self.render_operand(low, 5, false),
                    self.render_operand(high, 5, false)
                )
            }
            SqlExpr::Like {
                expr,
                pattern,
                negated,
                case_insensitive,
            } => {
                let not_kw = if *negated { "NOT " } else { "" };
                let like_kw = if *case_insensitive { "ILIKE" } else { "LIKE" };
                format!(
                    "{} {not_kw}{like_kw} {}",
                    self.render_operand(expr, 4, false),
                    self.render_operand(pattern, 4, true)
                )
            }
            SqlExpr::Cast { expr, data_type } => {
                format!("CAST({} AS {data_type})", self.render_expr(expr))
            }
            SqlExpr::Nested(expr) => format!("({})", self.render_expr(expr)),
            SqlExpr::Subquery(query) => format!("({})", self.render_select(query)),
        }
    }

    /// Render a child expression, parenthesising it when its operator binds
    /// looser than the parent (or equally, on the right-hand side).
    fn render_operand(&self, expr: &SqlExpr, parent: u8, right_side: bool) -> String {
        let child = match expr {
            SqlExpr::BinaryOp { op, .. } => op.precedence(),
            SqlExpr::UnaryOp {
                op: SqlUnaryOperator::Not,
                ..
            } => 3,
            SqlExpr::IsNull { .. }
            | SqlExpr::InList { .. }
            | SqlExpr::Between { .. }
            | SqlExpr::Like { .. } => 4,
            _ => u8::MAX,
        };
        let rendered = self.render_expr(expr);
        if child < parent || (right_side && child == parent) {
            format!("({rendered})")
        } else {
            rendered
        }
    }
}
