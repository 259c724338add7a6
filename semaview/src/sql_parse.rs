//! Front end: read SQL text with `sqlparser` and lower it into the closed
//! tree in [`crate::sql_ast`]. Nodes the compiler has no use for are
//! rejected with [`SemaviewError::ShapeViolation`] naming the offending SQL.

use sqlparser::ast::{
    self as sql, BinaryOperator as SqlBinaryOp, Expr as ParsedExpr, UnaryOperator as SqlUnaryOp,
    Value as SqlValue,
};
use sqlparser::parser::Parser;

use crate::dialect::Dialect;
use crate::error::{Result, SemaviewError};
use crate::sql_ast::{
    Aggregation, Cte, Join, Literal, OrderItem, SelectItem, SelectQuery, SqlBinaryOperator,
    SqlExpr, SqlJoinType, SqlUnaryOperator, TableRef,
};
use crate::models::SortDirection;

fn unsupported(what: impl std::fmt::Display) -> SemaviewError {
    SemaviewError::ShapeViolation(format!("unsupported SQL `{what}`"))
}

/// Parse a single statement that is either a bare query or `CREATE VIEW ... AS <query>`,
/// returning the query part.
pub fn parse_query(dialect: &dyn Dialect, text: &str) -> Result<Box<sql::Query>> {
    let parser_dialect = dialect.parser_dialect();
    let mut statements = Parser::parse_sql(parser_dialect.as_ref(), text)?;
    if statements.len() != 1 {
        return Err(SemaviewError::ShapeViolation(format!(
            "expected one statement, found {}",
            statements.len()
        )));
    }
    match statements.remove(0) {
        sql::Statement::Query(query) => Ok(query),
        sql::Statement::CreateView { query, .. } => Ok(query),
        other => Err(SemaviewError::ShapeViolation(format!(
            "expected a SELECT or CREATE VIEW statement, got `{other}`"
        ))),
    }
}

/// Parse a standalone scalar expression (used for request filters).
pub fn parse_expression(dialect: &dyn Dialect, text: &str) -> Result<SqlExpr> {
    let parser_dialect = dialect.parser_dialect();
    let expr = Parser::new(parser_dialect.as_ref())
        .try_with_sql(text)?
        .parse_expr()?;
    convert_expr(&expr)
}

/// Split an object name into `(name, schema, catalog)`, innermost first.
pub fn object_name_parts(name: &sql::ObjectName) -> (String, Option<String>, Option<String>) {
    let mut parts = name.0.iter().rev().map(|ident| ident.value.clone());
    let table = parts.next().unwrap_or_default();
    let schema = parts.next();
    let catalog = parts.next();
    (table, schema, catalog)
}

pub fn convert_query(query: &sql::Query) -> Result<SelectQuery> {
    let mut select = match query.body.as_ref() {
        sql::SetExpr::Select(select) => convert_select(select)?,
        sql::SetExpr::Query(inner) => convert_query(inner)?,
        other => return Err(unsupported(other)),
    };

    if let Some(with) = &query.with {
        if with.recursive {
            return Err(unsupported(with));
        }
        for cte in &with.cte_tables {
            select.with.push(Cte {
                alias: cte.alias.name.value.clone(),
                query: convert_query(&cte.query)?,
            });
        }
    }

    if let Some(order_by) = &query.order_by {
        for item in &order_by.exprs {
            select.order_by.push(OrderItem {
                expr: convert_expr(&item.expr)?,
                direction: if item.asc == Some(false) {
                    SortDirection::Desc
                } else {
                    SortDirection::Asc
                },
            });
        }
    }

    if let Some(limit) = &query.limit {
        select.limit = Some(integer_literal(limit)?);
    }
    if let Some(offset) = &query.offset {
        select.offset = Some(integer_literal(&offset.value)?);
    }
    Ok(select)
}

fn integer_literal(expr: &ParsedExpr) -> Result<u64> {
    match expr {
        ParsedExpr::Value(SqlValue::Number(n, _)) => n
            .to_string()
            .parse::<u64>()
            .map_err(|_| SemaviewError::Validation(format!("expected a non-negative integer, got {n}"))),
        other => Err(SemaviewError::Validation(format!(
            "expected a non-negative integer, got `{other}`"
        ))),
    }
}

fn convert_select(select: &sql::Select) -> Result<SelectQuery> {
    if let Some(distinct) = &select.distinct {
        return Err(unsupported(distinct));
    }

    let mut out = SelectQuery::default();
    for item in &select.projection {
        let converted = match item {
            sql::SelectItem::UnnamedExpr(expr) => SelectItem {
                expr: convert_expr(expr)?,
                alias: None,
            },
            sql::SelectItem::ExprWithAlias { expr, alias } => SelectItem {
                expr: convert_expr(expr)?,
                alias: Some(alias.value.clone()),
            },
            sql::SelectItem::Wildcard(_) => SelectItem {
                expr: SqlExpr::Wildcard,
                alias: None,
            },
            other => return Err(unsupported(other)),
        };
        out.select.push(converted);
    }

    for (idx, table_with_joins) in select.from.iter().enumerate() {
        let relation = convert_table_factor(&table_with_joins.relation)?;
        if idx == 0 {
            out.from = Some(relation);
        } else {
            // `FROM a, b` is a cross join.
            out.joins.push(Join {
                join_type: SqlJoinType::Cross,
                table: relation,
                on: Vec::new(),
            });
        }
        for join in &table_with_joins.joins {
            out.joins.push(convert_join(join)?);
        }
    }

    if let Some(selection) = &select.selection {
        out.filters.push(convert_expr(selection)?);
    }

    match &select.group_by {
        sql::GroupByExpr::Expressions(exprs, _) => {
            for expr in exprs {
                out.group_by.push(convert_expr(expr)?);
            }
        }
        other => return Err(unsupported(other)),
    }

    if let Some(having) = &select.having {
        out.having.push(convert_expr(having)?);
    }
    Ok(out)
}

fn convert_table_factor(factor: &sql::TableFactor) -> Result<TableRef> {
    match factor {
        sql::TableFactor::Table { name, alias, .. } => {
            let (table, schema, catalog) = object_name_parts(name);
            Ok(TableRef {
                name: table,
                schema,
                catalog,
                alias: alias.as_ref().map(|a| a.name.value.clone()),
                subquery: None,
            })
        }
        sql::TableFactor::Derived {
            subquery,
            alias: Some(alias),
            ..
        } => Ok(TableRef::derived(
            convert_query(subquery)?,
            alias.name.value.clone(),
        )),
        other => Err(unsupported(other)),
    }
}

fn convert_join(join: &sql::Join) -> Result<Join> {
    let (join_type, constraint) = match &join.join_operator {
        sql::JoinOperator::Inner(c) => (SqlJoinType::Inner, Some(c)),
        sql::JoinOperator::LeftOuter(c) => (SqlJoinType::Left, Some(c)),
        sql::JoinOperator::RightOuter(c) => (SqlJoinType::Right, Some(c)),
        sql::JoinOperator::FullOuter(c) => (SqlJoinType::Full, Some(c)),
        sql::JoinOperator::CrossJoin => (SqlJoinType::Cross, None),
        other => return Err(unsupported(format!("{other:?}"))),
    };
    let on = match constraint {
        Some(sql::JoinConstraint::On(expr)) => vec![convert_expr(expr)?],
        Some(sql::JoinConstraint::None) | None => Vec::new(),
        Some(other) => return Err(unsupported(format!("{other:?}"))),
    };
    Ok(Join {
        join_type,
        table: convert_table_factor(&join.relation)?,
        on,
    })
}

pub fn convert_expr(expr: &ParsedExpr) -> Result<SqlExpr> {
    let boxed = |e: &ParsedExpr| convert_expr(e).map(Box::new);
    let converted = match expr {
        ParsedExpr::Identifier(ident) => SqlExpr::Column {
            table: None,
            name: ident.value.clone(),
        },
        ParsedExpr::CompoundIdentifier(idents) => {
            let mut parts = idents.iter().rev();
            let name = parts
                .next()
                .map(|i| i.value.clone())
                .ok_or_else(|| unsupported(expr))?;
            SqlExpr::Column {
                table: parts.next().map(|i| i.value.clone()),
                name,
            }
        }
        ParsedExpr::Value(value) => SqlExpr::Literal(convert_value(value)?),
        ParsedExpr::BinaryOp { left, op, right } => SqlExpr::BinaryOp {
            op: convert_binary_op(op)?,
            left: boxed(left)?,
            right: boxed(right)?,
        },
        ParsedExpr::UnaryOp { op, expr } => SqlExpr::UnaryOp {
            op: match op {
                SqlUnaryOp::Not => SqlUnaryOperator::Not,
                SqlUnaryOp::Minus => SqlUnaryOperator::Minus,
                SqlUnaryOp::Plus => SqlUnaryOperator::Plus,
                other => return Err(unsupported(other)),
            },
            expr: boxed(expr)?,
        },
        ParsedExpr::Nested(inner) => SqlExpr::Nested(boxed(inner)?),
        ParsedExpr::Function(func) => convert_function(func)?,
        ParsedExpr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            let mut branches = Vec::with_capacity(conditions.len());
            for (condition, result) in conditions.iter().zip(results.iter()) {
                branches.push((convert_expr(condition)?, convert_expr(result)?));
            }
            SqlExpr::Case {
                operand: operand.as_deref().map(convert_expr).transpose()?.map(Box::new),
                branches,
                else_expr: else_result
                    .as_deref()
                    .map(convert_expr)
                    .transpose()?
                    .map(Box::new),
            }
        }
        ParsedExpr::Cast {
            expr, data_type, ..
        } => SqlExpr::Cast {
            expr: boxed(expr)?,
            data_type: data_type.to_string(),
        },
        ParsedExpr::IsNull(inner) => SqlExpr::IsNull {
            expr: boxed(inner)?,
            negated: false,
        },
        ParsedExpr::IsNotNull(inner) => SqlExpr::IsNull {
            expr: boxed(inner)?,
            negated: true,
        },
        ParsedExpr::InList {
            expr,
            list,
            negated,
        } => SqlExpr::InList {
            expr: boxed(expr)?,
            list: list.iter().map(convert_expr).collect::<Result<_>>()?,
            negated: *negated,
        },
        ParsedExpr::Between {
            expr,
            negated,
            low,
            high,
        } => SqlExpr::Between {
            expr: boxed(expr)?,
            low: boxed(low)?,
            high: boxed(high)?,
            negated: *negated,
        },
        ParsedExpr::Like {
            expr,
            pattern,
            negated,
            escape_char: None,
            ..
        } => SqlExpr::Like {
            expr: boxed(expr)?,
            pattern: boxed(pattern)?,
            negated: *negated,
            case_insensitive: false,
        },
        ParsedExpr::ILike {
            expr,
            pattern,
            negated,
            escape_char: None,
            ..
        } => SqlExpr::Like {
            expr: boxed(expr)?,
            pattern: boxed(pattern)?,
            negated: *negated,
            case_insensitive: true,
        },
        ParsedExpr::Subquery(query) => SqlExpr::Subquery(Box::new(convert_query(query)?)),
        other => return Err(unsupported(other)),
    };
    Ok(converted)
}

fn convert_value(value: &SqlValue) -> Result<Literal> {
    match value {
        SqlValue::Number(n, _) => Ok(Literal::Number(n.to_string())),
        SqlValue::SingleQuotedString(s) => Ok(Literal::String(s.clone())),
        SqlValue::Boolean(b) => Ok(Literal::Boolean(*b)),
        SqlValue::Null => Ok(Literal::Null),
        other => Err(unsupported(other)),
    }
}

fn convert_binary_op(op: &SqlBinaryOp) -> Result<SqlBinaryOperator> {
    let converted = match op {
        SqlBinaryOp::Plus => SqlBinaryOperator::Add,
        SqlBinaryOp::Minus => SqlBinaryOperator::Subtract,
        SqlBinaryOp::Multiply => SqlBinaryOperator::Multiply,
        SqlBinaryOp::Divide => SqlBinaryOperator::Divide,
        SqlBinaryOp::Modulo => SqlBinaryOperator::Modulo,
        SqlBinaryOp::StringConcat => SqlBinaryOperator::Concat,
        SqlBinaryOp::Eq => SqlBinaryOperator::Eq,
        SqlBinaryOp::NotEq => SqlBinaryOperator::Neq,
        SqlBinaryOp::Lt => SqlBinaryOperator::Lt,
        SqlBinaryOp::LtEq => SqlBinaryOperator::Lte,
        SqlBinaryOp::Gt => SqlBinaryOperator::Gt,
        SqlBinaryOp::GtEq => SqlBinaryOperator::Gte,
        SqlBinaryOp::And => SqlBinaryOperator::And,
        SqlBinaryOp::Or => SqlBinaryOperator::Or,
        other => return Err(unsupported(other)),
    };
    Ok(converted)
}

fn convert_function(func: &sql::Function) -> Result<SqlExpr> {
    if func.over.is_some() || !func.within_group.is_empty() {
        return Err(unsupported(func));
    }
    let (name, _, _) = object_name_parts(&func.name);

    let (args, distinct) = match &func.args {
        sql::FunctionArguments::None => return Ok(SqlExpr::Keyword(name.to_uppercase())),
        sql::FunctionArguments::Subquery(_) => return Err(unsupported(func)),
        sql::FunctionArguments::List(list) => {
            if !list.clauses.is_empty() {
                return Err(unsupported(func));
            }
            let mut args = Vec::with_capacity(list.args.len());
            for arg in &list.args {
                let converted = match arg {
                    sql::FunctionArg::Unnamed(sql::FunctionArgExpr::Expr(e)) => convert_expr(e)?,
                    sql::FunctionArg::Unnamed(sql::FunctionArgExpr::Wildcard) => SqlExpr::Wildcard,
                    _ => return Err(unsupported(func)),
                };
                args.push(converted);
            }
            let distinct = matches!(
                list.duplicate_treatment,
                Some(sql::DuplicateTreatment::Distinct)
            );
            (args, distinct)
        }
    };

    let filter = func
        .filter
        .as_deref()
        .map(convert_expr)
        .transpose()?
        .map(Box::new);

    match Aggregation::from_name(&name) {
        Some(agg) => Ok(SqlExpr::Aggregate {
            agg,
            args,
            distinct,
            filter,
        }),
        None if distinct || filter.is_some() => Err(unsupported(func)),
        None => Ok(SqlExpr::Function { name, args }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqliteDialect;
    use crate::sql_ast::SqlRenderer;

    fn roundtrip(sql: &str) -> String {
        let query = parse_query(&SqliteDialect, sql).unwrap();
        let select = convert_query(&query).unwrap();
        SqlRenderer::new(&SqliteDialect).render_select(&select)
    }

    #[test]
    fn create_view_yields_its_query() {
        assert_eq!(
            roundtrip("CREATE VIEW revenue AS SELECT SUM(amount) AS revenue FROM orders"),
            "SELECT SUM(amount) AS revenue FROM orders"
        );
    }

    #[test]
    fn keeps_explicit_parentheses_and_predicates() {
        assert_eq!(
            roundtrip(
                "SELECT SUM(qty * (1 - discount)) FROM sales.orders o WHERE o.status = 'paid' AND qty > 0"
            ),
            "SELECT SUM(qty * (1 - discount)) FROM sales.orders o WHERE o.status = 'paid' AND qty > 0"
        );
    }

    #[test]
    fn count_star_and_distinct() {
        assert_eq!(
            roundtrip("select count(*), count(distinct customer_id) from orders"),
            "SELECT COUNT(*), COUNT(DISTINCT customer_id) FROM orders"
        );
    }

    #[test]
    fn rejects_set_operations() {
        let query = parse_query(&SqliteDialect, "SELECT 1 UNION SELECT 2").unwrap();
        let err = convert_query(&query).unwrap_err();
        assert!(matches!(err, SemaviewError::ShapeViolation(_)));
    }

    #[test]
    fn rejects_window_functions() {
        let err = parse_expression(&SqliteDialect, "SUM(x) OVER ()").unwrap_err();
        assert!(matches!(err, SemaviewError::ShapeViolation(_)));
    }

    #[test]
    fn parses_standalone_filters() {
        let expr = parse_expression(&SqliteDialect, "customers.country = 'DE'").unwrap();
        assert_eq!(
            SqlRenderer::new(&SqliteDialect).render_expr(&expr),
            "customers.country = 'DE'"
        );
    }
}
