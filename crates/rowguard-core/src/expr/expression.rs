//! Predicate expression tree.

use std::collections::BTreeSet;
use std::fmt;

use crate::catalog::{quote_ident, ColumnId, Table};
use crate::error::Error;
use crate::value::Value;

use super::error::ParseError;
use super::parser::Parser;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// Arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        }
    }
}

/// A column reference.
///
/// Parsed references carry only a name. Binding to a table fills in the
/// stable column id and the row position; after a rename the id is used to
/// refresh the other two.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub name: String,
    pub id: Option<ColumnId>,
    pub position: Option<usize>,
}

impl ColumnRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            position: None,
        }
    }
}

/// A boolean predicate or scalar sub-expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    Column(ColumnRef),
    /// The `VALUE` placeholder of a domain predicate.
    DomainValue,
    Compare {
        op: CompareOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Arithmetic {
        op: ArithOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Negate(Box<Expression>),
    And(Box<Expression>, Box<Expression>),
    Or(Box<Expression>, Box<Expression>),
    Not(Box<Expression>),
    IsNull {
        expr: Box<Expression>,
        negated: bool,
    },
    InList {
        expr: Box<Expression>,
        list: Vec<Expression>,
        negated: bool,
    },
}

impl Expression {
    /// Parse predicate text.
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let mut parser = Parser::new(source)?;
        let expr = parser.parse_expression()?;
        parser.expect_end()?;
        Ok(expr)
    }

    pub fn column(name: impl Into<String>) -> Self {
        Expression::Column(ColumnRef::new(name))
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal(value.into())
    }

    pub fn compare(op: CompareOp, left: Expression, right: Expression) -> Self {
        Expression::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(left: Expression, right: Expression) -> Self {
        Expression::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Expression, right: Expression) -> Self {
        Expression::Or(Box::new(left), Box::new(right))
    }

    /// Bind column references by name against the table.
    pub fn bind(&mut self, table: &Table) -> Result<(), Error> {
        let mut result = Ok(());
        self.visit_columns_mut(&mut |col| {
            if result.is_err() {
                return;
            }
            match table.column_by_name(&col.name) {
                Some(column) => {
                    col.id = Some(column.id);
                    col.position = table.position_of(column.id);
                }
                None => {
                    result = Err(Error::Definition(format!(
                        "column {} not found in table {}",
                        col.name, table.name
                    )))
                }
            }
        });
        result
    }

    /// Refresh names and positions of bound references from their column ids.
    ///
    /// Returns the id of the first reference that no longer resolves.
    pub fn rebind(&mut self, table: &Table) -> Result<(), ColumnId> {
        let mut missing = None;
        self.visit_columns_mut(&mut |col| {
            if missing.is_some() {
                return;
            }
            let Some(id) = col.id else {
                return;
            };
            match table.column(id) {
                Some(column) => {
                    col.name = column.name.clone();
                    col.position = table.position_of(id);
                }
                None => missing = Some(id),
            }
        });
        missing.map_or(Ok(()), Err)
    }

    /// Ids of all bound column references.
    pub fn columns(&self) -> BTreeSet<ColumnId> {
        let mut ids = BTreeSet::new();
        self.visit(&mut |expr| {
            if let Expression::Column(ColumnRef { id: Some(id), .. }) = expr {
                ids.insert(*id);
            }
        });
        ids
    }

    /// Whether any column reference appears.
    pub fn has_column_refs(&self) -> bool {
        let mut found = false;
        self.visit(&mut |expr| found |= matches!(expr, Expression::Column(_)));
        found
    }

    /// Whether the `VALUE` placeholder appears.
    pub fn uses_domain_value(&self) -> bool {
        let mut found = false;
        self.visit(&mut |expr| found |= matches!(expr, Expression::DomainValue));
        found
    }

    fn children(&self) -> Vec<&Expression> {
        match self {
            Expression::Literal(_) | Expression::Column(_) | Expression::DomainValue => vec![],
            Expression::Compare { left, right, .. }
            | Expression::Arithmetic { left, right, .. }
            | Expression::And(left, right)
            | Expression::Or(left, right) => vec![left, right],
            Expression::Negate(e) | Expression::Not(e) => vec![e],
            Expression::IsNull { expr, .. } => vec![expr],
            Expression::InList { expr, list, .. } => {
                let mut children = vec![expr.as_ref()];
                children.extend(list.iter());
                children
            }
        }
    }

    fn visit(&self, f: &mut dyn FnMut(&Expression)) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }

    fn visit_columns_mut(&mut self, f: &mut dyn FnMut(&mut ColumnRef)) {
        match self {
            Expression::Column(col) => f(col),
            Expression::Literal(_) | Expression::DomainValue => {}
            Expression::Compare { left, right, .. }
            | Expression::Arithmetic { left, right, .. }
            | Expression::And(left, right)
            | Expression::Or(left, right) => {
                left.visit_columns_mut(f);
                right.visit_columns_mut(f);
            }
            Expression::Negate(e) | Expression::Not(e) => e.visit_columns_mut(f),
            Expression::IsNull { expr, .. } => expr.visit_columns_mut(f),
            Expression::InList { expr, list, .. } => {
                expr.visit_columns_mut(f);
                for item in list {
                    item.visit_columns_mut(f);
                }
            }
        }
    }

    /// Canonical SQL text. Parsing it yields the same tree.
    pub fn to_sql(&self) -> String {
        let mut out = String::new();
        self.write_sql(&mut out, true);
        out
    }

    fn write_sql(&self, out: &mut String, top: bool) {
        let open = |out: &mut String| {
            if !top {
                out.push('(');
            }
        };
        let close = |out: &mut String| {
            if !top {
                out.push(')');
            }
        };
        match self {
            Expression::Literal(v) => out.push_str(&v.to_sql()),
            Expression::Column(col) => out.push_str(&quote_ident(&col.name)),
            Expression::DomainValue => out.push_str("VALUE"),
            Expression::Compare { op, left, right } => {
                open(out);
                left.write_sql(out, false);
                out.push_str(&format!(" {} ", op.as_str()));
                right.write_sql(out, false);
                close(out);
            }
            Expression::Arithmetic { op, left, right } => {
                open(out);
                left.write_sql(out, false);
                out.push_str(&format!(" {} ", op.as_str()));
                right.write_sql(out, false);
                close(out);
            }
            Expression::Negate(e) => {
                out.push_str("-(");
                e.write_sql(out, true);
                out.push(')');
            }
            Expression::And(left, right) | Expression::Or(left, right) => {
                let word = if matches!(self, Expression::And(..)) {
                    " AND "
                } else {
                    " OR "
                };
                open(out);
                left.write_sql(out, false);
                out.push_str(word);
                right.write_sql(out, false);
                close(out);
            }
            Expression::Not(e) => {
                open(out);
                out.push_str("NOT ");
                e.write_sql(out, false);
                close(out);
            }
            Expression::IsNull { expr, negated } => {
                open(out);
                expr.write_sql(out, false);
                out.push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
                close(out);
            }
            Expression::InList {
                expr,
                list,
                negated,
            } => {
                open(out);
                expr.write_sql(out, false);
                out.push_str(if *negated { " NOT IN(" } else { " IN(" });
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.write_sql(out, true);
                }
                out.push(')');
                close(out);
            }
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType};

    fn products() -> Table {
        Table::new("PUBLIC", "PRODUCTS")
            .with_column(Column::new("ID", DataType::Int))
            .with_column(Column::new("PRICE", DataType::Float))
            .with_column(Column::new("DISCOUNT", DataType::Float))
    }

    #[test]
    fn test_canonical_sql() {
        let expr = Expression::parse("price > 0 and (discount is null or discount < price)")
            .unwrap();
        assert_eq!(
            expr.to_sql(),
            r#"("price" > 0) AND (("discount" IS NULL) OR ("discount" < "price"))"#
        );

        let reparsed = Expression::parse(&expr.to_sql()).unwrap();
        assert_eq!(reparsed, expr);
    }

    #[test]
    fn test_bind_and_rebind() {
        let mut table = products();
        let mut expr = Expression::parse(r#""PRICE" >= "DISCOUNT""#).unwrap();
        expr.bind(&table).unwrap();

        let price = table.column_by_name("PRICE").unwrap().id;
        let discount = table.column_by_name("DISCOUNT").unwrap().id;
        assert_eq!(expr.columns(), BTreeSet::from([price, discount]));

        table.column_mut(price).unwrap().name = "UNIT_PRICE".into();
        expr.rebind(&table).unwrap();
        assert_eq!(expr.to_sql(), r#""UNIT_PRICE" >= "DISCOUNT""#);

        table.columns.retain(|c| c.id != discount);
        assert_eq!(expr.rebind(&table), Err(discount));
    }

    #[test]
    fn test_bind_unknown_column() {
        let mut expr = Expression::parse("WEIGHT > 0").unwrap();
        let err = expr.bind(&products()).unwrap_err();
        assert!(matches!(err, Error::Definition(_)));
    }

    #[test]
    fn test_domain_value_detection() {
        let expr = Expression::parse("VALUE IN (1, 2, 3)").unwrap();
        assert!(expr.uses_domain_value());
        assert!(!expr.has_column_refs());
        assert_eq!(expr.to_sql(), "VALUE IN(1, 2, 3)");
    }
}
