//! Three-valued predicate evaluation.

use std::cmp::Ordering;

use crate::error::Error;
use crate::session::Session;
use crate::storage::Row;
use crate::value::Value;

use super::error::EvaluationError;
use super::expression::{ArithOp, CompareOp, ColumnRef, Expression};

/// SQL truth value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    True,
    False,
    Unknown,
}

impl Truth {
    pub fn from_bool(b: bool) -> Self {
        if b {
            Truth::True
        } else {
            Truth::False
        }
    }

    pub fn and(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    pub fn or(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::False, Truth::False) => Truth::False,
            _ => Truth::Unknown,
        }
    }

    pub fn not(self) -> Truth {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Truth::True => Value::Bool(true),
            Truth::False => Value::Bool(false),
            Truth::Unknown => Value::Null,
        }
    }

    fn from_value(value: &Value) -> Result<Truth, EvaluationError> {
        match value {
            Value::Bool(b) => Ok(Truth::from_bool(*b)),
            Value::Null => Ok(Truth::Unknown),
            other => Err(EvaluationError::NotBoolean(other.type_name())),
        }
    }
}

/// What a predicate is evaluated against.
#[derive(Debug, Clone, Copy)]
pub enum EvalInput<'a> {
    /// A table row; column references read from it.
    Row(&'a Row),
    /// A single domain value; `VALUE` reads it.
    Value(&'a Value),
}

/// Evaluates a predicate against a row or domain value.
pub trait PredicateEvaluator: Send + Sync {
    fn evaluate(
        &self,
        session: &Session,
        expr: &Expression,
        input: EvalInput<'_>,
    ) -> Result<Truth, Error>;
}

/// Tree-walking evaluator for [`Expression`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self
    }

    fn eval(&self, expr: &Expression, input: EvalInput<'_>) -> Result<Value, EvaluationError> {
        match expr {
            Expression::Literal(v) => Ok(v.clone()),
            Expression::Column(col) => self.column_value(col, input),
            Expression::DomainValue => match input {
                EvalInput::Value(v) => Ok(v.clone()),
                EvalInput::Row(_) => Err(EvaluationError::NoDomainValue),
            },
            Expression::Compare { op, left, right } => {
                let l = self.eval(left, input)?;
                let r = self.eval(right, input)?;
                Ok(compare(*op, &l, &r)?.into_value())
            }
            Expression::Arithmetic { op, left, right } => {
                let l = self.eval(left, input)?;
                let r = self.eval(right, input)?;
                arithmetic(*op, &l, &r)
            }
            Expression::Negate(inner) => match self.eval(inner, input)? {
                Value::Null => Ok(Value::Null),
                Value::Int(i) => i.checked_neg().map(Value::Int).ok_or(EvaluationError::Overflow),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(EvaluationError::TypeMismatch {
                    op: "-",
                    left: other.type_name(),
                    right: other.type_name(),
                }),
            },
            Expression::And(left, right) => {
                let l = self.truth(left, input)?;
                if l == Truth::False {
                    return Ok(Value::Bool(false));
                }
                Ok(l.and(self.truth(right, input)?).into_value())
            }
            Expression::Or(left, right) => {
                let l = self.truth(left, input)?;
                if l == Truth::True {
                    return Ok(Value::Bool(true));
                }
                Ok(l.or(self.truth(right, input)?).into_value())
            }
            Expression::Not(inner) => Ok(self.truth(inner, input)?.not().into_value()),
            Expression::IsNull { expr, negated } => {
                let is_null = self.eval(expr, input)?.is_null();
                Ok(Value::Bool(is_null != *negated))
            }
            Expression::InList {
                expr,
                list,
                negated,
            } => {
                let needle = self.eval(expr, input)?;
                let mut result = Truth::False;
                if needle.is_null() {
                    result = Truth::Unknown;
                } else {
                    for item in list {
                        let candidate = self.eval(item, input)?;
                        match compare(CompareOp::Eq, &needle, &candidate)? {
                            Truth::True => {
                                result = Truth::True;
                                break;
                            }
                            Truth::Unknown => result = Truth::Unknown,
                            Truth::False => {}
                        }
                    }
                }
                let result = if *negated { result.not() } else { result };
                Ok(result.into_value())
            }
        }
    }

    fn truth(&self, expr: &Expression, input: EvalInput<'_>) -> Result<Truth, EvaluationError> {
        Truth::from_value(&self.eval(expr, input)?)
    }

    fn column_value(&self, col: &ColumnRef, input: EvalInput<'_>) -> Result<Value, EvaluationError> {
        let EvalInput::Row(row) = input else {
            return Err(EvaluationError::UnboundColumn(col.name.clone()));
        };
        let position = col
            .position
            .ok_or_else(|| EvaluationError::UnboundColumn(col.name.clone()))?;
        row.values
            .get(position)
            .cloned()
            .ok_or_else(|| EvaluationError::ColumnOutOfRange {
                name: col.name.clone(),
                position,
            })
    }
}

impl PredicateEvaluator for ExpressionEvaluator {
    fn evaluate(
        &self,
        session: &Session,
        expr: &Expression,
        input: EvalInput<'_>,
    ) -> Result<Truth, Error> {
        session.check_canceled()?;
        Ok(self.truth(expr, input)?)
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<Truth, EvaluationError> {
    if left.is_null() || right.is_null() {
        return Ok(Truth::Unknown);
    }
    let ordering = left
        .compare(right)
        .ok_or(EvaluationError::TypeMismatch {
            op: op.as_str(),
            left: left.type_name(),
            right: right.type_name(),
        })?;
    let result = match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
    };
    Ok(Truth::from_bool(result))
}

fn arithmetic(op: ArithOp, left: &Value, right: &Value) -> Result<Value, EvaluationError> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int(a), Value::Int(b)) => {
            let result = match op {
                ArithOp::Add => a.checked_add(*b),
                ArithOp::Sub => a.checked_sub(*b),
                ArithOp::Mul => a.checked_mul(*b),
                ArithOp::Div => {
                    if *b == 0 {
                        return Err(EvaluationError::DivisionByZero);
                    }
                    a.checked_div(*b)
                }
            };
            result.map(Value::Int).ok_or(EvaluationError::Overflow)
        }
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let a = as_f64(left);
            let b = as_f64(right);
            let result = match op {
                ArithOp::Add => a + b,
                ArithOp::Sub => a - b,
                ArithOp::Mul => a * b,
                ArithOp::Div => {
                    if b == 0.0 {
                        return Err(EvaluationError::DivisionByZero);
                    }
                    a / b
                }
            };
            Ok(Value::Float(result))
        }
        (Value::Text(a), Value::Text(b)) if op == ArithOp::Add => Ok(Value::Text(format!("{a}{b}"))),
        _ => Err(EvaluationError::TypeMismatch {
            op: op.as_str(),
            left: left.type_name(),
            right: right.type_name(),
        }),
    }
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Int(i) => *i as f64,
        Value::Float(f) => *f,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType, Table};
    use crate::storage::RowKey;

    fn eval_row(source: &str, values: Vec<Value>) -> Result<Truth, Error> {
        let table = Table::new("PUBLIC", "T")
            .with_column(Column::new("A", DataType::Int))
            .with_column(Column::new("B", DataType::Int))
            .with_column(Column::new("NAME", DataType::Text));
        let mut expr = Expression::parse(source).unwrap();
        expr.bind(&table).unwrap();
        let row = Row::new(RowKey(1), values);
        ExpressionEvaluator.evaluate(&Session::new(1), &expr, EvalInput::Row(&row))
    }

    #[test]
    fn test_comparisons() {
        let row = || vec![Value::Int(5), Value::Int(3), Value::from("x")];
        assert_eq!(eval_row("A > B", row()).unwrap(), Truth::True);
        assert_eq!(eval_row("A + B = 8", row()).unwrap(), Truth::True);
        assert_eq!(eval_row("A / 2 = 2", row()).unwrap(), Truth::True);
        assert_eq!(eval_row("NAME <> 'x'", row()).unwrap(), Truth::False);
    }

    #[test]
    fn test_null_yields_unknown() {
        let row = || vec![Value::Int(5), Value::Null, Value::Null];
        assert_eq!(eval_row("A > B", row()).unwrap(), Truth::Unknown);
        assert_eq!(eval_row("A > B OR A = 5", row()).unwrap(), Truth::True);
        assert_eq!(eval_row("A > B AND A = 4", row()).unwrap(), Truth::False);
        assert_eq!(eval_row("NOT (B = 1)", row()).unwrap(), Truth::Unknown);
        assert_eq!(eval_row("B IS NULL", row()).unwrap(), Truth::True);
        assert_eq!(eval_row("A IN (1, NULL)", row()).unwrap(), Truth::Unknown);
        assert_eq!(eval_row("A NOT IN (1, 2)", row()).unwrap(), Truth::True);
    }

    #[test]
    fn test_evaluation_errors() {
        let row = || vec![Value::Int(5), Value::Int(0), Value::from("x")];
        assert!(matches!(
            eval_row("A / B > 1", row()),
            Err(Error::Evaluation(EvaluationError::DivisionByZero))
        ));
        assert!(matches!(
            eval_row("NAME > 1", row()),
            Err(Error::Evaluation(EvaluationError::TypeMismatch { .. }))
        ));
        assert!(matches!(
            eval_row("A", row()),
            Err(Error::Evaluation(EvaluationError::NotBoolean(_)))
        ));
    }

    #[test]
    fn test_domain_value() {
        let expr = Expression::parse("VALUE >= 0").unwrap();
        let session = Session::new(1);
        let eval = ExpressionEvaluator::new();
        assert_eq!(
            eval.evaluate(&session, &expr, EvalInput::Value(&Value::Int(-1)))
                .unwrap(),
            Truth::False
        );
        assert_eq!(
            eval.evaluate(&session, &expr, EvalInput::Value(&Value::Null))
                .unwrap(),
            Truth::Unknown
        );
    }

    #[test]
    fn test_canceled_session() {
        let session = Session::new(7);
        session.cancel();
        let expr = Expression::parse("1 = 1").unwrap();
        let err = ExpressionEvaluator
            .evaluate(&session, &expr, EvalInput::Value(&Value::Null))
            .unwrap_err();
        assert!(matches!(err, Error::Interrupted { session: 7, .. }));
    }
}
