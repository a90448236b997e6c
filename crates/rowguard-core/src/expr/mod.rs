//! Constraint predicates: lexing, parsing, and three-valued evaluation.

mod error;
mod evaluator;
mod expression;
pub(crate) mod lexer;
pub(crate) mod parser;

pub use error::{EvaluationError, ParseError, Span};
pub use evaluator::{EvalInput, ExpressionEvaluator, PredicateEvaluator, Truth};
pub use expression::{ArithOp, ColumnRef, CompareOp, Expression};
