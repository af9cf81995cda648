//! # Pricing Expression Evaluator
//!
//! This crate evaluates feature-gating expressions against a flat variable
//! context, for example:
//!
//! ```text
//! acme.usage.calls < acme.maxCalls
//! min(acme.seats, acme.maxSeats) >= 1
//! acme.plan == 'BASIC' && !acme.trialExpired
//! ```
//!
//! ## Overview
//!
//! Evaluation is a pure function: same expression + same context always
//! yields the same value, with no side effects and no access to outside
//! state. That purity is what allows evaluation results to be cached and
//! reproduced in tests.
//!
//! Supported syntax:
//! - **Literals**: numbers, single- or double-quoted strings, `true`/`false`
//! - **Variables**: dotted identifiers (`service.feature`, `a.usage.calls`)
//! - **Arithmetic**: `+ - * / %`, unary `-`
//! - **Comparison**: `== != < <= > >=`
//! - **Boolean logic**: `&& ||`, unary `!`
//! - **Functions**: `min`, `max` (two or more numeric arguments),
//!   `abs`, `ceil`, `floor` (one numeric argument)
//!
//! References to variables missing from the context fail with
//! [`ExpressionError::UndefinedVariable`]; they are never silently
//! defaulted, since an undefined variable in a pricing expression is a
//! defect in the pricing data.
//!
//! ## Usage
//!
//! ```rust
//! use std::collections::HashMap;
//! use pricing_expr::{evaluate, Value};
//!
//! let mut ctx = HashMap::new();
//! ctx.insert("acme.maxSeats".to_string(), Value::Number(10.0));
//! ctx.insert("acme.usage.seats".to_string(), Value::Number(3.0));
//!
//! let result = evaluate("acme.usage.seats < acme.maxSeats", &ctx).unwrap();
//! assert_eq!(result, Value::Bool(true));
//! ```

mod eval;
mod lexer;
mod parser;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use parser::{BinaryOp, Expr, UnaryOp};

/// A value produced by (or fed into) expression evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean value
    Bool(bool),
    /// Numeric value (all numbers are f64)
    Number(f64),
    /// Text value
    Text(String),
}

impl Value {
    /// Human-readable type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Text(_) => "text",
        }
    }

    /// Whether the value is truthy in a boolean position.
    ///
    /// Only booleans are allowed in boolean positions; anything else is
    /// a type mismatch, reported by the evaluator.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the numeric value, if this is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// Errors raised while parsing or evaluating an expression.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExpressionError {
    /// The expression is not syntactically valid.
    #[error("syntax error at offset {offset}: {message}")]
    Syntax {
        /// Byte offset into the expression string.
        offset: usize,
        /// What went wrong.
        message: String,
    },

    /// A variable was referenced that the context does not define.
    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),

    /// A function was called that is not in the restricted function set.
    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    /// A function was called with the wrong number of arguments.
    #[error("function '{function}' expects {expected} argument(s), got {got}")]
    Arity {
        /// Function name.
        function: String,
        /// Expected argument count description.
        expected: String,
        /// Actual argument count.
        got: usize,
    },

    /// An operator or function was applied to the wrong value type.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// Division or modulo by zero.
    #[error("division by zero")]
    DivisionByZero,
}

/// Parse an expression into its syntax tree.
///
/// Useful when the same expression is evaluated against many contexts.
pub fn parse(expression: &str) -> Result<Expr, ExpressionError> {
    let tokens = lexer::tokenize(expression)?;
    parser::parse_tokens(&tokens)
}

/// Evaluate an expression string against a flat variable context.
///
/// # Arguments
///
/// * `expression` - The expression source
/// * `context` - Flat mapping of dotted variable names to values
///
/// # Errors
///
/// Returns [`ExpressionError`] on syntax errors, undefined variables,
/// unknown functions, type mismatches, and division by zero.
pub fn evaluate(
    expression: &str,
    context: &HashMap<String, Value>,
) -> Result<Value, ExpressionError> {
    let expr = parse(expression)?;
    eval::eval(&expr, context)
}

/// Evaluate an already-parsed expression against a context.
pub fn evaluate_parsed(
    expr: &Expr,
    context: &HashMap<String, Value>,
) -> Result<Value, ExpressionError> {
    eval::eval(expr, context)
}
