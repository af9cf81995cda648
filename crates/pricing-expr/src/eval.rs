//! Tree-walking evaluator

use std::collections::HashMap;

use crate::parser::{BinaryOp, Expr, UnaryOp};
use crate::{ExpressionError, Value};

fn number(value: &Value, what: &str) -> Result<f64, ExpressionError> {
    value.as_number().ok_or_else(|| {
        ExpressionError::TypeMismatch(format!("{what} requires a number, got {}", value.type_name()))
    })
}

fn boolean(value: &Value, what: &str) -> Result<bool, ExpressionError> {
    value.as_bool().ok_or_else(|| {
        ExpressionError::TypeMismatch(format!(
            "{what} requires a boolean, got {}",
            value.type_name()
        ))
    })
}

fn equals(lhs: &Value, rhs: &Value) -> Result<bool, ExpressionError> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => Ok(a == b),
        (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
        (Value::Text(a), Value::Text(b)) => Ok(a == b),
        _ => Err(ExpressionError::TypeMismatch(format!(
            "cannot compare {} with {}",
            lhs.type_name(),
            rhs.type_name()
        ))),
    }
}

/// Evaluate an expression tree against a flat context.
pub(crate) fn eval(
    expr: &Expr,
    context: &HashMap<String, Value>,
) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Text(s) => Ok(Value::Text(s.clone())),

        Expr::Var(name) => context
            .get(name)
            .cloned()
            .ok_or_else(|| ExpressionError::UndefinedVariable(name.clone())),

        Expr::Unary(op, inner) => {
            let value = eval(inner, context)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!boolean(&value, "'!'")?)),
                UnaryOp::Neg => Ok(Value::Number(-number(&value, "unary '-'")?)),
            }
        }

        Expr::Binary(op, lhs, rhs) => {
            // Short-circuit boolean operators before evaluating the rhs.
            if matches!(op, BinaryOp::And | BinaryOp::Or) {
                let left = boolean(&eval(lhs, context)?, "'&&'/'||'")?;
                return match (op, left) {
                    (BinaryOp::And, false) => Ok(Value::Bool(false)),
                    (BinaryOp::Or, true) => Ok(Value::Bool(true)),
                    _ => {
                        let right = boolean(&eval(rhs, context)?, "'&&'/'||'")?;
                        Ok(Value::Bool(right))
                    }
                };
            }

            let left = eval(lhs, context)?;
            let right = eval(rhs, context)?;

            match op {
                BinaryOp::Eq => Ok(Value::Bool(equals(&left, &right)?)),
                BinaryOp::NotEq => Ok(Value::Bool(!equals(&left, &right)?)),
                BinaryOp::Lt => Ok(Value::Bool(
                    number(&left, "'<'")? < number(&right, "'<'")?,
                )),
                BinaryOp::Le => Ok(Value::Bool(
                    number(&left, "'<='")? <= number(&right, "'<='")?,
                )),
                BinaryOp::Gt => Ok(Value::Bool(
                    number(&left, "'>'")? > number(&right, "'>'")?,
                )),
                BinaryOp::Ge => Ok(Value::Bool(
                    number(&left, "'>='")? >= number(&right, "'>='")?,
                )),
                BinaryOp::Add => Ok(Value::Number(
                    number(&left, "'+'")? + number(&right, "'+'")?,
                )),
                BinaryOp::Sub => Ok(Value::Number(
                    number(&left, "'-'")? - number(&right, "'-'")?,
                )),
                BinaryOp::Mul => Ok(Value::Number(
                    number(&left, "'*'")? * number(&right, "'*'")?,
                )),
                BinaryOp::Div => {
                    let divisor = number(&right, "'/'")?;
                    if divisor == 0.0 {
                        return Err(ExpressionError::DivisionByZero);
                    }
                    Ok(Value::Number(number(&left, "'/'")? / divisor))
                }
                BinaryOp::Rem => {
                    let divisor = number(&right, "'%'")?;
                    if divisor == 0.0 {
                        return Err(ExpressionError::DivisionByZero);
                    }
                    Ok(Value::Number(number(&left, "'%'")? % divisor))
                }
                BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
            }
        }

        Expr::Call(name, args) => call(name, args, context),
    }
}

fn call(
    name: &str,
    args: &[Expr],
    context: &HashMap<String, Value>,
) -> Result<Value, ExpressionError> {
    let values: Vec<Value> = args
        .iter()
        .map(|arg| eval(arg, context))
        .collect::<Result<_, _>>()?;

    match name {
        "min" | "max" => {
            if values.len() < 2 {
                return Err(ExpressionError::Arity {
                    function: name.to_string(),
                    expected: "at least 2".to_string(),
                    got: values.len(),
                });
            }
            let mut numbers = Vec::with_capacity(values.len());
            for value in &values {
                numbers.push(number(value, name)?);
            }
            let folded = if name == "min" {
                numbers.into_iter().fold(f64::INFINITY, f64::min)
            } else {
                numbers.into_iter().fold(f64::NEG_INFINITY, f64::max)
            };
            Ok(Value::Number(folded))
        }
        "abs" | "ceil" | "floor" => {
            if values.len() != 1 {
                return Err(ExpressionError::Arity {
                    function: name.to_string(),
                    expected: "exactly 1".to_string(),
                    got: values.len(),
                });
            }
            let n = number(&values[0], name)?;
            let result = match name {
                "abs" => n.abs(),
                "ceil" => n.ceil(),
                _ => n.floor(),
            };
            Ok(Value::Number(result))
        }
        other => Err(ExpressionError::UnknownFunction(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn eval_src(src: &str, context: &HashMap<String, Value>) -> Result<Value, ExpressionError> {
        eval(&parse(src).unwrap(), context)
    }

    #[test]
    fn test_short_circuit_skips_rhs_errors() {
        let empty = HashMap::new();
        // rhs references an undefined variable but is never evaluated
        assert_eq!(
            eval_src("false && ghost.var", &empty).unwrap(),
            Value::Bool(false)
        );
        assert_eq!(
            eval_src("true || ghost.var", &empty).unwrap(),
            Value::Bool(true)
        );
    }

    #[test]
    fn test_min_max_arity() {
        let empty = HashMap::new();
        assert!(matches!(
            eval_src("min(1)", &empty).unwrap_err(),
            ExpressionError::Arity { .. }
        ));
    }

    #[test]
    fn test_modulo_by_zero() {
        let empty = HashMap::new();
        assert_eq!(
            eval_src("5 % 0", &empty).unwrap_err(),
            ExpressionError::DivisionByZero
        );
    }
}
