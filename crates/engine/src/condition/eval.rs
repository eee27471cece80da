//! Evaluation of parsed condition expressions against a template context.

use std::cmp::Ordering;

use serde_json::Value;

use super::parser::{CompareOp, Expr};
use crate::templates::TemplateContext;

/// Evaluates `expression` to a boolean.
///
/// `&&` and `||` short-circuit. A bare operand must be a boolean (or the strings `"true"` /
/// `"false"`); `null` and missing paths count as false.
pub fn evaluate(expression: &Expr, context: &TemplateContext) -> Result<bool, String> {
    match expression {
        Expr::Or(left, right) => Ok(evaluate(left, context)? || evaluate(right, context)?),
        Expr::And(left, right) => Ok(evaluate(left, context)? && evaluate(right, context)?),
        Expr::Not(inner) => Ok(!evaluate(inner, context)?),
        Expr::Compare(op, left, right) => {
            let left = operand_value(left, context)?;
            let right = operand_value(right, context)?;
            compare(*op, &left, &right)
        }
        Expr::Literal(_) | Expr::Path(_) => truthiness(&operand_value(expression, context)?, expression),
    }
}

fn operand_value(expression: &Expr, context: &TemplateContext) -> Result<Value, String> {
    match expression {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(path) => Ok(context.lookup(path).cloned().unwrap_or(Value::Null)),
        nested => evaluate(nested, context).map(Value::Bool),
    }
}

fn truthiness(value: &Value, expression: &Expr) -> Result<bool, String> {
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::Null => Ok(false),
        Value::String(text) if text.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(text) if text.eq_ignore_ascii_case("false") => Ok(false),
        other => Err(format!(
            "{} resolved to {other}, which is not a boolean; compare it explicitly",
            describe(expression)
        )),
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, String> {
    match op {
        CompareOp::Eq => Ok(loosely_equal(left, right)),
        CompareOp::Ne => Ok(!loosely_equal(left, right)),
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            let ordering = order(left, right)?;
            Ok(match op {
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::Le => ordering != Ordering::Greater,
                CompareOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
    }
}

/// Numbers compare by value regardless of integer/float representation.
fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn order(left: &Value, right: &Value) -> Result<Ordering, String> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let (Some(a), Some(b)) = (a.as_f64(), b.as_f64()) else {
                return Err("numbers cannot be ordered".into());
            };
            a.partial_cmp(&b).ok_or_else(|| "numbers cannot be ordered".to_string())
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(format!("cannot order {left} and {right}; both sides must be numbers or strings")),
    }
}

fn describe(expression: &Expr) -> String {
    match expression {
        Expr::Path(path) => format!("'{path}'"),
        Expr::Literal(value) => format!("literal {value}"),
        _ => "expression".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::parser::parse_expression;
    use serde_json::json;

    fn context() -> TemplateContext {
        TemplateContext::from_value(json!({
            "Request": {
                "Input": {"Enabled": true, "Age": 42, "Name": "jdoe", "Flag": "True", "Manager": null, "Count": 3}
            }
        }))
    }

    fn eval(input: &str) -> Result<bool, String> {
        evaluate(&parse_expression(input)?, &context())
    }

    #[test]
    fn comparisons_and_null_checks() {
        assert!(eval("Request.Input.Name == 'jdoe'").unwrap());
        assert!(eval("Request.Input.Age > 40 && Request.Input.Age <= 42").unwrap());
        assert!(eval("Request.Input.Count == 3.0").unwrap());
        assert!(eval("Request.Input.Manager == null").unwrap());
        assert!(eval("Request.Input.Missing == null").unwrap());
        assert!(eval("Request.Input.Name != null").unwrap());
        assert!(eval("'abc' < 'abd'").unwrap());
    }

    #[test]
    fn bare_operands_must_be_boolean() {
        assert!(eval("Request.Input.Enabled").unwrap());
        assert!(eval("{{Request.Input.Flag}}").unwrap());
        assert!(!eval("Request.Input.Missing").unwrap());
        assert!(!eval("!Request.Input.Enabled").unwrap());
        assert!(eval("Request.Input.Name").unwrap_err().contains("not a boolean"));
    }

    #[test]
    fn ordering_requires_matching_types() {
        assert!(eval("Request.Input.Name > 3").unwrap_err().contains("cannot order"));
    }

    #[test]
    fn logical_operators_short_circuit() {
        assert!(eval("true || Request.Input.Name").unwrap());
        assert!(!eval("false && Request.Input.Name").unwrap());
    }
}
