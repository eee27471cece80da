//! Sandboxed condition evaluation.
//!
//! Expressions are parsed into a small AST and interpreted over template-context values only.
//! Nothing in a workflow document can reach host code from here.

mod eval;
mod parser;

pub use parser::{CompareOp, Expr, parse_expression};

use idle_types::Condition;

use crate::templates::TemplateContext;

/// Decides whether a step runs. `Always` ignores everything else; `Unless` negates.
pub fn evaluate_condition(condition: &Condition, context: &TemplateContext) -> Result<bool, String> {
    match condition {
        Condition::Always => Ok(true),
        Condition::When(expression) | Condition::Expression(expression) => evaluate_expression(expression, context),
        Condition::Unless(expression) => evaluate_expression(expression, context).map(|result| !result),
    }
}

/// Parses and evaluates a single expression.
pub fn evaluate_expression(expression: &str, context: &TemplateContext) -> Result<bool, String> {
    let parsed = parse_expression(expression)?;
    eval::evaluate(&parsed, context)
}

/// Checks that `expression` parses, without evaluating it.
pub fn validate_expression(expression: &str) -> Result<(), String> {
    parse_expression(expression).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn condition_variants_follow_their_semantics() {
        let context = TemplateContext::from_value(json!({"Request": {"Input": {"Enabled": false}}}));

        assert!(!evaluate_condition(&Condition::When("false".into()), &context).unwrap());
        assert!(evaluate_condition(&Condition::Unless("false".into()), &context).unwrap());
        assert!(evaluate_condition(&Condition::Always, &context).unwrap());
        assert!(!evaluate_condition(&Condition::Expression("Request.Input.Enabled".into()), &context).unwrap());
        assert!(evaluate_condition(&Condition::Unless("Request.Input.Enabled".into()), &context).unwrap());
    }

    #[test]
    fn invalid_expressions_surface_as_errors() {
        let context = TemplateContext::from_value(json!({}));
        assert!(evaluate_condition(&Condition::When("system('ls')".into()), &context).is_err());
        assert!(validate_expression("Request.Input.A == 1").is_ok());
        assert!(validate_expression("Request.Input.A ==").is_err());
    }
}
