pub mod ast;

pub use ast::{Evaluator, Expression, ExpressionError};

use ast::Parser;
use std::collections::HashMap;

/// Parses `expression` and evaluates it against `bindings` in one call.
///
/// Parsing cost is paid on every call; keep an [`Expression`] or an
/// [`Evaluator`] around when the same expression is evaluated repeatedly.
pub fn evaluate_expression(
    expression: &str,
    bindings: &HashMap<char, f64>,
) -> Result<f64, ExpressionError> {
    let parsed = Parser::parse_expression(expression)?;
    parsed.evaluate(bindings)
}
