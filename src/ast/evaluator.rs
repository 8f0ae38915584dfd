use crate::ast::{
    Component, Expression, ExpressionError, ExpressionNode, Parser, Term, MAX_DEPTH,
};
use log::debug;
use lru::LruCache;
use rayon::prelude::*;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

impl Expression {
    /// Evaluates the expression against the given variable bindings.
    ///
    /// # Arguments
    ///
    /// * `bindings` - A reference to a `HashMap` from single-character
    ///   variable name to numeric value.
    ///
    /// # Returns
    ///
    /// * `Ok(f64)` if the evaluation succeeds.
    /// * `Err(ExpressionError)` if a variable is unbound or a division by
    ///   zero occurs.
    pub fn evaluate(&self, bindings: &HashMap<char, f64>) -> Result<f64, ExpressionError> {
        self.evaluate_node(0, bindings, 0)
    }

    /// Sums the node's terms in order; the first failing term aborts the
    /// whole evaluation.
    fn evaluate_node(
        &self,
        index: usize,
        bindings: &HashMap<char, f64>,
        depth: usize,
    ) -> Result<f64, ExpressionError> {
        if depth > MAX_DEPTH {
            return Err(ExpressionError::RecursionLimitExceeded(MAX_DEPTH));
        }

        let node = &self.nodes[index];
        let mut value = 0.0;
        for term in &node.terms {
            value += self.evaluate_term(node, term, bindings, depth)?;
        }
        Ok(value)
    }

    fn evaluate_term(
        &self,
        node: &ExpressionNode,
        term: &Term,
        bindings: &HashMap<char, f64>,
        depth: usize,
    ) -> Result<f64, ExpressionError> {
        let mut value = self.evaluate_component(node, &term.first, bindings, depth)?;
        for (op, component) in &term.rest {
            let operand = self.evaluate_component(node, component, bindings, depth)?;
            value = op.apply(value, operand)?;
        }
        Ok(if term.positive { value } else { -value })
    }

    fn evaluate_component(
        &self,
        node: &ExpressionNode,
        component: &Component,
        bindings: &HashMap<char, f64>,
        depth: usize,
    ) -> Result<f64, ExpressionError> {
        match component {
            Component::Literal(value) => Ok(*value),

            Component::Variable(name) => bindings
                .get(name)
                .copied()
                .ok_or(ExpressionError::UndefinedVariable(*name)),

            Component::Power { base, exponent } => {
                let base = self.evaluate_component(node, base, bindings, depth)?;
                let exponent = self.evaluate_component(node, exponent, bindings, depth)?;
                // A zero base with a negative exponent is a division by zero.
                if base == 0.0 && exponent < 0.0 {
                    return Err(ExpressionError::ValueUndefined);
                }
                Ok(base.powf(exponent))
            }

            Component::FunctionCall { function, operand } => {
                let operand = self.evaluate_component(node, operand, bindings, depth)?;
                Ok(function.apply(operand))
            }

            Component::SubExpression(local) => {
                let child = node.groups.get(*local).copied().ok_or_else(|| {
                    ExpressionError::InvalidComponent(format!("sub-expression #{}", local))
                })?;
                self.evaluate_node(child, bindings, depth + 1)
            }
        }
    }
}

/// A parsing front end that caches compiled expressions so repeated
/// evaluations of the same string skip the parse.
pub struct Evaluator {
    cache: LruCache<String, Arc<Expression>>,
}

impl Evaluator {
    /// Creates a new `Evaluator` with a given maximum cache size.
    pub fn new(max_cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(max_cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
        }
    }

    /// Parses an expression, reusing the cached form when available.
    pub fn parse_expression(
        &mut self,
        expression: &str,
    ) -> Result<Arc<Expression>, ExpressionError> {
        if let Some(parsed) = self.cache.get(expression) {
            debug!("cache hit for: {}", expression);
            return Ok(Arc::clone(parsed));
        }
        let parsed = Arc::new(Parser::parse_expression(expression)?);
        self.cache.put(expression.to_string(), Arc::clone(&parsed));
        Ok(parsed)
    }

    /// Parses (or fetches) an expression and evaluates it in one call.
    pub fn evaluate_expression(
        &mut self,
        expression: &str,
        bindings: &HashMap<char, f64>,
    ) -> Result<f64, ExpressionError> {
        self.parse_expression(expression)?.evaluate(bindings)
    }

    /// Evaluates one expression against many binding sets in parallel.
    /// Results are per binding set; one failing set does not abort the rest.
    pub fn evaluate_batch(
        &mut self,
        expression: &str,
        bindings: &[HashMap<char, f64>],
    ) -> Result<Vec<Result<f64, ExpressionError>>, ExpressionError> {
        let parsed = self.parse_expression(expression)?;
        Ok(bindings
            .par_iter()
            .map(|binding| parsed.evaluate(binding))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluate(expression: &str, bindings: &HashMap<char, f64>) -> Result<f64, ExpressionError> {
        Expression::parse(expression).unwrap().evaluate(bindings)
    }

    #[test]
    fn test_constant_arithmetic() {
        let bindings = HashMap::new();
        assert_eq!(evaluate("2 + 3 * 4", &bindings).unwrap(), 14.0);
        assert_eq!(evaluate("2 - 3 - 4", &bindings).unwrap(), -5.0);
        assert_eq!(evaluate("8 / 2 / 2", &bindings).unwrap(), 2.0);
        assert_eq!(evaluate("2 * 3 / 4", &bindings).unwrap(), 1.5);
    }

    #[test]
    fn test_exponent_binds_inside_term() {
        let bindings = HashMap::new();
        assert_eq!(evaluate("2 ^ 3 + 1", &bindings).unwrap(), 9.0);
        assert_eq!(evaluate("2 ^ 3 * 2", &bindings).unwrap(), 16.0);
        assert_eq!(evaluate("2 ^ -1", &bindings).unwrap(), 0.5);
    }

    #[test]
    fn test_group_precedence() {
        let bindings = HashMap::new();
        assert_eq!(evaluate("( 1 + 2 ) * 3", &bindings).unwrap(), 9.0);
        assert_eq!(
            evaluate("( 10 + 20 ) * 3 / ( 4 - 1 ) + 5", &bindings).unwrap(),
            35.0
        );
    }

    #[test]
    fn test_trig_functions_take_degrees() {
        let bindings = HashMap::new();
        assert!((evaluate("sin ( 90 )", &bindings).unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(evaluate("cos ( 0 )", &bindings).unwrap(), 1.0);
        assert!((evaluate("tan ( 45 )", &bindings).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_abs() {
        let bindings = HashMap::new();
        assert_eq!(evaluate("abs ( 0 - 5 )", &bindings).unwrap(), 5.0);
        assert_eq!(evaluate("abs ( 5 )", &bindings).unwrap(), 5.0);
    }

    #[test]
    fn test_nested_functions() {
        let bindings = HashMap::new();
        let value = evaluate("abs ( sin ( 0 - 90 ) )", &bindings).unwrap();
        assert!((value - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_function_applied_to_variable() {
        let bindings = HashMap::from([('x', 90.0)]);
        assert!((evaluate("sin x", &bindings).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_variable_bindings() {
        let bindings = HashMap::from([('x', 3.0), ('y', 1.0)]);
        assert_eq!(evaluate("x ^ 2 + y", &bindings).unwrap(), 10.0);
        assert_eq!(evaluate("2 * ( y - 1 ) + 3 * x", &bindings).unwrap(), 9.0);
    }

    #[test]
    fn test_leading_negative_term() {
        let bindings = HashMap::from([('x', 3.0)]);
        assert_eq!(evaluate("-x + 2", &bindings).unwrap(), -1.0);
    }

    #[test]
    fn test_undefined_variable() {
        let bindings = HashMap::from([('x', 1.0)]);
        assert_eq!(
            evaluate("x + y", &bindings),
            Err(ExpressionError::UndefinedVariable('y'))
        );
    }

    #[test]
    fn test_division_by_zero_literal() {
        let bindings = HashMap::new();
        assert_eq!(
            evaluate("1 / 0", &bindings),
            Err(ExpressionError::ValueUndefined)
        );
    }

    #[test]
    fn test_division_by_zero_in_sub_expression() {
        let bindings = HashMap::from([('x', 5.0)]);
        assert_eq!(
            evaluate("1 / ( x - x )", &bindings),
            Err(ExpressionError::ValueUndefined)
        );
    }

    #[test]
    fn test_zero_base_negative_exponent() {
        let bindings = HashMap::new();
        assert_eq!(
            evaluate("0 ^ -1", &bindings),
            Err(ExpressionError::ValueUndefined)
        );
    }

    #[test]
    fn test_determinism() {
        let bindings = HashMap::from([('x', 0.3), ('y', 7.1)]);
        let first = evaluate("x ^ 2 + y / 3 - sin ( x )", &bindings).unwrap();
        let second = evaluate("x ^ 2 + y / 3 - sin ( x )", &bindings).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_evaluation_does_not_mutate() {
        let expr = Expression::parse("x * ( y + 1 )").unwrap();
        let before = expr.clone();
        let bindings = HashMap::from([('x', 2.0), ('y', 3.0)]);
        assert_eq!(expr.evaluate(&bindings).unwrap(), 8.0);
        assert_eq!(expr.evaluate(&bindings).unwrap(), 8.0);
        assert_eq!(expr, before);
    }

    #[test]
    fn test_reevaluation_with_different_bindings() {
        let expr = Expression::parse("2 * x + 1").unwrap();
        assert_eq!(expr.evaluate(&HashMap::from([('x', 1.0)])).unwrap(), 3.0);
        assert_eq!(expr.evaluate(&HashMap::from([('x', 10.0)])).unwrap(), 21.0);
    }

    #[test]
    fn test_display_reproduces_source_text() {
        let expr = Expression::parse("( 1 + 2 ) * 3").unwrap();
        assert_eq!(expr.to_string(), "( 1 + 2 ) * 3");
    }

    #[test]
    fn test_evaluator_caches_parsed_expressions() {
        let mut evaluator = Evaluator::new(16);
        let first = evaluator.parse_expression("x + 1").unwrap();
        let second = evaluator.parse_expression("x + 1").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_evaluator_evaluate_expression() {
        let mut evaluator = Evaluator::new(16);
        let bindings = HashMap::from([('x', 2.0)]);
        assert_eq!(
            evaluator.evaluate_expression("x ^ 3 + 1", &bindings).unwrap(),
            9.0
        );
        assert_eq!(
            evaluator
                .evaluate_expression("x ^ 3 + 1", &HashMap::from([('x', 3.0)]))
                .unwrap(),
            28.0
        );
    }

    #[test]
    fn test_evaluator_reports_parse_failures() {
        let mut evaluator = Evaluator::new(16);
        let result = evaluator.evaluate_expression("2 ^ 2 ^ 2", &HashMap::new());
        assert!(matches!(
            result,
            Err(ExpressionError::MalformedExpression(_))
        ));
    }

    #[test]
    fn test_batch_evaluation() {
        let mut evaluator = Evaluator::new(16);
        let bindings: Vec<_> = (1..=4)
            .map(|i| HashMap::from([('x', i as f64)]))
            .collect();
        let results = evaluator.evaluate_batch("x ^ 2", &bindings).unwrap();
        assert_eq!(
            results,
            vec![Ok(1.0), Ok(4.0), Ok(9.0), Ok(16.0)]
        );
    }

    #[test]
    fn test_batch_evaluation_isolates_failures() {
        let mut evaluator = Evaluator::new(16);
        let bindings = vec![
            HashMap::from([('x', 2.0)]),
            HashMap::new(),
            HashMap::from([('x', 4.0)]),
        ];
        let results = evaluator.evaluate_batch("1 + x", &bindings).unwrap();
        assert_eq!(results[0], Ok(3.0));
        assert_eq!(results[1], Err(ExpressionError::UndefinedVariable('x')));
        assert_eq!(results[2], Ok(5.0));
    }

    #[test]
    fn test_shared_expression_across_threads() {
        let expr = Expression::parse("x * 2 + ( x - 1 )").unwrap();
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let expr = &expr;
                    scope.spawn(move || {
                        let bindings = HashMap::from([('x', i as f64)]);
                        expr.evaluate(&bindings).unwrap()
                    })
                })
                .collect();
            for (i, handle) in handles.into_iter().enumerate() {
                assert_eq!(handle.join().unwrap(), i as f64 * 2.0 + (i as f64 - 1.0));
            }
        });
    }
}
