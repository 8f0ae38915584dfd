use crate::ast::{
    Component, Expression, ExpressionError, ExpressionNode, FactorOp, MathFunction, Term, MAX_DEPTH,
};
use log::debug;
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use std::collections::HashSet;

#[derive(Parser)]
#[grammar = "./expression.pest"] // Link to the grammar file
pub struct ExpressionParser;

impl ExpressionParser {
    /// Parses an expression string into its compiled form.
    ///
    /// Parenthesis groups become child nodes in the arena; every value
    /// token is classified here, so evaluation never re-inspects text.
    pub fn parse_expression(input: &str) -> Result<Expression, ExpressionError> {
        debug!("parsing expression: {}", input);
        let equation = ExpressionParser::parse(Rule::equation, input)
            .map_err(|e| ExpressionError::MalformedExpression(e.to_string()))?
            .next()
            .ok_or_else(|| {
                ExpressionError::MalformedExpression("empty parse result".to_string())
            })?;

        let root = equation.into_inner().next().ok_or_else(|| {
            ExpressionError::MalformedExpression("empty expression".to_string())
        })?;
        debug!("parse tree: {:?}", root);

        let mut nodes = Vec::new();
        Self::build_expression(root, &mut nodes, 0)?;
        Ok(Expression { nodes })
    }

    fn build_expression(
        pair: Pair<Rule>,
        nodes: &mut Vec<ExpressionNode>,
        depth: usize,
    ) -> Result<usize, ExpressionError> {
        if depth > MAX_DEPTH {
            return Err(ExpressionError::MalformedExpression(format!(
                "nesting deeper than {} levels",
                MAX_DEPTH
            )));
        }

        let index = nodes.len();
        nodes.push(ExpressionNode {
            // Spans can carry implicit trailing whitespace; keep tokens only.
            raw: pair.as_str().trim().to_string(),
            ..ExpressionNode::default()
        });

        let mut terms = Vec::new();
        let mut groups = Vec::new();
        let mut variables = HashSet::new();

        let mut pairs = pair.into_inner().peekable();
        let mut positive = !matches!(pairs.peek().map(|p| p.as_rule()), Some(Rule::MINUS));
        if !positive {
            pairs.next();
        }
        while let Some(term_pair) = pairs.next() {
            terms.push(Self::build_term(
                term_pair,
                positive,
                nodes,
                &mut groups,
                &mut variables,
                depth,
            )?);
            match pairs.next() {
                Some(op) => positive = op.as_rule() == Rule::PLUS,
                None => break,
            }
        }

        let node = &mut nodes[index];
        node.terms = terms;
        node.groups = groups;
        node.variables = variables;
        Ok(index)
    }

    fn build_term(
        pair: Pair<Rule>,
        positive: bool,
        nodes: &mut Vec<ExpressionNode>,
        groups: &mut Vec<usize>,
        variables: &mut HashSet<char>,
        depth: usize,
    ) -> Result<Term, ExpressionError> {
        let mut pairs = pair.into_inner();
        let first = Self::build_factor(pairs.next().unwrap(), nodes, groups, variables, depth)?;

        let mut rest = Vec::new();
        while let Some(op_pair) = pairs.next() {
            let op: FactorOp = op_pair.as_str().try_into()?;
            let component =
                Self::build_factor(pairs.next().unwrap(), nodes, groups, variables, depth)?;
            rest.push((op, component));
        }

        Ok(Term {
            positive,
            first,
            rest,
        })
    }

    fn build_factor(
        pair: Pair<Rule>,
        nodes: &mut Vec<ExpressionNode>,
        groups: &mut Vec<usize>,
        variables: &mut HashSet<char>,
        depth: usize,
    ) -> Result<Component, ExpressionError> {
        let mut pairs = pair.into_inner();
        let base = Self::build_base(pairs.next().unwrap(), nodes, groups, variables, depth)?;

        match pairs.next() {
            Some(op) if op.as_rule() == Rule::CARET => {
                let exponent =
                    Self::build_base(pairs.next().unwrap(), nodes, groups, variables, depth)?;
                Ok(Component::Power {
                    base: Box::new(base),
                    exponent: Box::new(exponent),
                })
            }
            _ => Ok(base),
        }
    }

    fn build_base(
        pair: Pair<Rule>,
        nodes: &mut Vec<ExpressionNode>,
        groups: &mut Vec<usize>,
        variables: &mut HashSet<char>,
        depth: usize,
    ) -> Result<Component, ExpressionError> {
        let inner = pair.into_inner().next().unwrap();
        match inner.as_rule() {
            Rule::function_call => {
                let mut pairs = inner.into_inner();
                let function = MathFunction::try_from(pairs.next().unwrap().as_str())?;
                let operand =
                    Self::build_factor(pairs.next().unwrap(), nodes, groups, variables, depth)?;
                Ok(Component::FunctionCall {
                    function,
                    operand: Box::new(operand),
                })
            }
            Rule::group => {
                let expression = inner.into_inner().next().unwrap();
                let child = Self::build_expression(expression, nodes, depth + 1)?;
                groups.push(child);
                Ok(Component::SubExpression(groups.len() - 1))
            }
            Rule::value => Self::build_value(inner.as_str(), variables),
            rule => Err(ExpressionError::MalformedExpression(format!(
                "unexpected rule in base: {:?}",
                rule
            ))),
        }
    }

    fn build_value(
        text: &str,
        variables: &mut HashSet<char>,
    ) -> Result<Component, ExpressionError> {
        let mut chars = text.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if c.is_ascii_alphabetic() {
                variables.insert(c);
                return Ok(Component::Variable(c));
            }
        }
        text.parse::<f64>()
            .map(Component::Literal)
            .map_err(|_| ExpressionError::InvalidComponent(text.to_string()))
    }
}
