use std::collections::HashSet;
use std::fmt;

mod evaluator;
mod parser;

pub use evaluator::Evaluator;
pub use parser::ExpressionParser as Parser;

use thiserror::Error;

/// Maximum parenthesis-nesting depth accepted at construction; also the
/// recursion budget enforced defensively during evaluation.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("`{0}` cannot be evaluated")]
    InvalidComponent(String),

    #[error("'{0}' has not been given a value")]
    UndefinedVariable(char),

    #[error("division by zero took place")]
    ValueUndefined,

    #[error("malformed expression: {0}")]
    MalformedExpression(String),

    #[error("recursion limit of {0} exceeded")]
    RecursionLimitExceeded(usize),
}

/// The unary functions of the grammar. Trigonometric operands are in degrees.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MathFunction {
    Sin,
    Cos,
    Tan,
    Abs,
}

impl MathFunction {
    pub fn apply(&self, operand: f64) -> f64 {
        match self {
            MathFunction::Sin => operand.to_radians().sin(),
            MathFunction::Cos => operand.to_radians().cos(),
            MathFunction::Tan => operand.to_radians().tan(),
            MathFunction::Abs => operand.abs(),
        }
    }
}

impl TryFrom<&str> for MathFunction {
    type Error = ExpressionError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "sin" => Ok(MathFunction::Sin),
            "cos" => Ok(MathFunction::Cos),
            "tan" => Ok(MathFunction::Tan),
            "abs" => Ok(MathFunction::Abs),
            _ => Err(ExpressionError::MalformedExpression(format!(
                "unknown function: {}",
                value
            ))),
        }
    }
}

/// Operator between the components of a term.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FactorOp {
    Multiply,
    Divide,
}

impl FactorOp {
    pub fn apply(&self, left: f64, right: f64) -> Result<f64, ExpressionError> {
        match self {
            FactorOp::Multiply => Ok(left * right),
            FactorOp::Divide => {
                if right == 0.0 {
                    Err(ExpressionError::ValueUndefined)
                } else {
                    Ok(left / right)
                }
            }
        }
    }
}

impl TryFrom<&str> for FactorOp {
    type Error = ExpressionError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "*" => Ok(FactorOp::Multiply),
            "/" => Ok(FactorOp::Divide),
            _ => Err(ExpressionError::MalformedExpression(format!(
                "unknown operator: {}",
                value
            ))),
        }
    }
}

/// The smallest evaluable unit within a term, classified once at
/// construction time.
#[derive(Debug, Clone, PartialEq)]
pub enum Component {
    Literal(f64),
    Variable(char),
    FunctionCall {
        function: MathFunction,
        operand: Box<Component>,
    },
    /// Index into the owning node's `groups` list.
    SubExpression(usize),
    Power {
        base: Box<Component>,
        exponent: Box<Component>,
    },
}

/// One additively-combined, signed piece of an expression: a chain of
/// components joined by `*`/`/`, evaluated left to right.
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub positive: bool,
    pub first: Component,
    pub rest: Vec<(FactorOp, Component)>,
}

/// One parenthesis-nesting level of a compiled expression.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExpressionNode {
    /// The substring this node was built from.
    pub raw: String,
    pub terms: Vec<Term>,
    /// Arena indices of this node's parenthesis groups, in encounter order.
    /// `Component::SubExpression(n)` resolves through this list.
    pub groups: Vec<usize>,
    /// Variables referenced directly in this node.
    pub variables: HashSet<char>,
}

/// A compiled expression, reusable across any number of evaluations.
///
/// Nodes form an arena; node 0 is the root and every parenthesis group of
/// the source text is a child node. Instances are immutable after
/// construction and safe to evaluate concurrently.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub(crate) nodes: Vec<ExpressionNode>,
}

impl Expression {
    pub fn parse(input: &str) -> Result<Self, ExpressionError> {
        Parser::parse_expression(input)
    }

    /// The text the expression was built from.
    pub fn raw(&self) -> &str {
        &self.nodes[0].raw
    }

    /// Every variable referenced anywhere in the tree.
    pub fn variables(&self) -> HashSet<char> {
        self.nodes
            .iter()
            .flat_map(|node| node.variables.iter().copied())
            .collect()
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw())
    }
}
