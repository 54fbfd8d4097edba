//! Parse tree produced from rule text, before variables are resolved.

/// A boolean-valued node of the parse tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedExpression {
    /// A blank rule or `()`; matches everything.
    Empty,
    Not(Box<ParsedExpression>),
    And(Box<ParsedExpression>, Box<ParsedExpression>),
    Or(Box<ParsedExpression>, Box<ParsedExpression>),
    Include(ParsedTerm),
    Comparison {
        left: ParsedTerm,
        /// Operator text as written, e.g. `>=` or `contains`.
        operator: String,
        right: ParsedTerm,
        /// Byte offset of the operator.
        position: usize,
    },
}

/// A value-producing node of the parse tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedTerm {
    /// `{path}` with the braces removed.
    Variable(String),
    String(String),
    Number(f64),
    Boolean(bool),
    Null,
    Function { name: String, args: Vec<ParsedTerm> },
}
