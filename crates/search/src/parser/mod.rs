//! Recursive-descent parser for search rules.
//!
//! ```text
//! expr     := or
//! or       := and (OR and)*
//! and      := unary (AND unary)*
//! unary    := NOT unary | INCLUDE term | '(' expr? ')' | term OPERATOR term
//! term     := NAME '(' term (',' term)* ')'
//!           | BOOLEAN | STRING | NUMBER | NULL | VARIABLE
//! ```
//!
//! Keywords are case-insensitive. A blank rule parses to
//! [`ParsedExpression::Empty`]. Rules nested deeper than
//! [`MAX_NESTING_DEPTH`] (parentheses, `not`, function calls and chained
//! `and`/`or` operands all count) are rejected.
//!
//! ```
//! use cohort_search::parser::{parse, ParsedExpression};
//!
//! assert_eq!(parse("   ").unwrap(), ParsedExpression::Empty);
//! assert!(parse("{age} >> 3").is_err());
//! ```

pub mod ast;
mod lexer;

pub use ast::{ParsedExpression, ParsedTerm};

use crate::error::ParseError;

use lexer::{Token, TokenKind, tokenize};

/// Deepest nesting a rule may have.
pub const MAX_NESTING_DEPTH: usize = 256;

/// Parses rule text into a parse tree.
pub fn parse(text: &str) -> Result<ParsedExpression, ParseError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        tokens,
        current: 0,
        depth: 0,
    };
    if parser.check(&TokenKind::Eof) {
        return Ok(ParsedExpression::Empty);
    }
    let expression = parser.parse_or()?;
    let trailing = parser.peek();
    if trailing.kind != TokenKind::Eof {
        return Err(ParseError::new(
            format!("unexpected {}", describe(&trailing.kind)),
            trailing.position,
        ));
    }
    Ok(expression)
}

struct Parser {
    tokens: Vec<Token>,
    current: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // The token list always ends with Eof.
        let last = self.tokens.len() - 1;
        &self.tokens[self.current.min(last)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.current < self.tokens.len() - 1 {
            self.current += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<Token, ParseError> {
        if self.check(&kind) {
            Ok(self.advance())
        } else {
            let token = self.peek();
            Err(ParseError::new(
                format!("expected {}, found {}", what, describe(&token.kind)),
                token.position,
            ))
        }
    }

    fn enter(&mut self, position: usize) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::new(
                format!("rule is nested more than {} levels deep", MAX_NESTING_DEPTH),
                position,
            ));
        }
        Ok(())
    }

    // Each chained operand deepens the left-leaning tree by one level.
    fn parse_or(&mut self) -> Result<ParsedExpression, ParseError> {
        let depth = self.depth;
        let mut left = self.parse_and()?;
        while self.check(&TokenKind::Or) {
            let or = self.advance();
            self.enter(or.position)?;
            let right = self.parse_and()?;
            left = ParsedExpression::Or(Box::new(left), Box::new(right));
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<ParsedExpression, ParseError> {
        let depth = self.depth;
        let mut left = self.parse_unary()?;
        while self.check(&TokenKind::And) {
            let and = self.advance();
            self.enter(and.position)?;
            let right = self.parse_unary()?;
            left = ParsedExpression::And(Box::new(left), Box::new(right));
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<ParsedExpression, ParseError> {
        match self.peek().kind {
            TokenKind::Not => {
                let not = self.advance();
                self.enter(not.position)?;
                let operand = self.parse_unary()?;
                self.depth -= 1;
                if operand == ParsedExpression::Empty {
                    return Err(ParseError::new("not requires an operand", not.position));
                }
                Ok(ParsedExpression::Not(Box::new(operand)))
            }
            TokenKind::Include => {
                self.advance();
                Ok(ParsedExpression::Include(self.parse_term()?))
            }
            TokenKind::LeftParen => {
                let open = self.advance();
                if self.check(&TokenKind::RightParen) {
                    self.advance();
                    return Ok(ParsedExpression::Empty);
                }
                self.enter(open.position)?;
                let inner = self.parse_or()?;
                self.depth -= 1;
                self.expect(TokenKind::RightParen, "')'")?;
                Ok(inner)
            }
            _ => self.parse_comparison(),
        }
    }

    fn parse_comparison(&mut self) -> Result<ParsedExpression, ParseError> {
        let left = self.parse_term()?;
        let token = self.advance();
        let operator = match token.kind {
            TokenKind::Operator(operator) => operator,
            other => {
                return Err(ParseError::new(
                    format!("expected operator, found {}", describe(&other)),
                    token.position,
                ));
            }
        };
        let right = self.parse_term()?;
        Ok(ParsedExpression::Comparison {
            left,
            operator,
            right,
            position: token.position,
        })
    }

    fn parse_term(&mut self) -> Result<ParsedTerm, ParseError> {
        let token = self.advance();
        let term = match token.kind {
            TokenKind::Variable(path) => ParsedTerm::Variable(path),
            TokenKind::String(s) => ParsedTerm::String(s),
            TokenKind::Number(n) => ParsedTerm::Number(n),
            TokenKind::True => ParsedTerm::Boolean(true),
            TokenKind::False => ParsedTerm::Boolean(false),
            TokenKind::Null => ParsedTerm::Null,
            TokenKind::Identifier(name) => {
                self.expect(TokenKind::LeftParen, "'(' after function name")?;
                self.enter(token.position)?;
                let mut args = vec![self.parse_term()?];
                while self.check(&TokenKind::Comma) {
                    self.advance();
                    args.push(self.parse_term()?);
                }
                self.depth -= 1;
                self.expect(TokenKind::RightParen, "')'")?;
                ParsedTerm::Function { name, args }
            }
            other => {
                return Err(ParseError::new(
                    format!("expected term, found {}", describe(&other)),
                    token.position,
                ));
            }
        };
        Ok(term)
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::LeftParen => "'('".to_string(),
        TokenKind::RightParen => "')'".to_string(),
        TokenKind::Comma => "','".to_string(),
        TokenKind::Variable(path) => format!("variable {{{}}}", path),
        TokenKind::String(s) => format!("string '{}'", s),
        TokenKind::Number(n) => format!("number {}", n),
        TokenKind::True => "'true'".to_string(),
        TokenKind::False => "'false'".to_string(),
        TokenKind::Null => "'null'".to_string(),
        TokenKind::And => "'and'".to_string(),
        TokenKind::Or => "'or'".to_string(),
        TokenKind::Not => "'not'".to_string(),
        TokenKind::Include => "'include'".to_string(),
        TokenKind::Operator(op) => format!("operator '{}'", op),
        TokenKind::Identifier(name) => format!("identifier '{}'", name),
        TokenKind::Eof => "end of input".to_string(),
    }
}
