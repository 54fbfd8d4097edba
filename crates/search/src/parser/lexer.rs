//! Tokenizer for rule text.

use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    LeftParen,
    RightParen,
    Comma,
    /// `{profile.givenName}`, holding the path.
    Variable(String),
    String(String),
    Number(f64),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    Include,
    /// A comparison operator, including the `contains` keyword.
    Operator(String),
    /// Any other bare word; only valid as a function name.
    Identifier(String),
    Eof,
}

/// A token and the byte offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub position: usize,
}

fn is_path_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

pub(crate) fn tokenize(text: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(position, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        let kind = match c {
            '(' => {
                chars.next();
                TokenKind::LeftParen
            }
            ')' => {
                chars.next();
                TokenKind::RightParen
            }
            ',' => {
                chars.next();
                TokenKind::Comma
            }
            '{' => {
                chars.next();
                let mut path = String::new();
                loop {
                    match chars.next() {
                        Some((_, '}')) => break,
                        Some((_, ch)) if is_path_char(ch) => path.push(ch),
                        Some((at, ch)) => {
                            return Err(ParseError::new(
                                format!("invalid character '{}' in variable", ch),
                                at,
                            ));
                        }
                        None => return Err(ParseError::new("unterminated variable", position)),
                    }
                }
                if path.is_empty() {
                    return Err(ParseError::new("empty variable", position));
                }
                TokenKind::Variable(path)
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some((_, ch)) if ch == quote => break,
                        Some((_, '\\')) => match chars.next() {
                            Some((_, escaped)) => value.push(escaped),
                            None => {
                                return Err(ParseError::new("unterminated string", position));
                            }
                        },
                        Some((_, ch)) => value.push(ch),
                        None => return Err(ParseError::new("unterminated string", position)),
                    }
                }
                TokenKind::String(value)
            }
            '0'..='9' | '-' => TokenKind::Number(lex_number(&mut chars, position)?),
            '=' => {
                chars.next();
                TokenKind::Operator("=".to_string())
            }
            '!' | '<' | '>' => {
                chars.next();
                let followed_by_eq = matches!(chars.peek(), Some((_, '=')));
                if followed_by_eq {
                    chars.next();
                    TokenKind::Operator(format!("{}=", c))
                } else if c == '!' {
                    return Err(ParseError::new("unexpected character '!'", position));
                } else {
                    TokenKind::Operator(c.to_string())
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        word.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                keyword(word)
            }
            other => {
                return Err(ParseError::new(
                    format!("unexpected character '{}'", other),
                    position,
                ));
            }
        };
        tokens.push(Token { kind, position });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        position: text.len(),
    });
    Ok(tokens)
}

fn keyword(word: String) -> TokenKind {
    match word.to_ascii_lowercase().as_str() {
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "include" => TokenKind::Include,
        "contains" => TokenKind::Operator("contains".to_string()),
        "true" => TokenKind::True,
        "false" => TokenKind::False,
        "null" => TokenKind::Null,
        _ => TokenKind::Identifier(word),
    }
}

fn lex_number(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    position: usize,
) -> Result<f64, ParseError> {
    let mut literal = String::new();
    if let Some(&(_, '-')) = chars.peek() {
        literal.push('-');
        chars.next();
    }
    let mut seen_dot = false;
    let mut digits_after_dot = 0;
    while let Some(&(_, ch)) = chars.peek() {
        if ch.is_ascii_digit() {
            if seen_dot {
                digits_after_dot += 1;
            }
            literal.push(ch);
            chars.next();
        } else if ch == '.' && !seen_dot {
            seen_dot = true;
            literal.push(ch);
            chars.next();
        } else {
            break;
        }
    }
    let starts_with_digit = literal
        .trim_start_matches('-')
        .starts_with(|c: char| c.is_ascii_digit());
    if !starts_with_digit || (seen_dot && digits_after_dot == 0) {
        return Err(ParseError::new(
            format!("invalid number '{}'", literal),
            position,
        ));
    }
    literal
        .parse::<f64>()
        .map_err(|e| ParseError::new(format!("invalid number '{}': {}", literal, e), position))
}
