//! Tokenizer for gating expressions

use crate::ExpressionError;

/// A lexical token with its byte offset in the source.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Number(f64),
    Text(String),
    Bool(bool),
    /// Dotted identifier (`acme.maxSeats`) or bare function name (`min`)
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
    Bang,
    LParen,
    RParen,
    Comma,
}

fn syntax(offset: usize, message: impl Into<String>) -> ExpressionError {
    ExpressionError::Syntax {
        offset,
        message: message.into(),
    }
}

/// Tokenize an expression string.
pub(crate) fn tokenize(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        let start = i;

        match c {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
            }
            '(' => {
                tokens.push(Token { kind: TokenKind::LParen, offset: start });
                i += 1;
            }
            ')' => {
                tokens.push(Token { kind: TokenKind::RParen, offset: start });
                i += 1;
            }
            ',' => {
                tokens.push(Token { kind: TokenKind::Comma, offset: start });
                i += 1;
            }
            '+' => {
                tokens.push(Token { kind: TokenKind::Plus, offset: start });
                i += 1;
            }
            '-' => {
                tokens.push(Token { kind: TokenKind::Minus, offset: start });
                i += 1;
            }
            '*' => {
                tokens.push(Token { kind: TokenKind::Star, offset: start });
                i += 1;
            }
            '/' => {
                tokens.push(Token { kind: TokenKind::Slash, offset: start });
                i += 1;
            }
            '%' => {
                tokens.push(Token { kind: TokenKind::Percent, offset: start });
                i += 1;
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Le, offset: start });
                    i += 2;
                } else {
                    tokens.push(Token { kind: TokenKind::Lt, offset: start });
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::Ge, offset: start });
                    i += 2;
                } else {
                    tokens.push(Token { kind: TokenKind::Gt, offset: start });
                    i += 1;
                }
            }
            '=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::EqEq, offset: start });
                    i += 2;
                } else {
                    return Err(syntax(start, "expected '==', found single '='"));
                }
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push(Token { kind: TokenKind::NotEq, offset: start });
                    i += 2;
                } else {
                    tokens.push(Token { kind: TokenKind::Bang, offset: start });
                    i += 1;
                }
            }
            '&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    tokens.push(Token { kind: TokenKind::AndAnd, offset: start });
                    i += 2;
                } else {
                    return Err(syntax(start, "expected '&&', found single '&'"));
                }
            }
            '|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    tokens.push(Token { kind: TokenKind::OrOr, offset: start });
                    i += 2;
                } else {
                    return Err(syntax(start, "expected '||', found single '|'"));
                }
            }
            '\'' | '"' => {
                let quote = c;
                i += 1;
                let text_start = i;
                while i < bytes.len() && bytes[i] as char != quote {
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err(syntax(start, "unterminated string literal"));
                }
                let text = source[text_start..i].to_string();
                tokens.push(Token { kind: TokenKind::Text(text), offset: start });
                i += 1;
            }
            '0'..='9' => {
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    // A digit must follow each dot, otherwise the dot belongs
                    // to something else (which is a syntax error here anyway).
                    i += 1;
                }
                let literal = &source[start..i];
                let number: f64 = literal
                    .parse()
                    .map_err(|_| syntax(start, format!("invalid number '{literal}'")))?;
                tokens.push(Token { kind: TokenKind::Number(number), offset: start });
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric()
                        || bytes[i] == b'_'
                        || bytes[i] == b'.')
                {
                    i += 1;
                }
                let ident = &source[start..i];
                let kind = match ident {
                    "true" => TokenKind::Bool(true),
                    "false" => TokenKind::Bool(false),
                    _ => TokenKind::Ident(ident.to_string()),
                };
                tokens.push(Token { kind, offset: start });
            }
            other => {
                return Err(syntax(start, format!("unexpected character '{other}'")));
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_operators() {
        let tokens = tokenize("a <= 1 && b != 'x'").unwrap();
        let kinds: Vec<&TokenKind> = tokens.iter().map(|t| &t.kind).collect();
        assert!(matches!(kinds[1], TokenKind::Le));
        assert!(matches!(kinds[3], TokenKind::AndAnd));
        assert!(matches!(kinds[5], TokenKind::NotEq));
        assert!(matches!(kinds[6], TokenKind::Text(s) if s == "x"));
    }

    #[test]
    fn test_tokenize_dotted_identifier() {
        let tokens = tokenize("acme.usage.calls").unwrap();
        assert_eq!(tokens.len(), 1);
        assert!(matches!(&tokens[0].kind, TokenKind::Ident(s) if s == "acme.usage.calls"));
    }

    #[test]
    fn test_tokenize_number_with_decimal() {
        let tokens = tokenize("3.25").unwrap();
        assert!(matches!(tokens[0].kind, TokenKind::Number(n) if n == 3.25));
    }

    #[test]
    fn test_single_equals_rejected() {
        assert!(matches!(
            tokenize("a = 1").unwrap_err(),
            ExpressionError::Syntax { .. }
        ));
    }

    #[test]
    fn test_unterminated_string() {
        assert!(matches!(
            tokenize("'oops").unwrap_err(),
            ExpressionError::Syntax { .. }
        ));
    }
}
