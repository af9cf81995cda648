//! Precedence-climbing parser for gating expressions

use crate::lexer::{Token, TokenKind};
use crate::ExpressionError;

/// Binary operators, in increasing precedence tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// Expression syntax tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Bool(bool),
    Text(String),
    /// Dotted variable reference
    Var(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

impl BinaryOp {
    /// Binding power; higher binds tighter.
    fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq | BinaryOp::NotEq => 3,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 6,
        }
    }

    fn from_token(kind: &TokenKind) -> Option<Self> {
        match kind {
            TokenKind::OrOr => Some(BinaryOp::Or),
            TokenKind::AndAnd => Some(BinaryOp::And),
            TokenKind::EqEq => Some(BinaryOp::Eq),
            TokenKind::NotEq => Some(BinaryOp::NotEq),
            TokenKind::Lt => Some(BinaryOp::Lt),
            TokenKind::Le => Some(BinaryOp::Le),
            TokenKind::Gt => Some(BinaryOp::Gt),
            TokenKind::Ge => Some(BinaryOp::Ge),
            TokenKind::Plus => Some(BinaryOp::Add),
            TokenKind::Minus => Some(BinaryOp::Sub),
            TokenKind::Star => Some(BinaryOp::Mul),
            TokenKind::Slash => Some(BinaryOp::Div),
            TokenKind::Percent => Some(BinaryOp::Rem),
            _ => None,
        }
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

fn syntax(offset: usize, message: impl Into<String>) -> ExpressionError {
    ExpressionError::Syntax {
        offset,
        message: message.into(),
    }
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn end_offset(&self) -> usize {
        self.tokens.last().map(|t| t.offset + 1).unwrap_or(0)
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<(), ExpressionError> {
        match self.next() {
            Some(token) if token.kind == kind => Ok(()),
            Some(token) => Err(syntax(token.offset, format!("expected {what}"))),
            None => Err(syntax(self.end_offset(), format!("expected {what}"))),
        }
    }

    fn parse_expr(&mut self, min_precedence: u8) -> Result<Expr, ExpressionError> {
        let mut lhs = self.parse_unary()?;

        while let Some(op) = self.peek().and_then(|t| BinaryOp::from_token(&t.kind)) {
            let precedence = op.precedence();
            if precedence < min_precedence {
                break;
            }
            self.next();
            // All operators are left-associative.
            let rhs = self.parse_expr(precedence + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }

        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        match self.peek().map(|t| t.kind.clone()) {
            Some(TokenKind::Bang) => {
                self.next();
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)))
            }
            Some(TokenKind::Minus) => {
                self.next();
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        let token = match self.next() {
            Some(token) => token.clone(),
            None => return Err(syntax(self.end_offset(), "unexpected end of expression")),
        };

        match token.kind {
            TokenKind::Number(n) => Ok(Expr::Number(n)),
            TokenKind::Bool(b) => Ok(Expr::Bool(b)),
            TokenKind::Text(s) => Ok(Expr::Text(s)),
            TokenKind::LParen => {
                let inner = self.parse_expr(0)?;
                self.expect(TokenKind::RParen, "closing ')'")?;
                Ok(inner)
            }
            TokenKind::Ident(name) => {
                if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::LParen)) {
                    self.next();
                    let mut args = Vec::new();
                    if !matches!(self.peek().map(|t| &t.kind), Some(TokenKind::RParen)) {
                        loop {
                            args.push(self.parse_expr(0)?);
                            match self.peek().map(|t| t.kind.clone()) {
                                Some(TokenKind::Comma) => {
                                    self.next();
                                }
                                _ => break,
                            }
                        }
                    }
                    self.expect(TokenKind::RParen, "closing ')' after arguments")?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Var(name))
                }
            }
            _ => Err(syntax(token.offset, "expected a value, variable, or '('")),
        }
    }
}

/// Parse a token stream into an expression tree.
pub(crate) fn parse_tokens(tokens: &[Token]) -> Result<Expr, ExpressionError> {
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr(0)?;
    if let Some(trailing) = parser.peek() {
        return Err(syntax(trailing.offset, "unexpected trailing input"));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse(src: &str) -> Result<Expr, ExpressionError> {
        parse_tokens(&tokenize(src).unwrap())
    }

    #[test]
    fn test_precedence_tree() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        let expr = parse("1 + 2 * 3").unwrap();
        match expr {
            Expr::Binary(BinaryOp::Add, lhs, rhs) => {
                assert_eq!(*lhs, Expr::Number(1.0));
                assert!(matches!(*rhs, Expr::Binary(BinaryOp::Mul, _, _)));
            }
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn test_logic_binds_loosest() {
        // a < 1 && b > 2 parses as (a < 1) && (b > 2)
        let expr = parse("a < 1 && b > 2").unwrap();
        assert!(matches!(expr, Expr::Binary(BinaryOp::And, _, _)));
    }

    #[test]
    fn test_call_with_args() {
        let expr = parse("min(a.x, 3 + 1)").unwrap();
        match expr {
            Expr::Call(name, args) => {
                assert_eq!(name, "min");
                assert_eq!(args.len(), 2);
                assert_eq!(args[0], Expr::Var("a.x".to_string()));
            }
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn test_trailing_input_rejected() {
        assert!(matches!(
            parse("1 2").unwrap_err(),
            ExpressionError::Syntax { .. }
        ));
    }

    #[test]
    fn test_unary_chaining() {
        let expr = parse("!!true").unwrap();
        assert!(matches!(expr, Expr::Unary(UnaryOp::Not, _)));
    }
}
