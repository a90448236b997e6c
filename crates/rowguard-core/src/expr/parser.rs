//! Recursive descent parser over the token stream.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! or        := and ("OR" and)*
//! and       := not ("AND" not)*
//! not       := "NOT" not | predicate
//! predicate := additive [cmp additive | "IS" ["NOT"] "NULL" | ["NOT"] "IN" "(" list ")"]
//! additive  := term (("+" | "-") term)*
//! term      := unary (("*" | "/") unary)*
//! unary     := "-" unary | primary
//! primary   := literal | "VALUE" | identifier ["." identifier] | "(" or ")"
//! ```

use crate::value::Value;

use super::error::{ParseError, Span};
use super::expression::{ArithOp, CompareOp, Expression};
use super::lexer::{tokenize, SpannedToken, Token};

/// Token cursor shared by the predicate and DDL parsers.
pub(crate) struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
    end: usize,
}

impl Parser {
    pub(crate) fn new(source: &str) -> Result<Self, ParseError> {
        Ok(Self {
            tokens: tokenize(source)?,
            pos: 0,
            end: source.len(),
        })
    }

    pub(crate) fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|t| &t.token)
    }

    fn advance(&mut self) -> Option<&SpannedToken> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|t| t.span)
            .unwrap_or(Span::new(self.end, self.end))
    }

    pub(crate) fn error(&self, message: impl Into<String>) -> ParseError {
        let found = match self.peek() {
            Some(token) => format!("{token:?}"),
            None => "end of input".to_string(),
        };
        ParseError::new(format!("{}, found {}", message.into(), found), self.span())
    }

    pub(crate) fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword))
    }

    fn is_keyword_at(&self, offset: usize, keyword: &str) -> bool {
        matches!(self.peek_at(offset), Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword))
    }

    /// Consume the keyword if it is next.
    pub(crate) fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.is_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(format!("expected {keyword}")))
        }
    }

    /// Consume the token if it is next.
    pub(crate) fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, token: &Token) -> Result<(), ParseError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {token:?}")))
        }
    }

    pub(crate) fn expect_end(&self) -> Result<(), ParseError> {
        match self.peek() {
            None => Ok(()),
            Some(_) => Err(self.error("unexpected trailing input")),
        }
    }

    /// A quoted or bare identifier.
    pub(crate) fn identifier(&mut self) -> Result<String, ParseError> {
        match self.peek() {
            Some(Token::Ident(name)) | Some(Token::QuotedIdent(name)) => {
                let name = name.clone();
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.error("expected identifier")),
        }
    }

    /// `name` or `schema.name`.
    pub(crate) fn qualified_identifier(&mut self) -> Result<(Option<String>, String), ParseError> {
        let first = self.identifier()?;
        if self.eat(&Token::Dot) {
            let second = self.identifier()?;
            Ok((Some(first), second))
        } else {
            Ok((None, first))
        }
    }

    /// `(a, b, c)`.
    pub(crate) fn identifier_list(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect(&Token::LParen)?;
        let mut names = vec![self.identifier()?];
        while self.eat(&Token::Comma) {
            names.push(self.identifier()?);
        }
        self.expect(&Token::RParen)?;
        Ok(names)
    }

    pub(crate) fn parse_expression(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("OR") {
            let right = self.parse_and()?;
            left = Expression::or(left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_not()?;
        while self.eat_keyword("AND") {
            let right = self.parse_not()?;
            left = Expression::and(left, right);
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expression, ParseError> {
        if self.eat_keyword("NOT") {
            let inner = self.parse_not()?;
            return Ok(Expression::Not(Box::new(inner)));
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<Expression, ParseError> {
        let left = self.parse_additive()?;

        let op = match self.peek() {
            Some(Token::Eq) => Some(CompareOp::Eq),
            Some(Token::Ne) => Some(CompareOp::Ne),
            Some(Token::Lt) => Some(CompareOp::Lt),
            Some(Token::Le) => Some(CompareOp::Le),
            Some(Token::Gt) => Some(CompareOp::Gt),
            Some(Token::Ge) => Some(CompareOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let right = self.parse_additive()?;
            return Ok(Expression::compare(op, left, right));
        }

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok(Expression::IsNull {
                expr: Box::new(left),
                negated,
            });
        }

        let negated = if self.is_keyword("NOT") && self.is_keyword_at(1, "IN") {
            self.pos += 1;
            true
        } else {
            false
        };
        if self.eat_keyword("IN") {
            self.expect(&Token::LParen)?;
            let mut list = vec![self.parse_expression()?];
            while self.eat(&Token::Comma) {
                list.push(self.parse_expression()?);
            }
            self.expect(&Token::RParen)?;
            return Ok(Expression::InList {
                expr: Box::new(left),
                list,
                negated,
            });
        }

        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_term()?;
            left = Expression::Arithmetic {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_term(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => ArithOp::Mul,
                Some(Token::Slash) => ArithOp::Div,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expression::Arithmetic {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expression, ParseError> {
        if !self.eat(&Token::Minus) {
            return self.parse_primary();
        }
        // Fold a sign directly in front of a numeric literal.
        match self.peek() {
            Some(Token::Int(i)) => {
                let value = Value::Int(-*i);
                self.pos += 1;
                Ok(Expression::Literal(value))
            }
            Some(Token::Float(f)) => {
                let value = Value::Float(-*f);
                self.pos += 1;
                Ok(Expression::Literal(value))
            }
            _ => {
                let inner = self.parse_unary()?;
                Ok(Expression::Negate(Box::new(inner)))
            }
        }
    }

    fn parse_primary(&mut self) -> Result<Expression, ParseError> {
        let span = self.span();
        let Some(spanned) = self.advance() else {
            return Err(ParseError::new("unexpected end of expression", span));
        };
        let expr = match spanned.token.clone() {
            Token::Int(i) => Expression::Literal(Value::Int(i)),
            Token::Float(f) => Expression::Literal(Value::Float(f)),
            Token::Str(s) => Expression::Literal(Value::Text(s)),
            Token::Bytes(b) => Expression::Literal(Value::Bytes(b)),
            Token::LParen => {
                let inner = self.parse_expression()?;
                self.expect(&Token::RParen)?;
                inner
            }
            Token::QuotedIdent(name) => self.column_tail(name)?,
            Token::Ident(word) => match word.to_ascii_uppercase().as_str() {
                "TRUE" => Expression::Literal(Value::Bool(true)),
                "FALSE" => Expression::Literal(Value::Bool(false)),
                "NULL" => Expression::Literal(Value::Null),
                "VALUE" => Expression::DomainValue,
                "AND" | "OR" | "NOT" | "IS" | "IN" => {
                    return Err(ParseError::new(format!("unexpected keyword {word}"), span))
                }
                _ => self.column_tail(word)?,
            },
            other => {
                return Err(ParseError::new(
                    format!("unexpected token {other:?}"),
                    span,
                ))
            }
        };
        Ok(expr)
    }

    /// Accept `table.column` by keeping the column part.
    fn column_tail(&mut self, first: String) -> Result<Expression, ParseError> {
        if self.eat(&Token::Dot) {
            let column = self.identifier()?;
            Ok(Expression::column(column))
        } else {
            Ok(Expression::column(first))
        }
    }
}
