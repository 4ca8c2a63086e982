//! Recursive descent parser
//!
//! Precedence, loosest first:
//! `|`, `&`, prefix `!`, comparisons, `+ -`, `* / %`, prefix `-`, then
//! postfix `.name`, `.name(...)` and `[...]`.

use crate::ast::Expr;
use crate::error::SpynaError;
use crate::token::{Span, Token, TokenKind};

pub struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str, tokens: Vec<Token>) -> Self {
        Self {
            source,
            tokens,
            pos: 0,
        }
    }

    /// Parse one complete expression; anything after it is an error
    pub fn parse_expression(&mut self) -> Result<Expr, SpynaError> {
        let expr = self.parse_or()?;
        if !self.at(TokenKind::Eof) {
            return Err(self.unexpected("end of input"));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, SpynaError> {
        let first = self.parse_and()?;
        let mut operands = vec![first];
        while self.eat(TokenKind::Pipe) {
            operands.push(self.parse_and()?);
        }
        Ok(fold_operands("or", operands))
    }

    fn parse_and(&mut self) -> Result<Expr, SpynaError> {
        let first = self.parse_not()?;
        let mut operands = vec![first];
        while self.eat(TokenKind::Amp) {
            operands.push(self.parse_not()?);
        }
        Ok(fold_operands("and", operands))
    }

    fn parse_not(&mut self) -> Result<Expr, SpynaError> {
        if self.eat(TokenKind::Bang) {
            let operand = self.parse_not()?;
            return Ok(Expr::call("not", vec![operand]));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, SpynaError> {
        let left = self.parse_additive()?;
        if let Some(op) = self.peek().kind.comparison_op() {
            self.advance();
            let right = self.parse_additive()?;
            return Ok(Expr::call(op, vec![left, right]));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, SpynaError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Plus => "add",
                TokenKind::Minus => "sub",
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::call(op, vec![left, right]);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, SpynaError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek().kind {
                TokenKind::Star => "mul",
                TokenKind::Slash => "div",
                TokenKind::Percent => "mod",
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::call(op, vec![left, right]);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, SpynaError> {
        let minus = self.peek().span;
        if self.eat(TokenKind::Minus) {
            if let Some(literal) = self.negative_literal(minus)? {
                return Ok(literal);
            }
            let operand = self.parse_unary()?;
            return Ok(match operand {
                Expr::Int(value) => Expr::Int(-value),
                Expr::Float(value) => Expr::Float(-value),
                other => Expr::call("negative", vec![other]),
            });
        }
        self.parse_postfix()
    }

    /// `-` directly before a number literal with no postfix; the sign is
    /// parsed with the digits so `i64::MIN` stays in range
    fn negative_literal(&mut self, minus: Span) -> Result<Option<Expr>, SpynaError> {
        let token = self.peek().clone();
        if !matches!(token.kind, TokenKind::Int | TokenKind::Float) {
            return Ok(None);
        }
        let next = self.tokens.get(self.pos + 1).map(|t| t.kind);
        if matches!(next, Some(TokenKind::Dot | TokenKind::LBracket)) {
            return Ok(None);
        }
        self.advance();
        let text = format!("-{}", token.text(self.source));
        let span = Span::new(minus.start, token.span.end);
        let literal = if token.kind == TokenKind::Int {
            text.parse::<i64>()
                .map(Expr::Int)
                .map_err(|_| syntax("integer out of range", span))?
        } else {
            float(&text, span)?
        };
        Ok(Some(literal))
    }

    fn parse_postfix(&mut self) -> Result<Expr, SpynaError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(TokenKind::Dot) {
                let name = self.expect_ident()?;
                if self.eat(TokenKind::LParen) {
                    let mut args = vec![expr];
                    args.extend(self.parse_args(TokenKind::RParen)?);
                    expr = Expr::call(name, args);
                } else {
                    expr = Expr::call("getattr", vec![expr, Expr::bind(name)]);
                }
            } else if self.eat(TokenKind::LBracket) {
                let mut args = vec![expr];
                args.extend(self.parse_args(TokenKind::RBracket)?);
                expr = Expr::call("getitem", args);
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, SpynaError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Null => {
                self.advance();
                Ok(Expr::Null)
            }
            TokenKind::True => {
                self.advance();
                Ok(Expr::Bool(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expr::Bool(false))
            }
            TokenKind::Int => {
                self.advance();
                token
                    .text(self.source)
                    .parse::<i64>()
                    .map(Expr::Int)
                    .map_err(|_| syntax("integer out of range", token.span))
            }
            TokenKind::Float => {
                self.advance();
                float(token.text(self.source), token.span)
            }
            TokenKind::String => {
                self.advance();
                Ok(Expr::Str(unescape(token.text(self.source))))
            }
            TokenKind::Ident => {
                self.advance();
                let name = token.text(self.source).to_string();
                if self.eat(TokenKind::LParen) {
                    let args = self.parse_args(TokenKind::RParen)?;
                    Ok(Expr::call(name, args))
                } else {
                    Ok(Expr::bind(name))
                }
            }
            TokenKind::LParen => {
                self.advance();
                let first = self.parse_or()?;
                if self.eat(TokenKind::RParen) {
                    return Ok(first);
                }
                self.expect(TokenKind::Comma)?;
                let mut items = vec![first];
                items.extend(self.parse_args(TokenKind::RParen)?);
                Ok(Expr::call("tuple", items))
            }
            TokenKind::LBracket => {
                self.advance();
                let items = self.parse_args(TokenKind::RBracket)?;
                Ok(Expr::List(items))
            }
            TokenKind::Error => Err(syntax(
                format!("invalid token '{}'", token.text(self.source)),
                token.span,
            )),
            _ => Err(self.unexpected("expression")),
        }
    }

    /// Comma separated arguments up to and including `close`; a trailing
    /// comma is accepted
    fn parse_args(&mut self, close: TokenKind) -> Result<Vec<Expr>, SpynaError> {
        let mut args = Vec::new();
        while !self.at(close) {
            args.push(self.parse_or()?);
            if !self.eat(TokenKind::Comma) {
                break;
            }
        }
        self.expect(close)?;
        Ok(args)
    }

    fn expect_ident(&mut self) -> Result<String, SpynaError> {
        let token = self.peek().clone();
        if token.kind != TokenKind::Ident {
            return Err(self.unexpected("identifier"));
        }
        self.advance();
        Ok(token.text(self.source).to_string())
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), SpynaError> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.unexpected(kind.describe()))
        }
    }

    fn unexpected(&self, expected: &str) -> SpynaError {
        let token = self.peek();
        syntax(
            format!("expected {}, found {}", expected, token.kind.describe()),
            token.span,
        )
    }

    fn peek(&self) -> &Token {
        // tokenize() always appends Eof, so the last token is a safe fallback
        let index = self.pos.min(self.tokens.len().saturating_sub(1));
        &self.tokens[index]
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.tokens.get(self.pos).map(|t| t.kind) == Some(kind)
            || (self.pos >= self.tokens.len() && kind == TokenKind::Eof)
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) && kind != TokenKind::Eof {
            self.advance();
            true
        } else {
            false
        }
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
    }
}

/// Finite floats only; an overflowing literal has no tree to round-trip to
fn float(text: &str, span: Span) -> Result<Expr, SpynaError> {
    match text.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(Expr::Float(value)),
        Ok(_) => Err(syntax("float out of range", span)),
        Err(_) => Err(syntax("invalid float", span)),
    }
}

fn fold_operands(op: &str, mut operands: Vec<Expr>) -> Expr {
    if operands.len() == 1 {
        operands.remove(0)
    } else {
        Expr::call(op, operands)
    }
}

fn syntax(message: impl Into<String>, span: Span) -> SpynaError {
    SpynaError::Syntax {
        message: message.into(),
        span,
    }
}

/// Strip quotes and resolve backslash escapes
fn unescape(quoted: &str) -> String {
    let inner = &quoted[1..quoted.len() - 1];
    let mut output = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            output.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => output.push('\n'),
            Some('t') => output.push('\t'),
            Some('r') => output.push('\r'),
            Some(other) => output.push(other),
            None => output.push('\\'),
        }
    }
    output
}
