// Copyright 2025 Cowboy AI, LLC.

//! Recursive-descent parser for the `.sync` grammar.
//!
//! A `when` clause may pin the completion's variant by including a
//! `variant: <name>` binding in its output list; this is the one place in
//! the `then`/`when` binding lists where the key `variant` is reserved
//! rather than treated as an ordinary output field — see `sync_compile`
//! for where it is consumed.

use super::ast::*;
use super::lexer::{lex, Token, TokenKind};
use super::parse_error::ParseError;
use crate::value::{Literal, Value};

/// Parse a `.sync` source file, fail-fast on the first syntax error.
pub fn parse_sync(source: &str, file: &str) -> Result<SyncAst, ParseError> {
    let tokens = lex(source, file).map_err(|e| {
        ParseError::new(file, 1, 1, e.to_string(), source.lines().next().unwrap_or("").to_string())
    })?;
    let mut cursor = Cursor { tokens: &tokens, pos: 0, file, source };
    cursor.parse_sync()
}

struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
    file: &'a str,
    source: &'a str,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> &Token {
        let tok = &self.tokens[self.pos];
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn snippet(&self, line: usize) -> String {
        self.source.lines().nth(line.saturating_sub(1)).unwrap_or("").to_string()
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let tok = self.peek();
        ParseError::new(self.file, tok.line, tok.col, message, self.snippet(tok.line))
    }

    fn at_kind(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), ParseError> {
        if self.at_kind(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {kind}, found {}", self.peek().kind)))
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), ParseError> {
        match self.peek().kind.clone() {
            TokenKind::Ident(s) if s == kw => {
                self.advance();
                Ok(())
            }
            other => Err(self.error(format!("expected keyword `{kw}`, found {other}"))),
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.peek().kind.clone() {
            TokenKind::Ident(s) => {
                self.advance();
                Ok(s)
            }
            other => Err(self.error(format!("expected identifier, found {other}"))),
        }
    }

    fn eat_comma_if_present(&mut self) {
        if self.at_kind(&TokenKind::Comma) {
            self.advance();
        }
    }

    // sync := "sync" Name ("[" Mode "]")?
    //         "when" "{" whenClause+ "}"
    //         ("where" "{" whereOp+ "}")?
    //         "then" "{" thenClause+ "}"
    fn parse_sync(&mut self) -> Result<SyncAst, ParseError> {
        self.expect_keyword("sync")?;
        let name = self.expect_ident()?;

        let mut mode = SyncMode::Eager;
        if self.at_kind(&TokenKind::LBracket) {
            self.advance();
            let mode_name = self.expect_ident()?;
            mode = match mode_name.as_str() {
                "eager" => SyncMode::Eager,
                "lazy" => SyncMode::Lazy,
                other => return Err(self.error(format!("unknown sync mode `{other}`"))),
            };
            self.expect(&TokenKind::RBracket)?;
        }

        self.expect_keyword("when")?;
        self.expect(&TokenKind::LBrace)?;
        let mut when = Vec::new();
        while !self.at_kind(&TokenKind::RBrace) {
            when.push(self.parse_when_clause()?);
        }
        if when.is_empty() {
            return Err(self.error("sync rule must have at least one `when` clause"));
        }
        self.expect(&TokenKind::RBrace)?;

        let mut where_ops = Vec::new();
        if self.peek_is_keyword("where") {
            self.advance();
            self.expect(&TokenKind::LBrace)?;
            while !self.at_kind(&TokenKind::RBrace) {
                where_ops.push(self.parse_where_op()?);
            }
            self.expect(&TokenKind::RBrace)?;
        }

        self.expect_keyword("then")?;
        self.expect(&TokenKind::LBrace)?;
        let mut then = Vec::new();
        while !self.at_kind(&TokenKind::RBrace) {
            then.push(self.parse_then_clause()?);
        }
        if then.is_empty() {
            return Err(self.error("sync rule must have at least one `then` clause"));
        }
        self.expect(&TokenKind::RBrace)?;

        Ok(SyncAst { name, mode, when, where_ops, then })
    }

    fn peek_is_keyword(&self, kw: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Ident(s) if s == kw)
    }

    // whenClause := Uri "/" Action ":" "[" bindings? "]" ("=>" "[" bindings? "]")?
    fn parse_when_clause(&mut self) -> Result<WhenClauseAst, ParseError> {
        let concept_uri = self.expect_ident()?;
        self.expect(&TokenKind::Slash)?;
        let action = self.expect_ident()?;
        self.expect(&TokenKind::Colon)?;
        self.expect(&TokenKind::LBracket)?;
        let inputs = self.parse_bindings(&TokenKind::RBracket)?;
        self.expect(&TokenKind::RBracket)?;

        let mut outputs = Vec::new();
        if self.at_kind(&TokenKind::FatArrow) {
            self.advance();
            self.expect(&TokenKind::LBracket)?;
            outputs = self.parse_bindings(&TokenKind::RBracket)?;
            self.expect(&TokenKind::RBracket)?;
        }

        let variant = outputs
            .iter()
            .find(|(k, _)| k == "variant")
            .and_then(|(_, v)| match v {
                Value::Variable(name) => Some(name.clone()),
                Value::Literal(Literal::String(s)) => Some(s.clone()),
                _ => None,
            });
        outputs.retain(|(k, _)| k != "variant");

        Ok(WhenClauseAst { concept_uri, action, variant, inputs, outputs })
    }

    fn parse_bindings(&mut self, terminator: &TokenKind) -> Result<Vec<(String, Value)>, ParseError> {
        let mut bindings = Vec::new();
        while !self.at_kind(terminator) {
            let name = self.expect_ident()?;
            self.expect(&TokenKind::Colon)?;
            let value = self.parse_value()?;
            bindings.push((name, value));
            self.eat_comma_if_present();
        }
        Ok(bindings)
    }

    fn parse_value(&mut self) -> Result<Value, ParseError> {
        match self.peek().kind.clone() {
            TokenKind::Str(s) => {
                self.advance();
                Ok(Value::Literal(Literal::String(s)))
            }
            TokenKind::Int(n) => {
                self.advance();
                Ok(Value::Literal(Literal::Int(n)))
            }
            TokenKind::Decimal(n) => {
                self.advance();
                Ok(Value::Literal(Literal::Decimal(n)))
            }
            TokenKind::Bool(b) => {
                self.advance();
                Ok(Value::Literal(Literal::Bool(b)))
            }
            TokenKind::Question => {
                self.advance();
                Ok(Value::Variable(self.expect_ident()?))
            }
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Value::Variable(name))
            }
            TokenKind::LBrace => {
                self.advance();
                let bindings = self.parse_bindings(&TokenKind::RBrace)?;
                self.expect(&TokenKind::RBrace)?;
                Ok(Value::Record(bindings.into_iter().collect()))
            }
            TokenKind::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.at_kind(&TokenKind::RBracket) {
                    items.push(self.parse_value()?);
                    self.eat_comma_if_present();
                }
                self.expect(&TokenKind::RBracket)?;
                Ok(Value::List(items))
            }
            other => Err(self.error(format!("expected a value, found {other}"))),
        }
    }

    // whereOp := "bind" "(" expr "as" "?" Name ")" | "filter" "(" expr ")"
    fn parse_where_op(&mut self) -> Result<WhereOpAst, ParseError> {
        let kw = self.expect_ident()?;
        match kw.as_str() {
            "bind" => {
                self.expect(&TokenKind::LParen)?;
                let builtin_name = self.expect_ident()?;
                self.expect(&TokenKind::LParen)?;
                self.expect(&TokenKind::RParen)?;
                let builtin = BuiltinCallAst { name: builtin_name };
                self.expect_keyword("as")?;
                self.expect(&TokenKind::Question)?;
                let var = self.expect_ident()?;
                self.expect(&TokenKind::RParen)?;
                Ok(WhereOpAst::Bind { var, builtin })
            }
            "filter" => {
                self.expect(&TokenKind::LParen)?;
                let left = self.parse_value()?;
                let op = match self.peek().kind.clone() {
                    TokenKind::Eq => {
                        self.advance();
                        if self.at_kind(&TokenKind::Eq) {
                            self.advance();
                        }
                        FilterOp::Eq
                    }
                    TokenKind::Ident(s) if s == "ne" => {
                        self.advance();
                        FilterOp::Ne
                    }
                    other => return Err(self.error(format!("expected comparison operator, found {other}"))),
                };
                let right = self.parse_value()?;
                self.expect(&TokenKind::RParen)?;
                Ok(WhereOpAst::Filter { expr: FilterExprAst { left, op, right } })
            }
            other => Err(self.error(format!("unknown where operation `{other}`"))),
        }
    }

    // thenClause := Uri "/" Action ":" "[" bindings? "]"
    fn parse_then_clause(&mut self) -> Result<ThenClauseAst, ParseError> {
        let concept_uri = self.expect_ident()?;
        self.expect(&TokenKind::Slash)?;
        let action = self.expect_ident()?;
        self.expect(&TokenKind::Colon)?;
        self.expect(&TokenKind::LBracket)?;
        let inputs = self.parse_bindings(&TokenKind::RBracket)?;
        self.expect(&TokenKind::RBracket)?;
        Ok(ThenClauseAst { concept_uri, action, inputs })
    }
}
