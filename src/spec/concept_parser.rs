// Copyright 2025 Cowboy AI, LLC.

//! Recursive-descent parser for the `.concept` grammar.

use std::collections::BTreeMap;

use super::ast::*;
use super::lexer::{lex, Token, TokenKind};
use super::parse_error::{ParseError, ParseWarning};
use crate::value::{Literal, Value};

/// Parse a `.concept` source file, fail-fast on the first syntax error.
pub fn parse_concept(source: &str, file: &str) -> Result<(ConceptAst, Vec<ParseWarning>), ParseError> {
    let tokens = lex(source, file).map_err(|e| {
        ParseError::new(file, 1, 1, e.to_string(), snippet_for(source, 1))
    })?;
    let mut cursor = Cursor::new(&tokens, file, source);
    cursor.parse_concept()
}

fn snippet_for(source: &str, line: usize) -> String {
    source.lines().nth(line.saturating_sub(1)).unwrap_or("").to_string()
}

struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
    file: &'a str,
    source: &'a str,
    warnings: Vec<ParseWarning>,
}

impl<'a> Cursor<'a> {
    fn new(tokens: &'a [Token], file: &'a str, source: &'a str) -> Self {
        Self { tokens, pos: 0, file, source, warnings: Vec::new() }
    }

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

    fn error(&self, message: impl Into<String>) -> ParseError {
        let tok = self.peek();
        ParseError::new(self.file, tok.line, tok.col, message, snippet_for(self.source, tok.line))
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), ParseError> {
        if std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {kind}, found {}", self.peek().kind)))
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

    fn at_kind(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    fn eat_comma_if_present(&mut self) {
        if self.at_kind(&TokenKind::Comma) {
            self.advance();
        }
    }

    // concept := "concept" Name ("[" TypeParam ("," TypeParam)* "]")?
    //            ("@version" "(" Int ")")?
    //            "{" section* "}"
    fn parse_concept(&mut self) -> Result<(ConceptAst, Vec<ParseWarning>), ParseError> {
        self.expect_keyword("concept")?;
        let name = self.expect_ident()?;

        let mut type_params = Vec::new();
        if self.at_kind(&TokenKind::LBracket) {
            self.advance();
            loop {
                if self.at_kind(&TokenKind::RBracket) {
                    break;
                }
                type_params.push(self.expect_ident()?);
                if self.at_kind(&TokenKind::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
            self.expect(&TokenKind::RBracket)?;
        }

        let mut version = None;
        if self.at_kind(&TokenKind::At) {
            self.advance();
            let kw = self.expect_ident()?;
            if kw != "version" {
                return Err(self.error(format!("unknown annotation @{kw}")));
            }
            self.expect(&TokenKind::LParen)?;
            version = Some(self.expect_int()?);
            self.expect(&TokenKind::RParen)?;
        }

        self.expect(&TokenKind::LBrace)?;

        let mut purpose = None;
        let mut state = Vec::new();
        let mut actions = Vec::new();
        let mut invariants = Vec::new();
        let mut capabilities = Vec::new();
        let mut seen_sections: BTreeMap<&'static str, usize> = BTreeMap::new();

        while !self.at_kind(&TokenKind::RBrace) {
            let section_tok_line = self.peek().line;
            let section_name = self.expect_ident()?;
            match section_name.as_str() {
                "purpose" => {
                    self.bump_section(&mut seen_sections, "purpose", section_tok_line)?;
                    self.expect(&TokenKind::LBrace)?;
                    let prose = self.parse_prose_until_rbrace();
                    if prose.trim().is_empty() {
                        self.warn(section_tok_line, "empty purpose section");
                    }
                    purpose = Some(prose);
                }
                "state" => {
                    self.bump_section(&mut seen_sections, "state", section_tok_line)?;
                    self.expect(&TokenKind::LBrace)?;
                    if self.at_kind(&TokenKind::RBrace) {
                        self.warn(section_tok_line, "empty state section");
                    }
                    while !self.at_kind(&TokenKind::RBrace) {
                        let fname = self.expect_ident()?;
                        self.expect(&TokenKind::Colon)?;
                        let ty = self.expect_ident()?;
                        state.push(StateField { name: fname, ty });
                        self.eat_comma_if_present();
                    }
                    self.expect(&TokenKind::RBrace)?;
                }
                "actions" => {
                    self.bump_section(&mut seen_sections, "actions", section_tok_line)?;
                    self.expect(&TokenKind::LBrace)?;
                    if self.at_kind(&TokenKind::RBrace) {
                        self.warn(section_tok_line, "empty actions section");
                    }
                    while !self.at_kind(&TokenKind::RBrace) {
                        actions.push(self.parse_action()?);
                    }
                    self.expect(&TokenKind::RBrace)?;
                }
                "invariant" => {
                    invariants.push(self.parse_invariant()?);
                }
                "capabilities" => {
                    self.bump_section(&mut seen_sections, "capabilities", section_tok_line)?;
                    self.expect(&TokenKind::LBrace)?;
                    if self.at_kind(&TokenKind::RBrace) {
                        self.warn(section_tok_line, "empty capabilities section");
                    }
                    while !self.at_kind(&TokenKind::RBrace) {
                        capabilities.push(self.expect_ident()?);
                        self.eat_comma_if_present();
                    }
                    self.expect(&TokenKind::RBrace)?;
                }
                other => {
                    return Err(self.error(format!("unknown section `{other}`")));
                }
            }
        }
        self.expect(&TokenKind::RBrace)?;

        if purpose.is_none() {
            self.warn(self.peek().line, "missing purpose section");
        }
        if state.is_empty() {
            self.warn(self.peek().line, "no state declared");
        }
        if actions.is_empty() {
            self.warn(self.peek().line, "no actions declared");
        }

        Ok((
            ConceptAst {
                name,
                type_params,
                version,
                purpose,
                state,
                actions,
                invariants,
                capabilities,
            },
            std::mem::take(&mut self.warnings),
        ))
    }

    /// `invariant` may appear more than once (unlike `purpose`/`state`/
    /// `actions`), so it is not tracked in `seen_sections`.
    fn bump_section(
        &self,
        seen: &mut BTreeMap<&'static str, usize>,
        name: &'static str,
        line: usize,
    ) -> Result<(), ParseError> {
        if seen.contains_key(name) {
            return Err(ParseError::new(
                self.file,
                line,
                1,
                format!("repeated section `{name}`"),
                snippet_for(self.source, line),
            ));
        }
        seen.insert(name, line);
        Ok(())
    }

    fn warn(&mut self, line: usize, message: impl Into<String>) {
        self.warnings.push(ParseWarning {
            file: self.file.to_string(),
            line,
            message: message.into(),
        });
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

    fn expect_int(&mut self) -> Result<i64, ParseError> {
        match self.peek().kind.clone() {
            TokenKind::Int(n) => {
                self.advance();
                Ok(n)
            }
            other => Err(self.error(format!("expected integer, found {other}"))),
        }
    }

    fn parse_prose_until_rbrace(&mut self) -> String {
        // Prose is free text; since the lexer already tokenized it, render
        // the tokens back out. Quoted prose blocks are the common case.
        if let TokenKind::Str(s) = self.peek().kind.clone() {
            self.advance();
            self.expect(&TokenKind::RBrace).ok();
            return s;
        }
        let mut parts = Vec::new();
        while !self.at_kind(&TokenKind::RBrace) && !self.at_kind(&TokenKind::Eof) {
            parts.push(self.advance().kind.to_string());
        }
        self.expect(&TokenKind::RBrace).ok();
        parts.join(" ")
    }

    // action := "action" Name "(" params? ")" "{" variant+ "}"
    fn parse_action(&mut self) -> Result<ActionAst, ParseError> {
        self.expect_keyword("action")?;
        let name = self.expect_ident()?;
        self.expect(&TokenKind::LParen)?;
        let inputs = self.parse_fields(&TokenKind::RParen)?;
        self.expect(&TokenKind::RParen)?;
        self.expect(&TokenKind::LBrace)?;
        let mut variants = Vec::new();
        while !self.at_kind(&TokenKind::RBrace) {
            variants.push(self.parse_variant()?);
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(ActionAst { name, inputs, variants })
    }

    fn parse_fields(&mut self, terminator: &TokenKind) -> Result<Vec<Field>, ParseError> {
        let mut fields = Vec::new();
        while !self.at_kind(terminator) {
            let name = self.expect_ident()?;
            self.expect(&TokenKind::Colon)?;
            let ty = self.expect_ident()?;
            fields.push(Field { name, ty });
            self.eat_comma_if_present();
        }
        Ok(fields)
    }

    // variant := "->" Name "(" outputs? ")" "{" prose "}"
    fn parse_variant(&mut self) -> Result<VariantAst, ParseError> {
        self.expect(&TokenKind::Arrow)?;
        let name = self.expect_ident()?;
        self.expect(&TokenKind::LParen)?;
        let outputs = self.parse_fields(&TokenKind::RParen)?;
        self.expect(&TokenKind::RParen)?;
        self.expect(&TokenKind::LBrace)?;
        let prose = self.parse_prose_until_rbrace();
        Ok(VariantAst { name, outputs, prose })
    }

    // invariant := "invariant" "{" "after" step ("," step)* "then" step ("," step)* "}"
    fn parse_invariant(&mut self) -> Result<InvariantAst, ParseError> {
        self.expect_keyword("invariant")?;
        self.expect(&TokenKind::LBrace)?;
        self.expect_keyword("after")?;
        let mut after = vec![self.parse_step()?];
        while self.at_kind(&TokenKind::Comma) {
            self.advance();
            after.push(self.parse_step()?);
        }
        self.expect_keyword("then")?;
        let mut then = vec![self.parse_step()?];
        while self.at_kind(&TokenKind::Comma) {
            self.advance();
            then.push(self.parse_step()?);
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(InvariantAst { after, then })
    }

    // step := Name "/"? Action ":" "[" bindings? "]" "->" Name "(" bindings? ")"
    fn parse_step(&mut self) -> Result<StepAst, ParseError> {
        let first = self.expect_ident()?;
        let (label, action) = if self.at_kind(&TokenKind::Slash) {
            self.advance();
            (Some(first), self.expect_ident()?)
        } else {
            (None, first)
        };
        self.expect(&TokenKind::Colon)?;
        self.expect(&TokenKind::LBracket)?;
        let inputs = self.parse_bindings(&TokenKind::RBracket)?;
        self.expect(&TokenKind::RBracket)?;
        self.expect(&TokenKind::Arrow)?;
        let variant = self.expect_ident()?;
        self.expect(&TokenKind::LParen)?;
        let outputs = self.parse_bindings(&TokenKind::RParen)?;
        self.expect(&TokenKind::RParen)?;
        Ok(StepAst { label, action, inputs, variant, outputs })
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

    // value := Literal | "?"? Name | "{" bindings "}" | "[" value ("," value)* "]"
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
                let name = self.expect_ident()?;
                Ok(Value::Variable(name))
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
}
