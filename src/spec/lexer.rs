// Copyright 2025 Cowboy AI, LLC.

//! Shared lexer for the `.concept` and `.sync` grammars.
//!
//! Whitespace is insignificant except to separate tokens; `// ...` starts a
//! line comment that runs to end-of-line.

use std::fmt;

use thiserror::Error;

/// A lexical token kind.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// An identifier or keyword; keywords are distinguished by the parser,
    /// not the lexer, since both grammars reuse a small set of contextual
    /// keywords (`concept`, `sync`, `when`, ...).
    Ident(String),
    /// A double-quoted string literal with `\"` and `\\` escapes resolved.
    Str(String),
    /// An integer literal.
    Int(i64),
    /// A decimal literal.
    Decimal(f64),
    /// A boolean literal (`true`/`false`).
    Bool(bool),
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Colon,
    Semicolon,
    Comma,
    Dot,
    Slash,
    Question,
    Arrow,     // ->
    FatArrow,  // =>
    Eq,
    At,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Ident(s) => write!(f, "identifier `{s}`"),
            TokenKind::Str(s) => write!(f, "string {s:?}"),
            TokenKind::Int(n) => write!(f, "integer {n}"),
            TokenKind::Decimal(n) => write!(f, "decimal {n}"),
            TokenKind::Bool(b) => write!(f, "boolean {b}"),
            TokenKind::LBrace => write!(f, "'{{'"),
            TokenKind::RBrace => write!(f, "'}}'"),
            TokenKind::LBracket => write!(f, "'['"),
            TokenKind::RBracket => write!(f, "']'"),
            TokenKind::LParen => write!(f, "'('"),
            TokenKind::RParen => write!(f, "')'"),
            TokenKind::Colon => write!(f, "':'"),
            TokenKind::Semicolon => write!(f, "';'"),
            TokenKind::Comma => write!(f, "','"),
            TokenKind::Dot => write!(f, "'.'"),
            TokenKind::Slash => write!(f, "'/'"),
            TokenKind::Question => write!(f, "'?'"),
            TokenKind::Arrow => write!(f, "'->'"),
            TokenKind::FatArrow => write!(f, "'=>'"),
            TokenKind::Eq => write!(f, "'='"),
            TokenKind::At => write!(f, "'@'"),
            TokenKind::Eof => write!(f, "end of file"),
        }
    }
}

/// A token with its source position (1-indexed line/column of its first
/// character) for diagnostics.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub col: usize,
}

/// Lexical errors, reported with file-relative position.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LexError {
    #[error("{file}:{line}:{col}: unterminated string literal")]
    UnterminatedString { file: String, line: usize, col: usize },

    #[error("{file}:{line}:{col}: unexpected character '{ch}'")]
    UnexpectedChar { file: String, line: usize, col: usize, ch: char },

    #[error("{file}:{line}:{col}: invalid numeric literal '{text}'")]
    InvalidNumber { file: String, line: usize, col: usize, text: String },
}

/// Tokenize `source`, attributing errors to `file` for diagnostics.
pub fn lex(source: &str, file: &str) -> Result<Vec<Token>, LexError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0usize;
    let mut line = 1usize;
    let mut col = 1usize;

    macro_rules! advance {
        () => {{
            if chars[i] == '\n' {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
            i += 1;
        }};
    }

    while i < chars.len() {
        let ch = chars[i];
        if ch == '\n' || ch.is_whitespace() {
            advance!();
            continue;
        }
        if ch == '/' && i + 1 < chars.len() && chars[i + 1] == '/' {
            while i < chars.len() && chars[i] != '\n' {
                advance!();
            }
            continue;
        }

        let (start_line, start_col) = (line, col);

        match ch {
            '{' => {
                tokens.push(Token { kind: TokenKind::LBrace, line: start_line, col: start_col });
                advance!();
            }
            '}' => {
                tokens.push(Token { kind: TokenKind::RBrace, line: start_line, col: start_col });
                advance!();
            }
            '[' => {
                tokens.push(Token { kind: TokenKind::LBracket, line: start_line, col: start_col });
                advance!();
            }
            ']' => {
                tokens.push(Token { kind: TokenKind::RBracket, line: start_line, col: start_col });
                advance!();
            }
            '(' => {
                tokens.push(Token { kind: TokenKind::LParen, line: start_line, col: start_col });
                advance!();
            }
            ')' => {
                tokens.push(Token { kind: TokenKind::RParen, line: start_line, col: start_col });
                advance!();
            }
            ':' => {
                tokens.push(Token { kind: TokenKind::Colon, line: start_line, col: start_col });
                advance!();
            }
            ';' => {
                tokens.push(Token { kind: TokenKind::Semicolon, line: start_line, col: start_col });
                advance!();
            }
            ',' => {
                tokens.push(Token { kind: TokenKind::Comma, line: start_line, col: start_col });
                advance!();
            }
            '.' => {
                tokens.push(Token { kind: TokenKind::Dot, line: start_line, col: start_col });
                advance!();
            }
            '?' => {
                tokens.push(Token { kind: TokenKind::Question, line: start_line, col: start_col });
                advance!();
            }
            '@' => {
                tokens.push(Token { kind: TokenKind::At, line: start_line, col: start_col });
                advance!();
            }
            '/' => {
                tokens.push(Token { kind: TokenKind::Slash, line: start_line, col: start_col });
                advance!();
            }
            '-' => {
                advance!();
                if i < chars.len() && chars[i] == '>' {
                    advance!();
                    tokens.push(Token { kind: TokenKind::Arrow, line: start_line, col: start_col });
                } else {
                    return Err(LexError::UnexpectedChar {
                        file: file.to_string(),
                        line: start_line,
                        col: start_col,
                        ch: '-',
                    });
                }
            }
            '=' => {
                advance!();
                if i < chars.len() && chars[i] == '>' {
                    advance!();
                    tokens.push(Token { kind: TokenKind::FatArrow, line: start_line, col: start_col });
                } else {
                    tokens.push(Token { kind: TokenKind::Eq, line: start_line, col: start_col });
                }
            }
            '"' => {
                advance!();
                let mut s = String::new();
                let mut closed = false;
                while i < chars.len() {
                    match chars[i] {
                        '"' => {
                            advance!();
                            closed = true;
                            break;
                        }
                        '\\' => {
                            advance!();
                            if i >= chars.len() {
                                break;
                            }
                            match chars[i] {
                                '"' => s.push('"'),
                                '\\' => s.push('\\'),
                                'n' => s.push('\n'),
                                't' => s.push('\t'),
                                other => {
                                    s.push('\\');
                                    s.push(other);
                                }
                            }
                            advance!();
                        }
                        c => {
                            s.push(c);
                            advance!();
                        }
                    }
                }
                if !closed {
                    return Err(LexError::UnterminatedString {
                        file: file.to_string(),
                        line: start_line,
                        col: start_col,
                    });
                }
                tokens.push(Token { kind: TokenKind::Str(s), line: start_line, col: start_col });
            }
            c if c.is_ascii_digit() => {
                let mut text = String::new();
                let mut is_decimal = false;
                while i < chars.len()
                    && (chars[i].is_ascii_digit()
                        || (chars[i] == '.' && !is_decimal && i + 1 < chars.len() && chars[i + 1].is_ascii_digit()))
                {
                    if chars[i] == '.' {
                        is_decimal = true;
                    }
                    text.push(chars[i]);
                    advance!();
                }
                if is_decimal {
                    let n: f64 = text.parse().map_err(|_| LexError::InvalidNumber {
                        file: file.to_string(),
                        line: start_line,
                        col: start_col,
                        text: text.clone(),
                    })?;
                    tokens.push(Token { kind: TokenKind::Decimal(n), line: start_line, col: start_col });
                } else {
                    let n: i64 = text.parse().map_err(|_| LexError::InvalidNumber {
                        file: file.to_string(),
                        line: start_line,
                        col: start_col,
                        text: text.clone(),
                    })?;
                    tokens.push(Token { kind: TokenKind::Int(n), line: start_line, col: start_col });
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut text = String::new();
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    text.push(chars[i]);
                    advance!();
                }
                let kind = match text.as_str() {
                    "true" => TokenKind::Bool(true),
                    "false" => TokenKind::Bool(false),
                    _ => TokenKind::Ident(text),
                };
                tokens.push(Token { kind, line: start_line, col: start_col });
            }
            other => {
                return Err(LexError::UnexpectedChar {
                    file: file.to_string(),
                    line: start_line,
                    col: start_col,
                    ch: other,
                });
            }
        }
    }

    tokens.push(Token { kind: TokenKind::Eof, line, col });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexes_punctuation_and_arrows() {
        let tokens = lex("-> => { } [ ] ( ) : ; , .", "t.concept").unwrap();
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Arrow,
                TokenKind::FatArrow,
                TokenKind::LBrace,
                TokenKind::RBrace,
                TokenKind::LBracket,
                TokenKind::RBracket,
                TokenKind::LParen,
                TokenKind::RParen,
                TokenKind::Colon,
                TokenKind::Semicolon,
                TokenKind::Comma,
                TokenKind::Dot,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_escaped_strings() {
        let tokens = lex(r#""line one\nsays \"hi\"""#, "t.concept").unwrap();
        match &tokens[0].kind {
            TokenKind::Str(s) => assert_eq!(s, "line one\nsays \"hi\""),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn skips_line_comments() {
        let tokens = lex("concept // trailing comment\nFoo", "t.concept").unwrap();
        let idents: Vec<_> = tokens
            .iter()
            .filter_map(|t| match &t.kind {
                TokenKind::Ident(s) => Some(s.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(idents, vec!["concept".to_string(), "Foo".to_string()]);
    }

    #[test]
    fn reports_unterminated_string_with_position() {
        let err = lex("\"unterminated", "t.concept").unwrap_err();
        assert_eq!(
            err,
            LexError::UnterminatedString { file: "t.concept".into(), line: 1, col: 1 }
        );
    }

    #[test]
    fn lexes_decimal_and_bool_literals() {
        let tokens = lex("3.14 true false 42", "t.concept").unwrap();
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind.clone()).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Decimal(3.14),
                TokenKind::Bool(true),
                TokenKind::Bool(false),
                TokenKind::Int(42),
                TokenKind::Eof,
            ]
        );
    }

    #[test_case::test_case("?", TokenKind::Question; "question mark")]
    #[test_case::test_case("@", TokenKind::At; "at sign")]
    #[test_case::test_case("=", TokenKind::Eq; "bare equals")]
    #[test_case::test_case("foo_bar", TokenKind::Ident("foo_bar".into()); "snake case ident")]
    #[test_case::test_case("/", TokenKind::Slash; "slash")]
    fn lexes_single_token(source: &str, expected: TokenKind) {
        let tokens = lex(source, "t.concept").unwrap();
        assert_eq!(tokens[0].kind, expected);
    }
}
