// Copyright 2025 Cowboy AI, LLC.

//! Lexing and recursive-descent parsing of the `.concept` and `.sync` DSLs.

pub mod ast;
pub mod concept_parser;
pub mod lexer;
pub mod parse_error;
pub mod sync_parser;

pub use ast::{ConceptAst, SyncAst};
pub use concept_parser::parse_concept;
pub use parse_error::{ParseError, ParseWarning};
pub use sync_parser::parse_sync;
