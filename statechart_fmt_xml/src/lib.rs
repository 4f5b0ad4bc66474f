//! SAX-style parser for W3C SCXML 1.0 documents, built on `quick-xml`.
//!
//! The parser produces the raw [`statechart_core::document::Document`] tree
//! and performs no semantic validation; that happens when the document is
//! handed to `StateChart::initialize`.

pub mod parser;

pub use parser::{ParserError, parse, parse_file, parse_str};
