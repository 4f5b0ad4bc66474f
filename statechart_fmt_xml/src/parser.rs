//! Parser entry points and error type.

mod scxml;
mod vocabulary;

use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use std::str::{self, Utf8Error};

use anyhow::anyhow;
use log::{info, warn};
use quick_xml::events::BytesStart;
use quick_xml::events::attributes::{AttrError, Attribute};
use quick_xml::{Error as XmlError, Reader};
use thiserror::Error;

use statechart_core::document::Document;

pub use self::vocabulary::*;

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("reader failed")]
    Reader(#[from] XmlError),
    #[error("error from an attribute")]
    Attr(#[from] AttrError),
    #[error("utf8 error")]
    Utf8(#[from] Utf8Error),
    #[error("unexpected end tag: `{0}`")]
    UnexpectedEndTag(String),
    #[error("missing attribute `{0}`")]
    MissingAttr(String),
    #[error("open tags have not been closed")]
    UnclosedTags,
    #[error("no <scxml> root element found")]
    MissingRoot,
}

/// Parses an SCXML document from a file.
pub fn parse_file(path: &Path) -> anyhow::Result<Document> {
    info!(target: "parser", "creating reader from file {}", path.display());
    let mut reader = Reader::from_file(path)?;
    parse(&mut reader)
}

/// Parses an SCXML document from a string.
pub fn parse_str(text: &str) -> anyhow::Result<Document> {
    let mut reader = Reader::from_reader(text.as_bytes());
    scxml::parse(&mut reader)
}

/// Parses an SCXML document from a reader.
pub fn parse<R: BufRead>(reader: &mut Reader<R>) -> anyhow::Result<Document> {
    scxml::parse(reader)
}

/// Collects the attributes of a tag into a map, warning on unrecognized
/// keys. Empty-string values collapse to absent, so a missing required
/// attribute and an empty one report the same way.
pub(crate) fn attrs(
    tag: &BytesStart<'_>,
    required: &[&str],
    optional: &[&str],
) -> anyhow::Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    for attr in tag
        .attributes()
        .collect::<Result<Vec<Attribute>, AttrError>>()
        .map_err(ParserError::Attr)?
    {
        let key = str::from_utf8(attr.key.as_ref()).map_err(ParserError::Utf8)?;
        let value = attr.unescape_value()?.into_owned();
        if required.contains(&key) || optional.contains(&key) {
            if !value.is_empty() {
                map.insert(key.to_owned(), value);
            }
        } else {
            let tag_name = str::from_utf8(tag.name().as_ref())
                .unwrap_or("?")
                .to_owned();
            warn!(target: "parser", "ignoring unknown attribute `{key}` in <{tag_name}>");
        }
    }
    for key in required {
        if !map.contains_key(*key) {
            return Err(anyhow!(ParserError::MissingAttr((*key).to_string())));
        }
    }
    Ok(map)
}
