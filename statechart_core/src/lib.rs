//! Core of an interpreter for W3C SCXML 1.0 state charts.
//!
//! The crate is format-agnostic: a parser (such as `statechart_fmt_xml`)
//! produces a raw [`document::Document`], and
//! [`state_chart::StateChart::initialize`] validates and optimizes it into
//! an executable chart. Transition conditions are opaque here; they are
//! compiled and evaluated by a pluggable [`oracle::ConditionOracle`].

pub mod document;
mod grammar;
pub mod oracle;
pub mod state_chart;

pub use grammar::*;
