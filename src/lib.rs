//! Interpreter for W3C SCXML 1.0 state charts.
//!
//! Wires the XML parser, the ECMAScript condition oracle and the
//! interpreter core together:
//!
//! ```
//! use statechart::Event;
//!
//! let mut chart = statechart::load_str(
//!     r#"<scxml initial="idle">
//!          <state id="idle">
//!            <transition event="start" target="busy"/>
//!          </state>
//!          <state id="busy"/>
//!        </scxml>"#,
//! )
//! .expect("document is valid");
//!
//! assert!(chart.is_active("idle"));
//! chart.send_event(Event::new("start"));
//! assert!(chart.is_active("busy"));
//! ```

use std::path::Path;

pub use statechart_core;
pub use statechart_core::state_chart::{
    ChartDef, Diagnostics, StateChart, StateDef, StateKind, Status, TransitionDef, ValidationError,
};
pub use statechart_core::{Event, Val};
pub use statechart_ecma::EcmaOracle;
pub use statechart_fmt_xml::{parse_file, parse_str};

/// Parses and initializes a state chart from an SCXML file.
pub fn load(path: &Path) -> anyhow::Result<StateChart> {
    let document = parse_file(path)?;
    Ok(StateChart::initialize(document, EcmaOracle::new())?)
}

/// Parses and initializes a state chart from SCXML text.
pub fn load_str(text: &str) -> anyhow::Result<StateChart> {
    let document = parse_str(text)?;
    Ok(StateChart::initialize(document, EcmaOracle::new())?)
}
