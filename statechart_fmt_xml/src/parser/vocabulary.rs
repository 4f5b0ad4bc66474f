//! Element and attribute names of the supported SCXML vocabulary.

pub const TAG_SCXML: &str = "scxml";
pub const TAG_STATE: &str = "state";
pub const TAG_PARALLEL: &str = "parallel";
pub const TAG_FINAL: &str = "final";
pub const TAG_INITIAL: &str = "initial";
pub const TAG_TRANSITION: &str = "transition";
pub const TAG_DATAMODEL: &str = "datamodel";
pub const TAG_DATA: &str = "data";
pub const TAG_ONENTRY: &str = "onentry";
pub const TAG_ONEXIT: &str = "onexit";
pub const TAG_LOG: &str = "log";
pub const TAG_RAISE: &str = "raise";

pub const ATTR_ID: &str = "id";
pub const ATTR_INITIAL: &str = "initial";
pub const ATTR_NAME: &str = "name";
pub const ATTR_VERSION: &str = "version";
pub const ATTR_DATAMODEL: &str = "datamodel";
pub const ATTR_XMLNS: &str = "xmlns";
pub const ATTR_EVENT: &str = "event";
pub const ATTR_TARGET: &str = "target";
pub const ATTR_COND: &str = "cond";
pub const ATTR_EXPR: &str = "expr";
pub const ATTR_LABEL: &str = "label";
