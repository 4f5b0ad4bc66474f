//! The tag-stack parse loop for SCXML documents.

use super::vocabulary::*;
use super::{ParserError, attrs};
use anyhow::{Context, anyhow};
use log::{error, info, trace, warn};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event as XmlEvent};
use statechart_core::document::{Data, Document, Element, Executable, State, Transition};
use std::io::BufRead;
use std::str;

/// One open element on the parse stack. Unknown elements are pushed too, so
/// their content is tolerated and dropped on close.
#[derive(Debug)]
enum ScxmlTag {
    Scxml(Document),
    State(State),
    Transition(Transition),
    Datamodel(Vec<Data>),
    Data(Data),
    OnEntry(Vec<Executable>),
    OnExit(Vec<Executable>),
    Raise(Executable),
    Log(Executable),
    Unknown(String),
}

impl ScxmlTag {
    fn name(&self) -> &str {
        match self {
            ScxmlTag::Scxml(_) => TAG_SCXML,
            ScxmlTag::State(state) => match state.element {
                Element::State => TAG_STATE,
                Element::Parallel => TAG_PARALLEL,
                Element::Final => TAG_FINAL,
                Element::Initial => TAG_INITIAL,
            },
            ScxmlTag::Transition(_) => TAG_TRANSITION,
            ScxmlTag::Datamodel(_) => TAG_DATAMODEL,
            ScxmlTag::Data(_) => TAG_DATA,
            ScxmlTag::OnEntry(_) => TAG_ONENTRY,
            ScxmlTag::OnExit(_) => TAG_ONEXIT,
            ScxmlTag::Raise(_) => TAG_RAISE,
            ScxmlTag::Log(_) => TAG_LOG,
            ScxmlTag::Unknown(name) => name,
        }
    }

    fn is_executable(&self) -> bool {
        matches!(
            self,
            ScxmlTag::Transition(_) | ScxmlTag::OnEntry(_) | ScxmlTag::OnExit(_)
        )
    }

    /// Whether state-like children may appear directly below this element.
    fn accepts_states(&self) -> bool {
        match self {
            ScxmlTag::Scxml(_) => true,
            ScxmlTag::State(state) => {
                matches!(state.element, Element::State | Element::Parallel)
            }
            _ => false,
        }
    }
}

pub(super) fn parse<R: BufRead>(reader: &mut Reader<R>) -> anyhow::Result<Document> {
    let mut buf = Vec::new();
    let mut stack: Vec<ScxmlTag> = Vec::new();
    let mut order: u32 = 0;
    info!(target: "parser", "parsing scxml document");
    loop {
        let event = reader
            .read_event_into(&mut buf)
            .with_context(|| format!("parser position {}", reader.error_position()))?;
        match event {
            XmlEvent::Start(tag) => {
                let tag_name = str::from_utf8(tag.name().as_ref())?.to_owned();
                trace!(target: "parser", "'{tag_name}' open tag");
                match tag_name.as_str() {
                    TAG_SCXML if stack.is_empty() => {
                        let document = parse_scxml(&tag)
                            .map_err(|err| err.context(reader.error_position()))?;
                        stack.push(ScxmlTag::Scxml(document));
                    }
                    TAG_STATE | TAG_PARALLEL | TAG_FINAL | TAG_INITIAL
                        if stack.last().is_some_and(ScxmlTag::accepts_states) =>
                    {
                        let state = parse_state(&tag, &tag_name, &mut order)
                            .map_err(|err| err.context(reader.error_position()))?;
                        stack.push(ScxmlTag::State(state));
                    }
                    TAG_TRANSITION
                        if stack
                            .last()
                            .is_some_and(|top| matches!(top, ScxmlTag::State(_))) =>
                    {
                        let transition = parse_transition(&tag, &mut order)
                            .map_err(|err| err.context(reader.error_position()))?;
                        stack.push(ScxmlTag::Transition(transition));
                    }
                    TAG_DATAMODEL
                        if stack
                            .last()
                            .is_some_and(|top| matches!(top, ScxmlTag::Scxml(_))) =>
                    {
                        stack.push(ScxmlTag::Datamodel(Vec::new()));
                    }
                    TAG_DATA
                        if stack
                            .last()
                            .is_some_and(|top| matches!(top, ScxmlTag::Datamodel(_))) =>
                    {
                        let data = parse_data(&tag)
                            .map_err(|err| err.context(reader.error_position()))?;
                        stack.push(ScxmlTag::Data(data));
                    }
                    TAG_ONENTRY
                        if stack
                            .last()
                            .is_some_and(|top| matches!(top, ScxmlTag::State(_))) =>
                    {
                        stack.push(ScxmlTag::OnEntry(Vec::new()));
                    }
                    TAG_ONEXIT
                        if stack
                            .last()
                            .is_some_and(|top| matches!(top, ScxmlTag::State(_))) =>
                    {
                        stack.push(ScxmlTag::OnExit(Vec::new()));
                    }
                    TAG_RAISE if stack.last().is_some_and(ScxmlTag::is_executable) => {
                        let raise = parse_raise(&tag)
                            .map_err(|err| err.context(reader.error_position()))?;
                        stack.push(ScxmlTag::Raise(raise));
                    }
                    TAG_LOG if stack.last().is_some_and(ScxmlTag::is_executable) => {
                        let log = parse_log(&tag)
                            .map_err(|err| err.context(reader.error_position()))?;
                        stack.push(ScxmlTag::Log(log));
                    }
                    // Unknown or out-of-place: tolerated, content dropped
                    // on close.
                    _ => {
                        warn!(target: "parser", "unknown or unexpected tag {tag_name}, ignoring");
                        stack.push(ScxmlTag::Unknown(tag_name));
                    }
                }
            }
            XmlEvent::End(tag) => {
                let tag_qname = tag.name();
                let tag_name = str::from_utf8(tag_qname.as_ref())?;
                let Some(frame) = stack.pop() else {
                    error!(target: "parser", "unexpected end tag {tag_name}");
                    return Err(anyhow!(ParserError::UnexpectedEndTag(tag_name.to_owned())))
                        .with_context(|| format!("parser position {}", reader.buffer_position()));
                };
                if frame.name() != tag_name {
                    error!(target: "parser", "unexpected end tag {tag_name}");
                    return Err(anyhow!(ParserError::UnexpectedEndTag(tag_name.to_owned())))
                        .with_context(|| format!("parser position {}", reader.buffer_position()));
                }
                trace!(target: "parser", "'{tag_name}' end tag");
                match frame {
                    // The root only opens on an empty stack, so closing it
                    // completes the parse.
                    ScxmlTag::Scxml(document) => {
                        info!(target: "parser", "parsing completed");
                        return Ok(document);
                    }
                    ScxmlTag::State(state) => {
                        push_state(state, &mut stack)
                            .map_err(|err| err.context(reader.buffer_position()))?;
                    }
                    ScxmlTag::Transition(transition) => {
                        push_transition(transition, &mut stack)
                            .map_err(|err| err.context(reader.buffer_position()))?;
                    }
                    ScxmlTag::Datamodel(datamodel) => {
                        if let Some(ScxmlTag::Scxml(document)) = stack.last_mut() {
                            document.datamodel = datamodel;
                        }
                    }
                    ScxmlTag::Data(data) => {
                        push_data(data, &mut stack)
                            .map_err(|err| err.context(reader.buffer_position()))?;
                    }
                    ScxmlTag::OnEntry(executables) => {
                        if let Some(ScxmlTag::State(state)) = stack.last_mut() {
                            state.on_entry.extend(executables);
                        }
                    }
                    ScxmlTag::OnExit(executables) => {
                        if let Some(ScxmlTag::State(state)) = stack.last_mut() {
                            state.on_exit.extend(executables);
                        }
                    }
                    ScxmlTag::Raise(executable) | ScxmlTag::Log(executable) => {
                        push_executable(executable, &mut stack)
                            .map_err(|err| err.context(reader.buffer_position()))?;
                    }
                    ScxmlTag::Unknown(_) => {}
                }
            }
            XmlEvent::Empty(tag) => {
                let tag_qname = tag.name();
                let tag_name = str::from_utf8(tag_qname.as_ref())?;
                trace!(target: "parser", "'{tag_name}' empty tag");
                match tag_name {
                    TAG_SCXML if stack.is_empty() => {
                        // A childless root is degenerate but well-formed.
                        return parse_scxml(&tag)
                            .map_err(|err| err.context(reader.error_position()));
                    }
                    TAG_STATE | TAG_PARALLEL | TAG_FINAL | TAG_INITIAL
                        if stack.last().is_some_and(ScxmlTag::accepts_states) =>
                    {
                        let state = parse_state(&tag, tag_name, &mut order)
                            .map_err(|err| err.context(reader.error_position()))?;
                        push_state(state, &mut stack)
                            .map_err(|err| err.context(reader.buffer_position()))?;
                    }
                    TAG_TRANSITION
                        if stack
                            .last()
                            .is_some_and(|top| matches!(top, ScxmlTag::State(_))) =>
                    {
                        let transition = parse_transition(&tag, &mut order)
                            .map_err(|err| err.context(reader.error_position()))?;
                        push_transition(transition, &mut stack)
                            .map_err(|err| err.context(reader.buffer_position()))?;
                    }
                    TAG_DATAMODEL
                        if stack
                            .last()
                            .is_some_and(|top| matches!(top, ScxmlTag::Scxml(_))) => {}
                    TAG_DATA
                        if stack
                            .last()
                            .is_some_and(|top| matches!(top, ScxmlTag::Datamodel(_))) =>
                    {
                        let data = parse_data(&tag)
                            .map_err(|err| err.context(reader.error_position()))?;
                        push_data(data, &mut stack)
                            .map_err(|err| err.context(reader.buffer_position()))?;
                    }
                    TAG_RAISE if stack.last().is_some_and(ScxmlTag::is_executable) => {
                        let raise = parse_raise(&tag)
                            .map_err(|err| err.context(reader.error_position()))?;
                        push_executable(raise, &mut stack)
                            .map_err(|err| err.context(reader.buffer_position()))?;
                    }
                    TAG_LOG if stack.last().is_some_and(ScxmlTag::is_executable) => {
                        let log = parse_log(&tag)
                            .map_err(|err| err.context(reader.error_position()))?;
                        push_executable(log, &mut stack)
                            .map_err(|err| err.context(reader.buffer_position()))?;
                    }
                    _ => {
                        warn!(target: "parser", "unknown or unexpected tag {tag_name}, ignoring");
                    }
                }
            }
            XmlEvent::Text(_) | XmlEvent::Comment(_) | XmlEvent::Decl(_) => {}
            XmlEvent::Eof => {
                return if stack.is_empty() {
                    Err(anyhow!(ParserError::MissingRoot))
                } else {
                    Err(anyhow!(ParserError::UnclosedTags))
                }
                .with_context(|| format!("parser position {}", reader.buffer_position()));
            }
            _ => {
                warn!(target: "parser", "ignoring unsupported XML construct");
            }
        }
        // if we don't keep a borrow elsewhere, we can clear the buffer to keep memory usage low
        buf.clear();
    }
}

fn element_of(tag_name: &str) -> Element {
    match tag_name {
        TAG_PARALLEL => Element::Parallel,
        TAG_FINAL => Element::Final,
        TAG_INITIAL => Element::Initial,
        _ => Element::State,
    }
}

fn parse_scxml(tag: &BytesStart<'_>) -> anyhow::Result<Document> {
    let mut attrs = attrs(
        tag,
        &[],
        &[
            ATTR_INITIAL,
            ATTR_NAME,
            ATTR_VERSION,
            ATTR_DATAMODEL,
            ATTR_XMLNS,
        ],
    )?;
    if let Some(version) = attrs.get(ATTR_VERSION) {
        if version != "1.0" {
            warn!(target: "parser", "document declares version {version}, treating as 1.0");
        }
    }
    Ok(Document {
        name: attrs.remove(ATTR_NAME),
        initial: attrs.remove(ATTR_INITIAL),
        datamodel: Vec::new(),
        states: Vec::new(),
    })
}

fn parse_state(tag: &BytesStart<'_>, tag_name: &str, order: &mut u32) -> anyhow::Result<State> {
    let element = element_of(tag_name);
    let optional: &[&str] = match element {
        Element::State => &[ATTR_ID, ATTR_INITIAL],
        Element::Parallel | Element::Final => &[ATTR_ID],
        Element::Initial => &[],
    };
    let mut attrs = attrs(tag, &[], optional)?;
    let mut state = State::new(element, *order);
    *order += 1;
    state.id = attrs.remove(ATTR_ID);
    state.initial = attrs.remove(ATTR_INITIAL);
    Ok(state)
}

fn parse_transition(tag: &BytesStart<'_>, order: &mut u32) -> anyhow::Result<Transition> {
    let mut attrs = attrs(tag, &[], &[ATTR_EVENT, ATTR_TARGET, ATTR_COND])?;
    let transition = Transition {
        event: attrs.remove(ATTR_EVENT),
        target: attrs.remove(ATTR_TARGET),
        cond: attrs.remove(ATTR_COND),
        executables: Vec::new(),
        document_order: *order,
    };
    *order += 1;
    Ok(transition)
}

fn parse_raise(tag: &BytesStart<'_>) -> anyhow::Result<Executable> {
    let mut attrs = attrs(tag, &[ATTR_EVENT], &[])?;
    let event = attrs
        .remove(ATTR_EVENT)
        .ok_or(ParserError::MissingAttr(ATTR_EVENT.to_string()))?;
    Ok(Executable::Raise { event })
}

fn parse_log(tag: &BytesStart<'_>) -> anyhow::Result<Executable> {
    let mut attrs = attrs(tag, &[], &[ATTR_LABEL, ATTR_EXPR])?;
    Ok(Executable::Log {
        label: attrs.remove(ATTR_LABEL),
        expression: attrs.remove(ATTR_EXPR),
    })
}

fn parse_data(tag: &BytesStart<'_>) -> anyhow::Result<Data> {
    let mut attrs = attrs(tag, &[ATTR_ID], &[ATTR_EXPR])?;
    let id = attrs
        .remove(ATTR_ID)
        .ok_or(ParserError::MissingAttr(ATTR_ID.to_string()))?;
    Ok(Data {
        id,
        expression: attrs.remove(ATTR_EXPR),
    })
}

fn push_state(state: State, stack: &mut [ScxmlTag]) -> anyhow::Result<()> {
    match stack.last_mut() {
        Some(ScxmlTag::Scxml(document)) => {
            document.states.push(state);
            Ok(())
        }
        Some(ScxmlTag::State(parent)) => {
            parent.states.push(state);
            Ok(())
        }
        _ => Err(anyhow!("state elements must be inside <scxml> or a state")),
    }
}

fn push_transition(transition: Transition, stack: &mut [ScxmlTag]) -> anyhow::Result<()> {
    if let Some(ScxmlTag::State(state)) = stack.last_mut() {
        state.transitions.push(transition);
        Ok(())
    } else {
        Err(anyhow!("transitions must be inside a state"))
    }
}

fn push_executable(executable: Executable, stack: &mut [ScxmlTag]) -> anyhow::Result<()> {
    match stack.last_mut() {
        Some(ScxmlTag::Transition(transition)) => {
            transition.executables.push(executable);
            Ok(())
        }
        Some(ScxmlTag::OnEntry(executables)) | Some(ScxmlTag::OnExit(executables)) => {
            executables.push(executable);
            Ok(())
        }
        _ => Err(anyhow!(
            "executable content must be inside <transition>, <onentry> or <onexit>"
        )),
    }
}

fn push_data(data: Data, stack: &mut [ScxmlTag]) -> anyhow::Result<()> {
    if let Some(ScxmlTag::Datamodel(datamodel)) = stack.last_mut() {
        datamodel.push(data);
        Ok(())
    } else {
        Err(anyhow!("data must be inside datamodel"))
    }
}
