//! Validation and optimization of raw documents.
//!
//! A fixed pipeline of structural checks runs over the parsed tree,
//! accumulating errors and warnings. Only when no error was found is the
//! tree flattened into a [`ChartDef`]: parent pointers, the id-indexed state
//! map, derived state kinds, resolved initial children (folding `<initial>`
//! pseudo-states away) and the transition-by-source index, with every
//! `cond` attribute compiled through the oracle.

use super::{ChartDef, StateDef, StateKind, TransitionDef, ValidationError};
use crate::document::{Document, Element, State};
use crate::oracle::ConditionOracle;
use hashbrown::{HashMap, HashSet};
use log::warn;

/// Ordered diagnostic lists produced by validation. Errors block
/// optimization; warnings are advisory.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Diagnostics {
    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(target: "validator", "{message}");
        self.warnings.push(message);
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A state of the raw tree with its position in the flattened,
/// depth-first (= document order) listing.
struct Flat<'a> {
    state: &'a State,
    parent: Option<usize>,
}

fn flatten(document: &Document) -> Vec<Flat<'_>> {
    fn walk<'a>(states: &'a [State], parent: Option<usize>, flat: &mut Vec<Flat<'a>>) {
        for state in states {
            let index = flat.len();
            flat.push(Flat { state, parent });
            walk(&state.states, Some(index), flat);
        }
    }
    let mut flat = Vec::new();
    walk(&document.states, None, &mut flat);
    flat
}

fn element_name(element: Element) -> &'static str {
    match element {
        Element::State => "state",
        Element::Parallel => "parallel",
        Element::Final => "final",
        Element::Initial => "initial",
    }
}

fn state_label(flat: &[Flat<'_>], index: usize) -> String {
    let entry = &flat[index];
    if entry.state.is_pseudo() {
        let parent = entry
            .parent
            .and_then(|p| flat[p].state.id.as_deref())
            .unwrap_or("?");
        format!("<initial> of `{parent}`")
    } else {
        match entry.state.id.as_deref() {
            Some(id) => format!("`{id}`"),
            None => format!("unnamed <{}>", element_name(entry.state.element)),
        }
    }
}

/// The default child a compound state descends into: the `initial`
/// attribute, else the target of the `<initial>` pseudo-child, else the
/// first non-pseudo child.
fn resolved_initial(state: &State) -> Option<&str> {
    state
        .initial
        .as_deref()
        .or_else(|| {
            state
                .states
                .iter()
                .find(|child| child.is_pseudo())
                .and_then(|pseudo| pseudo.transitions.first())
                .and_then(|t| t.target.as_deref())
        })
        .or_else(|| {
            state
                .states
                .iter()
                .find(|child| !child.is_pseudo())
                .and_then(|child| child.id.as_deref())
        })
}

/// Runs the check pipeline and, when it comes back clean, builds the
/// optimized definition. Conditions are compiled here, once; a compile
/// failure is a validation error.
pub(super) fn build(
    document: Document,
    oracle: &mut dyn ConditionOracle,
) -> Result<ChartDef, ValidationError> {
    let mut diagnostics = Diagnostics::default();
    let flat = flatten(&document);

    // State ids: non-empty and globally unique.
    let mut ids: HashMap<&str, usize> = HashMap::with_capacity(flat.len());
    for (index, entry) in flat.iter().enumerate() {
        if entry.state.is_pseudo() {
            continue;
        }
        match entry.state.id.as_deref() {
            None => diagnostics.error(format!(
                "<{}> element without an id",
                element_name(entry.state.element)
            )),
            Some(id) => {
                if ids.insert(id, index).is_some() {
                    diagnostics.error(format!("state id `{id}` is declared more than once"));
                }
            }
        }
    }

    // Document initial: must resolve; non-top-level is advisory.
    let entry: Option<&str> = match document.initial.as_deref() {
        Some(initial) => match ids.get(initial) {
            None => {
                diagnostics.error(format!(
                    "document initial `{initial}` does not resolve to any state"
                ));
                None
            }
            Some(&index) => {
                if flat[index].parent.is_some() {
                    diagnostics
                        .warning(format!("document initial `{initial}` is not a top-level state"));
                }
                Some(initial)
            }
        },
        None => match document.states.iter().find(|s| !s.is_pseudo()) {
            None => {
                diagnostics.error("document declares no states");
                None
            }
            // A missing id on the first state is already an error above.
            Some(first) => first.id.as_deref(),
        },
    };

    // Transition targets resolve.
    for (index, entry) in flat.iter().enumerate() {
        for transition in &entry.state.transitions {
            if let Some(target) = transition.target.as_deref() {
                if !ids.contains_key(target) {
                    diagnostics.error(format!(
                        "transition target `{target}` on {} does not resolve",
                        state_label(&flat, index)
                    ));
                }
            }
        }
    }

    // Compound `initial` attribute: a direct child, and not combined with
    // an <initial> pseudo-child.
    for (index, entry) in flat.iter().enumerate() {
        if entry.state.is_pseudo() {
            continue;
        }
        if let Some(attr) = entry.state.initial.as_deref() {
            let is_child = entry
                .state
                .states
                .iter()
                .any(|child| child.id.as_deref() == Some(attr));
            if !is_child {
                diagnostics.error(format!(
                    "initial attribute `{attr}` of {} does not name a direct child",
                    state_label(&flat, index)
                ));
            }
            if entry.state.states.iter().any(State::is_pseudo) {
                diagnostics.error(format!(
                    "{} declares both an initial attribute and an <initial> child",
                    state_label(&flat, index)
                ));
            }
        }
    }

    // <initial> pseudo-state shape.
    for state in &document.states {
        if state.is_pseudo() {
            diagnostics.error("<initial> cannot appear at document level");
        }
    }
    for (index, entry) in flat.iter().enumerate() {
        if entry.state.is_pseudo() {
            continue;
        }
        let label = || state_label(&flat, index);
        let pseudos: Vec<&State> = entry.state.states.iter().filter(|c| c.is_pseudo()).collect();
        if pseudos.len() > 1 {
            diagnostics.error(format!("{} has more than one <initial> child", label()));
        }
        for pseudo in pseudos {
            if pseudo.transitions.len() != 1 {
                diagnostics.error(format!(
                    "<initial> of {} must contain exactly one transition",
                    label()
                ));
                continue;
            }
            let transition = &pseudo.transitions[0];
            if transition.event.is_some() || transition.cond.is_some() {
                diagnostics.warning(format!(
                    "the transition of <initial> of {} ignores its event and cond",
                    label()
                ));
            }
            match transition.target.as_deref() {
                None => diagnostics.error(format!(
                    "the transition of <initial> of {} has no target",
                    label()
                )),
                Some(target) => {
                    // Pseudo-states have no id, so matching against the
                    // non-pseudo children also rules out pseudo targets.
                    let sibling = entry
                        .state
                        .states
                        .iter()
                        .any(|child| !child.is_pseudo() && child.id.as_deref() == Some(target));
                    if !sibling {
                        diagnostics.error(format!(
                            "<initial> of {} must target a direct sibling, `{target}` is not one",
                            label()
                        ));
                    }
                }
            }
        }
    }

    // Parallel children: <final> is structural nonsense there, <initial>
    // is meaningless because every region is entered.
    for (index, entry) in flat.iter().enumerate() {
        if entry.state.element != Element::Parallel {
            continue;
        }
        for child in &entry.state.states {
            match child.element {
                Element::Final => diagnostics.error(format!(
                    "parallel {} cannot contain a <final> child",
                    state_label(&flat, index)
                )),
                Element::Initial => diagnostics.warning(format!(
                    "<initial> inside parallel {} is ignored",
                    state_label(&flat, index)
                )),
                Element::State | Element::Parallel => {}
            }
        }
    }

    // Reachability sweep from the entry state: entry descent, transition
    // targets and parent chains. Over-approximate on purpose; it only
    // gates warnings.
    if let Some(entry_id) = entry {
        if let Some(&seed) = ids.get(entry_id) {
            let mut reachable: HashSet<usize> = HashSet::new();
            let mut queue: Vec<usize> = vec![seed];
            while let Some(index) = queue.pop() {
                if !reachable.insert(index) {
                    continue;
                }
                let item = &flat[index];
                if let Some(parent) = item.parent {
                    queue.push(parent);
                }
                match item.state.element {
                    Element::Parallel => {
                        for child in &item.state.states {
                            if let Some(&i) = child.id.as_deref().and_then(|id| ids.get(id)) {
                                queue.push(i);
                            }
                        }
                    }
                    Element::State => {
                        if let Some(&i) = resolved_initial(item.state).and_then(|id| ids.get(id)) {
                            queue.push(i);
                        }
                    }
                    Element::Final | Element::Initial => {}
                }
                for transition in &item.state.transitions {
                    if let Some(&i) = transition.target.as_deref().and_then(|id| ids.get(id)) {
                        queue.push(i);
                    }
                }
            }
            for (index, item) in flat.iter().enumerate() {
                if !item.state.is_pseudo() && !reachable.contains(&index) {
                    diagnostics.warning(format!(
                        "state {} is unreachable",
                        state_label(&flat, index)
                    ));
                }
            }
        }
    }

    if !diagnostics.is_clean() {
        let _ = entry;
        drop(ids);
        drop(flat);
        return Err(ValidationError {
            document,
            diagnostics,
        });
    }

    // Optimize: flatten into the id-indexed form, derive kinds, fold
    // pseudo-states into resolved initials, compile conditions.
    let mut states: HashMap<String, StateDef> = HashMap::with_capacity(flat.len());
    let mut transitions: HashMap<String, Vec<TransitionDef>> = HashMap::with_capacity(flat.len());
    for entry_item in &flat {
        if entry_item.state.is_pseudo() {
            continue;
        }
        let Some(id) = entry_item.state.id.as_deref() else {
            // Unreachable once the id checks passed.
            continue;
        };
        let children: Vec<String> = entry_item
            .state
            .states
            .iter()
            .filter(|child| !child.is_pseudo())
            .filter_map(|child| child.id.clone())
            .collect();
        let kind = match entry_item.state.element {
            Element::Final => StateKind::Final,
            Element::Parallel => StateKind::Parallel,
            Element::State | Element::Initial if children.is_empty() => StateKind::Atomic,
            Element::State | Element::Initial => StateKind::Compound,
        };
        let initial = if kind == StateKind::Compound {
            resolved_initial(entry_item.state).map(str::to_owned)
        } else {
            None
        };
        let mut list = Vec::with_capacity(entry_item.state.transitions.len());
        for transition in &entry_item.state.transitions {
            let cond = match transition.cond.as_deref() {
                None => None,
                Some(source) => match oracle.compile(source) {
                    Ok(cond) => Some(cond),
                    Err(err) => {
                        diagnostics
                            .error(format!("invalid condition on transition from `{id}`: {err}"));
                        None
                    }
                },
            };
            list.push(TransitionDef {
                source: id.to_owned(),
                event: transition.event.clone(),
                target: transition.target.clone(),
                cond,
                executables: transition.executables.clone(),
                document_order: transition.document_order,
            });
        }
        transitions.insert(id.to_owned(), list);
        let parent = entry_item
            .parent
            .and_then(|p| flat[p].state.id.as_deref())
            .map(str::to_owned);
        states.insert(
            id.to_owned(),
            StateDef {
                id: id.to_owned(),
                kind,
                parent,
                children,
                initial,
                document_order: entry_item.state.document_order,
                on_entry: entry_item.state.on_entry.clone(),
                on_exit: entry_item.state.on_exit.clone(),
            },
        );
    }

    let entry = entry.map(str::to_owned);
    drop(ids);
    drop(flat);
    if !diagnostics.is_clean() {
        return Err(ValidationError {
            document,
            diagnostics,
        });
    }
    let Some(entry) = entry else {
        return Err(ValidationError {
            document,
            diagnostics,
        });
    };

    let top: Vec<String> = document
        .states
        .iter()
        .filter(|s| !s.is_pseudo())
        .filter_map(|s| s.id.clone())
        .collect();

    Ok(ChartDef {
        name: document.name.clone(),
        entry,
        top,
        states,
        transitions,
        datamodel: document.datamodel.clone(),
        warnings: diagnostics.warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::super::StateChart;
    use super::*;
    use crate::document::Transition;
    use crate::oracle::{Cond, EvalContext, OracleError, TrivialOracle};

    fn state(id: &str, order: u32) -> State {
        let mut state = State::new(Element::State, order);
        state.id = Some(id.to_owned());
        state
    }

    fn doc(initial: &str, states: Vec<State>) -> Document {
        Document {
            initial: Some(initial.to_owned()),
            states,
            ..Document::default()
        }
    }

    fn errors_of(document: Document) -> Vec<String> {
        match StateChart::initialize(document, TrivialOracle) {
            Ok(_) => Vec::new(),
            Err(err) => err.diagnostics.errors,
        }
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let document = doc("a", vec![state("a", 0), state("a", 1)]);
        let errors = errors_of(document);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("`a`") && errors[0].contains("more than once"));
    }

    #[test]
    fn missing_id_is_rejected() {
        let document = doc("a", vec![state("a", 0), State::new(Element::State, 1)]);
        let errors = errors_of(document);
        assert!(errors.iter().any(|e| e.contains("without an id")));
    }

    #[test]
    fn unresolved_targets_are_rejected() {
        let mut a = state("a", 0);
        a.transitions.push(Transition {
            event: Some("go".to_owned()),
            target: Some("ghost".to_owned()),
            cond: None,
            executables: Vec::new(),
            document_order: 1,
        });
        let errors = errors_of(doc("a", vec![a]));
        assert!(errors.iter().any(|e| e.contains("`ghost`")));
    }

    #[test]
    fn unresolved_document_initial_is_rejected() {
        let errors = errors_of(doc("ghost", vec![state("a", 0)]));
        assert!(errors.iter().any(|e| e.contains("document initial `ghost`")));
    }

    #[test]
    fn nested_document_initial_warns_and_enters() {
        let mut p = state("p", 0);
        p.states.push(state("c", 1));
        let document = doc("c", vec![p]);
        let chart = StateChart::initialize(document, TrivialOracle).expect("warning only");
        assert!(
            chart
                .definition()
                .warnings()
                .iter()
                .any(|w| w.contains("not a top-level state"))
        );
        assert!(chart.is_active("c") && chart.is_active("p"));
    }

    #[test]
    fn initial_attribute_must_name_a_direct_child() {
        let mut p = state("p", 0);
        p.initial = Some("elsewhere".to_owned());
        p.states.push(state("c", 1));
        let errors = errors_of(doc("p", vec![p, state("elsewhere", 2)]));
        assert!(errors.iter().any(|e| e.contains("does not name a direct child")));
    }

    #[test]
    fn initial_attribute_and_pseudo_child_conflict() {
        let mut p = state("p", 0);
        p.initial = Some("c".to_owned());
        let mut pseudo = State::new(Element::Initial, 1);
        pseudo.transitions.push(Transition {
            event: None,
            target: Some("c".to_owned()),
            cond: None,
            executables: Vec::new(),
            document_order: 2,
        });
        p.states.push(pseudo);
        p.states.push(state("c", 3));
        let errors = errors_of(doc("p", vec![p]));
        assert!(errors.iter().any(|e| e.contains("both an initial attribute")));
    }

    #[test]
    fn pseudo_initial_shape_is_checked() {
        // No transition at all.
        let mut p = state("p", 0);
        p.states.push(State::new(Element::Initial, 1));
        p.states.push(state("c", 2));
        let errors = errors_of(doc("p", vec![p]));
        assert!(errors.iter().any(|e| e.contains("exactly one transition")));

        // Target is not a sibling.
        let mut p = state("p", 0);
        let mut pseudo = State::new(Element::Initial, 1);
        pseudo.transitions.push(Transition {
            event: None,
            target: Some("outside".to_owned()),
            cond: None,
            executables: Vec::new(),
            document_order: 2,
        });
        p.states.push(pseudo);
        p.states.push(state("c", 3));
        let errors = errors_of(doc("p", vec![p, state("outside", 4)]));
        assert!(errors.iter().any(|e| e.contains("direct sibling")));
    }

    #[test]
    fn pseudo_initial_selects_the_default_child() {
        let mut p = state("p", 0);
        let mut pseudo = State::new(Element::Initial, 1);
        pseudo.transitions.push(Transition {
            event: None,
            target: Some("c2".to_owned()),
            cond: None,
            executables: Vec::new(),
            document_order: 2,
        });
        p.states.push(pseudo);
        p.states.push(state("c1", 3));
        p.states.push(state("c2", 4));
        let chart = StateChart::initialize(doc("p", vec![p]), TrivialOracle).expect("valid");
        let leaves: Vec<&str> = chart.active_leaves().collect();
        assert_eq!(leaves, ["c2"]);
        // The pseudo-state is folded away entirely.
        assert_eq!(chart.definition().state("p").and_then(StateDef::initial), Some("c2"));
        assert_eq!(chart.definition().state("p").map(|s| s.children().len()), Some(2));
    }

    #[test]
    fn final_inside_parallel_is_rejected() {
        let mut par = State::new(Element::Parallel, 0);
        par.id = Some("par".to_owned());
        let mut f = State::new(Element::Final, 1);
        f.id = Some("f".to_owned());
        par.states.push(f);
        par.states.push(state("r", 2));
        let errors = errors_of(doc("par", vec![par]));
        assert!(errors.iter().any(|e| e.contains("<final> child")));
    }

    #[test]
    fn unreachable_states_warn() {
        let mut a = state("a", 0);
        a.transitions.push(Transition {
            event: Some("go".to_owned()),
            target: Some("b".to_owned()),
            cond: None,
            executables: Vec::new(),
            document_order: 1,
        });
        let document = doc("a", vec![a, state("b", 2), state("island", 3)]);
        let chart = StateChart::initialize(document, TrivialOracle).expect("warnings only");
        assert!(
            chart
                .definition()
                .warnings()
                .iter()
                .any(|w| w.contains("`island`") && w.contains("unreachable"))
        );
    }

    #[test]
    fn kinds_follow_element_and_structure() {
        let mut p = state("p", 0);
        let mut c = state("c", 1);
        c.transitions.push(Transition {
            event: Some("spread".to_owned()),
            target: Some("par".to_owned()),
            cond: None,
            executables: Vec::new(),
            document_order: 2,
        });
        p.states.push(c);
        p.transitions.push(Transition {
            event: Some("go".to_owned()),
            target: Some("f".to_owned()),
            cond: None,
            executables: Vec::new(),
            document_order: 3,
        });
        let mut par = State::new(Element::Parallel, 4);
        par.id = Some("par".to_owned());
        par.states.push(state("r1", 5));
        par.states.push(state("r2", 6));
        let mut f = State::new(Element::Final, 7);
        f.id = Some("f".to_owned());
        let document = Document {
            initial: Some("p".to_owned()),
            states: vec![p, par, f],
            ..Document::default()
        };
        let chart = StateChart::initialize(document, TrivialOracle).expect("valid");
        let def = chart.definition();
        assert_eq!(def.state("p").map(StateDef::kind), Some(StateKind::Compound));
        assert_eq!(def.state("c").map(StateDef::kind), Some(StateKind::Atomic));
        assert_eq!(def.state("par").map(StateDef::kind), Some(StateKind::Parallel));
        assert_eq!(def.state("f").map(StateDef::kind), Some(StateKind::Final));
        assert_eq!(def.state("par").and_then(StateDef::parent), None);
        assert_eq!(def.state("c").and_then(StateDef::parent), Some("p"));
        assert_eq!(def.entry(), "p");
        assert_eq!(def.top(), ["p", "par", "f"]);
    }

    #[test]
    fn transitions_by_source_preserve_document_order() {
        let mut a = state("a", 0);
        for (i, target) in ["b", "c", "b"].iter().enumerate() {
            a.transitions.push(Transition {
                event: Some(format!("e{i}")),
                target: Some((*target).to_owned()),
                cond: None,
                executables: Vec::new(),
                document_order: 1 + i as u32,
            });
        }
        let document = doc("a", vec![a, state("b", 4), state("c", 5)]);
        let chart = StateChart::initialize(document, TrivialOracle).expect("valid");
        let orders: Vec<u32> = chart
            .definition()
            .transitions_from("a")
            .iter()
            .map(TransitionDef::document_order)
            .collect();
        assert_eq!(orders, [1, 2, 3]);
    }

    /// Rejects every compile attempt, to exercise the compile-failure path.
    #[derive(Debug)]
    struct RefusingOracle;

    impl ConditionOracle for RefusingOracle {
        fn compile(&mut self, source: &str) -> Result<Cond, OracleError> {
            Err(OracleError::Unsupported(source.to_owned()))
        }

        fn eval(&self, cond: Cond, _ctx: &EvalContext<'_>) -> Result<bool, OracleError> {
            Err(OracleError::MissingCond(cond))
        }
    }

    #[test]
    fn condition_compile_failure_is_a_validation_error() {
        let mut a = state("a", 0);
        a.transitions.push(Transition {
            event: Some("go".to_owned()),
            target: Some("b".to_owned()),
            cond: Some("nonsense!!".to_owned()),
            executables: Vec::new(),
            document_order: 1,
        });
        let document = doc("a", vec![a, state("b", 2)]);
        let err = StateChart::initialize(document, RefusingOracle).expect_err("compile fails");
        assert!(
            err.diagnostics
                .errors
                .iter()
                .any(|e| e.contains("invalid condition"))
        );
    }
}
