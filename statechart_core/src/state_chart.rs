//! The optimized state-chart model and its microstep interpreter.
//!
//! A state chart is defined by a [`ChartDef`]: the validated, flattened form
//! of a parsed [`Document`] with parent pointers, document-order indices,
//! state kinds and a transition-by-source index, all resolved so that the
//! interpreter never searches the tree at runtime. A [`ChartDef`] is
//! immutable once built and is produced only by validation, which guarantees
//! that every cross-reference in it resolves.
//!
//! The runtime object is the [`StateChart`]: it shares the definition behind
//! an [`Arc`] and owns the only mutable pieces, the configuration (the set
//! of active leaf states) and the internal event queue. Cloning a chart is
//! cheap, so a host that wants the functional `(chart, event) -> chart`
//! shape can clone before calling [`StateChart::send_event`].
//!
//! ```
//! use statechart_core::document::{Document, Element, State, Transition};
//! use statechart_core::oracle::TrivialOracle;
//! use statechart_core::state_chart::StateChart;
//! use statechart_core::Event;
//!
//! // <scxml initial="a"><state id="a"><transition event="go" target="b"/></state>
//! //                    <state id="b"/></scxml>
//! let mut a = State::new(Element::State, 0);
//! a.id = Some("a".to_owned());
//! a.transitions.push(Transition {
//!     event: Some("go".to_owned()),
//!     target: Some("b".to_owned()),
//!     cond: None,
//!     executables: Vec::new(),
//!     document_order: 1,
//! });
//! let mut b = State::new(Element::State, 2);
//! b.id = Some("b".to_owned());
//! let document = Document {
//!     initial: Some("a".to_owned()),
//!     states: vec![a, b],
//!     ..Document::default()
//! };
//!
//! let mut chart = StateChart::initialize(document, TrivialOracle).expect("document is valid");
//! assert!(chart.is_active("a"));
//!
//! chart.send_event(Event::new("go"));
//! assert!(chart.is_active("b"));
//!
//! // An event nothing listens for is a silent no-op.
//! chart.send_event(Event::new("go"));
//! assert!(chart.is_active("b"));
//! ```

mod builder;

use crate::document::{Data, Document, Executable};
use crate::grammar::Event;
use crate::oracle::{Cond, ConditionOracle, EvalContext};
pub use builder::Diagnostics;
use hashbrown::HashMap;
use log::{info, trace, warn};
use smallvec::SmallVec;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;

/// Default cap on consecutive eventless microsteps within one macrostep.
pub const DEFAULT_EVENTLESS_LIMIT: usize = 100;

/// The kind of a state, derived from its element and structure during
/// validation. `<initial>` pseudo-states are folded into their parent's
/// resolved initial and have no kind of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    /// A `<state>` without child states.
    Atomic,
    /// A `<state>` with child states; exactly one child subtree is active
    /// at a time.
    Compound,
    /// A `<parallel>`; all child subtrees are active together.
    Parallel,
    /// A `<final>`; atomic, and terminal when top-level.
    Final,
}

/// A state in the optimized document.
#[derive(Debug, Clone)]
pub struct StateDef {
    id: String,
    kind: StateKind,
    parent: Option<String>,
    children: Vec<String>,
    initial: Option<String>,
    document_order: u32,
    on_entry: Vec<Executable>,
    on_exit: Vec<Executable>,
}

impl StateDef {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> StateKind {
        self.kind
    }

    /// Id of the parent state; `None` for top-level states.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    /// Child state ids in document order.
    pub fn children(&self) -> &[String] {
        &self.children
    }

    /// Resolved initial child of a compound state: the `initial` attribute,
    /// else the target of the `<initial>` pseudo-child, else the first
    /// child.
    pub fn initial(&self) -> Option<&str> {
        self.initial.as_deref()
    }

    pub fn document_order(&self) -> u32 {
        self.document_order
    }

    pub fn on_entry(&self) -> &[Executable] {
        &self.on_entry
    }

    pub fn on_exit(&self) -> &[Executable] {
        &self.on_exit
    }
}

/// A transition in the optimized document. The condition, if any, has been
/// compiled by the oracle; the target is guaranteed to resolve.
#[derive(Debug, Clone)]
pub struct TransitionDef {
    source: String,
    event: Option<String>,
    target: Option<String>,
    cond: Option<Cond>,
    executables: Vec<Executable>,
    document_order: u32,
}

impl TransitionDef {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The event descriptor; `None` makes this an eventless transition.
    pub fn event(&self) -> Option<&str> {
        self.event.as_deref()
    }

    /// The target state id; `None` makes this a targetless transition that
    /// runs its executables without touching the configuration.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn cond(&self) -> Option<Cond> {
        self.cond
    }

    pub fn executables(&self) -> &[Executable] {
        &self.executables
    }

    pub fn document_order(&self) -> u32 {
        self.document_order
    }
}

/// The validated, optimized document: id-indexed states with parent
/// pointers, a transition-by-source index, and the resolved entry state.
///
/// Immutable once built; any number of [`StateChart`]s may share one behind
/// an [`Arc`]. The only way to obtain a `ChartDef` is through
/// [`StateChart::initialize`], so holding one proves the document passed
/// validation.
#[derive(Debug)]
pub struct ChartDef {
    name: Option<String>,
    entry: String,
    top: Vec<String>,
    states: HashMap<String, StateDef>,
    transitions: HashMap<String, Vec<TransitionDef>>,
    datamodel: Vec<Data>,
    warnings: Vec<String>,
}

impl ChartDef {
    /// Root `name` attribute, advisory.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The state entered at initialization: the document's `initial`
    /// attribute, or the first top-level state.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Top-level state ids in document order.
    pub fn top(&self) -> &[String] {
        &self.top
    }

    pub fn state(&self, id: &str) -> Option<&StateDef> {
        self.states.get(id)
    }

    /// Transitions declared on the given state, in document order.
    pub fn transitions_from(&self, id: &str) -> &[TransitionDef] {
        self.transitions.get(id).map_or(&[], Vec::as_slice)
    }

    /// `<data>` declarations of the root `<datamodel>`.
    pub fn datamodel(&self) -> &[Data] {
        &self.datamodel
    }

    /// Advisory diagnostics collected during validation.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Proper ancestors of a state, nearest first.
    pub fn ancestors<'a>(&'a self, id: &str) -> SmallVec<[&'a str; 8]> {
        let mut chain = SmallVec::new();
        let mut current = self.states.get(id).and_then(StateDef::parent);
        while let Some(parent) = current {
            chain.push(parent);
            current = self.states.get(parent).and_then(StateDef::parent);
        }
        chain
    }

    /// Whether `ancestor` is a proper ancestor of `id`.
    pub fn is_proper_ancestor(&self, ancestor: &str, id: &str) -> bool {
        let mut current = self.states.get(id).and_then(StateDef::parent);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.states.get(parent).and_then(StateDef::parent);
        }
        false
    }

    /// Least common compound ancestor of two states: mark the source's
    /// proper ancestors, then walk the target's until one is marked.
    /// `None` stands for the document root.
    pub fn lcca(&self, source: &str, target: &str) -> Option<&str> {
        let marked = self.ancestors(source);
        self.ancestors(target)
            .into_iter()
            .find(|anc| marked.contains(anc))
    }

    fn document_order(&self, id: &str) -> u32 {
        self.states.get(id).map_or(u32::MAX, StateDef::document_order)
    }

    /// Collects every state entered when entering `id`, by kind:
    /// atomic and final states are entered directly, compound states
    /// descend into their resolved initial child, parallel states descend
    /// into every child. A compound whose initial child does not resolve
    /// contributes nothing.
    fn enter_states(&self, id: &str, entered: &mut Vec<String>) {
        let Some(state) = self.states.get(id) else {
            return;
        };
        if entered.iter().any(|e| e == id) {
            return;
        }
        match state.kind {
            StateKind::Atomic | StateKind::Final => entered.push(id.to_owned()),
            StateKind::Compound => {
                let initial = state
                    .initial
                    .as_deref()
                    .filter(|child| self.states.contains_key(*child));
                if let Some(child) = initial {
                    entered.push(id.to_owned());
                    self.enter_states(child, entered);
                }
            }
            StateKind::Parallel => {
                entered.push(id.to_owned());
                for child in &state.children {
                    self.enter_states(child, entered);
                }
            }
        }
    }
}

/// Lifecycle of a chart. A chart in hand is already past `Uninitialized`:
/// construction is the `Uninitialized -> Running` transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Accepting events.
    Running,
    /// Every configured leaf is a top-level `<final>`; events are silently
    /// ignored.
    Stopped,
}

/// The error type of [`StateChart::initialize`]: the raw document handed
/// back together with the accumulated diagnostics.
#[derive(Debug, Error)]
#[error("state-chart document is invalid: {}", .diagnostics.errors.join("; "))]
pub struct ValidationError {
    pub document: Document,
    pub diagnostics: Diagnostics,
}

/// What a microstep is reacting to: a named event (external or internal) or
/// the eventless fixpoint.
#[derive(Clone, Copy)]
enum Trigger<'a> {
    Event(&'a Event),
    Null,
}

/// An executable state chart: a shared [`ChartDef`], the configuration of
/// active leaf states, and the internal event queue.
#[derive(Debug, Clone)]
pub struct StateChart {
    def: Arc<ChartDef>,
    oracle: Arc<dyn ConditionOracle>,
    configuration: BTreeSet<String>,
    internal: VecDeque<Event>,
    status: Status,
    eventless_limit: usize,
}

impl StateChart {
    /// Validates and optimizes the document, compiles its conditions
    /// through the oracle, enters the initial configuration and runs the
    /// eventless fixpoint.
    ///
    /// On validation errors the raw document comes back inside the error
    /// together with both diagnostic lists.
    pub fn initialize(
        document: Document,
        oracle: impl ConditionOracle + 'static,
    ) -> Result<StateChart, ValidationError> {
        let mut oracle = oracle;
        let def = builder::build(document, &mut oracle)?;
        let mut chart = StateChart {
            def: Arc::new(def),
            oracle: Arc::new(oracle),
            configuration: BTreeSet::new(),
            internal: VecDeque::new(),
            status: Status::Running,
            eventless_limit: DEFAULT_EVENTLESS_LIMIT,
        };
        chart.enter_initial();
        chart.stabilize();
        Ok(chart)
    }

    /// The validated definition this chart runs on.
    pub fn definition(&self) -> &ChartDef {
        &self.def
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Cap on consecutive eventless microsteps; reaching it freezes the
    /// configuration at the last stable microstep instead of diverging.
    pub fn eventless_limit(&self) -> usize {
        self.eventless_limit
    }

    pub fn set_eventless_limit(&mut self, limit: usize) {
        self.eventless_limit = limit.max(1);
    }

    /// The active leaf states, in id order.
    pub fn active_leaves(&self) -> impl Iterator<Item = &str> {
        self.configuration.iter().map(String::as_str)
    }

    /// The configuration together with every ancestor of its leaves.
    pub fn active_with_ancestors(&self) -> BTreeSet<String> {
        let mut active = BTreeSet::new();
        for leaf in &self.configuration {
            for anc in self.def.ancestors(leaf) {
                active.insert(anc.to_owned());
            }
            active.insert(leaf.clone());
        }
        active
    }

    /// Whether the state is active, either as a configured leaf or as an
    /// ancestor of one.
    pub fn is_active(&self, id: &str) -> bool {
        self.configuration.contains(id)
            || self
                .configuration
                .iter()
                .any(|leaf| self.def.is_proper_ancestor(id, leaf))
    }

    /// Delivers one external event: one driving microstep, then the
    /// internal queue is drained and eventless transitions run to fixpoint.
    ///
    /// Total by construction: a stopped chart and an event no transition
    /// matches are both silent no-ops.
    pub fn send_event(&mut self, event: Event) {
        if self.status == Status::Stopped {
            trace!(target: "interpreter", "chart is stopped, ignoring event `{}`", event.name());
            return;
        }
        trace!(target: "interpreter", "processing external event `{}`", event.name());
        self.microstep(Trigger::Event(&event));
        self.stabilize();
    }

    /// Enters the document's entry state, ancestors and parallel sibling
    /// regions included, and runs the onentry content of everything
    /// entered.
    fn enter_initial(&mut self) {
        let def = Arc::clone(&self.def);
        let active = BTreeSet::new();
        let mut entered = Vec::new();
        Self::entry_path(&def, def.entry(), None, &active, &mut entered);
        entered.sort_by_key(|id| def.document_order(id));
        self.install(&def, &[], &entered);
        for id in &entered {
            if let Some(state) = def.state(id) {
                self.run_executables(state.on_entry());
            }
        }
        trace!(target: "interpreter", "initial configuration {:?}", self.configuration);
    }

    /// Drains the internal queue (FIFO, one microstep each), then runs the
    /// eventless fixpoint; repeats until both are exhausted. The eventless
    /// cap and an equal cap on raise cascades keep this from diverging.
    fn stabilize(&mut self) {
        let mut rounds = 0;
        loop {
            while let Some(event) = self.internal.pop_front() {
                trace!(target: "interpreter", "processing internal event `{}`", event.name());
                self.microstep(Trigger::Event(&event));
            }
            let mut steps = 0;
            while self.microstep(Trigger::Null) {
                steps += 1;
                if steps >= self.eventless_limit {
                    warn!(
                        target: "interpreter",
                        "eventless transitions did not stabilize within {} microsteps, freezing configuration",
                        self.eventless_limit
                    );
                    self.update_status();
                    return;
                }
            }
            if self.internal.is_empty() {
                break;
            }
            rounds += 1;
            if rounds >= self.eventless_limit {
                warn!(
                    target: "interpreter",
                    "raised events did not stabilize within {} rounds, freezing configuration",
                    self.eventless_limit
                );
                break;
            }
        }
        self.update_status();
    }

    /// One microstep: select enabled transitions, resolve conflicts, exit,
    /// run transition content, install the new configuration, enter.
    /// Returns whether any transition fired.
    fn microstep(&mut self, trigger: Trigger<'_>) -> bool {
        let def = Arc::clone(&self.def);
        let active = self.active_with_ancestors();
        let selected = self.select_transitions(&def, trigger, &active);
        if selected.is_empty() {
            return false;
        }

        let mut exited: BTreeSet<String> = BTreeSet::new();
        for transition in &selected {
            if let Some(target) = transition.target() {
                let lcca = def.lcca(transition.source(), target);
                exited.extend(Self::exit_set(&def, lcca, &active));
            }
        }
        let active_after: BTreeSet<String> = active.difference(&exited).cloned().collect();

        let mut entered: Vec<String> = Vec::new();
        for transition in &selected {
            if let Some(target) = transition.target() {
                let lcca = def.lcca(transition.source(), target);
                Self::entry_path(&def, target, lcca, &active_after, &mut entered);
            }
        }
        entered.sort_by_key(|id| def.document_order(id));

        // Teardown in reverse document order, before the configuration
        // changes, so onexit still observes the old configuration.
        let mut exit_ordered: Vec<&str> = exited.iter().map(String::as_str).collect();
        exit_ordered.sort_by_key(|id| std::cmp::Reverse(def.document_order(id)));
        for id in &exit_ordered {
            if let Some(state) = def.state(id) {
                self.run_executables(state.on_exit());
            }
        }

        for transition in &selected {
            self.run_executables(transition.executables());
        }

        self.install(&def, &exit_ordered, &entered);

        for id in &entered {
            if let Some(state) = def.state(id) {
                self.run_executables(state.on_entry());
            }
        }

        trace!(
            target: "interpreter",
            "microstep fired {} transition(s): exited {:?}, entered {:?}",
            selected.len(),
            exit_ordered,
            entered
        );
        true
    }

    /// Removes the exited leaves and adds the entered ones.
    fn install(&mut self, def: &ChartDef, exited: &[&str], entered: &[String]) {
        for id in exited {
            self.configuration.remove(*id);
        }
        for id in entered {
            let leaf = def
                .state(id)
                .is_some_and(|s| matches!(s.kind(), StateKind::Atomic | StateKind::Final));
            if leaf {
                self.configuration.insert(id.clone());
            }
        }
    }

    /// Transitions enabled for the trigger, conflict-free, in document
    /// order.
    fn select_transitions<'d>(
        &self,
        def: &'d ChartDef,
        trigger: Trigger<'_>,
        active: &BTreeSet<String>,
    ) -> Vec<&'d TransitionDef> {
        let in_state = |id: &str| active.contains(id);
        let event = match trigger {
            Trigger::Event(event) => Some(event),
            Trigger::Null => None,
        };
        let ctx = EvalContext::new(event, &in_state);

        let mut enabled: Vec<&TransitionDef> = Vec::new();
        for id in active {
            for transition in def.transitions_from(id) {
                let matches = match trigger {
                    Trigger::Event(event) => transition
                        .event()
                        .is_some_and(|descriptor| event_matches(descriptor, event.name())),
                    Trigger::Null => transition.event().is_none(),
                };
                if !matches {
                    continue;
                }
                let pass = match transition.cond() {
                    None => true,
                    // Invalid-expression policy: an eval error disables the
                    // transition instead of surfacing.
                    Some(cond) => self.oracle.eval(cond, &ctx).unwrap_or_else(|err| {
                        warn!(
                            target: "interpreter",
                            "condition on transition from `{}` failed to evaluate, treated as false: {err}",
                            transition.source()
                        );
                        false
                    }),
                };
                if pass {
                    enabled.push(transition);
                }
            }
        }
        enabled.sort_by_key(|t| t.document_order());
        Self::resolve_conflicts(def, active, enabled)
    }

    /// Conflict resolution over the enabled set: per-source document order
    /// first, then pairwise exit-set overlap with descendant priority.
    /// Transitions in disjoint parallel regions have disjoint exit sets and
    /// survive together.
    fn resolve_conflicts<'d>(
        def: &'d ChartDef,
        active: &BTreeSet<String>,
        enabled: Vec<&'d TransitionDef>,
    ) -> Vec<&'d TransitionDef> {
        let mut candidates: Vec<&TransitionDef> = Vec::new();
        for transition in enabled {
            if !candidates.iter().any(|c| c.source() == transition.source()) {
                candidates.push(transition);
            }
        }

        let mut selected: Vec<(&TransitionDef, BTreeSet<String>)> = Vec::new();
        'candidates: for transition in candidates {
            let exit = match transition.target() {
                Some(target) => {
                    let lcca = def.lcca(transition.source(), target);
                    Self::exit_set(def, lcca, active)
                }
                None => BTreeSet::new(),
            };
            let mut preempted: Vec<usize> = Vec::new();
            for (index, (other, other_exit)) in selected.iter().enumerate() {
                if exit.intersection(other_exit).next().is_none() {
                    continue;
                }
                if def.is_proper_ancestor(other.source(), transition.source()) {
                    // The candidate's source is nested deeper: it preempts.
                    preempted.push(index);
                } else {
                    continue 'candidates;
                }
            }
            for index in preempted.into_iter().rev() {
                selected.remove(index);
            }
            selected.push((transition, exit));
        }
        selected.into_iter().map(|(t, _)| t).collect()
    }

    /// Every active state strictly below the LCCA. When the LCCA is a
    /// parallel state this covers all of its regions; `None` (document
    /// root) covers the whole configuration.
    fn exit_set(def: &ChartDef, lcca: Option<&str>, active: &BTreeSet<String>) -> BTreeSet<String> {
        active
            .iter()
            .filter(|id| match lcca {
                Some(anc) => def.is_proper_ancestor(anc, id),
                None => true,
            })
            .cloned()
            .collect()
    }

    /// States entered when descending from the LCCA (exclusive) to
    /// `target`: the intermediate ancestors not already active, the target's
    /// own entry descent, and full entry of any parallel region left without
    /// an active or entered descendant.
    fn entry_path(
        def: &ChartDef,
        target: &str,
        lcca: Option<&str>,
        active: &BTreeSet<String>,
        entered: &mut Vec<String>,
    ) {
        let mut path: SmallVec<[&str; 8]> = SmallVec::new();
        for anc in def.ancestors(target) {
            if Some(anc) == lcca {
                break;
            }
            path.push(anc);
        }
        path.reverse();
        for anc in &path {
            if !active.contains(*anc) && !entered.iter().any(|e| e == anc) {
                entered.push((*anc).to_owned());
            }
        }
        def.enter_states(target, entered);

        for anc in path.iter().copied().chain(lcca) {
            let Some(state) = def.state(anc) else {
                continue;
            };
            if state.kind() != StateKind::Parallel {
                continue;
            }
            for child in state.children() {
                let covered = active
                    .iter()
                    .map(String::as_str)
                    .chain(entered.iter().map(String::as_str))
                    .any(|id| id == child || def.is_proper_ancestor(child, id));
                if !covered {
                    def.enter_states(child, entered);
                }
            }
        }
    }

    /// Runs executable content; `<raise>` feeds the internal queue.
    fn run_executables(&mut self, executables: &[Executable]) {
        for executable in executables {
            match executable {
                Executable::Raise { event } => {
                    trace!(target: "interpreter", "raising internal event `{event}`");
                    self.internal.push_back(Event::new(event.clone()));
                }
                Executable::Log { label, expression } => {
                    info!(
                        target: "statechart",
                        "{}: {}",
                        label.as_deref().unwrap_or("log"),
                        expression.as_deref().unwrap_or("")
                    );
                }
            }
        }
    }

    /// The chart stops once every configured leaf is a top-level `<final>`.
    fn update_status(&mut self) {
        if self.status == Status::Stopped || self.configuration.is_empty() {
            return;
        }
        let terminal = self.configuration.iter().all(|id| {
            self.def
                .state(id)
                .is_some_and(|s| s.kind() == StateKind::Final && s.parent().is_none())
        });
        if terminal {
            info!(target: "interpreter", "all top-level final states entered, chart stopped");
            self.status = Status::Stopped;
        }
    }
}

/// SCXML event-descriptor matching: a whitespace-separated list of tokens,
/// each matching exactly, as a `*` wildcard, or as a dot-segment prefix.
/// Trailing `.` or `.*` on a token is ignored.
fn event_matches(descriptor: &str, name: &str) -> bool {
    descriptor.split_whitespace().any(|token| {
        let token = token.strip_suffix(".*").unwrap_or(token);
        let token = token.strip_suffix('.').unwrap_or(token);
        if token.is_empty() {
            return false;
        }
        token == "*"
            || name == token
            || (name.len() > token.len()
                && name.starts_with(token)
                && name.as_bytes()[token.len()] == b'.')
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Element, State, Transition};
    use crate::grammar::Val;
    use crate::oracle::{OracleError, TrivialOracle};
    use std::collections::HashMap as StdHashMap;

    fn state(id: &str, order: u32) -> State {
        let mut state = State::new(Element::State, order);
        state.id = Some(id.to_owned());
        state
    }

    fn final_state(id: &str, order: u32) -> State {
        let mut state = State::new(Element::Final, order);
        state.id = Some(id.to_owned());
        state
    }

    fn parallel(id: &str, order: u32) -> State {
        let mut state = State::new(Element::Parallel, order);
        state.id = Some(id.to_owned());
        state
    }

    fn transition(event: Option<&str>, target: Option<&str>, order: u32) -> Transition {
        Transition {
            event: event.map(str::to_owned),
            target: target.map(str::to_owned),
            cond: None,
            executables: Vec::new(),
            document_order: order,
        }
    }

    fn leaves(chart: &StateChart) -> Vec<&str> {
        chart.active_leaves().collect()
    }

    /// Understands exactly `score>80`, enough to gate a transition on the
    /// event payload.
    #[derive(Debug, Default)]
    struct ScoreOracle {
        sources: Vec<String>,
    }

    impl ConditionOracle for ScoreOracle {
        fn compile(&mut self, source: &str) -> Result<Cond, OracleError> {
            self.sources.push(source.to_owned());
            Ok(Cond::new(self.sources.len() as u32 - 1))
        }

        fn eval(&self, cond: Cond, ctx: &EvalContext<'_>) -> Result<bool, OracleError> {
            let source = self
                .sources
                .get(cond.index())
                .ok_or(OracleError::MissingCond(cond))?;
            let (field, bound) = source
                .split_once('>')
                .ok_or_else(|| OracleError::Unsupported(source.clone()))?;
            let bound: i32 = bound
                .trim()
                .parse()
                .map_err(|_| OracleError::Unsupported(source.clone()))?;
            let value = ctx
                .event_data(field.trim())
                .ok_or_else(|| OracleError::UnknownIdentifier(field.trim().to_owned()))?;
            Ok(value.loose_cmp(&Val::Integer(bound)) == Some(std::cmp::Ordering::Greater))
        }
    }

    #[test]
    fn simple_transition() {
        let mut a = state("a", 0);
        a.transitions.push(transition(Some("go"), Some("b"), 1));
        let document = Document {
            initial: Some("a".to_owned()),
            states: vec![a, state("b", 2)],
            ..Document::default()
        };
        let mut chart = StateChart::initialize(document, TrivialOracle).expect("valid document");
        assert_eq!(leaves(&chart), ["a"]);
        chart.send_event(Event::new("go"));
        assert_eq!(leaves(&chart), ["b"]);
        chart.send_event(Event::new("go"));
        assert_eq!(leaves(&chart), ["b"]);
    }

    #[test]
    fn compound_initial_descent() {
        let mut p = state("p", 0);
        p.initial = Some("c2".to_owned());
        p.states.push(state("c1", 1));
        p.states.push(state("c2", 2));
        let document = Document {
            initial: Some("p".to_owned()),
            states: vec![p],
            ..Document::default()
        };
        let chart = StateChart::initialize(document, TrivialOracle).expect("valid document");
        assert_eq!(leaves(&chart), ["c2"]);
        assert!(chart.is_active("p"));
        assert!(!chart.is_active("c1"));
        let active = chart.active_with_ancestors();
        assert!(active.contains("p") && active.contains("c2"));
    }

    #[test]
    fn parallel_entry_covers_every_region() {
        let mut par = parallel("par", 0);
        let mut region_a = state("A", 1);
        region_a.states.push(state("a1", 2));
        let mut region_b = state("B", 3);
        region_b.states.push(state("b1", 4));
        par.states.push(region_a);
        par.states.push(region_b);
        let document = Document {
            initial: Some("par".to_owned()),
            states: vec![par],
            ..Document::default()
        };
        let chart = StateChart::initialize(document, TrivialOracle).expect("valid document");
        assert_eq!(leaves(&chart), ["a1", "b1"]);
        assert!(chart.is_active("par"));
    }

    #[test]
    fn eventless_chain_runs_to_fixpoint() {
        let mut a = state("a", 0);
        a.transitions.push(transition(None, Some("b"), 1));
        let mut b = state("b", 2);
        b.transitions.push(transition(None, Some("c"), 3));
        let document = Document {
            initial: Some("a".to_owned()),
            states: vec![a, b, state("c", 4)],
            ..Document::default()
        };
        let chart = StateChart::initialize(document, TrivialOracle).expect("valid document");
        assert_eq!(leaves(&chart), ["c"]);
    }

    #[test]
    fn eventless_cycle_is_capped() {
        let mut a = state("a", 0);
        a.transitions.push(transition(None, Some("b"), 1));
        let mut b = state("b", 2);
        b.transitions.push(transition(None, Some("a"), 3));
        let document = Document {
            initial: Some("a".to_owned()),
            states: vec![a, b],
            ..Document::default()
        };
        let chart = StateChart::initialize(document, TrivialOracle).expect("valid document");
        // Frozen at the cap rather than diverging; exactly one leaf active.
        assert_eq!(chart.active_leaves().count(), 1);
        assert_eq!(chart.status(), Status::Running);
    }

    #[test]
    fn descendant_transition_preempts_ancestor() {
        let mut outer = state("outer", 0);
        let mut inner = state("inner", 1);
        inner.transitions.push(transition(Some("e"), Some("deep"), 2));
        outer.states.push(inner);
        outer.states.push(state("deep", 3));
        outer.transitions.push(transition(Some("e"), Some("other"), 4));
        let document = Document {
            initial: Some("outer".to_owned()),
            states: vec![outer, state("other", 5)],
            ..Document::default()
        };
        let mut chart = StateChart::initialize(document, TrivialOracle).expect("valid document");
        assert_eq!(leaves(&chart), ["inner"]);
        chart.send_event(Event::new("e"));
        assert_eq!(leaves(&chart), ["deep"]);
    }

    #[test]
    fn same_source_keeps_earliest_transition() {
        let mut a = state("a", 0);
        a.transitions.push(transition(Some("e"), Some("b"), 1));
        a.transitions.push(transition(Some("e"), Some("c"), 2));
        let document = Document {
            initial: Some("a".to_owned()),
            states: vec![a, state("b", 3), state("c", 4)],
            ..Document::default()
        };
        let mut chart = StateChart::initialize(document, TrivialOracle).expect("valid document");
        chart.send_event(Event::new("e"));
        assert_eq!(leaves(&chart), ["b"]);
    }

    #[test]
    fn disjoint_regions_fire_together() {
        let mut par = parallel("par", 0);
        let mut region_a = state("A", 1);
        let mut a1 = state("a1", 2);
        a1.transitions.push(transition(Some("e"), Some("a2"), 3));
        region_a.states.push(a1);
        region_a.states.push(state("a2", 4));
        let mut region_b = state("B", 5);
        let mut b1 = state("b1", 6);
        b1.transitions.push(transition(Some("e"), Some("b2"), 7));
        region_b.states.push(b1);
        region_b.states.push(state("b2", 8));
        par.states.push(region_a);
        par.states.push(region_b);
        let document = Document {
            initial: Some("par".to_owned()),
            states: vec![par],
            ..Document::default()
        };
        let mut chart = StateChart::initialize(document, TrivialOracle).expect("valid document");
        assert_eq!(leaves(&chart), ["a1", "b1"]);
        chart.send_event(Event::new("e"));
        assert_eq!(leaves(&chart), ["a2", "b2"]);
    }

    #[test]
    fn cross_region_transition_reenters_sibling_region() {
        let mut par = parallel("par", 0);
        let mut region_a = state("A", 1);
        let mut a1 = state("a1", 2);
        a1.transitions.push(transition(Some("jump"), Some("b2"), 3));
        region_a.states.push(a1);
        region_a.states.push(state("a2", 4));
        let mut region_b = state("B", 5);
        region_b.states.push(state("b1", 6));
        region_b.states.push(state("b2", 7));
        par.states.push(region_a);
        par.states.push(region_b);
        let document = Document {
            initial: Some("par".to_owned()),
            states: vec![par],
            ..Document::default()
        };
        let mut chart = StateChart::initialize(document, TrivialOracle).expect("valid document");
        assert_eq!(leaves(&chart), ["a1", "b1"]);
        chart.send_event(Event::new("jump"));
        // Region B lands on the explicit target, region A re-enters its
        // default child.
        assert_eq!(leaves(&chart), ["a1", "b2"]);
    }

    #[test]
    fn targetless_transition_keeps_configuration() {
        let mut a = state("a", 0);
        a.transitions.push(Transition {
            event: Some("ping".to_owned()),
            target: None,
            cond: None,
            executables: vec![Executable::Raise {
                event: "pong".to_owned(),
            }],
            document_order: 1,
        });
        a.transitions.push(transition(Some("pong"), Some("b"), 2));
        let document = Document {
            initial: Some("a".to_owned()),
            states: vec![a, state("b", 3)],
            ..Document::default()
        };
        let mut chart = StateChart::initialize(document, TrivialOracle).expect("valid document");
        chart.send_event(Event::new("ping"));
        // The raised `pong` was drained within the same macrostep.
        assert_eq!(leaves(&chart), ["b"]);
    }

    #[test]
    fn conditional_transition_reads_payload() {
        let mut form = state("form", 0);
        form.transitions.push(Transition {
            event: Some("submit".to_owned()),
            target: Some("approved".to_owned()),
            cond: Some("score>80".to_owned()),
            executables: Vec::new(),
            document_order: 1,
        });
        form.transitions.push(transition(Some("submit"), Some("rejected"), 2));
        let document = Document {
            initial: Some("form".to_owned()),
            states: vec![form, state("approved", 3), state("rejected", 4)],
            ..Document::default()
        };

        let mut chart =
            StateChart::initialize(document.clone(), ScoreOracle::default()).expect("valid document");
        chart.send_event(Event::with_payload(
            "submit",
            StdHashMap::from([("score".to_owned(), Val::Integer(90))]),
        ));
        assert_eq!(leaves(&chart), ["approved"]);

        let mut chart = StateChart::initialize(document, ScoreOracle::default()).expect("valid document");
        chart.send_event(Event::with_payload(
            "submit",
            StdHashMap::from([("score".to_owned(), Val::Integer(50))]),
        ));
        assert_eq!(leaves(&chart), ["rejected"]);
    }

    #[test]
    fn condition_error_disables_transition() {
        let mut a = state("a", 0);
        a.transitions.push(Transition {
            event: Some("submit".to_owned()),
            target: Some("b".to_owned()),
            cond: Some("score>80".to_owned()),
            executables: Vec::new(),
            document_order: 1,
        });
        let document = Document {
            initial: Some("a".to_owned()),
            states: vec![a, state("b", 2)],
            ..Document::default()
        };
        let mut chart =
            StateChart::initialize(document, ScoreOracle::default()).expect("valid document");
        // No payload: the condition errors and the transition stays cold.
        chart.send_event(Event::new("submit"));
        assert_eq!(leaves(&chart), ["a"]);
    }

    #[test]
    fn chart_stops_on_top_level_final() {
        let mut a = state("a", 0);
        a.transitions.push(transition(Some("done"), Some("end"), 1));
        let document = Document {
            initial: Some("a".to_owned()),
            states: vec![a, final_state("end", 2)],
            ..Document::default()
        };
        let mut chart = StateChart::initialize(document, TrivialOracle).expect("valid document");
        assert_eq!(chart.status(), Status::Running);
        chart.send_event(Event::new("done"));
        assert_eq!(chart.status(), Status::Stopped);
        assert_eq!(leaves(&chart), ["end"]);
        // Stopped charts ignore everything.
        chart.send_event(Event::new("done"));
        assert_eq!(leaves(&chart), ["end"]);
        assert_eq!(chart.status(), Status::Stopped);
    }

    #[test]
    fn nested_final_does_not_stop_the_chart() {
        let mut p = state("p", 0);
        let mut c = state("c", 1);
        c.transitions.push(transition(Some("done"), Some("f"), 2));
        p.states.push(c);
        p.states.push(final_state("f", 3));
        let document = Document {
            initial: Some("p".to_owned()),
            states: vec![p],
            ..Document::default()
        };
        let mut chart = StateChart::initialize(document, TrivialOracle).expect("valid document");
        chart.send_event(Event::new("done"));
        assert_eq!(leaves(&chart), ["f"]);
        assert_eq!(chart.status(), Status::Running);
    }

    #[test]
    fn transition_to_ancestor_reenters_it() {
        let mut p = state("p", 0);
        p.initial = Some("c1".to_owned());
        let mut c1 = state("c1", 1);
        c1.transitions.push(transition(Some("up"), Some("p"), 2));
        let mut c2 = state("c2", 3);
        c2.transitions.push(transition(Some("swap"), Some("c1"), 4));
        p.states.push(c1);
        p.states.push(c2);
        let document = Document {
            initial: Some("p".to_owned()),
            states: vec![p],
            ..Document::default()
        };
        let mut chart = StateChart::initialize(document, TrivialOracle).expect("valid document");
        assert_eq!(leaves(&chart), ["c1"]);
        // Re-entering `p` descends into its resolved initial child again.
        chart.send_event(Event::new("up"));
        assert_eq!(leaves(&chart), ["c1"]);
    }

    #[test]
    fn no_match_returns_equal_chart() {
        let mut a = state("a", 0);
        a.transitions.push(transition(Some("go"), Some("b"), 1));
        let document = Document {
            initial: Some("a".to_owned()),
            states: vec![a, state("b", 2)],
            ..Document::default()
        };
        let mut chart = StateChart::initialize(document, TrivialOracle).expect("valid document");
        let before = chart.active_with_ancestors();
        chart.send_event(Event::new("unrelated"));
        assert_eq!(chart.active_with_ancestors(), before);
        assert_eq!(chart.status(), Status::Running);
    }

    #[test]
    fn event_descriptor_matching() {
        assert!(event_matches("done", "done"));
        assert!(event_matches("*", "anything"));
        assert!(event_matches("error", "error.comm.failed"));
        assert!(event_matches("error.*", "error.comm"));
        assert!(event_matches("error.", "error.comm"));
        assert!(event_matches("foo bar", "bar"));
        assert!(!event_matches("error", "errors"));
        assert!(!event_matches("error.comm", "error"));
        assert!(!event_matches("", "anything"));
    }

    #[test]
    fn lcca_of_siblings_is_the_parent() {
        let mut p = state("p", 0);
        p.states.push(state("c1", 1));
        p.states.push(state("c2", 2));
        let document = Document {
            initial: Some("p".to_owned()),
            states: vec![p],
            ..Document::default()
        };
        let chart = StateChart::initialize(document, TrivialOracle).expect("valid document");
        let def = chart.definition();
        assert_eq!(def.lcca("c1", "c2"), Some("p"));
        assert_eq!(def.lcca("c1", "p"), None);
        assert_eq!(def.ancestors("c1").as_slice(), ["p"]);
        assert!(def.is_proper_ancestor("p", "c1"));
        assert!(!def.is_proper_ancestor("c1", "p"));
    }
}
