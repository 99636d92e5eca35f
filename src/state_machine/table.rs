use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;

use crate::error::TableError;
use crate::hook::Hook;

/// States and triggers are fixed per kind, so plain static names suffice.
pub type State = &'static str;

pub const FAILED: State = "failed";
pub const TERMINATED: State = "terminated";
pub const FAIL: &str = "fail";

/// Which states a trigger may fire from.
#[derive(Debug, Clone, Copy)]
pub enum Sources {
    Only(&'static [State]),
    AllExcept(&'static [State]),
}

pub fn only(states: &'static [State]) -> Sources {
    Sources::Only(states)
}

pub fn all_except(states: &'static [State]) -> Sources {
    Sources::AllExcept(states)
}

pub(crate) struct Edge<P> {
    pub dest: State,
    pub hook: Option<Arc<Hook<P>>>,
}

/// The complete transition table of one plugin kind.
pub struct Blueprint<P> {
    kind: &'static str,
    initial: State,
    states: Vec<State>,
    operations: Vec<&'static str>,
    edges: BTreeMap<State, BTreeMap<&'static str, Edge<P>>>,
}

impl<P: 'static> Blueprint<P> {
    pub fn builder(kind: &'static str) -> BlueprintBuilder<P> {
        BlueprintBuilder {
            kind,
            initial: None,
            states: Vec::new(),
            registrations: Vec::new(),
        }
    }

    /// Status kind name, e.g. `ModelInstanceStatus`.
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn initial(&self) -> State {
        self.initial
    }

    pub fn states(&self) -> &[State] {
        &self.states
    }

    /// Operation names in registration order.
    pub fn operations(&self) -> &[&'static str] {
        &self.operations
    }

    pub fn is_operation(&self, name: &str) -> bool {
        self.operations.contains(&name)
    }

    /// Whether `operation` answers through the response mailbox.
    pub fn replies(&self, operation: &str) -> bool {
        self.edges
            .values()
            .filter_map(|edges| edges.get(operation))
            .filter_map(|edge| edge.hook.as_ref())
            .any(|hook| hook.replies())
    }

    pub(crate) fn edge(&self, state: &str, trigger: &str) -> Option<&Edge<P>> {
        self.edges.get(state)?.get(trigger)
    }

    pub fn destination(&self, state: &str, trigger: &str) -> Option<State> {
        self.edge(state, trigger).map(|edge| edge.dest)
    }

    /// Every trigger that may fire from `state`, sorted.
    pub fn valid_triggers(&self, state: &str) -> BTreeSet<&'static str> {
        self.edges
            .get(state)
            .map(|edges| edges.keys().copied().collect())
            .unwrap_or_default()
    }

    /// States reachable from the initial state, including it.
    pub fn reachable(&self) -> BTreeSet<State> {
        let mut seen = BTreeSet::from([self.initial]);
        let mut queue = VecDeque::from([self.initial]);
        while let Some(state) = queue.pop_front() {
            for edge in self.edges.get(state).into_iter().flat_map(|e| e.values()) {
                if seen.insert(edge.dest) {
                    queue.push_back(edge.dest);
                }
            }
        }
        seen
    }

    /// Whether any edge leads into `state`.
    pub fn has_incoming(&self, state: &str) -> bool {
        self.edges
            .values()
            .flat_map(|edges| edges.values())
            .any(|edge| edge.dest == state)
    }

    /// Human-readable dump of the table, one edge per line.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} (initial: {})", self.kind, self.initial);
        for state in &self.states {
            let Some(edges) = self.edges.get(state) else {
                let _ = writeln!(out, "  {state}: (no exits)");
                continue;
            };
            for (trigger, edge) in edges {
                let marker = match &edge.hook {
                    Some(hook) if hook.replies() => " [hook, reply]",
                    Some(_) => " [hook]",
                    None => "",
                };
                let _ = writeln!(out, "  {state} --{trigger}--> {}{marker}", edge.dest);
            }
        }
        out
    }
}

struct Registration<P> {
    trigger: &'static str,
    sources: Sources,
    dest: State,
    hook: HookSlot<P>,
}

enum HookSlot<P> {
    None,
    Own(Arc<Hook<P>>),
    Shared,
}

/// Collects registrations and validates them all at once in [`build`].
///
/// [`build`]: BlueprintBuilder::build
pub struct BlueprintBuilder<P> {
    kind: &'static str,
    initial: Option<State>,
    states: Vec<State>,
    registrations: Vec<Registration<P>>,
}

impl<P: 'static> BlueprintBuilder<P> {
    pub fn states(mut self, states: &[State]) -> Self {
        self.states.extend_from_slice(states);
        self
    }

    pub fn initial(mut self, state: State) -> Self {
        self.initial = Some(state);
        self
    }

    /// An internal trigger with no hook, fired by hooks or by `fail`.
    pub fn trigger(mut self, name: &'static str, sources: Sources, dest: State) -> Self {
        self.registrations.push(Registration {
            trigger: name,
            sources,
            dest,
            hook: HookSlot::None,
        });
        self
    }

    /// A client-visible operation whose trigger runs `hook` in `dest`.
    pub fn operation(
        mut self,
        name: &'static str,
        sources: Sources,
        dest: State,
        hook: Hook<P>,
    ) -> Self {
        self.registrations.push(Registration {
            trigger: name,
            sources,
            dest,
            hook: HookSlot::Own(Arc::new(hook)),
        });
        self
    }

    /// A further edge for an operation already registered, sharing its hook.
    pub fn operation_edge(mut self, name: &'static str, sources: Sources, dest: State) -> Self {
        self.registrations.push(Registration {
            trigger: name,
            sources,
            dest,
            hook: HookSlot::Shared,
        });
        self
    }

    pub fn build(self) -> Result<Blueprint<P>, TableError> {
        let declared = |state: State| -> Result<State, TableError> {
            if self.states.contains(&state) {
                Ok(state)
            } else {
                Err(TableError::UnknownState(state))
            }
        };

        let initial = declared(self.initial.ok_or(TableError::UnknownState("<initial>"))?)?;
        declared(FAILED)?;
        declared(TERMINATED)?;

        let mut edges: BTreeMap<State, BTreeMap<&'static str, Edge<P>>> = BTreeMap::new();
        let mut operations: Vec<&'static str> = Vec::new();
        let mut hooks: BTreeMap<&'static str, Arc<Hook<P>>> = BTreeMap::new();

        for reg in self.registrations {
            let dest = declared(reg.dest)?;
            let sources: Vec<State> = match reg.sources {
                Sources::Only(states) => states
                    .iter()
                    .map(|s| declared(*s))
                    .collect::<Result<_, _>>()?,
                Sources::AllExcept(excluded) => {
                    for s in excluded {
                        declared(*s)?;
                    }
                    self.states
                        .iter()
                        .copied()
                        .filter(|s| !excluded.contains(s))
                        .collect()
                }
            };
            if sources.is_empty() {
                return Err(TableError::NoSources {
                    trigger: reg.trigger,
                });
            }

            let hook = match reg.hook {
                HookSlot::None => None,
                HookSlot::Own(hook) => {
                    hooks.insert(reg.trigger, Arc::clone(&hook));
                    Some(hook)
                }
                HookSlot::Shared => Some(
                    hooks
                        .get(reg.trigger)
                        .cloned()
                        .ok_or(TableError::MissingHook(reg.trigger))?,
                ),
            };
            if hook.is_some() && !operations.contains(&reg.trigger) {
                operations.push(reg.trigger);
            }

            for source in sources {
                let exits = edges.entry(source).or_default();
                if exits.contains_key(reg.trigger) {
                    return Err(TableError::DuplicateEdge {
                        trigger: reg.trigger,
                        state: source,
                    });
                }
                exits.insert(
                    reg.trigger,
                    Edge {
                        dest,
                        hook: hook.clone(),
                    },
                );
            }
        }

        if !edges.values().any(|exits| exits.contains_key(FAIL)) {
            return Err(TableError::MissingTrigger(FAIL));
        }
        if edges.get(TERMINATED).is_some_and(|exits| !exits.is_empty()) {
            return Err(TableError::TerminalExit(TERMINATED));
        }
        // An operation mixing hooked and bare edges would run work on some paths only.
        for exits in edges.values() {
            for (trigger, edge) in exits {
                if edge.hook.is_none() && operations.contains(trigger) {
                    return Err(TableError::MissingHook(*trigger));
                }
            }
        }

        Ok(Blueprint {
            kind: self.kind,
            initial,
            states: self.states,
            operations,
            edges,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::{Completion, HookContext, HookResult, NoArgs};

    struct Lamp;

    fn warm(_: &mut Lamp, _: &HookContext, _: NoArgs) -> HookResult {
        Ok(Completion::fire("warmed"))
    }

    const STATES: &[State] = &["off", "warming", "on", FAILED, TERMINATED];

    fn base() -> BlueprintBuilder<Lamp> {
        Blueprint::builder("LampStatus")
            .states(STATES)
            .initial("off")
            .trigger(FAIL, all_except(&[TERMINATED]), FAILED)
            .operation("warm", only(&["off"]), "warming", Hook::new(warm))
            .trigger("warmed", only(&["warming"]), "on")
            .trigger("terminate", all_except(&[TERMINATED]), TERMINATED)
    }

    #[test]
    fn builds_valid_table() {
        let table = base().build().unwrap();
        assert_eq!(table.kind(), "LampStatus");
        assert_eq!(table.initial(), "off");
        assert_eq!(table.operations(), &["warm"]);
        assert_eq!(table.destination("off", "warm"), Some("warming"));
        assert_eq!(table.destination("on", "warm"), None);
        assert!(table.valid_triggers(TERMINATED).is_empty());
        assert_eq!(
            table.valid_triggers("off").into_iter().collect::<Vec<_>>(),
            vec![FAIL, "terminate", "warm"]
        );
        assert_eq!(table.reachable().len(), STATES.len());
        assert!(!table.replies("warm"));
    }

    #[test]
    fn rejects_undeclared_state() {
        let err = base()
            .trigger("dim", only(&["on"]), "dimmed")
            .build()
            .err()
            .unwrap();
        assert_eq!(err, TableError::UnknownState("dimmed"));
    }

    #[test]
    fn rejects_duplicate_source_trigger_pair() {
        let err = base()
            .trigger("warmed", only(&["warming"]), "off")
            .build()
            .err()
            .unwrap();
        assert_eq!(
            err,
            TableError::DuplicateEdge {
                trigger: "warmed",
                state: "warming"
            }
        );
    }

    #[test]
    fn same_trigger_from_distinct_sources_is_fine() {
        let table = base()
            .operation_edge("warm", only(&["on"]), "warming")
            .build()
            .unwrap();
        assert_eq!(table.destination("on", "warm"), Some("warming"));
        assert_eq!(table.operations(), &["warm"]);
    }

    #[test]
    fn shared_edge_needs_a_hooked_registration() {
        let err = base()
            .operation_edge("glow", only(&["on"]), "warming")
            .build()
            .err()
            .unwrap();
        assert_eq!(err, TableError::MissingHook("glow"));
    }

    #[test]
    fn empty_sources_rejected() {
        let err = base()
            .trigger("noop", all_except(STATES), "on")
            .build()
            .err()
            .unwrap();
        assert_eq!(err, TableError::NoSources { trigger: "noop" });
    }

    #[test]
    fn terminal_state_cannot_exit() {
        let err = base()
            .trigger("revive", only(&[TERMINATED]), "off")
            .build()
            .err()
            .unwrap();
        assert_eq!(err, TableError::TerminalExit(TERMINATED));
    }

    #[test]
    fn fail_trigger_is_required() {
        let err = Blueprint::<Lamp>::builder("LampStatus")
            .states(STATES)
            .initial("off")
            .build()
            .err()
            .unwrap();
        assert_eq!(err, TableError::MissingTrigger(FAIL));
    }

    #[test]
    fn describe_lists_edges() {
        let text = base().build().unwrap().describe();
        assert!(text.starts_with("LampStatus (initial: off)"));
        assert!(text.contains("off --warm--> warming [hook]"));
        assert!(text.contains("terminated: (no exits)"));
    }
}
