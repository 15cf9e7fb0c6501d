use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use phasegraph_core::error::{PhaseGraphError, Result};

use super::transition::Transition;
use crate::context::PhaseContext;
use crate::phase::Phase;

/// A named condition predicate over the phase context.
pub type Condition<S> = Arc<dyn Fn(&PhaseContext<S>) -> bool + Send + Sync>;

/// A transition with its predicate resolved.
struct Edge<P, S> {
    transition: Transition<P>,
    predicate: Condition<S>,
}

/// A validated phase graph.
///
/// Outgoing transitions of each phase are stored in evaluation order:
/// backward before forward, then descending priority, then declaration order.
pub struct PhaseGraph<P: Phase, S> {
    initial: P,
    terminal: P,
    edges: Vec<Edge<P, S>>,
    outgoing: HashMap<P, Vec<usize>>,
    phases: HashSet<P>,
}

impl<P: Phase, S> PhaseGraph<P, S> {
    /// Start declaring a graph.
    pub fn builder(initial: P, terminal: P) -> PhaseGraphBuilder<P, S> {
        PhaseGraphBuilder {
            initial,
            terminal,
            transitions: Vec::new(),
            conditions: HashMap::new(),
            duplicate_conditions: Vec::new(),
        }
    }

    pub fn initial(&self) -> P {
        self.initial
    }

    pub fn terminal(&self) -> P {
        self.terminal
    }

    /// Whether `phase` takes part in this graph.
    pub fn contains(&self, phase: P) -> bool {
        self.phases.contains(&phase)
    }

    /// All transitions in declaration order.
    pub fn transitions(&self) -> impl Iterator<Item = &Transition<P>> {
        self.edges.iter().map(|e| &e.transition)
    }

    /// Outgoing transitions of `phase`, in evaluation order.
    pub fn outgoing(&self, phase: P) -> impl Iterator<Item = &Transition<P>> {
        self.ordered_edges(phase).map(|(t, _)| t)
    }

    /// Look up the declared transition between two phases.
    pub fn find(&self, from: P, to: P) -> Option<&Transition<P>> {
        self.transitions().find(|t| t.from == from && t.to == to)
    }

    pub(crate) fn ordered_edges(
        &self,
        phase: P,
    ) -> impl Iterator<Item = (&Transition<P>, &Condition<S>)> {
        self.outgoing
            .get(&phase)
            .into_iter()
            .flatten()
            .map(move |&i| (&self.edges[i].transition, &self.edges[i].predicate))
    }
}

impl<P: Phase, S> std::fmt::Debug for PhaseGraph<P, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseGraph")
            .field("initial", &self.initial)
            .field("terminal", &self.terminal)
            .field(
                "transitions",
                &self.transitions().map(|t| t.to_string()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Collects transitions and condition predicates, then validates them.
pub struct PhaseGraphBuilder<P: Phase, S> {
    initial: P,
    terminal: P,
    transitions: Vec<Transition<P>>,
    conditions: HashMap<String, Condition<S>>,
    duplicate_conditions: Vec<String>,
}

impl<P: Phase, S> PhaseGraphBuilder<P, S> {
    /// Add a transition.
    pub fn transition(mut self, transition: Transition<P>) -> Self {
        self.transitions.push(transition);
        self
    }

    /// Add several transitions, keeping their order.
    pub fn transitions(mut self, transitions: impl IntoIterator<Item = Transition<P>>) -> Self {
        self.transitions.extend(transitions);
        self
    }

    /// Register the predicate behind a condition name.
    pub fn condition<F>(mut self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&PhaseContext<S>) -> bool + Send + Sync + 'static,
    {
        let name = name.into();
        if self.conditions.contains_key(&name) {
            self.duplicate_conditions.push(name);
        } else {
            self.conditions.insert(name, Arc::new(predicate));
        }
        self
    }

    /// Validate the declaration and resolve every predicate.
    pub fn build(self) -> Result<PhaseGraph<P, S>> {
        let Self {
            initial,
            terminal,
            transitions,
            mut conditions,
            duplicate_conditions,
        } = self;

        if initial == terminal {
            return Err(config_error(format!(
                "initial and terminal phase are both '{}'",
                initial.name()
            )));
        }

        if let Some(name) = duplicate_conditions.first() {
            return Err(config_error(format!(
                "condition '{}' registered more than once",
                name
            )));
        }

        let mut used = HashSet::new();
        let mut edges = Vec::with_capacity(transitions.len());
        for transition in transitions {
            if transition.from == transition.to {
                return Err(config_error(format!(
                    "transition {} loops onto its own phase",
                    transition
                )));
            }
            if transition.from == terminal {
                return Err(config_error(format!(
                    "terminal phase '{}' has outgoing transition {}",
                    terminal.name(),
                    transition
                )));
            }
            let predicate = conditions.get(&transition.condition).cloned().ok_or_else(|| {
                config_error(format!(
                    "transition {} references unknown condition '{}'",
                    transition, transition.condition
                ))
            })?;
            used.insert(transition.condition.clone());
            edges.push(Edge {
                transition,
                predicate,
            });
        }

        conditions.retain(|name, _| !used.contains(name));
        for name in conditions.keys() {
            warn!(condition = %name, "Condition registered but never used by a transition");
        }

        let mut outgoing: HashMap<P, Vec<usize>> = HashMap::new();
        for (i, edge) in edges.iter().enumerate() {
            outgoing.entry(edge.transition.from).or_default().push(i);
        }
        for indices in outgoing.values_mut() {
            // Stable sort keeps declaration order for ties
            indices.sort_by_key(|&i| {
                let t = &edges[i].transition;
                (!t.is_backward, Reverse(t.priority))
            });
        }

        let reachable = reachable_from(initial, &edges, |t| (t.from, t.to));
        let reaches_terminal = reachable_from(terminal, &edges, |t| (t.to, t.from));

        for &phase in P::all() {
            if !reachable.contains(&phase) {
                if phase != terminal {
                    debug!(phase = phase.name(), "Phase is not reachable from the initial phase");
                }
                continue;
            }
            if phase != terminal && !outgoing.contains_key(&phase) {
                return Err(config_error(format!(
                    "phase '{}' has no outgoing transition",
                    phase.name()
                )));
            }
            if !reaches_terminal.contains(&phase) {
                return Err(config_error(format!(
                    "phase '{}' has no path to terminal phase '{}'",
                    phase.name(),
                    terminal.name()
                )));
            }
        }

        let mut phases: HashSet<P> = edges
            .iter()
            .flat_map(|e| [e.transition.from, e.transition.to])
            .collect();
        phases.insert(initial);
        phases.insert(terminal);

        debug!(
            initial = initial.name(),
            terminal = terminal.name(),
            transitions = edges.len(),
            "Phase graph validated"
        );

        Ok(PhaseGraph {
            initial,
            terminal,
            edges,
            outgoing,
            phases,
        })
    }
}

fn config_error(message: String) -> PhaseGraphError {
    PhaseGraphError::Configuration(message)
}

/// Breadth-first walk over edges oriented by `direction`.
fn reachable_from<P: Phase, S>(
    start: P,
    edges: &[Edge<P, S>],
    direction: impl Fn(&Transition<P>) -> (P, P),
) -> HashSet<P> {
    let mut seen = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(phase) = queue.pop_front() {
        for edge in edges {
            let (src, dst) = direction(&edge.transition);
            if src == phase && seen.insert(dst) {
                queue.push_back(dst);
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Step {
        Intake,
        Draft,
        Review,
        Done,
    }

    impl Phase for Step {
        fn name(&self) -> &'static str {
            match self {
                Step::Intake => "intake",
                Step::Draft => "draft",
                Step::Review => "review",
                Step::Done => "done",
            }
        }

        fn all() -> &'static [Self] {
            &[Step::Intake, Step::Draft, Step::Review, Step::Done]
        }
    }

    fn yes(_: &PhaseContext<()>) -> bool {
        true
    }

    fn linear() -> PhaseGraphBuilder<Step, ()> {
        PhaseGraph::builder(Step::Intake, Step::Done)
            .transition(Transition::forward(Step::Intake, Step::Draft, "ready"))
            .transition(Transition::forward(Step::Draft, Step::Review, "drafted"))
            .transition(Transition::forward(Step::Review, Step::Done, "approved"))
            .condition("ready", yes)
            .condition("drafted", yes)
            .condition("approved", yes)
    }

    #[test]
    fn test_build_linear_graph() {
        let graph = linear().build().unwrap();
        assert_eq!(graph.initial(), Step::Intake);
        assert_eq!(graph.terminal(), Step::Done);
        assert_eq!(graph.transitions().count(), 3);
        assert!(graph.contains(Step::Review));
        assert_eq!(graph.outgoing(Step::Done).count(), 0);
    }

    #[test]
    fn test_unknown_condition_rejected() {
        let err = PhaseGraph::<Step, ()>::builder(Step::Intake, Step::Done)
            .transition(Transition::forward(Step::Intake, Step::Done, "missing"))
            .build()
            .unwrap_err();
        assert!(matches!(err, PhaseGraphError::Configuration(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_terminal_with_exit_rejected() {
        let err = linear()
            .transition(Transition::backward(Step::Done, Step::Draft, "reopen"))
            .condition("reopen", yes)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("terminal phase 'done'"));
    }

    #[test]
    fn test_dead_end_rejected() {
        // draft can only bounce back to intake, review is never reached
        let err = PhaseGraph::<Step, ()>::builder(Step::Intake, Step::Done)
            .transition(Transition::forward(Step::Intake, Step::Draft, "ready"))
            .transition(Transition::backward(Step::Draft, Step::Intake, "gap"))
            .condition("ready", yes)
            .condition("gap", yes)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("no path to terminal"));
    }

    #[test]
    fn test_phase_without_exit_rejected() {
        let err = PhaseGraph::<Step, ()>::builder(Step::Intake, Step::Done)
            .transition(Transition::forward(Step::Intake, Step::Draft, "ready"))
            .transition(Transition::forward(Step::Intake, Step::Done, "skip"))
            .condition("ready", yes)
            .condition("skip", yes)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("'draft' has no outgoing transition"));
    }

    #[test]
    fn test_self_loop_rejected() {
        let err = linear()
            .transition(Transition::backward(Step::Review, Step::Review, "again"))
            .condition("again", yes)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("loops onto its own phase"));
    }

    #[test]
    fn test_duplicate_condition_rejected() {
        let err = linear().condition("ready", yes).build().unwrap_err();
        assert!(err.to_string().contains("'ready' registered more than once"));
    }

    #[test]
    fn test_initial_equals_terminal_rejected() {
        let err = PhaseGraph::<Step, ()>::builder(Step::Done, Step::Done)
            .build()
            .unwrap_err();
        assert!(matches!(err, PhaseGraphError::Configuration(_)));
    }

    #[test]
    fn test_outgoing_evaluation_order() {
        let graph = linear()
            .transition(Transition::forward(Step::Review, Step::Intake, "restart").with_priority(50))
            .transition(Transition::backward(Step::Review, Step::Draft, "rework"))
            .transition(Transition::backward(Step::Review, Step::Intake, "rescope").with_priority(3))
            .condition("restart", yes)
            .condition("rework", yes)
            .condition("rescope", yes)
            .build()
            .unwrap();

        let order: Vec<&str> = graph
            .outgoing(Step::Review)
            .map(|t| t.condition.as_str())
            .collect();
        assert_eq!(order, vec!["rescope", "rework", "restart", "approved"]);
    }

    #[test]
    fn test_find_transition() {
        let graph = linear().build().unwrap();
        let t = graph.find(Step::Draft, Step::Review).unwrap();
        assert_eq!(t.condition, "drafted");
        assert!(graph.find(Step::Review, Step::Draft).is_none());
    }
}
