use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use phasegraph_core::error::{PhaseGraphError, Result};
use phasegraph_core::types::{PersistedState, STATE_SCHEMA_VERSION};

use crate::context::PhaseContext;
use crate::graph::PhaseGraph;
use crate::phase::Phase;

/// Keys owned by the engine inside `phase_context`.
pub const BASE_FIELDS: [&str; 4] = [
    "phase_visits",
    "backward_trigger",
    "backward_trigger_detail",
    "awaiting_user_input",
];

#[derive(Serialize, Deserialize)]
struct BaseFields {
    #[serde(default)]
    phase_visits: BTreeMap<String, u32>,
    #[serde(default)]
    backward_trigger: Option<String>,
    #[serde(default)]
    backward_trigger_detail: Option<String>,
    #[serde(default)]
    awaiting_user_input: bool,
}

/// Snapshot an engine's phase and context as plain data.
///
/// The domain state is merged into `phase_context` next to the base fields;
/// it must serialize as a JSON object and may not reuse a base field name.
pub fn to_persisted<P: Phase, S: Serialize>(
    agent_type: &str,
    current_phase: P,
    context: &PhaseContext<S>,
) -> Result<PersistedState> {
    let mut merged = match serde_json::to_value(&context.state)? {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(PhaseGraphError::Configuration(format!(
                "domain state of '{}' must serialize as an object, got {}",
                agent_type,
                json_kind(&other)
            )))
        }
    };

    if let Some(clash) = BASE_FIELDS.iter().find(|k| merged.contains_key(**k)) {
        return Err(PhaseGraphError::Configuration(format!(
            "domain state of '{}' reuses reserved field '{}'",
            agent_type, clash
        )));
    }

    let base = BaseFields {
        phase_visits: context.phase_visits().clone(),
        backward_trigger: context.backward_trigger.clone(),
        backward_trigger_detail: context.backward_trigger_detail.clone(),
        awaiting_user_input: context.awaiting_user_input(),
    };
    if let Value::Object(base) = serde_json::to_value(base)? {
        merged.extend(base);
    }

    Ok(PersistedState {
        schema_version: STATE_SCHEMA_VERSION,
        agent_type: agent_type.to_string(),
        current_phase: current_phase.name().to_string(),
        phase_context: Value::Object(merged),
        transition_history: context.transition_history().to_vec(),
    })
}

/// Rebuild phase and context from a snapshot, validating it against `graph`.
pub fn from_persisted<P: Phase, S: DeserializeOwned>(
    agent_type: &str,
    graph: &PhaseGraph<P, S>,
    persisted: PersistedState,
) -> Result<(P, PhaseContext<S>)> {
    if persisted.schema_version > STATE_SCHEMA_VERSION {
        return Err(PhaseGraphError::Restore(format!(
            "state schema version {} is newer than supported version {}",
            persisted.schema_version, STATE_SCHEMA_VERSION
        )));
    }

    if persisted.agent_type != agent_type {
        return Err(PhaseGraphError::Restore(format!(
            "state belongs to agent type '{}', expected '{}'",
            persisted.agent_type, agent_type
        )));
    }

    let current_phase = P::from_name(&persisted.current_phase)
        .filter(|p| graph.contains(*p))
        .ok_or_else(|| {
            PhaseGraphError::Restore(format!("unknown phase '{}'", persisted.current_phase))
        })?;

    let mut fields = match persisted.phase_context {
        Value::Object(map) => map,
        other => {
            return Err(PhaseGraphError::Restore(format!(
                "phase_context must be an object, got {}",
                json_kind(&other)
            )))
        }
    };

    let mut base = Map::new();
    for key in BASE_FIELDS {
        if let Some(value) = fields.remove(key) {
            base.insert(key.to_string(), value);
        }
    }
    let base: BaseFields = serde_json::from_value(Value::Object(base))
        .map_err(|e| PhaseGraphError::Restore(format!("invalid context fields: {}", e)))?;

    if let Some(unknown) = base.phase_visits.keys().find(|k| P::from_name(k).is_none()) {
        return Err(PhaseGraphError::Restore(format!(
            "phase_visits names unknown phase '{}'",
            unknown
        )));
    }

    for (index, record) in persisted.transition_history.iter().enumerate() {
        if let Some(unknown) = [&record.from_phase, &record.to_phase]
            .into_iter()
            .find(|name| P::from_name(name).is_none())
        {
            return Err(PhaseGraphError::Restore(format!(
                "transition_history[{}] names unknown phase '{}'",
                index, unknown
            )));
        }
    }

    let visits = base
        .phase_visits
        .get(current_phase.name())
        .copied()
        .unwrap_or(0);
    if visits < 1 {
        return Err(PhaseGraphError::Restore(format!(
            "current phase '{}' has no recorded visit",
            current_phase.name()
        )));
    }

    // Unit-like states serialize as null
    let state: S = if fields.is_empty() {
        serde_json::from_value(Value::Null)
            .or_else(|_| serde_json::from_value(Value::Object(Map::new())))
    } else {
        serde_json::from_value(Value::Object(fields))
    }
    .map_err(|e| PhaseGraphError::Restore(format!("invalid domain state: {}", e)))?;

    let context = PhaseContext::from_parts(
        base.phase_visits,
        persisted.transition_history,
        base.backward_trigger,
        base.backward_trigger_detail,
        base.awaiting_user_input,
        state,
    );

    Ok((current_phase, context))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Transition;
    use serde_json::json;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Step {
        Draft,
        Review,
        Done,
    }

    impl Phase for Step {
        fn name(&self) -> &'static str {
            match self {
                Step::Draft => "draft",
                Step::Review => "review",
                Step::Done => "done",
            }
        }

        fn all() -> &'static [Self] {
            &[Step::Draft, Step::Review, Step::Done]
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Doc {
        title: String,
        revisions: u32,
        approved: bool,
    }

    fn graph() -> PhaseGraph<Step, Doc> {
        PhaseGraph::builder(Step::Draft, Step::Done)
            .transition(Transition::forward(Step::Draft, Step::Review, "drafted"))
            .transition(Transition::forward(Step::Review, Step::Done, "approved"))
            .transition(Transition::backward(Step::Review, Step::Draft, "rejected"))
            .condition("drafted", |ctx: &PhaseContext<Doc>| ctx.state.revisions > 0)
            .condition("approved", |ctx: &PhaseContext<Doc>| ctx.state.approved)
            .condition("rejected", |ctx: &PhaseContext<Doc>| !ctx.state.approved)
            .build()
            .unwrap()
    }

    fn reviewed_context() -> PhaseContext<Doc> {
        let mut ctx = PhaseContext::new(Doc {
            title: "notes".into(),
            revisions: 2,
            approved: false,
        });
        ctx.increment_visit(Step::Draft);
        ctx.record_transition(&Transition::forward(Step::Draft, Step::Review, "drafted"));
        ctx.increment_visit(Step::Review);
        ctx.record_transition(&Transition::backward(Step::Review, Step::Draft, "rejected"));
        ctx.increment_visit(Step::Draft);
        ctx.set_backward_detail("title too vague");
        ctx.await_user_input();
        ctx
    }

    #[test]
    fn test_round_trip_is_exact() {
        let ctx = reviewed_context();
        let persisted = to_persisted("writer", Step::Draft, &ctx).unwrap();

        assert_eq!(persisted.current_phase, "draft");
        assert_eq!(persisted.phase_context["title"], "notes");
        assert_eq!(persisted.phase_context["phase_visits"]["draft"], 2);
        assert_eq!(persisted.phase_context["awaiting_user_input"], true);

        // Through JSON text, as a store would do it
        let text = serde_json::to_string(&persisted).unwrap();
        let reloaded: PersistedState = serde_json::from_str(&text).unwrap();

        let (phase, restored) = from_persisted("writer", &graph(), reloaded).unwrap();
        assert_eq!(phase, Step::Draft);
        assert_eq!(restored, ctx);
    }

    #[test]
    fn test_history_uses_camel_case() {
        let persisted = to_persisted("writer", Step::Draft, &reviewed_context()).unwrap();
        let value = serde_json::to_value(&persisted).unwrap();
        let first = &value["transition_history"][0];
        assert_eq!(first["fromPhase"], "draft");
        assert_eq!(first["toPhase"], "review");
        assert_eq!(first["isBackward"], false);
    }

    #[test]
    fn test_restore_rejects_wrong_agent_type() {
        let persisted = to_persisted("writer", Step::Draft, &reviewed_context()).unwrap();
        let err = from_persisted("editor", &graph(), persisted).unwrap_err();
        assert_eq!(err.code(), "restore_error");
    }

    #[test]
    fn test_restore_rejects_unknown_phase() {
        let mut persisted = to_persisted("writer", Step::Draft, &reviewed_context()).unwrap();
        persisted.current_phase = "publish".into();
        let err = from_persisted("writer", &graph(), persisted).unwrap_err();
        assert!(matches!(err, PhaseGraphError::Restore(_)));
    }

    #[test]
    fn test_restore_rejects_unknown_visit_key() {
        let mut persisted = to_persisted("writer", Step::Draft, &reviewed_context()).unwrap();
        persisted.phase_context["phase_visits"]["publish"] = json!(1);
        let err = from_persisted("writer", &graph(), persisted).unwrap_err();
        assert!(err.to_string().contains("publish"));
    }

    #[test]
    fn test_restore_rejects_unknown_phase_in_history() {
        let mut persisted = to_persisted("writer", Step::Draft, &reviewed_context()).unwrap();
        persisted.transition_history[1].to_phase = "publish".into();
        let err = from_persisted("writer", &graph(), persisted).unwrap_err();
        assert_eq!(err.code(), "restore_error");
        assert!(err.to_string().contains("transition_history[1]"));
        assert!(err.to_string().contains("publish"));
    }

    #[test]
    fn test_restore_rejects_unvisited_current_phase() {
        let mut persisted = to_persisted("writer", Step::Draft, &reviewed_context()).unwrap();
        persisted.current_phase = "done".into();
        let err = from_persisted("writer", &graph(), persisted).unwrap_err();
        assert!(err.to_string().contains("no recorded visit"));
    }

    #[test]
    fn test_restore_rejects_newer_schema() {
        let mut persisted = to_persisted("writer", Step::Draft, &reviewed_context()).unwrap();
        persisted.schema_version = STATE_SCHEMA_VERSION + 1;
        assert!(from_persisted("writer", &graph(), persisted).is_err());
    }

    #[test]
    fn test_reserved_field_clash() {
        #[derive(Serialize)]
        struct Clashing {
            phase_visits: u32,
        }
        let ctx = PhaseContext::new(Clashing { phase_visits: 1 });
        let err = to_persisted("writer", Step::Draft, &ctx).unwrap_err();
        assert_eq!(err.code(), "configuration_error");
    }

    #[test]
    fn test_non_object_state_rejected() {
        let ctx = PhaseContext::new(vec![1, 2, 3]);
        let err = to_persisted("writer", Step::Draft, &ctx).unwrap_err();
        assert!(err.to_string().contains("an array"));
    }
}
