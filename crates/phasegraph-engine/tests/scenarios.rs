mod common;

use std::sync::Arc;

use serde_json::{json, Value};

use common::{Crashing, Flags, Mode, Stage, Step, Toy};
use phasegraph_core::config::EngineConfig;
use phasegraph_core::error::PhaseGraphError;
use phasegraph_core::event::EventSink;
use phasegraph_core::types::{DisplayEvent, PersistedState};
use phasegraph_engine::{PhaseEngine, TurnOutcome};
use phasegraph_test_utils::{collect_events, count_type, event_types};

fn toy_engine() -> PhaseEngine<Toy> {
    PhaseEngine::initialize(Arc::new(Toy), "hello", EngineConfig::default()).unwrap()
}

fn visits(engine: &PhaseEngine<Toy>) -> Vec<(String, u32)> {
    engine
        .context()
        .phase_visits()
        .iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect()
}

#[tokio::test]
async fn stays_until_condition_then_advances() {
    let mut engine = toy_engine();
    assert_eq!(engine.current_phase(), Step::A);
    assert_eq!(engine.evaluate().unwrap(), (Step::A, None));

    let (sink, stream) = EventSink::channel();
    let outcome = engine.process_message("hi", &Value::Null, &sink).await.unwrap();
    assert_eq!(
        outcome,
        TurnOutcome::AwaitingInput {
            phase: Step::A,
            transitions: 0
        }
    );
    let events = collect_events(sink, stream).await;
    assert_eq!(
        events.last(),
        Some(&DisplayEvent::AwaitingInput {
            prompt: "waiting in a".into(),
            phase: "a".into(),
        })
    );

    engine.context_mut().state.cond1 = true;
    let (sink, stream) = EventSink::channel();
    let outcome = engine.process_message("go", &Value::Null, &sink).await.unwrap();
    assert_eq!(outcome.transitions(), 1);
    assert_eq!(engine.current_phase(), Step::B);
    assert_eq!(visits(&engine), vec![("a".into(), 1), ("b".into(), 1)]);
    assert_eq!(engine.context().transition_history().len(), 1);

    let events = collect_events(sink, stream).await;
    assert_eq!(
        event_types(&events),
        vec![
            "agent.speaking",
            "phase.changed",
            "agent.speaking",
            "agent.awaiting_input"
        ]
    );
}

#[tokio::test]
async fn backward_wins_over_forward() {
    let mut engine = toy_engine();
    engine.context_mut().state.cond1 = true;
    let (sink, _stream) = EventSink::channel();
    engine.process_message("go", &Value::Null, &sink).await.unwrap();
    assert_eq!(engine.current_phase(), Step::B);

    engine.context_mut().state.cond2 = true;
    engine.context_mut().state.gap = true;
    assert_eq!(engine.evaluate().unwrap(), (Step::A, Some("gap".into())));

    // Latch A so the turn stops right after it is re-entered
    engine.context_mut().state.latch_in = Some("a".into());
    engine.process_message("again", &Value::Null, &sink).await.unwrap();

    let history = engine.context().transition_history();
    let last = history.last().unwrap();
    assert_eq!(last.from_phase, "b");
    assert_eq!(last.to_phase, "a");
    assert!(last.is_backward);
    assert_eq!(last.reason, "gap");
    assert_eq!(engine.context().backward_trigger.as_deref(), Some("gap"));
}

#[tokio::test]
async fn snapshot_round_trip_keeps_latch() {
    let mut phase_context = serde_json::to_value(Flags {
        cond1: true,
        cond2: true,
        ..Flags::default()
    })
    .unwrap();
    phase_context["phase_visits"] = json!({ "a": 2, "b": 1 });
    phase_context["backward_trigger"] = Value::Null;
    phase_context["backward_trigger_detail"] = Value::Null;
    phase_context["awaiting_user_input"] = json!(true);

    let persisted: PersistedState = serde_json::from_value(json!({
        "schema_version": 1,
        "agent_type": "toy",
        "current_phase": "b",
        "phase_context": phase_context,
        "transition_history": [
            { "fromPhase": "a", "toPhase": "b", "reason": "cond1", "isBackward": false,
              "timestamp": "2026-03-02T09:00:00Z" },
            { "fromPhase": "b", "toPhase": "a", "reason": "gap", "isBackward": true,
              "timestamp": "2026-03-02T09:01:00Z" }
        ]
    }))
    .unwrap();

    let engine = PhaseEngine::restore(Arc::new(Toy), persisted.clone(), EngineConfig::default())
        .unwrap();
    let snapshot = engine.get_state().unwrap();
    assert_eq!(snapshot, persisted);

    let mut fresh =
        PhaseEngine::restore(Arc::new(Toy), snapshot, EngineConfig::default()).unwrap();
    assert_eq!(fresh.current_phase(), Step::B);
    assert_eq!(fresh.context(), engine.context());
    assert!(fresh.context().awaiting_user_input());
    assert_eq!(fresh.context().transition_history().len(), 2);

    // cond2 holds, but the latch wins until a new message arrives
    assert_eq!(fresh.evaluate().unwrap(), (Step::B, None));

    let (sink, _stream) = EventSink::channel();
    let outcome = fresh.process_message("continue", &Value::Null, &sink).await.unwrap();
    assert!(outcome.is_complete());
    assert_eq!(fresh.current_phase(), Step::C);
}

#[tokio::test]
async fn executor_failure_leaves_no_transition() {
    let mut engine =
        PhaseEngine::initialize(Arc::new(Crashing), "start", EngineConfig::default()).unwrap();
    let (sink, _stream) = EventSink::channel();

    let err = engine.process_message("go", &Value::Null, &sink).await.unwrap_err();
    assert!(matches!(err, PhaseGraphError::Executor { ref phase, .. } if phase == "c"));
    assert_eq!(err.code(), "executor_error");

    assert_eq!(engine.current_phase(), Stage::C);
    assert_eq!(engine.context().visit_count(Stage::C), 1);
    let history = engine.context().transition_history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].to_phase, "c");

    // Side effects are kept by default
    assert_eq!(engine.context().state.counter, 1);
    assert_eq!(engine.context().state.note.as_deref(), Some("half-written"));
}

#[tokio::test]
async fn rollback_restores_context_on_failure() {
    let config = EngineConfig {
        rollback_on_failure: true,
        ..EngineConfig::default()
    };
    let mut engine = PhaseEngine::initialize(Arc::new(Crashing), "start", config).unwrap();
    let (sink, _stream) = EventSink::channel();

    engine.process_message("go", &Value::Null, &sink).await.unwrap_err();
    assert_eq!(engine.current_phase(), Stage::C);
    assert_eq!(engine.context().state.counter, 0);
    assert!(engine.context().state.note.is_none());
    assert_eq!(engine.context().visit_count(Stage::C), 1);
}

#[tokio::test]
async fn terminal_emits_exactly_one_completion() {
    let mut engine = toy_engine();
    engine.context_mut().state.cond1 = true;
    engine.context_mut().state.cond2 = true;

    let (sink, stream) = EventSink::channel();
    let outcome = engine.process_message("go", &Value::Null, &sink).await.unwrap();
    assert_eq!(outcome, TurnOutcome::Complete { transitions: 2 });
    assert!(engine.is_complete());

    let events = collect_events(sink, stream).await;
    assert_eq!(count_type(&events, "agent.complete"), 1);
    assert_eq!(count_type(&events, "agent.awaiting_input"), 0);
    assert_eq!(
        events.last(),
        Some(&DisplayEvent::complete("done after 2 transitions"))
    );
    // The terminal phase has no executor run
    assert_eq!(engine.context().state.log, vec!["a:Initial", "b:Initial"]);
}

#[tokio::test]
async fn reentry_selects_distinct_behavior_and_announces_it() {
    let mut engine = toy_engine();
    engine.context_mut().state.cond1 = true;
    engine.context_mut().state.gap = true;

    let (sink, stream) = EventSink::channel();
    let outcome = engine.process_message("go", &Value::Null, &sink).await.unwrap();
    assert_eq!(
        outcome,
        TurnOutcome::AwaitingInput {
            phase: Step::B,
            transitions: 3
        }
    );

    let log = &engine.context().state.log;
    assert_eq!(log[0], "a:Initial");
    assert_eq!(log[1], "b:Initial");
    assert_eq!(
        log[2],
        format!("a:{:?}", Mode::Reentry { trigger: Some("gap".into()) })
    );
    assert_eq!(log[3], format!("b:{:?}", Mode::Reentry { trigger: None }));

    let events = collect_events(sink, stream).await;
    let notice = events
        .iter()
        .position(|e| *e == DisplayEvent::thinking("Re-entering a because gap"))
        .expect("re-entry notice");
    let second_run_of_a = events
        .iter()
        .enumerate()
        .filter(|(_, e)| **e == DisplayEvent::speaking("in a"))
        .nth(1)
        .map(|(i, _)| i)
        .unwrap();
    assert!(notice < second_run_of_a);

    assert_eq!(engine.context().visit_count(Step::A), 2);
    assert_eq!(engine.context().visit_count(Step::B), 2);
    // The forward hop back to B cleared the trigger
    assert!(engine.context().backward_trigger.is_none());
}

#[tokio::test]
async fn circuit_breaker_stops_endless_cycle() {
    let config = EngineConfig {
        max_transitions_per_turn: 4,
        ..EngineConfig::default()
    };
    let mut engine = PhaseEngine::initialize(Arc::new(Toy), "hello", config).unwrap();
    engine.context_mut().state.cond1 = true;
    engine.context_mut().state.gap = true;
    engine.context_mut().state.sticky_gap = true;

    let (sink, _stream) = EventSink::channel();
    let err = engine.process_message("go", &Value::Null, &sink).await.unwrap_err();
    assert!(matches!(
        err,
        PhaseGraphError::TransitionLimitExceeded { limit: 4, .. }
    ));
    assert_eq!(err.code(), "transition_limit");
    assert_eq!(engine.context().transition_history().len(), 5);
}

#[tokio::test]
async fn visit_counts_stay_positive_for_current_phase() {
    let mut engine = toy_engine();
    let (sink, _stream) = EventSink::channel();
    for flags in [(false, false), (true, false), (true, true)] {
        engine.context_mut().state.cond1 = flags.0;
        engine.context_mut().state.cond2 = flags.1;
        engine.process_message("next", &Value::Null, &sink).await.unwrap();
        assert!(engine.context().visit_count(engine.current_phase()) >= 1);
    }
    assert!(engine.is_complete());
}
