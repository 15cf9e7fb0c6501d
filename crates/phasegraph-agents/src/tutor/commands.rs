use serde::Deserialize;
use serde_json::json;

use phasegraph_core::types::DisplayEvent;
use phasegraph_engine::{ApplyCommand, CommandOutcome, PhaseContext};

use super::state::{Pace, Preferences, TutorState};

/// Side effects the tutor's text generator may request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "name", content = "input", rename_all = "snake_case")]
pub enum TutorCommand {
    SetPreferences {
        #[serde(default)]
        pace: Pace,
        #[serde(default)]
        style: Option<String>,
    },
    AddObjective {
        statement: String,
    },
    DropObjective {
        id: String,
    },
    ConfirmPlan,
    RecordAnswer {
        correct: bool,
        #[serde(default)]
        feedback: Option<String>,
    },
    FlagGap {
        detail: String,
    },
    RevisitPreferences,
}

impl TutorCommand {
    pub const SET_PREFERENCES: &'static str = "set_preferences";
    pub const ADD_OBJECTIVE: &'static str = "add_objective";
    pub const DROP_OBJECTIVE: &'static str = "drop_objective";
    pub const CONFIRM_PLAN: &'static str = "confirm_plan";
    pub const RECORD_ANSWER: &'static str = "record_answer";
    pub const FLAG_GAP: &'static str = "flag_gap";
    pub const REVISIT_PREFERENCES: &'static str = "revisit_preferences";
}

fn waiting() -> CommandOutcome {
    CommandOutcome::rejected("still waiting for the learner's answer")
}

impl ApplyCommand<TutorState> for TutorCommand {
    fn names() -> &'static [&'static str] {
        &[
            Self::SET_PREFERENCES,
            Self::ADD_OBJECTIVE,
            Self::DROP_OBJECTIVE,
            Self::CONFIRM_PLAN,
            Self::RECORD_ANSWER,
            Self::FLAG_GAP,
            Self::REVISIT_PREFERENCES,
        ]
    }

    fn apply(self, context: &mut PhaseContext<TutorState>) -> CommandOutcome {
        // Nothing the learner decides can be recorded in the same breath as asking
        if context.awaiting_user_input() {
            return waiting();
        }
        let state = &mut context.state;

        match self {
            TutorCommand::SetPreferences { pace, style } => {
                let preferences = Preferences { pace, style };
                let payload = json!({ "pace": preferences.pace, "style": preferences.style });
                state.preferences = Some(preferences);
                CommandOutcome::applied(vec![DisplayEvent::data("preferences", payload)])
            }
            TutorCommand::AddObjective { statement } => {
                let statement = statement.trim();
                if statement.is_empty() {
                    return CommandOutcome::rejected("objective statement is empty");
                }
                if state.plan.is_confirmed() {
                    return CommandOutcome::rejected("the plan is already approved");
                }
                let id = state.add_objective(statement, false);
                state.plan_selected = false;
                CommandOutcome::applied(vec![DisplayEvent::data(
                    "objective_added",
                    json!({ "id": id, "statement": statement }),
                )])
            }
            TutorCommand::DropObjective { id } => {
                if state.plan.is_confirmed() {
                    return CommandOutcome::rejected("the plan is already approved");
                }
                if !state.drop_objective(&id) {
                    return CommandOutcome::rejected(format!("no objective '{}'", id));
                }
                state.plan_selected = false;
                CommandOutcome::applied(vec![DisplayEvent::data(
                    "objective_dropped",
                    json!({ "id": id }),
                )])
            }
            TutorCommand::ConfirmPlan => {
                if state.objectives.is_empty() {
                    return CommandOutcome::rejected("the plan has no objectives");
                }
                state.plan_selected = true;
                CommandOutcome::applied(Vec::new())
            }
            TutorCommand::RecordAnswer { correct, feedback } => {
                let Some(id) = state.current.clone() else {
                    return CommandOutcome::rejected("no objective is being practiced");
                };
                if !state.practice.is_awaiting() {
                    return CommandOutcome::rejected("no question is open");
                }
                let score = state.scores.entry(id.clone()).or_default();
                score.record(correct);
                let payload = json!({
                    "objective": id,
                    "correct": correct,
                    "streak": score.streak,
                    "attempts": score.attempts,
                    "feedback": feedback,
                });
                CommandOutcome::applied(vec![DisplayEvent::data("answer_recorded", payload)])
            }
            TutorCommand::FlagGap { detail } => {
                let detail = detail.trim().to_string();
                if detail.is_empty() {
                    return CommandOutcome::rejected("gap detail is empty");
                }
                state.gap = Some(detail.clone());
                context.backward_trigger_detail = Some(detail.clone());
                CommandOutcome::applied(vec![DisplayEvent::data(
                    "gap_flagged",
                    json!({ "detail": detail }),
                )])
            }
            TutorCommand::RevisitPreferences => {
                state.preferences = None;
                state.configure.reset();
                CommandOutcome::applied(Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phasegraph_engine::decode_command;
    use serde_json::Value;

    fn context() -> PhaseContext<TutorState> {
        PhaseContext::new(TutorState::new("iterators"))
    }

    #[test]
    fn test_decode_known_commands() {
        let cmd: TutorCommand =
            decode_command("set_preferences", &json!({ "pace": "relaxed" })).unwrap();
        assert_eq!(
            cmd,
            TutorCommand::SetPreferences {
                pace: Pace::Relaxed,
                style: None
            }
        );
        let cmd: TutorCommand = decode_command("confirm_plan", &Value::Null).unwrap();
        assert_eq!(cmd, TutorCommand::ConfirmPlan);
        assert!(decode_command::<TutorCommand>("record_answer", &json!({})).is_err());
        assert!(decode_command::<TutorCommand>("teleport", &Value::Null).is_err());
    }

    #[test]
    fn test_names_cover_every_variant() {
        for name in TutorCommand::names() {
            let input = match *name {
                "set_preferences" => json!({}),
                "add_objective" => json!({ "statement": "x" }),
                "drop_objective" => json!({ "id": "obj-1" }),
                "record_answer" => json!({ "correct": true }),
                "flag_gap" => json!({ "detail": "x" }),
                _ => Value::Null,
            };
            assert!(decode_command::<TutorCommand>(name, &input).is_ok(), "{}", name);
        }
    }

    #[test]
    fn test_rejected_while_awaiting() {
        let mut ctx = context();
        ctx.await_user_input();
        let outcome = TutorCommand::SetPreferences {
            pace: Pace::Steady,
            style: None,
        }
        .apply(&mut ctx);
        assert!(!outcome.is_applied());
        assert!(ctx.state.preferences.is_none());
    }

    #[test]
    fn test_set_preferences_emits_data() {
        let mut ctx = context();
        let outcome = TutorCommand::SetPreferences {
            pace: Pace::Intensive,
            style: Some("socratic".into()),
        }
        .apply(&mut ctx);
        assert!(outcome.is_applied());
        assert_eq!(outcome.events[0].event_type(), "data.preferences");
        assert_eq!(ctx.state.preferences.unwrap().pace, Pace::Intensive);
    }

    #[test]
    fn test_plan_edits_reset_selection() {
        let mut ctx = context();
        ctx.state.seed_objectives();
        assert!(TutorCommand::ConfirmPlan.apply(&mut ctx).is_applied());
        assert!(ctx.state.plan_selected);

        let outcome = TutorCommand::AddObjective {
            statement: "Chain adapters".into(),
        }
        .apply(&mut ctx);
        assert!(outcome.is_applied());
        assert!(!ctx.state.plan_selected);
        assert_eq!(ctx.state.objectives.len(), 4);

        let outcome = TutorCommand::DropObjective { id: "obj-9".into() }.apply(&mut ctx);
        assert_eq!(outcome.rejection.as_deref(), Some("no objective 'obj-9'"));
    }

    #[test]
    fn test_confirm_empty_plan_rejected() {
        let mut ctx = context();
        assert!(!TutorCommand::ConfirmPlan.apply(&mut ctx).is_applied());
    }

    #[test]
    fn test_record_answer_needs_open_question() {
        let mut ctx = context();
        ctx.state.seed_objectives();
        ctx.state.select_next();
        let answer = TutorCommand::RecordAnswer {
            correct: true,
            feedback: None,
        };
        assert!(!answer.clone().apply(&mut ctx).is_applied());

        ctx.state.practice.ask();
        let outcome = answer.apply(&mut ctx);
        assert!(outcome.is_applied());
        assert_eq!(ctx.state.score("obj-1").streak, 1);
    }

    #[test]
    fn test_flag_gap_sets_backward_detail() {
        let mut ctx = context();
        let outcome = TutorCommand::FlagGap {
            detail: "closures".into(),
        }
        .apply(&mut ctx);
        assert!(outcome.is_applied());
        assert_eq!(ctx.state.gap.as_deref(), Some("closures"));
        assert_eq!(ctx.backward_trigger_detail.as_deref(), Some("closures"));
    }

    #[test]
    fn test_revisit_preferences_resets_configure() {
        let mut ctx = context();
        ctx.state.configure.confirm();
        ctx.state.preferences = Some(Preferences {
            pace: Pace::Steady,
            style: None,
        });
        assert!(TutorCommand::RevisitPreferences.apply(&mut ctx).is_applied());
        assert!(!ctx.state.configure.is_confirmed());
        assert!(ctx.state.preferences.is_none());
    }
}
