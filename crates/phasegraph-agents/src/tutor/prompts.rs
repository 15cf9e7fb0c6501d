//! Prompt text for each tutor phase and behavior.

use super::state::{Objective, TutorState};

pub const SYSTEM_PROMPT: &str = "You are a patient tutor. Teach one objective at a time, \
ask a single question per message, and use the provided commands to record what the learner \
decides or answers. Never record an answer you have not seen.";

fn preferences_line(state: &TutorState) -> String {
    match &state.preferences {
        Some(p) => match &p.style {
            Some(style) => format!("Pace: {}. Style: {}.", p.pace, style),
            None => format!("Pace: {}.", p.pace),
        },
        None => "No preferences recorded.".to_string(),
    }
}

fn objective_list(objectives: &[Objective]) -> String {
    objectives
        .iter()
        .map(|o| {
            if o.prerequisite {
                format!("- [{}] {} (prerequisite)", o.id, o.statement)
            } else {
                format!("- [{}] {}", o.id, o.statement)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn configure_initial(state: &TutorState) -> String {
    format!(
        "Welcome the learner to a session on {}. Ask how fast they want to go \
         (relaxed, steady or intensive) and how they like to be taught.",
        state.topic
    )
}

pub fn configure_resume(state: &TutorState) -> String {
    format!(
        "The learner answered your question about session preferences for {}. \
         Record them with set_preferences.",
        state.topic
    )
}

pub fn configure_reentry(state: &TutorState) -> String {
    format!(
        "The learner wants to change how the session on {} runs. {} \
         Ask what they would like instead.",
        state.topic,
        preferences_line(state)
    )
}

pub fn plan_initial(state: &TutorState) -> String {
    format!(
        "Propose this study plan for {} and ask whether it fits. {}\n{}",
        state.topic,
        preferences_line(state),
        objective_list(&state.objectives)
    )
}

pub fn plan_resume(state: &TutorState) -> String {
    format!(
        "The learner replied about the plan. Apply their edits with add_objective or \
         drop_objective, and call confirm_plan once they agree.\n{}",
        objective_list(&state.objectives)
    )
}

pub fn plan_reentry(state: &TutorState, trigger: Option<&str>, detail: Option<&str>) -> String {
    let mut prompt = String::from("Returning to the plan");
    if let Some(trigger) = trigger {
        prompt.push_str(&format!(" ({})", trigger.replace('_', " ")));
    }
    prompt.push('.');
    if let Some(detail) = detail {
        prompt.push_str(&format!(" The learner is missing: {}.", detail));
    }
    prompt.push_str(&format!(
        " Briefly explain the adjusted plan.\n{}",
        objective_list(&state.objectives)
    ));
    prompt
}

pub fn practice_question(objective: &Objective, trigger: Option<&str>) -> String {
    match trigger {
        Some("next_objective_available") => format!(
            "Move on to the next objective: {}. Ask the first question on it.",
            objective.statement
        ),
        Some(other) => format!(
            "Practice resumes ({}). Ask a question on: {}.",
            other.replace('_', " "),
            objective.statement
        ),
        None => format!("Ask one practice question on: {}.", objective.statement),
    }
}

pub fn practice_resume(objective: &Objective, streak: u32) -> String {
    format!(
        "The learner answered your question on: {}. Grade it with record_answer \
         (current streak {}). If the answer shows a missing prerequisite, call flag_gap \
         instead. Then ask the next question.",
        objective.statement, streak
    )
}

pub fn review(objective: &Objective, remaining: usize) -> String {
    format!(
        "The learner mastered: {}. Summarize what they showed, in two sentences. \
         {} objective(s) remain.",
        objective.statement, remaining
    )
}
