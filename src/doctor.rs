use std::path::Path;
use std::sync::Arc;

use phasegraph_core::config::{AppConfig, StoreBackend};
use phasegraph_core::traits::StateStore;
use phasegraph_engine::{Agent, PhaseEngine};

use crate::{open_store, tutor};

struct CheckResult {
    label: String,
    ok: bool,
    detail: String,
}

impl CheckResult {
    fn ok(label: &str, detail: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ok: true,
            detail: detail.into(),
        }
    }

    fn fail(label: &str, detail: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ok: false,
            detail: detail.into(),
        }
    }
}

/// Print health checks; returns true when everything passed.
pub async fn run_doctor(config_path: &Path, config: &AppConfig) -> bool {
    let mut checks = vec![
        check_config_file(config_path),
        check_engine(config),
        check_graph(),
    ];

    match open_store(config) {
        Ok(store) => {
            checks.push(CheckResult::ok("Store", describe_store(config)));
            checks.push(check_sessions(store.as_ref(), config).await);
        }
        Err(e) => checks.push(CheckResult::fail(
            "Store",
            format!("{} ({})", describe_store(config), e),
        )),
    }

    let mut ok_count = 0;
    let mut fail_count = 0;

    for check in &checks {
        let icon = if check.ok { "[OK]" } else { "[!!]" };
        println!("  {} {}: {}", icon, check.label, check.detail);
        if check.ok {
            ok_count += 1;
        } else {
            fail_count += 1;
        }
    }

    println!();
    println!("  {} passed, {} issues found", ok_count, fail_count);
    fail_count == 0
}

fn check_config_file(path: &Path) -> CheckResult {
    if path.exists() {
        CheckResult::ok("Config", format!("{}", path.display()))
    } else {
        CheckResult::ok("Config", format!("{} not found, using defaults", path.display()))
    }
}

fn check_engine(config: &AppConfig) -> CheckResult {
    let engine = &config.engine;
    if engine.max_transitions_per_turn == 0 {
        return CheckResult::fail("Engine", "max_transitions_per_turn is 0; no turn can move");
    }
    if engine.checkpoint_timeout_secs == 0 {
        return CheckResult::fail("Engine", "checkpoint_timeout_secs is 0; checkpoints always time out");
    }
    CheckResult::ok(
        "Engine",
        format!(
            "{} transitions per turn, {}s checkpoint timeout, rollback {}",
            engine.max_transitions_per_turn,
            engine.checkpoint_timeout_secs,
            if engine.rollback_on_failure { "on" } else { "off" }
        ),
    )
}

fn check_graph() -> CheckResult {
    let agent = tutor();
    match agent.build_graph() {
        Ok(graph) => CheckResult::ok(
            "Graph",
            format!("{}: {} transitions", agent.agent_type(), graph.transitions().count()),
        ),
        Err(e) => CheckResult::fail("Graph", e.to_string()),
    }
}

fn describe_store(config: &AppConfig) -> String {
    match config.store.backend {
        StoreBackend::File => format!("file {}", config.state_dir().display()),
        StoreBackend::Sqlite => format!("sqlite {}", config.db_path().display()),
        StoreBackend::Memory => "memory".to_string(),
    }
}

/// Every stored session must restore into the current graph.
async fn check_sessions(store: &dyn StateStore, config: &AppConfig) -> CheckResult {
    let sessions = match store.list().await {
        Ok(sessions) => sessions,
        Err(e) => return CheckResult::fail("Sessions", e.to_string()),
    };

    let agent = Arc::new(tutor());
    let mut broken = Vec::new();
    for sid in &sessions {
        let restored = match store.load(sid).await {
            Ok(Some(state)) => PhaseEngine::restore(Arc::clone(&agent), state, config.engine.clone())
                .map(|_| ()),
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };
        if let Err(e) = restored {
            broken.push(format!("{} ({})", sid, e));
        }
    }

    if broken.is_empty() {
        CheckResult::ok("Sessions", format!("{} restorable", sessions.len()))
    } else {
        CheckResult::fail(
            "Sessions",
            format!("{} of {} broken: {}", broken.len(), sessions.len(), broken.join(", ")),
        )
    }
}
