mod doctor;
mod render;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use phasegraph_agents::{DirectiveGenerator, TutorAgent};
use phasegraph_core::config::{AppConfig, StoreBackend};
use phasegraph_core::event::EventSink;
use phasegraph_core::traits::StateStore;
use phasegraph_core::types::{DisplayEvent, SessionId};
use phasegraph_engine::{
    Agent, CheckpointBroker, CheckpointResponse, FileStateStore, MemoryStateStore, Phase,
    SessionRunner, SqliteStateStore,
};

use render::Output;

#[derive(Parser)]
#[command(name = "phasegraph", version, about = "Resumable phase-graph conversations")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "phasegraph.toml", env = "PHASEGRAPH_CONFIG")]
    config: PathBuf,

    /// Session ID
    #[arg(short, long, default_value = "default")]
    session: String,

    /// Event output format
    #[arg(long, value_enum, default_value_t = Format::Text)]
    format: Format,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    /// Human-readable transcript
    Text,
    /// One wire event per line
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive session (default)
    Repl,
    /// Send one message and exit
    Turn {
        /// Answer checkpoints interactively instead of auto-approving
        #[arg(long, short = 'i')]
        interactive: bool,
        /// The message; lines starting with / are commands
        #[arg(trailing_var_arg = true, required = true)]
        message: Vec<String>,
    },
    /// Print the agent's phase graph
    Graph,
    /// Print the persisted state of the session
    State,
    /// List stored sessions
    Sessions,
    /// Delete the session's state
    Reset,
    /// Show current configuration
    Config,
    /// Run configuration and store health checks
    Doctor,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so JSON events on stdout stay parseable
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("PHASEGRAPH_LOG")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "phasegraph", &mut io::stdout());
        return Ok(());
    }

    let config = AppConfig::load_or_default(&cli.config)?;
    let sid = SessionId::from_str(&cli.session);
    let output = Output::new(cli.format);

    match cli.command {
        Some(Commands::Graph) => {
            let graph = tutor().build_graph()?;
            println!("initial:  {}", graph.initial().name());
            println!("terminal: {}", graph.terminal().name());
            for transition in graph.transitions() {
                println!("  {}", transition);
            }
        }
        Some(Commands::Config) => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Some(Commands::Doctor) => {
            let ok = doctor::run_doctor(&cli.config, &config).await;
            if !ok {
                std::process::exit(1);
            }
        }
        Some(Commands::State) => {
            let runner = build_runner(&config, None)?;
            match runner.state(&sid).await? {
                Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
                None => eprintln!("No state for session '{}'", sid),
            }
        }
        Some(Commands::Sessions) => {
            let runner = build_runner(&config, None)?;
            for id in runner.sessions().await? {
                println!("{}", id);
            }
        }
        Some(Commands::Reset) => {
            let runner = build_runner(&config, None)?;
            if runner.reset(&sid).await? {
                eprintln!("Session '{}' removed", sid);
            } else {
                eprintln!("No state for session '{}'", sid);
            }
        }
        Some(Commands::Turn {
            interactive,
            message,
        }) => {
            let broker = interactive.then(|| Arc::new(CheckpointBroker::new()));
            let runner = build_runner(&config, broker.clone())?;
            let message = message.join(" ").replace("\\n", "\n");
            if !run_turn(&runner, &sid, &message, output, broker).await {
                std::process::exit(1);
            }
        }
        Some(Commands::Repl) | None => {
            let broker = Arc::new(CheckpointBroker::new());
            let runner = build_runner(&config, Some(broker.clone()))?;
            run_repl(&runner, &sid, output, broker).await?;
        }
        // Handled before config loading
        Some(Commands::Completions { .. }) => {}
    }

    Ok(())
}

fn tutor() -> TutorAgent {
    TutorAgent::new(Arc::new(DirectiveGenerator::new()))
}

pub(crate) fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn StateStore>> {
    let store: Arc<dyn StateStore> = match config.store.backend {
        StoreBackend::File => Arc::new(FileStateStore::new(config.state_dir())),
        StoreBackend::Sqlite => Arc::new(SqliteStateStore::open(&config.db_path())?),
        StoreBackend::Memory => Arc::new(MemoryStateStore::new()),
    };
    Ok(store)
}

fn build_runner(
    config: &AppConfig,
    broker: Option<Arc<CheckpointBroker>>,
) -> anyhow::Result<SessionRunner<TutorAgent>> {
    let store = open_store(config)?;
    let runner = SessionRunner::new(Arc::new(tutor()), store, config.engine.clone());
    Ok(match broker {
        Some(broker) => runner.with_checkpoint_handler(broker),
        None => runner,
    })
}

/// Run one turn, printing events as they arrive. Returns false if the turn failed.
async fn run_turn(
    runner: &SessionRunner<TutorAgent>,
    sid: &SessionId,
    message: &str,
    output: Output,
    broker: Option<Arc<CheckpointBroker>>,
) -> bool {
    let (sink, mut stream) = EventSink::channel();

    let print_handle = tokio::spawn(async move {
        while let Some(event) = stream.next().await {
            output.print(&event);
            if let (DisplayEvent::CheckpointRequested { id, options, .. }, Some(broker)) =
                (&event, &broker)
            {
                let response = ask_checkpoint(options.clone()).await;
                answer_checkpoint(broker, id, response).await;
            }
        }
    });

    let result = runner
        .run_turn(sid, message, &serde_json::Value::Null, &sink)
        .await;
    drop(sink);
    print_handle.await.ok();
    output.finish_turn();

    match result {
        Ok(outcome) => {
            info!(session = %sid, transitions = outcome.transitions(), "Turn done");
            true
        }
        // Already reported through the error event
        Err(_) => false,
    }
}

async fn answer_checkpoint(broker: &CheckpointBroker, id: &str, response: CheckpointResponse) {
    if !broker.respond(id, response).await {
        error!(checkpoint = %id, "Checkpoint was no longer pending");
    }
}

/// Let the user pick a checkpoint option. The first option approves.
async fn ask_checkpoint(options: Vec<String>) -> CheckpointResponse {
    let picked = tokio::task::spawn_blocking(move || {
        if options.is_empty() {
            return dialoguer::Confirm::new()
                .with_prompt("Approve?")
                .default(true)
                .interact()
                .map(|yes| if yes { 0 } else { 1 })
                .unwrap_or(1);
        }
        dialoguer::Select::new()
            .with_prompt("Choose")
            .items(&options)
            .default(0)
            .interact()
            .unwrap_or(options.len())
    })
    .await
    .unwrap_or(1);

    if picked == 0 {
        CheckpointResponse::approve()
    } else {
        CheckpointResponse::cancel("declined by user")
    }
}

async fn run_repl(
    runner: &SessionRunner<TutorAgent>,
    sid: &SessionId,
    output: Output,
    broker: Arc<CheckpointBroker>,
) -> anyhow::Result<()> {
    eprintln!("phasegraph session '{}'. End a line with \\ to continue it; :quit to exit.", sid);

    let stdin = io::stdin();
    let mut message = String::new();
    loop {
        if message.is_empty() {
            eprint!("> ");
        } else {
            eprint!(". ");
        }
        io::stderr().flush().ok();

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim_end_matches(['\r', '\n']);

        if let Some(partial) = line.strip_suffix('\\') {
            message.push_str(partial);
            message.push('\n');
            continue;
        }
        message.push_str(line);
        let input = std::mem::take(&mut message);

        match input.trim() {
            "" => continue,
            ":quit" | ":q" => break,
            ":state" => {
                match runner.state(sid).await? {
                    Some(state) => println!("{}", serde_json::to_string_pretty(&state)?),
                    None => eprintln!("No state yet"),
                }
                continue;
            }
            ":reset" => {
                runner.reset(sid).await?;
                eprintln!("Session reset");
                continue;
            }
            _ => {}
        }

        run_turn(runner, sid, &input, output, Some(broker.clone())).await;
    }

    Ok(())
}
