//! Session Intel CLI
//!
//! The `session-intel` command runs interactive sessions against a coding
//! assistant and inspects the artifacts they leave behind.
//!
//! ## Commands
//!
//! - `run`: Start or resume an interactive session
//! - `sessions`: List sessions or show one in detail
//! - `recap`: Print the recap learn mode would load for a session
//! - `mode`: Show or toggle a session's mode
//! - `summarize`: Append a fresh summary to a session's journal

mod interactive;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use session_intel_core::obs::SessionSpan;
use session_intel_core::{
    init_tracing, load_recap, model_from_config, set_session_mode, summarize_session,
    ArtifactReader, Assistant, Augmenter, CodexCliAssistant, Collaborators, IntelConfig,
    LlmSummarizer, ModelAssistant, SessionPipeline, StartOptions,
};
use session_state::fakes::MemorySessionMemory;
use session_state::{
    ArtifactStore, FsArtifactStore, SessionId, SessionMemory, SessionMode, Summary,
    SurrealSessionMemory,
};
use tracing::{info, warn, Level};

use crate::interactive::{run_session, Console};

#[derive(Parser)]
#[command(name = "session-intel")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Turn logging, learnings journals and recap-driven prompt augmentation", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start or resume an interactive session
    Run {
        /// Force the session mode (keeps the stored mode when omitted)
        #[arg(short, long)]
        mode: Option<SessionMode>,

        /// Session to resume (a new id is generated when omitted)
        #[arg(short, long, value_parser = parse_session_id)]
        session_id: Option<SessionId>,

        /// Prior session to recap in learn mode (defaults to the newest other session)
        #[arg(long, value_parser = parse_session_id)]
        source_session: Option<SessionId>,

        /// Assistant backend
        #[arg(short, long, value_enum, default_value_t = Backend::Model)]
        backend: Backend,

        /// Working directory for the codex backend
        #[arg(short, long, default_value = ".")]
        workdir: PathBuf,
    },

    /// Inspect stored sessions
    Sessions {
        #[command(subcommand)]
        action: SessionsAction,
    },

    /// Print the recap learn mode would load for a session
    Recap {
        #[arg(value_parser = parse_session_id)]
        session_id: SessionId,
    },

    /// Show or toggle a session's mode
    Mode {
        #[arg(value_parser = parse_session_id)]
        session_id: SessionId,

        /// New mode; prints the current mode when omitted
        mode: Option<SessionMode>,
    },

    /// Summarize a stored session and append the result to its journal
    Summarize {
        #[arg(value_parser = parse_session_id)]
        session_id: SessionId,
    },
}

#[derive(Subcommand)]
enum SessionsAction {
    /// List sessions, newest first
    List {
        /// Maximum number of sessions to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show everything stored for one session
    Show {
        #[arg(value_parser = parse_session_id)]
        session_id: SessionId,

        /// Print the detail as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Chat completions model with session memory
    Model,
    /// `codex exec` subprocess
    Codex,
}

fn parse_session_id(raw: &str) -> std::result::Result<SessionId, String> {
    SessionId::parse(raw).map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::WARN };
    init_tracing(cli.json, level);

    let config = IntelConfig::from_env().context("Invalid Session Intel configuration")?;
    config
        .ensure_documents_root()
        .context("Documents root is not usable")?;
    let store = Arc::new(
        FsArtifactStore::new(&config.documents_root)
            .context("Failed to open the documents root")?,
    );

    match cli.command {
        Commands::Run {
            mode,
            session_id,
            source_session,
            backend,
            workdir,
        } => {
            let options = StartOptions {
                session_id,
                mode,
                source_session,
                recap_user_turns: config.recap_user_turns,
                exit_criteria: config.exit_criteria(),
            };
            cmd_run(&config, store, options, backend, workdir).await
        }
        Commands::Sessions { action } => match action {
            SessionsAction::List { limit } => cmd_sessions_list(store, limit).await,
            SessionsAction::Show { session_id, json } => {
                cmd_sessions_show(store, &session_id, json).await
            }
        },
        Commands::Recap { session_id } => {
            cmd_recap(store.as_ref(), &session_id, config.recap_user_turns).await
        }
        Commands::Mode { session_id, mode } => cmd_mode(store.as_ref(), &session_id, mode).await,
        Commands::Summarize { session_id } => {
            let summarizer = LlmSummarizer::new(model_from_config(&config), config.timeout_ms);
            let summary = summarize_session(store.as_ref(), &summarizer, &session_id)
                .await
                .context(format!("Failed to summarize session {}", session_id))?;
            println!("Summary appended for session {}", session_id);
            print_summary(&summary);
            Ok(())
        }
    }
}

/// Open session memory, falling back to an in-process store.
async fn open_memory(config: &IntelConfig) -> Arc<dyn SessionMemory> {
    let url = config.memory_url();
    match SurrealSessionMemory::connect(&url).await {
        Ok(memory) => Arc::new(memory),
        Err(err) => {
            warn!(url = %url, error = %err, "session memory unavailable");
            println!("Session memory unavailable ({err}); history is kept for this run only.");
            Arc::new(MemorySessionMemory::new())
        }
    }
}

/// Run an interactive session
async fn cmd_run(
    config: &IntelConfig,
    store: Arc<FsArtifactStore>,
    options: StartOptions,
    backend: Backend,
    workdir: PathBuf,
) -> Result<()> {
    let model = model_from_config(config);
    let trim_policy = config.trim_policy()?;

    let (assistant, label): (Arc<dyn Assistant>, &str) = match backend {
        Backend::Model => {
            let memory = open_memory(config).await;
            let assistant =
                ModelAssistant::new(model.clone(), memory, trim_policy, config.timeout_ms);
            (Arc::new(assistant), "Assistant")
        }
        Backend::Codex => (
            Arc::new(CodexCliAssistant::new(workdir, config.timeout_ms)),
            "Codex",
        ),
    };

    let deps = Collaborators {
        store: store.clone(),
        assistant,
        summarizer: Arc::new(LlmSummarizer::new(model.clone(), config.timeout_ms)),
        augmenter: Arc::new(Augmenter::new(model, config.timeout_ms)),
    };

    let mut pipeline = SessionPipeline::start(options, deps).await;
    let _span = SessionSpan::enter(pipeline.session_id().as_str());
    info!(session_id = %pipeline.session_id(), mode = %pipeline.mode(), "session ready");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut console = Console::new(stdin, std::io::stdout());
    let report = run_session(&mut pipeline, &mut console, label).await?;

    if let Some(transition) = report.transition {
        info!(next = %transition.next, "mode changed on close");
    }
    println!(
        "Artifacts stored in: {}",
        store.session_dir(pipeline.session_id()).display()
    );
    Ok(())
}

/// List sessions newest first
async fn cmd_sessions_list(store: Arc<dyn ArtifactStore>, limit: Option<usize>) -> Result<()> {
    let rows = ArtifactReader::new(store)
        .list_sessions(limit)
        .await
        .context("Failed to list sessions")?;

    if rows.is_empty() {
        println!("No sessions found. Start one with 'session-intel run'.");
        return Ok(());
    }

    for row in rows {
        println!(
            "{}  {}  [{}]  {}",
            row.session_id,
            row.updated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            row.mode,
            row.digest
        );
    }
    Ok(())
}

/// Show one session in detail
async fn cmd_sessions_show(
    store: Arc<dyn ArtifactStore>,
    session_id: &SessionId,
    json: bool,
) -> Result<()> {
    let detail = ArtifactReader::new(store)
        .session_detail(session_id)
        .await
        .context(format!("Failed to load session {}", session_id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    println!("Session: {}", detail.session_id);
    println!("Mode:    {}", detail.mode);
    println!();
    println!("Turns ({}):", detail.turns.len());
    for turn in &detail.turns {
        println!("  {:>3} {:<6} {}", turn.turn, turn.role.label(), turn.synopsis(100));
    }

    if !detail.augmentations.is_empty() {
        println!();
        println!("Augmentations ({}):", detail.augmentations.len());
        for record in &detail.augmentations {
            println!("  turn {:>3}  {}", record.turn, record.decision);
        }
    }

    if let Some(latest) = detail.summaries.last() {
        println!();
        println!("Latest summary ({} total):", detail.summaries.len());
        print_summary(latest);
    }

    for notice in &detail.notices {
        println!("[notice] {}", notice);
    }
    Ok(())
}

/// Print the recap for a session
async fn cmd_recap(
    store: &dyn ArtifactStore,
    session_id: &SessionId,
    recap_user_turns: usize,
) -> Result<()> {
    let recap = load_recap(store, session_id, recap_user_turns)
        .await
        .context(format!("No recap available for {}", session_id))?;
    for notice in &recap.notices {
        println!("[notice] {}", notice);
    }
    print!("{}", recap.render_context());
    Ok(())
}

/// Show or set a session's mode
async fn cmd_mode(
    store: &dyn ArtifactStore,
    session_id: &SessionId,
    mode: Option<SessionMode>,
) -> Result<()> {
    match mode {
        None => {
            let current = store
                .mode(session_id)
                .await
                .context(format!("Failed to read mode for {}", session_id))?;
            println!("{}: {}", session_id, current);
        }
        Some(mode) => {
            let previous = set_session_mode(store, session_id, mode)
                .await
                .context(format!("Failed to set mode for {}", session_id))?;
            if previous == mode {
                println!("{} is already in {} mode", session_id, mode);
            } else {
                println!("{}: {} -> {}", session_id, previous, mode);
            }
        }
    }
    Ok(())
}

fn print_summary(summary: &Summary) {
    println!("  Timeline highlights:");
    for item in &summary.highlights {
        println!("    - {}", item);
    }
    println!("  Knowledge gaps:");
    for gap in &summary.gaps {
        let mark = if gap.resolved { "x" } else { " " };
        println!("    [{}] {}", mark, gap.description);
    }
    println!("  Suggested next reps:");
    for item in &summary.next_steps {
        println!("    - {}", item);
    }
}
