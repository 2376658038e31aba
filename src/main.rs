//! `overseer` - CLI for the session orchestration core
//!
//! The binary parses arguments, calls the core, prints, and exits; every
//! rule about how sessions run lives in `overseer-core`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use console::Style;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cli::{Cli, Commands, SpawnArgs};
use overseer_core::config::OverseerConfig;
use overseer_core::query;
use overseer_core::session::{
    CheckerSpec, Condition, DependencyRule, DependencySpec, Outcome, PhaseMetadata, SessionId,
    SessionState,
};
use overseer_core::store::{ListFilter, SessionDraft, SessionStore};
use overseer_core::supervisor::{RunMode, Supervisor};

mod cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("overseer=debug,overseer_core=debug")
    } else {
        EnvFilter::new("overseer=info,overseer_core=info")
    };

    // status lines to stderr; stdout carries only results and JSON
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    match &cli.command {
        Commands::Run { task, spawn } => cmd_run(&cli, task, spawn).await,
        Commands::Serve => cmd_serve(&cli).await,
        Commands::Spawn { task, spawn } => cmd_spawn(&cli, task, spawn).await,
        Commands::Poll { id } => cmd_poll(&cli, id).await,
        Commands::Wait { ids, timeout } => cmd_wait(&cli, ids, *timeout).await,
        Commands::Abort { id } => cmd_abort(&cli, id).await,
        Commands::List { state, under } => {
            cmd_list(&cli, state.as_deref(), under.as_deref()).await
        }
        Commands::Activity { id, line } => cmd_activity(&cli, id, line).await,
    }
}

fn store_root(cli: &Cli, config: &OverseerConfig) -> PathBuf {
    cli.dir.clone().unwrap_or_else(|| config.data_dir())
}

async fn open_reader(cli: &Cli) -> Result<SessionStore> {
    let config = OverseerConfig::load_or_default();
    Ok(SessionStore::open(store_root(cli, &config)).await?)
}

/// Spawn a root session and drive the whole store to quiescence in-process
async fn cmd_run(cli: &Cli, task: &str, args: &SpawnArgs) -> Result<ExitCode> {
    let config = OverseerConfig::load_or_default();
    let store = Arc::new(SessionStore::open_supervised(store_root(cli, &config)).await?);
    let supervisor = Supervisor::from_config(store, &config)?;

    let draft = build_draft(supervisor.store(), task, args, None).await?;
    let id = supervisor.spawn(draft).await?;
    info!(session = %id, "session created");

    supervisor.run(RunMode::UntilIdle).await?;

    let session = supervisor.store().get(&id).await?;
    if let Some(result) = &session.result {
        println!("{}", result);
    }
    match session.state {
        SessionState::Aborted => {
            if let Some(note) = &session.note {
                eprintln!("aborted: {}", note);
            }
            Ok(ExitCode::from(2))
        }
        SessionState::Skipped => {
            if let Some(note) = &session.note {
                eprintln!("skipped: {}", note);
            }
            Ok(ExitCode::SUCCESS)
        }
        _ => Ok(ExitCode::SUCCESS),
    }
}

/// Supervise the store until interrupted
async fn cmd_serve(cli: &Cli) -> Result<ExitCode> {
    let config = OverseerConfig::load_or_default();
    let root = store_root(cli, &config);
    let store = Arc::new(SessionStore::open_supervised(&root).await?);
    let supervisor = Supervisor::from_config(store, &config)?;

    info!(dir = %root.display(), "supervising session store");
    tokio::select! {
        result = supervisor.run(RunMode::Forever) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Create a pending record and print its id; a live supervisor adopts it
async fn cmd_spawn(cli: &Cli, task: &str, args: &SpawnArgs) -> Result<ExitCode> {
    let store = open_reader(cli).await?;

    // a worker spawning subtasks becomes their parent
    let parent = match std::env::var("OVERSEER_SESSION_ID") {
        Ok(raw) if !raw.is_empty() => Some(
            SessionId::parse(&raw)
                .with_context(|| format!("OVERSEER_SESSION_ID {:?} is not a session id", raw))?,
        ),
        _ => None,
    };

    let draft = build_draft(&store, task, args, parent).await?;
    let id = store.create(draft).await?;
    println!("{}", id);
    Ok(ExitCode::SUCCESS)
}

async fn cmd_poll(cli: &Cli, reference: &str) -> Result<ExitCode> {
    let store = open_reader(cli).await?;
    let id = store.resolve(reference).await?;
    let status = query::poll(&store, &id).await?;
    println!("{}", serde_json::to_string(&status)?);
    Ok(ExitCode::SUCCESS)
}

async fn cmd_wait(cli: &Cli, references: &[String], timeout: Option<u64>) -> Result<ExitCode> {
    let store = open_reader(cli).await?;
    let mut ids = Vec::with_capacity(references.len());
    for reference in references {
        ids.push(store.resolve(reference).await?);
    }

    let outcomes = query::wait(&store, &ids, timeout.map(Duration::from_secs)).await?;

    let dim = Style::new().dim();
    let multiple = outcomes.len() > 1;
    let mut any_aborted = false;
    let mut any_timed_out = false;

    for outcome in &outcomes {
        if multiple {
            let header = match &outcome.alias {
                Some(alias) => format!("[{} ({})]", alias, outcome.id),
                None => format!("[{}]", outcome.id),
            };
            println!("{}", header);
        }
        if outcome.timed_out {
            any_timed_out = true;
            println!("{}", dim.apply_to(format!("(timed out; still {})", outcome.state)));
            continue;
        }
        if outcome.state == SessionState::Aborted {
            any_aborted = true;
        }
        match (&outcome.result, &outcome.note) {
            (Some(result), _) => println!("{}", result),
            (None, Some(note)) => println!("{}", dim.apply_to(format!("({}: {})", outcome.state, note))),
            (None, None) => println!("{}", dim.apply_to(format!("({})", outcome.state))),
        }
    }

    if any_aborted {
        Ok(ExitCode::from(2))
    } else if any_timed_out {
        Ok(ExitCode::from(1))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Ask the owning supervisor to abort, or apply the abort directly when the
/// recorded worker is already gone
async fn cmd_abort(cli: &Cli, reference: &str) -> Result<ExitCode> {
    let store = open_reader(cli).await?;
    let id = store.resolve(reference).await?;

    let session = store.get(&id).await?;
    if session.is_terminal() {
        println!("{} is already {}", id, session.state);
        return Ok(ExitCode::SUCCESS);
    }

    store.request_abort(&id).await?;
    if store.worker_alive(&id).await? {
        println!("abort requested for {}", id);
    } else {
        for aborted in store.abort_offline(&id, "aborted by operator").await? {
            println!("aborted {}", aborted);
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_list(cli: &Cli, state: Option<&str>, under: Option<&str>) -> Result<ExitCode> {
    let store = open_reader(cli).await?;
    let filter = ListFilter {
        state: state.map(parse_state).transpose()?,
        under: match under {
            Some(reference) => Some(store.resolve(reference).await?),
            None => None,
        },
    };

    let sessions = store.list(filter).await;
    if sessions.is_empty() {
        println!("no sessions");
        return Ok(ExitCode::SUCCESS);
    }

    let bold = Style::new().bold();
    println!(
        "{}",
        bold.apply_to(format!(
            "{:<10} {:<22} {:<14} {:>8}  {}",
            "ID", "STATE", "ALIAS", "ELAPSED", "TASK"
        ))
    );
    for session in sessions {
        let elapsed = (Utc::now() - session.created_at).num_seconds().max(0);
        println!(
            "{:<10} {:<22} {:<14} {:>8}  {}",
            session.id.to_string(),
            session.state.to_string(),
            session.alias.as_deref().unwrap_or("-"),
            query::format_elapsed(elapsed),
            task_prefix(&session.task, 48),
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_activity(cli: &Cli, reference: &str, line: &str) -> Result<ExitCode> {
    let store = open_reader(cli).await?;
    let id = store.resolve(reference).await?;
    store.append_activity(&id, line).await?;
    Ok(ExitCode::SUCCESS)
}

/// Translate creation flags into a draft, resolving every session reference
async fn build_draft(
    store: &SessionStore,
    task: &str,
    args: &SpawnArgs,
    parent: Option<SessionId>,
) -> Result<SessionDraft> {
    if args.max_iterations.is_some() && args.checker.is_none() && args.checker_cmd.is_none() {
        bail!("--max-iterations requires --checker or --checker-cmd");
    }

    let mut after = Vec::with_capacity(args.after.len());
    for reference in &args.after {
        after.push(store.resolve(reference).await?);
    }

    let mut conditions = Vec::new();
    for reference in &args.on_pass {
        conditions.push(Condition {
            target: store.resolve(reference).await?,
            expect: Outcome::Pass,
        });
    }
    for reference in &args.on_fail {
        conditions.push(Condition {
            target: store.resolve(reference).await?,
            expect: Outcome::Fail,
        });
    }

    let mut piped = Vec::with_capacity(args.pipe.len());
    for reference in &args.pipe {
        piped.push(store.resolve(reference).await?);
    }

    let rule = if args.any {
        DependencyRule::Any
    } else if let Some(quorum) = args.gate {
        DependencyRule::Gate { quorum }
    } else {
        DependencyRule::All
    };

    let checker = match (&args.checker, &args.checker_cmd) {
        (Some(criteria), _) => Some(CheckerSpec::worker(criteria.as_str())),
        (None, Some(command)) => Some(CheckerSpec::command(command.as_str())),
        (None, None) => None,
    }
    .map(|spec| match args.max_iterations {
        Some(bound) => spec.with_max_iterations(bound),
        None => spec,
    });

    let mut draft = SessionDraft::new(task).with_dependencies(DependencySpec {
        after,
        rule,
        conditions,
    });
    draft.parent_id = parent;
    draft.alias = args.alias.clone();
    draft.piped_inputs = piped;
    draft.checker_spec = checker;
    draft.parent_intent = args.intent.clone();
    draft.scope_paths = args.scope.clone();
    draft.phase = args.phase.as_ref().map(|name| PhaseMetadata {
        name: name.clone(),
        previous: None,
    });
    Ok(draft)
}

fn parse_state(name: &str) -> Result<SessionState> {
    Ok(match name {
        "pending" => SessionState::Pending,
        "running" => SessionState::Running,
        "awaiting_verification" => SessionState::AwaitingVerification,
        "retrying" => SessionState::Retrying,
        "done" => SessionState::Done,
        "aborted" => SessionState::Aborted,
        "skipped" => SessionState::Skipped,
        other => bail!("unknown state {:?}", other),
    })
}

fn task_prefix(task: &str, max: usize) -> String {
    let mut out: String = task.chars().take(max).collect();
    if task.chars().count() > max {
        out.push_str("...");
    }
    out
}
