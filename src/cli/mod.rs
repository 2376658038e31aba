//! CLI argument parsing using clap 4.x derive macros

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Session orchestration for delegated AI-agent work
///
/// Sessions are bounded units of work run by external worker processes,
/// related by hierarchy and dependency rules and supervised through a
/// durable on-disk store.
#[derive(Parser, Debug)]
#[command(name = "overseer")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Session store directory (defaults to $OVERSEER_DIR, then the
    /// configured directory, then ./.overseer)
    #[arg(long, global = true, value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Spawn a root session and supervise the store until everything settles
    Run {
        /// The task handed to the worker
        task: String,

        #[command(flatten)]
        spawn: SpawnArgs,
    },

    /// Supervise the store until interrupted, adopting sessions as they appear
    Serve,

    /// Create a pending session and print its id; a running supervisor picks it up
    ///
    /// When invoked from inside a worker (OVERSEER_SESSION_ID set), the new
    /// session is created as that session's child.
    Spawn {
        /// The task handed to the worker
        task: String,

        #[command(flatten)]
        spawn: SpawnArgs,
    },

    /// Print one JSON status line for a session
    Poll {
        /// Session id or alias
        id: String,
    },

    /// Block until the named sessions are terminal, then print their results
    Wait {
        /// Session ids or aliases
        #[arg(num_args = 1.., required = true)]
        ids: Vec<String>,

        /// Give up after this many seconds and report a snapshot
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },

    /// Abort a session and its unfinished descendants
    Abort {
        /// Session id or alias
        id: String,
    },

    /// List sessions
    List {
        /// Only sessions in this state (pending, running,
        /// awaiting_verification, retrying, done, aborted, skipped)
        #[arg(long, value_name = "STATE")]
        state: Option<String>,

        /// Only descendants of this session
        #[arg(long, value_name = "ID")]
        under: Option<String>,
    },

    /// Append a line to a session's activity log (workers call this)
    Activity {
        /// Session id or alias
        id: String,

        /// Activity line, present tense ("editing src/main.rs")
        line: String,
    },
}

/// Creation flags shared by `run` and `spawn`
#[derive(Args, Debug, Clone, Default)]
pub struct SpawnArgs {
    /// Run after these sessions (ids or aliases); repeatable
    #[arg(long, value_name = "ID")]
    pub after: Vec<String>,

    /// The first --after session to finish satisfies the dependency
    #[arg(long, conflicts_with = "gate")]
    pub any: bool,

    /// N of the --after sessions must be done
    #[arg(long, value_name = "N")]
    pub gate: Option<usize>,

    /// Run only if this session's result classifies as a pass; repeatable
    #[arg(long = "on-pass", value_name = "ID")]
    pub on_pass: Vec<String>,

    /// Run only if this session's result classifies as a failure; repeatable
    #[arg(long = "on-fail", value_name = "ID")]
    pub on_fail: Vec<String>,

    /// Inject this session's result into the contract; implies --after
    #[arg(long = "pipe", value_name = "ID")]
    pub pipe: Vec<String>,

    /// Verify the result with a checker worker against these criteria
    #[arg(long, value_name = "CRITERIA", conflicts_with = "checker_cmd")]
    pub checker: Option<String>,

    /// Verify the result with this command instead (exit 0 accepts)
    #[arg(long = "checker-cmd", value_name = "CMD")]
    pub checker_cmd: Option<String>,

    /// Doer/checker cycles before the result is flagged unconverged
    #[arg(long = "max-iterations", value_name = "N")]
    pub max_iterations: Option<u32>,

    /// Human-friendly name, usable wherever an id is accepted
    #[arg(long)]
    pub alias: Option<String>,

    /// Phase name shown in the contract
    #[arg(long, value_name = "NAME")]
    pub phase: Option<String>,

    /// Parent intent line shown in the contract
    #[arg(long, value_name = "TEXT")]
    pub intent: Option<String>,

    /// Restrict the worker to these paths; repeatable
    #[arg(long = "scope", value_name = "PATH")]
    pub scope: Vec<String>,
}
