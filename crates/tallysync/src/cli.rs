//! Clap derive structures for the `tallysync` CLI.
//!
//! Defines the command tree, global flags, and shared value types.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// tallysync -- talk to a TallySync backend from the command line
#[derive(Debug, Parser)]
#[command(
    name = "tallysync",
    version,
    about = "Query a TallySync backend and follow its sync events",
    long_about = "Command-line client for the TallySync backend.\n\n\
        Recovers the API key from the backend automatically when it changes,\n\
        and keeps a live event stream open with fixed-delay reconnects.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Backend URL for this invocation (not persisted)
    #[arg(long, short = 'b', env = "TALLYSYNC_BACKEND", global = true)]
    pub backend: Option<String>,

    /// API key for this invocation (not persisted)
    #[arg(long, env = "TALLYSYNC_API_KEY", global = true, hide_env = true)]
    pub api_key: Option<String>,

    /// Settings file (defaults to the platform config directory)
    #[arg(long, env = "TALLYSYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', global = true)]
    pub insecure: bool,

    /// Request timeout in seconds (overrides settings)
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Event stream reconnect delay, e.g. "5s" or "1500ms"
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    pub reconnect_delay: Option<Duration>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show backend name, version and build (unauthenticated)
    Info,

    /// Check backend readiness (unauthenticated)
    Health,

    /// Fetch the backend's current API key and store it if it changed
    Bootstrap,

    /// List companies configured on the backend
    #[command(alias = "co")]
    Companies,

    /// Authenticated GET of any backend path, printed as JSON
    Get(GetArgs),

    /// Follow live sync events until interrupted
    Watch(WatchArgs),

    /// Manage stored settings
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Command Arguments ────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Backend path, e.g. /api/companies/3/ledgers
    pub path: String,

    /// Query parameter as key=value (repeatable)
    #[arg(long = "query", value_parser = parse_key_val)]
    pub query: Vec<(String, String)>,

    /// Report the X-Total-Count header on stderr
    #[arg(long)]
    pub paginated: bool,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Select this company (persisted) before watching
    #[arg(long, short = 'c')]
    pub company: Option<i64>,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display current resolved settings (API key masked)
    Show,

    /// Print the settings file path
    Path,

    /// Store the backend URL
    SetBackend {
        /// e.g. http://192.168.1.20:8001
        url: String,
    },

    /// Store an API key
    SetKey {
        key: String,
    },

    /// Forget the stored API key (the backend URL is kept)
    ClearKey,

    /// Select the company the event stream is scoped to
    SelectCompany {
        /// Company id; omit to watch all companies
        id: Option<i64>,
    },
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_owned(), value.to_owned()))
}
