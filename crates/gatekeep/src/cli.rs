//! Clap derive structures for the `gatekeep` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// gatekeep -- attendance-gated door orchestrator
#[derive(Debug, Parser)]
#[command(
    name = "gatekeep",
    version,
    about = "Admit scheduled attendees through an MQTT-driven door",
    long_about = "Runs the attendance gate: listens for schedule and camera announcements\n\
        on the MQTT bus, identifies faces through the identification service,\n\
        opens the door once per attendee per course and keeps the attendance table.",
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
    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "GATEKEEP_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Broker host (overrides config)
    #[arg(long, short = 'b', env = "GATEKEEP_BROKER", global = true)]
    pub broker: Option<String>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
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

#[derive(Debug, Clone, ValueEnum)]
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
    /// Run the orchestrator until interrupted
    Run(RunArgs),

    /// Simulate the door/display peripheral on the bus
    #[command(alias = "periph")]
    Peripheral(PeripheralArgs),

    /// Publish schedule updates
    #[command(alias = "sched")]
    Schedule(ScheduleArgs),

    /// Send a door command
    Door(DoorArgs),

    /// Switch the auxiliary light
    Light(LightArgs),

    /// Print the persisted attendance table
    Table(TableArgs),

    /// Manage configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── run ──────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Extra identities added to the catalog
    #[arg(long = "identity", value_name = "NAME")]
    pub identities: Vec<String>,

    /// Attendance table path (overrides config)
    #[arg(long)]
    pub table: Option<PathBuf>,
}

// ── peripheral ───────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct PeripheralArgs {
    /// Fire the simulated proximity trigger every N seconds
    #[arg(long, value_name = "SECS")]
    pub proximity_every: Option<u64>,
}

// ── schedule ─────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ScheduleArgs {
    #[command(subcommand)]
    pub command: ScheduleCommand,
}

#[derive(Debug, Subcommand)]
pub enum ScheduleCommand {
    /// Set the course window, or one identity's window with --identity
    Set {
        /// Course name (ignored with --identity)
        #[arg(long, required_unless_present = "identity")]
        course: Option<String>,

        /// Identity to give a personal window
        #[arg(long, conflicts_with = "course")]
        identity: Option<String>,

        /// Window start, "YYYY-MM-DD HH:MM:SS"
        #[arg(long)]
        start: String,

        /// Window end, "YYYY-MM-DD HH:MM:SS"
        #[arg(long)]
        end: String,
    },

    /// Clear the course window, or identity windows with --identities
    Clear {
        /// Clear identity windows instead of the course window
        #[arg(long)]
        identities: bool,

        /// Only this identity's window (with --identities)
        #[arg(long, requires = "identities")]
        name: Option<String>,
    },
}

// ── door ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct DoorArgs {
    #[command(subcommand)]
    pub command: DoorAction,
}

#[derive(Debug, Clone, Copy, Subcommand)]
pub enum DoorAction {
    /// Publish OPEN
    Open,
    /// Publish CLOSE
    Close,
}

// ── light ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct LightArgs {
    #[command(subcommand)]
    pub command: LightAction,
}

#[derive(Debug, Clone, Copy, Subcommand)]
pub enum LightAction {
    /// Publish ON
    On,
    /// Publish OFF
    Off,
}

// ── table ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct TableArgs {
    /// CSV path (overrides config)
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Only rows with this course
    #[arg(long)]
    pub course: Option<String>,
}

// ── config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Show the effective configuration (token masked)
    Show,
    /// Print the config file path
    Path,
}

// ── completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
