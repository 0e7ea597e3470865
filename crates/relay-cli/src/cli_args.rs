use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use relay_orchestrator::config::{
    DEFAULT_DEDUP_CAPACITY, DEFAULT_DEDUP_TTL_MS, DEFAULT_FALLBACK_TEXT, DEFAULT_HISTORY_LIMIT,
    DEFAULT_HISTORY_MAX_TURNS, DEFAULT_MEDIA_FETCH_TIMEOUT_MS, DEFAULT_ORDER_BUCKET_MS,
    DEFAULT_PACING_DELAY_MS, DEFAULT_PAUSE_TTL_MS, DEFAULT_QUIET_WINDOW_MS, DEFAULT_WELCOME_TEXT,
};
use relay_orchestrator::OrchestratorConfig;

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_temperature(value: &str) -> Result<f32, String> {
    let parsed = value
        .parse::<f32>()
        .map_err(|error| format!("failed to parse float: {error}"))?;
    if !parsed.is_finite() || !(0.0..=2.0).contains(&parsed) {
        return Err("value must be in range 0.0..=2.0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
/// Outbound delivery backend for `relay run`.
pub enum CliTransportMode {
    DryRun,
    Http,
}

#[derive(Debug, Parser)]
#[command(
    name = "relay",
    about = "Debounced, pause-aware chat reply orchestrator",
    version
)]
/// Public struct `Cli` used across relay components.
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Feed NDJSON inbound events through the orchestrator.
    Run(RunArgs),
    /// Validate and print the effective configuration.
    CheckConfig(CheckConfigArgs),
}

#[derive(Debug, Clone, Args)]
/// Orchestrator tunables, one flag per `OrchestratorConfig` field.
pub struct OrchestratorArgs {
    #[arg(
        long,
        env = "RELAY_QUIET_WINDOW_MS",
        default_value_t = DEFAULT_QUIET_WINDOW_MS,
        value_parser = parse_positive_u64,
        help = "Quiet window after the last fragment before a turn fires."
    )]
    pub quiet_window_ms: u64,

    #[arg(
        long,
        env = "RELAY_PAUSE_TTL_MS",
        default_value_t = DEFAULT_PAUSE_TTL_MS,
        value_parser = parse_positive_u64,
        help = "How long an operator pause lasts without an explicit resume."
    )]
    pub pause_ttl_ms: u64,

    #[arg(
        long,
        env = "RELAY_DEDUP_TTL_MS",
        default_value_t = DEFAULT_DEDUP_TTL_MS,
        value_parser = parse_positive_u64,
        help = "Retention window for seen inbound message ids."
    )]
    pub dedup_ttl_ms: u64,

    #[arg(
        long,
        env = "RELAY_DEDUP_CAPACITY",
        default_value_t = DEFAULT_DEDUP_CAPACITY,
        value_parser = parse_positive_usize,
        help = "Maximum number of remembered inbound message ids."
    )]
    pub dedup_capacity: usize,

    #[arg(
        long,
        env = "RELAY_PACING_DELAY_MS",
        default_value_t = DEFAULT_PACING_DELAY_MS,
        help = "Delay before each outbound message of a turn."
    )]
    pub pacing_delay_ms: u64,

    #[arg(
        long,
        env = "RELAY_WELCOME_MEDIA_URL",
        help = "Optional image sent (captioned with the welcome text) on the first turn of the day."
    )]
    pub welcome_media_url: Option<String>,

    #[arg(long, env = "RELAY_WELCOME_TEXT", default_value = DEFAULT_WELCOME_TEXT)]
    pub welcome_text: String,

    #[arg(
        long,
        env = "RELAY_FALLBACK_TEXT",
        default_value = DEFAULT_FALLBACK_TEXT,
        help = "Reply sent when text generation fails."
    )]
    pub fallback_text: String,

    #[arg(
        long,
        env = "RELAY_HISTORY_LIMIT",
        default_value_t = DEFAULT_HISTORY_LIMIT,
        help = "Recent turns handed to the generator as history."
    )]
    pub history_limit: usize,

    #[arg(
        long,
        env = "RELAY_HISTORY_MAX_TURNS",
        default_value_t = DEFAULT_HISTORY_MAX_TURNS,
        value_parser = parse_positive_usize,
        help = "Turns retained per contact transcript."
    )]
    pub history_max_turns: usize,

    #[arg(
        long,
        env = "RELAY_ORDER_BUCKET_MS",
        default_value_t = DEFAULT_ORDER_BUCKET_MS,
        value_parser = parse_positive_u64,
        help = "Width of the per-contact order dedup bucket."
    )]
    pub order_bucket_ms: u64,

    #[arg(
        long,
        env = "RELAY_PRESENCE_ENABLED",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub presence_enabled: bool,

    #[arg(
        long,
        env = "RELAY_COMMAND_ACK_ENABLED",
        default_value_t = true,
        action = ArgAction::Set,
        help = "Acknowledge bot-pause/bot-play directives in the operator's chat."
    )]
    pub command_ack_enabled: bool,

    #[arg(
        long,
        env = "RELAY_MEDIA_FETCH_TIMEOUT_MS",
        default_value_t = DEFAULT_MEDIA_FETCH_TIMEOUT_MS,
        value_parser = parse_positive_u64
    )]
    pub media_fetch_timeout_ms: u64,
}

impl OrchestratorArgs {
    pub fn to_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            quiet_window_ms: self.quiet_window_ms,
            pause_ttl_ms: self.pause_ttl_ms,
            dedup_ttl_ms: self.dedup_ttl_ms,
            dedup_capacity: self.dedup_capacity,
            pacing_delay_ms: self.pacing_delay_ms,
            welcome_media_url: self
                .welcome_media_url
                .as_deref()
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string),
            welcome_text: self.welcome_text.clone(),
            fallback_text: self.fallback_text.clone(),
            history_limit: self.history_limit,
            history_max_turns: self.history_max_turns,
            order_bucket_ms: self.order_bucket_ms,
            presence_enabled: self.presence_enabled,
            command_ack_enabled: self.command_ack_enabled,
            media_fetch_timeout_ms: self.media_fetch_timeout_ms,
        }
    }
}

#[derive(Debug, Clone, Args)]
/// Text-generation provider settings.
pub struct GeneratorArgs {
    #[arg(long, env = "RELAY_MODEL", default_value = "gpt-4o-mini")]
    pub model: String,

    #[arg(
        long,
        env = "RELAY_API_BASE",
        default_value = "https://api.openai.com/v1",
        help = "Base URL of an OpenAI-compatible chat completions API."
    )]
    pub api_base: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(
        long,
        env = "RELAY_SYSTEM_PROMPT_FILE",
        help = "File whose contents replace the built-in system prompt."
    )]
    pub system_prompt_file: Option<PathBuf>,

    #[arg(
        long,
        env = "RELAY_TEMPERATURE",
        default_value_t = 0.4,
        value_parser = parse_temperature
    )]
    pub temperature: f32,

    #[arg(
        long,
        env = "RELAY_REQUEST_TIMEOUT_MS",
        default_value_t = 60_000,
        value_parser = parse_positive_u64
    )]
    pub request_timeout_ms: u64,

    #[arg(long, env = "RELAY_MAX_RETRIES", default_value_t = 2)]
    pub max_retries: usize,
}

impl GeneratorArgs {
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub orchestrator: OrchestratorArgs,

    #[command(flatten)]
    pub generator: GeneratorArgs,

    #[arg(
        long,
        env = "RELAY_STATE_DIR",
        help = "Directory for transcripts and orders.jsonl. In-memory when omitted."
    )]
    pub state_dir: Option<PathBuf>,

    #[arg(
        long,
        env = "RELAY_INPUT",
        default_value = "-",
        help = "NDJSON inbound events file, or '-' for stdin."
    )]
    pub input: PathBuf,

    #[arg(long, env = "RELAY_TRANSPORT", value_enum, default_value_t = CliTransportMode::DryRun)]
    pub transport: CliTransportMode,

    #[arg(
        long,
        env = "RELAY_OUTBOUND_LOG",
        default_value = ".relay/outbound-events.jsonl",
        help = "Dry-run transport audit log."
    )]
    pub outbound_log: PathBuf,

    #[arg(long, env = "RELAY_GATEWAY_URL", help = "HTTP transport endpoint.")]
    pub gateway_url: Option<String>,

    #[arg(long, env = "RELAY_GATEWAY_TOKEN", hide_env_values = true)]
    pub gateway_token: Option<String>,

    #[arg(
        long,
        env = "RELAY_GATEWAY_TIMEOUT_MS",
        default_value_t = 15_000,
        value_parser = parse_positive_u64
    )]
    pub gateway_timeout_ms: u64,

    #[arg(
        long,
        env = "RELAY_DRAIN_TIMEOUT_MS",
        default_value_t = 120_000,
        help = "How long to wait for pending turns after input ends."
    )]
    pub drain_timeout_ms: u64,
}

#[derive(Debug, Clone, Args)]
pub struct CheckConfigArgs {
    #[command(flatten)]
    pub orchestrator: OrchestratorArgs,

    #[command(flatten)]
    pub generator: GeneratorArgs,
}
