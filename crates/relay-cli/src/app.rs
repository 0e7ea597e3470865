use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use relay_ai::{LlmClient, OpenAiClient, OpenAiConfig};
use relay_orchestrator::{
    ChatTransport, InboundDisposition, JsonlConversationStore, LlmReplyGenerator,
    LlmReplySettings, Orchestrator, OrchestratorDeps, OrderStore, ReplyGenerator,
    StaticReplyGenerator, TranscriptStore,
};
use serde_json::json;

use crate::cli_args::{CheckConfigArgs, Cli, CliCommand, CliTransportMode, GeneratorArgs, RunArgs};
use crate::inbound::InboundEventReader;
use crate::transports::{DryRunTransport, HttpGatewayTransport};

pub async fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        CliCommand::Run(args) => run(args).await,
        CliCommand::CheckConfig(args) => check_config(&args),
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let config = args.orchestrator.to_config();
    config.validate().context("invalid orchestrator configuration")?;

    let transport = build_transport(&args)?;
    let generator = build_generator(&args.generator)?;
    let mut deps = OrchestratorDeps::in_memory(transport, generator);
    if let Some(state_dir) = args.state_dir.as_ref() {
        let store = Arc::new(JsonlConversationStore::open(state_dir.clone())?);
        tracing::info!(state_dir = %state_dir.display(), "using persistent conversation store");
        deps.transcripts = Arc::clone(&store) as Arc<dyn TranscriptStore>;
        deps.orders = store as Arc<dyn OrderStore>;
    }
    let orchestrator = Orchestrator::new(config, deps)?;

    let mut reader = InboundEventReader::open(&args.input).await?;
    let mut stats = RunStats::default();
    loop {
        let event = tokio::select! {
            event = reader.next_event() => event?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received; draining pending turns");
                break;
            }
        };
        let Some(event) = event else {
            break;
        };
        let disposition = orchestrator.handle_inbound(event).await;
        stats.observe(&disposition);
        tracing::debug!(?disposition, "inbound event handled");
    }

    let drained = orchestrator
        .drain(Duration::from_millis(args.drain_timeout_ms))
        .await;
    if !drained {
        tracing::warn!(
            timeout_ms = args.drain_timeout_ms,
            "turns still pending when the drain timeout elapsed"
        );
    }
    tracing::info!(
        enqueued = stats.enqueued,
        duplicates = stats.duplicates,
        operator = stats.operator,
        ignored = stats.ignored,
        malformed = reader.skipped(),
        "inbound stream finished"
    );
    Ok(())
}

fn build_transport(args: &RunArgs) -> Result<Arc<dyn ChatTransport>> {
    match args.transport {
        CliTransportMode::DryRun => Ok(Arc::new(DryRunTransport::open(
            args.outbound_log.clone(),
        )?)),
        CliTransportMode::Http => {
            let Some(url) = args.gateway_url.as_deref() else {
                bail!("--gateway-url is required when --transport=http");
            };
            Ok(Arc::new(HttpGatewayTransport::new(
                url,
                args.gateway_token.clone(),
                Duration::from_millis(args.gateway_timeout_ms),
            )?))
        }
    }
}

fn build_generator(args: &GeneratorArgs) -> Result<Arc<dyn ReplyGenerator>> {
    let Some(api_key) = args.api_key() else {
        tracing::warn!("no API key configured; every turn answers with a fixed notice");
        return Ok(Arc::new(StaticReplyGenerator::missing_api_key()));
    };
    let client = OpenAiClient::new(OpenAiConfig {
        api_base: args.api_base.clone(),
        api_key: api_key.to_string(),
        request_timeout_ms: args.request_timeout_ms,
        max_retries: args.max_retries,
        ..OpenAiConfig::default()
    })?;
    let mut settings = LlmReplySettings {
        model: args.model.clone(),
        temperature: Some(args.temperature),
        ..LlmReplySettings::default()
    };
    if let Some(path) = args.system_prompt_file.as_ref() {
        let prompt = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read system prompt {}", path.display()))?;
        if prompt.trim().is_empty() {
            bail!("system prompt file {} is empty", path.display());
        }
        settings.system_prompt = prompt.trim().to_string();
    }
    Ok(Arc::new(LlmReplyGenerator::new(
        Arc::new(client) as Arc<dyn LlmClient>,
        settings,
    )))
}

fn check_config(args: &CheckConfigArgs) -> Result<()> {
    let config = args.orchestrator.to_config();
    config.validate().context("invalid orchestrator configuration")?;
    let summary = json!({
        "orchestrator": config,
        "generator": {
            "model": args.generator.model,
            "api_base": args.generator.api_base,
            "api_key_present": args.generator.api_key().is_some(),
            "system_prompt_file": args.generator.system_prompt_file,
        },
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[derive(Debug, Default)]
struct RunStats {
    enqueued: usize,
    duplicates: usize,
    operator: usize,
    ignored: usize,
}

impl RunStats {
    fn observe(&mut self, disposition: &InboundDisposition) {
        match disposition {
            InboundDisposition::Enqueued(_) => self.enqueued += 1,
            InboundDisposition::Duplicate => self.duplicates += 1,
            InboundDisposition::Operator(_) => self.operator += 1,
            InboundDisposition::IgnoredEmpty
            | InboundDisposition::IgnoredAddress
            | InboundDisposition::IgnoredOperatorMessage => self.ignored += 1,
        }
    }
}
