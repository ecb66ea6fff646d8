//! CLI entry point for LocalChat.
//!
//! Loads configuration, starts the configured tool servers, and answers
//! prompts through the Conductor, either once (`--prompt`) or in a loop
//! reading lines from stdin.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};

use localchat::agent_core::{
    parse_stream, strip_markers, CancellationToken, Conductor, ConductorConfig,
    ConversationTranscript, EventKind, ExecutionEvent, StreamMarker, StreamSegment,
};
use localchat::config;
use localchat::inference::OllamaClient;
use localchat::mcp_client::{StdioConnector, ToolRegistry};

#[derive(Parser, Debug)]
#[command(
    name = "localchat",
    version,
    about = "Chat with a local model that can call tools"
)]
struct Cli {
    /// Path to config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Send a one-shot prompt (non-interactive)
    #[arg(short, long)]
    prompt: Option<String>,

    /// Override the configured model name
    #[arg(short, long)]
    model: Option<String>,

    /// Free-text facts about the user passed to the model with every answer
    #[arg(long, default_value = "")]
    memories: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut app_config =
        config::load_or_default(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(model) = cli.model {
        app_config.model.name = model;
    }

    match localchat::init_tracing() {
        Ok(path) => eprintln!("logging to {}", path.display()),
        Err(e) => eprintln!("warning: file logging disabled: {e}"),
    }

    let connector = StdioConnector {
        init_timeout: Duration::from_secs(app_config.tools.init_timeout_secs),
        call_timeout_ms: app_config.tools.call_timeout_ms,
    };
    let mut registry = ToolRegistry::with_stdio(connector);
    for failure in registry.connect(&app_config.tools.servers).await {
        eprintln!(
            "warning: tool server '{}' unavailable: {}",
            failure.server_id, failure.error
        );
    }
    let tool_count = registry.discover_tools().await;
    tracing::info!(
        servers = registry.server_count(),
        tools = tool_count,
        "tool registry ready"
    );
    let registry = Arc::new(registry);

    let client = OllamaClient::new(&app_config.model).context("failed to build model client")?;
    let conductor = Conductor::new(
        Arc::new(client),
        Arc::clone(&registry),
        ConductorConfig::from_app_config(&app_config),
    );

    let cancel = CancellationToken::new();
    let mut transcript = ConversationTranscript::new();

    let result = match cli.prompt {
        Some(prompt) => answer(&conductor, &mut transcript, &prompt, &cli.memories, &cancel).await,
        None => repl(&conductor, &mut transcript, &cli.memories, &cancel).await,
    };

    registry.shutdown().await;
    result
}

async fn repl(
    conductor: &Conductor,
    transcript: &mut ConversationTranscript,
    memories: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprintln!(
        "model: {} (Ctrl-C stops an answer, Ctrl-D exits, /clear resets)",
        conductor.config().model
    );

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            return Ok(());
        };

        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if prompt == "/clear" {
            transcript.clear();
            continue;
        }
        answer(conductor, transcript, prompt, memories, cancel).await?;
    }
}

/// Run one answer to completion and record it in the transcript.
async fn answer(
    conductor: &Conductor,
    transcript: &mut ConversationTranscript,
    prompt: &str,
    memories: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    cancel.reset();
    transcript.add_user_message(prompt);

    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel(Some("interrupted"));
            }
        })
    };

    let mut raw = String::new();
    let mut stdout = std::io::stdout();
    let mut chunks = std::pin::pin!(conductor.run(transcript, memories, cancel));
    while let Some(chunk) = chunks.next().await {
        write!(stdout, "{}", render(&chunk))?;
        stdout.flush()?;
        raw.push_str(&chunk);
    }
    interrupt.abort();
    writeln!(stdout)?;

    if let Some(reason) = cancel.cancel_reason() {
        eprintln!("[stopped: {reason}]");
    } else if cancel.is_cancelled() {
        eprintln!("[stopped]");
    }

    transcript.add_assistant_message(&strip_markers(&raw));
    Ok(())
}

/// Terminal rendering of one emitted chunk.
fn render(chunk: &str) -> String {
    parse_stream(chunk)
        .into_iter()
        .map(|segment| match segment {
            StreamSegment::Text(text) => text,
            StreamSegment::Marker(StreamMarker::Event(event)) => render_event(&event),
            StreamSegment::Marker(StreamMarker::ToolCallPosition)
            | StreamSegment::Marker(StreamMarker::ToolCallsComplete) => String::new(),
        })
        .collect()
}

fn render_event(event: &ExecutionEvent) -> String {
    let tool = event.tool_name.as_deref().unwrap_or("?");
    let ms = event.duration_ms.unwrap_or(0);
    match event.kind {
        EventKind::ThinkingStart => "\n[thinking...]".to_string(),
        EventKind::ThinkingComplete => format!(" [thought for {ms}ms]\n"),
        EventKind::ToolStart => {
            let args = event
                .arguments
                .as_ref()
                .map(|a| a.to_string())
                .unwrap_or_default();
            format!("\n[tool] {tool} {args}\n")
        }
        EventKind::ToolComplete if event.is_error == Some(true) => {
            format!("[tool] {tool} failed after {ms}ms\n")
        }
        EventKind::ToolComplete => format!("[tool] {tool} finished in {ms}ms\n"),
    }
}
