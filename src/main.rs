//! `mcp-agent`: interactive chat with tool-calling over configured tool servers.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};

use mcp_agent::agent_core::{
    AgentError, AgentEvent, ConversationManager, Orchestrator, TurnOutcome,
};
use mcp_agent::config::AppConfig;
use mcp_agent::inference::{ChatModel, InferenceClient};
use mcp_agent::logging;
use mcp_agent::mcp_client::ToolRegistry;

#[derive(Parser, Debug)]
#[command(name = "mcp-agent")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file (default: $MCP_AGENT_CONFIG, then the nearest mcp-agent.yaml)
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Answer one prompt and exit
    #[arg(short = 'p', long = "prompt")]
    prompt: Option<String>,

    /// Also print each orchestration step while a turn runs
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_path = logging::init_file_logging().context("failed to initialize logging")?;
    let (config_path, config) = AppConfig::load(cli.config.as_deref())?;
    tracing::info!(
        config = %config_path.display(),
        servers = config.servers.len(),
        "configuration loaded"
    );

    let registry = Arc::new(ToolRegistry::new(config.registry.settings()));
    for (name, err) in registry.initialize(&config.servers).await {
        eprintln!("warning: tool server '{name}' unavailable: {err}");
    }

    let model = Arc::new(InferenceClient::from_config(config.models.clone())?);
    let agent = Orchestrator::new(model.clone(), registry.clone(), config.agent.settings());

    let result = match cli.prompt {
        Some(prompt) => run_once(&agent, &prompt, cli.verbose).await,
        None => {
            let catalog = registry.catalog().await;
            println!(
                "mcp-agent {} | model: {} | tools: {} | log: {}",
                env!("CARGO_PKG_VERSION"),
                model.name(),
                catalog.len(),
                log_path.display()
            );
            println!("Type /help for commands.");
            repl(&agent, &registry, cli.verbose).await
        }
    };

    registry.close().await;
    result
}

async fn run_once(agent: &Orchestrator, prompt: &str, verbose: bool) -> anyhow::Result<()> {
    match cancellable_turn(agent, &ConversationManager::new(), prompt, verbose).await {
        Ok(outcome) => {
            print_outcome(&outcome);
            if outcome.error_message.is_some() {
                anyhow::bail!("turn failed");
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn repl(agent: &Orchestrator, registry: &ToolRegistry, verbose: bool) -> anyhow::Result<()> {
    let mut conversation = ConversationManager::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("you> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" | "/exit" => break,
            "/help" => {
                println!("/tools    list available tools");
                println!("/servers  show tool server status");
                println!("/clear    forget the conversation");
                println!("/quit     exit");
                continue;
            }
            "/tools" => {
                let catalog = registry.catalog().await;
                if catalog.is_empty() {
                    println!("(no tools available)");
                } else {
                    println!("{}", catalog.describe());
                }
                continue;
            }
            "/servers" => {
                for report in registry.server_statuses().await {
                    let failure = report.failure.as_deref().unwrap_or("");
                    println!(
                        "{:<20} {:<12} {:>3} tools  {failure}",
                        report.name, report.status, report.tool_count
                    );
                }
                continue;
            }
            "/clear" => {
                conversation.clear();
                println!("(conversation cleared)");
                continue;
            }
            _ => {}
        }

        match cancellable_turn(agent, &conversation, input, verbose).await {
            Ok(outcome) => {
                print_outcome(&outcome);
                if outcome.final_response.is_some() {
                    conversation.record(&outcome);
                }
            }
            Err(AgentError::Cancelled) => println!("(cancelled)"),
            Err(e) => eprintln!("error: {e}"),
        }
    }
    Ok(())
}

/// One turn that Ctrl-C abandons, printing progress as it goes.
async fn cancellable_turn(
    agent: &Orchestrator,
    conversation: &ConversationManager,
    input: &str,
    verbose: bool,
) -> Result<TurnOutcome, AgentError> {
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel_tx.send(());
        }
    });
    let (events_tx, events_rx) = mpsc::channel(64);
    let printer = tokio::spawn(print_progress(events_rx, verbose));

    let result = agent
        .run_turn_with_events_cancellable(conversation.history(), input, events_tx, cancel_rx)
        .await;
    watcher.abort();
    // the sender is gone with the turn, so the printer drains and exits
    let _ = printer.await;
    result
}

async fn print_progress(mut events: mpsc::Receiver<AgentEvent>, verbose: bool) {
    while let Some(event) = events.recv().await {
        match event {
            AgentEvent::Step { message, .. } if verbose => println!("  .. {message}"),
            AgentEvent::ToolStarted {
                server,
                tool,
                arguments,
                iteration,
            } => println!("  [{iteration}] {server}.{tool} {arguments}"),
            AgentEvent::ToolFinished { entry } => {
                let status = if entry.success { "ok" } else { "failed" };
                println!(
                    "  [{}] {} {status} ({} ms)",
                    entry.iteration,
                    entry.label(),
                    entry.execution_time_ms
                );
            }
            _ => {}
        }
    }
}

fn print_outcome(outcome: &TurnOutcome) {
    match (&outcome.final_response, &outcome.error_message) {
        (_, Some(error)) => eprintln!("error: {error}"),
        (Some(answer), None) => println!("{answer}"),
        (None, None) => {}
    }
}
