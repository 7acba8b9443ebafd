//! Calculator tool server over stdio.

use mcp_agent::logging;
use mcp_agent::tool_server::{serve, CalculatorServer};
use tokio::io::BufReader;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_stderr_logging();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "calculator server starting");

    serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout(), CalculatorServer).await?;

    tracing::info!("stdin closed, calculator server exiting");
    Ok(())
}
