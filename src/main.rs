//! sheet-analyst - interactive entry point
//!
//! Reads one query from standard input, runs the agent and prints the result.

use std::io::Write;

use sheet_analyst::{agent::Agent, config::Config};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries only the conversation
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sheet_analyst=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env()?;
    info!(
        "Loaded configuration: model={}, max_iterations={}",
        config.default_model, config.max_iterations
    );

    let agent = Agent::from_config(&config)?;

    print!("What can I help you create? ");
    std::io::stdout().flush()?;

    let mut query = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut query).await?;
    let query = query.trim();
    if query.is_empty() {
        println!("Nothing to do.");
        return Ok(());
    }

    let run = agent.run(query).await;
    println!("\n{}", run.report());

    Ok(())
}
