//! Mock-test platform - question extraction and test administration server.

mod bank;
mod cli;
mod config;
mod credentials;
mod document;
mod error;
mod llm_extract;
mod openrouter;
mod parser;
mod pipeline;
mod platform;
mod schema;
mod server;
mod sheet_import;
mod store;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "mocktest_platform=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    cli::run(cli::Cli::parse()).await
}
