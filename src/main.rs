//! Rulecheck - LSP Server
//!
//! Keeps open documents in sync with the editor, checks them against the
//! configured rules and offers quick fixes for what it finds.

use anyhow::Result;
use rulecheck_lsp_server::{config, RuleSet, RulecheckServer};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use tower_lsp::{LspService, Server};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Get log file path
    let log_path = get_log_file_path();

    // Initialize file logging
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .expect("Failed to open log file");

    // stdout carries the protocol, so logs go to stderr and the file
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            fmt::layer()
                .with_writer(move || log_file.try_clone().expect("Failed to clone log file"))
                .with_ansi(false),
        )
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    tracing::info!("Starting Rulecheck LSP Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Log file: {}", log_path.display());

    run_stdio_mode().await?;

    Ok(())
}

/// Get the log file path in user's home directory or temp directory
fn get_log_file_path() -> PathBuf {
    let log_dir = if let Some(home) = dirs::home_dir() {
        home.join(".rulecheck")
    } else {
        std::env::temp_dir().join("rulecheck")
    };

    // Create directory if it doesn't exist
    fs::create_dir_all(&log_dir).ok();

    // Use date-based log file name
    let date = chrono::Local::now().format("%Y-%m-%d");
    log_dir.join(format!("lsp-server-{}.log", date))
}

/// Load rules, falling back to the built-in set if the configured ones do not compile
fn load_rules(config: &config::Config) -> RuleSet {
    match config.build_rules() {
        Ok(rules) => rules,
        Err(e) => {
            tracing::error!("Failed to build configured rules: {}. Using defaults.", e);
            config::Config::default()
                .build_rules()
                .unwrap_or_else(|_| RuleSet::new())
        }
    }
}

/// Run server in stdio mode (communicates via stdin/stdout)
async fn run_stdio_mode() -> Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let config = config::load_or_default();
    let rules = load_rules(&config);

    let (service, socket) =
        LspService::new(move |client| RulecheckServer::new(client, &config, rules));

    tracing::info!("LSP Server running in stdio mode");
    Server::new(stdin, stdout, socket).serve(service).await;

    Ok(())
}
