// src/main.rs - climatechat entry point

use std::path::Path;
use std::sync::Arc;

use clap::Parser;

use climatechat::chat::attachments::AttachmentManager;
use climatechat::chat::SessionCoordinator;
use climatechat::cli::progress::{format_transcript, terminal_progress};
use climatechat::cli::{ask, chat, Cli, Commands};
use climatechat::infra::config::Config;
use climatechat::infra::logger;
use climatechat::transport::{ChatTransport, HttpTransport};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    // Initialize logging (respects RUST_LOG)
    logger::init_logging(&config.logging.level);

    if let Err(e) = run(cli, config).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    // Load config (falls back to defaults if no config.toml)
    let mut config = match cli.config {
        Some(ref path) => Config::load_from(Path::new(path))?.with_env_overrides(),
        None => Config::load()?,
    };
    if let Some(ref endpoint) = cli.endpoint {
        config.endpoint.base_url = endpoint.trim_end_matches('/').to_string();
    }
    Ok(config)
}

fn coordinator(
    transport: &Arc<dyn ChatTransport>,
    session: Option<&str>,
    quiet: bool,
) -> SessionCoordinator {
    let coordinator =
        SessionCoordinator::new(transport.clone()).with_observer(terminal_progress(quiet));
    match session {
        Some(id) => coordinator.with_session_id(id),
        None => coordinator,
    }
}

async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    let transport: Arc<dyn ChatTransport> = Arc::new(HttpTransport::new(
        config.endpoint.clone(),
        config.identity.clone(),
    )?);
    let mut attachments = AttachmentManager::new(config.attachments.policy());
    let quiet = cli.quiet;

    match cli.command.unwrap_or(Commands::Chat { session: None }) {
        Commands::Chat { session } => {
            let coordinator = coordinator(&transport, session.as_deref(), quiet);
            if let Some(ref id) = session {
                match coordinator.load_session(id).await {
                    Ok(_) => print!("{}", format_transcript(&coordinator.messages())),
                    Err(e) => {
                        tracing::warn!("could not load history for session {id}: {e}");
                        eprintln!("[warn] continuing session {id} without its history");
                    }
                }
            }
            chat::run_chat(&coordinator, &mut attachments, &config, quiet).await
        }
        Commands::Ask {
            session,
            attach,
            question,
        } => {
            let coordinator = coordinator(&transport, session.as_deref(), quiet);
            let question = question.join(" ");
            ask::run_ask(&coordinator, &mut attachments, &attach, &question, quiet).await
        }
        Commands::History { session_id, json } => {
            let coordinator = coordinator(&transport, None, true);
            ask::run_history(&coordinator, &session_id, json).await
        }
    }
}
