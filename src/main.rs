mod error;
mod llm;
mod logging;
mod mail_reader;
mod mail_sender;
mod pipeline;
mod reply_generator;
mod scheduler;
mod settings;
mod transform;
mod web;


use std::path::PathBuf;
use std::sync::Arc;

use backtrace::Backtrace;
use clap::{Parser, Subcommand};
use log::{error, info};

use crate::pipeline::RequestStatus;

#[derive(Debug, Parser)]
#[command(name = "inbox-responder", version, about = "Replies to the newest unread email")]
struct Cli {
    /// Path to the YAML settings file.
    #[arg(long, env = "INBOX_RESPONDER_CONFIG", default_value = "src/resources/settings.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP trigger (default).
    Serve,
    /// Process at most one unread message and exit.
    ProcessOnce,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match settings::load_settings(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            // No configured level yet, report at the default one.
            logging::setup_logging("info")?;
            error!("Cannot load settings from {}: {}", cli.config.display(), e);
            error!("Backtrace:\n{:?}", Backtrace::new());
            return Err(e.into());
        }
    };
    logging::setup_logging(&config.log_level)?;

    let credentials = settings::Credentials::from_env()?;
    let pipeline = Arc::new(pipeline::build_pipeline(&config, &credentials)?);

    match cli.command.unwrap_or(Command::Serve) {
        Command::ProcessOnce => {
            let result = pipeline.process_next().await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.status == RequestStatus::Failure {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Serve => {
            let _scheduler = match &config.scheduler {
                Some(schedule) => Some(
                    scheduler::entrypoint(schedule, Arc::clone(&pipeline))
                        .await
                        .map_err(|e| anyhow::anyhow!("cannot start scheduler: {}", e))?,
                ),
                None => {
                    info!("No scheduler configured, waiting for HTTP triggers");
                    None
                }
            };

            let router = web::create_router(pipeline);
            if let Err(e) = web::start_server(router, &config.server).await {
                error!("Server error: {}", e);
                return Err(e);
            }
            Ok(())
        }
    }
}
