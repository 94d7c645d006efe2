use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use switchboard::config::SwitchboardConfig;
use switchboard::provider::{self, OpenAIProvider};
use switchboard::runtime::Runtime;
use switchboard::session::SessionId;
use switchboard::{logging, server};

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "Route conversations between tool-using LLM agents", long_about = None)]
struct Cli {
    /// TOML configuration file; environment variables still apply on top
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the chat model
    #[arg(long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Address to bind, e.g. 127.0.0.1:8000
        #[arg(long)]
        bind: Option<String>,
    },
    /// Send one message, wait for the agents to settle, print the session
    Chat {
        message: String,
        /// Continue an existing session
        #[arg(long)]
        session: Option<String>,
    },
}

fn load_config(cli: &Cli) -> Result<SwitchboardConfig> {
    let base = match &cli.config {
        Some(path) => SwitchboardConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SwitchboardConfig::default(),
    };
    let mut config = base.with_env();
    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    Ok(config.validate()?)
}

async fn build_runtime(config: &SwitchboardConfig) -> Result<Runtime> {
    let mut openai = OpenAIProvider::new(config.model.clone());
    if let Some(t) = config.temperature {
        openai = openai.temperature(t);
    }
    if let Some(mt) = config.max_tokens {
        openai = openai.max_tokens(mt);
    }
    let store = Runtime::store_from_config(config)
        .await
        .context("opening session store")?;
    Ok(Runtime::build(config, provider::boxed(openai), store)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    logging::init(&config.log_filter);

    match cli.command {
        Commands::Serve { bind } => {
            let mut runtime = build_runtime(&config).await?;
            if let Some(mut escalations) = runtime.take_escalations() {
                tokio::spawn(async move {
                    while let Some(e) = escalations.recv().await {
                        warn!(
                            session_id = %e.session_id,
                            reason = e.reason.as_deref().unwrap_or("-"),
                            "escalation waiting for an operator"
                        );
                    }
                });
            }
            let runtime = Arc::new(runtime);
            let addr = bind.unwrap_or_else(|| config.bind_addr.clone());
            let stop_listening = async {
                let _ = tokio::signal::ctrl_c().await;
                info!("interrupt received; no longer accepting requests");
            };
            server::serve(runtime.clone(), &addr, stop_listening).await?;

            let grace = Duration::from_secs(config.shutdown_grace_secs);
            let drained = runtime
                .drain(async move {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => warn!("second interrupt; cancelling turns"),
                        _ = tokio::time::sleep(grace) => warn!(?grace, "grace period over; cancelling turns"),
                    }
                })
                .await;
            info!(drained, "shut down");
        }
        Commands::Chat { message, session } => {
            let mut runtime = build_runtime(&config).await?;
            let escalations = runtime.take_escalations();
            let id = runtime
                .submit(&message, session.map(SessionId::from))
                .await?;
            runtime.wait_idle().await;

            let session = runtime
                .session(&id)
                .await
                .with_context(|| format!("session {id} was not persisted"))?;
            println!("session {} [{}] owned by {}", id, session.status, session.current_agent);
            for m in session.messages() {
                println!("{:>20}: {}", m.source(), m.content());
            }
            if let Some(mut rx) = escalations {
                while let Ok(e) = rx.try_recv() {
                    println!("escalated: {}", e.reason.as_deref().unwrap_or("no reason given"));
                }
            }
        }
    }

    Ok(())
}
