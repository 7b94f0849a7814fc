use std::path::PathBuf;
use std::sync::Arc;

use agent_runtime::{GeminiClient, Runner};
use anyhow::{Context, Result};
use chat_relay::{AppState, RelayConfig};
use clap::Parser;
use personas::{default_registry, PersonaCatalog, PersonaRegistry};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the chat relay
#[derive(Parser, Debug)]
#[clap(version, about = "Browser chat relay for a persona-driven agent team")]
struct Args {
    /// Interface to bind
    #[clap(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Listen port
    #[clap(short, long, env = "PORT", default_value_t = 8000)]
    port: u16,

    /// Directory holding index.html and other browser assets
    #[clap(long, env = "STATIC_DIR", default_value = "static")]
    static_dir: PathBuf,

    /// JSON persona catalog replacing the built-in personas
    #[clap(long, env = "PERSONAS_FILE")]
    personas: Option<PathBuf>,

    /// Application name recorded on runtime sessions
    #[clap(long, env = "APP_NAME", default_value = "ADK Chat App")]
    app_name: String,

    /// Enable debug logging when RUST_LOG is not set
    #[clap(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let registry = load_registry(args.personas.as_deref())?;
    info!(
        root = registry.root().name(),
        personas = registry.len(),
        depth = registry.depth(),
        "persona tree ready"
    );

    let model = GeminiClient::from_env().context("configuring the Gemini client")?;
    let runner = Runner::builder(&args.app_name, registry.root().clone(), Arc::new(model)).build();

    let config = RelayConfig::default().with_static_dir(args.static_dir.clone());
    let state = AppState::new(Arc::new(runner), config);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    chat_relay::serve(listener, state, shutdown_signal()).await?;
    Ok(())
}

fn load_registry(path: Option<&std::path::Path>) -> Result<PersonaRegistry> {
    match path {
        Some(path) => {
            info!(path = %path.display(), "loading persona catalog");
            PersonaCatalog::load(path)
                .and_then(PersonaCatalog::into_registry)
                .with_context(|| format!("loading personas from {}", path.display()))
        }
        None => default_registry().context("building the built-in persona tree"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown requested");
}
