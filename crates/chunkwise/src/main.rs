use std::fs::File;
use std::io::Read;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use chunkwise_backend_postgres::PgSessionStore;
use chunkwise_core::UploadId;
use chunkwise_http::Chunkwise;

mod config;
use crate::config::{Config, SessionDefinition, UploadBackend};

#[derive(Parser)]
struct Cli {
    #[arg(short, long)]
    config_file: Option<PathBuf>,
}

async fn initialize_static_sessions(
    sessions: &PgSessionStore,
    definitions: Vec<SessionDefinition>,
) -> Result<()> {
    for definition in definitions {
        let upload_id = UploadId::try_from(definition.upload_id.as_str())?;
        if !sessions
            .register_session(&upload_id, definition.total_chunks)
            .await?
        {
            tracing::info!("static session '{}' already exists", upload_id);
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {e}");
        return;
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(true)
        .compact()
        .init();

    // load configuration
    let mut dev_config = File::open(cli.config_file.unwrap_or("./dev-config.yml".into()))?;
    let mut s = String::new();
    dev_config.read_to_string(&mut s)?;
    let config: Config = serde_yaml::from_str(&s)?;

    // initialize backends
    let coordinator = match config.backend {
        UploadBackend::PgS3Sqs(cfg) => {
            let backend = cfg.get_backend(config.retry).await?;
            if let Some(sessions) = config.static_sessions {
                initialize_static_sessions(&backend.sessions, sessions).await?;
            }
            backend.into_coordinator()
        }
    };

    let router = Chunkwise::new(coordinator, config.http).router()?;

    // run HTTP server
    let addr: SocketAddr = config.listen_address.parse()?;
    tracing::info!("listening on {addr}");
    axum::Server::bind(&addr)
        .serve(router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
