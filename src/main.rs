use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use newsdesk::config::Config;
use newsdesk::db::Database;
use newsdesk::logging::configure_logging;
use newsdesk::orchestrator::Orchestrator;
use newsdesk::rss::USER_AGENT;
use newsdesk::telegram::{TelegramManager, TgConfig};
use newsdesk::vk::VkClient;
use newsdesk::web;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    configure_logging();

    let config = Config::from_env();
    let db = Database::new(&config.database_path)
        .await
        .context("failed to open the database")?;

    let http = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(30))
        .build()
        .context("failed to build the HTTP client")?;

    let vk = match &config.vk_token {
        Some(token) => Some(
            VkClient::new(http.clone(), token, &config.vk_api_version)
                .context("failed to build the VK client")?,
        ),
        None => {
            warn!("VK ingestion disabled: VK_TOKEN is not set");
            None
        }
    };

    let tg_config = match (config.tg_api_id, config.tg_api_hash.clone()) {
        (Some(api_id), Some(api_hash)) => Some(TgConfig {
            api_id,
            api_hash,
            session_file: config.tg_session_file.clone(),
        }),
        _ => {
            warn!("Telegram ingestion disabled until TG_API_ID / TG_API_HASH are set");
            None
        }
    };
    let telegram = Arc::new(TelegramManager::new(tg_config));

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!("Auth API listening on {}", config.listen_addr);
    let app = web::app(Arc::clone(&telegram));
    let server = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!("Auth API server stopped: {}", err);
        }
    });

    // The word/category analyzer is an external collaborator; none is
    // wired into the standalone daemon.
    let orchestrator = Orchestrator::new(
        db,
        http,
        vk,
        Arc::clone(&telegram),
        config.media_dir.clone(),
        None,
    );
    tokio::select! {
        _ = orchestrator.run() => {}
        _ = signal::ctrl_c() => {
            info!("Shutting down");
        }
    }
    server.abort();
    Ok(())
}
