use oms_miniapp_backend::{app, config::Config, connect_store, AppState};
use reqwest::Client;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = Config::from_env()?;

    let http_client = Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let store = connect_store(&config, http_client.clone()).await;
    let state = AppState::new(config, store, http_client);

    register_webhooks(&state).await;

    let addr: SocketAddr = state.config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn register_webhooks(state: &AppState) {
    let Some(public_url) = state.config.public_url.as_deref() else {
        info!("PUBLIC_URL not set, skipping Telegram webhook registration");
        return;
    };

    for bot in state.bots.iter() {
        let target = format!("{}/api/webhook/telegram/{}", public_url, bot.label());
        info!(bot = %bot.label(), "Checking Telegram webhook status...");
        if let Err(e) = bot
            .ensure_webhook(&target, state.config.webhook_secret.as_deref())
            .await
        {
            tracing::warn!(bot = %bot.label(), "Could not register Telegram webhook: {}", e);
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
