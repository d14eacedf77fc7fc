pub mod config;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use crate::config::Config;
use crate::services::{
    reminder_service::ReminderService,
    row_store::StoreStatus,
    sheets_service::SheetsRowStore,
    submission_service::SubmissionService,
    telegram_service::BotClient,
};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use reqwest::Client;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: StoreStatus,
    pub bots: Arc<Vec<BotClient>>,
    pub submission_service: SubmissionService,
    pub reminder_service: ReminderService,
}

impl AppState {
    pub fn new(config: Config, store: StoreStatus, http_client: Client) -> Self {
        let bots = config
            .bots
            .iter()
            .cloned()
            .map(|bot| BotClient::new(http_client.clone(), &config.telegram_api_url, bot))
            .collect();
        let submission_service = SubmissionService::new(&config, store.clone());
        let reminder_service = ReminderService::new(store.clone(), config.reminder_delay());

        Self {
            config: Arc::new(config),
            store,
            bots: Arc::new(bots),
            submission_service,
            reminder_service,
        }
    }

    pub fn bot(&self, label: &str) -> Option<&BotClient> {
        self.bots.iter().find(|b| b.label() == label)
    }
}

/// Connects the spreadsheet. Failure is kept as a state so the bots and
/// `/health` keep working while submissions answer 503.
pub async fn connect_store(config: &Config, http_client: Client) -> StoreStatus {
    match SheetsRowStore::connect(config, http_client).await {
        Ok(store) => StoreStatus::Ready(Arc::new(store)),
        Err(e) => {
            tracing::error!("Row store unavailable: {}", e);
            StoreStatus::Unavailable(e.to_string())
        }
    }
}

pub fn app(state: AppState) -> Router {
    let submit_api = Router::new()
        .route("/submit", post(routes::submission::submit_form))
        .layer(axum::middleware::from_fn_with_state(
            middleware::rate_limit::RateLimiter::per_second(state.config.submit_rps),
            middleware::rate_limit::rate_limit_middleware,
        ));

    let cors = middleware::cors::mini_app_cors(state.config.cors_origin.as_deref());

    Router::new()
        .route("/", get(routes::health::root))
        .route("/health", get(routes::health::health))
        .route(
            "/api/submissions/exists/:user_id",
            get(routes::submission::check_duplicate),
        )
        .route(
            "/api/webhook/telegram/:label",
            post(routes::telegram::handle_webhook),
        )
        .merge(submit_api)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(64 * 1024))
}
