use axum::http::{header, HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};

/// CORS for the Mini App front-end. Without a configured origin any origin
/// may post, which is what a Telegram WebView hosted elsewhere needs.
pub fn mini_app_cors(allowed_origin: Option<&str>) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    match allowed_origin.and_then(|o| HeaderValue::from_str(o).ok()) {
        Some(origin) => layer.allow_origin(origin),
        None => layer.allow_origin(Any),
    }
}
