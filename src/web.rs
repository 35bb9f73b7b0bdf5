//! HTTP surface for the Telegram login flow. The daemon has no other
//! endpoints; sources and settings are managed directly in the database by
//! the operator tooling.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use crate::telegram::{AuthState, TelegramManager};

pub fn app(manager: Arc<TelegramManager>) -> Router {
    Router::new()
        .route("/auth/telegram/status", get(auth_status))
        .route("/auth/telegram/qr", post(auth_qr))
        .route("/auth/telegram/password", post(auth_password))
        .route("/auth/telegram/logout", post(auth_logout))
        .with_state(manager)
}

#[derive(Debug, Deserialize)]
struct QrRequest {
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Deserialize)]
struct PasswordRequest {
    password: String,
}

async fn auth_status(State(manager): State<Arc<TelegramManager>>) -> Json<AuthState> {
    Json(manager.status().await)
}

async fn auth_qr(
    State(manager): State<Arc<TelegramManager>>,
    Json(request): Json<QrRequest>,
) -> Json<AuthState> {
    Json(manager.start_qr(request.force).await)
}

async fn auth_password(
    State(manager): State<Arc<TelegramManager>>,
    Json(request): Json<PasswordRequest>,
) -> Json<AuthState> {
    Json(manager.submit_password(&request.password).await)
}

async fn auth_logout(State(manager): State<Arc<TelegramManager>>) -> Json<AuthState> {
    Json(manager.logout().await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qr_request_force_defaults_to_false() {
        let request: QrRequest = serde_json::from_str("{}").unwrap();
        assert!(!request.force);
        let request: QrRequest = serde_json::from_str(r#"{"force": true}"#).unwrap();
        assert!(request.force);
    }
}
