//! HTTP boundary.
//!
//! | Route | Purpose |
//! |---|---|
//! | `POST /api/auth/telegram/init` | start a login, get the session id and deep link |
//! | `GET /api/auth/telegram/verify?sessionId=` | poll the session status |
//! | `POST /api/auth/telegram/verify` | submit the code |
//! | `POST /api/telegram/webhook` | bot webhook, always acknowledged once authenticated |
//! | `GET /api/auth/me` | identity of the logged-in web session |
//! | `POST /api/auth/logout` | end the web session |
//!
//! A successful verify stores the identity in the caller's
//! [`tower_sessions::Session`], so the router must be wrapped in a
//! [`SessionManagerLayer`](tower_sessions::SessionManagerLayer).
//!
//! With [`AppState::with_webhook_secret`], webhook calls without the matching
//! `X-Telegram-Bot-Api-Secret-Token` header get a 401 and are not processed.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use channel_login::{http, AppState, DisabledSender, MemoryStore, Messages, SessionLifecycle};
//! use time::Duration;
//! use tower_sessions::SessionManagerLayer;
//!
//! let lifecycle = SessionLifecycle::new(MemoryStore::new());
//! let messages = Messages::new("StroyMarket", Duration::minutes(5));
//! let bot_name = Some("market_bot".to_string());
//! let state = AppState::new(lifecycle, Arc::new(DisabledSender), messages, bot_name);
//!
//! let app = http::router(state)
//!     .layer(SessionManagerLayer::new(tower_sessions::MemoryStore::default()));
//! ```

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_sessions::Session;
use tracing::{info, warn};

use crate::channel::telegram::{self, Update};
use crate::channel::{ChannelAdapter, MessageSender, Messages};
use crate::config::Config;
use crate::entity::login_session::{ExternalIdentity, SessionId};
use crate::error::{LoginError, Result};
use crate::lifecycle::SessionLifecycle;
use crate::memory_store::MemoryStore;
use crate::store::LoginSessionStore;

/// Web session key holding the logged-in [`ExternalIdentity`].
pub const USER_KEY: &str = "user";

/// Shared state for the login routes.
pub struct AppState<S> {
    lifecycle: SessionLifecycle<S>,
    adapter: Arc<ChannelAdapter<S>>,
    bot_name: Option<Arc<str>>,
    webhook_secret: Option<Arc<SecretString>>,
}

impl<S: Clone> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            lifecycle: self.lifecycle.clone(),
            adapter: self.adapter.clone(),
            bot_name: self.bot_name.clone(),
            webhook_secret: self.webhook_secret.clone(),
        }
    }
}

impl<S: LoginSessionStore + Clone> AppState<S> {
    pub fn new(
        lifecycle: SessionLifecycle<S>,
        sender: Arc<dyn MessageSender>,
        messages: Messages,
        bot_name: Option<String>,
    ) -> Self {
        let adapter = ChannelAdapter::new(lifecycle.clone(), sender, messages);
        Self {
            lifecycle,
            adapter: Arc::new(adapter),
            bot_name: bot_name.map(Arc::from),
            webhook_secret: None,
        }
    }

    /// Requires webhook calls to present `secret` in the secret token header.
    pub fn with_webhook_secret(mut self, secret: SecretString) -> Self {
        self.webhook_secret = Some(Arc::new(secret));
        self
    }

    pub fn lifecycle(&self) -> &SessionLifecycle<S> {
        &self.lifecycle
    }

    fn webhook_authorized(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = &self.webhook_secret else {
            return true;
        };
        let presented = headers.get(telegram::SECRET_TOKEN_HEADER);
        telegram::secret_token_matches(expected, presented.map(|v| v.as_bytes()))
    }
}

impl AppState<MemoryStore> {
    /// State backed by an in-process store, wired from `config`.
    pub fn from_config(config: &Config, sender: Arc<dyn MessageSender>) -> Self {
        let store = MemoryStore::new().with_ttl(config.session_ttl);
        let lifecycle = SessionLifecycle::new(store).with_max_attempts(config.max_verify_attempts);
        let messages = Messages::new(config.site_name.clone(), config.session_ttl);

        let mut state = Self::new(lifecycle, sender, messages, config.bot_name.clone());
        if let Some(secret) = &config.webhook_secret {
            let secret = SecretString::from(secret.expose_secret().to_owned());
            state = state.with_webhook_secret(secret);
        }
        state
    }
}

/// Builds the login routes.
pub fn router<S>(state: AppState<S>) -> Router
where
    S: LoginSessionStore + Clone,
{
    Router::new()
        .route("/api/auth/telegram/init", post(init::<S>))
        .route(
            "/api/auth/telegram/verify",
            get(status::<S>).post(verify::<S>),
        )
        .route("/api/telegram/webhook", post(webhook::<S>))
        .route("/api/auth/me", get(me))
        .route("/api/auth/logout", post(logout))
        .with_state(state)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitResponse {
    success: bool,
    session_id: SessionId,
    deep_link: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusQuery {
    session_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyRequest {
    session_id: Option<String>,
    code: Option<String>,
}

#[derive(Serialize)]
struct VerifyResponse {
    success: bool,
    user: ExternalIdentity,
}

async fn init<S>(State(state): State<AppState<S>>) -> Result<Json<InitResponse>>
where
    S: LoginSessionStore + Clone,
{
    // Checked first so no session is created that nobody could activate.
    let bot_name = state
        .bot_name
        .clone()
        .ok_or(LoginError::ConfigurationMissing("TELEGRAM_BOT_NAME"))?;

    let session_id = state.lifecycle.create().await?;
    let deep_link = telegram::deep_link(&bot_name, &session_id);

    Ok(Json(InitResponse {
        success: true,
        session_id,
        deep_link,
    }))
}

async fn status<S>(State(state): State<AppState<S>>, Query(query): Query<StatusQuery>) -> Response
where
    S: LoginSessionStore + Clone,
{
    let Some(session_id) = non_empty(query.session_id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "sessionId is required" })),
        )
            .into_response();
    };

    let session_id = SessionId::from(session_id);
    match state.lifecycle.status_of(&session_id).await {
        Ok(status) => Json(json!({ "status": status })).into_response(),
        Err(LoginError::NotFound) => Json(json!({ "status": "expired" })).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn verify<S>(State(state): State<AppState<S>>, session: Session, body: Bytes) -> Response
where
    S: LoginSessionStore + Clone,
{
    let request = match serde_json::from_slice::<VerifyRequest>(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "rejecting malformed verify payload");
            return bad_request("invalid request body");
        }
    };

    let (Some(session_id), Some(code)) = (non_empty(request.session_id), non_empty(request.code))
    else {
        return bad_request("sessionId and code are required");
    };

    let session_id = SessionId::from(session_id);
    let user = match state.lifecycle.verify(&session_id, &code).await {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };

    if let Err(e) = log_in(&session, &user).await {
        return e.into_response();
    }

    info!(external_id = user.external_id, "web session logged in");
    Json(VerifyResponse {
        success: true,
        user,
    })
    .into_response()
}

async fn webhook<S>(State(state): State<AppState<S>>, headers: HeaderMap, body: Bytes) -> Response
where
    S: LoginSessionStore + Clone,
{
    if !state.webhook_authorized(&headers) {
        warn!("rejecting webhook call without a valid secret token");
        return (StatusCode::UNAUTHORIZED, Json(json!({ "ok": false })))
            .into_response();
    }

    match serde_json::from_slice::<Update>(&body) {
        Ok(update) => {
            state.adapter.handle_update(update).await;
        }
        Err(e) => warn!(error = %e, "ignoring malformed webhook payload"),
    }

    Json(json!({ "ok": true })).into_response()
}

async fn me(session: Session) -> Response {
    match session.get::<ExternalIdentity>(USER_KEY).await {
        Ok(Some(user)) => Json(json!({ "user": user })).into_response(),
        Ok(None) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "not logged in" })),
        )
            .into_response(),
        Err(e) => LoginError::Backend(e.to_string()).into_response(),
    }
}

async fn logout(session: Session) -> Response {
    match session.flush().await {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(e) => LoginError::Backend(e.to_string()).into_response(),
    }
}

async fn log_in(session: &Session, user: &ExternalIdentity) -> Result<()> {
    // New id on privilege change, so a pre-login cookie cannot be reused.
    session
        .cycle_id()
        .await
        .map_err(|e| LoginError::Backend(e.to_string()))?;
    session
        .insert(USER_KEY, user)
        .await
        .map_err(|e| LoginError::Backend(e.to_string()))
}

fn bad_request(error: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "success": false, "error": error })),
    )
        .into_response()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
