//! # Cross-channel login sessions
//!
//! Short-lived login sessions that let a web client authenticate through a
//! messaging bot. The browser starts a login and gets a deep link, the user
//! opens the bot, the bot answers with a six digit code, and the browser
//! submits that code to finish. The two clients never talk to each other;
//! the browser learns that the code went out by polling.
//!
//! This crate provides the session store, the state machine on top of it,
//! the bot webhook adapter and an [axum](https://crates.io/crates/axum)
//! router exposing it all over HTTP.
//!
//! ## Features
//!
//! - Pluggable [`LoginSessionStore`] with an in-process [`MemoryStore`]
//! - Lazy TTL expiry on every access, no background timers
//! - Race-free activation and single-use codes
//! - Telegram webhook handling and `sendMessage` delivery
//! - Client-side [`ClientPoller`] for the browser contract
//! - Logged-in identity kept in a [`tower-sessions`](https://crates.io/crates/tower-sessions) web session
//!
//! ## Quick Start
//!
//! ```
//! use channel_login::{ExternalIdentity, LoginStatus, MemoryStore, SessionLifecycle};
//!
//! # async fn example() -> Result<(), channel_login::LoginError> {
//! let lifecycle = SessionLifecycle::new(MemoryStore::new());
//!
//! // Browser: start a login.
//! let session_id = lifecycle.create().await?;
//! assert_eq!(lifecycle.status_of(&session_id).await?, LoginStatus::Pending);
//!
//! // Bot: the user sent `/start login_<session_id>`.
//! let identity = ExternalIdentity::from_parts(42, "Ann", None, Some("ann"));
//! let code = lifecycle.activate(&session_id, identity).await?;
//!
//! // Browser: the poll saw `code_sent`, the user typed the code.
//! let user = lifecycle.verify(&session_id, code.reveal()).await?;
//! assert_eq!(user.external_id, 42);
//! # Ok(())
//! # }
//! ```
//!
//! ## Axum Integration Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use channel_login::{http, AppState, Config, TelegramSender};
//! use tower_sessions::{MemoryStore, SessionManagerLayer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = Config::from_env()?;
//! let sender = Arc::new(TelegramSender::new(config.bot_token.take().ok_or("no bot token")?));
//! let state = AppState::from_config(&config, sender);
//!
//! let app = http::router(state).layer(SessionManagerLayer::new(MemoryStore::default()));
//!
//! let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod clock;
pub mod config;
pub mod entity;
mod error;
pub mod http;
mod lifecycle;
mod memory_store;
pub mod poller;
mod store;

/// The state machine driving login sessions.
///
/// This is the primary type you'll use from this crate.
pub use lifecycle::SessionLifecycle;

/// The in-process session store.
pub use memory_store::MemoryStore;

/// Trait for implementing session storage backends, and the default TTL.
pub use store::{LoginSessionStore, DEFAULT_TTL};

/// Error taxonomy shared by every component.
pub use error::{LoginError, Result};

/// Session record types.
pub use entity::login_session::{ExternalIdentity, LoginCode, LoginSession, LoginStatus, SessionId};

/// Time sources for expiry checks.
pub use clock::{Clock, ManualClock, SystemClock};

/// Bot webhook adapter and outbound delivery.
pub use channel::{ChannelAdapter, DisabledSender, InboundOutcome, MessageSender, Messages};

/// Bot API client for outbound delivery.
#[cfg(feature = "telegram")]
pub use channel::telegram::TelegramSender;

/// Browser-side polling contract.
pub use poller::{ClientPoller, PollOutcome, StatusSource};

/// Environment configuration.
pub use config::{Config, ConfigError};

/// Shared state for the HTTP routes.
pub use http::AppState;
