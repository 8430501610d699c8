//! Axum login server for channel-login
//!
//! Runs the full login flow: the browser endpoints, the bot webhook and a
//! cookie-backed web session for the logged-in user.
//!
//! # Running the example
//!
//! 1. Create a bot with @BotFather and note its username and token
//! 2. Set the environment (or put the same keys in a `.env` file):
//!    ```bash
//!    export TELEGRAM_BOT_NAME=my_market_bot
//!    export TELEGRAM_BOT_TOKEN=123456:ABC...
//!    # optional, must match `secret_token` passed to setWebhook
//!    export TELEGRAM_WEBHOOK_SECRET=some-long-random-string
//!    ```
//! 3. Run the example:
//!    ```bash
//!    cargo run --example axum_login_server
//!    ```
//! 4. Point the bot webhook at `https://<public host>/api/telegram/webhook`
//!
//! # Testing the example
//!
//! ```bash
//! # Start a login and open the returned deep link in Telegram
//! curl -s -c cookies.txt -X POST http://127.0.0.1:3000/api/auth/telegram/init
//!
//! # Poll until the status is code_sent
//! curl -s "http://127.0.0.1:3000/api/auth/telegram/verify?sessionId=<id>"
//!
//! # Submit the code the bot sent
//! curl -s -b cookies.txt -c cookies.txt -H 'content-type: application/json' \
//!   -d '{"sessionId":"<id>","code":"<code>"}' http://127.0.0.1:3000/api/auth/telegram/verify
//!
//! # Who am I?
//! curl -s -b cookies.txt http://127.0.0.1:3000/api/auth/me
//! ```

use std::sync::Arc;

use channel_login::{http, AppState, Config, DisabledSender, MessageSender, TelegramSender};
use dotenvy::dotenv;
use time::Duration as TimeDuration;
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    // Load environment variables from .env file if present
    dotenv().ok();

    let mut config = Config::from_env()?;

    let sender: Arc<dyn MessageSender> = match config.bot_token.take() {
        Some(token) => Arc::new(TelegramSender::new(token)),
        None => {
            warn!("TELEGRAM_BOT_TOKEN is not set, login codes will not be delivered");
            Arc::new(DisabledSender)
        }
    };

    let state = AppState::from_config(&config, sender);

    // Logged-in users stay signed in for a week of inactivity
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false) // Allow non-HTTPS for development
        .with_expiry(Expiry::OnInactivity(TimeDuration::days(7)));

    let app = http::router(state).layer(session_layer);

    info!("Server starting on http://{}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
