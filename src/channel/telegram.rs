//! Telegram Bot API glue: the webhook envelope and the `sendMessage` client.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::entity::login_session::{ExternalIdentity, SessionId};

use super::command::link_payload;

/// Builds the deep link that opens the bot with a link command for `id`.
pub fn deep_link(bot_name: &str, id: &SessionId) -> String {
    format!("https://t.me/{bot_name}?start={}", link_payload(id))
}

/// Header carrying the `secret_token` given when the webhook was registered.
pub const SECRET_TOKEN_HEADER: &str = "x-telegram-bot-api-secret-token";

/// Checks a presented webhook secret against the expected one in constant
/// time. A missing header never matches.
pub fn secret_token_matches(expected: &SecretString, presented: Option<&[u8]>) -> bool {
    let Some(presented) = presented else {
        return false;
    };
    expected.expose_secret().as_bytes().ct_eq(presented).into()
}

/// Escapes the characters legacy `Markdown` parse mode treats as markup, for
/// user-supplied text placed outside an entity.
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '_' | '*' | '`' | '[') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Inbound webhook envelope. Only the fields the adapter reads are modeled.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl From<&User> for ExternalIdentity {
    fn from(user: &User) -> Self {
        ExternalIdentity::from_parts(
            user.id,
            &user.first_name,
            user.last_name.as_deref(),
            user.username.as_deref(),
        )
    }
}

#[cfg(feature = "telegram")]
pub use client::TelegramSender;

#[cfg(feature = "telegram")]
mod client {
    use async_trait::async_trait;
    use secrecy::{ExposeSecret, SecretString};
    use serde::{Deserialize, Serialize};
    use tracing::debug;

    use crate::channel::MessageSender;
    use crate::error::{LoginError, Result};

    const API_BASE: &str = "https://api.telegram.org";

    /// Sends messages through the Bot API `sendMessage` method.
    #[derive(Debug)]
    pub struct TelegramSender {
        client: reqwest::Client,
        token: SecretString,
        api_base: String,
    }

    #[derive(Serialize)]
    struct SendMessage<'a> {
        chat_id: i64,
        text: &'a str,
        parse_mode: &'static str,
    }

    #[derive(Deserialize)]
    struct ApiResponse {
        ok: bool,
        description: Option<String>,
    }

    impl TelegramSender {
        pub fn new(token: SecretString) -> Self {
            Self {
                client: reqwest::Client::new(),
                token,
                api_base: API_BASE.to_string(),
            }
        }

        /// Points the client at another Bot API server, e.g. a local one.
        pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
            self.api_base = api_base.into().trim_end_matches('/').to_string();
            self
        }

        pub fn with_client(mut self, client: reqwest::Client) -> Self {
            self.client = client;
            self
        }
    }

    #[async_trait]
    impl MessageSender for TelegramSender {
        async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
            let url = format!(
                "{}/bot{}/sendMessage",
                self.api_base,
                self.token.expose_secret()
            );

            let response = self
                .client
                .post(url)
                .json(&SendMessage {
                    chat_id,
                    text,
                    parse_mode: "Markdown",
                })
                .send()
                .await
                // The URL carries the token, so keep it out of the error text.
                .map_err(|e| LoginError::Delivery(e.without_url().to_string()))?;

            let status = response.status();
            let body: ApiResponse = response
                .json()
                .await
                .map_err(|e| LoginError::Delivery(e.without_url().to_string()))?;

            if !body.ok {
                return Err(LoginError::Delivery(format!(
                    "{status}: {}",
                    body.description.unwrap_or_default()
                )));
            }

            debug!(chat_id, "bot message delivered");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_link_embeds_link_payload() {
        let id = SessionId::from("tg_1_abc");
        assert_eq!(
            deep_link("market_bot", &id),
            "https://t.me/market_bot?start=login_tg_1_abc"
        );
    }

    #[test]
    fn parses_text_update() {
        let update: Update = serde_json::from_value(serde_json::json!({
            "update_id": 10,
            "message": {
                "message_id": 5,
                "date": 1700000000,
                "chat": { "id": 99, "type": "private" },
                "from": { "id": 42, "is_bot": false, "first_name": "Ann", "last_name": "Lee", "username": "ann" },
                "text": "/start login_abc"
            }
        }))
        .unwrap();

        let message = update.message.unwrap();
        assert_eq!(message.chat.id, 99);
        assert_eq!(message.text.as_deref(), Some("/start login_abc"));

        let identity = ExternalIdentity::from(message.from.as_ref().unwrap());
        assert_eq!(identity.external_id, 42);
        assert_eq!(identity.name, "Ann Lee");
        assert_eq!(identity.handle, "ann");
    }

    #[test]
    fn secret_token_requires_exact_match() {
        let expected = SecretString::from("hook-secret");
        let matches = |presented: &[u8]| secret_token_matches(&expected, Some(presented));

        assert!(matches(b"hook-secret"));
        assert!(!matches(b"hook-secreT"));
        assert!(!matches(b"hook"));
        assert!(!secret_token_matches(&expected, None));
    }

    #[test]
    fn escapes_markdown_markup() {
        assert_eq!(escape_markdown("plain name"), "plain name");
        assert_eq!(escape_markdown("a_b*c`d[e]"), "a\\_b\\*c\\`d\\[e]");
    }

    #[test]
    fn parses_update_without_message() {
        let update: Update = serde_json::from_value(serde_json::json!({
            "update_id": 11,
            "edited_message": { "chat": { "id": 1 } }
        }))
        .unwrap();
        assert!(update.message.is_none());
    }
}
