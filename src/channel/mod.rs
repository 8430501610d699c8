//! Messaging channel ingress and egress.
//!
//! [`ChannelAdapter`] turns inbound bot updates into calls on
//! [`SessionLifecycle::activate`] and answers the sender over the same
//! channel. It never reports failure to the transport: every update is
//! acknowledged, otherwise the provider would keep redelivering it.

pub mod command;
pub mod telegram;

use std::sync::Arc;

use async_trait::async_trait;
use time::Duration;
use tracing::{debug, error, info, warn};

use crate::entity::login_session::{ExternalIdentity, LoginCode};
use crate::error::{LoginError, Result};
use crate::lifecycle::SessionLifecycle;
use crate::store::LoginSessionStore;

use self::command::Command;
use self::telegram::Update;

/// Outbound message transport.
#[async_trait]
pub trait MessageSender: Send + Sync + 'static {
    /// Sends `text` (Markdown) to `chat_id`.
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()>;
}

/// Sender used when no bot token is configured. Every message is dropped
/// with an error log, and the session is left to expire.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSender;

#[async_trait]
impl MessageSender for DisabledSender {
    async fn send_message(&self, chat_id: i64, _text: &str) -> Result<()> {
        error!(chat_id, "no bot token configured, dropping message");
        Ok(())
    }
}

/// Text of the messages the bot sends.
#[derive(Debug, Clone)]
pub struct Messages {
    site_name: String,
    validity_minutes: i64,
}

impl Messages {
    pub fn new(site_name: impl Into<String>, ttl: Duration) -> Self {
        // Whole minutes, rounded up.
        let validity_minutes = (ttl.whole_seconds() + 59) / 60;
        Self {
            site_name: site_name.into(),
            validity_minutes: validity_minutes.max(1),
        }
    }

    pub fn code(&self, code: &LoginCode) -> String {
        let unit = match self.validity_minutes {
            1 => "minute",
            _ => "minutes",
        };
        format!(
            "🔐 *Login code for {}:*\n\n`{}`\n\nEnter this code on the website. The code is valid for {} {unit}.",
            self.site_name,
            code.reveal(),
            self.validity_minutes
        )
    }

    pub fn link_rejected(&self) -> String {
        "❌ This login link has expired or is invalid.\nPress \"Log in with Telegram\" on the website to try again.".to_string()
    }

    /// `first_name` is user-controlled, so it is escaped for Markdown.
    pub fn greeting(&self, first_name: &str) -> String {
        format!(
            "👋 Hi, {}!\n\nI am the login bot for *{}*.\nTo sign in, press \"Log in with Telegram\" on the website.",
            telegram::escape_markdown(first_name),
            self.site_name
        )
    }
}

/// What the adapter did with an update. The transport never sees this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// A session was activated and its code handed to the sender.
    Activated,
    /// A link command named a session that could not be activated.
    Rejected(LoginError),
    /// A bare start command was answered with the onboarding message.
    Greeted,
    /// Nothing to do: no message, no text, or an unknown command.
    Ignored,
}

/// Bridges bot updates to the session state machine.
pub struct ChannelAdapter<S> {
    lifecycle: SessionLifecycle<S>,
    sender: Arc<dyn MessageSender>,
    messages: Messages,
}

impl<S: LoginSessionStore> ChannelAdapter<S> {
    pub fn new(
        lifecycle: SessionLifecycle<S>,
        sender: Arc<dyn MessageSender>,
        messages: Messages,
    ) -> Self {
        Self {
            lifecycle,
            sender,
            messages,
        }
    }

    /// Handles one inbound update.
    ///
    /// Activation is committed before any message goes out, and delivery
    /// failures are only logged.
    pub async fn handle_update(&self, update: Update) -> InboundOutcome {
        let Some(message) = update.message else {
            return InboundOutcome::Ignored;
        };
        let (Some(text), Some(from)) = (message.text.as_deref(), message.from.as_ref()) else {
            return InboundOutcome::Ignored;
        };
        let chat_id = message.chat.id;

        match Command::parse(text) {
            Some(Command::Link(session_id)) => {
                let identity = ExternalIdentity::from(from);
                match self.lifecycle.activate(&session_id, identity).await {
                    Ok(code) => {
                        self.deliver(chat_id, &self.messages.code(&code)).await;
                        InboundOutcome::Activated
                    }
                    Err(e) => {
                        warn!(%session_id, chat_id, error = %e, "rejected login link");
                        self.deliver(chat_id, &self.messages.link_rejected()).await;
                        InboundOutcome::Rejected(e)
                    }
                }
            }
            Some(Command::Start) => {
                info!(chat_id, "greeting new bot user");
                let greeting = self.messages.greeting(&from.first_name);
                self.deliver(chat_id, &greeting).await;
                InboundOutcome::Greeted
            }
            None => {
                debug!(chat_id, "ignoring unrecognized bot message");
                InboundOutcome::Ignored
            }
        }
    }

    async fn deliver(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.sender.send_message(chat_id, text).await {
            warn!(chat_id, error = %e, "failed to deliver bot message");
        }
    }
}
