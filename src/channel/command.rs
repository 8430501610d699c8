//! Recognizes bot commands in inbound message text.

use crate::entity::login_session::SessionId;

const START: &str = "/start";
const LINK_PREFIX: &str = "/start login_";

/// A bot command the adapter knows how to answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/start login_<session id>`, sent by a deep link.
    Link(SessionId),
    /// A bare `/start` with no payload.
    Start,
}

impl Command {
    /// Parses message text. Returns `None` for anything that is not a known
    /// command, which the adapter ignores.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();

        if let Some(session_id) = text.strip_prefix(LINK_PREFIX) {
            return Some(Command::Link(SessionId::from(session_id.trim())));
        }

        (text == START).then_some(Command::Start)
    }
}

/// Payload placed in a deep link so the bot receives a link command.
pub fn link_payload(id: &SessionId) -> String {
    format!("login_{id}")
}
