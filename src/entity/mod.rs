//! Data model for login sessions.
//!
//! A login session is the only entity this crate stores. It links one web
//! login attempt to the out-of-band handshake that happens inside the
//! messaging channel, and lives for at most one TTL window.

/// Login session record and the value types it is built from.
///
/// Contains the record stored by every [`LoginSessionStore`](crate::LoginSessionStore)
/// implementation together with its id, status, code and identity types.
pub mod login_session;
