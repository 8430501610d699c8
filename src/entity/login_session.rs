//! Login session record.
//!
//! This module defines the record kept by session stores and the small value
//! types it is composed of. All types serialize with serde so an external
//! store can persist them as-is.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

const ID_PREFIX: &str = "tg";
const ID_SUFFIX_LEN: usize = 8;
const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

const CODE_MIN: u32 = 100_000;
const CODE_MAX: u32 = 999_999;

/// Opaque login session identifier.
///
/// Generated ids have the shape `tg_<unix millis>_<8 base-36 chars>`, which
/// only uses characters accepted in a bot deep-link `start` parameter.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh id stamped with `now`.
    pub fn generate(now: OffsetDateTime) -> Self {
        let millis = now.unix_timestamp_nanos() / 1_000_000;
        let mut rng = rand::thread_rng();
        let suffix: String = (0..ID_SUFFIX_LEN)
            .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
            .collect();

        Self(format!("{ID_PREFIX}_{millis}_{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a session is in its handshake.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoginStatus {
    /// Created by the web client, waiting for the bot to see the link command.
    Pending,
    /// The bot generated a code and sent it to the user.
    CodeSent,
    /// The code was accepted. Sessions are deleted on entry to this state.
    Verified,
}

impl LoginStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginStatus::Pending => "pending",
            LoginStatus::CodeSent => "code_sent",
            LoginStatus::Verified => "verified",
        }
    }
}

impl fmt::Display for LoginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-use six digit login code.
///
/// `Debug` output is redacted so a code never ends up in logs by accident.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoginCode(String);

impl LoginCode {
    /// Draws a code uniformly from `100000..=999999`.
    pub fn generate() -> Self {
        let value = rand::thread_rng().gen_range(CODE_MIN..=CODE_MAX);
        Self(value.to_string())
    }

    /// Exact string comparison in constant time. No numeric coercion is applied.
    pub fn matches(&self, submitted: &str) -> bool {
        self.0.as_bytes().ct_eq(submitted.as_bytes()).into()
    }

    /// The code as it should be shown to the user.
    pub fn reveal(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for LoginCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LoginCode(******)")
    }
}

/// The principal on the messaging side who completed the handshake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalIdentity {
    /// Numeric user id assigned by the channel provider.
    pub external_id: i64,
    /// Display name, first and last name joined by a space.
    pub name: String,
    /// Public handle without the leading `@`; empty when the user has none.
    pub handle: String,
}

impl ExternalIdentity {
    /// Builds an identity from the separate name parts a provider reports.
    pub fn from_parts(
        external_id: i64,
        first_name: &str,
        last_name: Option<&str>,
        handle: Option<&str>,
    ) -> Self {
        let name = [Some(first_name), last_name]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            external_id,
            name,
            handle: handle.unwrap_or_default().to_string(),
        }
    }
}

/// A stored login session.
///
/// `code` and `identity` are set exactly when `status` is past
/// [`LoginStatus::Pending`]. Use [`LoginSession::pending`] and
/// [`LoginSession::activated`] to build records that respect this.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginSession {
    pub id: SessionId,
    pub status: LoginStatus,
    pub code: Option<LoginCode>,
    pub identity: Option<ExternalIdentity>,
    /// Failed verify attempts, only tracked when an attempt cap is configured.
    #[serde(default)]
    pub failed_attempts: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl LoginSession {
    pub fn pending(id: SessionId, created_at: OffsetDateTime) -> Self {
        Self {
            id,
            status: LoginStatus::Pending,
            code: None,
            identity: None,
            failed_attempts: 0,
            created_at,
        }
    }

    /// The record after the channel delivered the link command.
    pub fn activated(&self, code: LoginCode, identity: ExternalIdentity) -> Self {
        Self {
            status: LoginStatus::CodeSent,
            code: Some(code),
            identity: Some(identity),
            ..self.clone()
        }
    }

    /// The record after one more wrong code.
    pub fn with_failed_attempt(&self) -> Self {
        Self {
            failed_attempts: self.failed_attempts.saturating_add(1),
            ..self.clone()
        }
    }

    /// Whether the session is older than `ttl` at `now`.
    pub fn is_expired(&self, now: OffsetDateTime, ttl: time::Duration) -> bool {
        now - self.created_at > ttl
    }
}
