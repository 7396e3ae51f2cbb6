use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

/// Registered identity held in the directory.
#[derive(Clone)]
pub struct Identity {
    pub id: Uuid,                      // time-ordered surrogate id
    pub username: String,              // original casing, trimmed
    pub email: String,                 // normalized
    pub password_hash: String,         // Argon2 PHC string, never serialized
    pub registered_at: OffsetDateTime, // creation timestamp (UTC)
    pub attributes: Map<String, Value>, // allow-listed extra form fields
}

impl Identity {
    /// Directory key for this record.
    pub fn key(&self) -> String {
        directory_key(&self.username)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password_hash", &"<redacted>")
            .field("registered_at", &self.registered_at)
            .field("attributes", &self.attributes)
            .finish()
    }
}

/// Case-insensitive directory key.
pub fn directory_key(username: &str) -> String {
    username.trim().to_lowercase()
}

/// Identity as returned to the client; has no password field at all.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicIdentity {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub registered_at: OffsetDateTime,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl From<&Identity> for PublicIdentity {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            username: identity.username.clone(),
            email: identity.email.clone(),
            registered_at: identity.registered_at,
            attributes: identity.attributes.clone(),
        }
    }
}
