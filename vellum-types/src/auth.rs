//! Accounts and authentication results.

use crate::ids::UserId;
use crate::timestamp::Timestamp;
use serde::{Deserialize, Serialize};

/// The identity a sync run operates under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: UserId,
    pub name: String,
    /// Service host, e.g. `www.vellum.io`. Part of every credential cache key.
    pub host: String,
}

impl Account {
    /// Creates an account identity.
    #[must_use]
    pub fn new(id: UserId, name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            host: host.into(),
        }
    }
}

/// A cookie the service set during authentication, replayed on later calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthCookie {
    pub name: String,
    pub value: String,
}

/// The complete result of one authentication against the service.
///
/// Covers both the account's own scope and linked-notebook scopes; linked
/// authentications carry the owner shard's urls and their own expiration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationInfo {
    pub user_id: UserId,
    pub auth_token: String,
    pub shard_id: String,
    pub note_store_url: String,
    pub web_api_url_prefix: String,
    pub authentication_time: Timestamp,
    pub expiration_time: Timestamp,
    pub cookies: Vec<AuthCookie>,
}
