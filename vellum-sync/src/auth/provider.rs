//! Credential acquisition and caching.
//!
//! Credentials are layered three deep: an in-memory cache, the persisted
//! pair of secure store (secrets) plus settings store (everything else), and
//! finally a fresh network authentication. Reads walk the layers top down;
//! a fresh authentication refills every layer on the way out.

use crate::auth::secrets::SecretStore;
use crate::auth::settings::SettingsStore;
use crate::client::{Authenticator, NoteStoreClient};
use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use vellum_types::{
    Account, AuthCookie, AuthenticationInfo, Guid, LinkedNotebook, Timestamp, UserId,
};

/// Configuration for [`AuthenticationInfoProvider`].
#[derive(Debug, Clone)]
pub struct AuthProviderConfig {
    /// Service name under which secrets are filed in the secure store.
    pub service_name: String,
    /// Credentials closer than this to their expiration are treated as
    /// already expired, so a sync run never starts on a token about to die.
    pub expiry_margin_ms: i64,
}

impl Default for AuthProviderConfig {
    fn default() -> Self {
        Self {
            service_name: "vellum".to_string(),
            expiry_margin_ms: 5 * 60 * 1000,
        }
    }
}

/// Whether a lookup may consult the cache layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Walk memory and persisted layers before going to the network.
    Cache,
    /// Skip straight to network authentication. All layers are still
    /// refilled from the result.
    NoCache,
}

/// Selects which credential entries [`AuthenticationInfoProvider::clear_caches`]
/// removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClearAuthCaches {
    Everything,
    AllUsers,
    User(UserId),
    AllLinkedNotebooks,
    LinkedNotebook(Guid),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Account {
        host: String,
        user_id: UserId,
    },
    Linked {
        host: String,
        user_id: UserId,
        guid: Guid,
    },
}

impl CacheKey {
    fn settings_key(&self) -> String {
        match self {
            CacheKey::Account { host, user_id } => format!("auth/{host}/{user_id}"),
            CacheKey::Linked {
                host,
                user_id,
                guid,
            } => format!("auth/{host}/{user_id}/linked/{guid}"),
        }
    }

    fn token_secret_key(&self) -> String {
        match self {
            CacheKey::Account { host, user_id } => format!("{host}:{user_id}:token"),
            CacheKey::Linked {
                host,
                user_id,
                guid,
            } => format!("{host}:{user_id}:linked:{guid}:token"),
        }
    }

    /// The account scope keeps its shard id in the secure store as well;
    /// linked scopes keep it in the settings payload.
    fn shard_secret_key(&self) -> Option<String> {
        match self {
            CacheKey::Account { host, user_id } => Some(format!("{host}:{user_id}:shard")),
            CacheKey::Linked { .. } => None,
        }
    }

    fn matches(&self, filter: &ClearAuthCaches) -> bool {
        match (self, filter) {
            (_, ClearAuthCaches::Everything) => true,
            (CacheKey::Account { .. }, ClearAuthCaches::AllUsers) => true,
            (CacheKey::Account { user_id, .. }, ClearAuthCaches::User(id)) => user_id == id,
            (CacheKey::Linked { .. }, ClearAuthCaches::AllLinkedNotebooks) => true,
            (CacheKey::Linked { guid, .. }, ClearAuthCaches::LinkedNotebook(g)) => guid == g,
            _ => false,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Account { host, user_id } => write!(f, "account {user_id}@{host}"),
            CacheKey::Linked {
                host,
                user_id,
                guid,
            } => write!(f, "linked notebook {guid} for {user_id}@{host}"),
        }
    }
}

/// Parses a settings key back into the cache key it was written under.
fn parse_settings_key(key: &str) -> Option<CacheKey> {
    let mut parts = key.split('/');
    if parts.next()? != "auth" {
        return None;
    }
    let host = parts.next()?.to_string();
    let user_id = UserId::new(parts.next()?.parse().ok()?);
    match parts.next() {
        None => Some(CacheKey::Account { host, user_id }),
        Some("linked") => {
            let guid = Guid::parse(parts.next()?).ok()?;
            if parts.next().is_some() {
                return None;
            }
            Some(CacheKey::Linked {
                host,
                user_id,
                guid,
            })
        }
        Some(_) => None,
    }
}

/// The non-secret half of a persisted credential entry.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedAuthInfo {
    user_id: UserId,
    note_store_url: String,
    web_api_url_prefix: String,
    authentication_time: Timestamp,
    expiration_time: Timestamp,
    cookies: Vec<AuthCookie>,
    shard_id: Option<String>,
}

/// Acquires, caches and persists credentials per account and per linked
/// notebook.
///
/// At most one network authentication is in flight per cache key: concurrent
/// callers for the same key coalesce behind a per-key slot lock, and all but
/// the first are served from the cache the first one filled.
pub struct AuthenticationInfoProvider {
    authenticator: Arc<dyn Authenticator>,
    client: Arc<dyn NoteStoreClient>,
    secrets: Arc<dyn SecretStore>,
    settings: Arc<dyn SettingsStore>,
    config: AuthProviderConfig,
    cache: RwLock<HashMap<CacheKey, Arc<AuthenticationInfo>>>,
    in_flight: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl AuthenticationInfoProvider {
    /// Creates a provider over the given collaborator seams.
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        client: Arc<dyn NoteStoreClient>,
        secrets: Arc<dyn SecretStore>,
        settings: Arc<dyn SettingsStore>,
        config: AuthProviderConfig,
    ) -> Self {
        Self {
            authenticator,
            client,
            secrets,
            settings,
            config,
            cache: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Authenticates the account's own scope.
    pub async fn authenticate_account(
        &self,
        account: &Account,
        mode: AuthMode,
    ) -> SyncResult<Arc<AuthenticationInfo>> {
        let key = CacheKey::Account {
            host: account.host.clone(),
            user_id: account.id,
        };

        if mode == AuthMode::Cache {
            if let Some(hit) = self.cached(&key).await {
                return Ok(hit);
            }
        }

        let slot = self.slot(&key).await;
        let _guard = slot.lock().await;

        if mode == AuthMode::Cache {
            // A coalesced caller may have filled the layers meanwhile.
            if let Some(hit) = self.cached(&key).await {
                return Ok(hit);
            }
            if let Some(persisted) = self.read_persisted(&key).await {
                debug!("Loaded persisted credentials for {}", key);
                return Ok(self.store(key, persisted).await);
            }
        }

        info!("Authenticating {} over the network", key);
        let info = self.authenticator.authenticate(account).await?;
        self.persist(&key, &info).await;
        Ok(self.store(key, info).await)
    }

    /// Authenticates one linked notebook's scope, exchanging the account's
    /// own credentials for scope-local ones if no cached entry is usable.
    pub async fn authenticate_to_linked_notebook(
        &self,
        account: &Account,
        linked_notebook: &LinkedNotebook,
        mode: AuthMode,
    ) -> SyncResult<Arc<AuthenticationInfo>> {
        let guid = linked_notebook
            .guid
            .ok_or_else(|| SyncError::Auth("linked notebook without guid".to_string()))?;
        let key = CacheKey::Linked {
            host: account.host.clone(),
            user_id: account.id,
            guid,
        };

        if mode == AuthMode::Cache {
            if let Some(hit) = self.cached(&key).await {
                return Ok(hit);
            }
        }

        let slot = self.slot(&key).await;
        let _guard = slot.lock().await;

        if mode == AuthMode::Cache {
            if let Some(hit) = self.cached(&key).await {
                return Ok(hit);
            }
            if let Some(persisted) = self.read_persisted(&key).await {
                debug!("Loaded persisted credentials for {}", key);
                return Ok(self.store(key, persisted).await);
            }
        }

        // The account's own credentials open the exchange; those may come
        // from any layer.
        let account_auth = self.authenticate_account(account, AuthMode::Cache).await?;
        info!("Authenticating {} over the network", key);
        let info = self
            .client
            .authenticate_to_shared_notebook(linked_notebook, &account_auth)
            .await?;
        self.persist(&key, &info).await;
        Ok(self.store(key, info).await)
    }

    /// Removes credential entries matching `filter` from every layer.
    pub async fn clear_caches(&self, filter: ClearAuthCaches) -> SyncResult<()> {
        self.cache
            .write()
            .await
            .retain(|key, _| !key.matches(&filter));

        let mut removed = 0usize;
        for settings_key in self.settings.keys().await? {
            let Some(parsed) = parse_settings_key(&settings_key) else {
                continue;
            };
            if !parsed.matches(&filter) {
                continue;
            }
            if let Err(e) = self
                .secrets
                .delete_password(&self.config.service_name, &parsed.token_secret_key())
                .await
            {
                warn!("Failed to delete token for {}: {}", parsed, e);
            }
            if let Some(shard_key) = parsed.shard_secret_key() {
                if let Err(e) = self
                    .secrets
                    .delete_password(&self.config.service_name, &shard_key)
                    .await
                {
                    warn!("Failed to delete shard id for {}: {}", parsed, e);
                }
            }
            if let Err(e) = self.settings.remove(&settings_key).await {
                warn!("Failed to remove settings for {}: {}", parsed, e);
            }
            removed += 1;
        }
        debug!("Cleared {} persisted credential entries", removed);
        Ok(())
    }

    // ── Cache layers ─────────────────────────────────────────────

    async fn cached(&self, key: &CacheKey) -> Option<Arc<AuthenticationInfo>> {
        let cache = self.cache.read().await;
        let info = cache.get(key)?;
        if self.is_fresh(info.expiration_time) {
            Some(info.clone())
        } else {
            None
        }
    }

    async fn store(&self, key: CacheKey, info: AuthenticationInfo) -> Arc<AuthenticationInfo> {
        let info = Arc::new(info);
        self.cache.write().await.insert(key, info.clone());
        info
    }

    async fn slot(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        let mut in_flight = self.in_flight.lock().await;
        in_flight.entry(key.clone()).or_default().clone()
    }

    fn is_fresh(&self, expiration_time: Timestamp) -> bool {
        expiration_time.saturating_sub_millis(self.config.expiry_margin_ms) > Timestamp::now()
    }

    /// Reads the persisted layer. Malformed or incomplete entries count as
    /// misses; only the network fallback remains for them.
    async fn read_persisted(&self, key: &CacheKey) -> Option<AuthenticationInfo> {
        let value = match self.settings.get(&key.settings_key()).await {
            Ok(Some(value)) => value,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read persisted auth settings for {}: {}", key, e);
                return None;
            }
        };
        let persisted: PersistedAuthInfo = match serde_json::from_value(value) {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!("Malformed persisted auth settings for {}: {}", key, e);
                return None;
            }
        };
        if !self.is_fresh(persisted.expiration_time) {
            debug!("Persisted credentials for {} have expired", key);
            return None;
        }

        let token = match self
            .secrets
            .read_password(&self.config.service_name, &key.token_secret_key())
            .await
        {
            Ok(Some(token)) => token,
            Ok(None) => return None,
            Err(e) => {
                warn!("Failed to read persisted token for {}: {}", key, e);
                return None;
            }
        };
        let shard_id = match key.shard_secret_key() {
            Some(shard_key) => {
                match self
                    .secrets
                    .read_password(&self.config.service_name, &shard_key)
                    .await
                {
                    Ok(Some(shard)) => shard,
                    Ok(None) => return None,
                    Err(e) => {
                        warn!("Failed to read persisted shard id for {}: {}", key, e);
                        return None;
                    }
                }
            }
            None => persisted.shard_id.unwrap_or_default(),
        };

        Some(AuthenticationInfo {
            user_id: persisted.user_id,
            auth_token: token,
            shard_id,
            note_store_url: persisted.note_store_url,
            web_api_url_prefix: persisted.web_api_url_prefix,
            authentication_time: persisted.authentication_time,
            expiration_time: persisted.expiration_time,
            cookies: persisted.cookies,
        })
    }

    /// Writes both persisted halves. Best effort: a persistence failure
    /// costs a reauthentication later, not this sync run.
    async fn persist(&self, key: &CacheKey, info: &AuthenticationInfo) {
        let payload = PersistedAuthInfo {
            user_id: info.user_id,
            note_store_url: info.note_store_url.clone(),
            web_api_url_prefix: info.web_api_url_prefix.clone(),
            authentication_time: info.authentication_time,
            expiration_time: info.expiration_time,
            cookies: info.cookies.clone(),
            shard_id: match key {
                CacheKey::Account { .. } => None,
                CacheKey::Linked { .. } => Some(info.shard_id.clone()),
            },
        };
        match serde_json::to_value(&payload) {
            Ok(value) => {
                if let Err(e) = self.settings.set(&key.settings_key(), value).await {
                    warn!("Failed to persist auth settings for {}: {}", key, e);
                }
            }
            Err(e) => warn!("Failed to serialize auth settings for {}: {}", key, e),
        }
        if let Err(e) = self
            .secrets
            .write_password(
                &self.config.service_name,
                &key.token_secret_key(),
                &info.auth_token,
            )
            .await
        {
            warn!("Failed to persist auth token for {}: {}", key, e);
        }
        if let Some(shard_key) = key.shard_secret_key() {
            if let Err(e) = self
                .secrets
                .write_password(&self.config.service_name, &shard_key, &info.shard_id)
                .await
            {
                warn!("Failed to persist shard id for {}: {}", key, e);
            }
        }
    }
}
