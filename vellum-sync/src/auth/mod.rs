//! Credential layers: secure store, settings store and the provider that
//! orchestrates them.

pub mod provider;
pub mod secrets;
pub mod settings;

pub use provider::{AuthMode, AuthProviderConfig, AuthenticationInfoProvider, ClearAuthCaches};
pub use secrets::{KeyringSecretStore, MemorySecretStore, SecretStore};
pub use settings::{MemorySettingsStore, SettingsStore};
