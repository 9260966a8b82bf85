//! Lookup of the Wi-Fi credentials to hand to a device.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

/// Credential lookup errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("no credentials for device {0}")]
    NotFound(String),

    #[error("credential store unavailable: {0}")]
    Unavailable(String),
}

/// Station SSID and passphrase.
#[derive(Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    /// Network name.
    pub ssid: String,
    /// Passphrase, empty for open networks.
    pub password: String,
}

impl WifiCredentials {
    /// Creates a credential pair.
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Source of station credentials, keyed by device identifier.
pub trait CredentialStore: Send + Sync {
    /// Returns the credentials to provision onto `device_id`.
    fn station_credentials(&self, device_id: &str) -> Result<WifiCredentials, CredentialError>;
}

/// In-memory store with an optional fallback for unknown devices.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    devices: RwLock<HashMap<String, WifiCredentials>>,
    fallback: Option<WifiCredentials>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that returns `credentials` for every device.
    pub fn with_fallback(credentials: WifiCredentials) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            fallback: Some(credentials),
        }
    }

    /// Sets the credentials for one device, replacing any previous entry.
    pub fn insert(
        &self,
        device_id: impl Into<String>,
        credentials: WifiCredentials,
    ) -> Result<(), CredentialError> {
        let device_id = device_id.into();
        let mut devices = self
            .devices
            .write()
            .map_err(|_| CredentialError::Unavailable("lock poisoned".to_string()))?;

        tracing::debug!(device_id = %device_id, ssid = %credentials.ssid, "stored credentials");
        devices.insert(device_id, credentials);
        Ok(())
    }

    /// Removes the credentials for one device.
    pub fn remove(&self, device_id: &str) -> Result<Option<WifiCredentials>, CredentialError> {
        let mut devices = self
            .devices
            .write()
            .map_err(|_| CredentialError::Unavailable("lock poisoned".to_string()))?;
        Ok(devices.remove(device_id))
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn station_credentials(&self, device_id: &str) -> Result<WifiCredentials, CredentialError> {
        let devices = self
            .devices
            .read()
            .map_err(|_| CredentialError::Unavailable("lock poisoned".to_string()))?;

        devices
            .get(device_id)
            .or(self.fallback.as_ref())
            .cloned()
            .ok_or_else(|| CredentialError::NotFound(device_id.to_string()))
    }
}
