//! API credential holder backed by a persistent key-value store.

use crate::error::{BlogVizError, Result};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Store key the credential is saved under.
pub const CREDENTIAL_KEY: &str = "gemini-api-key";

/// Environment variable used when the store holds no credential.
pub const API_KEY_ENV: &str = "GOOGLE_API_KEY";

/// Opaque persistent key-value storage.
pub trait CredentialStore: Send + Sync {
    /// Reads a value.
    fn get(&self, key: &str) -> Result<Option<String>>;
    /// Writes a value.
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Deletes a value; missing keys are not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Non-persistent store, mostly for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.values.lock().remove(key);
        Ok(())
    }
}

/// JSON-file store (`{"key": "value", ...}`).
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    /// Uses the given file; it is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<config dir>/blogviz/credentials.json`, if the platform has a config dir.
    pub fn default_location() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("blogviz").join("credentials.json"))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(values)?)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
        }

        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.read_all()?;
        values.insert(key.to_string(), value.to_string());
        self.write_all(&values)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.read_all()?;
        if values.remove(key).is_some() {
            self.write_all(&values)?;
        }
        Ok(())
    }
}

/// Holds the current API key and mirrors changes into its store.
pub struct CredentialHolder {
    store: Arc<dyn CredentialStore>,
    current: RwLock<Option<String>>,
}

impl CredentialHolder {
    /// Creates an empty holder without reading the store.
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            current: RwLock::new(None),
        }
    }

    /// Creates a holder over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCredentialStore::new()))
    }

    /// Creates a holder initialized from the store, falling back to
    /// `GOOGLE_API_KEY`. The environment value is not persisted.
    pub fn load(store: Arc<dyn CredentialStore>) -> Result<Self> {
        let stored = store
            .get(CREDENTIAL_KEY)?
            .filter(|key| !key.trim().is_empty());
        let current = match stored {
            Some(key) => Some(key),
            None => std::env::var(API_KEY_ENV)
                .ok()
                .filter(|key| !key.trim().is_empty()),
        };
        tracing::debug!(present = current.is_some(), "loaded credential");

        Ok(Self {
            store,
            current: RwLock::new(current),
        })
    }

    /// Returns the current key.
    pub fn get(&self) -> Option<String> {
        self.current.read().clone()
    }

    /// Replaces the key; a blank value clears it from memory and the store.
    pub fn set(&self, value: &str) -> Result<()> {
        let value = value.trim();
        if value.is_empty() {
            self.store.remove(CREDENTIAL_KEY)?;
            *self.current.write() = None;
        } else {
            self.store.set(CREDENTIAL_KEY, value)?;
            *self.current.write() = Some(value.to_string());
        }
        Ok(())
    }

    /// Returns the key, or a validation error when none is set.
    pub fn require(&self) -> Result<String> {
        self.get()
            .ok_or_else(|| BlogVizError::Validation("Enter an API key.".into()))
    }
}

impl std::fmt::Debug for CredentialHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialHolder")
            .field("present", &self.current.read().is_some())
            .finish()
    }
}

/// Masks a key for display, keeping only its last four characters.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 4 {
        return "*".repeat(chars.len());
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - 4), tail)
}
