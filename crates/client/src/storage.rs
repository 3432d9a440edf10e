//! Persistent client storage.
//!
//! Values are JSON files in the platform config directory:
//! - Linux: `~/.config/realmsync/`
//! - macOS: `~/Library/Application Support/realmsync/`
//! - Windows: `%APPDATA%\realmsync\`
//!
//! Credentials live in a single `credentials.json` keyed by session code.
//! Older clients wrote one `token_<code>.json` file per session; those are
//! folded into `credentials.json` the first time the store is opened.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use realmsync_shared::Role;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ClientError;
use crate::{log_debug, log_info, log_warn};

const APP_DIR: &str = "realmsync";
const PROFILE_KEY: &str = "profile";
const CREDENTIALS_KEY: &str = "credentials";
const LEGACY_TOKEN_PREFIX: &str = "token_";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("no config directory available on this platform")]
    NoConfigDir,
    #[error("storage io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid stored json in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl From<StorageError> for ClientError {
    fn from(err: StorageError) -> Self {
        ClientError::Storage(err.to_string())
    }
}

/// Directory of JSON values addressed by key
#[derive(Debug, Clone)]
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    /// Storage rooted at `dir`; the directory is created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Storage in the platform config directory
    pub fn open_default() -> Result<Self, StorageError> {
        let dir = dirs::config_dir().ok_or(StorageError::NoConfigDir)?;
        Ok(Self::new(dir.join(APP_DIR)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.dir.join(format!("{safe_key}.json"))
    }

    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let path = self.path_for(key);
        let json = serde_json::to_string_pretty(value).map_err(|source| StorageError::Json {
            path: path.clone(),
            source,
        })?;
        fs::create_dir_all(&self.dir).map_err(|source| StorageError::Io {
            path: self.dir.clone(),
            source,
        })?;
        fs::write(&path, json).map_err(|source| StorageError::Io { path, source })
    }

    /// `Ok(None)` when nothing is stored under `key`
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let path = self.path_for(key);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StorageError::Io { path, source }),
        };
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|source| StorageError::Json { path, source })
    }

    /// Remove a value. Missing keys are not an error.
    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        self.path_for(key).is_file()
    }

    /// Keys of stored values starting with `prefix`
    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                let key = name.strip_suffix(".json")?;
                key.starts_with(prefix).then(|| key.to_string())
            })
            .collect()
    }
}

/// Local user preferences
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub role: Role,
    /// Stable attribution id sent with every connection
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProfileStore {
    storage: Storage,
}

impl ProfileStore {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    pub fn load(&self) -> Result<Profile, StorageError> {
        Ok(self.storage.load(PROFILE_KEY)?.unwrap_or_default())
    }

    pub fn save(&self, profile: &Profile) -> Result<(), StorageError> {
        self.storage.save(PROFILE_KEY, profile)
    }

    /// The persisted client id, generating and saving one on first use
    pub fn client_id(&self) -> Result<String, StorageError> {
        let mut profile = self.load()?;
        if let Some(id) = profile.client_id.clone() {
            return Ok(id);
        }
        let id = Uuid::new_v4().to_string();
        log_info!("generated client id {}", id);
        profile.client_id = Some(id.clone());
        self.save(&profile)?;
        Ok(id)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialFile {
    #[serde(default)]
    tokens: BTreeMap<String, String>,
    #[serde(default)]
    legacy_migrated: bool,
}

/// Session credentials, one canonical file keyed by session code
#[derive(Debug, Clone)]
pub struct CredentialStore {
    storage: Storage,
}

impl CredentialStore {
    /// Open the store, migrating legacy per-session token files once
    pub fn open(storage: Storage) -> Result<Self, StorageError> {
        let store = Self { storage };
        store.migrate_legacy()?;
        Ok(store)
    }

    pub fn get(&self, session_code: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read()?.tokens.get(&normalize_code(session_code)).cloned())
    }

    pub fn set(&self, session_code: &str, token: &str) -> Result<(), StorageError> {
        let mut file = self.read()?;
        file.tokens.insert(normalize_code(session_code), token.to_string());
        self.storage.save(CREDENTIALS_KEY, &file)
    }

    pub fn remove(&self, session_code: &str) -> Result<(), StorageError> {
        let mut file = self.read()?;
        if file.tokens.remove(&normalize_code(session_code)).is_some() {
            self.storage.save(CREDENTIALS_KEY, &file)?;
        }
        Ok(())
    }

    fn read(&self) -> Result<CredentialFile, StorageError> {
        Ok(self.storage.load(CREDENTIALS_KEY)?.unwrap_or_default())
    }

    fn migrate_legacy(&self) -> Result<(), StorageError> {
        let mut file = self.read()?;
        if file.legacy_migrated {
            return Ok(());
        }

        let legacy = self.storage.keys_with_prefix(LEGACY_TOKEN_PREFIX);
        for key in &legacy {
            let code = normalize_code(&key[LEGACY_TOKEN_PREFIX.len()..]);
            match self.storage.load::<String>(key) {
                Ok(Some(token)) => {
                    // Tokens already in the canonical file win
                    file.tokens.entry(code).or_insert(token);
                }
                Ok(None) => {}
                Err(e) => log_warn!("skipping unreadable legacy credential {}: {}", key, e),
            }
        }

        file.legacy_migrated = true;
        self.storage.save(CREDENTIALS_KEY, &file)?;
        for key in &legacy {
            self.storage.remove(key)?;
        }
        if legacy.is_empty() {
            log_debug!("no legacy credentials to migrate");
        } else {
            log_info!("migrated {} legacy credential file(s)", legacy.len());
        }
        Ok(())
    }
}

fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}
