//! JSON file storage for client-side state such as the persisted session.
//!
//! Files live in the platform-appropriate config directory by default:
//!   - Linux: `~/.config/alertdesk/`
//!   - macOS: `~/Library/Application Support/alertdesk/`
//!   - Windows: `%APPDATA%\alertdesk\`

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

const APP_DIR: &str = "alertdesk";

/// A directory of `<key>.json` files.
#[derive(Debug, Clone)]
pub struct Storage {
    dir: PathBuf,
}

impl Storage {
    /// Storage rooted in the platform config directory, if one exists.
    pub fn default_location() -> Option<Self> {
        Some(Self::at(dirs::config_dir()?.join(APP_DIR)))
    }

    pub fn at(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save a value. Returns `true` if the write succeeded.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(json) => self.save_raw(key, &json),
            Err(_) => false,
        }
    }

    /// Load a value; `None` if the key is missing or does not decode.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let json = self.load_raw(key)?;
        match serde_json::from_str(&json) {
            Ok(value) => Some(value),
            Err(e) => {
                crate::log_warn!("ignoring unreadable {} in storage: {}", key, e);
                None
            }
        }
    }

    pub fn remove(&self, key: &str) {
        let _ = std::fs::remove_file(self.file_path(key));
    }

    pub fn exists(&self, key: &str) -> bool {
        self.file_path(key).is_file()
    }

    fn file_path(&self, key: &str) -> PathBuf {
        // Sanitize key to be a valid filename
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.dir.join(format!("{}.json", safe_key))
    }

    fn save_raw(&self, key: &str, value: &str) -> bool {
        if std::fs::create_dir_all(&self.dir).is_err() {
            return false;
        }
        std::fs::write(self.file_path(key), value).is_ok()
    }

    fn load_raw(&self, key: &str) -> Option<String> {
        std::fs::read_to_string(self.file_path(key)).ok()
    }
}
