//! Host settings access and base directory resolution.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Leading token in a configured folder that expands to the temp directory.
pub const TMP_TOKEN: &str = "{TMP}";

/// Read access to host configuration.
pub trait SettingsStore: Send + Sync {
    fn get_string(&self, key: &str) -> Option<String>;
}

/// In-memory settings, e.g. the `[settings]` table of the relay config.
#[derive(Debug, Default)]
pub struct MapSettings {
    values: RwLock<HashMap<String, String>>,
}

impl MapSettings {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self {
            values: RwLock::new(values),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert(key.into(), value.into());
    }
}

impl SettingsStore for MapSettings {
    fn get_string(&self, key: &str) -> Option<String> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        values.get(key).cloned()
    }
}

/// Resolve the folder offered to the user as the extraction default.
///
/// - unset or blank: `temp`
/// - leading `~`: `home` followed by the rest
/// - leading `{TMP}`: `temp` followed by the rest
/// - anything else: the trimmed value as a path
///
/// Without a home directory a `~` value falls back to `temp`.
pub fn resolve_base_dir(configured: Option<&str>, home: Option<&Path>, temp: &Path) -> PathBuf {
    let value = configured.map(str::trim).unwrap_or_default();
    if value.is_empty() {
        return temp.to_path_buf();
    }

    if let Some(rest) = value.strip_prefix('~') {
        return match home {
            Some(home) => join_rest(home, rest),
            None => temp.to_path_buf(),
        };
    }

    if let Some(rest) = value.strip_prefix(TMP_TOKEN) {
        return join_rest(temp, rest);
    }

    PathBuf::from(value)
}

/// Same as [`resolve_base_dir`] using the current user's directories.
pub fn resolve_base_dir_for_user(configured: Option<&str>) -> PathBuf {
    resolve_base_dir(configured, dirs::home_dir().as_deref(), &std::env::temp_dir())
}

fn join_rest(base: &Path, rest: &str) -> PathBuf {
    let rest = rest.trim_start_matches(['/', '\\']);
    if rest.is_empty() {
        base.to_path_buf()
    } else {
        base.join(rest)
    }
}
