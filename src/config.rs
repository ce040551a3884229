use crate::api::{DEFAULT_API_URL, DEFAULT_MODEL};
use crate::error::{ChatError, Result};
use crate::storage::SESSIONS_KEY;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const KEYRING_SERVICE: &str = "xantium_api_key";
const KEYRING_USER: &str = "gemini";
const DEFAULT_API_KEY_REF: &str = "env:API_KEY";
const FALLBACK_API_KEY_VAR: &str = "GEMINI_API_KEY";

/// Runtime settings. Defaults can be overridden through `XANTIUM_*` variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub api_url: String,
    pub model: String,
    // 'env:VAR_NAME' or 'keyring'
    pub api_key_ref: String,
    pub database_path: PathBuf,
    pub storage_key: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key_ref: DEFAULT_API_KEY_REF.to_string(),
            database_path: default_database_path(),
            storage_key: SESSIONS_KEY.to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Applies overrides from `lookup` (an environment accessor) on top of the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(url) = lookup("XANTIUM_API_URL") {
            config.api_url = url;
        }
        if let Some(model) = lookup("XANTIUM_MODEL") {
            config.model = model;
        }
        if let Some(key_ref) = lookup("XANTIUM_API_KEY_REF") {
            config.api_key_ref = key_ref;
        }
        if let Some(db) = lookup("XANTIUM_DB") {
            config.database_path = PathBuf::from(db);
        }
        log::debug!("Loaded config: {:?}", config);
        config
    }

    pub fn api_key(&self) -> Result<String> {
        resolve_api_key(&self.api_key_ref, |name| std::env::var(name).ok())
    }
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("xantium")
        .join("xantium.sqlite")
}

/// Resolves the API credential named by `key_ref`.
///
/// `env:NAME` reads the variable (the default reference also accepts
/// `GEMINI_API_KEY`); `keyring` reads the OS credential store. A missing or
/// empty credential is a configuration error.
pub fn resolve_api_key(key_ref: &str, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
    let key = match key_ref {
        r if r.starts_with("env:") => {
            let var = r.trim_start_matches("env:");
            log::debug!("Retrieving API key from environment variable: {}", var);
            let mut key = lookup(var);
            if key.is_none() && r == DEFAULT_API_KEY_REF {
                key = lookup(FALLBACK_API_KEY_VAR);
            }
            key.ok_or_else(|| {
                ChatError::Config(format!("environment variable '{}' is not set", var))
            })?
        }
        "keyring" => {
            log::debug!("Retrieving API key from keyring for service: {}", KEYRING_SERVICE);
            let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER)
                .map_err(|e| ChatError::Config(format!("failed to open keyring entry: {}", e)))?;
            entry.get_password().map_err(|e| {
                ChatError::Config(format!("failed to read API key from keyring: {}", e))
            })?
        }
        other => {
            return Err(ChatError::Config(format!(
                "unsupported api key reference: {}",
                other
            )))
        }
    };

    if key.trim().is_empty() {
        return Err(ChatError::Config("API key is empty".to_string()));
    }
    Ok(key)
}

/// Stores the API key in the OS keyring so `api_key_ref = "keyring"` finds it.
pub fn set_api_key_in_keyring(api_key: &str) -> Result<()> {
    let api_key = api_key.trim();
    if api_key.is_empty() {
        return Err(ChatError::Config("refusing to store an empty API key".to_string()));
    }
    let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER)
        .map_err(|e| ChatError::Config(format!("failed to open keyring entry: {}", e)))?;
    log::info!("Setting API key in keyring for service: {}", KEYRING_SERVICE);
    entry
        .set_password(api_key)
        .map_err(|e| ChatError::Config(format!("failed to store API key in keyring: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_point_at_gemini() {
        let config = AppConfig::from_lookup(env(&[]));
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.model, "gemini-2.5-flash");
        assert_eq!(config.api_key_ref, "env:API_KEY");
        assert_eq!(config.storage_key, "xantium-ai-chats");
        assert!(config.database_path.ends_with("xantium/xantium.sqlite"));
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = AppConfig::from_lookup(env(&[
            ("XANTIUM_MODEL", "gemini-2.5-pro"),
            ("XANTIUM_DB", "/tmp/chats.sqlite"),
            ("XANTIUM_API_KEY_REF", "keyring"),
        ]));
        assert_eq!(config.model, "gemini-2.5-pro");
        assert_eq!(config.database_path, PathBuf::from("/tmp/chats.sqlite"));
        assert_eq!(config.api_key_ref, "keyring");
    }

    #[test]
    fn api_key_comes_from_named_variable() {
        let key = resolve_api_key("env:MY_KEY", env(&[("MY_KEY", "abc")])).unwrap();
        assert_eq!(key, "abc");
    }

    #[test]
    fn default_reference_falls_back_to_gemini_variable() {
        let key = resolve_api_key("env:API_KEY", env(&[("GEMINI_API_KEY", "g")])).unwrap();
        assert_eq!(key, "g");
    }

    #[test]
    fn missing_or_empty_key_is_config_error() {
        assert!(matches!(
            resolve_api_key("env:API_KEY", env(&[])),
            Err(ChatError::Config(_))
        ));
        assert!(matches!(
            resolve_api_key("env:MY_KEY", env(&[("MY_KEY", "  ")])),
            Err(ChatError::Config(_))
        ));
        assert!(matches!(
            resolve_api_key("vault:x", env(&[])),
            Err(ChatError::Config(_))
        ));
    }

    #[test]
    fn empty_key_is_not_stored() {
        assert!(matches!(
            set_api_key_in_keyring("   "),
            Err(ChatError::Config(_))
        ));
    }
}
