//! Configuration management for autofix
//!
//! Stores settings in ~/.config/autofix/config.json

use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

pub const DEFAULT_API_BASE_URL: &str = "https://api.deepseek.com/v1";
pub const DEFAULT_MODEL: &str = "deepseek-coder";

const API_KEY_ENV: &str = "DEEPSEEK_API_KEY";
const BASE_URL_ENV: &str = "DEEPSEEK_BASE_URL";

const KEYRING_SERVICE: &str = "autofix";
const KEYRING_USERNAME: &str = "api_key";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Plaintext API key fallback for systems without a keychain. The
    /// keychain is preferred; this field is only read, never written by
    /// `set_api_key`.
    pub api_key: Option<String>,
    /// Chat-completions endpoint base URL override
    pub api_base_url: Option<String>,
    /// Model identifier override
    pub model: Option<String>,
}

fn keyring_entry() -> Result<Entry, keyring::Error> {
    Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
}

fn read_keyring_key() -> Result<Option<String>, keyring::Error> {
    let entry = keyring_entry()?;
    match entry.get_password() {
        Ok(key) => Ok(Some(key)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(err),
    }
}

fn write_keyring_key(key: &str) -> Result<(), keyring::Error> {
    let entry = keyring_entry()?;
    entry.set_password(key)
}

impl Config {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("autofix"))
    }

    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if let Ok(content) = fs::read_to_string(&path) {
                match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(err) => {
                        preserve_corrupt_config(&path, &content);
                        eprintln!(
                            "  Warning: Config file was corrupted ({}). A backup was saved and defaults were loaded.",
                            err
                        );
                    }
                }
            }
        }
        Self::default()
    }

    /// Save config to disk
    pub fn save(&self) -> Result<(), String> {
        let dir =
            Self::config_dir().ok_or_else(|| "Could not determine config directory".to_string())?;

        fs::create_dir_all(&dir).map_err(|e| format!("Failed to create config directory: {}", e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&dir, fs::Permissions::from_mode(0o700)) {
                eprintln!("  Warning: Failed to set config directory permissions: {}", e);
            }
        }

        let path = dir.join("config.json");
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        #[cfg(unix)]
        {
            write_config_atomic(&path, &content)
                .map_err(|e| format!("Failed to write config: {}", e))?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&path, content).map_err(|e| format!("Failed to write config: {}", e))?;
        }

        Ok(())
    }

    /// Get the API key (environment, keychain, then config fallback)
    pub fn get_api_key(&self) -> Option<String> {
        // Environment variable takes precedence
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                return Some(key);
            }
        }

        match read_keyring_key() {
            Ok(Some(key)) => return Some(key),
            Ok(None) => {} // No key stored, continue
            Err(err) => {
                eprintln!(
                    "  Warning: Failed to read API key from system keychain: {}",
                    err
                );
                eprintln!(
                    "  Tip: Set the {} environment variable as a workaround.",
                    API_KEY_ENV
                );
            }
        }

        self.api_key.clone()
    }

    /// Set and save the API key
    pub fn set_api_key(&self, key: &str) -> Result<(), String> {
        if let Err(write_err) = write_keyring_key(key) {
            return Err(format!(
                "Failed to store API key in system keychain: {}. \
                 You can set the {} environment variable instead.",
                write_err, API_KEY_ENV
            ));
        }

        // Verify the write succeeded by reading it back
        match read_keyring_key() {
            Ok(Some(stored_key)) if stored_key == key => Ok(()),
            Ok(Some(_)) => Err(format!(
                "API key verification failed: stored key doesn't match. \
                 You can set the {} environment variable instead.",
                API_KEY_ENV
            )),
            Ok(None) => Err(format!(
                "API key verification failed: key was not persisted to keychain. \
                 You can set the {} environment variable instead.",
                API_KEY_ENV
            )),
            Err(read_err) => Err(format!(
                "API key verification failed: couldn't read back from keychain ({}). \
                 You can set the {} environment variable instead.",
                read_err, API_KEY_ENV
            )),
        }
    }

    /// Check if an API key is configured
    pub fn has_api_key(&self) -> bool {
        self.get_api_key().is_some()
    }

    /// Validate API key format (should start with sk-)
    pub fn validate_api_key_format(key: &str) -> bool {
        key.starts_with("sk-")
    }

    /// Endpoint base URL: environment, then config, then the default.
    /// Invalid overrides fall back to the default with a warning.
    pub fn api_base_url(&self) -> String {
        let override_url = std::env::var(BASE_URL_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .or_else(|| self.api_base_url.clone());

        match override_url {
            Some(raw) => match url::Url::parse(&raw) {
                Ok(_) => raw,
                Err(err) => {
                    eprintln!(
                        "  Warning: Ignoring invalid API base URL {:?} ({}); using {}",
                        raw, err, DEFAULT_API_BASE_URL
                    );
                    DEFAULT_API_BASE_URL.to_string()
                }
            },
            None => DEFAULT_API_BASE_URL.to_string(),
        }
    }

    pub fn model(&self) -> String {
        self.model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/autofix/config.json".to_string())
    }
}

/// Interactive prompt to set up API key
pub fn setup_api_key_interactive() -> Result<String, String> {
    use std::io::{self, Write};

    println!();
    println!("  ┌─────────────────────────────────────────────────────────┐");
    println!("  │  DEEPSEEK SETUP                                         │");
    println!("  └─────────────────────────────────────────────────────────┘");
    println!();
    println!("  autofix uses the DeepSeek API to generate repairs.");
    println!();
    println!("  1. Get an API key at: https://platform.deepseek.com/api_keys");
    println!("  2. Paste it below (saved in your system keychain when available)");
    println!();
    print!("  API Key: ");
    io::stdout().flush().map_err(|e| e.to_string())?;

    let mut key = String::new();
    io::stdin().read_line(&mut key).map_err(|e| e.to_string())?;
    let key = key.trim().to_string();

    if key.is_empty() {
        return Err("No API key provided".to_string());
    }

    if !Config::validate_api_key_format(&key) {
        println!();
        println!("  Warning: Key doesn't look like a DeepSeek key (should start with sk-)");
        println!("     Saving anyway...");
    }

    let config = Config::load();
    config.set_api_key(&key)?;

    println!();
    println!("  + API key saved to the system keychain");
    println!("    (settings live in {})", Config::config_location());
    println!();

    Ok(key)
}

fn preserve_corrupt_config(path: &std::path::Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

#[cfg(unix)]
fn write_config_atomic(path: &std::path::Path, content: &str) -> Result<(), String> {
    use std::fs::OpenOptions;
    use std::os::unix::fs::PermissionsExt;

    let tmp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .map_err(|e| e.to_string())?;

    if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
        eprintln!("  Warning: Failed to set temp config file permissions: {}", e);
    }

    file.write_all(content.as_bytes())
        .map_err(|e| e.to_string())?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.to_string());
    }
    Ok(())
}
