//! Settings parser for config.toml

use std::path::{Path, PathBuf};

use horizon_core::prelude::*;

use super::types::Settings;

const CONFIG_FILENAME: &str = "config.toml";
const APP_DIR: &str = "constella-horizon";

/// Environment variable overriding the configuration directory.
pub const CONFIG_DIR_ENV: &str = "HORIZON_CONFIG_DIR";

// ─────────────────────────────────────────────────────────────────────────────
// Directory Resolution
// ─────────────────────────────────────────────────────────────────────────────

/// Resolve the configuration directory.
///
/// `$HORIZON_CONFIG_DIR` wins; otherwise `<config_dir>/constella-horizon`.
pub fn config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Some(PathBuf::from(dir));
        }
    }
    dirs::config_dir().map(|dir| dir.join(APP_DIR))
}

// ─────────────────────────────────────────────────────────────────────────────
// Settings Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Load settings from `<dir>/config.toml`
///
/// Returns default settings if file doesn't exist or can't be parsed.
pub fn load_settings(dir: &Path) -> Settings {
    let config_path = dir.join(CONFIG_FILENAME);

    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(&config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Load settings from the resolved configuration directory.
pub fn load_default_settings() -> Settings {
    match config_dir() {
        Some(dir) => load_settings(&dir),
        None => {
            warn!("No configuration directory on this platform, using defaults");
            Settings::default()
        }
    }
}

/// Create a commented default config.toml in `dir`
///
/// An existing file is left untouched.
pub fn init_config_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::config(format!("Failed to create config dir: {}", e)))?;
    }

    let config_path = dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        let default_content = r#"# Constella Horizon Configuration

[server]
base_url = "https://itzerhypergalaxy.online"
tags_base_url = "https://test-server-7w76.onrender.com"

[connection]
heartbeat_interval_secs = 30
monitor_interval_secs = 10
pong_timeout_secs = 10     # Transport ping must see a pong within this
backoff_base_ms = 1000      # Reconnect delay = min(base * 2^(n-1), cap)
backoff_cap_secs = 30
max_reconnect_attempts = 10
drain_ms = 100              # Wait before closing on graceful disconnect
connect_timeout_secs = 30

[chat]
path = "/horizon/assist/chat-ws"
smarter_analysis = false
heartbeat = "ping"          # ping | text | disabled

[tags]
tenant_name = ""            # Supplied by the authentication layer
heartbeat = "text"

[search]
method = "sentence_chunks"  # sentence_chunks | topic_extraction
tenant_name = ""
heartbeat = "disabled"
"#;
        std::fs::write(&config_path, default_content)
            .map_err(|e| Error::config(format!("Failed to write config.toml: {}", e)))?;
        info!("Wrote default config to {:?}", config_path);
    }

    Ok(())
}

/// Save settings to `<dir>/config.toml`
///
/// Uses atomic write (temp file + rename).
pub fn save_settings(dir: &Path, settings: &Settings) -> Result<()> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::config(format!("Failed to create config dir: {}", e)))?;
    }

    let config_path = dir.join(CONFIG_FILENAME);
    let temp_path = dir.join(".config.toml.tmp");

    let content = toml::to_string_pretty(settings)
        .map_err(|e| Error::config(format!("Failed to serialize settings: {}", e)))?;
    let full_content = format!("# Constella Horizon Configuration\n\n{}", content);

    std::fs::write(&temp_path, &full_content)
        .map_err(|e| Error::config(format!("Failed to write temp file: {}", e)))?;

    std::fs::rename(&temp_path, &config_path)
        .map_err(|e| Error::config(format!("Failed to rename temp file: {}", e)))?;

    info!("Saved settings to {:?}", config_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeartbeatMode;
    use crate::context_search::SearchMethod;
    use serial_test::serial;
    use tempfile::tempdir;

    #[test]
    fn test_load_settings_defaults() {
        let temp = tempdir().unwrap();
        let settings = load_settings(temp.path());

        assert_eq!(settings.server.base_url, "https://itzerhypergalaxy.online");
        assert_eq!(settings.connection.max_reconnect_attempts, 10);
        assert_eq!(settings.chat.path, "/horizon/assist/chat-ws");
        assert!(settings.tags.tenant_name.is_empty());
    }

    #[test]
    fn test_load_settings_custom() {
        let temp = tempdir().unwrap();
        let config = r#"
[server]
base_url = "http://localhost:8000"

[connection]
max_reconnect_attempts = 3
backoff_cap_secs = 5

[tags]
tenant_name = "acme"
heartbeat = "ping"

[search]
method = "topic_extraction"
"#;
        std::fs::write(temp.path().join("config.toml"), config).unwrap();

        let settings = load_settings(temp.path());

        assert_eq!(settings.server.base_url, "http://localhost:8000");
        assert_eq!(
            settings.server.tags_base_url,
            "https://test-server-7w76.onrender.com"
        );
        assert_eq!(settings.connection.max_reconnect_attempts, 3);
        assert_eq!(settings.connection.heartbeat_interval_secs, 30);
        assert_eq!(settings.tags.tenant_name, "acme");
        assert_eq!(settings.tags.heartbeat, HeartbeatMode::Ping);
        assert_eq!(settings.search.method, SearchMethod::TopicExtraction);
    }

    #[test]
    fn test_load_settings_invalid_toml() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("config.toml"), "[connection\nnope").unwrap();

        let settings = load_settings(temp.path());
        assert_eq!(settings.connection.max_reconnect_attempts, 10);
    }

    #[test]
    fn test_init_config_dir_writes_parseable_defaults() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("nested");

        init_config_dir(&dir).unwrap();
        let content = std::fs::read_to_string(dir.join("config.toml")).unwrap();
        assert!(content.contains("[connection]"));

        let settings = load_settings(&dir);
        assert_eq!(settings.connection.drain_ms, 100);
        assert_eq!(settings.search.heartbeat, HeartbeatMode::Disabled);
    }

    #[test]
    fn test_init_config_dir_keeps_existing_file() {
        let temp = tempdir().unwrap();
        std::fs::write(temp.path().join("config.toml"), "[tags]\ntenant_name = \"kept\"\n")
            .unwrap();

        init_config_dir(temp.path()).unwrap();
        assert_eq!(load_settings(temp.path()).tags.tenant_name, "kept");
    }

    #[test]
    fn test_save_then_load() {
        let temp = tempdir().unwrap();
        let mut settings = Settings::default();
        settings.chat.smarter_analysis = true;
        settings.tags.tenant_name = "team".to_string();

        save_settings(temp.path(), &settings).unwrap();
        let loaded = load_settings(temp.path());

        assert!(loaded.chat.smarter_analysis);
        assert_eq!(loaded.tags.tenant_name, "team");
        assert!(!temp.path().join(".config.toml.tmp").exists());
    }

    #[test]
    #[serial]
    fn test_config_dir_env_override() {
        let temp = tempdir().unwrap();
        std::env::set_var(CONFIG_DIR_ENV, temp.path());
        std::fs::write(temp.path().join("config.toml"), "[tags]\ntenant_name = \"env\"\n")
            .unwrap();

        assert_eq!(config_dir().as_deref(), Some(temp.path()));
        assert_eq!(load_default_settings().tags.tenant_name, "env");

        std::env::remove_var(CONFIG_DIR_ENV);
    }

    #[test]
    #[serial]
    fn test_blank_env_override_is_ignored() {
        std::env::set_var(CONFIG_DIR_ENV, "  ");
        let dir = config_dir();
        std::env::remove_var(CONFIG_DIR_ENV);

        if let Some(dir) = dir {
            assert!(dir.ends_with(APP_DIR));
        }
    }
}
