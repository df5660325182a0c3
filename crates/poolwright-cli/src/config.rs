use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use poolwright_provisioner::EngineConfig;

/// Current config version. Bump this when adding fields or changing shape.
/// Each bump requires a corresponding entry in [`migrate`].
const CURRENT_VERSION: u32 = 1;

pub const API_KEY_ENV: &str = "POOLWRIGHT_API_KEY";
pub const API_SECRET_ENV: &str = "POOLWRIGHT_API_SECRET";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolwrightConfig {
    /// Schema version. Missing or 0 = pre-versioned config.
    #[serde(default)]
    pub config_version: u32,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    /// Compute API base URL, e.g. `https://api-ch-gva-2.exoscale.com/v2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Where the state file lives. Defaults to `poolwright.state.json` in
    /// the working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_path: Option<PathBuf>,
    /// Poll budgets of the engine.
    #[serde(default)]
    pub timeouts: EngineConfig,
}

impl Default for PoolwrightConfig {
    fn default() -> Self {
        Self {
            config_version: CURRENT_VERSION,
            api_key: String::new(),
            api_secret: String::new(),
            endpoint: None,
            state_path: None,
            timeouts: EngineConfig::default(),
        }
    }
}

impl PoolwrightConfig {
    /// Environment credentials win over the file.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            self.api_key = key;
        }
        if let Ok(secret) = std::env::var(API_SECRET_ENV) {
            self.api_secret = secret;
        }
        self
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("poolwright.state.json"))
    }

    /// Credentials needed to talk to the API.
    pub fn credentials(&self) -> eyre::Result<(&str, &str)> {
        if self.api_key.is_empty() || self.api_secret.is_empty() {
            return Err(eyre::eyre!(
                "no API credentials: set {API_KEY_ENV} and {API_SECRET_ENV} or run `poolwright configure`"
            ));
        }
        Ok((&self.api_key, &self.api_secret))
    }
}

/// Redacted config info safe to print.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigInfo {
    pub path: String,
    pub endpoint: Option<String>,
    pub state_path: String,
    pub api_key_hint: Option<String>,
    pub timeouts: EngineConfig,
}

pub fn default_path() -> eyre::Result<PathBuf> {
    let base = dirs::config_dir().ok_or_else(|| eyre::eyre!("no config directory found"))?;
    Ok(base.join("poolwright").join("config.json"))
}

/// Load the config at `path`, or defaults if it does not exist yet.
pub fn load(path: &Path) -> eyre::Result<PoolwrightConfig> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(PoolwrightConfig::default());
        }
        Err(e) => {
            return Err(eyre::eyre!("failed to read config at {}: {e}", path.display()));
        }
    };

    // Parse as raw JSON so we can run migrations before deserializing.
    let json: serde_json::Value = serde_json::from_str(&contents)?;
    let on_disk_version = json
        .get("config_version")
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as u32;

    let migrated = migrate(json, on_disk_version)?;
    let config: PoolwrightConfig = serde_json::from_value(migrated)?;
    Ok(config)
}

/// Run sequential migrations from `from_version` up to [`CURRENT_VERSION`].
fn migrate(mut json: serde_json::Value, from_version: u32) -> eyre::Result<serde_json::Value> {
    if from_version > CURRENT_VERSION {
        return Err(eyre::eyre!(
            "config_version {from_version} is newer than this build supports ({CURRENT_VERSION}). \
             Please update poolwright."
        ));
    }

    let obj = json
        .as_object_mut()
        .ok_or_else(|| eyre::eyre!("config is not a JSON object"))?;

    // v0 → v1: unversioned files already have the v1 shape; only the stamp
    // is added.
    if from_version < 1 {
        tracing::info!("stamped unversioned config as v1");
    }

    obj.insert(
        "config_version".to_string(),
        serde_json::Value::Number(CURRENT_VERSION.into()),
    );
    Ok(json)
}

pub fn save(path: &Path, config: &PoolwrightConfig) -> eyre::Result<()> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }

    // Always write the current version, regardless of what was loaded.
    let mut stamped = config.clone();
    stamped.config_version = CURRENT_VERSION;
    let json = serde_json::to_string_pretty(&stamped)?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json.as_bytes())?;

    // The file holds the API secret.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&tmp_path, path)?;

    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}

pub fn config_info(path: &Path, config: &PoolwrightConfig) -> ConfigInfo {
    ConfigInfo {
        path: path.display().to_string(),
        endpoint: config.endpoint.clone(),
        state_path: config.state_path().display().to_string(),
        api_key_hint: (!config.api_key.is_empty()).then(|| redact_api_key(&config.api_key)),
        timeouts: config.timeouts,
    }
}

fn redact_api_key(key: &str) -> String {
    if key.len() <= 8 || !key.is_ascii() {
        return "****".to_string();
    }
    let prefix = &key[..4];
    let suffix = &key[key.len() - 4..];
    format!("{prefix}...{suffix}")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use poolwright_core::retry::RetryPolicy;

    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir.path().join("config.json")).unwrap();
        assert!(config.api_key.is_empty());
        assert_eq!(config.timeouts, EngineConfig::default());
    }

    #[test]
    fn unversioned_config_is_stamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"api_key": "EXOabcdef123456", "api_secret": "s3cr3t", "timeouts": {"delete": {"max_attempts": 5, "backoff": {"kind": "fixed", "delay_ms": 1000}}}}"#,
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.config_version, 1);
        assert_eq!(config.api_key, "EXOabcdef123456");
        assert_eq!(config.api_secret, "s3cr3t");
        assert_eq!(config.timeouts.delete, RetryPolicy::fixed(Duration::from_secs(1), 5));
        assert_eq!(config.timeouts.create, EngineConfig::default().create);
    }

    #[test]
    fn newer_config_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"config_version": 99}"#).unwrap();
        assert!(load(&path).is_err());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = PoolwrightConfig {
            api_key: "EXOabcdef123456".into(),
            api_secret: "s3cr3t".into(),
            endpoint: Some("https://api-ch-gva-2.exoscale.com/v2".into()),
            ..Default::default()
        };
        save(&path, &config).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.endpoint, config.endpoint);
        assert_eq!(loaded.api_secret, "s3cr3t");
        assert!(!path.with_extension("json.tmp").exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn info_redacts_the_key() {
        let config = PoolwrightConfig {
            api_key: "EXOabcdef123456".into(),
            ..Default::default()
        };
        let info = config_info(Path::new("/tmp/config.json"), &config);
        assert_eq!(info.api_key_hint.as_deref(), Some("EXOa...3456"));
        assert_eq!(redact_api_key("short"), "****");
    }
}
