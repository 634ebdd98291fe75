//! Configuration loading and validation.
//!
//! Settings resolve in three layers, later layers winning:
//! 1. compiled defaults
//! 2. `~/.telegate/config.toml` (a commented template is written on first run)
//! 3. `TELEGATE_*` environment variables, plus the legacy names the original
//!    deployment scripts export (`TELEGRAM_TOKEN`, `ADMIN_USER_ID`,
//!    `LANGGRAPH_URL`, `LANGSMITH_API_KEY`)

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Default agent deployment URL, the local dev server.
const DEFAULT_AGENT_URL: &str = "http://127.0.0.1:2024";

/// Default seconds between background interrupt sweeps.
const DEFAULT_POLL_SECS: u64 = 120;

/// Runtime settings for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Telegram bot token from @BotFather.
    pub telegram_token: String,

    /// Numeric Telegram user id allowed to talk to the bot. Zero means
    /// unset; nobody is authorized until this is configured.
    pub admin_user_id: u64,

    /// Base URL of the agent deployment.
    pub agent_url: String,

    /// Optional bearer token for the agent API.
    pub api_key: Option<String>,

    /// Where the JSON state file lives.
    pub state_file: PathBuf,

    /// Seconds between background interrupt sweeps. Zero disables the
    /// poller; `/check` still works.
    pub polling_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            telegram_token: String::new(),
            admin_user_id: 0,
            agent_url: DEFAULT_AGENT_URL.to_string(),
            api_key: None,
            state_file: telegate_home().join("state.json"),
            polling_interval_secs: DEFAULT_POLL_SECS,
        }
    }
}

impl Settings {
    /// Check that everything needed to start is present. Problems are
    /// collected so a fresh install sees them all at once.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.telegram_token.is_empty() {
            problems.push("telegram_token is not set (get one from @BotFather)");
        }
        if self.admin_user_id == 0 {
            problems.push("admin_user_id is not set (your numeric Telegram user id)");
        }
        if !problems.is_empty() {
            return Err(Error::Config(problems.join("; ")));
        }
        if self.agent_url == DEFAULT_AGENT_URL {
            warn!("agent_url is the default {DEFAULT_AGENT_URL}; point it at your deployment if that is not intended");
        }
        Ok(())
    }
}

/// Home directory for config, state, and logs. `TELEGATE_HOME` overrides
/// the default `~/.telegate`.
pub fn telegate_home() -> PathBuf {
    if let Ok(home) = std::env::var("TELEGATE_HOME") {
        return PathBuf::from(home);
    }
    match dirs::home_dir() {
        Some(home) => home.join(".telegate"),
        None => PathBuf::from(".telegate"),
    }
}

/// Load settings. With no override path, reads `~/.telegate/config.toml`,
/// writing a commented template first when the file does not exist yet.
pub fn load(path_override: Option<&Path>) -> Result<Settings> {
    let config_path = match path_override {
        Some(path) => path.to_path_buf(),
        None => telegate_home().join("config.toml"),
    };
    if path_override.is_none() && !config_path.exists() {
        write_template(&config_path)?;
    }

    let cfg = config::Config::builder()
        .add_source(config::File::from(config_path.clone()).required(false))
        .add_source(
            config::Environment::with_prefix("TELEGATE")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| Error::Config(e.to_string()))?;

    let mut settings: Settings = cfg
        .try_deserialize()
        .map_err(|e| Error::Config(format!("{}: {e}", config_path.display())))?;
    apply_legacy_env(&mut settings)?;
    Ok(settings)
}

/// Overlay the environment variable names the original deployment used.
fn apply_legacy_env(settings: &mut Settings) -> Result<()> {
    if let Ok(token) = std::env::var("TELEGRAM_TOKEN") {
        if !token.is_empty() {
            settings.telegram_token = token;
        }
    }
    if let Ok(raw) = std::env::var("ADMIN_USER_ID") {
        if !raw.is_empty() {
            settings.admin_user_id = raw
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("ADMIN_USER_ID is not a numeric user id: {raw}")))?;
        }
    }
    if let Ok(url) = std::env::var("LANGGRAPH_URL") {
        if !url.is_empty() {
            settings.agent_url = url;
        }
    }
    if let Ok(key) = std::env::var("LANGSMITH_API_KEY") {
        if !key.is_empty() {
            settings.api_key = Some(key);
        }
    }
    Ok(())
}

/// Write the first-run config template with every setting commented out.
fn write_template(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let template = format!(
        r#"# telegate configuration
#
# Environment variables override this file: TELEGATE_TELEGRAM_TOKEN,
# TELEGATE_ADMIN_USER_ID, TELEGATE_AGENT_URL, TELEGATE_API_KEY,
# TELEGATE_STATE_FILE, TELEGATE_POLLING_INTERVAL_SECS.
# The legacy names TELEGRAM_TOKEN, ADMIN_USER_ID, LANGGRAPH_URL and
# LANGSMITH_API_KEY are honored too.

# Bot token from @BotFather (required)
#telegram_token = "123456:ABC-DEF"

# Your numeric Telegram user id (required); message @userinfobot to find it
#admin_user_id = 123456789

# Agent deployment to poll for interrupts
#agent_url = "{DEFAULT_AGENT_URL}"

# Bearer token for the agent API, if the deployment needs one
#api_key = ""

# Where interrupt and conversation state is kept
#state_file = "~/.telegate/state.json"

# Seconds between background sweeps; 0 disables polling (use /check)
#polling_interval_secs = {DEFAULT_POLL_SECS}
"#
    );
    fs::write(path, template)?;
    info!("Wrote config template to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.agent_url, DEFAULT_AGENT_URL);
        assert_eq!(settings.polling_interval_secs, 120);
        assert!(settings.telegram_token.is_empty());
        assert_eq!(settings.admin_user_id, 0);
        assert!(settings.api_key.is_none());
    }

    #[test]
    fn test_validate_reports_all_missing_fields() {
        let err = Settings::default().validate().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("telegram_token"));
        assert!(msg.contains("admin_user_id"));
    }

    #[test]
    fn test_validate_accepts_complete_settings() {
        let settings = Settings {
            telegram_token: "123456:ABC".to_string(),
            admin_user_id: 42,
            ..Settings::default()
        };
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_reads_toml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "telegram_token = \"tok\"\nadmin_user_id = 7\nagent_url = \"http://agent:2024\"\npolling_interval_secs = 30\n",
        )
        .unwrap();

        let settings = load(Some(&path)).unwrap();
        assert_eq!(settings.telegram_token, "tok");
        assert_eq!(settings.admin_user_id, 7);
        assert_eq!(settings.agent_url, "http://agent:2024");
        assert_eq!(settings.polling_interval_secs, 30);
        // Unlisted keys keep their defaults.
        assert_eq!(settings.state_file, telegate_home().join("state.json"));
    }

    #[test]
    fn test_write_template_is_fully_commented() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        write_template(&path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("#telegram_token"));
        // Every non-blank line is a comment, so the template parses as empty.
        assert!(contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .all(|l| l.trim_start().starts_with('#')));
    }

    #[test]
    fn test_template_examples_deserialize_into_settings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        write_template(&path).unwrap();

        // Setting lines are commented as `#key = value` with no space, prose
        // as `# text`. Uncommenting the setting lines must yield TOML that
        // deserializes straight into Settings, so a user who uncomments and
        // edits the template always starts from a valid file.
        let contents = fs::read_to_string(&path).unwrap();
        let uncommented: String = contents
            .lines()
            .filter_map(|l| l.strip_prefix('#'))
            .filter(|l| l.starts_with(|c: char| c.is_ascii_lowercase()))
            .map(|l| format!("{l}\n"))
            .collect();

        let settings: Settings = toml::from_str(&uncommented).unwrap();
        assert_eq!(settings.telegram_token, "123456:ABC-DEF");
        assert_eq!(settings.admin_user_id, 123456789);
        assert_eq!(settings.agent_url, DEFAULT_AGENT_URL);
        assert_eq!(settings.api_key.as_deref(), Some(""));
        assert_eq!(settings.polling_interval_secs, DEFAULT_POLL_SECS);
    }
}
