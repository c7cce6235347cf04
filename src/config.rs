//! Configuration loading and validation.
//!
//! Values come from an optional TOML file and from the process environment.
//! Environment variables win over the file, so a deployment can keep secrets
//! out of the file entirely.

use crate::error::{ConfigError, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_PLUGINS: &str = "sql_status jira pagerduty";
const DEFAULT_FALLBACK_URL: &str = "http://api.icndb.com/jokes/random";
const DEFAULT_PAGERDUTY_URL: &str = "https://api.pagerduty.com";

/// Jarvis configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Data directory path (holds the user directory database).
    pub data_dir: PathBuf,

    /// Slack credentials and bot identity.
    pub slack: SlackConfig,

    /// Dispatch and receive loop settings.
    pub dispatch: DispatchConfig,

    /// Per-plugin settings. Missing values surface as plugin load errors.
    pub plugins: PluginsConfig,
}

/// Slack credentials.
#[derive(Clone)]
pub struct SlackConfig {
    pub bot_token: String,
    /// App-level token used for Socket Mode.
    pub app_token: String,
    /// Username of the bot, resolved to a user id through the roster.
    pub bot_name: String,
}

impl std::fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackConfig")
            .field("bot_token", &"<redacted>")
            .field("app_token", &"<redacted>")
            .field("bot_name", &self.bot_name)
            .finish()
    }
}

/// Dispatch behavior settings.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Names of the plugins eligible for dispatch.
    pub enabled_plugins: Vec<String>,

    /// Upper bound on concurrently running dispatches.
    pub max_concurrent: usize,

    /// Receive loop polling interval.
    pub poll_interval: Duration,

    /// Timeout applied to every outbound HTTP call.
    pub http_timeout: Duration,

    /// Where filler quotes come from when nothing matches a directed message.
    pub fallback_url: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            enabled_plugins: parse_plugin_list(DEFAULT_PLUGINS),
            max_concurrent: 32,
            poll_interval: Duration::from_millis(250),
            http_timeout: Duration::from_secs(30),
            fallback_url: DEFAULT_FALLBACK_URL.into(),
        }
    }
}

/// Settings consumed by the built-in plugins.
#[derive(Debug, Clone, Default)]
pub struct PluginsConfig {
    pub jira: JiraSettings,
    pub pagerduty: PagerDutySettings,
    pub sql_status: SqlStatusSettings,
}

#[derive(Clone, Default)]
pub struct JiraSettings {
    pub url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for JiraSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JiraSettings")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Clone)]
pub struct PagerDutySettings {
    pub api_key: Option<String>,
    pub api_url: String,
}

impl Default for PagerDutySettings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: DEFAULT_PAGERDUTY_URL.into(),
        }
    }
}

impl std::fmt::Debug for PagerDutySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagerDutySettings")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct SqlStatusSettings {
    /// Overrides the built-in server name pattern.
    pub server_pattern: Option<String>,
    pub port: u16,
}

impl Default for SqlStatusSettings {
    fn default() -> Self {
        Self {
            server_pattern: None,
            port: 1433,
        }
    }
}

// ---------------------------------------------------------------------------
// TOML file shape
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub data_dir: Option<PathBuf>,
    pub slack: FileSlack,
    pub dispatch: FileDispatch,
    pub plugins: FilePlugins,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileSlack {
    pub bot_token: Option<String>,
    pub app_token: Option<String>,
    pub bot_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileDispatch {
    pub plugins: Option<Vec<String>>,
    pub max_concurrent: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub http_timeout_secs: Option<u64>,
    pub fallback_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FilePlugins {
    pub jira: FileJira,
    pub pagerduty: FilePagerDuty,
    pub sql_status: FileSqlStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileJira {
    pub url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FilePagerDuty {
    pub api_key: Option<String>,
    pub api_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileSqlStatus {
    pub server_pattern: Option<String>,
    pub port: Option<u16>,
}

/// Key lookup used during resolution. The real one reads the process environment.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

fn process_env() -> EnvLookup {
    Arc::new(|key| std::env::var(key).ok())
}

impl Config {
    /// Load configuration from the environment only.
    pub fn load() -> Result<Self> {
        let config = Self::resolve(FileConfig::default(), process_env())?;
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load a TOML config file, then apply environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Load {
            path: path.display().to_string(),
            source: Arc::new(source),
        })?;
        let file: FileConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source: Box::new(source),
        })?;

        let config = Self::resolve(file, process_env())?;
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Merge file values with looked-up environment values.
    pub fn resolve(file: FileConfig, env: EnvLookup) -> Result<Self> {
        let lookup = |key: &str| env(key).filter(|value| !value.trim().is_empty());

        let slack = SlackConfig {
            bot_token: required(lookup("SLACK_TOKEN").or(file.slack.bot_token), "SLACK_TOKEN")?,
            app_token: required(
                lookup("SLACK_APP_TOKEN").or(file.slack.app_token),
                "SLACK_APP_TOKEN",
            )?,
            bot_name: required(lookup("SLACK_BOT").or(file.slack.bot_name), "SLACK_BOT")?,
        };

        let defaults = DispatchConfig::default();
        let enabled_plugins = match lookup("PLUGINS") {
            Some(list) => parse_plugin_list(&list),
            None => file.dispatch.plugins.unwrap_or(defaults.enabled_plugins),
        };

        let max_concurrent = parse_number(lookup("JARVIS_MAX_CONCURRENT"), "JARVIS_MAX_CONCURRENT")?
            .or(file.dispatch.max_concurrent)
            .unwrap_or(defaults.max_concurrent);
        if max_concurrent == 0 {
            return Err(ConfigError::Invalid("max_concurrent must be at least 1".into()).into());
        }
        if max_concurrent > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(ConfigError::Invalid(format!(
                "max_concurrent must be at most {}",
                tokio::sync::Semaphore::MAX_PERMITS
            ))
            .into());
        }

        let poll_interval = parse_number(lookup("JARVIS_POLL_INTERVAL_MS"), "JARVIS_POLL_INTERVAL_MS")?
            .or(file.dispatch.poll_interval_ms)
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);
        if poll_interval.is_zero() {
            return Err(ConfigError::Invalid("poll_interval_ms must be at least 1".into()).into());
        }

        let http_timeout =
            parse_number(lookup("JARVIS_HTTP_TIMEOUT_SECS"), "JARVIS_HTTP_TIMEOUT_SECS")?
                .or(file.dispatch.http_timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout);

        let dispatch = DispatchConfig {
            enabled_plugins,
            max_concurrent,
            poll_interval,
            http_timeout,
            fallback_url: lookup("FALLBACK_URL")
                .or(file.dispatch.fallback_url)
                .unwrap_or(defaults.fallback_url),
        };

        let plugins = PluginsConfig {
            jira: JiraSettings {
                url: lookup("JIRA_URL").or(file.plugins.jira.url),
                user: lookup("JIRA_USER").or(file.plugins.jira.user),
                password: lookup("JIRA_PASSWORD").or(file.plugins.jira.password),
            },
            pagerduty: PagerDutySettings {
                api_key: lookup("PD_API_KEY").or(file.plugins.pagerduty.api_key),
                api_url: lookup("PD_API_URL")
                    .or(file.plugins.pagerduty.api_url)
                    .unwrap_or_else(|| DEFAULT_PAGERDUTY_URL.into()),
            },
            sql_status: SqlStatusSettings {
                server_pattern: lookup("SQL_REGEX").or(file.plugins.sql_status.server_pattern),
                port: parse_number(lookup("SQL_PORT"), "SQL_PORT")?
                    .or(file.plugins.sql_status.port)
                    .unwrap_or(1433),
            },
        };

        let data_dir = lookup("JARVIS_DATA_DIR")
            .map(PathBuf::from)
            .or(file.data_dir)
            .unwrap_or_else(|| {
                dirs::data_dir()
                    .map(|d| d.join("jarvis"))
                    .unwrap_or_else(|| PathBuf::from("./data"))
            });

        Ok(Self {
            data_dir,
            slack,
            dispatch,
            plugins,
        })
    }

    fn ensure_data_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir).map_err(|source| ConfigError::Load {
            path: self.data_dir.display().to_string(),
            source: Arc::new(source),
        })?;
        Ok(())
    }

    /// Get the user directory database path.
    pub fn user_db_path(&self) -> PathBuf {
        self.data_dir.join("userdata.db")
    }
}

fn required(value: Option<String>, key: &str) -> Result<String> {
    value.ok_or_else(|| ConfigError::MissingKey(key.into()).into())
}

fn parse_number<T: std::str::FromStr>(value: Option<String>, key: &str) -> Result<Option<T>> {
    value
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| {
                    crate::Error::from(ConfigError::Invalid(format!(
                        "{key} is not a valid number: {raw}"
                    )))
                })
        })
        .transpose()
}

/// Split an enabled-plugin list on whitespace and commas.
pub fn parse_plugin_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
