//! Top-level error types for Jarvis.

use std::sync::Arc;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Process exit status for an error that aborts startup.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Config(_) => 2,
            Error::Transport(TransportError::Connect(_) | TransportError::BotUserNotFound(_)) => 3,
            _ => 1,
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        source: Arc<std::io::Error>,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: Box<toml::de::Error>,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),
}

/// User directory cache errors. Never fatal to a dispatch.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("user directory store failed: {0}")]
    Store(#[from] sqlx::Error),

    #[error("directory lookup failed: {0}")]
    Lookup(String),

    #[error("user {user_id} not found in directory")]
    NotFound { user_id: String },

    #[error("user {user_id} has no contact address")]
    MissingAddress { user_id: String },
}

/// Plugin loading and execution errors.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("plugin {0} is already registered")]
    DuplicateName(String),

    #[error("plugin {plugin} is missing required setting {key}")]
    MissingConfig { plugin: String, key: String },

    #[error("plugin {plugin} has invalid configuration: {reason}")]
    InvalidConfig { plugin: String, reason: String },

    #[error("plugin {plugin} request failed: {source}")]
    Request {
        plugin: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("plugin {plugin} failed: {reason}")]
    Failed { plugin: String, reason: String },
}

/// Outbound delivery errors (send, upload).
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("failed to send message: {0}")]
    Send(String),

    #[error("failed to upload file: {0}")]
    Upload(String),

    #[error("failed to open direct conversation: {0}")]
    OpenDirect(String),
}

/// Transport connection and read errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect transport: {0}")]
    Connect(String),

    #[error("failed to read from transport: {0}")]
    Read(String),

    #[error("bot user {0} not found in roster")]
    BotUserNotFound(String),
}
