//! Database server status checks.
//!
//! Answers "what's the status of db-prod-01?" by probing the server's SQL
//! listener and reporting whether it accepts connections.

use crate::Activation;
use crate::error::{PluginError, Result};
use crate::plugins::registry::PluginContext;
use crate::plugins::{Plugin, PluginDescriptor, PluginOutcome, PluginRequest, trim_trailing_punctuation};

use regex::{Regex, RegexBuilder};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

pub const NAME: &str = "sql_status";
pub const PURPOSE: &str = "*Server Status*: Ask `Whats the status of server-102?` to get general SQL \
     health information. You must specify the server using the standard CA format, or an IP address. \
     Currently this plugin only gets data from SQL instances.";

const COMMAND_WORD: &str = "status";

/// Site naming convention (`ab-xxxx-12`) or a dotted IPv4 address.
const DEFAULT_SERVER_PATTERN: &str = r"^(?:[a-z0-9]{2,3}-.{3,9}-[0-9]{1,3}|[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3})$";

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor {
        name: NAME.into(),
        activation: Activation::Active,
        purpose: PURPOSE.into(),
    }
}

pub struct SqlStatusPlugin {
    server_pattern: Regex,
    port: u16,
    timeout: Duration,
}

impl SqlStatusPlugin {
    pub fn from_context(context: &PluginContext) -> Result<Self> {
        let settings = &context.settings.sql_status;
        let pattern = settings
            .server_pattern
            .as_deref()
            .unwrap_or(DEFAULT_SERVER_PATTERN);

        let server_pattern = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|error| PluginError::InvalidConfig {
                plugin: NAME.into(),
                reason: format!("SQL_REGEX is not a valid pattern: {error}"),
            })?;

        Ok(Self {
            server_pattern,
            port: settings.port,
            timeout: context.timeout,
        })
    }

    /// The last token naming a server, if the message asks for a status at all.
    fn find_server(&self, tokens: &[String]) -> Option<String> {
        let lowered: Vec<String> = tokens.iter().map(|t| t.to_lowercase()).collect();
        if !lowered.iter().any(|t| t == COMMAND_WORD) {
            return None;
        }

        lowered
            .iter()
            .map(|token| unwrap_link(token))
            .map(trim_trailing_punctuation)
            .filter(|candidate| self.server_pattern.is_match(candidate))
            .last()
            .map(str::to_string)
    }

    async fn probe(&self, server: &str) -> std::result::Result<Duration, String> {
        let started = Instant::now();
        match tokio::time::timeout(self.timeout, TcpStream::connect((server, self.port))).await {
            Ok(Ok(_stream)) => Ok(started.elapsed()),
            Ok(Err(error)) => Err(error.to_string()),
            Err(_) => Err(format!(
                "connection to {server}:{} timed out after {}s",
                self.port,
                self.timeout.as_secs()
            )),
        }
    }
}

impl Plugin for SqlStatusPlugin {
    fn name(&self) -> &str {
        NAME
    }

    fn activation(&self) -> Activation {
        Activation::Active
    }

    fn purpose(&self) -> &str {
        PURPOSE
    }

    async fn run(&self, request: PluginRequest<'_>) -> Result<PluginOutcome> {
        let Some(server) = self.find_server(request.tokens) else {
            return Ok(PluginOutcome::no_match());
        };

        tracing::debug!(%server, port = self.port, "probing sql server");
        let output = match self.probe(&server).await {
            Ok(elapsed) => format!(
                "*Server Status: {server}* ```{server}:{} is accepting connections ({} ms)```",
                self.port,
                elapsed.as_millis()
            ),
            Err(error) => {
                tracing::info!(%server, %error, "sql server probe failed");
                format!(
                    "Sorry, I ran into an error trying to get the status of that server: ```{error}```"
                )
            }
        };

        Ok(PluginOutcome::reply(output))
    }
}

/// Slack renders links as `<http://host|host>`; keep the display half.
fn unwrap_link(token: &str) -> &str {
    match token.split_once('|') {
        Some((_, display)) if !display.contains('|') => display,
        _ => token,
    }
}
