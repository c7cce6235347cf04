//! Message dispatch: help mode, plugin selection, response assembly.
//!
//! Each call handles one classified message end to end and sends at most one
//! reply. Plugins are asked in registry order and the first claim wins.

pub mod fallback;

pub use fallback::{FallbackSource, QuoteSource};

use crate::directory::UserDirectory;
use crate::error::Result;
use crate::messaging::{Destination, TransportDyn};
use crate::plugins::{EnabledPlugins, LoadedPlugin, PluginOutcome, PluginRegistry, PluginRequest};
use crate::{Activation, Message};

use std::path::Path;
use std::sync::Arc;

/// Header line of the help reply.
pub const HELP_HEADER: &str = "*Here is a list of my current capabilities:*";

const HELP_KEYWORD: &str = "help";

/// How a dispatched message was answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Help listing was sent.
    Help,
    /// A plugin claimed the message and its reply was delivered.
    Matched { plugin: String },
    /// Nothing matched a directed message; filler was sent.
    Fallback,
    /// Nothing matched an ambient message; nothing was sent.
    Silent,
}

/// Routes classified messages to plugins.
pub struct Dispatcher {
    registry: Arc<PluginRegistry>,
    enabled: EnabledPlugins,
    directory: Arc<UserDirectory>,
    fallback: Arc<dyn FallbackSource>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<PluginRegistry>,
        enabled: EnabledPlugins,
        directory: Arc<UserDirectory>,
        fallback: Arc<dyn FallbackSource>,
    ) -> Self {
        Self {
            registry,
            enabled,
            directory,
            fallback,
        }
    }

    /// Handle one message.
    ///
    /// Errors returned here are delivery failures; plugin and directory
    /// failures are logged and absorbed.
    pub async fn process_message(
        &self,
        message: &Message,
        transport: &dyn TransportDyn,
    ) -> Result<DispatchOutcome> {
        let contact = self.directory.resolve(&message.sender, transport).await;
        let plugins = self.registry.enabled(&self.enabled);
        let prefix = format!("{}: ", message.sender_mention());
        let origin = Destination::Channel(message.channel.clone());

        if is_help_request(message) {
            let mut response = format!("{prefix}{HELP_HEADER}");
            for plugin in &plugins {
                response.push_str("\n\n");
                response.push_str(plugin.handler.purpose());
            }
            transport.send(&origin, &response).await?;
            return Ok(DispatchOutcome::Help);
        }

        let request = PluginRequest {
            tokens: &message.tokens,
            user_id: &message.sender,
            contact: contact.as_deref(),
        };

        if let Some((plugin, outcome)) = first_match(&plugins, message.activation, request).await {
            let text = format!("{prefix}{}", outcome.output.as_deref().unwrap_or_default());
            let destination = if outcome.direct {
                Destination::Direct {
                    user_id: message.sender.clone(),
                }
            } else {
                origin
            };

            match &outcome.file {
                Some(path) => deliver_with_file(transport, &destination, path, &text).await?,
                None => transport.send(&destination, &text).await?,
            }

            tracing::info!(plugin = %plugin, %destination, "plugin reply delivered");
            return Ok(DispatchOutcome::Matched { plugin });
        }

        match message.activation {
            Activation::Active => {
                let quote = match self.fallback.fetch().await {
                    Ok(quote) => Some(quote),
                    Err(error) => {
                        tracing::warn!(%error, "fallback source failed");
                        None
                    }
                };
                transport
                    .send(&origin, &fallback::fallback_text(quote.as_deref()))
                    .await?;
                Ok(DispatchOutcome::Fallback)
            }
            Activation::Passive => Ok(DispatchOutcome::Silent),
        }
    }
}

fn is_help_request(message: &Message) -> bool {
    message.activation == Activation::Active
        && message.tokens.last().is_some_and(|token| token == HELP_KEYWORD)
}

/// Ask each plugin of the right activation kind, in order, until one claims.
async fn first_match(
    plugins: &[LoadedPlugin],
    activation: Activation,
    request: PluginRequest<'_>,
) -> Option<(String, PluginOutcome)> {
    for plugin in plugins
        .iter()
        .filter(|plugin| plugin.handler.activation() == activation)
    {
        let name = plugin.handler.name().to_string();
        match plugin.handler.run(request).await {
            Ok(outcome) if outcome.matched => return Some((name, outcome)),
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(plugin = %name, %error, "plugin failed, treating as no match");
            }
        }
    }
    None
}

/// Upload the attachment, always remove the local file, then send the text.
async fn deliver_with_file(
    transport: &dyn TransportDyn,
    destination: &Destination,
    path: &Path,
    text: &str,
) -> Result<()> {
    let upload = transport.upload_file(destination, path, text).await;

    if let Err(error) = tokio::fs::remove_file(path).await {
        tracing::warn!(path = %path.display(), %error, "failed to remove attachment");
    }

    upload?;
    transport.send(destination, text).await
}
