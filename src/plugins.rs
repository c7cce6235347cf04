//! Command handler plugins.
//!
//! A plugin looks at a tokenized message and either claims it (producing the
//! reply) or passes. The registry decides which plugins are eligible and in
//! what order they get asked; the dispatcher stops at the first claim.
//!
//! Built-in handlers:
//! - `sql_status`: database server reachability (Active)
//! - `jira`: issue key lookups (Passive)
//! - `pagerduty`: on-call schedule queries (Active)

pub mod jira;
pub mod pagerduty;
pub mod registry;
pub mod sql_status;

pub use registry::{EnabledPlugins, LoadedPlugin, PluginRegistry};

use crate::Activation;
use crate::error::Result;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

/// Input handed to a plugin for one message.
#[derive(Debug, Clone, Copy)]
pub struct PluginRequest<'a> {
    pub tokens: &'a [String],
    pub user_id: &'a str,
    /// Resolved contact address of the sender, if the directory knew one.
    pub contact: Option<&'a str>,
}

impl PluginRequest<'_> {
    /// Tokens folded to lowercase, in order.
    pub fn lowercase_tokens(&self) -> Vec<String> {
        self.tokens.iter().map(|t| t.to_lowercase()).collect()
    }
}

/// What a plugin decided about a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginOutcome {
    pub matched: bool,
    pub output: Option<String>,
    /// Reply privately to the sender instead of in the channel.
    pub direct: bool,
    /// Local file to attach. The dispatcher deletes it after the upload attempt.
    pub file: Option<PathBuf>,
}

impl PluginOutcome {
    pub fn no_match() -> Self {
        Self::default()
    }

    pub fn reply(output: impl Into<String>) -> Self {
        Self {
            matched: true,
            output: Some(output.into()),
            ..Self::default()
        }
    }

    pub fn direct(mut self) -> Self {
        self.direct = true;
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }
}

/// Static metadata about a registered plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDescriptor {
    pub name: String,
    pub activation: Activation,
    pub purpose: String,
}

/// Static trait for command handlers.
///
/// Implementations report internal failures as `Err`; the dispatcher logs them
/// and treats the plugin as not matching.
pub trait Plugin: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Which kind of message this plugin listens to.
    fn activation(&self) -> Activation;

    /// Help text shown in help mode.
    fn purpose(&self) -> &str;

    fn run(
        &self,
        request: PluginRequest<'_>,
    ) -> impl Future<Output = Result<PluginOutcome>> + Send;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Dynamic companion of [`Plugin`] for storing heterogeneous handlers.
pub trait PluginDyn: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn activation(&self) -> Activation;

    fn purpose(&self) -> &str;

    fn run<'a>(&'a self, request: PluginRequest<'a>) -> BoxFuture<'a, Result<PluginOutcome>>;
}

impl<T: Plugin> PluginDyn for T {
    fn name(&self) -> &str {
        Plugin::name(self)
    }

    fn activation(&self) -> Activation {
        Plugin::activation(self)
    }

    fn purpose(&self) -> &str {
        Plugin::purpose(self)
    }

    fn run<'a>(&'a self, request: PluginRequest<'a>) -> BoxFuture<'a, Result<PluginOutcome>> {
        Box::pin(Plugin::run(self, request))
    }
}

/// Trim punctuation that commonly trails a word in chat ("OPS-12," or "db-01.").
pub(crate) fn trim_trailing_punctuation(token: &str) -> &str {
    token.trim_end_matches(|c: char| matches!(c, '.' | ',' | ':' | ';' | '!' | ')' | '>'))
}
