//! Plugin registry and loader.
//!
//! Registration order is dispatch priority. Loading happens per dispatch so a
//! plugin whose settings are missing is skipped for that message only.

use crate::config::PluginsConfig;
use crate::error::{PluginError, Result};
use crate::plugins::{PluginDescriptor, PluginDyn, jira, pagerduty, sql_status};

use anyhow::Context as _;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Shared resources handed to plugin factories.
#[derive(Debug, Clone)]
pub struct PluginContext {
    pub settings: PluginsConfig,
    /// HTTP client with the configured timeout applied.
    pub http: reqwest::Client,
    /// Upper bound for non-HTTP network probes.
    pub timeout: Duration,
}

impl PluginContext {
    pub fn new(settings: PluginsConfig, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build plugin HTTP client")?;

        Ok(Self {
            settings,
            http,
            timeout,
        })
    }
}

/// Builds a handler from the shared context.
pub type PluginFactory = Arc<dyn Fn(&PluginContext) -> Result<Arc<dyn PluginDyn>> + Send + Sync>;

struct Registration {
    descriptor: PluginDescriptor,
    factory: PluginFactory,
}

/// A handler that loaded successfully for the current dispatch.
#[derive(Clone)]
pub struct LoadedPlugin {
    pub descriptor: PluginDescriptor,
    pub handler: Arc<dyn PluginDyn>,
}

impl std::fmt::Debug for LoadedPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedPlugin")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// The set of plugin names eligible for dispatch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnabledPlugins {
    names: HashSet<String>,
}

impl EnabledPlugins {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Ordered table of available plugins.
pub struct PluginRegistry {
    registrations: Vec<Registration>,
    context: PluginContext,
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new(context: PluginContext) -> Self {
        Self {
            registrations: Vec::new(),
            context,
        }
    }

    /// A registry holding the built-in handlers in priority order.
    pub fn builtin(context: PluginContext) -> Result<Self> {
        let mut registry = Self::new(context);

        registry.register(
            sql_status::descriptor(),
            Arc::new(|context: &PluginContext| -> Result<Arc<dyn PluginDyn>> {
                Ok(Arc::new(sql_status::SqlStatusPlugin::from_context(context)?) as Arc<dyn PluginDyn>)
            }),
        )?;
        registry.register(
            jira::descriptor(),
            Arc::new(|context: &PluginContext| -> Result<Arc<dyn PluginDyn>> {
                Ok(Arc::new(jira::JiraPlugin::from_context(context)?) as Arc<dyn PluginDyn>)
            }),
        )?;
        registry.register(
            pagerduty::descriptor(),
            Arc::new(|context: &PluginContext| -> Result<Arc<dyn PluginDyn>> {
                Ok(Arc::new(pagerduty::PagerDutyPlugin::from_context(context)?) as Arc<dyn PluginDyn>)
            }),
        )?;

        Ok(registry)
    }

    /// Append a plugin. Names are unique keys.
    pub fn register(&mut self, descriptor: PluginDescriptor, factory: PluginFactory) -> Result<()> {
        if self
            .registrations
            .iter()
            .any(|existing| existing.descriptor.name == descriptor.name)
        {
            return Err(PluginError::DuplicateName(descriptor.name).into());
        }

        self.registrations.push(Registration { descriptor, factory });
        Ok(())
    }

    /// All descriptors, in dispatch priority order.
    pub fn descriptors(&self) -> impl Iterator<Item = &PluginDescriptor> {
        self.registrations.iter().map(|r| &r.descriptor)
    }

    /// Resolve a descriptor to an invokable handler.
    pub fn load(&self, descriptor: &PluginDescriptor) -> Result<Arc<dyn PluginDyn>> {
        let registration = self
            .registrations
            .iter()
            .find(|r| r.descriptor.name == descriptor.name)
            .ok_or_else(|| PluginError::UnknownPlugin(descriptor.name.clone()))?;

        (registration.factory)(&self.context)
    }

    /// Load every enabled plugin in priority order.
    ///
    /// A plugin that fails to load is logged and left out; the rest still load.
    pub fn enabled(&self, enabled: &EnabledPlugins) -> Vec<LoadedPlugin> {
        self.descriptors()
            .filter(|descriptor| enabled.contains(&descriptor.name))
            .filter_map(|descriptor| match self.load(descriptor) {
                Ok(handler) => Some(LoadedPlugin {
                    descriptor: descriptor.clone(),
                    handler,
                }),
                Err(error) => {
                    tracing::warn!(plugin = %descriptor.name, %error, "plugin failed to load, skipping");
                    None
                }
            })
            .collect()
    }
}
