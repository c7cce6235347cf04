//! Test doubles shared by unit tests across the crate.

use crate::Activation;
use crate::config::PluginsConfig;
use crate::directory::UserDirectory;
use crate::dispatch::FallbackSource;
use crate::error::{DeliveryError, PluginError, Result, TransportError};
use crate::messaging::{Destination, DirectoryMember, RawMessage, Transport};
use crate::plugins::registry::{PluginContext, PluginFactory};
use crate::plugins::{Plugin, PluginDescriptor, PluginDyn, PluginOutcome, PluginRequest};

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) fn test_context() -> PluginContext {
    PluginContext::new(PluginsConfig::default(), Duration::from_secs(2)).expect("test context")
}

pub(crate) async fn memory_directory() -> UserDirectory {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    let directory = UserDirectory::new(pool);
    directory.initialize().await.expect("schema");
    directory
}

pub(crate) fn descriptor_for(plugin: &ScriptedPlugin) -> PluginDescriptor {
    PluginDescriptor {
        name: plugin.name.clone(),
        activation: plugin.activation,
        purpose: plugin.purpose.clone(),
    }
}

enum PollStep {
    Batch(Vec<RawMessage>),
    Fail,
}

/// One recorded upload: destination, path, comment, whether the file existed.
pub(crate) type RecordedUpload = (Destination, PathBuf, String, bool);

/// Transport that records outbound traffic and replays scripted inbound batches.
#[derive(Default)]
pub(crate) struct MockTransport {
    roster: Vec<DirectoryMember>,
    fail_directory: bool,
    fail_upload: bool,
    polls: Mutex<VecDeque<PollStep>>,
    sent: Mutex<Vec<(Destination, String)>>,
    uploads: Mutex<Vec<RecordedUpload>>,
    directory_calls: AtomicUsize,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_roster(mut self, roster: Vec<DirectoryMember>) -> Self {
        self.roster = roster;
        self
    }

    pub(crate) fn with_failing_directory(mut self) -> Self {
        self.fail_directory = true;
        self
    }

    pub(crate) fn with_failing_upload(mut self) -> Self {
        self.fail_upload = true;
        self
    }

    pub(crate) fn with_batch(self, batch: Vec<RawMessage>) -> Self {
        self.polls
            .lock()
            .expect("poll script lock")
            .push_back(PollStep::Batch(batch));
        self
    }

    pub(crate) fn with_poll_failure(self) -> Self {
        self.polls
            .lock()
            .expect("poll script lock")
            .push_back(PollStep::Fail);
        self
    }

    pub(crate) fn sent(&self) -> Vec<(Destination, String)> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub(crate) fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.lock().expect("uploads lock").clone()
    }

    pub(crate) fn directory_calls(&self) -> usize {
        self.directory_calls.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn poll_messages(&self) -> Result<Vec<RawMessage>> {
        match self.polls.lock().expect("poll script lock").pop_front() {
            Some(PollStep::Batch(batch)) => Ok(batch),
            Some(PollStep::Fail) => Err(TransportError::Read("scripted read failure".into()).into()),
            None => Ok(Vec::new()),
        }
    }

    async fn send(&self, destination: &Destination, text: &str) -> Result<()> {
        self.sent
            .lock()
            .expect("sent lock")
            .push((destination.clone(), text.to_string()));
        Ok(())
    }

    async fn upload_file(&self, destination: &Destination, path: &Path, comment: &str) -> Result<()> {
        self.uploads.lock().expect("uploads lock").push((
            destination.clone(),
            path.to_path_buf(),
            comment.to_string(),
            path.exists(),
        ));
        if self.fail_upload {
            return Err(DeliveryError::Upload("scripted upload failure".into()).into());
        }
        Ok(())
    }

    async fn list_directory(&self) -> Result<Vec<DirectoryMember>> {
        self.directory_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_directory {
            return Err(TransportError::Read("scripted roster failure".into()).into());
        }
        Ok(self.roster.clone())
    }
}

#[derive(Clone)]
enum Behavior {
    Match(PluginOutcome),
    Pass,
    Fail,
}

#[derive(Default)]
struct Counters {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    contacts: Mutex<Vec<Option<String>>>,
}

/// Plugin with a fixed answer. Clones share their call counters.
#[derive(Clone)]
pub(crate) struct ScriptedPlugin {
    name: String,
    activation: Activation,
    purpose: String,
    behavior: Behavior,
    delay: Option<Duration>,
    counters: Arc<Counters>,
}

impl ScriptedPlugin {
    fn build(name: impl Into<String>, activation: Activation, behavior: Behavior) -> Self {
        let name = name.into();
        Self {
            purpose: format!("{name} purpose"),
            name,
            activation,
            behavior,
            delay: None,
            counters: Arc::default(),
        }
    }

    pub(crate) fn matching(
        name: impl Into<String>,
        activation: Activation,
        output: impl Into<String>,
    ) -> Self {
        Self::build(name, activation, Behavior::Match(PluginOutcome::reply(output)))
    }

    pub(crate) fn with_outcome(
        name: impl Into<String>,
        activation: Activation,
        outcome: PluginOutcome,
    ) -> Self {
        Self::build(name, activation, Behavior::Match(outcome))
    }

    pub(crate) fn passing(name: impl Into<String>, activation: Activation) -> Self {
        Self::build(name, activation, Behavior::Pass)
    }

    pub(crate) fn failing(name: impl Into<String>, activation: Activation) -> Self {
        Self::build(name, activation, Behavior::Fail)
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.counters.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous `run` calls observed.
    pub(crate) fn peak_concurrency(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    pub(crate) fn contacts_seen(&self) -> Vec<Option<String>> {
        self.counters.contacts.lock().expect("contacts lock").clone()
    }

    pub(crate) fn factory(&self) -> PluginFactory {
        let plugin = self.clone();
        Arc::new(move |_: &PluginContext| -> Result<Arc<dyn PluginDyn>> {
            Ok(Arc::new(plugin.clone()) as Arc<dyn PluginDyn>)
        })
    }
}

impl Plugin for ScriptedPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn activation(&self) -> Activation {
        self.activation
    }

    fn purpose(&self) -> &str {
        &self.purpose
    }

    async fn run(&self, request: PluginRequest<'_>) -> Result<PluginOutcome> {
        let counters = &self.counters;
        counters.calls.fetch_add(1, Ordering::SeqCst);
        counters
            .contacts
            .lock()
            .expect("contacts lock")
            .push(request.contact.map(str::to_string));

        let running = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        counters.in_flight.fetch_sub(1, Ordering::SeqCst);

        match &self.behavior {
            Behavior::Match(outcome) => Ok(outcome.clone()),
            Behavior::Pass => Ok(PluginOutcome::no_match()),
            Behavior::Fail => Err(PluginError::Failed {
                plugin: self.name.clone(),
                reason: "scripted failure".into(),
            }
            .into()),
        }
    }
}

/// Fallback source with a canned answer.
pub(crate) struct FixedFallback(Option<String>);

impl FixedFallback {
    pub(crate) fn quote(text: impl Into<String>) -> Self {
        Self(Some(text.into()))
    }

    pub(crate) fn failing() -> Self {
        Self(None)
    }
}

#[async_trait]
impl FallbackSource for FixedFallback {
    async fn fetch(&self) -> Result<String> {
        self.0.clone().ok_or_else(|| {
            PluginError::Failed {
                plugin: "fallback".into(),
                reason: "scripted fallback failure".into(),
            }
            .into()
        })
    }
}
