//! Transport trait and dynamic dispatch companion.

use crate::error::Result;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;

/// A message record as delivered by the transport, before filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessage {
    pub channel: Option<String>,
    pub user: Option<String>,
    pub text: Option<String>,
}

/// One entry from the workspace roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryMember {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Where an outbound message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// The channel the message came from.
    Channel(String),
    /// A private conversation with a user.
    Direct { user_id: String },
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Channel(id) => write!(f, "channel:{}", id),
            Destination::Direct { user_id } => write!(f, "dm:{}", user_id),
        }
    }
}

/// Static trait for chat transports.
/// Use this for type-safe implementations.
pub trait Transport: Send + Sync + 'static {
    /// Unique name for this transport.
    fn name(&self) -> &str;

    /// Open the realtime connection.
    fn connect(&self) -> impl Future<Output = Result<()>> + Send;

    /// Drain the messages received since the last poll.
    fn poll_messages(&self) -> impl Future<Output = Result<Vec<RawMessage>>> + Send;

    /// Send a text message.
    fn send(
        &self,
        destination: &Destination,
        text: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Upload a local file with an accompanying comment.
    fn upload_file(
        &self,
        destination: &Destination,
        path: &Path,
        comment: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Fetch the full workspace roster.
    fn list_directory(&self) -> impl Future<Output = Result<Vec<DirectoryMember>>> + Send;

    /// Graceful shutdown.
    fn shutdown(&self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Dynamic trait for runtime polymorphism.
/// Use this when you need `Arc<dyn TransportDyn>` shared across tasks.
pub trait TransportDyn: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn connect<'a>(&'a self) -> BoxFuture<'a, Result<()>>;

    fn poll_messages<'a>(&'a self) -> BoxFuture<'a, Result<Vec<RawMessage>>>;

    fn send<'a>(&'a self, destination: &'a Destination, text: &'a str) -> BoxFuture<'a, Result<()>>;

    fn upload_file<'a>(
        &'a self,
        destination: &'a Destination,
        path: &'a Path,
        comment: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    fn list_directory<'a>(&'a self) -> BoxFuture<'a, Result<Vec<DirectoryMember>>>;

    fn shutdown<'a>(&'a self) -> BoxFuture<'a, Result<()>>;
}

/// Blanket implementation: any type implementing Transport automatically implements TransportDyn.
impl<T: Transport> TransportDyn for T {
    fn name(&self) -> &str {
        Transport::name(self)
    }

    fn connect<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(Transport::connect(self))
    }

    fn poll_messages<'a>(&'a self) -> BoxFuture<'a, Result<Vec<RawMessage>>> {
        Box::pin(Transport::poll_messages(self))
    }

    fn send<'a>(&'a self, destination: &'a Destination, text: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(Transport::send(self, destination, text))
    }

    fn upload_file<'a>(
        &'a self,
        destination: &'a Destination,
        path: &'a Path,
        comment: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(Transport::upload_file(self, destination, path, comment))
    }

    fn list_directory<'a>(&'a self) -> BoxFuture<'a, Result<Vec<DirectoryMember>>> {
        Box::pin(Transport::list_directory(self))
    }

    fn shutdown<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(Transport::shutdown(self))
    }
}
