//! Chat transports (Slack).

pub mod slack;
pub mod traits;

pub use slack::SlackTransport;
pub use traits::{Destination, DirectoryMember, RawMessage, Transport, TransportDyn};
