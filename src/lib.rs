//! Jarvis: a pluggable chat bot that routes Slack messages to command handlers.

pub mod config;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod messaging;
pub mod plugins;
pub mod supervisor;
pub mod tokenizer;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};

/// Whether a message was addressed to the bot or merely overheard.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// The bot's user id appears in the message text.
    Active,
    /// Ambient channel chatter.
    Passive,
}

impl Activation {
    pub fn as_str(self) -> &'static str {
        match self {
            Activation::Active => "active",
            Activation::Passive => "passive",
        }
    }
}

impl std::fmt::Display for Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A classified, tokenized inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: String,
    pub sender: String,
    pub text: String,
    pub tokens: Vec<String>,
    pub activation: Activation,
}

impl Message {
    /// Classify raw text against the bot's user id and tokenize it.
    pub fn classify(
        channel: impl Into<String>,
        sender: impl Into<String>,
        text: impl Into<String>,
        bot_user_id: &str,
    ) -> Self {
        let text = text.into();
        let activation = if !bot_user_id.is_empty() && text.contains(bot_user_id) {
            Activation::Active
        } else {
            Activation::Passive
        };
        let tokens = tokenizer::tokenize(&tokenizer::normalize_for_tokenizing(&text, bot_user_id));

        Self {
            channel: channel.into(),
            sender: sender.into(),
            text,
            tokens,
            activation,
        }
    }

    /// `<@SENDER>` markup for addressing the sender.
    pub fn sender_mention(&self) -> String {
        format!("<@{}>", self.sender)
    }
}
