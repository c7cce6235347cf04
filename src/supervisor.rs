//! Receive loop and bounded per-message worker pool.

use crate::Message;
use crate::config::DispatchConfig;
use crate::dispatch::Dispatcher;
use crate::error::{Result, TransportError};
use crate::messaging::{RawMessage, TransportDyn};

use anyhow::Context as _;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::Instrument as _;

/// Find the bot's own user id by matching the configured name against the roster.
pub async fn resolve_bot_user_id(transport: &dyn TransportDyn, bot_name: &str) -> Result<String> {
    let roster = transport.list_directory().await?;

    roster
        .into_iter()
        .find(|member| member.name.as_deref() == Some(bot_name))
        .map(|member| member.id)
        .ok_or_else(|| TransportError::BotUserNotFound(bot_name.to_string()).into())
}

/// Polls the transport and hands each qualifying message to the dispatcher.
pub struct Supervisor {
    transport: Arc<dyn TransportDyn>,
    dispatcher: Arc<Dispatcher>,
    bot_user_id: String,
    poll_interval: Duration,
    permits: Arc<Semaphore>,
}

impl Supervisor {
    pub fn new(
        transport: Arc<dyn TransportDyn>,
        dispatcher: Arc<Dispatcher>,
        bot_user_id: impl Into<String>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            transport,
            dispatcher,
            bot_user_id: bot_user_id.into(),
            poll_interval: config.poll_interval,
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
        }
    }

    /// Run until `shutdown` resolves, then wait for in-flight dispatches.
    pub async fn run(&self, shutdown: impl Future<Output = ()> + Send) -> Result<()> {
        let mut tasks = JoinSet::new();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(
            bot_user_id = %self.bot_user_id,
            max_concurrent = self.permits.available_permits(),
            "receive loop started"
        );

        'receive: loop {
            tokio::select! {
                _ = &mut shutdown => break 'receive,
                _ = ticker.tick() => {}
            }

            reap_finished(&mut tasks);

            let batch = match self.transport.poll_messages().await {
                Ok(batch) => batch,
                Err(error) => {
                    tracing::warn!(%error, "transport read failed, continuing");
                    continue;
                }
            };

            for raw in batch {
                let Some(message) = self.qualify(raw) else {
                    continue;
                };

                // Waiting here is the backpressure: no new task until one finishes.
                let permit = tokio::select! {
                    permit = self.permits.clone().acquire_owned() => {
                        permit.context("dispatch semaphore closed")?
                    }
                    _ = &mut shutdown => break 'receive,
                };

                let span = tracing::info_span!(
                    "dispatch",
                    channel = %message.channel,
                    sender = %message.sender,
                    activation = %message.activation,
                );
                let dispatcher = self.dispatcher.clone();
                let transport = self.transport.clone();

                tasks.spawn(
                    async move {
                        let _permit = permit;
                        match dispatcher.process_message(&message, transport.as_ref()).await {
                            Ok(outcome) => tracing::debug!(?outcome, "message handled"),
                            Err(error) => tracing::warn!(%error, "dispatch failed"),
                        }
                    }
                    .instrument(span),
                );
            }
        }

        tracing::info!(in_flight = tasks.len(), "receive loop stopping, draining dispatches");
        while let Some(result) = tasks.join_next().await {
            log_join_result(result);
        }

        Ok(())
    }

    /// Keep records with a channel, sender and text that the bot didn't send itself.
    fn qualify(&self, raw: RawMessage) -> Option<Message> {
        let (Some(channel), Some(sender), Some(text)) = (raw.channel, raw.user, raw.text) else {
            return None;
        };
        if sender == self.bot_user_id {
            return None;
        }

        Some(Message::classify(channel, sender, text, &self.bot_user_id))
    }
}

fn reap_finished(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.try_join_next() {
        log_join_result(result);
    }
}

fn log_join_result(result: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(error) = result {
        if error.is_panic() {
            tracing::error!(%error, "dispatch task panicked");
        } else {
            tracing::debug!(%error, "dispatch task cancelled");
        }
    }
}
