//! Slack transport using slack-morphism.
//!
//! **Inbound**: Socket Mode push events are converted to [`RawMessage`]s and
//! buffered until the receive loop polls them. Only messages a person wrote are
//! kept. Edits, deletes, joins and bot posts are ignored.
//!
//! **Outbound**: plain text (chunked), file uploads through the external upload
//! flow, and direct messages via `conversations.open`.

use crate::error::{DeliveryError, TransportError};
use crate::messaging::traits::{Destination, DirectoryMember, RawMessage, Transport};

use slack_morphism::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, mpsc};

const MAX_MESSAGE_LEN: usize = 12_000;
const ROSTER_PAGE_SIZE: u16 = 200;
const UPLOAD_TITLE: &str = "Attachment";

/// State shared with socket mode callbacks via `SlackClientEventsUserState`.
struct SlackListenerState {
    inbound_tx: mpsc::Sender<RawMessage>,
}

/// Slack transport.
pub struct SlackTransport {
    app_token: String,
    /// Shared HTTP client for REST calls. The socket listener gets its own.
    client: Arc<SlackHyperClient>,
    token: SlackApiToken,
    inbound_rx: Mutex<Option<mpsc::Receiver<RawMessage>>>,
    shutdown_tx: RwLock<Option<mpsc::Sender<()>>>,
    /// user id → DM channel id, filled lazily by `conversations.open`.
    direct_channels: RwLock<HashMap<String, SlackChannelId>>,
}

impl SlackTransport {
    pub fn new(bot_token: impl Into<String>, app_token: impl Into<String>) -> crate::Result<Self> {
        let connector = SlackClientHyperConnector::new()
            .map_err(|error| TransportError::Connect(format!("failed to create slack HTTP connector: {error}")))?;
        let token = SlackApiToken::new(SlackApiTokenValue(bot_token.into()));

        Ok(Self {
            app_token: app_token.into(),
            client: Arc::new(SlackClient::new(connector)),
            token,
            inbound_rx: Mutex::new(None),
            shutdown_tx: RwLock::new(None),
            direct_channels: RwLock::new(HashMap::new()),
        })
    }

    /// Open a session against the cached client using the cached bot token.
    fn session(&self) -> SlackClientSession<'_, SlackClientHyperHttpsConnector> {
        self.client.open_session(&self.token)
    }

    async fn resolve_channel(&self, destination: &Destination) -> crate::Result<SlackChannelId> {
        let user_id = match destination {
            Destination::Channel(id) => return Ok(SlackChannelId(id.clone())),
            Destination::Direct { user_id } => user_id,
        };

        if let Some(channel) = self.direct_channels.read().await.get(user_id) {
            return Ok(channel.clone());
        }

        let request = SlackApiConversationsOpenRequest::new()
            .with_users(vec![SlackUserId(user_id.clone())]);
        let response = self
            .session()
            .conversations_open(&request)
            .await
            .map_err(|error| DeliveryError::OpenDirect(error.to_string()))?;

        let channel = response.channel.id;
        self.direct_channels
            .write()
            .await
            .insert(user_id.clone(), channel.clone());
        Ok(channel)
    }
}

// ---------------------------------------------------------------------------
// Inbound event handlers (slack-morphism takes fn pointers)
// ---------------------------------------------------------------------------

async fn handle_push_event(
    event: SlackPushEventCallback,
    _client: Arc<SlackHyperClient>,
    states: SlackClientEventsUserState,
) -> UserCallbackResult<()> {
    let SlackEventCallbackBody::Message(message) = event.event else {
        return Ok(());
    };

    let Some(raw) = raw_message(message) else {
        return Ok(());
    };

    let state_guard = states.read().await;
    let Some(state) = state_guard.get_user_state::<Arc<SlackListenerState>>() else {
        tracing::warn!("slack listener state missing, dropping event");
        return Ok(());
    };

    if let Err(error) = state.inbound_tx.send(raw).await {
        tracing::warn!(%error, "failed to buffer inbound slack message");
    }

    Ok(())
}

/// Convert a message event, keeping only subtypes a person authored.
fn raw_message(message: SlackMessageEvent) -> Option<RawMessage> {
    if !is_user_authored(message.subtype.as_ref()) {
        tracing::trace!(subtype = ?message.subtype, "ignoring non-user message event");
        return None;
    }

    Some(RawMessage {
        channel: message.origin.channel.map(|c| c.0),
        user: message.sender.user.map(|u| u.0),
        text: message.content.and_then(|c| c.text),
    })
}

/// Plain messages, attachments, `/me` and thread broadcasts. Edits, deletes,
/// joins and bot posts are not.
fn is_user_authored(subtype: Option<&SlackMessageEventType>) -> bool {
    matches!(
        subtype,
        None | Some(
            SlackMessageEventType::FileShare
                | SlackMessageEventType::ThreadBroadcast
                | SlackMessageEventType::MeMessage
        )
    )
}

fn slack_error_handler(
    err: Box<dyn std::error::Error + Send + Sync>,
    _client: Arc<SlackHyperClient>,
    _states: SlackClientEventsUserState,
) -> HttpStatusCode {
    tracing::warn!(error = %err, "slack socket mode error");
    HttpStatusCode::OK
}

// ---------------------------------------------------------------------------
// Transport trait impl
// ---------------------------------------------------------------------------

impl Transport for SlackTransport {
    fn name(&self) -> &str {
        "slack"
    }

    async fn connect(&self) -> crate::Result<()> {
        let auth = self
            .session()
            .auth_test()
            .await
            .map_err(|error| TransportError::Connect(format!("auth.test failed: {error}")))?;
        tracing::info!(bot_user_id = %auth.user_id.0, "slack credentials accepted");

        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let listener_state = Arc::new(SlackListenerState { inbound_tx });
        let callbacks = SlackSocketModeListenerCallbacks::new().with_push_events(handle_push_event);

        // The socket mode listener owns a persistent WebSocket connection, so
        // it gets its own client. `self.client` stays for REST calls.
        let listener_client = Arc::new(SlackClient::new(
            SlackClientHyperConnector::new()
                .map_err(|error| TransportError::Connect(error.to_string()))?,
        ));
        let listener_environment = Arc::new(
            SlackClientEventsListenerEnvironment::new(listener_client)
                .with_error_handler(slack_error_handler)
                .with_user_state(listener_state),
        );
        let listener = SlackClientSocketModeListener::new(
            &SlackClientSocketModeConfig::new(),
            listener_environment,
            callbacks,
        );

        let app_token = SlackApiToken::new(SlackApiTokenValue(self.app_token.clone()));
        listener
            .listen_for(&app_token)
            .await
            .map_err(|error| TransportError::Connect(format!("socket mode: {error}")))?;
        tracing::info!("slack socket mode connected");

        *self.inbound_rx.lock().await = Some(inbound_rx);
        *self.shutdown_tx.write().await = Some(shutdown_tx);

        tokio::spawn(async move {
            tokio::select! {
                exit_code = listener.serve() => {
                    tracing::info!(exit_code, "slack socket mode listener stopped");
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("slack socket mode shutting down");
                    listener.shutdown().await;
                }
            }
        });

        Ok(())
    }

    async fn poll_messages(&self) -> crate::Result<Vec<RawMessage>> {
        let mut guard = self.inbound_rx.lock().await;
        let Some(receiver) = guard.as_mut() else {
            return Err(TransportError::Read("slack transport is not connected".into()).into());
        };

        let mut batch = Vec::new();
        loop {
            match receiver.try_recv() {
                Ok(message) => batch.push(message),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    if batch.is_empty() {
                        return Err(TransportError::Read(
                            "slack socket mode listener has stopped".into(),
                        )
                        .into());
                    }
                    break;
                }
            }
        }

        Ok(batch)
    }

    async fn send(&self, destination: &Destination, text: &str) -> crate::Result<()> {
        let channel_id = self.resolve_channel(destination).await?;
        let session = self.session();

        for chunk in split_message(text, MAX_MESSAGE_LEN) {
            let request = SlackApiChatPostMessageRequest::new(
                channel_id.clone(),
                SlackMessageContent::new().with_text(chunk),
            );
            session
                .chat_post_message(&request)
                .await
                .map_err(|error| DeliveryError::Send(error.to_string()))?;
        }

        Ok(())
    }

    async fn upload_file(
        &self,
        destination: &Destination,
        path: &Path,
        comment: &str,
    ) -> crate::Result<()> {
        let channel_id = self.resolve_channel(destination).await?;
        let data = tokio::fs::read(path).await.map_err(|error| {
            DeliveryError::Upload(format!("failed to read {}: {error}", path.display()))
        })?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| UPLOAD_TITLE.into());
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string();

        let session = self.session();
        let upload_url = session
            .get_upload_url_external(&SlackApiFilesGetUploadUrlExternalRequest::new(
                filename,
                data.len(),
            ))
            .await
            .map_err(|error| DeliveryError::Upload(format!("get upload url: {error}")))?;

        session
            .files_upload_via_url(&SlackApiFilesUploadViaUrlRequest::new(
                upload_url.upload_url,
                data,
                mime_type,
            ))
            .await
            .map_err(|error| DeliveryError::Upload(format!("upload: {error}")))?;

        let file = SlackApiFilesComplete::new(upload_url.file_id).with_title(UPLOAD_TITLE.into());
        let complete = SlackApiFilesCompleteUploadExternalRequest::new(vec![file])
            .with_channel_id(channel_id)
            .with_initial_comment(comment.to_string());
        session
            .files_complete_upload_external(&complete)
            .await
            .map_err(|error| DeliveryError::Upload(format!("complete upload: {error}")))?;

        Ok(())
    }

    async fn list_directory(&self) -> crate::Result<Vec<DirectoryMember>> {
        let session = self.session();
        let mut members = Vec::new();
        let mut cursor: Option<SlackCursorId> = None;

        loop {
            let request = SlackApiUsersListRequest::new()
                .with_limit(ROSTER_PAGE_SIZE)
                .opt_cursor(cursor.take());
            let response = session
                .users_list(&request)
                .await
                .map_err(|error| TransportError::Read(format!("users.list failed: {error}")))?;

            members.extend(response.members.iter().map(directory_member));

            cursor = response
                .response_metadata
                .and_then(|metadata| metadata.next_cursor)
                .filter(|next| !next.0.is_empty());
            if cursor.is_none() {
                break;
            }
        }

        tracing::debug!(count = members.len(), "fetched slack roster");
        Ok(members)
    }

    async fn shutdown(&self) -> crate::Result<()> {
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(()).await;
        }
        tracing::info!("slack transport shut down");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

fn directory_member(user: &SlackUser) -> DirectoryMember {
    DirectoryMember {
        id: user.id.0.clone(),
        name: user.name.clone(),
        email: user
            .profile
            .as_ref()
            .and_then(|profile| profile.email.as_ref())
            .map(|email| email.0.clone()),
    }
}

/// Split a message into UTF-8-safe chunks at line/word boundaries.
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = text;

    while !remaining.is_empty() {
        if remaining.len() <= max_len {
            chunks.push(remaining.to_string());
            break;
        }

        let mut safe_max = max_len;
        while !remaining.is_char_boundary(safe_max) {
            safe_max -= 1;
        }

        let split_at = remaining[..safe_max]
            .rfind('\n')
            .or_else(|| remaining[..safe_max].rfind(' '))
            .filter(|index| *index > 0)
            .unwrap_or(safe_max);

        chunks.push(remaining[..split_at].to_string());
        remaining = remaining[split_at..].trim_start();
    }

    chunks
}
