use crate::credentials::CredentialGuard;
use crate::errors::{AppError, AppResult};
use crate::models::{Comment, CommentRouting, ConnectionState, Notice, OutboundComment};
use crate::redaction::redact_secrets;
use crate::store::{ActivityStore, StoreEvent};
use async_trait::async_trait;
use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

pub const JOIN_GROUP: &str = "AddToGroup";
pub const LEAVE_GROUP: &str = "RemoveFromGroup";
pub const SEND_COMMENT: &str = "SendComment";
pub const RECEIVE_COMMENT: &str = "ReceiveComment";
pub const BROADCAST: &str = "Send";

pub type TokenFuture = Pin<Box<dyn Future<Output = Option<String>> + Send>>;
/// Called by the transport before every outbound frame.
pub type TokenFactory = Arc<dyn Fn() -> TokenFuture + Send + Sync>;

/// Connection state as reported by the transport itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub event: String,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait HubConnection: Send + Sync {
    fn state(&self) -> HubState;
    async fn invoke(&self, method: &str, args: Vec<serde_json::Value>) -> anyhow::Result<()>;
    async fn stop(&self) -> anyhow::Result<()>;
}

pub struct HubLink {
    pub connection: Arc<dyn HubConnection>,
    pub inbound: mpsc::Receiver<InboundFrame>,
}

/// The real-time substrate. It owns reconnection and frame authentication;
/// the manager only drives join/leave and dispatch.
#[async_trait]
pub trait HubTransport: Send + Sync {
    async fn connect(&self, url: &str, token_factory: TokenFactory) -> anyhow::Result<HubLink>;
}

struct ActiveChannel {
    connection: Arc<dyn HubConnection>,
    activity_id: String,
    dispatcher: JoinHandle<()>,
}

/// Owns at most one live channel, bound to the activity being viewed.
#[derive(Clone)]
pub struct LiveChannelManager {
    store: ActivityStore,
    transport: Arc<dyn HubTransport>,
    credentials: CredentialGuard,
    hub_url: String,
    routing: CommentRouting,
    active: Arc<Mutex<Option<ActiveChannel>>>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl LiveChannelManager {
    pub fn new(
        store: ActivityStore,
        transport: Arc<dyn HubTransport>,
        credentials: CredentialGuard,
        hub_url: &str,
        routing: CommentRouting,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            store,
            transport,
            credentials,
            hub_url: hub_url.to_string(),
            routing,
            active: Arc::new(Mutex::new(None)),
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Transport-level state, including `Reconnecting`.
    pub async fn hub_state(&self) -> HubState {
        match self.active.lock().await.as_ref() {
            Some(channel) => channel.connection.state(),
            None => HubState::Disconnected,
        }
    }

    pub async fn bound_activity(&self) -> Option<String> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|channel| channel.activity_id.clone())
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_replace(next);
        tracing::debug!(state = next.as_str(), "live channel state changed");
        self.store.emit(StoreEvent::ConnectionChanged(next));
    }

    fn token_factory(&self) -> TokenFactory {
        let credentials = self.credentials.clone();
        Arc::new(move || -> TokenFuture {
            let credentials = credentials.clone();
            Box::pin(async move { credentials.valid_token().await })
        })
    }

    /// Opens a channel for `activity_id`, tearing down any existing one first.
    pub async fn connect(&self, activity_id: &str) -> AppResult<()> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            self.teardown(previous).await;
        }

        self.set_state(ConnectionState::Connecting);

        if self.credentials.valid_token().await.is_none() {
            self.set_state(ConnectionState::Disconnected);
            self.store
                .emit(StoreEvent::Notice(Notice::error("Problem connecting to the chat")));
            return Err(AppError::AuthExpired(
                "cannot open live channel without a valid token".to_string(),
            ));
        }

        let link = match self.transport.connect(&self.hub_url, self.token_factory()).await {
            Ok(link) => link,
            Err(error) => {
                let message = redact_secrets(&error.to_string());
                tracing::warn!(
                    activity_id = %activity_id,
                    error = %message,
                    "error establishing live channel"
                );
                self.set_state(ConnectionState::Disconnected);
                return Err(AppError::Transport(message));
            }
        };

        let connection = link.connection;
        let hub_state = connection.state();
        if hub_state != HubState::Connected {
            tracing::warn!(
                activity_id = %activity_id,
                state = ?hub_state,
                "live channel did not reach connected"
            );
            if let Err(error) = connection.stop().await {
                let message = redact_secrets(&error.to_string());
                tracing::warn!(error = %message, "failed to stop live channel");
            }
            self.set_state(ConnectionState::Disconnected);
            return Err(AppError::Transport(format!(
                "live channel for activity {} did not connect (hub state {:?})",
                activity_id, hub_state
            )));
        }
        if let Err(error) = connection.invoke(JOIN_GROUP, vec![json!(activity_id)]).await {
            tracing::warn!(
                activity_id = %activity_id,
                error = %redact_secrets(&error.to_string()),
                "failed to join activity group"
            );
        }

        let dispatcher = tokio::spawn(dispatch_loop(
            self.store.clone(),
            self.routing,
            activity_id.to_string(),
            link.inbound,
        ));

        *active = Some(ActiveChannel {
            connection,
            activity_id: activity_id.to_string(),
            dispatcher,
        });
        self.set_state(ConnectionState::Connected);
        tracing::info!(activity_id = %activity_id, "live channel connected");
        Ok(())
    }

    /// Leaves the group (best effort) and stops the channel. A no-op when no
    /// channel is open.
    pub async fn disconnect(&self) -> AppResult<()> {
        let mut active = self.active.lock().await;
        match active.take() {
            Some(channel) => {
                self.teardown(channel).await;
                Ok(())
            }
            None => {
                tracing::debug!("disconnect requested without an open live channel");
                Ok(())
            }
        }
    }

    async fn teardown(&self, channel: ActiveChannel) {
        let group = self
            .store
            .selected_id()
            .await
            .unwrap_or_else(|| channel.activity_id.clone());
        if let Err(error) = channel.connection.invoke(LEAVE_GROUP, vec![json!(group)]).await {
            tracing::warn!(
                activity_id = %group,
                error = %redact_secrets(&error.to_string()),
                "failed to leave activity group"
            );
        }
        if let Err(error) = channel.connection.stop().await {
            let message = redact_secrets(&error.to_string());
            tracing::warn!(error = %message, "failed to stop live channel");
        }
        channel.dispatcher.abort();
        self.set_state(ConnectionState::Disconnected);
        tracing::info!(activity_id = %channel.activity_id, "live channel stopped");
    }

    /// Sends a comment for the selected activity. Not retried on failure.
    pub async fn send_comment(&self, body: &str) -> AppResult<()> {
        let connection = {
            let active = self.active.lock().await;
            match active.as_ref() {
                Some(channel) if channel.connection.state() == HubState::Connected => {
                    channel.connection.clone()
                }
                _ => {
                    return Err(AppError::Precondition("live channel is not connected".to_string()));
                }
            }
        };
        let activity_id = self
            .store
            .selected_id()
            .await
            .ok_or_else(|| AppError::Precondition("no activity selected".to_string()))?;

        let payload = serde_json::to_value(OutboundComment {
            activity_id: activity_id.clone(),
            body: body.to_string(),
        })?;
        if let Err(error) = connection.invoke(SEND_COMMENT, vec![payload]).await {
            let message = redact_secrets(&error.to_string());
            tracing::warn!(activity_id = %activity_id, error = %message, "failed to send comment");
            return Err(AppError::Transport(message));
        }
        Ok(())
    }
}

async fn dispatch_loop(
    store: ActivityStore,
    routing: CommentRouting,
    bound_activity: String,
    mut inbound: mpsc::Receiver<InboundFrame>,
) {
    while let Some(frame) = inbound.recv().await {
        dispatch_frame(&store, routing, &bound_activity, frame).await;
    }
    tracing::debug!(activity_id = %bound_activity, "live channel inbound stream closed");
}

async fn dispatch_frame(
    store: &ActivityStore,
    routing: CommentRouting,
    bound_activity: &str,
    frame: InboundFrame,
) {
    match frame.event.as_str() {
        RECEIVE_COMMENT => {
            let comment: Comment = match serde_json::from_value(frame.payload) {
                Ok(comment) => comment,
                Err(error) => {
                    tracing::warn!(error = %error, "dropping malformed comment frame");
                    return;
                }
            };
            let applied = match routing {
                CommentRouting::SelectedAtDispatch => {
                    store.append_comment_to_selected(comment).await.is_some()
                }
                CommentRouting::BoundActivity => {
                    store.append_comment(bound_activity, comment).await
                }
            };
            if !applied {
                tracing::debug!(
                    activity_id = %bound_activity,
                    "no cached activity to receive comment"
                );
            }
        }
        BROADCAST => {
            tracing::info!(message = %frame.payload, "live channel broadcast");
        }
        other => {
            tracing::debug!(event = %other, "ignoring unhandled live channel event");
        }
    }
}
