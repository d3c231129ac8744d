//! The connection manager: one socket, its state machine, and the
//! subscription tables fed by it.

use std::sync::{Arc, Mutex};

use alertdesk_shared::Envelope;
use futures_channel::mpsc::{unbounded, UnboundedSender};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use url::Url;

use super::connection::{ConnectionState, ReconnectPolicy};
use super::lock;
use super::observers::{ErrorHandler, Notifier, StateHandler, Unsubscribe};
use super::router::{MessageHandler, MessageRouter};
use super::transport::{Connector, Transport, TransportError, TungsteniteConnector};
use crate::config::RealtimeConfig;
use crate::credentials::{validate_token, CredentialProvider};
use crate::error::{ClientError, ConfigError};

/// Handle to the realtime connection.
///
/// Construct one at startup and clone it into every consumer. All clones
/// share the same socket, state and subscriptions.
///
/// Handlers and observers run synchronously on whichever task delivered the
/// event (the connection task for inbound frames, the caller for API calls).
/// They must not block.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

pub struct ConnectionManagerBuilder {
    config: RealtimeConfig,
    credentials: Box<dyn CredentialProvider>,
    connector: Arc<dyn Connector>,
}

impl ConnectionManagerBuilder {
    /// Replace the socket implementation.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    /// Build the manager on the current tokio runtime.
    pub fn build(self) -> Result<ConnectionManager, ConfigError> {
        let runtime = Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;
        let policy = ReconnectPolicy::new(self.config.reconnect.clone());

        Ok(ConnectionManager {
            inner: Arc::new(Inner {
                config: self.config,
                credentials: self.credentials,
                connector: self.connector,
                runtime,
                router: MessageRouter::new(),
                notifier: Arc::new(Notifier::default()),
                core: Mutex::new(Core {
                    state: ConnectionState::Disconnected,
                    auto_reconnect: true,
                    policy,
                    generation: 0,
                    live: None,
                    pending_retry: None,
                }),
            }),
        })
    }
}

impl ConnectionManager {
    pub fn builder(
        config: RealtimeConfig,
        credentials: impl CredentialProvider + 'static,
    ) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            config,
            credentials: Box::new(credentials),
            connector: Arc::new(TungsteniteConnector),
        }
    }

    /// Manager using the tokio-tungstenite connector.
    pub fn new(
        config: RealtimeConfig,
        credentials: impl CredentialProvider + 'static,
    ) -> Result<Self, ConfigError> {
        Self::builder(config, credentials).build()
    }

    /// Open the connection.
    ///
    /// No-op while `Connecting` or `Connected`. From any other state this is
    /// a fresh start: auto-reconnect is re-enabled, the retry count resets and
    /// a pending backoff timer is cancelled.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Close the connection and stop reconnecting until the next `connect()`.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Send `{type: kind, data}` if connected; otherwise the message is
    /// dropped and a `NotConnected` error is reported.
    pub fn send<T: Serialize + ?Sized>(&self, kind: &str, data: &T) {
        self.inner.send(kind, data);
    }

    pub fn subscribe(&self, kind: impl Into<String>, handler: MessageHandler) {
        self.inner.router.subscribe(kind, handler);
    }

    /// Returns `false` if `handler` was not registered for `kind`.
    pub fn unsubscribe(&self, kind: &str, handler: &MessageHandler) -> bool {
        self.inner.router.unsubscribe(kind, handler)
    }

    /// Route an envelope to its subscribers as if it had arrived on the socket.
    pub fn dispatch(&self, envelope: &Envelope) {
        self.inner.dispatch(envelope);
        self.inner.notifier.flush();
    }

    /// Observe state changes. `handler` is called once right away with the
    /// current state, ahead of any later transition. When registered from
    /// inside another observer, that first call follows the notices already
    /// queued.
    pub fn on_state_change<F>(&self, handler: F) -> Unsubscribe
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let handler: StateHandler = Arc::new(handler);
        let id = {
            let core = lock(&self.inner.core);
            let id = self.inner.notifier.add_state(handler.clone());
            self.inner.notifier.enqueue_state_to(core.state, handler);
            id
        };
        self.inner.notifier.flush();
        Unsubscribe::state(&self.inner.notifier, id)
    }

    /// Observe errors raised from now on.
    pub fn on_error<F>(&self, handler: F) -> Unsubscribe
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        let handler: ErrorHandler = Arc::new(handler);
        let id = self.inner.notifier.add_error(handler);
        Unsubscribe::error(&self.inner.notifier, id)
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.core).state
    }

    /// Retries made since the last successful connection.
    pub fn attempt(&self) -> u32 {
        lock(&self.inner.core).policy.attempt()
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.inner.set_auto_reconnect(enabled);
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.inner.config.socket_url().as_str())
            .field("state", &self.state())
            .finish()
    }
}

struct Inner {
    config: RealtimeConfig,
    credentials: Box<dyn CredentialProvider>,
    connector: Arc<dyn Connector>,
    runtime: Handle,
    router: MessageRouter,
    notifier: Arc<Notifier>,
    core: Mutex<Core>,
}

/// Everything guarded by the state lock.
struct Core {
    state: ConnectionState,
    auto_reconnect: bool,
    policy: ReconnectPolicy,
    /// Bumped on every open and on `disconnect()`. Tasks carry the value they
    /// were started with and go inert once it is stale.
    generation: u64,
    live: Option<LiveConnection>,
    pending_retry: Option<JoinHandle<()>>,
}

/// Dropping this stops the connection task and closes the socket.
struct LiveConnection {
    outbound: UnboundedSender<String>,
    _shutdown: oneshot::Sender<()>,
}

impl Inner {
    fn connect(self: &Arc<Self>) {
        {
            let mut core = lock(&self.core);
            if matches!(
                core.state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                crate::log_debug!("connect() ignored while {}", core.state);
                return;
            }
            core.auto_reconnect = true;
            core.policy.reset();
            if let Some(timer) = core.pending_retry.take() {
                timer.abort();
            }
            self.open(&mut core);
        }
        self.notifier.flush();
    }

    /// Fetch a credential and start a connection task.
    fn open(self: &Arc<Self>, core: &mut Core) {
        let token = match validate_token(self.credentials.token()) {
            Ok(token) => token,
            Err(reason) => {
                self.report(ClientError::Auth(reason.to_string()));
                if core.state == ConnectionState::Reconnecting {
                    self.transition(core, ConnectionState::Disconnected);
                }
                return;
            }
        };

        let url = self.config.authenticated_url(&token);
        core.generation += 1;
        let generation = core.generation;
        self.transition(core, ConnectionState::Connecting);
        crate::log_info!(
            "connecting to {} (attempt {})",
            self.config.socket_url(),
            core.policy.attempt()
        );

        let inner = Arc::clone(self);
        self.runtime.spawn(async move {
            inner.run_connection(generation, url).await;
        });
    }

    async fn run_connection(self: Arc<Self>, generation: u64, url: Url) {
        let Transport {
            mut outbound,
            mut inbound,
        } = match self.connector.open(&url).await {
            Ok(transport) => transport,
            Err(e) => {
                self.handle_close(generation, Some(e));
                return;
            }
        };

        let (outbound_tx, mut outbound_rx) = unbounded::<String>();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let superseded = {
            let mut core = lock(&self.core);
            if core.generation != generation {
                true
            } else {
                core.live = Some(LiveConnection {
                    outbound: outbound_tx,
                    _shutdown: shutdown_tx,
                });
                core.policy.reset();
                self.transition(&mut core, ConnectionState::Connected);
                false
            }
        };
        if superseded {
            crate::log_debug!("discarding socket opened for a superseded attempt");
            let _ = outbound.close().await;
            return;
        }
        self.notifier.flush();

        let mut cause = None;
        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown_rx => {
                    crate::log_info!("closing socket");
                    let _ = outbound.close().await;
                    return;
                }
                Some(text) = outbound_rx.next() => {
                    if let Err(e) = outbound.send(text).await {
                        cause = Some(e);
                        break;
                    }
                }
                frame = inbound.next() => match frame {
                    Some(Ok(text)) => {
                        self.handle_frame(generation, &text);
                    }
                    Some(Err(e)) => {
                        self.report(ClientError::Transport(e.to_string()));
                        self.notifier.flush();
                    }
                    None => break,
                },
            }
        }

        let _ = outbound.close().await;
        self.handle_close(generation, cause);
    }

    fn handle_frame(&self, generation: u64, text: &str) {
        if lock(&self.core).generation != generation {
            crate::log_debug!("dropping frame from a closed connection");
            return;
        }
        match Envelope::decode(text) {
            Ok(envelope) => {
                crate::log_debug!("received `{}`", envelope.kind);
                self.dispatch(&envelope);
            }
            Err(e) => self.report(ClientError::Decode(e.to_string())),
        }
        self.notifier.flush();
    }

    fn dispatch(&self, envelope: &Envelope) {
        for failure in self.router.dispatch(envelope) {
            self.report(failure);
        }
    }

    /// The socket for `generation` is gone, or never opened.
    fn handle_close(self: &Arc<Self>, generation: u64, cause: Option<TransportError>) {
        {
            let mut core = lock(&self.core);
            if core.generation != generation {
                crate::log_debug!("ignoring close of a superseded connection");
                return;
            }
            if let Some(e) = cause {
                self.report(ClientError::Transport(e.to_string()));
            }
            core.live = None;
            self.transition(&mut core, ConnectionState::Disconnected);

            if !core.auto_reconnect {
                crate::log_info!("auto-reconnect disabled, staying disconnected");
            } else if core.policy.has_budget() {
                self.schedule_retry(&mut core);
            } else {
                crate::log_warn!(
                    "giving up after {} reconnect attempts",
                    core.policy.attempt()
                );
                self.transition(&mut core, ConnectionState::Failed);
            }
        }
        self.notifier.flush();
    }

    fn schedule_retry(self: &Arc<Self>, core: &mut Core) {
        let delay = core.policy.next_delay();
        let generation = core.generation;
        self.transition(core, ConnectionState::Reconnecting);
        crate::log_info!(
            "reconnecting in {}ms (attempt {} of {})",
            delay.as_millis(),
            core.policy.attempt() + 1,
            core.policy.max_attempts()
        );

        let inner = Arc::clone(self);
        core.pending_retry = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            inner.retry_due(generation);
        }));
    }

    fn retry_due(self: &Arc<Self>, generation: u64) {
        {
            let mut core = lock(&self.core);
            if core.generation != generation
                || core.state != ConnectionState::Reconnecting
                || !core.auto_reconnect
            {
                crate::log_debug!("dropping stale reconnect timer");
                return;
            }
            core.pending_retry = None;
            core.policy.begin_retry();
            self.open(&mut core);
        }
        self.notifier.flush();
    }

    fn disconnect(&self) {
        {
            let mut core = lock(&self.core);
            core.auto_reconnect = false;
            if let Some(timer) = core.pending_retry.take() {
                timer.abort();
                crate::log_debug!("cancelled pending reconnect");
            }
            core.generation += 1;
            core.live = None;
            if !matches!(
                core.state,
                ConnectionState::Disconnected | ConnectionState::Failed
            ) {
                self.transition(&mut core, ConnectionState::Disconnected);
            }
        }
        self.notifier.flush();
    }

    fn set_auto_reconnect(&self, enabled: bool) {
        {
            let mut core = lock(&self.core);
            core.auto_reconnect = enabled;
            if !enabled {
                if let Some(timer) = core.pending_retry.take() {
                    timer.abort();
                }
                if core.state == ConnectionState::Reconnecting {
                    self.transition(&mut core, ConnectionState::Disconnected);
                }
            }
        }
        self.notifier.flush();
    }

    fn send<T: Serialize + ?Sized>(&self, kind: &str, data: &T) {
        let frame = Envelope::new(kind, data).and_then(|envelope| envelope.encode());
        {
            let core = lock(&self.core);
            match (&core.live, core.state) {
                (Some(live), ConnectionState::Connected) => match frame {
                    Ok(text) => {
                        if live.outbound.unbounded_send(text).is_err() {
                            self.report(ClientError::Transport(
                                "connection task has stopped".to_string(),
                            ));
                        } else {
                            crate::log_debug!("queued `{}` for sending", kind);
                        }
                    }
                    Err(e) => self.report(ClientError::Encode {
                        kind: kind.to_string(),
                        reason: e.to_string(),
                    }),
                },
                (_, state) => self.report(ClientError::NotConnected {
                    kind: kind.to_string(),
                    state,
                }),
            }
        }
        self.notifier.flush();
    }

    fn transition(&self, core: &mut Core, next: ConnectionState) {
        if core.state == next {
            return;
        }
        crate::log_info!("connection state {} -> {}", core.state, next);
        core.state = next;
        self.notifier.enqueue_state(next);
    }

    /// Log and queue an error; delivered on the next flush.
    fn report(&self, error: ClientError) {
        crate::log_warn!("{}", error);
        self.notifier.enqueue_error(error);
    }
}
