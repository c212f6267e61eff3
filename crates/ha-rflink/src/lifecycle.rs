//! Connection lifecycle
//!
//! ```text
//! Disconnected → Connecting → Connected
//!      ↑              │            │
//!      └──────────────┴────────────┘   (failure, timeout, link closed)
//!
//! any state → ShuttingDown (terminal)
//! ```
//!
//! The manager owns the only writer side of the [`ConnectionHandle`]. It
//! binds the live protocol on connect, unbinds it the moment the link goes
//! away and drives entity availability through the [`EntityRegistry`].
//! Connect failures are retried forever at `reconnect_interval`.

use crate::connection::ConnectionHandle;
use crate::event::RflinkEvent;
use crate::protocol::Connector;
use crate::registry::EntityRegistry;
use ha_core::events::HOMEASSISTANT_STOP;
use ha_event_bus::EventBus;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound for a single connect attempt
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    ShuttingDown,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid connection transition from {from:?} to {to:?}: {reason}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub reason: &'static str,
}

impl ConnectionState {
    pub fn try_transition(self, to: ConnectionState) -> Result<ConnectionState, InvalidTransition> {
        use ConnectionState::*;

        let reason = match (self, to) {
            (Disconnected, Connecting) => None,
            (Connecting, Connected) => None,
            (Connecting, Disconnected) => None,
            (Connected, Disconnected) => None,
            (ShuttingDown, _) => Some("ShuttingDown is terminal"),
            (_, ShuttingDown) => None,
            (Disconnected, Connected) => Some("must go through Connecting"),
            (Connected, Connecting) => Some("already connected"),
            _ => Some("invalid connection transition"),
        };

        match reason {
            None => Ok(to),
            Some(reason) => Err(InvalidTransition {
                from: self,
                to,
                reason,
            }),
        }
    }

    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        self.try_transition(to).is_ok()
    }
}

pub struct LifecycleManager {
    connector: Arc<dyn Connector>,
    connection: Arc<ConnectionHandle>,
    registry: Arc<EntityRegistry>,
    events: mpsc::UnboundedSender<RflinkEvent>,
    reconnect_interval: Duration,
    connect_timeout: Duration,
    state: watch::Sender<ConnectionState>,
    attempts: AtomicUsize,
    shutdown: CancellationToken,
}

impl LifecycleManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        connection: Arc<ConnectionHandle>,
        registry: Arc<EntityRegistry>,
        events: mpsc::UnboundedSender<RflinkEvent>,
        reconnect_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            connection,
            registry,
            events,
            reconnect_interval,
            connect_timeout: CONNECTION_TIMEOUT,
            state,
            attempts: AtomicUsize::new(0),
            shutdown,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Connect attempts made so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn transition(&self, to: ConnectionState) {
        self.state.send_if_modified(|state| match state.try_transition(to) {
            Ok(next) => {
                debug!(from = ?*state, to = ?next, "Connection state changed");
                *state = next;
                true
            }
            Err(e) => {
                warn!(error = %e, "Ignoring connection state change");
                false
            }
        });
    }

    /// Connect, wait for the link to drop, reconnect; until shutdown
    pub async fn run(self: Arc<Self>) {
        'outer: while !self.shutdown.is_cancelled() {
            self.transition(ConnectionState::Connecting);
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(attempt, "Connecting to gateway");

            let result = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = tokio::time::timeout(
                    self.connect_timeout,
                    self.connector.connect(self.events.clone()),
                ) => result,
            };

            match result {
                Ok(Ok(link)) => {
                    self.connection.bind(link.protocol.clone());
                    self.transition(ConnectionState::Connected);
                    info!(attempt, "Connected to gateway");
                    self.registry.set_available(true);

                    tokio::select! {
                        _ = self.shutdown.cancelled() => break 'outer,
                        _ = link.closed.cancelled() => {}
                    }

                    self.connection.unbind();
                    link.protocol.close();
                    warn!("Disconnected from gateway");
                }
                Ok(Err(e)) => {
                    error!(attempt, error = %e, "Error connecting to gateway");
                }
                Err(_) => {
                    error!(
                        attempt,
                        timeout_ms = self.connect_timeout.as_millis() as u64,
                        "Connecting to gateway timed out"
                    );
                }
            }

            self.registry.set_available(false);
            self.transition(ConnectionState::Disconnected);

            if self.reconnect_interval.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }
            info!(
                delay_ms = self.reconnect_interval.as_millis() as u64,
                "Reconnecting to gateway"
            );
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.reconnect_interval) => {}
            }
        }

        if let Some(protocol) = self.connection.unbind() {
            protocol.close();
        }
        self.transition(ConnectionState::ShuttingDown);
        info!("Gateway connection shut down");
    }
}

/// Cancel `shutdown` when the host fires its stop event
pub fn listen_for_stop(bus: &EventBus, shutdown: CancellationToken) -> JoinHandle<()> {
    let mut rx = bus.subscribe(HOMEASSISTANT_STOP);
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            received = rx.recv() => {
                if received.is_ok() {
                    info!("Host stopping, closing gateway connection");
                }
                shutdown.cancel();
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::RecordingProtocol;
    use crate::error::TransportError;
    use crate::protocol::Link;
    use async_trait::async_trait;
    use ha_core::Context;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio::time::Instant;
    use ConnectionState::*;

    #[test]
    fn test_valid_transitions() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connecting.can_transition_to(Disconnected));
        assert!(Connected.can_transition_to(Disconnected));
        for from in [Disconnected, Connecting, Connected] {
            assert_eq!(from.try_transition(ShuttingDown), Ok(ShuttingDown));
        }
    }

    #[test]
    fn test_invalid_transitions() {
        let err = Disconnected.try_transition(Connected).unwrap_err();
        assert_eq!(err.reason, "must go through Connecting");
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!ShuttingDown.can_transition_to(Connecting));
        assert!(!ShuttingDown.can_transition_to(ShuttingDown));
    }

    /// Fails while the script says so, then hands out links that stay up
    struct Scripted {
        failures: Mutex<VecDeque<bool>>,
        attempts_at: Mutex<Vec<Instant>>,
        link_closed: Mutex<Option<CancellationToken>>,
    }

    #[async_trait]
    impl Connector for Scripted {
        async fn connect(
            &self,
            _events: mpsc::UnboundedSender<RflinkEvent>,
        ) -> Result<Link, TransportError> {
            self.attempts_at.lock().push(Instant::now());
            if self.failures.lock().pop_front().unwrap_or(false) {
                return Err(TransportError::Closed);
            }
            let closed = CancellationToken::new();
            *self.link_closed.lock() = Some(closed.clone());
            Ok(Link {
                protocol: Arc::new(RecordingProtocol::default()),
                closed,
            })
        }
    }

    fn manager(
        failures: &[bool],
        interval: Duration,
    ) -> (Arc<LifecycleManager>, Arc<Scripted>, CancellationToken) {
        let connector = Arc::new(Scripted {
            failures: Mutex::new(failures.iter().copied().collect()),
            attempts_at: Mutex::new(Vec::new()),
            link_closed: Mutex::new(None),
        });
        let (events, _) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let manager = Arc::new(LifecycleManager::new(
            connector.clone(),
            Arc::new(ConnectionHandle::new(true)),
            Arc::new(EntityRegistry::new()),
            events,
            interval,
            shutdown.clone(),
        ));
        (manager, connector, shutdown)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_spaced_by_interval() {
        let (manager, connector, shutdown) = manager(&[true, true, false], Duration::from_secs(10));
        let task = tokio::spawn(manager.clone().run());

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(manager.attempts(), 3);
        assert_eq!(manager.state(), Connected);
        assert!(manager.connection.is_connected());
        assert!(manager.registry.is_available());

        let at = connector.attempts_at.lock().clone();
        for pair in at.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(10));
        }

        shutdown.cancel();
        task.await.unwrap();
        assert_eq!(manager.state(), ShuttingDown);
        assert!(!manager.connection.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_unbinds_and_reconnects() {
        let (manager, connector, shutdown) = manager(&[], Duration::from_secs(5));
        let mut states = manager.subscribe();
        let task = tokio::spawn(manager.clone().run());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(manager.state(), Connected);

        let closed = connector.link_closed.lock().clone().unwrap();
        closed.cancel();
        states.changed().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(manager.state(), Disconnected);
        assert!(!manager.connection.is_connected());
        assert!(!manager.registry.is_available());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(manager.attempts(), 2);
        assert_eq!(manager.state(), Connected);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_event_cancels_shutdown() {
        let bus = EventBus::new();
        let shutdown = CancellationToken::new();
        let listener = listen_for_stop(&bus, shutdown.clone());

        bus.fire_json(HOMEASSISTANT_STOP, serde_json::json!({}), Context::new());
        listener.await.unwrap();
        assert!(shutdown.is_cancelled());
    }
}
