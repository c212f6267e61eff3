//! Shared fixtures for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use ha_config::HostConfig;
use ha_rflink::{Connector, Host, Link, Protocol, Rflink, RflinkEvent, TransportError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type Sent = Arc<Mutex<Vec<(String, String)>>>;

struct MockProtocol {
    sent: Sent,
    closed: CancellationToken,
}

#[async_trait]
impl Protocol for MockProtocol {
    async fn send_command_ack(&self, device_id: &str, command: &str) -> Result<bool, TransportError> {
        self.send_command(device_id, command)?;
        Ok(true)
    }

    fn send_command(&self, device_id: &str, command: &str) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.sent
            .lock()
            .push((device_id.to_string(), command.to_string()));
        Ok(())
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

/// Scripted gateway: fails connects per the failure list, records sends
pub struct MockConnector {
    failures: Mutex<VecDeque<bool>>,
    attempts: AtomicUsize,
    sent: Sent,
    events: Mutex<Option<mpsc::UnboundedSender<RflinkEvent>>>,
    closed: Mutex<Option<CancellationToken>>,
}

impl MockConnector {
    pub fn new(failures: &[bool]) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(failures.iter().copied().collect()),
            attempts: AtomicUsize::new(0),
            sent: Arc::new(Mutex::new(Vec::new())),
            events: Mutex::new(None),
            closed: Mutex::new(None),
        })
    }

    /// Replace the outcomes of the next connect attempts
    pub fn set_failures(&self, failures: &[bool]) {
        *self.failures.lock() = failures.iter().copied().collect();
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(_, c)| c.clone()).collect()
    }

    /// Deliver an event as if the gateway had received it
    pub fn inject(&self, event: RflinkEvent) {
        if let Some(events) = self.events.lock().as_ref() {
            events.send(event).unwrap();
        } else {
            panic!("inject before connect");
        }
    }

    /// Drop the current link from the gateway side
    pub fn disconnect(&self) {
        if let Some(closed) = self.closed.lock().take() {
            closed.cancel();
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, events: mpsc::UnboundedSender<RflinkEvent>) -> Result<Link, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failures.lock().pop_front().unwrap_or(false) {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }

        let closed = CancellationToken::new();
        *self.events.lock() = Some(events);
        *self.closed.lock() = Some(closed.clone());
        Ok(Link {
            protocol: Arc::new(MockProtocol {
                sent: self.sent.clone(),
                closed: closed.clone(),
            }),
            closed,
        })
    }
}

pub fn host_config(yaml: &str) -> HostConfig {
    HostConfig::from_value(serde_yaml::from_str(yaml).unwrap())
}

/// Set up the integration against a mock gateway and let it connect
pub async fn start(yaml: &str, connector: &Arc<MockConnector>) -> (Host, Arc<Rflink>) {
    start_with_host(Host::new(), yaml, connector).await
}

pub async fn start_with_host(
    host: Host,
    yaml: &str,
    connector: &Arc<MockConnector>,
) -> (Host, Arc<Rflink>) {
    let connector = connector.clone();
    let rflink = Rflink::setup_with(&host, &host_config(yaml), move |_| connector as Arc<dyn Connector>)
        .unwrap()
        .unwrap();
    settle().await;
    (host, rflink)
}

/// Let spawned tasks run; tests use paused time
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}
