//! Duplex link to the gateway over a serial port or TCP
//!
//! A [`Connector`] opens the byte stream and returns a [`Link`]: the
//! [`Protocol`] used to send commands, plus a `closed` token that is
//! cancelled when the peer goes away or I/O fails. Inbound device events are
//! pushed into the channel handed to `connect`, in arrival order.

use crate::error::TransportError;
use crate::event::RflinkEvent;
use crate::protocol::packet::{self, Packet};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_serial::SerialPortBuilderExt;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const BAUD_RATE: u32 = 57600;

/// How long a command waits for `OK` / `CMD UNKNOWN`
pub const ACK_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_LINE_LENGTH: usize = 1024;

/// Command interface of a live gateway link
#[async_trait]
pub trait Protocol: Send + Sync {
    /// Send a command and wait for the gateway's verdict: `true` when it was
    /// transmitted, `false` when the gateway did not understand it.
    async fn send_command_ack(&self, device_id: &str, command: &str)
        -> Result<bool, TransportError>;

    /// Queue a command for transmission without waiting
    fn send_command(&self, device_id: &str, command: &str) -> Result<(), TransportError>;

    /// Tear the link down
    fn close(&self);
}

pub struct Link {
    pub protocol: Arc<dyn Protocol>,
    /// Cancelled once the link is gone for any reason
    pub closed: CancellationToken,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        events: mpsc::UnboundedSender<RflinkEvent>,
    ) -> Result<Link, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Serial {
        path: String,
    },
    Tcp {
        host: String,
        port: u16,
        keepalive: Option<Duration>,
    },
}

/// Connector for a real gateway
pub struct GatewayConnector {
    endpoint: Endpoint,
}

impl GatewayConnector {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl Connector for GatewayConnector {
    async fn connect(
        &self,
        events: mpsc::UnboundedSender<RflinkEvent>,
    ) -> Result<Link, TransportError> {
        match &self.endpoint {
            Endpoint::Serial { path } => {
                let serial = tokio_serial::new(path, BAUD_RATE).open_native_async()?;
                info!(port = %path, "Opened serial connection to gateway");
                Ok(spawn_link(serial, events, ACK_TIMEOUT))
            }
            Endpoint::Tcp {
                host,
                port,
                keepalive,
            } => {
                let stream = TcpStream::connect((host.as_str(), *port)).await?;
                stream.set_nodelay(true)?;
                if let Some(idle) = keepalive {
                    let keepalive = socket2::TcpKeepalive::new().with_time(*idle);
                    socket2::SockRef::from(&stream).set_tcp_keepalive(&keepalive)?;
                }
                info!(%host, port, "Opened TCP connection to gateway");
                Ok(spawn_link(stream, events, ACK_TIMEOUT))
            }
        }
    }
}

type PendingAck = Arc<Mutex<Option<oneshot::Sender<bool>>>>;

struct GatewayProtocol {
    outbound: mpsc::UnboundedSender<String>,
    pending: PendingAck,
    /// Only one command may wait for an acknowledgement at a time
    ack_gate: tokio::sync::Mutex<()>,
    closed: CancellationToken,
    ack_timeout: Duration,
}

impl GatewayProtocol {
    fn queue(&self, device_id: &str, command: &str) -> Result<(), TransportError> {
        let line = packet::encode_command(device_id, command)?;
        debug!(%line, "Queueing command");
        // LinesCodec appends the '\n'
        self.outbound
            .send(format!("{line}\r"))
            .map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl Protocol for GatewayProtocol {
    async fn send_command_ack(
        &self,
        device_id: &str,
        command: &str,
    ) -> Result<bool, TransportError> {
        let _gate = self.ack_gate.lock().await;
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }

        let (tx, rx) = oneshot::channel();
        *self.pending.lock() = Some(tx);
        self.queue(device_id, command)?;

        match tokio::time::timeout(self.ack_timeout, rx).await {
            Ok(Ok(accepted)) => Ok(accepted),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.pending.lock().take();
                Err(TransportError::Timeout(self.ack_timeout))
            }
        }
    }

    fn send_command(&self, device_id: &str, command: &str) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        self.queue(device_id, command)
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

/// Run the reader and writer tasks for an open byte stream
pub fn spawn_link<S>(
    io: S,
    events: mpsc::UnboundedSender<RflinkEvent>,
    ack_timeout: Duration,
) -> Link
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let closed = CancellationToken::new();
    let pending: PendingAck = Arc::new(Mutex::new(None));
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let (mut sink, mut stream) =
        Framed::new(io, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)).split();

    let writer_closed = closed.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_closed.cancelled() => break,
                line = outbound_rx.recv() => {
                    let Some(line) = line else { break };
                    if let Err(e) = sink.send(line).await {
                        warn!(error = %e, "Writing to gateway failed");
                        writer_closed.cancel();
                        break;
                    }
                }
            }
        }
    });

    let reader_closed = closed.clone();
    let reader_pending = pending.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = reader_closed.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(line)) => handle_line(&line, &reader_pending, &events),
                    Some(Err(e)) => {
                        warn!(error = %e, "Reading from gateway failed");
                        break;
                    }
                    None => {
                        warn!("Gateway closed the connection");
                        break;
                    }
                }
            }
        }
        reader_closed.cancel();
        // Wakes a waiting sender with `Closed`
        reader_pending.lock().take();
    });

    Link {
        protocol: Arc::new(GatewayProtocol {
            outbound,
            pending,
            ack_gate: tokio::sync::Mutex::new(()),
            closed: closed.clone(),
            ack_timeout,
        }),
        closed,
    }
}

fn handle_line(line: &str, pending: &PendingAck, events: &mpsc::UnboundedSender<RflinkEvent>) {
    let packet = match packet::decode(line) {
        Ok(packet) => packet,
        Err(e) => {
            debug!(error = %e, "Dropping line");
            return;
        }
    };

    match packet {
        Packet::Ack | Packet::Nack => {
            let accepted = packet == Packet::Ack;
            match pending.lock().take() {
                Some(waiter) => {
                    let _ = waiter.send(accepted);
                }
                None => debug!(accepted, "Response without a waiting command"),
            }
        }
        Packet::Banner(banner) => info!(%banner, "Gateway ready"),
        Packet::Pong | Packet::Other(_) => debug!(%line, "Gateway status"),
        Packet::Device { .. } => {
            for event in packet.events() {
                if events.send(event).is_err() {
                    debug!("Event receiver gone");
                    return;
                }
            }
        }
    }
}
