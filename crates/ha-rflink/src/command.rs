//! Command execution and signal repetition
//!
//! The first transmission of a command is sent inline so the caller sees
//! its outcome. Remaining repetitions go through a single round-robin
//! queue: each step sends once and, if more are due, goes to the back of
//! the queue. Chains of different entities therefore interleave on the
//! radio instead of one entity holding the air for all of its repeats.
//!
//! Every chain carries a cancellation token. An entity cancels its previous
//! chain when it issues a new command or receives an event, and the whole
//! queue is cancelled on shutdown.

use crate::connection::ConnectionHandle;
use crate::error::{Result, RflinkError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Wire token for a dim level from a 0-255 brightness
pub fn dim_level(brightness: u8) -> u8 {
    brightness / 17
}

/// Brightness represented by a 0-15 dim level
pub fn brightness_for_level(level: u8) -> u8 {
    level.min(15) * 17
}

struct Repetition {
    device_id: String,
    command: String,
    remaining: u32,
    cancel: CancellationToken,
}

pub struct CommandEngine {
    connection: Arc<ConnectionHandle>,
    queue: Mutex<VecDeque<Repetition>>,
    notify: Notify,
    /// Pause between two queued repetition steps
    step_delay: Duration,
    shutdown: CancellationToken,
}

impl CommandEngine {
    pub fn new(connection: Arc<ConnectionHandle>, shutdown: CancellationToken) -> Self {
        Self::with_step_delay(connection, shutdown, Duration::ZERO)
    }

    pub fn with_step_delay(
        connection: Arc<ConnectionHandle>,
        shutdown: CancellationToken,
        step_delay: Duration,
    ) -> Self {
        Self {
            connection,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            step_delay,
            shutdown,
        }
    }

    pub fn connection(&self) -> &Arc<ConnectionHandle> {
        &self.connection
    }

    /// A fresh chain token, cancelled with the engine
    pub fn new_chain(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Send `command` once and queue `repetitions - 1` further sends.
    ///
    /// Errors of the first send are returned and nothing is queued.
    pub async fn execute(
        &self,
        device_id: &str,
        command: &str,
        repetitions: u32,
        chain: CancellationToken,
    ) -> Result<()> {
        self.connection.send(device_id, command).await?;

        if repetitions > 1 && !chain.is_cancelled() {
            debug!(device_id, command, remaining = repetitions - 1, "Queueing repetitions");
            self.queue.lock().push_back(Repetition {
                device_id: device_id.to_string(),
                command: command.to_string(),
                remaining: repetitions - 1,
                cancel: chain,
            });
            self.notify.notify_one();
        }
        Ok(())
    }

    /// Number of chains waiting in the queue
    pub fn pending_chains(&self) -> usize {
        self.queue.lock().len()
    }

    /// Drain the repetition queue until shutdown
    pub async fn run(self: Arc<Self>) {
        loop {
            let next = self.queue.lock().pop_front();
            let Some(mut step) = next else {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = self.notify.notified() => {}
                }
                continue;
            };

            if step.cancel.is_cancelled() {
                debug!(device_id = %step.device_id, "Dropping cancelled repetitions");
                continue;
            }

            match self.connection.send(&step.device_id, &step.command).await {
                Ok(()) => {}
                Err(RflinkError::NotConnected) => {
                    debug!(device_id = %step.device_id, "Not connected, dropping repetitions");
                    continue;
                }
                Err(e) => warn!(
                    device_id = %step.device_id,
                    command = %step.command,
                    error = %e,
                    "Repetition failed"
                ),
            }

            step.remaining -= 1;
            if step.remaining > 0 {
                self.queue.lock().push_back(step);
            }

            if self.step_delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.step_delay) => {}
                }
            }
        }
        self.queue.lock().clear();
        debug!("Repetition queue stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::RecordingProtocol;

    fn engine() -> (Arc<CommandEngine>, Arc<RecordingProtocol>, CancellationToken) {
        let shutdown = CancellationToken::new();
        let connection = Arc::new(ConnectionHandle::new(true));
        let protocol = Arc::new(RecordingProtocol::default());
        connection.bind(protocol.clone());
        let engine = Arc::new(CommandEngine::new(connection, shutdown.clone()));
        tokio::spawn(engine.clone().run());
        (engine, protocol, shutdown)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[test]
    fn test_dim_scaling() {
        assert_eq!(dim_level(255), 15);
        assert_eq!(dim_level(0), 0);
        assert_eq!(dim_level(128), 7);
        assert_eq!(brightness_for_level(7), 119);
        assert_eq!(brightness_for_level(15), 255);
        assert_eq!(brightness_for_level(40), 255);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repetition_count() {
        let (engine, protocol, _shutdown) = engine();
        engine
            .execute("newkaku_0_1", "off", 3, engine.new_chain())
            .await
            .unwrap();
        settle().await;
        assert_eq!(protocol.commands(), vec!["off", "off", "off"]);
        assert_eq!(engine.pending_chains(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chains_alternate() {
        let (engine, protocol, _shutdown) = engine();
        engine.execute("a_0_0", "on", 3, engine.new_chain()).await.unwrap();
        engine.execute("b_0_0", "on", 3, engine.new_chain()).await.unwrap();
        settle().await;

        let devices: Vec<String> = protocol.sent.lock().iter().map(|(d, _)| d.clone()).collect();
        assert_eq!(
            devices,
            vec!["a_0_0", "b_0_0", "a_0_0", "b_0_0", "a_0_0", "b_0_0"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_chain_sends_nothing_more() {
        let (engine, protocol, _shutdown) = engine();
        let first = engine.new_chain();
        engine.execute("a_0_0", "off", 3, first.clone()).await.unwrap();
        first.cancel();
        engine.execute("a_0_0", "on", 2, engine.new_chain()).await.unwrap();
        settle().await;

        assert_eq!(protocol.commands(), vec!["off", "on", "on"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbound_first_send_fails_and_queues_nothing() {
        let (engine, protocol, _shutdown) = engine();
        engine.connection().unbind();
        let result = engine.execute("a_0_0", "on", 5, engine.new_chain()).await;
        assert!(matches!(result, Err(RflinkError::NotConnected)));
        assert_eq!(engine.pending_chains(), 0);
        assert!(protocol.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_ends_chain() {
        let shutdown = CancellationToken::new();
        let connection = Arc::new(ConnectionHandle::new(true));
        let protocol = Arc::new(RecordingProtocol::default());
        connection.bind(protocol.clone());
        let engine = Arc::new(CommandEngine::with_step_delay(
            connection.clone(),
            shutdown.clone(),
            Duration::from_millis(100),
        ));
        tokio::spawn(engine.clone().run());

        engine.execute("a_0_0", "on", 4, engine.new_chain()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        connection.unbind();
        tokio::time::sleep(Duration::from_secs(1)).await;

        // reconnecting later must not resume the dropped chain
        connection.bind(protocol.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(protocol.commands(), vec!["on", "on", "on"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_queue() {
        let (engine, protocol, shutdown) = engine();
        let chain = engine.new_chain();
        shutdown.cancel();
        assert!(chain.is_cancelled());
        engine.execute("a_0_0", "on", 3, chain).await.unwrap();
        settle().await;
        assert_eq!(protocol.commands(), vec!["on"]);
    }
}
