//! The shared command channel
//!
//! [`ConnectionHandle`] is the one place where the live gateway protocol is
//! bound. The lifecycle manager is its only writer; entities and services
//! only send through it. Every send loads the current binding afresh, so a
//! link that was unbound a moment ago is never used.

use crate::error::{Result, RflinkError, TransportError};
use crate::protocol::Protocol;
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use tracing::debug;

/// Sized wrapper so the trait object can live in an `ArcSwapOption`
struct Binding(Arc<dyn Protocol>);

pub struct ConnectionHandle {
    binding: ArcSwapOption<Binding>,
    wait_for_ack: bool,
}

impl ConnectionHandle {
    pub fn new(wait_for_ack: bool) -> Self {
        Self {
            binding: ArcSwapOption::from(None),
            wait_for_ack,
        }
    }

    pub(crate) fn bind(&self, protocol: Arc<dyn Protocol>) {
        self.binding.store(Some(Arc::new(Binding(protocol))));
    }

    /// Drop the binding, returning the protocol that was bound
    pub(crate) fn unbind(&self) -> Option<Arc<dyn Protocol>> {
        self.binding.swap(None).map(|b| b.0.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.binding.load().is_some()
    }

    pub fn wait_for_ack(&self) -> bool {
        self.wait_for_ack
    }

    /// Send one command through the live link.
    ///
    /// Fails with [`RflinkError::NotConnected`] when nothing is bound. With
    /// `wait_for_ack` the call returns once the gateway has answered;
    /// otherwise as soon as the command is queued.
    pub async fn send(&self, device_id: &str, command: &str) -> Result<()> {
        let binding = self.binding.load_full().ok_or(RflinkError::NotConnected)?;
        debug!(device_id, command, wait_for_ack = self.wait_for_ack, "Sending command");

        let outcome = if self.wait_for_ack {
            binding.0.send_command_ack(device_id, command).await.map(|accepted| {
                if accepted {
                    Ok(())
                } else {
                    Err(RflinkError::CommandRejected {
                        device_id: device_id.to_string(),
                        command: command.to_string(),
                    })
                }
            })
        } else {
            binding.0.send_command(device_id, command).map(Ok)
        };

        match outcome {
            Ok(result) => result,
            Err(TransportError::Timeout(_)) => Err(RflinkError::AckTimeout {
                device_id: device_id.to_string(),
                command: command.to_string(),
            }),
            Err(TransportError::Encode(e)) => Err(RflinkError::InvalidCommand(e.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}
