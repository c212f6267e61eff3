//! Integration setup and teardown
//!
//! [`Rflink`] wires the pieces together and owns their tasks:
//!
//! - the repetition queue of the [`CommandEngine`]
//! - the single dispatch task, fed by the transport and by
//!   `rflink.send_command`
//! - the [`LifecycleManager`]
//! - a listener for the host stop event

use crate::command::CommandEngine;
use crate::config::{PlatformConfigs, RflinkConfig, RflinkSettings, DOMAIN};
use crate::connection::ConnectionHandle;
use crate::dispatcher::Dispatcher;
use crate::entity::{EntityHost, RflinkEntity};
use crate::error::{Result, RflinkError};
use crate::event::RflinkEvent;
use crate::host::Host;
use crate::lifecycle::{listen_for_stop, ConnectionState, LifecycleManager};
use crate::platform::{setup_platforms, PlatformContext};
use crate::protocol::{Connector, GatewayConnector};
use crate::registry::EntityRegistry;
use crate::services::register_services;
use ha_config::HostConfig;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub struct Rflink {
    connection: Arc<ConnectionHandle>,
    dispatcher: Arc<Dispatcher>,
    lifecycle: Arc<LifecycleManager>,
    events: mpsc::UnboundedSender<RflinkEvent>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Rflink {
    /// Set up from the host configuration, connecting to the real gateway
    ///
    /// Returns `None` when there is no `rflink:` section.
    pub fn setup(host: &Host, config: &HostConfig) -> Result<Option<Arc<Self>>> {
        Self::setup_with(host, config, |settings| {
            Arc::new(GatewayConnector::new(settings.endpoint.clone()))
        })
    }

    /// Set up with a connector chosen from the validated settings
    pub fn setup_with<F>(host: &Host, config: &HostConfig, connector: F) -> Result<Option<Arc<Self>>>
    where
        F: FnOnce(&RflinkSettings) -> Arc<dyn Connector>,
    {
        let Some(rflink) = config
            .section::<RflinkConfig>(DOMAIN)
            .map_err(|e| RflinkError::Config(e.to_string()))?
        else {
            debug!("No rflink section, integration not set up");
            return Ok(None);
        };
        let settings = rflink.validate()?;
        let platforms = PlatformConfigs::from_host_config(config)
            .map_err(|e| RflinkError::Config(e.to_string()))?;
        let connector = connector(&settings);
        Self::start(host, settings, &platforms, connector).map(Some)
    }

    /// Build everything and spawn the integration's tasks
    pub fn start(
        host: &Host,
        settings: RflinkSettings,
        platforms: &PlatformConfigs,
        connector: Arc<dyn Connector>,
    ) -> Result<Arc<Self>> {
        let shutdown = CancellationToken::new();
        let connection = Arc::new(ConnectionHandle::new(settings.wait_for_ack));
        let engine = Arc::new(CommandEngine::new(connection.clone(), shutdown.clone()));
        let registry = Arc::new(EntityRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), settings.ignore.clone()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let ctx = PlatformContext {
            host: EntityHost {
                bus: host.bus.clone(),
                states: host.states.clone(),
                engine: engine.clone(),
            },
            dispatcher: dispatcher.clone(),
            restore: host.restore.clone(),
        };
        setup_platforms(&ctx, platforms, settings.automatic_add);
        register_services(&host.services, &registry, connection.clone(), events_tx.clone())
            .map_err(|e| RflinkError::Config(e.to_string()))?;

        let lifecycle = Arc::new(LifecycleManager::new(
            connector,
            connection.clone(),
            registry,
            events_tx.clone(),
            settings.reconnect_interval,
            shutdown.clone(),
        ));

        let tasks = vec![
            tokio::spawn(engine.run()),
            tokio::spawn(run_dispatch(dispatcher.clone(), events_rx, shutdown.clone())),
            tokio::spawn(lifecycle.clone().run()),
            listen_for_stop(&host.bus, shutdown.clone()),
        ];
        info!(endpoint = ?settings.endpoint, wait_for_ack = settings.wait_for_ack, "RFLink set up");

        Ok(Arc::new(Self {
            connection,
            dispatcher,
            lifecycle,
            events: events_tx,
            shutdown,
            tasks: Mutex::new(tasks),
        }))
    }

    pub fn connection(&self) -> &Arc<ConnectionHandle> {
        &self.connection
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.lifecycle.subscribe()
    }

    pub fn connect_attempts(&self) -> usize {
        self.lifecycle.attempts()
    }

    pub fn entity(&self, entity_id: &str) -> Option<Arc<dyn RflinkEntity>> {
        self.dispatcher.registry().get(entity_id)
    }

    /// Queue an event for dispatch, as if it came from the gateway
    pub fn inject(&self, event: RflinkEvent) {
        let _ = self.events.send(event);
    }

    /// Stop reconnecting, close the link and wait for every task
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
        info!("RFLink shut down");
    }
}

async fn run_dispatch(
    dispatcher: Arc<Dispatcher>,
    mut events: mpsc::UnboundedReceiver<RflinkEvent>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => {
                    let outcome = dispatcher.dispatch(&event);
                    debug!(device_id = %event.id, ?outcome, "Dispatched event");
                }
                None => break,
            },
        }
    }
}
