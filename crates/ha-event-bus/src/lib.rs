//! Event bus with typed pub/sub
//!
//! The bus carries host-wide notifications: state changes written by
//! entities, the host stop signal, and integration events such as
//! RFLink's `button_pressed`. Subscribers get a broadcast receiver per event
//! type; a slow subscriber lags instead of blocking the publisher.

use dashmap::DashMap;
use ha_core::{Context, Event, EventData, EventType};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Default channel capacity for event subscriptions
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// The event bus for publishing and subscribing to events
pub struct EventBus {
    /// Broadcast sender per event type, created on first subscription
    listeners: DashMap<EventType, broadcast::Sender<Event<serde_json::Value>>>,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            listeners: DashMap::new(),
            capacity,
        }
    }

    /// Subscribe to events of a specific type
    pub fn subscribe(
        &self,
        event_type: impl Into<EventType>,
    ) -> broadcast::Receiver<Event<serde_json::Value>> {
        let event_type = event_type.into();
        trace!(event_type = %event_type, "Subscribing to event type");

        self.listeners
            .entry(event_type)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Subscribe to a typed event, receiving deserialized payloads
    pub fn subscribe_typed<T: EventData + serde::de::DeserializeOwned>(
        &self,
    ) -> TypedEventReceiver<T> {
        TypedEventReceiver::new(self.subscribe(T::event_type()))
    }

    /// Fire an event to the subscribers of its type
    pub fn fire(&self, event: Event<serde_json::Value>) {
        debug!(event_type = %event.event_type, "Firing event");

        if let Some(sender) = self.listeners.get(&event.event_type) {
            // A send error only means nobody is listening right now
            let _ = sender.send(event);
        }
    }

    /// Fire an untyped event built from a type string and JSON payload
    pub fn fire_json(
        &self,
        event_type: impl Into<EventType>,
        data: serde_json::Value,
        context: Context,
    ) {
        self.fire(Event::new(event_type, data, context));
    }

    /// Fire a typed event
    pub fn fire_typed<T: EventData + serde::Serialize>(&self, data: T, context: Context) {
        let event = Event::typed(data, context)
            .map(|data| serde_json::to_value(&data).unwrap_or_default());
        self.fire(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A receiver for typed events
pub struct TypedEventReceiver<T> {
    rx: broadcast::Receiver<Event<serde_json::Value>>,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: EventData + serde::de::DeserializeOwned> TypedEventReceiver<T> {
    fn new(rx: broadcast::Receiver<Event<serde_json::Value>>) -> Self {
        Self {
            rx,
            _phantom: std::marker::PhantomData,
        }
    }

    /// Receive the next event whose payload deserializes as `T`
    pub async fn recv(&mut self) -> Result<Event<T>, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if let Ok(data) = serde_json::from_value::<T>(event.data.clone()) {
                return Ok(event.map(|_| data));
            }
        }
    }
}

/// Thread-safe wrapper for EventBus
pub type SharedEventBus = Arc<EventBus>;
