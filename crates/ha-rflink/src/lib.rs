//! RFLink gateway integration
//!
//! Talks to an RFLink 433 MHz gateway over serial or TCP and exposes the
//! devices it hears as lights, switches, covers, binary sensors and sensors.
//!
//! ```text
//! transport ──events──▶ dispatcher ──▶ entities ──▶ state table
//!     ▲                                   │
//!     └──── connection handle ◀── command engine (repetitions)
//!                 ▲
//!          lifecycle manager (connect, reconnect, availability)
//! ```

pub mod command;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod entity;
pub mod error;
pub mod event;
pub mod host;
pub mod lifecycle;
pub mod platform;
pub mod protocol;
pub mod registry;
pub mod services;
pub mod setup;

pub use command::CommandEngine;
pub use config::{PlatformConfigs, RflinkConfig, RflinkSettings, DOMAIN};
pub use connection::ConnectionHandle;
pub use dispatcher::{DispatchOutcome, Dispatcher, Registration};
pub use entity::{EntityCommand, RflinkEntity, EVENT_BUTTON_PRESSED};
pub use error::{Result, RflinkError, TransportError};
pub use event::{EventKind, RflinkEvent};
pub use host::Host;
pub use lifecycle::{ConnectionState, CONNECTION_TIMEOUT};
pub use protocol::{Connector, Endpoint, GatewayConnector, Link, Protocol};
pub use registry::EntityRegistry;
pub use setup::Rflink;
