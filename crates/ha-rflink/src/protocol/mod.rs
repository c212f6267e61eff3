//! Gateway wire protocol and the byte-stream link that carries it

pub mod packet;
pub mod transport;

pub use packet::{decode, device_id, encode_command, Packet, PacketError};
pub use transport::{
    spawn_link, Connector, Endpoint, GatewayConnector, Link, Protocol, ACK_TIMEOUT, BAUD_RATE,
};
