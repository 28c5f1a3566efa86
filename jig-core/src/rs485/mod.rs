//! RS-485 framed transport: packet/response encoding (`frame`, L1') layered
//! under half-duplex send/receive with pacing and timeout (`transport`, L2').

pub mod frame;
pub mod transport;

pub use frame::{Address, EncodedPacket};
pub use transport::{Transport, TransportConfig};
