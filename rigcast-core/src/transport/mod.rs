//! Outbound transports.
//!
//! | Module  | Carrier           | Framing                               |
//! |---------|-------------------|---------------------------------------|
//! | `relay` | WebSocket         | one [`RelayWireFrame`] per message    |
//! | `lan`   | UDP datagrams     | chunked [`LanDatagram`]s, reassembled |
//!
//! [`RelayWireFrame`]: crate::wire::RelayWireFrame
//! [`LanDatagram`]: crate::wire::LanDatagram

pub mod lan;
pub mod relay;

pub use lan::{LanReceiver, LanSender};
pub use relay::{DRAIN_POLL_INTERVAL, HIGH_WATER_MARK, InboundText, RelayTransportClient, relay_connect_url};
