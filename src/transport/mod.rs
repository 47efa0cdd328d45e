//! Transport module - connections, message I/O, dialing, and bridging.

mod bridge;
mod conn;

pub use bridge::{bridge, BridgeEnd};
pub use conn::{
    read_message, write_message, BoxedConn, Conn, ReplicaDialer, TcpDialer,
    DEFAULT_CONNECT_TIMEOUT,
};
