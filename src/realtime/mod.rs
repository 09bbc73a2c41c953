pub mod protocol;
pub mod registry;
pub mod server;

pub use registry::{ConnectionId, ConnectionRegistry};
pub use server::{Delivery, HandshakeError, RealtimeServer};
