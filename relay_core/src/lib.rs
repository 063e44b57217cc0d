//! Relay protocol core.
//!
//! Owns the wire codec, the client/channel registries, the request
//! dispatcher, and the liveness logic for a single relay server. This
//! crate is transport-agnostic: it has no knowledge of sockets. The
//! hosting application (see `relay_server`) feeds it decoded frames and
//! drains `Outbound` values to actually write to the network.

pub mod channel;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod hooks;
pub mod ids;
pub mod registry;
pub mod server;
pub mod wire;

pub use config::RelayConfig;
pub use error::RelayError;
pub use hooks::Hooks;
pub use server::Server;

/// Session-local client identifier. Smallest-unused-first, not stable
/// across restarts or reconnects.
pub type ClientId = u16;

/// Session-local channel identifier. Same allocation discipline as [`ClientId`].
pub type ChannelId = u16;

/// Where an [`Outbound`] frame should be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Write to this client's TCP stream.
    Stream(ClientId),
    /// Write to this client's last-known UDP address, learned via UDPHello.
    Datagram(ClientId),
}

/// A frame the transport layer must deliver, paired with where it goes.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub dest: Destination,
    pub bytes: bytes::Bytes,
}

impl Outbound {
    pub fn stream(client: ClientId, bytes: bytes::Bytes) -> Self {
        Self {
            dest: Destination::Stream(client),
            bytes,
        }
    }

    pub fn datagram(client: ClientId, bytes: bytes::Bytes) -> Self {
        Self {
            dest: Destination::Datagram(client),
            bytes,
        }
    }
}

/// The result of feeding the core one event: zero or more frames to
/// deliver, and the IDs of any clients whose connection must now be torn
/// down (the transport layer drops their write side once these are
/// delivered).
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    pub outbound: Vec<Outbound>,
    pub disconnected: Vec<ClientId>,
}

impl DispatchOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, o: Outbound) {
        self.outbound.push(o);
    }

    /// Marks `client` for disconnection once this outcome's frames are sent.
    pub fn close(mut self, client: ClientId) -> Self {
        self.disconnected.push(client);
        self
    }
}
