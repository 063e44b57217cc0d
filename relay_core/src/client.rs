//! Per-connection state tracked by the registry.

use std::net::SocketAddr;

use crate::ChannelId;

/// Where a connection sits in the handshake lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// TCP accepted, Connect not yet seen.
    New,
    /// Connect succeeded; the client has a name and may join channels.
    Handshook,
    /// Disconnect in progress; no further requests are serviced.
    Closing,
}

/// Everything the core knows about one connected client.
#[derive(Debug, Clone)]
pub struct ClientEntry {
    pub name: String,
    pub state: ConnState,
    /// Channels this client currently belongs to, in join order.
    pub channels: Vec<ChannelId>,
    /// Learned from UDPHello; `None` until the client's first UDP datagram arrives.
    pub udp_addr: Option<SocketAddr>,
    /// True once a UDPWelcome has been emitted for this client's first UDPHello.
    pub sent_udp_welcome: bool,
    /// Set on receipt of a Ping from the client; cleared each tick after the
    /// server's own Ping is sent.
    pub ponged: bool,
}

impl ClientEntry {
    pub fn new() -> Self {
        Self {
            name: String::new(),
            state: ConnState::New,
            channels: Vec::new(),
            udp_addr: None,
            sent_udp_welcome: false,
            // Starts true so a client isn't disconnected on the very first
            // sweep before it has had a chance to Ping back.
            ponged: true,
        }
    }

    pub fn is_in_channel(&self, channel: ChannelId) -> bool {
        self.channels.contains(&channel)
    }
}

impl Default for ClientEntry {
    fn default() -> Self {
        Self::new()
    }
}
