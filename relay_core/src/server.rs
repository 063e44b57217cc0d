//! The relay core façade.
//!
//! `Server` owns the client and channel registries and the hook table. It
//! has no knowledge of sockets: the hosting application (see
//! `relay_server::runtime`) owns the actual TCP/UDP I/O and calls into
//! `Server` to decode frames and drain `Outbound` values, matching the
//! single-actor-task model the teacher's `GameServer` uses for its own
//! tick loop.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::channel::ChannelRegistry;
use crate::config::RelayConfig;
use crate::hooks::Hooks;
use crate::registry::ClientRegistry;
use crate::wire::{self, Header};
use crate::{ChannelId, ClientId, DispatchOutcome, Outbound};

/// Running totals updated by the I/O layer; `Server` only reads them back
/// out for diagnostics, matching the teacher's split between gameplay state
/// and transport bookkeeping.
#[derive(Debug, Default, Clone)]
pub struct Counters {
    pub bytes_sent: Arc<AtomicU64>,
    pub bytes_received: Arc<AtomicU64>,
}

impl Counters {
    pub fn add_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_received(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
    }
}

pub struct Server {
    pub(crate) config: RelayConfig,
    pub(crate) welcome: String,
    pub(crate) hooks: Hooks,
    pub(crate) clients: ClientRegistry,
    pub(crate) channels: ChannelRegistry,
    pub counters: Counters,
}

impl Server {
    pub fn new(config: RelayConfig) -> Self {
        let welcome = config.welcome_message.clone();
        Self {
            config,
            welcome,
            hooks: Hooks::default(),
            clients: ClientRegistry::new(),
            channels: ChannelRegistry::new(),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    pub fn welcome_message(&self) -> &str {
        &self.welcome
    }

    pub fn set_welcome_message(&mut self, s: impl Into<String>) {
        self.welcome = s.into();
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn client_ids(&self) -> Vec<ClientId> {
        self.clients.snapshot_ids()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.channels.iter().map(|c| c.id).collect()
    }

    pub fn client_name(&self, id: ClientId) -> Option<&str> {
        self.clients.get(id).map(|c| c.name.as_str())
    }

    pub fn channel_name(&self, id: ChannelId) -> Option<&str> {
        self.channels.get(id).map(|c| c.name.as_str())
    }

    pub fn channel_master(&self, id: ChannelId) -> Option<ClientId> {
        self.channels.get(id).and_then(|c| c.master)
    }

    pub fn channel_hidden(&self, id: ChannelId) -> Option<bool> {
        self.channels.get(id).map(|c| c.hidden)
    }

    pub fn channel_auto_close(&self, id: ChannelId) -> Option<bool> {
        self.channels.get(id).map(|c| c.auto_close)
    }

    pub fn channel_members(&self, id: ChannelId) -> Vec<ClientId> {
        self.channels
            .get(id)
            .map(|c| c.clients.clone())
            .unwrap_or_default()
    }

    /// The client's learned UDP address, if its UDPHello has arrived yet.
    pub fn client_udp_addr(&self, id: ClientId) -> Option<std::net::SocketAddr> {
        self.clients.get(id).and_then(|c| c.udp_addr)
    }

    pub fn client_channels(&self, id: ClientId) -> Vec<ChannelId> {
        self.clients
            .get(id)
            .map(|c| c.channels.clone())
            .unwrap_or_default()
    }

    /// Registers a newly accepted TCP connection. Call before feeding any
    /// frames from this client into the dispatcher.
    pub fn on_connect(&mut self, tcp_ip: IpAddr) -> ClientId {
        self.clients.accept(tcp_ip)
    }

    /// `Server::Send` — a server-originated message to one client over the
    /// stream carrier.
    pub fn send(&self, client: ClientId, subchannel: u8, variant: u8, body: &[u8]) -> Outbound {
        let mut w = wire::FrameWriter::new();
        w.write_u8(subchannel);
        w.write_bytes(body);
        let payload = w.finish();
        let framed =
            wire::encode_stream_frame(Header::new(wire::msg_type::SERVER_MESSAGE, variant), false, &payload);
        Outbound::stream(client, Bytes::from(framed))
    }

    /// `Server::Blast` — a server-originated message to one client over the
    /// datagram carrier, to its learned UDP address.
    pub fn blast(&self, client: ClientId, subchannel: u8, variant: u8, body: &[u8]) -> Outbound {
        let mut payload = Vec::with_capacity(1 + body.len());
        payload.push(subchannel);
        payload.extend_from_slice(body);
        let framed = wire::encode_datagram_outbound(
            Header::new(wire::msg_type::SERVER_MESSAGE, variant),
            &payload,
        );
        Outbound::datagram(client, Bytes::from(framed))
    }

    /// Disconnects a client that is not mid-dispatch (e.g. from the ticker
    /// or an application-driven `Disconnect()` call). Runs the same cleanup
    /// the dispatcher runs for a protocol-triggered Closing transition.
    pub fn disconnect(&mut self, client: ClientId) -> DispatchOutcome {
        self.run_disconnect(client)
    }

    /// Advances the liveness ticker by one sweep (see §4.8): pings everyone
    /// who ponged since the last sweep, disconnects everyone who didn't.
    /// Runs over every connected client regardless of handshake state, so a
    /// connection that never sends Connect is still reaped rather than left
    /// idle forever.
    pub fn tick(&mut self) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::new();
        let mut to_disconnect = Vec::new();

        for id in self.clients.snapshot_ids() {
            let Some(entry) = self.clients.get_mut(id) else {
                continue;
            };
            if !entry.ponged {
                to_disconnect.push(id);
            } else {
                entry.ponged = false;
                let framed = wire::encode_stream_frame(
                    Header::new(wire::msg_type::PING, 0),
                    false,
                    &[],
                );
                outcome.push(Outbound::stream(id, Bytes::from(framed)));
            }
        }

        for id in to_disconnect {
            let sub = self.run_disconnect(id);
            outcome.outbound.extend(sub.outbound);
            outcome.disconnected.push(id);
        }
        outcome
    }
}
