//! Request and binary-message dispatch (§4.5–§4.9 in the design notes this
//! crate was built from): per-frame validation, registry mutation, and
//! response/fan-out emission, all on one logical thread.

use std::net::SocketAddr;

use bytes::Bytes;

use crate::client::ConnState;
use crate::config::PROTOCOL_VERSION;
use crate::error::RelayError;
use crate::server::Server;
use crate::wire::{self, Header};
use crate::{ChannelId, ClientId, Destination, DispatchOutcome, Outbound};

fn stream_outbound(client: ClientId, header: Header, blasted: bool, payload: &[u8]) -> Outbound {
    let framed = wire::encode_stream_frame(header, blasted, payload);
    Outbound::stream(client, Bytes::from(framed))
}

fn response_frame(sub: u8, success: bool, tail: &[u8]) -> (Header, Vec<u8>) {
    let mut payload = Vec::with_capacity(2 + tail.len());
    payload.push(sub);
    payload.push(success as u8);
    payload.extend_from_slice(tail);
    (Header::new(wire::msg_type::RESPONSE, 0), payload)
}

impl Server {
    /// Feeds one decoded stream-carrier frame into the dispatcher.
    pub fn on_stream_frame(
        &mut self,
        client: ClientId,
        header: Header,
        payload: &[u8],
        blasted: bool,
    ) -> DispatchOutcome {
        let Some(entry) = self.clients.get(client) else {
            return DispatchOutcome::new();
        };
        let state = entry.state;
        if state == ConnState::Closing {
            return DispatchOutcome::new();
        }

        match (state, header.msg_type) {
            (_, wire::msg_type::RESPONSE) => self.dispatch_request(client, state, payload),
            (ConnState::New, _) => self.force_close(client),
            (ConnState::Handshook, wire::msg_type::SERVER_MESSAGE) => {
                self.dispatch_server_message(client, header.variant, payload, blasted)
            }
            (ConnState::Handshook, wire::msg_type::CHANNEL_MESSAGE) => {
                self.dispatch_channel_message(client, header.variant, payload, blasted)
            }
            (ConnState::Handshook, wire::msg_type::PEER_MESSAGE) => {
                self.dispatch_peer_message(client, header.variant, payload, blasted)
            }
            (ConnState::Handshook, 4..=6) => DispatchOutcome::new(),
            (ConnState::Handshook, wire::msg_type::UDP_WELCOME_OR_CHANNEL_MASTER) => {
                DispatchOutcome::new()
            }
            (ConnState::Handshook, wire::msg_type::PING) => {
                if let Some(e) = self.clients.get_mut(client) {
                    e.ponged = true;
                }
                DispatchOutcome::new()
            }
            _ => self.force_close(client),
        }
    }

    /// Feeds one inbound (client -> server) datagram into the dispatcher.
    pub fn on_datagram(&mut self, src_addr: SocketAddr, raw: &[u8]) -> DispatchOutcome {
        let Some((sender_id, header, payload)) = wire::decode_datagram_inbound(raw) else {
            self.hooks.notify_error("datagram too short");
            return DispatchOutcome::new();
        };
        let Some(entry) = self.clients.get(sender_id) else {
            self.hooks.notify_error("UDP datagram from unknown client");
            return DispatchOutcome::new();
        };
        if entry.state != ConnState::Handshook {
            return DispatchOutcome::new();
        }

        match header.msg_type {
            wire::msg_type::PEER_OR_UDP_HELLO => self.handle_udp_hello(sender_id, src_addr),
            wire::msg_type::SERVER_MESSAGE => {
                self.dispatch_server_message(sender_id, header.variant, payload, true)
            }
            wire::msg_type::CHANNEL_MESSAGE => {
                self.dispatch_channel_message(sender_id, header.variant, payload, true)
            }
            wire::msg_type::PEER_MESSAGE => {
                self.dispatch_peer_message(sender_id, header.variant, payload, true)
            }
            wire::msg_type::PING => {
                if let Some(e) = self.clients.get_mut(sender_id) {
                    e.ponged = true;
                }
                DispatchOutcome::new()
            }
            _ => {
                self.hooks.notify_error("unknown message type after handshake");
                DispatchOutcome::new()
            }
        }
    }

    fn force_close(&mut self, client: ClientId) -> DispatchOutcome {
        if let Some(e) = self.clients.get_mut(client) {
            e.state = ConnState::Closing;
        }
        self.run_disconnect(client).close(client)
    }

    fn dispatch_request(&mut self, client: ClientId, state: ConnState, payload: &[u8]) -> DispatchOutcome {
        let mut r = wire::FrameReader::new(payload);
        let sub = r.read_u8();

        if state == ConnState::New {
            return if sub == wire::request::CONNECT {
                self.handle_connect(client, r.read_str_remainder(), r.failed())
            } else {
                self.force_close(client)
            };
        }

        match sub {
            // Already handshook: a protocol violation (§4.6). No response,
            // just discard and disconnect, same as any other out-of-state
            // message.
            wire::request::CONNECT => self.force_close(client),
            wire::request::SET_NAME => {
                let name = r.read_str_remainder();
                if r.failed() || name.is_empty() {
                    return self.force_close(client);
                }
                self.handle_set_name(client, name)
            }
            wire::request::JOIN_CHANNEL => {
                let flags = r.read_u8();
                let name = r.read_str_remainder();
                if r.failed() {
                    return self.force_close(client);
                }
                self.handle_join_channel(client, flags, name)
            }
            wire::request::LEAVE_CHANNEL => {
                let channel = r.read_u16();
                if r.failed() {
                    return self.force_close(client);
                }
                self.handle_leave_channel(client, channel)
            }
            wire::request::CHANNEL_LIST => self.handle_channel_list(client),
            _ => self.force_close(client),
        }
    }

    fn handle_connect(&mut self, client: ClientId, version: String, read_failed: bool) -> DispatchOutcome {
        if read_failed {
            return self.force_close(client);
        }
        if version != PROTOCOL_VERSION {
            let (h, tail) = response_frame(
                wire::request::CONNECT,
                false,
                RelayError::VersionMismatch.to_string().as_bytes(),
            );
            let mut out = DispatchOutcome::new();
            out.push(stream_outbound(client, h, false, &tail));
            let sub = self.force_close(client);
            out.outbound.extend(sub.outbound);
            return out.close(client);
        }
        if !self.hooks.allow_connect(client) {
            let (h, tail) = response_frame(
                wire::request::CONNECT,
                false,
                RelayError::ConnectionRefused.to_string().as_bytes(),
            );
            let mut out = DispatchOutcome::new();
            out.push(stream_outbound(client, h, false, &tail));
            let sub = self.force_close(client);
            out.outbound.extend(sub.outbound);
            return out.close(client);
        }

        if let Some(e) = self.clients.get_mut(client) {
            e.state = ConnState::Handshook;
        }
        let mut w = wire::FrameWriter::new();
        w.write_u16(client);
        w.write_str_remainder(&self.welcome);
        let tail = w.finish();
        let (h, payload) = response_frame(wire::request::CONNECT, true, &tail);
        let mut out = DispatchOutcome::new();
        out.push(stream_outbound(client, h, false, &payload));
        out
    }

    fn handle_set_name(&mut self, client: ClientId, name: String) -> DispatchOutcome {
        let folded = name.to_ascii_lowercase();
        let collides = self
            .clients
            .get(client)
            .map(|c| c.channels.clone())
            .unwrap_or_default()
            .iter()
            .any(|&ch| {
                self.channels
                    .get(ch)
                    .map(|channel| {
                        channel.clients.iter().any(|&peer| {
                            peer != client
                                && self
                                    .clients
                                    .get(peer)
                                    .map(|p| p.name.to_ascii_lowercase() == folded)
                                    .unwrap_or(false)
                        })
                    })
                    .unwrap_or(false)
            });

        if collides || !self.hooks.allow_set_name(client, &name) {
            let mut w = wire::FrameWriter::new();
            w.write_str_1b(&name);
            w.write_str_remainder(RelayError::NameTaken.to_string().as_str());
            let (h, payload) = response_frame(wire::request::SET_NAME, false, &w.finish());
            let mut out = DispatchOutcome::new();
            out.push(stream_outbound(client, h, false, &payload));
            return out;
        }

        let channels = self
            .clients
            .get(client)
            .map(|c| c.channels.clone())
            .unwrap_or_default();
        if let Some(e) = self.clients.get_mut(client) {
            e.name = name.clone();
        }

        let mut w = wire::FrameWriter::new();
        w.write_str_remainder(&name);
        let (h, payload) = response_frame(wire::request::SET_NAME, true, &w.finish());
        let mut out = DispatchOutcome::new();
        out.push(stream_outbound(client, h, false, &payload));

        for ch in channels {
            let is_master = self.channels.get(ch).and_then(|c| c.master) == Some(client);
            let members = self.channels.get(ch).map(|c| c.clients.clone()).unwrap_or_default();
            for peer in members {
                if peer == client {
                    continue;
                }
                out.push(self.peer_join_or_rename_notification(ch, client, is_master, &name, peer));
            }
        }
        out
    }

    fn peer_join_or_rename_notification(
        &self,
        channel: ChannelId,
        member: ClientId,
        is_master: bool,
        name: &str,
        recipient: ClientId,
    ) -> Outbound {
        let mut w = wire::FrameWriter::new();
        w.write_u16(channel);
        w.write_u16(member);
        w.write_u8(is_master as u8);
        w.write_str_remainder(name);
        let payload = w.finish();
        stream_outbound(
            recipient,
            Header::new(wire::msg_type::PEER_OR_UDP_HELLO, 0),
            false,
            &payload,
        )
    }

    fn peer_leave_notification(&self, channel: ChannelId, member: ClientId, recipient: ClientId) -> Outbound {
        let mut w = wire::FrameWriter::new();
        w.write_u16(channel);
        w.write_u16(member);
        let payload = w.finish();
        stream_outbound(
            recipient,
            Header::new(wire::msg_type::PEER_OR_UDP_HELLO, 0),
            false,
            &payload,
        )
    }

    fn handle_join_channel(&mut self, client: ClientId, flags: u8, name: String) -> DispatchOutcome {
        let hidden = flags & 0b01 != 0;
        let auto_close = flags & 0b10 != 0;
        let have_name = self
            .clients
            .get(client)
            .map(|c| !c.name.is_empty())
            .unwrap_or(false);
        if !have_name {
            return self.join_channel_fail(client, &name, RelayError::JoinDenied);
        }

        let existing = self.channels.find_by_name(&name).map(|c| c.id);
        match existing {
            Some(channel_id) => {
                let name_taken = self
                    .channels
                    .get(channel_id)
                    .map(|c| {
                        c.clients.iter().any(|&peer| {
                            self.clients
                                .get(peer)
                                .map(|p| {
                                    p.name.eq_ignore_ascii_case(
                                        &self.clients.get(client).map(|c| c.name.clone()).unwrap_or_default(),
                                    )
                                })
                                .unwrap_or(false)
                        })
                    })
                    .unwrap_or(false);
                if name_taken || !self.hooks.allow_join_channel(client, Some(channel_id), &name) {
                    return self.join_channel_fail(client, &name, RelayError::JoinDenied);
                }

                let members = self
                    .channels
                    .get(channel_id)
                    .map(|c| c.clients.clone())
                    .unwrap_or_default();

                let mut out = DispatchOutcome::new();
                let mut w = wire::FrameWriter::new();
                w.write_u8(0); // not master
                w.write_str_1b(&name);
                w.write_u16(channel_id);
                for &m in &members {
                    if let Some(entry) = self.clients.get(m) {
                        let is_master = self.channels.get(channel_id).and_then(|c| c.master) == Some(m);
                        w.write_u16(m);
                        w.write_u8(is_master as u8);
                        w.write_str_1b(&entry.name);
                    }
                }
                let (h, payload) = response_frame(wire::request::JOIN_CHANNEL, true, &w.finish());
                out.push(stream_outbound(client, h, false, &payload));

                let new_name = self.clients.get(client).map(|c| c.name.clone()).unwrap_or_default();
                for &m in &members {
                    out.push(self.peer_join_or_rename_notification(channel_id, client, false, &new_name, m));
                }

                self.channels.add_member(channel_id, client);
                if let Some(e) = self.clients.get_mut(client) {
                    e.channels.push(channel_id);
                }
                out
            }
            None => {
                if !self.hooks.allow_join_channel(client, None, &name) {
                    return self.join_channel_fail(client, &name, RelayError::JoinDenied);
                }
                let channel_id = self.channels.create(name.clone(), client, hidden, auto_close);
                if let Some(e) = self.clients.get_mut(client) {
                    e.channels.push(channel_id);
                }
                let mut w = wire::FrameWriter::new();
                w.write_u8(1); // master
                w.write_str_1b(&name);
                w.write_u16(channel_id);
                let (h, payload) = response_frame(wire::request::JOIN_CHANNEL, true, &w.finish());
                let mut out = DispatchOutcome::new();
                out.push(stream_outbound(client, h, false, &payload));
                out
            }
        }
    }

    fn join_channel_fail(&self, client: ClientId, name: &str, reason: RelayError) -> DispatchOutcome {
        let mut w = wire::FrameWriter::new();
        w.write_str_1b(name);
        w.write_str_remainder(reason.to_string().as_str());
        let (h, payload) = response_frame(wire::request::JOIN_CHANNEL, false, &w.finish());
        let mut out = DispatchOutcome::new();
        out.push(stream_outbound(client, h, false, &payload));
        out
    }

    fn handle_leave_channel(&mut self, client: ClientId, channel: ChannelId) -> DispatchOutcome {
        let is_member = self
            .clients
            .get(client)
            .map(|c| c.channels.contains(&channel))
            .unwrap_or(false);
        if !is_member {
            return self.force_close(client);
        }

        if !self.hooks.allow_leave_channel(client, channel) {
            let mut w = wire::FrameWriter::new();
            w.write_u16(channel);
            w.write_str_remainder(RelayError::LeaveDenied.to_string().as_str());
            let (h, payload) = response_frame(wire::request::LEAVE_CHANNEL, false, &w.finish());
            let mut out = DispatchOutcome::new();
            out.push(stream_outbound(client, h, false, &payload));
            return out;
        }

        if let Some(e) = self.clients.get_mut(client) {
            e.channels.retain(|&c| c != channel);
        }

        let mut out = DispatchOutcome::new();
        let mut w = wire::FrameWriter::new();
        w.write_u16(channel);
        let (h, payload) = response_frame(wire::request::LEAVE_CHANNEL, true, &w.finish());
        out.push(stream_outbound(client, h, false, &payload));

        let remove_outcome = self.channels.remove_client(channel, client);
        use crate::channel::CloseReason;
        match remove_outcome.closed {
            None => {
                for peer in remove_outcome.notify_leave {
                    out.push(self.peer_leave_notification(channel, client, peer));
                }
            }
            Some(CloseReason::Empty) => {}
            Some(CloseReason::AutoClose) | Some(CloseReason::Explicit) => {
                for peer in remove_outcome.notify_leave {
                    if let Some(e) = self.clients.get_mut(peer) {
                        e.channels.retain(|&c| c != channel);
                    }
                    let mut w2 = wire::FrameWriter::new();
                    w2.write_u16(channel);
                    let (h2, payload2) = response_frame(wire::request::LEAVE_CHANNEL, true, &w2.finish());
                    out.push(stream_outbound(peer, h2, false, &payload2));
                }
            }
        }
        out
    }

    fn handle_channel_list(&self, client: ClientId) -> DispatchOutcome {
        let mut w = wire::FrameWriter::new();
        for ch in self.channels.iter() {
            if ch.hidden {
                continue;
            }
            w.write_u16(ch.member_count() as u16);
            w.write_str_1b(&ch.name);
        }
        let (h, payload) = response_frame(wire::request::CHANNEL_LIST, true, &w.finish());
        let mut out = DispatchOutcome::new();
        out.push(stream_outbound(client, h, false, &payload));
        out
    }

    fn dispatch_server_message(
        &mut self,
        client: ClientId,
        variant: u8,
        payload: &[u8],
        blasted: bool,
    ) -> DispatchOutcome {
        let mut r = wire::FrameReader::new(payload);
        let subchannel = r.read_u8();
        let body = r.read_bytes_remainder();
        if r.failed() {
            return self.force_close(client);
        }
        self.hooks
            .notify_server_message(client, blasted, subchannel, &body, variant);
        DispatchOutcome::new()
    }

    fn dispatch_channel_message(
        &mut self,
        client: ClientId,
        variant: u8,
        payload: &[u8],
        blasted: bool,
    ) -> DispatchOutcome {
        let mut r = wire::FrameReader::new(payload);
        let subchannel = r.read_u8();
        let channel = r.read_u16();
        let body = r.read_bytes_remainder();
        if r.failed() {
            return self.force_close(client);
        }

        let is_member = self
            .channels
            .get(channel)
            .map(|c| c.is_member(client))
            .unwrap_or(false);
        if !is_member {
            self.hooks.notify_error("channel message for a channel the sender is not in");
            return DispatchOutcome::new();
        }
        if !self.hooks.allow_channel_message(client, channel, subchannel, &body) {
            return DispatchOutcome::new();
        }

        let mut out = DispatchOutcome::new();
        let members = self.channels.get(channel).map(|c| c.clients.clone()).unwrap_or_default();
        for peer in members {
            if peer == client {
                continue;
            }
            let mut w = wire::FrameWriter::new();
            w.write_u8(subchannel);
            w.write_u16(channel);
            w.write_u16(client);
            w.write_bytes(&body);
            let payload = w.finish();
            let header = Header::new(wire::msg_type::CHANNEL_MESSAGE, variant);
            out.push(if blasted {
                let framed = wire::encode_datagram_outbound(header, &payload);
                Outbound {
                    dest: Destination::Datagram(peer),
                    bytes: Bytes::from(framed),
                }
            } else {
                stream_outbound(peer, header, false, &payload)
            });
        }
        out
    }

    fn dispatch_peer_message(
        &mut self,
        client: ClientId,
        variant: u8,
        payload: &[u8],
        blasted: bool,
    ) -> DispatchOutcome {
        let mut r = wire::FrameReader::new(payload);
        let subchannel = r.read_u8();
        let channel = r.read_u16();
        let peer = r.read_u16();
        let body = r.read_bytes_remainder();
        if r.failed() {
            return self.force_close(client);
        }

        let valid = peer != client
            && self
                .channels
                .get(channel)
                .map(|c| c.is_member(client) && c.is_member(peer))
                .unwrap_or(false);
        if !valid {
            self.hooks.notify_error("peer message to an invalid recipient");
            return DispatchOutcome::new();
        }
        if !self.hooks.allow_peer_message(client, peer, channel, subchannel, &body) {
            return DispatchOutcome::new();
        }

        let mut w = wire::FrameWriter::new();
        w.write_u8(subchannel);
        w.write_u16(channel);
        w.write_u16(client);
        w.write_bytes(&body);
        let out_payload = w.finish();
        let header = Header::new(wire::msg_type::PEER_MESSAGE, variant);
        let mut out = DispatchOutcome::new();
        out.push(if blasted {
            let framed = wire::encode_datagram_outbound(header, &out_payload);
            Outbound {
                dest: Destination::Datagram(peer),
                bytes: Bytes::from(framed),
            }
        } else {
            stream_outbound(peer, header, false, &out_payload)
        });
        out
    }

    fn handle_udp_hello(&mut self, client: ClientId, src_addr: SocketAddr) -> DispatchOutcome {
        let expected_ip = self.clients.tcp_ip(client);
        if expected_ip != Some(src_addr.ip()) {
            self.hooks.notify_error("UDP datagram IP does not match TCP peer");
            return DispatchOutcome::new();
        }

        self.clients.set_udp_addr(client, src_addr);

        let already_welcomed = self.clients.get(client).map(|c| c.sent_udp_welcome).unwrap_or(true);
        let mut out = DispatchOutcome::new();
        if !already_welcomed {
            if let Some(e) = self.clients.get_mut(client) {
                e.sent_udp_welcome = true;
            }
            let framed = wire::encode_stream_frame(
                Header::new(wire::msg_type::UDP_WELCOME_OR_CHANNEL_MASTER, 0),
                false,
                &[],
            );
            out.push(Outbound::stream(client, Bytes::from(framed)));
        }
        out
    }

    /// Implements the disconnect path of §4.9: leaves every channel the
    /// client was in, fires `HandlerDisconnect` if handshook, releases the ID.
    pub(crate) fn run_disconnect(&mut self, client: ClientId) -> DispatchOutcome {
        use crate::channel::CloseReason;
        let Some(entry) = self.clients.get(client) else {
            return DispatchOutcome::new();
        };
        let was_handshook = entry.state == ConnState::Handshook;
        let channels = entry.channels.clone();

        let mut out = DispatchOutcome::new();
        for ch in channels {
            let remove_outcome = self.channels.remove_client(ch, client);
            match remove_outcome.closed {
                None => {
                    for peer in remove_outcome.notify_leave {
                        out.push(self.peer_leave_notification(ch, client, peer));
                    }
                }
                Some(CloseReason::Empty) => {}
                Some(CloseReason::AutoClose) | Some(CloseReason::Explicit) => {
                    for peer in remove_outcome.notify_leave {
                        if let Some(e) = self.clients.get_mut(peer) {
                            e.channels.retain(|&c| c != ch);
                        }
                        let mut w = wire::FrameWriter::new();
                        w.write_u16(ch);
                        let (h, payload) = response_frame(wire::request::LEAVE_CHANNEL, true, &w.finish());
                        out.push(stream_outbound(peer, h, false, &payload));
                    }
                }
            }
        }

        if was_handshook {
            self.hooks.notify_disconnect(client);
        }
        self.clients.remove(client);
        out
    }

    /// `Channel::Close()` — explicit application-driven close.
    pub fn close_channel(&mut self, channel: ChannelId) -> DispatchOutcome {
        let members = self.channels.close(channel);
        let mut out = DispatchOutcome::new();
        for peer in members {
            if let Some(e) = self.clients.get_mut(peer) {
                e.channels.retain(|&c| c != channel);
            }
            let mut w = wire::FrameWriter::new();
            w.write_u16(channel);
            let (h, payload) = response_frame(wire::request::LEAVE_CHANNEL, true, &w.finish());
            out.push(stream_outbound(peer, h, false, &payload));
        }
        out
    }
}
