//! Reference client: connect/handshake plus request helpers.

use std::net::SocketAddr;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use relay_core::config::PROTOCOL_VERSION;
use relay_core::wire::{self, Header};
use relay_core::ChannelId;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

/// One decoded frame off either carrier, as seen from the client side.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: Header,
    pub blasted: bool,
    pub payload: Bytes,
}

pub struct JoinAck {
    pub is_master: bool,
    pub channel_id: ChannelId,
    pub members: Vec<(u16, bool, String)>,
}

pub struct RelayClient {
    stream: TcpStream,
    udp: UdpSocket,
    pub client_id: u16,
    pub welcome: String,
}

impl RelayClient {
    /// Binds UDP first (to learn the local port before the handshake),
    /// connects TCP, runs Connect, then sends UDPHello and waits for
    /// UDPWelcome.
    pub async fn connect(server_addr: SocketAddr) -> Result<Self> {
        let local_ip = if server_addr.is_ipv4() { "0.0.0.0" } else { "::" };
        let udp = UdpSocket::bind((local_ip, 0))
            .await
            .context("binding local UDP socket")?;
        udp.connect(server_addr).await.context("connecting UDP socket")?;
        let stream = TcpStream::connect(server_addr)
            .await
            .context("connecting TCP stream")?;
        stream.set_nodelay(true).ok();

        let mut client = Self {
            stream,
            udp,
            client_id: 0,
            welcome: String::new(),
        };

        client
            .send_request(wire::request::CONNECT, |w| {
                w.write_str_remainder(PROTOCOL_VERSION);
            })
            .await?;
        let (sub, success, body) = client.read_response().await?;
        if sub != wire::request::CONNECT || !success {
            bail!("Connect failed: {}", String::from_utf8_lossy(&body));
        }
        let mut r = wire::FrameReader::new(&body);
        client.client_id = r.read_u16();
        client.welcome = r.read_str_remainder();

        client.send_udp_hello().await?;
        client.await_udp_welcome().await?;
        Ok(client)
    }

    pub async fn set_name(&mut self, name: &str) -> Result<()> {
        self.send_request(wire::request::SET_NAME, |w| {
            w.write_str_remainder(name);
        })
        .await?;
        let (sub, success, body) = self.read_response().await?;
        if sub != wire::request::SET_NAME || !success {
            bail!("SetName failed: {}", describe_failure(&body));
        }
        Ok(())
    }

    pub async fn join_channel(&mut self, name: &str, hidden: bool, auto_close: bool) -> Result<JoinAck> {
        let flags = (hidden as u8) | ((auto_close as u8) << 1);
        self.send_request(wire::request::JOIN_CHANNEL, |w| {
            w.write_u8(flags);
            w.write_str_remainder(name);
        })
        .await?;
        let (sub, success, body) = self.read_response().await?;
        if sub != wire::request::JOIN_CHANNEL || !success {
            bail!("JoinChannel failed: {}", describe_failure(&body));
        }
        let mut r = wire::FrameReader::new(&body);
        let is_master = r.read_u8() != 0;
        let _name = r.read_str_1b();
        let channel_id = r.read_u16();
        let mut members = Vec::new();
        while !r.failed() {
            let id = r.read_u16();
            let member_is_master = r.read_u8() != 0;
            let member_name = r.read_str_1b();
            if r.failed() {
                break;
            }
            members.push((id, member_is_master, member_name));
        }
        Ok(JoinAck {
            is_master,
            channel_id,
            members,
        })
    }

    pub async fn leave_channel(&mut self, channel_id: ChannelId) -> Result<()> {
        self.send_request(wire::request::LEAVE_CHANNEL, |w| {
            w.write_u16(channel_id);
        })
        .await?;
        let (sub, success, body) = self.read_response().await?;
        if sub != wire::request::LEAVE_CHANNEL || !success {
            bail!("LeaveChannel failed: {}", describe_failure(&body));
        }
        Ok(())
    }

    pub async fn channel_list(&mut self) -> Result<Vec<(u16, String)>> {
        self.send_request(wire::request::CHANNEL_LIST, |_| {}).await?;
        let (sub, success, body) = self.read_response().await?;
        if sub != wire::request::CHANNEL_LIST || !success {
            bail!("ChannelList failed");
        }
        let mut r = wire::FrameReader::new(&body);
        let mut out = Vec::new();
        while !r.failed() {
            let count = r.read_u16();
            let name = r.read_str_1b();
            if r.failed() {
                break;
            }
            out.push((count, name));
        }
        Ok(out)
    }

    pub async fn send_server_message(&mut self, variant: u8, subchannel: u8, body: &[u8], blasted: bool) -> Result<()> {
        let mut w = wire::FrameWriter::new();
        w.write_u8(subchannel);
        w.write_bytes(body);
        self.send_frame(Header::new(wire::msg_type::SERVER_MESSAGE, variant), blasted, &w.finish())
            .await
    }

    pub async fn send_channel_message(
        &mut self,
        variant: u8,
        channel_id: ChannelId,
        subchannel: u8,
        body: &[u8],
        blasted: bool,
    ) -> Result<()> {
        let mut w = wire::FrameWriter::new();
        w.write_u8(subchannel);
        w.write_u16(channel_id);
        w.write_bytes(body);
        self.send_frame(Header::new(wire::msg_type::CHANNEL_MESSAGE, variant), blasted, &w.finish())
            .await
    }

    pub async fn send_peer_message(
        &mut self,
        variant: u8,
        channel_id: ChannelId,
        peer_id: u16,
        subchannel: u8,
        body: &[u8],
        blasted: bool,
    ) -> Result<()> {
        let mut w = wire::FrameWriter::new();
        w.write_u8(subchannel);
        w.write_u16(channel_id);
        w.write_u16(peer_id);
        w.write_bytes(body);
        self.send_frame(Header::new(wire::msg_type::PEER_MESSAGE, variant), blasted, &w.finish())
            .await
    }

    pub async fn ping(&mut self) -> Result<()> {
        self.send_frame(Header::new(wire::msg_type::PING, 0), false, &[]).await
    }

    /// Reads the next frame off the TCP stream (does not look at UDP).
    pub async fn recv_frame(&mut self) -> Result<Frame> {
        let mut prefix = [0u8; 4];
        self.stream.read_exact(&mut prefix).await?;
        let (blasted, len) = wire::decode_stream_length_prefix(prefix);
        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body).await?;
        let (header, payload) = wire::split_frame_body(&body).context("malformed frame from server")?;
        Ok(Frame {
            header,
            blasted,
            payload: Bytes::copy_from_slice(payload),
        })
    }

    async fn send_request(&mut self, sub: u8, build: impl FnOnce(&mut wire::FrameWriter)) -> Result<()> {
        let mut w = wire::FrameWriter::new();
        w.write_u8(sub);
        build(&mut w);
        self.send_frame(Header::new(wire::msg_type::RESPONSE, 0), false, &w.finish())
            .await
    }

    async fn send_frame(&mut self, header: Header, blasted: bool, payload: &[u8]) -> Result<()> {
        let framed = wire::encode_stream_frame(header, blasted, payload);
        self.stream.write_all(&framed).await?;
        Ok(())
    }

    async fn read_response(&mut self) -> Result<(u8, bool, Bytes)> {
        let frame = self.recv_frame().await?;
        if frame.header.msg_type != wire::msg_type::RESPONSE {
            bail!("expected a Response frame, got type {}", frame.header.msg_type);
        }
        let mut r = wire::FrameReader::new(&frame.payload);
        let sub = r.read_u8();
        let success = r.read_u8() != 0;
        let tail = r.read_bytes_remainder();
        Ok((sub, success, tail))
    }

    async fn send_udp_hello(&mut self) -> Result<()> {
        let framed = wire::encode_datagram_inbound(
            Header::new(wire::msg_type::PEER_OR_UDP_HELLO, 0),
            self.client_id,
            &[],
        );
        self.udp.send(&framed).await.context("sending UDPHello")?;
        Ok(())
    }

    async fn await_udp_welcome(&mut self) -> Result<()> {
        loop {
            let frame = self.recv_frame().await?;
            if frame.header.msg_type == wire::msg_type::UDP_WELCOME_OR_CHANNEL_MASTER {
                return Ok(());
            }
        }
    }
}

fn describe_failure(body: &[u8]) -> String {
    String::from_utf8_lossy(body).to_string()
}
