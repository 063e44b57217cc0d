//! TCP/UDP runtime.
//!
//! One task owns the `Server` value and runs the whole event loop via
//! `tokio::select!`. Per-connection reader tasks only decode frames and
//! forward them over an mpsc channel; writer tasks only drain an outbound
//! channel onto the socket. Neither touches registry state.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use relay_core::wire::{self, Header};
use relay_core::{ClientId, Destination, DispatchOutcome, RelayConfig, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::time;

const MAX_DATAGRAM: usize = 2048;
const MAX_FRAME_BODY: usize = 1 << 20;

enum Event {
    Frame {
        client: ClientId,
        header: Header,
        payload: Bytes,
        blasted: bool,
    },
    StreamClosed {
        client: ClientId,
    },
}

pub struct Runtime {
    server: Server,
    listener: TcpListener,
    udp: UdpSocket,
    writers: HashMap<ClientId, mpsc::Sender<Bytes>>,
    events_tx: mpsc::Sender<Event>,
    events_rx: mpsc::Receiver<Event>,
    console_rx: Option<mpsc::Receiver<String>>,
}

impl Runtime {
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        let addr = config.bind_addr.clone();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Error binding port: {addr}"))?;
        let udp = UdpSocket::bind(&addr)
            .await
            .with_context(|| format!("Error binding port: {addr}"))?;
        let (events_tx, events_rx) = mpsc::channel(256);
        Ok(Self {
            server: Server::new(config),
            listener,
            udp,
            writers: HashMap::new(),
            events_tx,
            events_rx,
            console_rx: None,
        })
    }

    /// Wires a line-oriented command source (e.g. stdin) into the event
    /// loop's own task, so ops commands run on the same thread as every
    /// other registry mutation.
    pub fn attach_console(&mut self, rx: mpsc::Receiver<String>) {
        self.console_rx = Some(rx);
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut Server {
        &mut self.server
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the event loop. Only returns on a fatal I/O setup error;
    /// transport errors during steady-state operation are logged and
    /// swallowed per the error-handling design (recoverable transport
    /// errors do not bring the server down).
    pub async fn run(mut self) -> Result<()> {
        let ping_interval_ms = self.server.config().ping_interval_ms;
        let mut ticker = time::interval(Duration::from_millis(ping_interval_ms));
        let mut udp_buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.handle_accept(stream, addr),
                        Err(e) => tracing::warn!(error = %e, "Socket error"),
                    }
                }
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
                recvd = self.udp.recv_from(&mut udp_buf) => {
                    match recvd {
                        Ok((n, addr)) => {
                            self.server.counters.add_received(n as u64);
                            let outcome = self.server.on_datagram(addr, &udp_buf[..n]);
                            self.deliver_and_close(outcome).await;
                        }
                        Err(e) => tracing::warn!(error = %e, "UDP socket error"),
                    }
                }
                _ = ticker.tick() => {
                    let outcome = self.server.tick();
                    self.deliver_and_close(outcome).await;
                }
                console_event = Self::recv_console(&mut self.console_rx) => {
                    match console_event {
                        Some(line) => self.handle_console(&line),
                        None => self.console_rx = None,
                    }
                }
            }
        }
    }

    async fn recv_console(rx: &mut Option<mpsc::Receiver<String>>) -> Option<String> {
        match rx {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    fn handle_console(&self, line: &str) {
        match line.trim() {
            "quit" | "exit" => std::process::exit(0),
            "status" => tracing::info!(
                clients = self.server.client_count(),
                channels = self.server.channel_count(),
                bytes_sent = self.server.counters.bytes_sent.load(std::sync::atomic::Ordering::Relaxed),
                bytes_received = self.server.counters.bytes_received.load(std::sync::atomic::Ordering::Relaxed),
                "status"
            ),
            "clients" => {
                for id in self.server.client_ids() {
                    tracing::info!(client = id, name = self.server.client_name(id).unwrap_or(""), "client");
                }
            }
            "channels" => {
                for id in self.server.channel_ids() {
                    tracing::info!(
                        channel = id,
                        name = self.server.channel_name(id).unwrap_or(""),
                        members = self.server.channel_members(id).len(),
                        "channel"
                    );
                }
            }
            "" => {}
            other => tracing::info!(command = other, "unrecognized console command"),
        }
    }

    fn handle_accept(&mut self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(error = %e, "failed to disable Nagling on accepted connection");
        }
        let client = self.server.on_connect(addr.ip());
        let capacity = self.server.config().outbound_capacity;
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        spawn_connection(stream, client, self.events_tx.clone(), outbound_rx);
        self.writers.insert(client, outbound_tx);
        tracing::debug!(%client, %addr, "accepted connection");
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Frame {
                client,
                header,
                payload,
                blasted,
            } => {
                self.server.counters.add_received(payload.len() as u64);
                let outcome = self.server.on_stream_frame(client, header, &payload, blasted);
                self.deliver_and_close(outcome).await;
            }
            Event::StreamClosed { client } => {
                let outcome = self.server.disconnect(client);
                self.writers.remove(&client);
                self.deliver(outcome).await;
            }
        }
    }

    /// Delivers an outcome's frames, then drops the write half of every
    /// connection it marked for disconnection. Queued frames (e.g. a
    /// failure Response preceding a forced close) are flushed first since
    /// the channel only closes once drained.
    async fn deliver_and_close(&mut self, outcome: DispatchOutcome) {
        let disconnected = outcome.disconnected.clone();
        self.deliver(outcome).await;
        for client in disconnected {
            self.writers.remove(&client);
        }
    }

    async fn deliver(&mut self, outcome: DispatchOutcome) {
        for out in outcome.outbound {
            let n = out.bytes.len() as u64;
            match out.dest {
                Destination::Stream(client) => {
                    if let Some(tx) = self.writers.get(&client) {
                        if tx.send(out.bytes).await.is_ok() {
                            self.server.counters.add_sent(n);
                        }
                    }
                }
                Destination::Datagram(client) => {
                    if let Some(addr) = self.server.client_udp_addr(client) {
                        match self.udp.send_to(&out.bytes, addr).await {
                            Ok(_) => self.server.counters.add_sent(n),
                            Err(e) => tracing::warn!(error = %e, "Error sending"),
                        }
                    }
                }
            }
        }
    }
}

fn spawn_connection(
    stream: TcpStream,
    client: ClientId,
    events_tx: mpsc::Sender<Event>,
    outbound_rx: mpsc::Receiver<Bytes>,
) {
    let (read_half, write_half) = stream.into_split();
    tokio::spawn(reader_task(read_half, client, events_tx));
    tokio::spawn(writer_task(write_half, outbound_rx));
}

async fn reader_task(mut read_half: OwnedReadHalf, client: ClientId, events_tx: mpsc::Sender<Event>) {
    loop {
        let mut prefix = [0u8; 4];
        if read_half.read_exact(&mut prefix).await.is_err() {
            break;
        }
        let (blasted, body_len) = wire::decode_stream_length_prefix(prefix);
        if body_len == 0 || body_len > MAX_FRAME_BODY {
            break;
        }
        let mut body = vec![0u8; body_len];
        if read_half.read_exact(&mut body).await.is_err() {
            break;
        }
        let Some((header, payload)) = wire::split_frame_body(&body) else {
            break;
        };
        let payload = Bytes::copy_from_slice(payload);
        if events_tx
            .send(Event::Frame {
                client,
                header,
                payload,
                blasted,
            })
            .await
            .is_err()
        {
            break;
        }
    }
    let _ = events_tx.send(Event::StreamClosed { client }).await;
}

async fn writer_task(mut write_half: OwnedWriteHalf, mut outbound_rx: mpsc::Receiver<Bytes>) {
    while let Some(bytes) = outbound_rx.recv().await {
        if write_half.write_all(&bytes).await.is_err() {
            break;
        }
    }
}
