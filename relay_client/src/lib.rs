//! Reference client for the relay wire protocol.
//!
//! Grounded on the teacher's `GameClient::connect` sequence: bind the UDP
//! socket first (so the OS assigns the local port before we need it),
//! then do the TCP handshake, then announce the UDP side to the server.

pub mod client;

pub use client::RelayClient;
