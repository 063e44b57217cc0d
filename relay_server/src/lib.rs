//! Tokio runtime around `relay_core::Server`.
//!
//! Owns the actual sockets; `relay_core` owns the protocol. One task runs
//! the whole event loop and holds the `Server` value directly, mirroring
//! the teacher's single-owner tick loop — per-connection tasks only
//! shuttle decoded frames and raw bytes across channels, they never touch
//! registry state themselves.

pub mod runtime;

pub use runtime::Runtime;
