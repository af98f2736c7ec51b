//! `HyperChat` Relay Server library.
//!
//! Exposes the relay server for use in tests and embedding.
//! The relay accepts TCP connections, registers each client by the handle
//! it announces, and routes chat lines and file transfers between them.

pub mod config;
pub mod connection;
pub mod file_relay;
pub mod notice;
pub mod registry;
pub mod relay;
pub mod router;
pub mod session;
