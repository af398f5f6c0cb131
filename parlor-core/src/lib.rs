//! parlor-core
//!
//! Core of the parlor SFU: rooms that fan RTP out between peers, the
//! renegotiation engine that keeps every peer's sender set in agreement with
//! the room's track roster, per-peer session lifecycles, the process-wide
//! room registry, and the lobby bus that streams room inventory to
//! observers.
//!
//! The media and transport stacks sit behind the [`peer`] and [`transport`]
//! abstractions; [`rtc`] carries the webrtc-rs implementation and the server
//! binary supplies the WebSocket transport.

pub mod config;
pub mod error;
pub mod lobby;
pub mod logging;
pub mod peer;
pub mod registry;
pub mod room;
pub mod rtc;
pub mod session;
pub mod signal;
pub mod track;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::Config;
pub use error::{Error, Result};
