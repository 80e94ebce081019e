//! Line-oriented TCP chat relay.
//!
//! Every connected peer picks a username and every line it sends is relayed
//! to all other peers. The modules, from the wire up:
//!
//! - [`protocol`] holds the newline framing and the literal lines of the
//!   protocol (prompt, confirmation, join/leave notices, quit sentinel).
//! - [`connection`] wraps the write side of one peer's stream.
//! - [`registry`] maps live connections to usernames behind one mutex.
//! - [`broadcaster`] fans a line out to a snapshot of the registry and evicts
//!   peers whose writes fail.
//! - [`session`] runs the handshake and relay loop for one connection.
//! - [`server`] accepts TCP connections and spawns a session for each.
//! - [`cli`] and [`config`] describe the `serve` and `client` subcommands.
//! - [`client`] is a terminal client for the same protocol.

pub mod broadcaster;
pub mod cli;
pub mod client;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
