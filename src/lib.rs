//! A minimal real-time message relay.
//!
//! A server accepts persistent client connections and rebroadcasts five room
//! events (`enterEvent`, `exitEvent`, `publishEvent`, `deleteEvent`,
//! `updateEvent`) to the other connected clients. Entry and exit go to
//! everyone except the sender; publish, delete, and update echo back to the
//! sender as well. The relay keeps no state and never touches a payload.
//!
//! Each module covers one responsibility:
//!
//! - [`cli`] parses the command-line interface for server and client modes.
//! - [`config`] reads the listen address and optional TLS paths from the
//!   environment.
//! - [`event`] defines the event envelope and its JSON line codec.
//! - [`relay`] routes one inbound event to its fan-out target set.
//! - [`server`] accepts TCP (optionally TLS) connections and runs one relay
//!   session per client over a shared broadcast channel.
//! - [`client`] provides an explicit [`client::Connection`] handle plus a
//!   terminal client built on it.
//! - [`tls`] loads the server certificate and key.
//!
//! Integration tests use this crate directly to exercise the fan-out
//! contract and wire protocol.

pub mod cli;
pub mod client;
pub mod config;
pub mod event;
pub mod relay;
pub mod server;
pub mod tls;
