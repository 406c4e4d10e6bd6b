//! Relay Daemon - Authenticated WebSocket push hub
//!
//! This crate provides the core infrastructure for the relay daemon:
//! - `transport` - Frame-level abstraction over WebSockets (and an in-memory pair)
//! - `connection` - Per-client actor: mailbox, handshake, inbound and outbound loops
//! - `registry` - Coordinator actor owning the live-connection map and fan-out
//! - `auth` - Credential verifiers (static tokens, JWT)
//! - `hub` - Facade for admission and the non-blocking dispatch API
//! - `server` - axum routes and the HTTP server
//! - `config` - TOML configuration with environment overrides
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       relayd daemon                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  RelayServer    │────▶│            Hub              │   │
//! │  │  (axum, /ws)    │     │  handshake + dispatch API   │   │
//! │  └─────────────────┘     └──────────────┬──────────────┘   │
//! │                                         │ RegistryCommand   │
//! │                                         ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ Connection actor│◀────│       RegistryActor         │   │
//! │  │ inbound/outbound│ try │  (single writer, fan-out)   │   │
//! │  │    + Mailbox    │ send└─────────────────────────────┘   │
//! │  └─────────────────┘                                        │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod auth;
pub mod config;
pub mod connection;
pub mod hub;
pub mod registry;
pub mod server;
pub mod transport;

pub use config::RelayConfig;
pub use hub::{AdmitError, DispatchError, Hub, HubBuilder, HubStatus};
