//! Relay Protocol - JSON frames exchanged over the hub's WebSocket
//!
//! Every frame is a JSON object `{"type": <string>, "data": <value>}` sent
//! on the WebSocket text channel. This crate provides:
//! - `ClientMessage`: frames a client may send, decoded tolerantly
//! - `ServerMessage`: control frames the hub sends
//! - `EventEnvelope`: business event frames (and a generic decoder for any
//!   server frame)

pub mod message;
pub mod parse;

pub use message::{EventEnvelope, ServerMessage};
pub use parse::{ClientMessage, ProtocolError, DEFAULT_MAX_FRAME_BYTES};
