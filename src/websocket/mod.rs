//! WebSocket endpoint binding sessions to the wire.

mod auth;
mod handler;
mod message;

pub use auth::{authenticate, AuthHeader};
pub use handler::ws_handler;
pub use message::{ClientMessage, Frame, OpCode, ServerMessage, UnknownOpCode};
