//! Request handlers for journal operations.

mod journal;
mod websocket;

pub use journal::*;
pub use websocket::handle_websocket_connection;
