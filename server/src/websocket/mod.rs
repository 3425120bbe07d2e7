//! WebSocket notification stream.
//!
//! UI clients connect via WebSocket and receive every notification the
//! journal produces, and may look up index entries over the same socket.

mod manager;
mod protocol;

pub use manager::ConnectionManager;
pub use protocol::*;
