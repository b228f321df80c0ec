//! WebSocket connection state, heartbeat, per-connection dispatch and the
//! session pump that ties them to a socket.

pub mod connection;
pub mod dispatcher;
pub mod heartbeat;
pub mod session;
