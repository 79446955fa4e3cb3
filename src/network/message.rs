//! Messages delivered to the worker queue by connections.

use crate::packet::PacketView;

use super::connection::ConnectionHandle;

/// One unit of work for the worker pool.
#[derive(Debug, Clone)]
pub enum Message {
    /// The connection finished its handshake and is carrying encrypted
    /// traffic. Emitted exactly once per connection.
    Encrypted(ConnectionHandle),

    /// One decoded inner command. `command_code` is an opaque identifier the
    /// enclosing server dispatches on; `data` is a zero-copy view of the
    /// payload.
    Command {
        connection: ConnectionHandle,
        command_code: u16,
        data: PacketView,
    },

    /// The connection dropped. Emitted exactly once, after which no further
    /// commands arrive from it.
    ConnectionClosed(ConnectionHandle),

    /// Ask the workers to stop draining and join.
    Shutdown,
}
