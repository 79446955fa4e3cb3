//! Encrypted connection handling.
//!
//! A connection starts in cleartext, performs the role-specific
//! Diffie-Hellman exchange, then carries framed Blowfish-encrypted packets.
//! Decoded inner commands are enqueued to a shared [`MessageQueue`] that
//! worker threads drain.

pub mod capture;
pub mod connection;
pub mod message;
pub mod queue;

pub use connection::{ConnectionHandle, ConnectionRole, ConnectionStatus, EncryptedConnection};
pub use message::Message;
pub use queue::MessageQueue;
