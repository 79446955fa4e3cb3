//! Kestrel - MMORPG server core
//!
//! The shared infrastructure library every server tier links against: the
//! framed, encrypted, compressible packet protocol; the persistence layer
//! mapping versioned object definitions to relational storage; the static
//! game-data catalog decoded from encrypted binary tables; and the
//! Lua-driven server definition loader feeding zones, events, and drop
//! tables into the runtime.

/// Protocol and file-format constants.
pub mod constants;
/// Crate-wide error taxonomy.
pub mod error;

/// String encodings used by packet payloads (UTF-8 / CP932 / CP1252).
pub mod encoding;
/// Packet buffers with cursor-based typed read/write.
pub mod packet;

/// Blowfish, Diffie-Hellman, file envelope, hashes.
pub mod crypto;
/// Encrypted connections, message queue, capture sink.
pub mod network;

/// Persistent object registry, identity cache, relational backends.
pub mod db;

/// Layered virtual filesystem.
pub mod datastore;

/// Static binary table catalog.
pub mod catalog;

/// XML server definitions and the script registry.
pub mod serverdata;

/// Embedded scripting engine shared by migrations and server scripts.
pub mod script;

/// Server configuration structs (loaded by the enclosing process).
pub mod config;

/// Worker threads draining the message queue.
pub mod worker;
/// Deferred and periodic executors.
pub mod timer;

// Re-exported for the `define_persistent!` macro expansion.
#[doc(hidden)]
pub use uuid;
