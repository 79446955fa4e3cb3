//! Protocol and file-format constants shared by every subsystem.

/// Hard cap on a single packet buffer. Writes past this fail, they never
/// reallocate.
pub const MAX_PACKET_SIZE: usize = 16384;

/// Size of the Diffie-Hellman prime and key values in bits.
pub const DH_KEY_BIT_SIZE: usize = 1024;

/// Number of hex digits used to transmit a DH prime or public value.
pub const DH_KEY_HEX_SIZE: usize = DH_KEY_BIT_SIZE / 4;

/// Byte length of a full DH shared secret.
pub const DH_SHARED_DATA_SIZE: usize = DH_KEY_BIT_SIZE / 8;

/// The generator sent during the handshake, as the literal string on the wire.
pub const DH_BASE_STRING: &str = "2";

/// How many bytes of the DH shared secret become the Blowfish session key.
pub const BF_NET_KEY_BYTE_SIZE: usize = 8;

/// Blowfish operates on 64-bit blocks.
pub const BLOWFISH_BLOCK_SIZE: usize = 8;

/// Magic at the start of an encrypted data-store file.
pub const ENCRYPTED_FILE_MAGIC: &[u8; 4] = b"KSED";

/// Default Blowfish key for encrypted data-store files (16 bytes).
pub const ENCRYPTED_FILE_KEY: &[u8; 16] = b"}]#Vq?Y}w!^f*S5L";

/// CBC initialization vector for encrypted data-store files (8 bytes).
pub const ENCRYPTED_FILE_IV: &[u8; 8] = b"P[?jd6c4";

/// Magic at the start of a packet capture file.
pub const CAPTURE_FORMAT_MAGIC: u32 = 0x4B434150;

/// Current capture file version.
pub const CAPTURE_FORMAT_VERSION: u32 = 2;

/// Capture record source: packet sent by the client side.
pub const CAPTURE_SOURCE_CLIENT: u8 = 0;

/// Capture record source: packet sent by the server side.
pub const CAPTURE_SOURCE_SERVER: u8 = 1;
