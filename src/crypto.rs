//! Wire and file encryption: Blowfish, the Diffie-Hellman exchange, the
//! encrypted file envelope, and the hash helpers used across the crate.
//!
//! Packet traffic uses Blowfish in ECB over the little-endian word order the
//! client expects. Data-store files use Blowfish-CBC with a fixed key and IV
//! behind a small magic + size header.

use blowfish::BlowfishLE;
use cipher::generic_array::GenericArray;
use cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use md5::Md5;
use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use sha1::{Digest, Sha1};
use sha2::Sha512;

use crate::constants::{
    BF_NET_KEY_BYTE_SIZE, BLOWFISH_BLOCK_SIZE, DH_BASE_STRING, DH_KEY_BIT_SIZE, DH_KEY_HEX_SIZE,
    DH_SHARED_DATA_SIZE, ENCRYPTED_FILE_IV, ENCRYPTED_FILE_KEY, ENCRYPTED_FILE_MAGIC,
};
use crate::error::{Error, Result};
use crate::packet::{Packet, PacketReader};

/// Blowfish cipher keyed either with the fixed file key or a negotiated
/// session key.
pub struct Blowfish {
    cipher: BlowfishLE,
}

impl Default for Blowfish {
    fn default() -> Self {
        Self::new(ENCRYPTED_FILE_KEY).expect("static file key is a valid blowfish key")
    }
}

impl Blowfish {
    pub fn new(key: &[u8]) -> Result<Self> {
        let cipher = BlowfishLE::new_from_slice(key)
            .map_err(|_| Error::Crypto(format!("invalid blowfish key length: {}", key.len())))?;
        Ok(Self { cipher })
    }

    /// Encrypt in place. `data` must be a whole number of blocks; anything
    /// else is left untouched.
    pub fn encrypt(&self, data: &mut [u8]) {
        if data.len() % BLOWFISH_BLOCK_SIZE != 0 {
            return;
        }
        for block in data.chunks_exact_mut(BLOWFISH_BLOCK_SIZE) {
            self.cipher
                .encrypt_block(GenericArray::from_mut_slice(block));
        }
    }

    /// Decrypt in place. `data` must be a whole number of blocks.
    pub fn decrypt(&self, data: &mut [u8]) {
        if data.len() % BLOWFISH_BLOCK_SIZE != 0 {
            return;
        }
        for block in data.chunks_exact_mut(BLOWFISH_BLOCK_SIZE) {
            self.cipher
                .decrypt_block(GenericArray::from_mut_slice(block));
        }
    }

    /// CBC encrypt, zero-padding `data` up to a whole block first. Returns
    /// the final ciphertext block so chained calls can continue the stream.
    pub fn encrypt_cbc(&self, iv: u64, data: &mut Vec<u8>) -> u64 {
        let padded = data.len().div_ceil(BLOWFISH_BLOCK_SIZE) * BLOWFISH_BLOCK_SIZE;
        data.resize(padded, 0);

        let mut previous = iv;
        for block in data.chunks_exact_mut(BLOWFISH_BLOCK_SIZE) {
            let mut value = u64::from_ne_bytes(block.try_into().unwrap()) ^ previous;
            let mut bytes = value.to_ne_bytes();
            self.cipher
                .encrypt_block(GenericArray::from_mut_slice(&mut bytes));
            value = u64::from_ne_bytes(bytes);
            block.copy_from_slice(&bytes);
            previous = value;
        }

        previous
    }

    /// CBC decrypt. When `real_size` is non-zero the vector is trimmed to it
    /// afterwards, dropping the padding.
    pub fn decrypt_cbc(&self, iv: u64, data: &mut Vec<u8>, real_size: usize) {
        if data.len() % BLOWFISH_BLOCK_SIZE == 0 && (real_size == 0 || real_size <= data.len()) {
            let mut previous = iv;
            for block in data.chunks_exact_mut(BLOWFISH_BLOCK_SIZE) {
                let encrypted = u64::from_ne_bytes((&*block).try_into().unwrap());
                let mut bytes = encrypted.to_ne_bytes();
                self.cipher
                    .decrypt_block(GenericArray::from_mut_slice(&mut bytes));
                let value = u64::from_ne_bytes(bytes) ^ previous;
                block.copy_from_slice(&value.to_ne_bytes());
                previous = encrypted;
            }
        }

        if real_size != 0 {
            data.truncate(real_size);
        }
    }

    fn file_iv() -> u64 {
        u64::from_ne_bytes(*ENCRYPTED_FILE_IV)
    }

    /// Encrypt an outer packet in place. The packet layout on entry is
    /// `[blank u32][blank u32][payload]`; on exit the two leading words hold
    /// the big-endian padded and real sizes and the payload is encrypted.
    pub fn encrypt_packet(&self, packet: &mut Packet) -> Result<()> {
        let real_size = packet.size() - 8;
        packet.seek(4)?;
        packet.write_u32_be(real_size)?;

        let padded_size =
            (real_size as usize).div_ceil(BLOWFISH_BLOCK_SIZE) * BLOWFISH_BLOCK_SIZE;
        if padded_size as u32 != real_size {
            packet.end();
            packet.write_blank(padded_size as u32 - real_size)?;
        }

        let total = 8 + padded_size;
        let data = packet.direct(total as u32)?;
        self.encrypt(&mut data[8..total]);

        packet.rewind();
        packet.write_u32_be(padded_size as u32)?;
        packet.end();
        Ok(())
    }

    /// Decrypt an outer packet in place. Leaves the sizes untouched and the
    /// cursor wherever the caller had it.
    pub fn decrypt_packet(&self, packet: &mut Packet) -> Result<()> {
        if packet.size() < (8 + BLOWFISH_BLOCK_SIZE) as u32 {
            return Ok(());
        }
        packet.rewind();
        let padded_size = packet.read_u32_be()? as usize;
        let total = packet.size() as usize;
        let data = packet.direct(total as u32)?;
        if 8 + padded_size <= total {
            self.decrypt(&mut data[8..8 + padded_size]);
        }
        Ok(())
    }
}

/// The encrypted data-store file envelope: 4-byte magic, little-endian u32
/// original size, Blowfish-CBC body under the fixed key and IV.
pub fn decrypt_file(data: &mut Vec<u8>) -> bool {
    if data.len() <= 8 {
        return false;
    }

    let original_size = u32::from_le_bytes(data[4..8].try_into().unwrap()) as usize;
    if &data[0..4] != ENCRYPTED_FILE_MAGIC || data.len() - 8 < original_size {
        data.clear();
        return false;
    }

    data.drain(0..8);
    Blowfish::default().decrypt_cbc(Blowfish::file_iv(), data, original_size);
    true
}

/// Wrap `data` in the encrypted file envelope in place.
pub fn encrypt_file(data: &mut Vec<u8>) {
    let original_size = data.len() as u32;
    Blowfish::default().encrypt_cbc(Blowfish::file_iv(), data);

    let mut header = Vec::with_capacity(8);
    header.extend_from_slice(ENCRYPTED_FILE_MAGIC);
    header.extend_from_slice(&original_size.to_le_bytes());
    data.splice(0..0, header);
}

/// One side of the Diffie-Hellman exchange.
///
/// The prime is supplied as exactly `DH_KEY_HEX_SIZE` hex digits by the
/// server configuration; anything else is a hard load failure. The base is
/// fixed. Parameters are immutable once built and may be shared read-only
/// across connections.
pub struct DiffieHellman {
    prime_hex: String,
    prime: BigUint,
    base: BigUint,
    private: Option<BigUint>,
    public_hex: String,
    secret: Vec<u8>,
}

impl DiffieHellman {
    pub fn new(prime_hex: &str) -> Result<Self> {
        if prime_hex.len() != DH_KEY_HEX_SIZE {
            return Err(Error::Crypto(format!(
                "DH prime must be {} hex digits, got {}",
                DH_KEY_HEX_SIZE,
                prime_hex.len()
            )));
        }

        let prime = BigUint::parse_bytes(prime_hex.as_bytes(), 16)
            .ok_or_else(|| Error::Crypto("DH prime is not valid hex".into()))?;
        let base = BigUint::parse_bytes(DH_BASE_STRING.as_bytes(), 16)
            .ok_or_else(|| Error::Crypto("DH base is not valid hex".into()))?;

        Ok(Self {
            prime_hex: prime_hex.to_uppercase(),
            prime,
            base,
            private: None,
            public_hex: String::new(),
            secret: Vec::new(),
        })
    }

    pub fn prime(&self) -> &str {
        &self.prime_hex
    }

    pub fn public(&self) -> &str {
        &self.public_hex
    }

    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// Generate a fresh private value and return the public value as a
    /// zero-justified hex string of `DH_KEY_HEX_SIZE` digits.
    pub fn generate_public(&mut self) -> String {
        let mut rng = rand::thread_rng();
        let mut private = rng.gen_biguint(DH_KEY_BIT_SIZE as u64);
        while private.is_zero() {
            private = rng.gen_biguint(DH_KEY_BIT_SIZE as u64);
        }

        let public = self.base.modpow(&private, &self.prime);
        self.private = Some(private);
        self.public_hex = right_justified(&format!("{public:X}"), DH_KEY_HEX_SIZE);
        self.public_hex.clone()
    }

    /// Derive the shared Blowfish session key from the peer's public value.
    /// The result is always exactly `BF_NET_KEY_BYTE_SIZE` bytes or an error.
    pub fn generate_secret(&mut self, other_public_hex: &str) -> Result<Vec<u8>> {
        let private = self
            .private
            .as_ref()
            .ok_or_else(|| Error::Crypto("no local DH key pair generated".into()))?;

        let other = BigUint::parse_bytes(other_public_hex.as_bytes(), 16)
            .ok_or_else(|| Error::Crypto("peer DH public is not valid hex".into()))?;
        if other <= BigUint::one() || other >= self.prime {
            return Err(Error::Crypto("peer DH public out of range".into()));
        }

        let shared = other.modpow(private, &self.prime);

        let mut bytes = shared.to_bytes_be();
        if bytes.len() > DH_SHARED_DATA_SIZE {
            return Err(Error::Crypto("DH shared data too large".into()));
        }
        let mut padded = vec![0u8; DH_SHARED_DATA_SIZE - bytes.len()];
        padded.append(&mut bytes);

        padded.truncate(BF_NET_KEY_BYTE_SIZE);
        self.secret = padded.clone();
        Ok(padded)
    }
}

fn right_justified(s: &str, width: usize) -> String {
    if s.len() >= width {
        s.to_string()
    } else {
        let mut out = "0".repeat(width - s.len());
        out.push_str(s);
        out
    }
}

/// Lowercase SHA-1 hex digest, used for data-store file hashes.
pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Lowercase MD5 hex digest.
pub fn md5_hex(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Salted SHA-512 password hash, rendered as lowercase hex.
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha512::new();
    hasher.update(password.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Random base-16 string of `digits` characters (`digits` must be even;
/// zero falls back to 80 digits).
pub fn generate_random_hex(digits: usize) -> String {
    use rand::RngCore;

    let bytes = if digits == 0 { 40 } else { digits / 2 };
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Random non-zero session key that stays positive as an i32.
pub fn generate_session_key() -> u32 {
    use rand::RngCore;

    let key = rand::thread_rng().next_u32() & 0x7FFFFFFF;
    if key == 0 {
        0x8BADF00D
    } else {
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_prime() -> String {
        // Any odd 1024-bit value works for exercising the math; both sides
        // only need to agree on it.
        let mut s = String::new();
        for i in 0..DH_KEY_HEX_SIZE - 1 {
            s.push(char::from_digit(((i * 7) % 16) as u32, 16).unwrap());
        }
        s.insert(0, 'F');
        s.push('B');
        s.truncate(DH_KEY_HEX_SIZE);
        s.to_uppercase()
    }

    #[test]
    fn test_blowfish_block_roundtrip() {
        let bf = Blowfish::new(b"12345678").unwrap();
        let mut data = *b"ABCDEFGH12345678";
        bf.encrypt(&mut data);
        assert_ne!(&data, b"ABCDEFGH12345678");
        bf.decrypt(&mut data);
        assert_eq!(&data, b"ABCDEFGH12345678");
    }

    #[test]
    fn test_blowfish_partial_block_untouched() {
        let bf = Blowfish::new(b"12345678").unwrap();
        let mut data = *b"ABC";
        bf.encrypt(&mut data);
        assert_eq!(&data, b"ABC");
    }

    #[test]
    fn test_cbc_roundtrip_with_padding() {
        let bf = Blowfish::default();
        let mut data = b"hello world".to_vec();
        bf.encrypt_cbc(Blowfish::file_iv(), &mut data);
        assert_eq!(data.len(), 16);
        bf.decrypt_cbc(Blowfish::file_iv(), &mut data, 11);
        assert_eq!(data, b"hello world");
    }

    #[test]
    fn test_packet_encrypt_decrypt() {
        let bf = Blowfish::new(b"sessionk").unwrap();

        let mut packet = Packet::new();
        packet.write_blank(8).unwrap();
        packet.write_array(b"hello").unwrap();
        bf.encrypt_packet(&mut packet).unwrap();

        packet.rewind();
        let padded = packet.read_u32_be().unwrap();
        let real = packet.read_u32_be().unwrap();
        assert_eq!(real, 5);
        assert_eq!(padded, 8);
        assert_eq!(packet.size(), 16);
        assert_ne!(&packet.data()[8..13], b"hello");

        bf.decrypt_packet(&mut packet).unwrap();
        assert_eq!(&packet.data()[8..13], b"hello");
    }

    #[test]
    fn test_file_envelope_roundtrip() {
        let mut data = b"definition table body".to_vec();
        encrypt_file(&mut data);
        assert_eq!(&data[0..4], ENCRYPTED_FILE_MAGIC);
        assert!(decrypt_file(&mut data));
        assert_eq!(data, b"definition table body");
    }

    #[test]
    fn test_file_envelope_bad_magic() {
        let mut data = b"XXXX\x05\x00\x00\x00aaaaaaaa".to_vec();
        assert!(!decrypt_file(&mut data));
        assert!(data.is_empty());
    }

    #[test]
    fn test_dh_prime_length_is_strict() {
        assert!(DiffieHellman::new("2ABC").is_err());
        assert!(DiffieHellman::new(&test_prime()).is_ok());
    }

    #[test]
    fn test_dh_shared_secret_agrees() {
        let prime = test_prime();
        let mut server = DiffieHellman::new(&prime).unwrap();
        let mut client = DiffieHellman::new(&prime).unwrap();

        let server_public = server.generate_public();
        let client_public = client.generate_public();
        assert_eq!(server_public.len(), DH_KEY_HEX_SIZE);
        assert_eq!(client_public.len(), DH_KEY_HEX_SIZE);

        let a = server.generate_secret(&client_public).unwrap();
        let b = client.generate_secret(&server_public).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), BF_NET_KEY_BYTE_SIZE);
    }

    #[test]
    fn test_dh_rejects_out_of_range_public() {
        let mut dh = DiffieHellman::new(&test_prime()).unwrap();
        dh.generate_public();
        assert!(dh.generate_secret("0").is_err());
        assert!(dh.generate_secret("1").is_err());
        assert!(dh.generate_secret("zz").is_err());
    }

    #[test]
    fn test_sha1_known_vector() {
        assert_eq!(sha1_hex(b"abc"), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_md5_known_vector() {
        assert_eq!(md5_hex(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn test_random_hex_length() {
        assert_eq!(generate_random_hex(0).len(), 80);
        assert_eq!(generate_random_hex(16).len(), 16);
    }

    #[test]
    fn test_session_key_positive() {
        for _ in 0..32 {
            let key = generate_session_key();
            assert!(key != 0);
            assert!(key <= 0x7FFFFFFF);
        }
    }
}
