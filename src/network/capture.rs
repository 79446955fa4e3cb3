//! Packet capture sink.
//!
//! When a capture path is configured, each received outer packet is appended
//! (after decryption, before decompression) so a session can be replayed
//! offline. Header and record layout are fixed; see the constants module for
//! magic and version.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::constants::{CAPTURE_FORMAT_MAGIC, CAPTURE_FORMAT_VERSION};

fn steady_epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub struct CaptureFile {
    file: File,
}

impl CaptureFile {
    /// Create a capture file under `dir`, named from the timestamp and the
    /// remote address, and write the header.
    pub fn create(dir: &str, remote_address: &str) -> io::Result<Self> {
        let stamp = unix_time();
        let sanitized: String = remote_address
            .chars()
            .map(|c| if c == ':' || c == '/' { '_' } else { c })
            .collect();
        let suffix = crate::crypto::generate_random_hex(8);
        let path = Path::new(dir).join(format!("{stamp}-{sanitized}-{suffix}.capture"));

        let mut file = File::create(path)?;
        file.write_all(&CAPTURE_FORMAT_MAGIC.to_ne_bytes())?;
        file.write_all(&CAPTURE_FORMAT_VERSION.to_ne_bytes())?;
        file.write_all(&stamp.to_ne_bytes())?;
        file.write_all(&(remote_address.len() as u32).to_ne_bytes())?;
        file.write_all(remote_address.as_bytes())?;
        file.flush()?;

        Ok(Self { file })
    }

    /// Append one timestamped packet record.
    pub fn record(&mut self, source: u8, data: &[u8]) -> io::Result<()> {
        let micros = steady_epoch().elapsed().as_micros() as u64;

        self.file.write_all(&[source])?;
        self.file.write_all(&unix_time().to_ne_bytes())?;
        self.file.write_all(&micros.to_ne_bytes())?;
        self.file.write_all(&(data.len() as u32).to_ne_bytes())?;
        self.file.write_all(data)?;
        self.file.flush()
    }
}
