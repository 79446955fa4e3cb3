//! Packet buffers with cursor-based typed read/write.
//!
//! [`Packet`] is the writable flavor: an owned buffer that may grow up to
//! `MAX_PACKET_SIZE` and never past it. [`PacketView`] is the read-only
//! flavor sharing storage by reference count, used to hand decoded command
//! payloads to workers without copying.
//!
//! Integers can be read and written in native, big-endian, or little-endian
//! order. Strings support UTF-8/CP932/CP1252 with either a NUL terminator or
//! an 8/16/32-bit length prefix. Every operation that would move the cursor
//! outside `[0, size]` fails instead of clamping.

mod view;

pub use view::PacketView;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::constants::MAX_PACKET_SIZE;
use crate::encoding::{self, Encoding};
use crate::error::PacketError;

type Result<T> = std::result::Result<T, PacketError>;

/// Read-side contract shared by [`Packet`] and [`PacketView`].
///
/// Default methods implement the whole typed read surface on top of the two
/// window accessors, so both flavors stay in lockstep.
pub trait PacketReader {
    /// The valid byte window `[0, size)`.
    fn data(&self) -> &[u8];

    /// Current cursor.
    fn tell(&self) -> u32;

    /// Move the cursor without bounds checking. Internal; use `seek`.
    fn set_position(&mut self, pos: u32);

    fn size(&self) -> u32 {
        self.data().len() as u32
    }

    /// Bytes between the cursor and the end of the valid window.
    fn left(&self) -> u32 {
        self.size() - self.tell()
    }

    fn seek(&mut self, pos: u32) -> Result<()> {
        if pos > self.size() {
            return Err(PacketError::OutOfBounds {
                position: pos,
                size: self.size(),
            });
        }
        self.set_position(pos);
        Ok(())
    }

    fn skip(&mut self, count: u32) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        self.seek(self.tell() + count)
    }

    /// Reset the cursor to the start of the packet.
    fn rewind(&mut self) {
        self.set_position(0);
    }

    /// Move the cursor back by `count` bytes.
    fn rewind_by(&mut self, count: u32) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        if count > self.tell() {
            return Err(PacketError::OutOfBounds {
                position: self.tell(),
                size: self.size(),
            });
        }
        self.set_position(self.tell() - count);
        Ok(())
    }

    /// Move the cursor to the end of the valid window.
    fn end(&mut self) {
        self.set_position(self.size());
    }

    fn peek_bytes(&self, count: u32) -> Result<&[u8]> {
        let pos = self.tell() as usize;
        let end = pos + count as usize;
        if end > self.data().len() {
            return Err(PacketError::OutOfBounds {
                position: self.tell() + count,
                size: self.size(),
            });
        }
        Ok(&self.data()[pos..end])
    }

    /// Read exactly `count` bytes, advancing the cursor.
    fn read_array(&mut self, count: u32) -> Result<Vec<u8>> {
        let bytes = self.peek_bytes(count)?.to_vec();
        self.skip(count)?;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> Result<u8> {
        let v = self.peek_bytes(1)?[0];
        self.skip(1)?;
        Ok(v)
    }

    fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    fn peek_u8(&self) -> Result<u8> {
        Ok(self.peek_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        let b: [u8; 2] = self.peek_bytes(2)?.try_into().unwrap();
        self.skip(2)?;
        Ok(u16::from_ne_bytes(b))
    }

    fn read_u16_be(&mut self) -> Result<u16> {
        let b: [u8; 2] = self.peek_bytes(2)?.try_into().unwrap();
        self.skip(2)?;
        Ok(u16::from_be_bytes(b))
    }

    fn read_u16_le(&mut self) -> Result<u16> {
        let b: [u8; 2] = self.peek_bytes(2)?.try_into().unwrap();
        self.skip(2)?;
        Ok(u16::from_le_bytes(b))
    }

    fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    fn read_i16_be(&mut self) -> Result<i16> {
        Ok(self.read_u16_be()? as i16)
    }

    fn read_i16_le(&mut self) -> Result<i16> {
        Ok(self.read_u16_le()? as i16)
    }

    fn peek_u16(&self) -> Result<u16> {
        Ok(u16::from_ne_bytes(self.peek_bytes(2)?.try_into().unwrap()))
    }

    fn peek_u16_be(&self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.peek_bytes(2)?.try_into().unwrap()))
    }

    fn peek_u16_le(&self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.peek_bytes(2)?.try_into().unwrap()))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b: [u8; 4] = self.peek_bytes(4)?.try_into().unwrap();
        self.skip(4)?;
        Ok(u32::from_ne_bytes(b))
    }

    fn read_u32_be(&mut self) -> Result<u32> {
        let b: [u8; 4] = self.peek_bytes(4)?.try_into().unwrap();
        self.skip(4)?;
        Ok(u32::from_be_bytes(b))
    }

    fn read_u32_le(&mut self) -> Result<u32> {
        let b: [u8; 4] = self.peek_bytes(4)?.try_into().unwrap();
        self.skip(4)?;
        Ok(u32::from_le_bytes(b))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    fn read_i32_be(&mut self) -> Result<i32> {
        Ok(self.read_u32_be()? as i32)
    }

    fn read_i32_le(&mut self) -> Result<i32> {
        Ok(self.read_u32_le()? as i32)
    }

    fn peek_u32(&self) -> Result<u32> {
        Ok(u32::from_ne_bytes(self.peek_bytes(4)?.try_into().unwrap()))
    }

    fn peek_u32_be(&self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.peek_bytes(4)?.try_into().unwrap()))
    }

    fn peek_u32_le(&self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.peek_bytes(4)?.try_into().unwrap()))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let b: [u8; 8] = self.peek_bytes(8)?.try_into().unwrap();
        self.skip(8)?;
        Ok(u64::from_ne_bytes(b))
    }

    fn read_u64_be(&mut self) -> Result<u64> {
        let b: [u8; 8] = self.peek_bytes(8)?.try_into().unwrap();
        self.skip(8)?;
        Ok(u64::from_be_bytes(b))
    }

    fn read_u64_le(&mut self) -> Result<u64> {
        let b: [u8; 8] = self.peek_bytes(8)?.try_into().unwrap();
        self.skip(8)?;
        Ok(u64::from_le_bytes(b))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    fn read_i64_be(&mut self) -> Result<i64> {
        Ok(self.read_u64_be()? as i64)
    }

    fn read_i64_le(&mut self) -> Result<i64> {
        Ok(self.read_u64_le()? as i64)
    }

    fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_ne_bytes(self.read_array(4)?.try_into().unwrap()))
    }

    fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_ne_bytes(self.read_array(8)?.try_into().unwrap()))
    }

    /// Read a NUL-terminated string. The terminator is consumed but not part
    /// of the decoded result.
    fn read_string(&mut self, enc: Encoding) -> Result<String> {
        let pos = self.tell() as usize;
        let window = self.data();
        let nul = window[pos..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(PacketError::OutOfBounds {
                position: self.size(),
                size: self.size(),
            })?;
        let bytes = window[pos..pos + nul].to_vec();
        self.skip(nul as u32 + 1)?;
        encoding::from_bytes(enc, &bytes)
    }

    fn read_string16(&mut self, enc: Encoding, trim_null: bool) -> Result<String> {
        let sz = self.read_u16()? as u32;
        self.read_sized_string(enc, sz, trim_null)
    }

    fn read_string16_be(&mut self, enc: Encoding, trim_null: bool) -> Result<String> {
        let sz = self.read_u16_be()? as u32;
        self.read_sized_string(enc, sz, trim_null)
    }

    fn read_string16_le(&mut self, enc: Encoding, trim_null: bool) -> Result<String> {
        let sz = self.read_u16_le()? as u32;
        self.read_sized_string(enc, sz, trim_null)
    }

    fn read_string32(&mut self, enc: Encoding, trim_null: bool) -> Result<String> {
        let sz = self.read_u32()?;
        self.read_sized_string(enc, sz, trim_null)
    }

    fn read_string32_be(&mut self, enc: Encoding, trim_null: bool) -> Result<String> {
        let sz = self.read_u32_be()?;
        self.read_sized_string(enc, sz, trim_null)
    }

    fn read_string32_le(&mut self, enc: Encoding, trim_null: bool) -> Result<String> {
        let sz = self.read_u32_le()?;
        self.read_sized_string(enc, sz, trim_null)
    }

    fn read_string8(&mut self, enc: Encoding, trim_null: bool) -> Result<String> {
        let sz = self.read_u8()? as u32;
        self.read_sized_string(enc, sz, trim_null)
    }

    #[doc(hidden)]
    fn read_sized_string(&mut self, enc: Encoding, size: u32, trim_null: bool) -> Result<String> {
        let mut bytes = self.read_array(size)?;
        if trim_null && bytes.last() == Some(&0) {
            bytes.pop();
        }
        encoding::from_bytes(enc, &bytes)
    }

    /// Render a hex/ASCII dump, 16 bytes per line, with `{` `}` marking the
    /// cursor.
    fn dump(&self) -> String {
        let data = self.data();
        let pos = self.tell() as usize;
        let size = data.len();

        if size == 0 {
            return String::new();
        }

        let mut lines = Vec::new();
        let mut line = 0usize;

        while line < size {
            let mut buffer = format!("{:04x}{}", line, if pos == line { " {" } else { "  " });

            for half in 0..2 {
                let base = line + half * 8;
                for i in base..base + 8 {
                    if i >= size {
                        buffer.push_str(if pos == i { "  }" } else { "   " });
                    } else if pos == i {
                        buffer.push_str(&format!("{:02x}}}", data[i]));
                    } else if pos == i + 1 && (i + 1) != base + 8 {
                        buffer.push_str(&format!("{:02x}{{", data[i]));
                    } else {
                        buffer.push_str(&format!("{:02x} ", data[i]));
                    }
                }

                if half == 0 {
                    buffer.push_str(if pos == line + 8 { "{" } else { " " });
                }
            }

            buffer.push(' ');

            for half in 0..2 {
                let base = line + half * 8;
                for i in base..base + 8 {
                    if i >= size {
                        break;
                    }
                    let val = data[i];
                    buffer.push(if (0x20..0x7f).contains(&val) {
                        val as char
                    } else {
                        '.'
                    });
                }
                if half == 0 {
                    buffer.push(' ');
                }
            }

            lines.push(buffer);
            line += 16;
        }

        lines.join("\n")
    }
}

/// Writable packet buffer. See the module docs for the contract.
#[derive(Debug, Default)]
pub struct Packet {
    data: Vec<u8>,
    position: usize,
}

impl PacketReader for Packet {
    fn data(&self) -> &[u8] {
        &self.data
    }

    fn tell(&self) -> u32 {
        self.position as u32
    }

    fn set_position(&mut self, pos: u32) {
        self.position = pos as usize;
    }
}

impl Packet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a packet preloaded with `data`, cursor rewound to the start.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut p = Packet::new();
        p.write_array(data)?;
        p.rewind();
        Ok(p)
    }

    /// Bytes that can still be written before hitting the cap.
    pub fn free(&self) -> u32 {
        (MAX_PACKET_SIZE - self.data.len()) as u32
    }

    /// Reset position and size; the buffer is reusable afterwards.
    pub fn clear(&mut self) {
        self.data.clear();
        self.position = 0;
    }

    /// Drop everything after the cursor.
    pub fn erase_right(&mut self) {
        self.data.truncate(self.position);
    }

    fn grow(&mut self, sz: u32) -> Result<()> {
        let new_end = self.position + sz as usize;
        if new_end > MAX_PACKET_SIZE {
            return Err(PacketError::Overflow { requested: sz });
        }
        if new_end > self.data.len() {
            self.data.resize(new_end, 0);
        }
        Ok(())
    }

    /// Write `count` zero bytes, growing the valid window.
    pub fn write_blank(&mut self, count: u32) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        self.grow(count)?;
        let pos = self.position;
        self.data[pos..pos + count as usize].fill(0);
        self.skip(count)
    }

    pub fn write_array(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.grow(bytes.len() as u32)?;
        let pos = self.position;
        self.data[pos..pos + bytes.len()].copy_from_slice(bytes);
        self.skip(bytes.len() as u32)
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_array(&[v])
    }

    pub fn write_i8(&mut self, v: i8) -> Result<()> {
        self.write_array(&[v as u8])
    }

    pub fn write_u16(&mut self, v: u16) -> Result<()> {
        self.write_array(&v.to_ne_bytes())
    }

    pub fn write_u16_be(&mut self, v: u16) -> Result<()> {
        self.write_array(&v.to_be_bytes())
    }

    pub fn write_u16_le(&mut self, v: u16) -> Result<()> {
        self.write_array(&v.to_le_bytes())
    }

    pub fn write_i16(&mut self, v: i16) -> Result<()> {
        self.write_array(&v.to_ne_bytes())
    }

    pub fn write_i16_be(&mut self, v: i16) -> Result<()> {
        self.write_array(&v.to_be_bytes())
    }

    pub fn write_i16_le(&mut self, v: i16) -> Result<()> {
        self.write_array(&v.to_le_bytes())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.write_array(&v.to_ne_bytes())
    }

    pub fn write_u32_be(&mut self, v: u32) -> Result<()> {
        self.write_array(&v.to_be_bytes())
    }

    pub fn write_u32_le(&mut self, v: u32) -> Result<()> {
        self.write_array(&v.to_le_bytes())
    }

    pub fn write_i32(&mut self, v: i32) -> Result<()> {
        self.write_array(&v.to_ne_bytes())
    }

    pub fn write_i32_be(&mut self, v: i32) -> Result<()> {
        self.write_array(&v.to_be_bytes())
    }

    pub fn write_i32_le(&mut self, v: i32) -> Result<()> {
        self.write_array(&v.to_le_bytes())
    }

    pub fn write_u64(&mut self, v: u64) -> Result<()> {
        self.write_array(&v.to_ne_bytes())
    }

    pub fn write_u64_be(&mut self, v: u64) -> Result<()> {
        self.write_array(&v.to_be_bytes())
    }

    pub fn write_u64_le(&mut self, v: u64) -> Result<()> {
        self.write_array(&v.to_le_bytes())
    }

    pub fn write_i64(&mut self, v: i64) -> Result<()> {
        self.write_array(&v.to_ne_bytes())
    }

    pub fn write_i64_be(&mut self, v: i64) -> Result<()> {
        self.write_array(&v.to_be_bytes())
    }

    pub fn write_i64_le(&mut self, v: i64) -> Result<()> {
        self.write_array(&v.to_le_bytes())
    }

    pub fn write_f32(&mut self, v: f32) -> Result<()> {
        self.write_array(&v.to_ne_bytes())
    }

    pub fn write_f64(&mut self, v: f64) -> Result<()> {
        self.write_array(&v.to_ne_bytes())
    }

    /// Write a string with no length prefix, optionally NUL-terminated.
    pub fn write_string(&mut self, enc: Encoding, s: &str, null_terminate: bool) -> Result<()> {
        let bytes = encoding::to_bytes(enc, s, null_terminate)?;
        self.write_array(&bytes)
    }

    pub fn write_string8(&mut self, enc: Encoding, s: &str, null_terminate: bool) -> Result<()> {
        let bytes = encoding::to_bytes(enc, s, null_terminate)?;
        if bytes.len() > u8::MAX as usize {
            return Err(PacketError::Overflow {
                requested: bytes.len() as u32,
            });
        }
        self.write_u8(bytes.len() as u8)?;
        self.write_array(&bytes)
    }

    pub fn write_string16(&mut self, enc: Encoding, s: &str, null_terminate: bool) -> Result<()> {
        let bytes = self.checked_string16(enc, s, null_terminate)?;
        self.write_u16(bytes.len() as u16)?;
        self.write_array(&bytes)
    }

    pub fn write_string16_be(&mut self, enc: Encoding, s: &str, null_terminate: bool) -> Result<()> {
        let bytes = self.checked_string16(enc, s, null_terminate)?;
        self.write_u16_be(bytes.len() as u16)?;
        self.write_array(&bytes)
    }

    pub fn write_string16_le(&mut self, enc: Encoding, s: &str, null_terminate: bool) -> Result<()> {
        let bytes = self.checked_string16(enc, s, null_terminate)?;
        self.write_u16_le(bytes.len() as u16)?;
        self.write_array(&bytes)
    }

    pub fn write_string32(&mut self, enc: Encoding, s: &str, null_terminate: bool) -> Result<()> {
        let bytes = encoding::to_bytes(enc, s, null_terminate)?;
        self.write_u32(bytes.len() as u32)?;
        self.write_array(&bytes)
    }

    pub fn write_string32_be(&mut self, enc: Encoding, s: &str, null_terminate: bool) -> Result<()> {
        let bytes = encoding::to_bytes(enc, s, null_terminate)?;
        self.write_u32_be(bytes.len() as u32)?;
        self.write_array(&bytes)
    }

    pub fn write_string32_le(&mut self, enc: Encoding, s: &str, null_terminate: bool) -> Result<()> {
        let bytes = encoding::to_bytes(enc, s, null_terminate)?;
        self.write_u32_le(bytes.len() as u32)?;
        self.write_array(&bytes)
    }

    fn checked_string16(&self, enc: Encoding, s: &str, null_terminate: bool) -> Result<Vec<u8>> {
        let bytes = encoding::to_bytes(enc, s, null_terminate)?;
        if bytes.len() > u16::MAX as usize {
            return Err(PacketError::Overflow {
                requested: bytes.len() as u32,
            });
        }
        Ok(bytes)
    }

    /// Grow the valid window to exactly `sz` bytes and expose it mutably.
    /// The cursor must not be past `sz`.
    pub fn direct(&mut self, sz: u32) -> Result<&mut [u8]> {
        if sz as usize > MAX_PACKET_SIZE || self.position > sz as usize {
            return Err(PacketError::OutOfBounds {
                position: self.position as u32,
                size: sz,
            });
        }
        self.data.resize(sz as usize, 0);
        Ok(&mut self.data)
    }

    /// Copy `sz` bytes starting at the cursor into `other` (cleared first,
    /// rewound afterwards). The source cursor does not move.
    pub fn split_into(&self, other: &mut Packet, sz: u32) -> Result<()> {
        other.clear();
        if sz == 0 {
            return Ok(());
        }
        let bytes = self.peek_bytes(sz)?.to_vec();
        other.write_array(&bytes)?;
        other.rewind();
        Ok(())
    }

    /// Compress the `sz` bytes at the cursor in place (zlib). Returns the
    /// compressed size, or 0 on failure. The cursor does not move.
    pub fn compress(&mut self, sz: u32) -> u32 {
        if sz == 0 || self.position + sz as usize > self.data.len() {
            return 0;
        }

        let input = self.data[self.position..self.position + sz as usize].to_vec();
        let mut output = vec![0u8; MAX_PACKET_SIZE - self.position];

        let mut compressor = Compress::new(Compression::default(), true);
        match compressor.compress(&input, &mut output, FlushCompress::Finish) {
            Ok(Status::StreamEnd) => {}
            _ => return 0,
        }

        let written = compressor.total_out() as usize;
        self.data.truncate(self.position);
        self.data.extend_from_slice(&output[..written]);
        written as u32
    }

    /// Decompress the `sz` bytes at the cursor in place. Returns the
    /// decompressed size, or 0 on failure. The cursor does not move.
    pub fn decompress(&mut self, sz: u32) -> u32 {
        if sz == 0 || self.position + sz as usize > self.data.len() {
            return 0;
        }

        let input = self.data[self.position..self.position + sz as usize].to_vec();
        let mut output = vec![0u8; MAX_PACKET_SIZE - self.position];

        let mut decompressor = Decompress::new(true);
        match decompressor.decompress(&input, &mut output, FlushDecompress::Finish) {
            Ok(Status::StreamEnd) => {}
            _ => return 0,
        }

        let written = decompressor.total_out() as usize;
        self.data.truncate(self.position);
        self.data.extend_from_slice(&output[..written]);
        written as u32
    }

    /// Consume the packet, producing a shared read-only view over its bytes.
    pub fn into_view(self) -> PacketView {
        PacketView::from_vec(self.data)
    }
}

impl From<Packet> for PacketView {
    fn from(p: Packet) -> Self {
        p.into_view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_roundtrip_all_orders() {
        let mut p = Packet::new();
        p.write_u16_be(0x1234).unwrap();
        p.write_u16_le(0x1234).unwrap();
        p.write_u32_be(0xDEADBEEF).unwrap();
        p.write_u32_le(0xDEADBEEF).unwrap();
        p.write_i64_be(-42).unwrap();
        p.write_f64(1.5).unwrap();
        p.rewind();

        assert_eq!(p.read_u16_be().unwrap(), 0x1234);
        assert_eq!(p.read_u16_le().unwrap(), 0x1234);
        assert_eq!(p.read_u32_be().unwrap(), 0xDEADBEEF);
        assert_eq!(p.read_u32_le().unwrap(), 0xDEADBEEF);
        assert_eq!(p.read_i64_be().unwrap(), -42);
        assert_eq!(p.read_f64().unwrap(), 1.5);
        assert_eq!(p.left(), 0);
    }

    #[test]
    fn test_position_tracks_writes() {
        let mut p = Packet::new();
        assert_eq!(p.tell(), 0);
        p.write_u32(7).unwrap();
        assert_eq!(p.tell(), 4);
        assert_eq!(p.size(), 4);
        p.write_blank(6).unwrap();
        assert_eq!(p.tell(), 10);
        assert_eq!(p.size(), 10);
    }

    #[test]
    fn test_overwrite_does_not_grow() {
        let mut p = Packet::new();
        p.write_u32(0).unwrap();
        p.write_u32(0).unwrap();
        p.seek(0).unwrap();
        p.write_u32(9).unwrap();
        assert_eq!(p.size(), 8);
    }

    #[test]
    fn test_read_past_end_fails() {
        let mut p = Packet::from_bytes(&[1, 2]).unwrap();
        assert!(p.read_u32().is_err());
        // Failed read leaves the cursor alone.
        assert_eq!(p.tell(), 0);
        assert_eq!(p.read_u16().unwrap(), u16::from_ne_bytes([1, 2]));
    }

    #[test]
    fn test_seek_out_of_bounds() {
        let mut p = Packet::from_bytes(&[0; 4]).unwrap();
        assert!(p.seek(5).is_err());
        assert!(p.seek(4).is_ok());
        assert!(p.skip(1).is_err());
        assert!(p.rewind_by(5).is_err());
        p.rewind();
        assert_eq!(p.tell(), 0);
    }

    #[test]
    fn test_cap_enforced() {
        let mut p = Packet::new();
        p.write_blank(MAX_PACKET_SIZE as u32).unwrap();
        assert_eq!(p.free(), 0);
        assert!(p.write_u8(0).is_err());
    }

    #[test]
    fn test_peek_does_not_advance() {
        let mut p = Packet::from_bytes(&[0xAB, 0xCD]).unwrap();
        assert_eq!(p.peek_u16_be().unwrap(), 0xABCD);
        assert_eq!(p.tell(), 0);
        assert_eq!(p.read_u16_be().unwrap(), 0xABCD);
    }

    #[test]
    fn test_null_terminated_string() {
        let mut p = Packet::new();
        p.write_string(Encoding::Utf8, "abc", true).unwrap();
        p.write_u8(0x7F).unwrap();
        p.rewind();
        assert_eq!(p.read_string(Encoding::Utf8).unwrap(), "abc");
        // The terminator was consumed.
        assert_eq!(p.read_u8().unwrap(), 0x7F);
    }

    #[test]
    fn test_length_prefixed_string_cp932() {
        let mut p = Packet::new();
        p.write_string16_le(Encoding::Cp932, "日本語", true).unwrap();
        p.rewind();
        // 6 bytes of Shift-JIS plus the NUL.
        assert_eq!(p.peek_u16_le().unwrap(), 7);
        assert_eq!(p.read_string16_le(Encoding::Cp932, true).unwrap(), "日本語");
        assert_eq!(p.left(), 0);
    }

    #[test]
    fn test_string32_big_endian() {
        let mut p = Packet::new();
        p.write_string32_be(Encoding::Utf8, "2", false).unwrap();
        p.rewind();
        assert_eq!(p.peek_u32_be().unwrap(), 1);
        assert_eq!(p.read_string32_be(Encoding::Utf8, false).unwrap(), "2");
    }

    #[test]
    fn test_erase_right() {
        let mut p = Packet::from_bytes(&[1, 2, 3, 4]).unwrap();
        p.seek(2).unwrap();
        p.erase_right();
        assert_eq!(p.size(), 2);
        assert_eq!(p.left(), 0);
    }

    #[test]
    fn test_split_into() {
        let mut src = Packet::from_bytes(&[9, 8, 7, 6]).unwrap();
        src.seek(1).unwrap();
        let mut dst = Packet::new();
        src.split_into(&mut dst, 2).unwrap();
        assert_eq!(dst.size(), 2);
        assert_eq!(dst.read_u8().unwrap(), 8);
        assert_eq!(dst.read_u8().unwrap(), 7);
        // Source cursor untouched.
        assert_eq!(src.tell(), 1);
    }

    #[test]
    fn test_compress_roundtrip() {
        let payload = vec![0x41u8; 512];
        let mut p = Packet::new();
        p.write_u32(0).unwrap();
        p.write_array(&payload).unwrap();
        p.seek(4).unwrap();

        let compressed = p.compress(512);
        assert!(compressed > 0 && compressed < 512);
        assert_eq!(p.tell(), 4);
        assert_eq!(p.size(), 4 + compressed);

        let restored = p.decompress(compressed);
        assert_eq!(restored, 512);
        assert_eq!(p.tell(), 4);
        assert_eq!(&p.data()[4..], &payload[..]);
    }

    #[test]
    fn test_compress_bad_range_returns_zero() {
        let mut p = Packet::from_bytes(&[1, 2, 3]).unwrap();
        assert_eq!(p.compress(10), 0);
        assert_eq!(p.decompress(10), 0);
    }

    #[test]
    fn test_dump_marks_cursor() {
        let mut p = Packet::from_bytes(b"ABCDEFGHIJKLMNOPQR").unwrap();
        p.seek(2).unwrap();
        let dump = p.dump();
        let first = dump.lines().next().unwrap();
        assert!(first.contains("41 42{43}44"), "dump was: {first}");
        assert!(first.contains("ABCDEFGH"));
        assert_eq!(dump.lines().count(), 2);
    }

    #[test]
    fn test_dump_empty() {
        let p = Packet::new();
        assert_eq!(p.dump(), "");
    }
}
