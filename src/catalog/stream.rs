//! Binary table stream.
//!
//! Every static table file starts with a header of two little-endian u16s,
//! `entryCount` and `tableCount`, followed by `tableCount * entryCount`
//! little-endian u16 dynamic sizes, then `entryCount` records. Each record's
//! dynamically sized members (strings, lists) consume the next size from the
//! header stream in declaration order.

use std::collections::VecDeque;

use crate::encoding::{self, Encoding};
use crate::error::{Error, Result};

pub struct BinaryStream<'a> {
    data: &'a [u8],
    pos: usize,
    dynamic_sizes: VecDeque<u16>,
}

impl<'a> BinaryStream<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            dynamic_sizes: VecDeque::new(),
        }
    }

    /// Parse the table header. `tables_expected` of zero disables the table
    /// count check. Returns `(entry_count, table_count)`.
    pub fn read_header(&mut self, tables_expected: u16) -> Result<(u16, u16)> {
        let entry_count = self.read_u16()?;
        let table_count = self.read_u16()?;

        if tables_expected > 0 && tables_expected != table_count {
            return Err(Error::Validation(format!(
                "expected {tables_expected} table(s) but encountered {table_count}"
            )));
        }

        let dynamic_count = entry_count as usize * table_count as usize;
        for _ in 0..dynamic_count {
            let size = self.read_u16()?;
            self.dynamic_sizes.push_back(size);
        }

        Ok((entry_count, table_count))
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.pos + count > self.data.len() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "short read in binary table",
            )));
        }
        let slice = &self.data[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_bytes(2)?.try_into().unwrap()))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_bytes(8)?.try_into().unwrap()))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.read_bytes(4)?.try_into().unwrap()))
    }

    fn next_dynamic_size(&mut self) -> Result<u16> {
        self.dynamic_sizes.pop_front().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "dynamic size stream exhausted",
            ))
        })
    }

    /// Read one dynamically sized string member. Trailing NUL padding is
    /// trimmed before decoding.
    pub fn read_dynamic_string(&mut self, enc: Encoding) -> Result<String> {
        let size = self.next_dynamic_size()? as usize;
        let mut bytes = self.read_bytes(size)?;
        while let [rest @ .., 0] = bytes {
            bytes = rest;
        }
        Ok(encoding::from_bytes(enc, bytes)?)
    }

    /// Read one dynamically sized list of u32 values. The size from the
    /// header stream is in bytes.
    pub fn read_dynamic_list_u32(&mut self) -> Result<Vec<u32>> {
        let size = self.next_dynamic_size()? as usize;
        if size % 4 != 0 {
            return Err(Error::Validation(format!(
                "dynamic list size {size} is not a multiple of 4"
            )));
        }
        let bytes = self.read_bytes(size)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
            .collect())
    }

    /// Read one dynamically sized list of i16 values.
    pub fn read_dynamic_list_i16(&mut self) -> Result<Vec<i16>> {
        let size = self.next_dynamic_size()? as usize;
        if size % 2 != 0 {
            return Err(Error::Validation(format!(
                "dynamic list size {size} is not a multiple of 2"
            )));
        }
        let bytes = self.read_bytes(size)?;
        Ok(bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes(c.try_into().unwrap()))
            .collect())
    }
}

/// Helper for building table files in tests and tools.
#[derive(Default)]
pub struct BinaryTableBuilder {
    entry_count: u16,
    dynamic_sizes: Vec<u16>,
    body: Vec<u8>,
}

impl BinaryTableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_entry(&mut self) -> &mut Self {
        self.entry_count += 1;
        self
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.body.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.body.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i16(&mut self, v: i16) -> &mut Self {
        self.body.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.body.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.body.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn f32(&mut self, v: f32) -> &mut Self {
        self.body.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn string(&mut self, enc: Encoding, s: &str) -> &mut Self {
        let mut bytes = encoding::to_bytes(enc, s, true).expect("encodable string");
        self.dynamic_sizes.push(bytes.len() as u16);
        self.body.append(&mut bytes);
        self
    }

    pub fn list_u32(&mut self, values: &[u32]) -> &mut Self {
        self.dynamic_sizes.push((values.len() * 4) as u16);
        for v in values {
            self.body.extend_from_slice(&v.to_le_bytes());
        }
        self
    }

    pub fn list_i16(&mut self, values: &[i16]) -> &mut Self {
        self.dynamic_sizes.push((values.len() * 2) as u16);
        for v in values {
            self.body.extend_from_slice(&v.to_le_bytes());
        }
        self
    }

    /// Finish the file with the given table count per entry.
    pub fn build(&self, table_count: u16) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.entry_count.to_le_bytes());
        out.extend_from_slice(&table_count.to_le_bytes());
        for size in &self.dynamic_sizes {
            out.extend_from_slice(&size.to_le_bytes());
        }
        out.extend_from_slice(&self.body);
        out
    }
}
