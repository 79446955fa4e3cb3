//! Read-only packet views over shared storage.

use std::sync::Arc;

use crate::error::PacketError;

use super::PacketReader;

/// A read-only window into reference-counted packet storage.
///
/// Cloning a view, or carving a sub-view with [`PacketView::view`], never
/// copies the bytes. Each view carries its own cursor, so multiple readers
/// can walk the same storage independently. The storage outlives every view
/// derived from it.
#[derive(Debug, Clone)]
pub struct PacketView {
    storage: Arc<[u8]>,
    start: u32,
    size: u32,
    position: u32,
}

impl PacketReader for PacketView {
    fn data(&self) -> &[u8] {
        &self.storage[self.start as usize..(self.start + self.size) as usize]
    }

    fn tell(&self) -> u32 {
        self.position
    }

    fn set_position(&mut self, pos: u32) {
        self.position = pos;
    }
}

impl PacketView {
    pub(crate) fn from_vec(data: Vec<u8>) -> Self {
        let size = data.len() as u32;
        Self {
            storage: data.into(),
            start: 0,
            size,
            position: 0,
        }
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }

    /// A sub-view of `size` bytes starting at `start` (relative to this
    /// view), sharing the same storage with a fresh cursor.
    pub fn view(&self, start: u32, size: u32) -> Result<PacketView, PacketError> {
        if start + size > self.size {
            return Err(PacketError::OutOfBounds {
                position: start + size,
                size: self.size,
            });
        }
        Ok(PacketView {
            storage: Arc::clone(&self.storage),
            start: self.start + start,
            size,
            position: 0,
        })
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;

    #[test]
    fn test_view_shares_storage() {
        let mut p = Packet::new();
        p.write_array(&[1, 2, 3, 4, 5, 6]).unwrap();
        let view = p.into_view();

        let sub = view.view(2, 3).unwrap();
        assert_eq!(sub.size(), 3);
        assert_eq!(sub.to_vec(), vec![3, 4, 5]);
        // Parent storage is still reachable through the original view.
        assert_eq!(view.size(), 6);
    }

    #[test]
    fn test_independent_cursors() {
        let view = PacketView::from_bytes(&[0xAA, 0xBB, 0xCC]);
        let mut a = view.clone();
        let mut b = view;

        assert_eq!(a.read_u8().unwrap(), 0xAA);
        assert_eq!(b.read_u8().unwrap(), 0xAA);
        assert_eq!(a.read_u8().unwrap(), 0xBB);
        assert_eq!(a.tell(), 2);
        assert_eq!(b.tell(), 1);
    }

    #[test]
    fn test_nested_view_offsets() {
        let view = PacketView::from_bytes(&[0, 1, 2, 3, 4, 5, 6, 7]);
        let outer = view.view(2, 5).unwrap();
        let inner = outer.view(1, 3).unwrap();
        assert_eq!(inner.to_vec(), vec![3, 4, 5]);
    }

    #[test]
    fn test_view_out_of_bounds() {
        let view = PacketView::from_bytes(&[0; 4]);
        assert!(view.view(2, 3).is_err());
        assert!(view.view(0, 4).is_ok());
    }
}
