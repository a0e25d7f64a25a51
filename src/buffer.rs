//! Buffer units flowing between pipes.
//!
//! The runtime never looks inside a buffer: it moves buffers between pipes
//! and hands them across threads through a [`Queue`](crate::queue::Queue).
//! Payloads are immutable once built and cheap to share, since cloning a
//! buffer only takes another reference on the underlying bytes.

use bytes::Bytes;
use std::fmt;

/// An immutable, reference-counted unit of data.
#[derive(Clone, PartialEq, Eq)]
pub struct Buffer {
    data: Bytes,
    sequence: u64,
}

impl Buffer {
    /// Create a buffer from shared bytes and a sequence number.
    pub fn new(data: Bytes, sequence: u64) -> Self {
        Self { data, sequence }
    }

    /// Create a buffer over static data.
    pub fn from_static(data: &'static [u8], sequence: u64) -> Self {
        Self::new(Bytes::from_static(data), sequence)
    }

    /// Create a buffer taking ownership of a vector.
    pub fn from_vec(data: Vec<u8>, sequence: u64) -> Self {
        Self::new(Bytes::from(data), sequence)
    }

    /// Create an empty buffer. Useful as a pure timing/flow marker.
    pub fn empty(sequence: u64) -> Self {
        Self::new(Bytes::new(), sequence)
    }

    /// Get the sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Get the payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the payload as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Get the shared payload handle.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Take the shared payload handle.
    pub fn into_data(self) -> Bytes {
        self.data
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("sequence", &self.sequence)
            .field("len", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_payload() {
        let a = Buffer::from_vec(vec![1, 2, 3], 4);
        let b = a.clone();
        assert_eq!(a.as_slice().as_ptr(), b.as_slice().as_ptr());
        assert_eq!(b.sequence(), 4);
        assert_eq!(b.len(), 3);
    }

    #[test]
    fn test_empty_marker() {
        let buf = Buffer::empty(9);
        assert!(buf.is_empty());
        assert_eq!(format!("{:?}", buf), "Buffer { sequence: 9, len: 0 }");
    }
}
