//! Four-byte type tags used to validate control calls and custom events.

use std::fmt;

/// A fixed-size tag identifying one pipe kind.
///
/// Control calls and custom probe events carry a signature so that a caller
/// written for one kind cannot have its arguments misread by another kind
/// that happens to use the same opcode.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature([u8; 4]);

impl Signature {
    /// Create a signature from four bytes.
    pub const fn new(tag: [u8; 4]) -> Self {
        Self(tag)
    }

    /// Create a signature from a packed big-endian integer.
    pub const fn from_u32(value: u32) -> Self {
        Self(value.to_be_bytes())
    }

    /// Get the packed big-endian integer value.
    pub const fn as_u32(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self)
    }
}
