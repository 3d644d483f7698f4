// src/hash.rs

//! Content addresses
//!
//! Every chunk is named by the first 20 bytes of the SHA-256 of its
//! contents. Addresses are compared as raw bytes and rendered as 40
//! hex characters. The all-zero address is reserved to mean "absent"
//! (an empty store root, a missing parent).

use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Length of an address in bytes
pub const ADDR_LEN: usize = 20;

/// A 20-byte content address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Addr(pub [u8; ADDR_LEN]);

impl Addr {
    /// The reserved all-zero address, used where no chunk exists yet
    pub const EMPTY: Addr = Addr([0u8; ADDR_LEN]);

    /// Hash bytes into their address
    pub fn of(data: &[u8]) -> Addr {
        let digest = Sha256::digest(data);
        let mut out = [0u8; ADDR_LEN];
        out.copy_from_slice(&digest[..ADDR_LEN]);
        Addr(out)
    }

    /// True if this is the reserved empty address
    pub fn is_empty(&self) -> bool {
        *self == Addr::EMPTY
    }

    pub fn as_bytes(&self) -> &[u8; ADDR_LEN] {
        &self.0
    }

    /// Read an address from a byte slice; errors on wrong length
    pub fn from_slice(bytes: &[u8]) -> Result<Addr, AddrParseError> {
        if bytes.len() != ADDR_LEN {
            return Err(AddrParseError::InvalidLength(bytes.len()));
        }
        let mut out = [0u8; ADDR_LEN];
        out.copy_from_slice(bytes);
        Ok(Addr(out))
    }

    /// Render as 40 lowercase hex characters
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Default for Addr {
    fn default() -> Self {
        Addr::EMPTY
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Address parse failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddrParseError {
    InvalidLength(usize),
    InvalidHex(String),
}

impl fmt::Display for AddrParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidLength(got) => {
                write!(f, "invalid address length: expected {}, got {}", ADDR_LEN, got)
            }
            Self::InvalidHex(s) => write!(f, "invalid hex in address: {}", s),
        }
    }
}

impl std::error::Error for AddrParseError {}

impl FromStr for Addr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ADDR_LEN * 2 {
            return Err(AddrParseError::InvalidLength(s.len() / 2));
        }
        let bytes = hex::decode(s).map_err(|_| AddrParseError::InvalidHex(s.to_string()))?;
        Addr::from_slice(&bytes)
    }
}

impl From<AddrParseError> for crate::Error {
    fn from(e: AddrParseError) -> Self {
        crate::Error::Argument(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_of_stable() {
        let a = Addr::of(b"Hello, World!");
        let b = Addr::of(b"Hello, World!");
        assert_eq!(a, b);
        // First 20 bytes of the SHA-256 of "Hello, World!"
        assert_eq!(a.to_hex(), "dffd6021bb2bd5b0af676290809ec3a53191dd81");
    }

    #[test]
    fn test_addr_roundtrip() {
        let a = Addr::of(b"some chunk");
        let parsed: Addr = a.to_hex().parse().unwrap();
        assert_eq!(a, parsed);
    }

    #[test]
    fn test_addr_parse_errors() {
        assert!(matches!(
            "abcd".parse::<Addr>(),
            Err(AddrParseError::InvalidLength(_))
        ));
        let bad = "g".repeat(40);
        assert!(matches!(
            bad.parse::<Addr>(),
            Err(AddrParseError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_empty_addr() {
        assert!(Addr::EMPTY.is_empty());
        assert!(!Addr::of(b"x").is_empty());
    }

    #[test]
    fn test_addr_ordering() {
        let mut addrs = vec![Addr::of(b"b"), Addr::of(b"a"), Addr::of(b"c")];
        addrs.sort();
        let hexes: Vec<String> = addrs.iter().map(|a| a.to_hex()).collect();
        let mut sorted = hexes.clone();
        sorted.sort();
        assert_eq!(hexes, sorted);
    }
}
