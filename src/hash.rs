//! Content fingerprints.
//!
//! Every block is named by the SHA-256 digest of its bytes. The digest is
//! treated as collision-free for identity purposes: two blocks with the same
//! fingerprint are assumed to hold the same bytes and are never compared
//! byte-for-byte. The width is fixed at 256 bits; changing it would change
//! the name of every stored block.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

/// Fingerprint width in bytes
pub const FINGERPRINT_LEN: usize = 32;

/// SHA-256 digest identifying a block of content
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Fingerprint a byte span
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn from_digest(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Lowercase hex, the on-disk name of a block
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != FINGERPRINT_LEN * 2 {
            return Err(Error::InvalidManifest {
                reason: format!("fingerprint '{}' is not {} hex characters", s, FINGERPRINT_LEN * 2),
            });
        }
        let mut bytes = [0u8; FINGERPRINT_LEN];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| Error::InvalidManifest {
            reason: format!("fingerprint '{}' is not valid hex: {}", s, e),
        })?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.to_hex()
    }
}

/// Incremental SHA-256 over a stream that arrives in pieces
#[derive(Default)]
pub struct StreamHasher {
    inner: Sha256,
    bytes: u64,
}

impl StreamHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.bytes += data.len() as u64;
    }

    /// Number of bytes fed so far
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn finalize(self) -> Fingerprint {
        Fingerprint(self.inner.finalize().into())
    }
}

impl io::Write for StreamHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Hash everything a reader yields without buffering it whole
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<Fingerprint> {
    let mut hasher = StreamHasher::new();
    io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize())
}

/// Seal an ordered block list into a single BLAKE3 root.
///
/// Pairs are combined level by level; an odd trailing node is promoted
/// unchanged. The empty list seals to the hash of the empty string.
pub fn merkle_root(blocks: &[Fingerprint]) -> String {
    if blocks.is_empty() {
        return blake3::hash(b"").to_hex().to_string();
    }

    let mut level: Vec<[u8; 32]> = blocks.iter().map(|fp| *blake3::hash(&fp.0).as_bytes()).collect();

    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                if pair.len() == 1 {
                    return pair[0];
                }
                let mut hasher = blake3::Hasher::new();
                hasher.update(&pair[0]);
                hasher.update(&pair[1]);
                *hasher.finalize().as_bytes()
            })
            .collect();
    }

    hex::encode(level[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fingerprint_of_known_input() {
        let fp = Fingerprint::of(b"hello world");
        assert_eq!(
            fp.to_hex(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let data = vec![7u8; 4096];
        assert_eq!(Fingerprint::of(&data), Fingerprint::of(&data));
        assert_ne!(Fingerprint::of(&data), Fingerprint::of(&data[1..]));
    }

    #[test]
    fn test_fingerprint_parse_rejects_bad_text() {
        assert!("abc".parse::<Fingerprint>().is_err());
        assert!("zz".repeat(32).parse::<Fingerprint>().is_err());

        let fp = Fingerprint::of(b"x");
        assert_eq!(fp.to_hex().parse::<Fingerprint>().unwrap(), fp);
    }

    #[test]
    fn test_fingerprint_serializes_as_hex_string() {
        let fp = Fingerprint::of(b"block");
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", fp.to_hex()));
    }

    #[test]
    fn test_stream_hasher_matches_one_shot() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut hasher = StreamHasher::new();
        for piece in data.chunks(333) {
            hasher.update(piece);
        }
        assert_eq!(hasher.bytes(), data.len() as u64);
        assert_eq!(hasher.finalize(), Fingerprint::of(&data));
        assert_eq!(hash_reader(&data[..]).unwrap(), Fingerprint::of(&data));
    }

    #[test]
    fn test_merkle_root_depends_on_order() {
        let a = Fingerprint::of(b"a");
        let b = Fingerprint::of(b"b");
        let c = Fingerprint::of(b"c");

        assert_ne!(merkle_root(&[a, b, c]), merkle_root(&[b, a, c]));
        assert_eq!(merkle_root(&[a, b, c]), merkle_root(&[a, b, c]));
        assert_eq!(merkle_root(&[]), blake3::hash(b"").to_hex().to_string());
    }
}
