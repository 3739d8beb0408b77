//! Integrity Digests
//!
//! SHA-256 digests for recovery snapshots and HMAC-SHA256 for action
//! checksums and per-participant action keys. Each digest is bound to a
//! [`DigestDomain`], so a value computed for one purpose never validates as
//! another.

use hmac::digest::Key;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// What a digest is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DigestDomain {
    /// Checksum over a proposed action.
    Action,
    /// Per-participant key derived from a session secret.
    ActionKey,
    /// Recovery snapshot payload.
    Snapshot,
}

impl DigestDomain {
    fn tag(self) -> &'static [u8] {
        match self {
            DigestDomain::Action => b"relic-session/action/v1",
            DigestDomain::ActionKey => b"relic-session/action-key/v1",
            DigestDomain::Snapshot => b"relic-session/snapshot/v1",
        }
    }
}

/// Chained digest builder. Field order is part of the digest; variable
/// length fields are length-prefixed.
pub struct Digester {
    inner: Inner,
}

enum Inner {
    Plain(Sha256),
    Keyed(HmacSha256),
}

impl Inner {
    fn update(&mut self, bytes: &[u8]) {
        match self {
            Inner::Plain(hasher) => Digest::update(hasher, bytes),
            Inner::Keyed(mac) => Mac::update(mac, bytes),
        }
    }
}

impl Digester {
    /// Start an unkeyed SHA-256 digest in `domain`.
    pub fn new(domain: DigestDomain) -> Self {
        Self::start(Inner::Plain(Sha256::new()), domain)
    }

    /// Start an HMAC-SHA256 under `key` in `domain`. Keys of any length are
    /// accepted.
    pub fn keyed(domain: DigestDomain, key: &[u8]) -> Self {
        Self::start(Inner::Keyed(<HmacSha256 as Mac>::new(&key_block(key))), domain)
    }

    fn start(inner: Inner, domain: DigestDomain) -> Self {
        let tag = domain.tag();
        let mut digester = Self { inner };
        digester.inner.update(&(tag.len() as u32).to_le_bytes());
        digester.inner.update(tag);
        digester
    }

    /// Length-prefixed bytes.
    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        self.inner.update(&(bytes.len() as u64).to_le_bytes());
        self.inner.update(bytes);
        self
    }

    /// A 16-byte identifier.
    pub fn id(mut self, id: &[u8; 16]) -> Self {
        self.inner.update(id);
        self
    }

    /// Little-endian u64.
    pub fn u64(mut self, value: u64) -> Self {
        self.inner.update(&value.to_le_bytes());
        self
    }

    /// Little-endian u32.
    pub fn u32(mut self, value: u32) -> Self {
        self.inner.update(&value.to_le_bytes());
        self
    }

    /// Single byte.
    pub fn u8(mut self, value: u8) -> Self {
        self.inner.update(&[value]);
        self
    }

    /// Presence flag.
    pub fn flag(self, value: bool) -> Self {
        self.u8(value as u8)
    }

    /// The digest.
    pub fn finish(self) -> StateHash {
        match self.inner {
            Inner::Plain(hasher) => hasher.finalize().into(),
            Inner::Keyed(mac) => mac.finalize().into_bytes().into(),
        }
    }
}

/// HMAC key normalization: keys longer than a block are hashed, shorter ones
/// are zero-padded. The MAC over the block equals the MAC over `key`.
fn key_block(key: &[u8]) -> Key<HmacSha256> {
    let mut block = Key::<HmacSha256>::default();
    if key.len() > block.len() {
        let reduced = Sha256::digest(key);
        block[..reduced.len()].copy_from_slice(&reduced);
    } else {
        block[..key.len()].copy_from_slice(key);
    }
    block
}

/// HMAC-SHA256 of `data` under `key` in `domain`.
pub fn keyed_digest(domain: DigestDomain, key: &[u8], data: &[u8]) -> StateHash {
    Digester::keyed(domain, key).bytes(data).finish()
}

/// Compare two digests without short-circuiting on the first differing byte.
pub fn digests_match(a: &StateHash, b: &StateHash) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
