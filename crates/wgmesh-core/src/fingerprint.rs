//! Membership fingerprint — cheap change detection for registry polls.
//!
//! The digest covers public keys only. Peers are sorted by key (descending
//! byte order) and their raw key bytes are hashed in that order with BLAKE3,
//! so two polls with the same key multiset always produce the same digest no
//! matter what order the registry returned them in.
//!
//! Endpoint and address changes are not part of the digest: a peer that
//! moves without rotating its key does not trigger a rebuild.

use std::fmt;

use crate::peer::Peer;

/// A 32-byte BLAKE3 digest over a peer set.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Digest of the empty peer set. The reconciler starts from this.
    pub fn empty() -> Self {
        Self(*blake3::hash(&[]).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Default for Fingerprint {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", hex::encode(&self.0[..8]))
    }
}

/// Fingerprint a peer set.
///
/// Sorts `peers` in place by public key, descending. Callers must not rely
/// on the order they passed in.
pub fn fingerprint(peers: &mut [Peer]) -> Fingerprint {
    peers.sort_by(|a, b| b.public_key.cmp(&a.public_key));
    let mut hasher = blake3::Hasher::new();
    for peer in peers.iter() {
        hasher.update(peer.public_key.as_bytes());
    }
    Fingerprint(*hasher.finalize().as_bytes())
}
