//! Key material for the tunnel interface.
//!
//! A node is identified by a static X25519 keypair, the same key type the
//! kernel tunnel device uses. The private key is generated once, written to
//! disk as base64 text with mode 0600, and re-read on every start. The public
//! key is never stored; it is always derived from the private key.
//!
//! Private key bytes live in `Zeroizing` storage and are wiped on drop.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use base64::prelude::*;
use thiserror::Error;
use x25519_dalek::{PublicKey as DalekPublic, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Length of both public and private keys.
pub const KEY_LEN: usize = 32;

// ── PublicKey ────────────────────────────────────────────────────────────────

/// A node's public identity.
///
/// Equality and ordering are plain byte comparison over the fixed 32 bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey([u8; KEY_LEN]);

impl PublicKey {
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Decode from a raw byte slice, e.g. a database column.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, KeyError> {
        let arr: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| KeyError::BadLength(bytes.len()))?;
        Ok(Self(arr))
    }

    /// Standard base64, as the tunnel tooling prints keys.
    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(self.0)
    }

    /// Short hex prefix for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_base64())
    }
}

impl FromStr for PublicKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = BASE64_STANDARD.decode(s.trim())?;
        Self::from_slice(&bytes)
    }
}

// ── PrivateKey ───────────────────────────────────────────────────────────────

/// A node's static private key. Zeroized on drop, never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKey(Zeroizing<[u8; KEY_LEN]>);

impl PrivateKey {
    /// Generate a new random private key.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand::thread_rng());
        Self(Zeroizing::new(secret.to_bytes()))
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Derive the matching public key.
    pub fn public_key(&self) -> PublicKey {
        let secret = StaticSecret::from(*self.0);
        PublicKey(*DalekPublic::from(&secret).as_bytes())
    }

    /// Base64 text form. Only for handing to the tunnel device or the key file.
    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(BASE64_STANDARD.encode(self.0.as_slice()))
    }

    pub fn from_base64(text: &str) -> Result<Self, KeyError> {
        let decoded = Zeroizing::new(BASE64_STANDARD.decode(text.trim())?);
        let arr: [u8; KEY_LEN] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::BadLength(decoded.len()))?;
        Ok(Self::from_bytes(arr))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

// ── Storage ──────────────────────────────────────────────────────────────────

/// Read the private key at `path`, generating and writing a new one first
/// if the file does not exist.
pub fn load_or_generate(path: &Path) -> Result<PrivateKey, KeyError> {
    if !path.exists() {
        let key = PrivateKey::generate();
        write_private_key(path, &key)?;
    }
    read_private_key(path)
}

/// Write a private key as base64 text, owner read/write only.
pub fn write_private_key(path: &Path, key: &PrivateKey) -> Result<(), KeyError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| KeyError::WriteFailed(path.to_path_buf(), e))?;
        }
    }
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
        .map_err(|e| KeyError::WriteFailed(path.to_path_buf(), e))?;
    let mut text = key.to_base64();
    text.push('\n');
    file.write_all(text.as_bytes())
        .map_err(|e| KeyError::WriteFailed(path.to_path_buf(), e))?;
    Ok(())
}

pub fn read_private_key(path: &Path) -> Result<PrivateKey, KeyError> {
    let text = Zeroizing::new(
        std::fs::read_to_string(path).map_err(|e| KeyError::ReadFailed(path.to_path_buf(), e))?,
    );
    PrivateKey::from_base64(&text)
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to read key file {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to write key file {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("key is not valid base64: {0}")]
    Encoding(#[from] base64::DecodeError),
    #[error("key must be 32 bytes, got {0}")]
    BadLength(usize),
}
