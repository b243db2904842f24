//! Key derivation: (password, album name) → album key

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::KEY_SIZE;

/// PBKDF2 rounds used for every published album.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// A 256-bit album key. Enough to open envelopes, not to produce them.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct AlbumKey {
    bytes: [u8; KEY_SIZE],
}

impl AlbumKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for AlbumKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for AlbumKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlbumKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// The producer's key: same material as [`AlbumKey`], plus the right to seal.
///
/// Derefs to [`AlbumKey`] so a producer can also open what it wrote.
#[derive(Clone, Debug)]
pub struct SealingKey(AlbumKey);

impl SealingKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(AlbumKey::from_bytes(bytes))
    }

    /// Drop the sealing capability.
    pub fn into_album_key(self) -> AlbumKey {
        self.0
    }
}

impl std::ops::Deref for SealingKey {
    type Target = AlbumKey;

    fn deref(&self) -> &AlbumKey {
        &self.0
    }
}

/// PBKDF2 parameters
#[derive(Debug, Clone)]
pub struct KdfParams {
    /// HMAC-SHA256 rounds (default: 100_000)
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: PBKDF2_ITERATIONS,
        }
    }
}

/// Salt = SHA-256(album name). Deterministic, so nothing is stored.
pub fn album_salt(album: &str) -> [u8; 32] {
    Sha256::digest(album.as_bytes()).into()
}

fn derive_bytes(password: &SecretString, album: &str, params: &KdfParams) -> [u8; KEY_SIZE] {
    let salt = album_salt(album);
    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        password.expose_secret().as_bytes(),
        &salt,
        params.iterations.max(1),
        &mut key,
    );
    tracing::debug!(album, iterations = params.iterations, "derived album key");
    key
}

/// Derive the viewer-side (open-only) key for `album`.
pub fn derive_album_key(password: &SecretString, album: &str, params: &KdfParams) -> AlbumKey {
    AlbumKey::from_bytes(derive_bytes(password, album, params))
}

/// Derive the producer-side key for `album`. Byte-identical to
/// [`derive_album_key`] for the same inputs.
pub fn derive_sealing_key(password: &SecretString, album: &str, params: &KdfParams) -> SealingKey {
    SealingKey::from_bytes(derive_bytes(password, album, params))
}
