//! AES-256-GCM envelope around one whole payload (a chunk archive or the manifest)
//!
//! Envelope format (binary):
//! ```text
//! [12 bytes: random nonce][N bytes: ciphertext][16 bytes: GCM tag]
//! ```
//!
//! A fresh nonce is drawn for every seal. There is no streaming mode: the
//! whole envelope is held in memory.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use pgal_core::{GalleryError, GalleryResult};
use rand::RngCore;

use crate::kdf::{AlbumKey, SealingKey};
use crate::{NONCE_SIZE, TAG_SIZE};

/// Encrypt `plaintext` into a self-contained envelope.
///
/// Returns: `[12-byte nonce][ciphertext][16-byte tag]`
pub fn seal(key: &SealingKey, plaintext: &[u8]) -> GalleryResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| anyhow::anyhow!("envelope encryption failed: {e}"))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Authenticate and decrypt an envelope produced by [`seal`].
///
/// Any failure (short input, wrong key, wrong album, flipped bit) is reported
/// as [`GalleryError::Authentication`]; nothing partial is ever returned.
pub fn open(key: &AlbumKey, envelope: &[u8]) -> GalleryResult<Vec<u8>> {
    if envelope.len() < NONCE_SIZE + TAG_SIZE {
        tracing::debug!(len = envelope.len(), "envelope shorter than nonce + tag");
        return Err(GalleryError::Authentication);
    }

    let (nonce_bytes, ciphertext) = envelope.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| GalleryError::Authentication)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KEY_SIZE;
    use proptest::prelude::*;

    fn key(byte: u8) -> SealingKey {
        SealingKey::from_bytes([byte; KEY_SIZE])
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let k = key(1);
        let sealed = seal(&k, b"hello, sealed album").unwrap();
        assert_eq!(open(&k, &sealed).unwrap(), b"hello, sealed album");
    }

    #[test]
    fn test_seal_open_empty() {
        let k = key(1);
        let sealed = seal(&k, b"").unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + TAG_SIZE);
        assert_eq!(open(&k, &sealed).unwrap(), b"");
    }

    #[test]
    fn test_envelope_size() {
        let sealed = seal(&key(1), &[0u8; 1000]).unwrap();
        // nonce (12) + plaintext (1000) + tag (16) = 1028
        assert_eq!(sealed.len(), 12 + 1000 + 16);
    }

    #[test]
    fn test_fresh_nonce_per_seal() {
        let k = key(1);
        let a = seal(&k, b"same").unwrap();
        let b = seal(&k, b"same").unwrap();
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE], "nonces must not repeat");
    }

    #[test]
    fn test_open_wrong_key() {
        let sealed = seal(&key(1), b"secret").unwrap();
        let err = open(&key(2), &sealed).unwrap_err();
        assert!(matches!(err, GalleryError::Authentication));
    }

    #[test]
    fn test_open_truncated() {
        let err = open(&key(1), &[0u8; 20]).unwrap_err();
        assert!(matches!(err, GalleryError::Authentication));
    }

    proptest! {
        #[test]
        fn seal_open_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..=4096)) {
            let k = key(9);
            let sealed = seal(&k, &data).unwrap();
            prop_assert_eq!(open(&k, &sealed).unwrap(), data);
        }

        #[test]
        fn any_bit_flip_is_rejected(
            data in proptest::collection::vec(any::<u8>(), 0..=512),
            pos in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let k = key(9);
            let mut sealed = seal(&k, &data).unwrap();
            let i = pos.index(sealed.len());
            sealed[i] ^= 1 << bit;
            prop_assert!(matches!(open(&k, &sealed), Err(GalleryError::Authentication)));
        }
    }
}
