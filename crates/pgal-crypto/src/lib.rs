//! pgal-crypto: album keys and the sealed-file envelope
//!
//! Every `.enc` file of an album (manifest and chunk archives) is one envelope:
//! ```text
//! [12 bytes: random nonce][N bytes: AES-256-GCM ciphertext][16 bytes: tag]
//! ```
//!
//! The key is a pure function of (password, album name):
//! ```text
//! salt = SHA-256(album name)
//! key  = PBKDF2-HMAC-SHA256(password, salt, 100_000 iterations, 32 bytes)
//! ```
//! Nothing besides the password has to be stored or transmitted. A wrong
//! password still yields a key; it is only rejected when an envelope fails to
//! authenticate.

pub mod envelope;
pub mod kdf;

pub use envelope::{open, seal};
pub use kdf::{derive_album_key, derive_sealing_key, AlbumKey, KdfParams, SealingKey};

/// Size of an album key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;
