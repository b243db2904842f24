//! pgal-viewer: opens a sealed album and serves its assets on demand
//!
//! ```text
//! AlbumSession::open
//!   ├─ derive key, fetch + open manifest.enc   (bounded by the handshake timeout)
//!   ├─ validator: manifest hash vs. store      (wipe store on change)
//!   └─ decode context task
//!        └─ ChunkFetcher: one fetch + decode per (kind, chunk), waiters coalesced
//!             └─ DiskStore: decoded entries by (partition, id)
//! ```

pub mod fetcher;
pub mod session;
pub mod source;
pub mod store;
pub mod validator;

pub use fetcher::{ChunkFetcher, ChunkState};
pub use session::{AlbumSession, DecodeRequest, DecodeResponse, SessionOptions};
pub use source::ChunkSource;
pub use store::{DiskStore, Partition};
pub use validator::{validate_cache, CacheVerdict};
