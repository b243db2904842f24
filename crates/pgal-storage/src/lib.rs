//! pgal-storage: where sealed album files are served from
//!
//! An album is a flat directory of `.enc` files. Every backend is exposed as
//! an OpenDAL [`opendal::Operator`] rooted at that directory.

pub mod health;
pub mod operator;

pub use health::{check_album, is_available};
pub use operator::{build_operator, memory_operator, S3Credentials};
