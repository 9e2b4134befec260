//! lookaside - package source synchronization with a lookaside cache
//!
//! Keeps the large files a package checkout references (tarballs, patches)
//! in sync with a content-addressed HTTP cache. A `sources` manifest maps
//! file names to digests; `ensure_sources` fetches and verifies anything
//! missing and `register_source` uploads new files and records them.

pub mod atomic;
pub mod cli;
pub mod config;
pub mod error;
pub mod hash;
pub mod ignore;
pub mod manifest;
pub mod sync;
pub mod transport;
pub mod ui;

pub use error::{LookasideError, LookasideResult};
