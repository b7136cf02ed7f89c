//! Google Photos Library API: listing the library and re-issuing download
//! URLs for the backup engine.

pub mod client;
pub mod error;
pub mod item;
pub mod stats;

pub use client::PhotosClient;
pub use stats::LibraryStats;
