//! RocksDB-backed trust store for the Lantern light client.
//!
//! Survives process restarts; the light client resumes from the last
//! trusted state on disk.

mod rocks;

pub use rocks::RocksStore;
