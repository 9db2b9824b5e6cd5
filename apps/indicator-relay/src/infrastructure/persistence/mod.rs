//! Persistence Adapters
//!
//! Implementations of [`SettingsStorePort`](crate::application::ports::SettingsStorePort).
//!
//! - [`InMemorySettingsStore`]: tests and ephemeral runs
//! - [`JsonFileSettingsStore`]: single JSON document on disk, used by the binary

pub mod in_memory;
pub mod json_file;

pub use in_memory::InMemorySettingsStore;
pub use json_file::JsonFileSettingsStore;
