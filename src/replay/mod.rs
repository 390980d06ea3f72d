//! Replay persistence: headers, the frame recorder, loading, retention and the operator catalog

pub mod catalog;
pub mod header;
pub mod loader;
pub mod recorder;
pub mod retention;

pub use catalog::{CatalogEntry, CatalogError};
pub use header::{
    read_header, write_header, HeaderError, ReplayHeader, TerrainParameters, HEADER_SCHEMA_VERSION,
};
pub use loader::{LoaderError, ReplayLoader};
pub use recorder::{RecorderError, ReplayRecorder};
pub use retention::{ReplayCleaner, RetentionPolicy, StorageStats};
