//! Clock drift streaming for connected peers

pub mod service;

pub use service::{
    stream_time_sync, ActiveSession, SampleSink, SessionState, TimeSyncError, TimeSyncRequest,
    TimeSyncService, TimeSyncUpdate,
};
