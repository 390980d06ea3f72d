//! Client-side rendering support

pub mod feed;
pub mod interpolation;

pub use feed::{apply_diff, run_feed};
pub use interpolation::{
    EntityId, IngestOutcome, InterpolationConfig, InterpolationSnapshot, InterpolationStats,
    SnapshotInterpolator, SnapshotSample, Transform,
};
