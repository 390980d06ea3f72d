//! Snapshot interpolation for smooth rendering
//!
//! Decouples the authoritative tick rate from the render frame rate. The
//! network path pushes timestamped samples; the render path asks for poses at
//! an arbitrary point in time.
//!
//! Storage is copy-on-write: the render path clones an `Arc` to the current
//! buffer set under a short read lock and then works lock-free, while ingest
//! clones only what a concurrent reader still holds before swapping in the
//! new version.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use glam::{EulerRot, Quat, Vec3};
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

use crate::game::physics::VehicleState;

/// Identifier of an interpolated entity
pub type EntityId = Uuid;

/// Renderable pose
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Transform {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// Pose of an actor; yaw about Y, pitch about X, roll about Z
    pub fn from_state(state: &VehicleState) -> Self {
        let orientation = state.orientation;
        Self {
            position: state.position.as_vec3(),
            rotation: Quat::from_euler(
                EulerRot::YXZ,
                orientation.yaw_deg.to_radians() as f32,
                orientation.pitch_deg.to_radians() as f32,
                orientation.roll_deg.to_radians() as f32,
            ),
        }
    }

    /// Linear position blend and spherical rotation blend
    pub fn interpolate(&self, other: &Transform, alpha: f32) -> Transform {
        Transform {
            position: self.position.lerp(other.position, alpha),
            rotation: self.rotation.slerp(other.rotation, alpha),
        }
    }
}

/// One entity pose at one point in time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotSample {
    pub entity: EntityId,
    pub transform: Transform,
    pub timestamp_ms: u64,
}

/// Interpolator tuning
#[derive(Debug, Clone, Copy)]
pub struct InterpolationConfig {
    /// Samples retained per entity
    pub buffer_capacity: usize,
    /// Queries this far past the newest sample are extrapolated; beyond it the newest pose is held
    pub extrapolation_limit_ms: u64,
    /// Entities missing from the roster this long are evicted
    pub eviction_timeout_ms: u64,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 32,
            extrapolation_limit_ms: 250,
            eviction_timeout_ms: 5_000,
        }
    }
}

/// Result of a single ingest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    /// Same timestamp as the newest sample, different pose; the newest sample was replaced
    Replaced,
    Stale,
    Duplicate,
}

/// Counters for observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InterpolationStats {
    pub accepted: u64,
    pub replaced: u64,
    pub stale: u64,
    pub duplicate: u64,
    pub evicted: u64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TimedTransform {
    timestamp_ms: u64,
    transform: Transform,
}

/// Per-entity buffer, timestamps strictly increasing
#[derive(Debug, Clone)]
struct Track {
    samples: VecDeque<TimedTransform>,
    last_seen_ms: u64,
}

impl Track {
    fn new(sample: &SnapshotSample) -> Self {
        let mut samples = VecDeque::new();
        samples.push_back(TimedTransform {
            timestamp_ms: sample.timestamp_ms,
            transform: sample.transform,
        });
        Self {
            samples,
            last_seen_ms: sample.timestamp_ms,
        }
    }

    fn newest(&self) -> Option<&TimedTransform> {
        self.samples.back()
    }

    fn classify(&self, sample: &SnapshotSample) -> IngestOutcome {
        match self.newest() {
            None => IngestOutcome::Accepted,
            Some(newest) if sample.timestamp_ms < newest.timestamp_ms => IngestOutcome::Stale,
            Some(newest) if sample.timestamp_ms == newest.timestamp_ms => {
                if newest.transform == sample.transform {
                    IngestOutcome::Duplicate
                } else {
                    IngestOutcome::Replaced
                }
            }
            Some(_) => IngestOutcome::Accepted,
        }
    }

    fn push(&mut self, sample: &SnapshotSample, outcome: IngestOutcome, capacity: usize) {
        let entry = TimedTransform {
            timestamp_ms: sample.timestamp_ms,
            transform: sample.transform,
        };
        match outcome {
            IngestOutcome::Replaced => {
                if let Some(newest) = self.samples.back_mut() {
                    *newest = entry;
                }
            }
            IngestOutcome::Accepted => {
                self.samples.push_back(entry);
                while self.samples.len() > capacity.max(2) {
                    self.samples.pop_front();
                }
            }
            IngestOutcome::Stale | IngestOutcome::Duplicate => return,
        }
        self.last_seen_ms = self.last_seen_ms.max(sample.timestamp_ms);
    }

    fn sample_at(&self, timestamp_ms: u64, extrapolation_limit_ms: u64) -> Option<Transform> {
        let oldest = self.samples.front()?;
        let newest = self.samples.back()?;

        if timestamp_ms <= oldest.timestamp_ms {
            return Some(oldest.transform);
        }

        if timestamp_ms >= newest.timestamp_ms {
            let overshoot = timestamp_ms - newest.timestamp_ms;
            if overshoot == 0 || overshoot >= extrapolation_limit_ms || self.samples.len() < 2 {
                return Some(newest.transform);
            }
            let previous = &self.samples[self.samples.len() - 2];
            let span = (newest.timestamp_ms - previous.timestamp_ms) as f32;
            let velocity = (newest.transform.position - previous.transform.position) / span;
            return Some(Transform {
                position: newest.transform.position + velocity * overshoot as f32,
                rotation: newest.transform.rotation,
            });
        }

        // First sample strictly newer than the query; oldest < t < newest so 1 <= idx < len
        let idx = self.samples.partition_point(|s| s.timestamp_ms <= timestamp_ms);
        let from = &self.samples[idx - 1];
        let to = &self.samples[idx];
        let span = (to.timestamp_ms - from.timestamp_ms) as f32;
        let alpha = (timestamp_ms - from.timestamp_ms) as f32 / span;
        Some(from.transform.interpolate(&to.transform, alpha))
    }

    /// Drop samples the render timeline has moved past, keeping one anchor at or
    /// before `timestamp_ms`
    fn discard_before(&mut self, timestamp_ms: u64) -> bool {
        let anchor = self.samples.partition_point(|s| s.timestamp_ms <= timestamp_ms);
        if anchor <= 1 {
            return false;
        }
        self.samples.drain(..anchor - 1);
        true
    }
}

type TrackMap = HashMap<EntityId, Arc<Track>>;

/// Immutable view of every buffer at one moment, safe to query from the render path
#[derive(Debug, Clone)]
pub struct InterpolationSnapshot {
    tracks: Arc<TrackMap>,
    extrapolation_limit_ms: u64,
}

impl InterpolationSnapshot {
    /// Pose of every buffered entity at `timestamp_ms`
    pub fn sample_at(&self, timestamp_ms: u64) -> HashMap<EntityId, Transform> {
        self.tracks
            .iter()
            .filter_map(|(id, track)| {
                track
                    .sample_at(timestamp_ms, self.extrapolation_limit_ms)
                    .map(|transform| (*id, transform))
            })
            .collect()
    }

    /// Pose of one entity at `timestamp_ms`
    pub fn sample_entity(&self, entity: &EntityId, timestamp_ms: u64) -> Option<Transform> {
        self.tracks
            .get(entity)?
            .sample_at(timestamp_ms, self.extrapolation_limit_ms)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

/// Client-side snapshot buffer
pub struct SnapshotInterpolator {
    config: InterpolationConfig,
    tracks: RwLock<Arc<TrackMap>>,
    accepted: AtomicU64,
    replaced: AtomicU64,
    stale: AtomicU64,
    duplicate: AtomicU64,
    evicted: AtomicU64,
}

impl SnapshotInterpolator {
    pub fn new(config: InterpolationConfig) -> Self {
        Self {
            config,
            tracks: RwLock::new(Arc::new(HashMap::new())),
            accepted: AtomicU64::new(0),
            replaced: AtomicU64::new(0),
            stale: AtomicU64::new(0),
            duplicate: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &InterpolationConfig {
        &self.config
    }

    /// Buffer a sample unless it is older than the entity's newest sample.
    ///
    /// Stale and duplicate samples are dropped silently and only counted.
    pub fn ingest(&self, sample: SnapshotSample) -> IngestOutcome {
        let mut guard = self.tracks.write();

        let outcome = guard
            .get(&sample.entity)
            .map(|track| track.classify(&sample))
            .unwrap_or(IngestOutcome::Accepted);

        match outcome {
            IngestOutcome::Stale | IngestOutcome::Duplicate => {}
            IngestOutcome::Accepted | IngestOutcome::Replaced => {
                let tracks = Arc::make_mut(&mut guard);
                match tracks.get_mut(&sample.entity) {
                    Some(track) => {
                        Arc::make_mut(track).push(&sample, outcome, self.config.buffer_capacity)
                    }
                    None => {
                        tracks.insert(sample.entity, Arc::new(Track::new(&sample)));
                    }
                }
            }
        }
        drop(guard);

        self.count(outcome);
        outcome
    }

    /// Re-anchor an unchanged entity at `timestamp_ms` with its newest pose.
    ///
    /// Diffs omit entities whose state did not change; holding their newest
    /// pose keeps the buffer from blending or extrapolating across the gap.
    /// Returns `None` when the entity has no buffered samples.
    pub fn hold(&self, entity: &EntityId, timestamp_ms: u64) -> Option<IngestOutcome> {
        let transform = self.tracks.read().get(entity)?.newest()?.transform;
        Some(self.ingest(SnapshotSample {
            entity: *entity,
            transform,
            timestamp_ms,
        }))
    }

    /// Immutable view for the render path
    pub fn snapshot(&self) -> InterpolationSnapshot {
        InterpolationSnapshot {
            tracks: Arc::clone(&self.tracks.read()),
            extrapolation_limit_ms: self.config.extrapolation_limit_ms,
        }
    }

    /// Pose of every buffered entity at `timestamp_ms`
    pub fn sample_at(&self, timestamp_ms: u64) -> HashMap<EntityId, Transform> {
        self.snapshot().sample_at(timestamp_ms)
    }

    /// Refresh entities present in `live` and evict those absent longer than the timeout.
    ///
    /// Returns the number of evicted entities.
    pub fn sync_roster(&self, live: &[EntityId], now_ms: u64) -> usize {
        let timeout = self.config.eviction_timeout_ms;
        let mut guard = self.tracks.write();

        let needs_refresh = live
            .iter()
            .any(|id| guard.get(id).is_some_and(|track| track.last_seen_ms < now_ms));
        let expired = guard
            .iter()
            .any(|(id, track)| {
                !live.contains(id) && now_ms.saturating_sub(track.last_seen_ms) > timeout
            });
        if !needs_refresh && !expired {
            return 0;
        }

        let tracks = Arc::make_mut(&mut guard);
        for id in live {
            if let Some(track) = tracks.get_mut(id) {
                if track.last_seen_ms < now_ms {
                    Arc::make_mut(track).last_seen_ms = now_ms;
                }
            }
        }
        let before = tracks.len();
        tracks.retain(|_, track| now_ms.saturating_sub(track.last_seen_ms) <= timeout);
        let evicted = before - tracks.len();
        drop(guard);

        self.evicted.fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    /// Drop samples older than the anchor needed to answer queries at or after `timestamp_ms`
    pub fn discard_before(&self, timestamp_ms: u64) {
        let mut guard = self.tracks.write();
        let prunable = guard.values().any(|track| {
            track
                .samples
                .get(1)
                .is_some_and(|second| second.timestamp_ms <= timestamp_ms)
        });
        if !prunable {
            return;
        }
        for track in Arc::make_mut(&mut guard).values_mut() {
            let needs_prune = track
                .samples
                .get(1)
                .is_some_and(|second| second.timestamp_ms <= timestamp_ms);
            if needs_prune {
                Arc::make_mut(track).discard_before(timestamp_ms);
            }
        }
    }

    /// Number of samples buffered for `entity`
    pub fn buffered(&self, entity: &EntityId) -> usize {
        self.tracks
            .read()
            .get(entity)
            .map(|track| track.samples.len())
            .unwrap_or(0)
    }

    pub fn contains(&self, entity: &EntityId) -> bool {
        self.tracks.read().contains_key(entity)
    }

    pub fn len(&self) -> usize {
        self.tracks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.read().is_empty()
    }

    pub fn stats(&self) -> InterpolationStats {
        InterpolationStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            replaced: self.replaced.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            duplicate: self.duplicate.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }

    fn count(&self, outcome: IngestOutcome) {
        let counter = match outcome {
            IngestOutcome::Accepted => &self.accepted,
            IngestOutcome::Replaced => &self.replaced,
            IngestOutcome::Stale => &self.stale,
            IngestOutcome::Duplicate => &self.duplicate,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for SnapshotInterpolator {
    fn default() -> Self {
        Self::new(InterpolationConfig::default())
    }
}
