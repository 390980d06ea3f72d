//! Feeds world diffs into a snapshot interpolator

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::ws::protocol::WorldDiff;

use super::interpolation::{
    EntityId, IngestOutcome, SnapshotInterpolator, SnapshotSample, Transform,
};

/// Ingest one diff; returns how many samples were accepted or replaced.
///
/// Roster entries absent from `updated` did not move since the previous
/// diff, so their newest pose is held at this diff's timestamp.
pub fn apply_diff(interpolator: &SnapshotInterpolator, diff: &WorldDiff) -> usize {
    let timestamp_ms = u64::try_from(diff.simulated_ms).unwrap_or(0);

    let updated: HashSet<EntityId> = diff.updated.iter().map(|snapshot| snapshot.id).collect();

    let moved = diff.updated.iter().map(|snapshot| {
        interpolator.ingest(SnapshotSample {
            entity: snapshot.id,
            transform: Transform::from_state(&snapshot.state),
            timestamp_ms,
        })
    });
    let held = diff
        .roster
        .iter()
        .filter(|id| !updated.contains(id))
        .filter_map(|id| interpolator.hold(id, timestamp_ms));

    let applied = moved
        .chain(held)
        .filter(|outcome| matches!(outcome, IngestOutcome::Accepted | IngestOutcome::Replaced))
        .count();

    let evicted = interpolator.sync_roster(&diff.roster, timestamp_ms);
    if evicted > 0 {
        debug!(tick = diff.tick, evicted, "Evicted entities missing from roster");
    }

    applied
}

/// Drain the world-diff broadcast into `interpolator` until the sender closes
pub async fn run_feed(
    interpolator: Arc<SnapshotInterpolator>,
    mut diffs: broadcast::Receiver<WorldDiff>,
) {
    loop {
        match diffs.recv().await {
            Ok(diff) => {
                apply_diff(&interpolator, &diff);
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Interpolation feed lagged behind world diffs");
            }
            Err(RecvError::Closed) => {
                debug!("World diff channel closed, stopping interpolation feed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::physics::{ActorClass, VehicleState};
    use crate::game::snapshot::DiffBuilder;
    use crate::game::Actor;
    use std::collections::HashMap;
    use crate::ws::protocol::ActorSnapshot;
    use glam::DVec3;
    use uuid::Uuid;

    fn diff(tick: u64, simulated_ms: i64, id: Uuid, x: f64) -> WorldDiff {
        WorldDiff {
            tick,
            simulated_ms,
            roster: vec![id],
            updated: vec![ActorSnapshot {
                id,
                class: ActorClass::Skiff,
                state: VehicleState {
                    position: DVec3::new(x, 0.0, 0.0),
                    ..Default::default()
                },
            }],
            removed: Vec::new(),
        }
    }

    #[test]
    fn test_apply_diff_ingests_updates() {
        let interp = SnapshotInterpolator::default();
        let id = Uuid::new_v4();

        assert_eq!(apply_diff(&interp, &diff(1, 1_000, id, 0.0)), 1);
        assert_eq!(apply_diff(&interp, &diff(2, 1_100, id, 4.0)), 1);
        assert_eq!(apply_diff(&interp, &diff(1, 1_000, id, 9.0)), 0);

        let x = interp.sample_at(1_050)[&id].position.x;
        assert!((x - 2.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_run_feed_drains_until_closed() {
        let interp = Arc::new(SnapshotInterpolator::default());
        let (tx, rx) = broadcast::channel(8);
        let id = Uuid::new_v4();

        let feed = tokio::spawn(run_feed(Arc::clone(&interp), rx));
        tx.send(diff(1, 0, id, 0.0)).unwrap();
        tx.send(diff(2, 50, id, 1.0)).unwrap();
        drop(tx);
        feed.await.unwrap();

        assert_eq!(interp.buffered(&id), 2);
    }

    #[tokio::test]
    async fn test_run_feed_survives_lag() {
        let interp = Arc::new(SnapshotInterpolator::default());
        let (tx, rx) = broadcast::channel(2);
        let id = Uuid::new_v4();

        for step in 0..5u64 {
            tx.send(diff(step, step as i64 * 50, id, step as f64)).unwrap();
        }
        drop(tx);
        run_feed(Arc::clone(&interp), rx).await;

        assert_eq!(interp.buffered(&id), 2);
        assert_eq!(interp.sample_at(200)[&id].position.x, 4.0);
    }

    #[test]
    fn test_parked_actor_holds_pose_between_moves() {
        let interp = SnapshotInterpolator::default();
        let mut builder = DiffBuilder::new(1);
        let id = Uuid::new_v4();
        let mut actor = Actor {
            id,
            class: ActorClass::Skiff,
            state: VehicleState::default(),
        };

        let mut publish = |tick: u64, simulated_ms: i64, actor: &Actor| {
            let actors: HashMap<_, _> = [(actor.id, *actor)].into();
            apply_diff(&interp, &builder.build(tick, simulated_ms, &actors));
        };

        publish(0, 0, &actor);
        actor.state.position.x = 5.0;
        publish(1, 50, &actor);
        for tick in 2..=10u64 {
            publish(tick, tick as i64 * 50, &actor);
        }
        actor.state.position.x = 10.0;
        publish(11, 550, &actor);

        let x_at = |t: u64| interp.sample_at(t)[&id].position.x;
        assert_eq!(x_at(300), 5.0);
        assert_eq!(x_at(500), 5.0);
        assert!((x_at(525) - 7.5).abs() < 1e-5);
        assert_eq!(interp.buffered(&id), 12);
    }
}
