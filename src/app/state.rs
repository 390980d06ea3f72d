//! Application state shared across routes

use std::sync::Arc;

use crate::clock::{ClockProvider, SimulationClock};
use crate::config::Config;
use crate::game::WorldHandle;
use crate::replay::ReplayCleaner;
use crate::timesync::TimeSyncService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub clock: Arc<SimulationClock>,
    pub world: WorldHandle,
    /// Absent when time sync is disabled; requests then fail as unavailable
    pub time_sync: Option<Arc<TimeSyncService>>,
    /// Present when matches are recorded
    pub replay_cleaner: Option<Arc<ReplayCleaner>>,
}

impl AppState {
    pub fn new(config: Config, clock: Arc<SimulationClock>, world: WorldHandle) -> Self {
        let config = Arc::new(config);

        // Initialize time sync against the simulation clock
        let time_sync = config.time_sync_enabled.then(|| {
            let provider: Arc<dyn ClockProvider> = clock.clone();
            Arc::new(TimeSyncService::with_interval_ms(
                Some(provider),
                config.time_sync_interval_ms,
            ))
        });

        let replay_cleaner = config
            .replay_dir
            .as_ref()
            .map(|dir| Arc::new(ReplayCleaner::new(dir, config.retention_policy())));

        Self {
            config,
            clock,
            world,
            time_sync,
            replay_cleaner,
        }
    }
}
