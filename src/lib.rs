//! Drift Sync Server - authoritative state synchronization
//!
//! Building blocks for keeping remote clients in step with an authoritative
//! simulation:
//! - bounded kinematic integration of actors
//! - streaming clock-drift samples to clients
//! - recording and cataloguing replays
//! - client-side snapshot interpolation

pub mod app;
pub mod client;
pub mod clock;
pub mod config;
pub mod game;
pub mod http;
pub mod replay;
pub mod timesync;
pub mod util;
pub mod ws;
