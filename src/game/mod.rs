//! Authoritative simulation modules

pub mod physics;
pub mod snapshot;
pub mod world;

pub use physics::{ActorClass, PhysicalLimits, PhysicsSystem, VehicleState};
pub use world::{GameWorld, WorldCommand, WorldHandle, WorldSettings};

use crate::ws::protocol::{ActorId, ActorSnapshot};

/// A simulated actor (authoritative, owned by the tick loop)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Actor {
    pub id: ActorId,
    pub class: ActorClass,
    pub state: VehicleState,
}

impl Actor {
    pub fn snapshot(&self) -> ActorSnapshot {
        ActorSnapshot {
            id: self.id,
            class: self.class,
            state: self.state,
        }
    }
}
