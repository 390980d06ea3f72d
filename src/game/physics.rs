//! Actor kinematics and physical limits

use glam::DVec3;
use serde::{Deserialize, Serialize};

/// Actor archetypes known to the simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorClass {
    /// Light, agile scout craft
    Skiff,
    /// Fast pursuit craft
    Interceptor,
    /// Slow transport
    Hauler,
}

impl Default for ActorClass {
    fn default() -> Self {
        Self::Skiff
    }
}

impl std::str::FromStr for ActorClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skiff" => Ok(Self::Skiff),
            "interceptor" => Ok(Self::Interceptor),
            "hauler" => Ok(Self::Hauler),
            other => Err(format!("unknown actor class: {other}")),
        }
    }
}

/// Speed ceilings enforced on every integration step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhysicalLimits {
    /// Maximum linear speed in metres per second
    pub max_speed_mps: f64,
    /// Maximum angular speed in degrees per second
    pub max_angular_speed_deg: f64,
}

impl PhysicalLimits {
    pub fn for_class(class: ActorClass) -> Self {
        match class {
            ActorClass::Skiff => Self {
                max_speed_mps: 120.0,
                max_angular_speed_deg: 180.0,
            },
            ActorClass::Interceptor => Self {
                max_speed_mps: 160.0,
                max_angular_speed_deg: 240.0,
            },
            ActorClass::Hauler => Self {
                max_speed_mps: 70.0,
                max_angular_speed_deg: 90.0,
            },
        }
    }
}

/// Euler orientation in degrees
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub yaw_deg: f64,
    pub pitch_deg: f64,
    pub roll_deg: f64,
}

impl Orientation {
    pub fn new(yaw_deg: f64, pitch_deg: f64, roll_deg: f64) -> Self {
        Self {
            yaw_deg,
            pitch_deg,
            roll_deg,
        }
    }
}

/// Kinematic state of a single actor (authoritative, owned by the tick loop)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub position: DVec3,
    pub velocity: DVec3,
    pub orientation: Orientation,
    /// Degrees per second; x drives pitch, y drives yaw, z drives roll
    pub angular_velocity: DVec3,
}

/// Physics system for advancing actor state
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Advance `state` by `dt` seconds under `limits`.
    ///
    /// A missing state or a non-positive (or non-finite) timestep leaves
    /// everything untouched. Velocities are clamped before they are applied,
    /// so the committed displacement never exceeds `max_speed_mps * dt`.
    /// Orientation angles are integrated as raw Euler components and are not
    /// wrapped; see [`wrap_angle_deg`].
    pub fn integrate(state: Option<&mut VehicleState>, dt: f64, limits: &PhysicalLimits) {
        let Some(state) = state else {
            return;
        };
        if !(dt > 0.0) || !dt.is_finite() {
            return;
        }

        state.velocity = clamp_magnitude(state.velocity, limits.max_speed_mps);
        state.angular_velocity =
            clamp_magnitude(state.angular_velocity, limits.max_angular_speed_deg);

        state.position += state.velocity * dt;

        let spin = state.angular_velocity;
        state.orientation.pitch_deg += spin.x * dt;
        state.orientation.yaw_deg += spin.y * dt;
        state.orientation.roll_deg += spin.z * dt;
    }
}

/// Rescale `vector` uniformly so its magnitude does not exceed `limit`.
///
/// A non-positive limit disables the clamp.
pub fn clamp_magnitude(vector: DVec3, limit: f64) -> DVec3 {
    if !(limit > 0.0) {
        return vector;
    }
    let magnitude_sq = vector.length_squared();
    if magnitude_sq == 0.0 || magnitude_sq <= limit * limit {
        return vector;
    }
    vector * (limit / magnitude_sq.sqrt())
}

/// Normalize an angle in degrees to `[-180, 180)`
pub fn wrap_angle_deg(angle: f64) -> f64 {
    (angle + 180.0).rem_euclid(360.0) - 180.0
}
