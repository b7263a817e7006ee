//! Mass-aware locator: forces, torques and velocity-dependent drag

use glam::DVec3;
use serde::{Deserialize, Serialize};

use super::REORTHONORMALIZE_INTERVAL;
use crate::error::LocatorError;
use crate::math::{orthonormalize, rotate_basis, Pose};

/// Velocity-dependent resistance: `constant + linear * speed`, opposing motion
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Drag {
    pub constant: f64,
    pub linear: f64,
}

impl Drag {
    pub fn new(constant: f64, linear: f64) -> Self {
        Self { constant, linear }
    }

    pub fn is_none(&self) -> bool {
        self.constant == 0.0 && self.linear == 0.0
    }

    /// Opposing force on something of `inertia` moving at `velocity`.
    ///
    /// The magnitude never exceeds what stops the motion within `dt`.
    pub fn force(&self, velocity: DVec3, inertia: f64, dt: f64) -> DVec3 {
        let speed = velocity.length();
        if speed == 0.0 || dt <= 0.0 {
            return DVec3::ZERO;
        }
        let magnitude = self.constant + self.linear * speed;
        let stop = inertia * speed / dt;
        -velocity / speed * magnitude.min(stop)
    }

    /// Whether drag alone brings `velocity` to rest within `dt`
    pub fn stops(&self, velocity: DVec3, inertia: f64, dt: f64) -> bool {
        (self.constant + self.linear * velocity.length()) * dt >= inertia * velocity.length()
    }

    /// Velocity after drag acts for `dt`; same direction or exactly zero
    pub fn apply(&self, velocity: DVec3, inertia: f64, dt: f64) -> DVec3 {
        let speed = velocity.length();
        if speed == 0.0 || dt <= 0.0 || inertia <= 0.0 {
            return velocity;
        }
        let loss = (self.constant + self.linear * speed) / inertia * dt;
        if loss >= speed {
            DVec3::ZERO
        } else {
            velocity * (1.0 - loss / speed)
        }
    }
}

/// Mass properties shared by the inertial and engine-backed locators
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Inertia {
    pub mass: f64,
    /// Magnitude of the (isotropic) moment of inertia
    pub moment: f64,
    #[serde(default)]
    pub drag: Drag,
    #[serde(default)]
    pub angular_drag: Drag,
}

impl Default for Inertia {
    fn default() -> Self {
        Self {
            mass: 1.0,
            moment: 1.0,
            drag: Drag::default(),
            angular_drag: Drag::default(),
        }
    }
}

impl Inertia {
    pub fn new(mass: f64, moment: f64) -> Self {
        Self {
            mass,
            moment,
            ..Default::default()
        }
    }

    pub fn with_drag(mut self, drag: Drag) -> Self {
        self.drag = drag;
        self
    }

    pub fn with_angular_drag(mut self, drag: Drag) -> Self {
        self.angular_drag = drag;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Tentative {
    pose: Pose,
    velocity: DVec3,
    rot_rate: DVec3,
}

/// Pose, motion and force accumulators, integrated semi-implicitly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InertialLocator {
    pub(crate) pose: Pose,
    pub(crate) velocity: DVec3,
    pub(crate) rot_rate: DVec3,
    pub(crate) inertia: Inertia,
    #[serde(skip)]
    force: DVec3,
    #[serde(skip)]
    torque: DVec3,
    #[serde(skip)]
    pending: Option<Tentative>,
    #[serde(skip)]
    rotations: u32,
}

impl InertialLocator {
    pub fn new(pose: Pose, inertia: Inertia) -> Self {
        Self {
            pose,
            velocity: DVec3::ZERO,
            rot_rate: DVec3::ZERO,
            inertia,
            force: DVec3::ZERO,
            torque: DVec3::ZERO,
            pending: None,
            rotations: 0,
        }
    }

    pub fn with_velocity(mut self, velocity: DVec3) -> Self {
        self.velocity = velocity;
        self
    }

    pub fn with_rot_rate(mut self, rot_rate: DVec3) -> Self {
        self.rot_rate = rot_rate;
        self
    }

    pub fn inertia(&self) -> &Inertia {
        &self.inertia
    }

    pub fn force(&self) -> DVec3 {
        self.force
    }

    pub fn torque(&self) -> DVec3 {
        self.torque
    }

    pub fn add_force(&mut self, force: DVec3) {
        self.force += force;
    }

    pub fn add_torque(&mut self, torque: DVec3) {
        self.torque += torque;
    }

    pub fn is_prepared(&self) -> bool {
        self.pending.is_some()
    }

    /// Compute the next state from current motion and accumulated forces.
    ///
    /// Accumulators are read, not consumed, so repeated calls agree.
    pub fn prepare(&mut self, dt: f64) {
        let Inertia {
            mass,
            moment,
            drag,
            angular_drag,
        } = self.inertia;

        let accel = if mass > 0.0 { self.force / mass } else { DVec3::ZERO };
        let velocity = drag.apply(self.velocity, mass, dt) + accel * dt;
        let loc = self.pose.loc + (self.velocity + velocity) * (0.5 * dt);

        let alpha = if moment > 0.0 { self.torque / moment } else { DVec3::ZERO };
        let rot_rate = angular_drag.apply(self.rot_rate, moment, dt) + alpha * dt;
        let turn = (self.rot_rate + rot_rate) * (0.5 * dt);

        self.pending = Some(Tentative {
            pose: Pose {
                loc,
                basis: rotate_basis(self.pose.basis, turn),
            },
            velocity,
            rot_rate,
        });
    }

    pub fn step(&mut self) -> Result<(), LocatorError> {
        let next = self.pending.take().ok_or(LocatorError::NotPrepared)?;
        let turned = next.pose.basis != self.pose.basis;
        self.pose = next.pose;
        self.velocity = next.velocity;
        self.rot_rate = next.rot_rate;
        self.force = DVec3::ZERO;
        self.torque = DVec3::ZERO;
        if turned {
            self.rotations += 1;
            if self.rotations >= REORTHONORMALIZE_INTERVAL {
                self.pose.basis = orthonormalize(self.pose.basis);
                self.rotations = 0;
            }
        }
        Ok(())
    }
}
