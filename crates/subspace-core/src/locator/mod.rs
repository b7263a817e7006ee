//! Locator family - where an object sits relative to its container.
//!
//! Four capability levels, each a superset of the previous:
//!
//! | Variant | Carries |
//! |---------|---------|
//! | [`Locator::Static`] | pose only |
//! | [`Locator::Moving`] | + velocity and rotation rate |
//! | [`Locator::Inertial`] | + mass, moment, force/torque accumulators, drag |
//! | [`Locator::Engine`] | pose delegated to a physics body while active |
//!
//! Operations a variant does not carry return [`LocatorError::Unsupported`].
//! Engine-backed reads and writes while active go through
//! [`crate::world::World`], which can reach the body and the container chain.

mod engine;
mod inertial;
mod motion;

pub use engine::{EngineLocator, EngineState};
pub use inertial::{Drag, Inertia, InertialLocator};
pub use motion::MovingLocator;

use glam::{DMat3, DVec3};
use serde::{Deserialize, Serialize};

use crate::error::LocatorError;
use crate::math::Pose;

/// Committed incremental rotations between re-orthonormalizations
pub const REORTHONORMALIZE_INTERVAL: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocatorKind {
    Static,
    Moving,
    Inertial,
    Engine,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Locator {
    Static(Pose),
    Moving(MovingLocator),
    Inertial(InertialLocator),
    Engine(EngineLocator),
}

impl Locator {
    pub fn fixed(pose: Pose) -> Self {
        Locator::Static(pose)
    }

    pub fn moving(pose: Pose) -> Self {
        Locator::Moving(MovingLocator::new(pose))
    }

    pub fn inertial(pose: Pose, inertia: Inertia) -> Self {
        Locator::Inertial(InertialLocator::new(pose, inertia))
    }

    pub fn engine(pose: Pose, inertia: Inertia) -> Self {
        Locator::Engine(EngineLocator::new(pose, inertia))
    }

    pub fn kind(&self) -> LocatorKind {
        match self {
            Locator::Static(_) => LocatorKind::Static,
            Locator::Moving(_) => LocatorKind::Moving,
            Locator::Inertial(_) => LocatorKind::Inertial,
            Locator::Engine(_) => LocatorKind::Engine,
        }
    }

    fn unsupported(&self, op: &'static str) -> LocatorError {
        LocatorError::Unsupported { op, kind: self.kind() }
    }

    /// Relative pose when known locally; `None` for an active engine
    /// locator whose cache is dirty
    pub fn stored_pose(&self) -> Option<Pose> {
        match self {
            Locator::Static(p) => Some(*p),
            Locator::Moving(m) => Some(m.pose),
            Locator::Inertial(i) => Some(i.pose),
            Locator::Engine(e) => e.stored_pose(),
        }
    }

    /// Overwrite the relative pose of a self-contained locator
    pub(crate) fn store_pose(&mut self, pose: Pose) {
        match self {
            Locator::Static(p) => *p = pose,
            Locator::Moving(m) => m.pose = pose,
            Locator::Inertial(i) => i.pose = pose,
            Locator::Engine(e) => {
                if let EngineState::Inactive { pose: p } = &mut e.state {
                    *p = pose;
                }
            }
        }
    }

    pub fn loc(&self) -> Option<DVec3> {
        self.stored_pose().map(|p| p.loc)
    }

    pub fn basis(&self) -> Option<DMat3> {
        self.stored_pose().map(|p| p.basis)
    }

    pub fn engine_state(&self) -> Option<&EngineLocator> {
        match self {
            Locator::Engine(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Locator::Engine(e) if e.is_active())
    }

    pub fn inertia(&self) -> Option<&Inertia> {
        match self {
            Locator::Inertial(i) => Some(&i.inertia),
            Locator::Engine(e) => Some(&e.inertia),
            _ => None,
        }
    }

    pub fn velocity(&self) -> Result<DVec3, LocatorError> {
        match self {
            Locator::Moving(m) => Ok(m.velocity),
            Locator::Inertial(i) => Ok(i.velocity),
            Locator::Engine(_) => Err(LocatorError::Inactive),
            Locator::Static(_) => Err(self.unsupported("velocity")),
        }
    }

    pub fn rot_rate(&self) -> Result<DVec3, LocatorError> {
        match self {
            Locator::Moving(m) => Ok(m.rot_rate),
            Locator::Inertial(i) => Ok(i.rot_rate),
            Locator::Engine(_) => Err(LocatorError::Inactive),
            Locator::Static(_) => Err(self.unsupported("rot_rate")),
        }
    }

    pub fn set_velocity(&mut self, velocity: DVec3) -> Result<(), LocatorError> {
        match self {
            Locator::Moving(m) => m.velocity = velocity,
            Locator::Inertial(i) => i.velocity = velocity,
            Locator::Engine(_) => return Err(LocatorError::Inactive),
            Locator::Static(_) => return Err(self.unsupported("set_velocity")),
        }
        Ok(())
    }

    pub fn set_rot_rate(&mut self, rot_rate: DVec3) -> Result<(), LocatorError> {
        match self {
            Locator::Moving(m) => m.rot_rate = rot_rate,
            Locator::Inertial(i) => i.rot_rate = rot_rate,
            Locator::Engine(_) => return Err(LocatorError::Inactive),
            Locator::Static(_) => return Err(self.unsupported("set_rot_rate")),
        }
        Ok(())
    }

    pub fn add_force(&mut self, force: DVec3) -> Result<(), LocatorError> {
        match self {
            Locator::Inertial(i) => {
                i.add_force(force);
                Ok(())
            }
            Locator::Engine(_) => Err(LocatorError::Inactive),
            _ => Err(self.unsupported("add_force")),
        }
    }

    pub fn add_torque(&mut self, torque: DVec3) -> Result<(), LocatorError> {
        match self {
            Locator::Inertial(i) => {
                i.add_torque(torque);
                Ok(())
            }
            Locator::Engine(_) => Err(LocatorError::Inactive),
            _ => Err(self.unsupported("add_torque")),
        }
    }

    /// Compute the tentative next state. Active engine locators are
    /// prepared by the world, which applies drag to the body.
    pub fn prepare(&mut self, dt: f64) -> Result<(), LocatorError> {
        match self {
            Locator::Moving(m) => m.prepare(dt),
            Locator::Inertial(i) => i.prepare(dt),
            Locator::Engine(e) => e.prepared = true,
            Locator::Static(_) => return Err(self.unsupported("prepare")),
        }
        Ok(())
    }

    pub fn is_prepared(&self) -> bool {
        match self {
            Locator::Moving(m) => m.is_prepared(),
            Locator::Inertial(i) => i.is_prepared(),
            Locator::Engine(e) => e.prepared,
            Locator::Static(_) => false,
        }
    }

    /// Commit the state computed by `prepare`
    pub fn step(&mut self) -> Result<(), LocatorError> {
        match self {
            Locator::Moving(m) => m.step(),
            Locator::Inertial(i) => i.step(),
            Locator::Engine(e) => {
                if !e.prepared {
                    return Err(LocatorError::NotPrepared);
                }
                e.prepared = false;
                e.invalidate();
                Ok(())
            }
            Locator::Static(_) => Err(self.unsupported("step")),
        }
    }

    /// Whether this variant takes part in the prepare/step protocol
    pub fn advances(&self) -> bool {
        !matches!(self, Locator::Static(_))
    }
}

impl From<Pose> for Locator {
    fn from(pose: Pose) -> Self {
        Locator::Static(pose)
    }
}
