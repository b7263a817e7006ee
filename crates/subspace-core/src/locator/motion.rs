//! Velocity-carrying locator: linear extrapolation between ticks

use glam::DVec3;
use serde::{Deserialize, Serialize};

use super::REORTHONORMALIZE_INTERVAL;
use crate::error::LocatorError;
use crate::math::{orthonormalize, rotate_basis, Pose};

/// Pose plus velocity and rotation rate, both in the container frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovingLocator {
    pub(crate) pose: Pose,
    pub(crate) velocity: DVec3,
    pub(crate) rot_rate: DVec3,
    #[serde(skip)]
    pending: Option<Pose>,
    #[serde(skip)]
    rotations: u32,
}

impl MovingLocator {
    pub fn new(pose: Pose) -> Self {
        Self {
            pose,
            velocity: DVec3::ZERO,
            rot_rate: DVec3::ZERO,
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

    pub fn is_prepared(&self) -> bool {
        self.pending.is_some()
    }

    /// Extrapolate `dt` ahead without committing; repeated calls overwrite
    pub fn prepare(&mut self, dt: f64) {
        self.pending = Some(Pose {
            loc: self.pose.loc + self.velocity * dt,
            basis: rotate_basis(self.pose.basis, self.rot_rate * dt),
        });
    }

    pub fn step(&mut self) -> Result<(), LocatorError> {
        let next = self.pending.take().ok_or(LocatorError::NotPrepared)?;
        self.commit(next);
        Ok(())
    }

    fn commit(&mut self, next: Pose) {
        self.pose = next;
        if self.rot_rate != DVec3::ZERO {
            self.rotations += 1;
            if self.rotations >= REORTHONORMALIZE_INTERVAL {
                self.pose.basis = orthonormalize(self.pose.basis);
                self.rotations = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extrapolates_linearly() {
        let mut m = MovingLocator::new(Pose::IDENTITY).with_velocity(DVec3::new(2.0, 0.0, -1.0));
        m.prepare(0.5);
        m.step().unwrap();
        assert!(m.pose.loc.abs_diff_eq(DVec3::new(1.0, 0.0, -0.5), 1.0e-12));
    }

    #[test]
    fn test_step_without_prepare_fails() {
        let mut m = MovingLocator::new(Pose::IDENTITY);
        assert_eq!(m.step(), Err(LocatorError::NotPrepared));
        m.prepare(0.1);
        assert!(m.step().is_ok());
        // Prepared state is consumed by step
        assert_eq!(m.step(), Err(LocatorError::NotPrepared));
    }

    #[test]
    fn test_last_prepare_wins() {
        let mut m = MovingLocator::new(Pose::IDENTITY).with_velocity(DVec3::X);
        m.prepare(10.0);
        m.prepare(1.0);
        m.step().unwrap();
        assert!(m.pose.loc.abs_diff_eq(DVec3::X, 1.0e-12));
    }

    #[test]
    fn test_basis_stays_orthonormal_under_spin() {
        let mut m = MovingLocator::new(Pose::IDENTITY).with_rot_rate(DVec3::new(0.3, 1.7, -0.9));
        for _ in 0..1000 {
            m.prepare(0.013);
            m.step().unwrap();
        }
        let b = m.pose.basis;
        assert!((b * b.transpose()).abs_diff_eq(glam::DMat3::IDENTITY, 1.0e-9));
    }
}
