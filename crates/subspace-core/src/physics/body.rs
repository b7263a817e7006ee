use glam::{DQuat, DVec3};

use crate::math::Pose;

/// Input descriptor when creating a body.
#[derive(Debug, Clone, Copy)]
pub struct BodyDesc {
    pub pose: Pose,
    pub lin_vel: DVec3,
    pub ang_vel: DVec3,
    pub mass: f64,
    /// Scalar moment of inertia (isotropic)
    pub moment: f64,
}

impl BodyDesc {
    pub fn new(pose: Pose, mass: f64, moment: f64) -> Self {
        Self {
            pose,
            lin_vel: DVec3::ZERO,
            ang_vel: DVec3::ZERO,
            mass,
            moment,
        }
    }
}

/// Rigid body in absolute coordinates
#[derive(Debug, Clone)]
pub struct Body {
    pub(crate) pose: Pose,
    pub(crate) lin_vel: DVec3,
    pub(crate) ang_vel: DVec3,
    pub(crate) inv_mass: f64,
    pub(crate) inv_moment: f64,
    pub(crate) force: DVec3,
    pub(crate) torque: DVec3,
}

impl Body {
    pub(crate) fn from_desc(desc: BodyDesc) -> Self {
        let inv = |m: f64| if m > 0.0 { 1.0 / m } else { 0.0 };
        Self {
            pose: desc.pose,
            lin_vel: desc.lin_vel,
            ang_vel: desc.ang_vel,
            inv_mass: inv(desc.mass),
            inv_moment: inv(desc.moment),
            force: DVec3::ZERO,
            torque: DVec3::ZERO,
        }
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn lin_vel(&self) -> DVec3 {
        self.lin_vel
    }

    pub fn ang_vel(&self) -> DVec3 {
        self.ang_vel
    }

    pub fn mass(&self) -> f64 {
        if self.inv_mass > 0.0 { 1.0 / self.inv_mass } else { f64::INFINITY }
    }

    pub fn moment(&self) -> f64 {
        if self.inv_moment > 0.0 { 1.0 / self.inv_moment } else { f64::INFINITY }
    }

    /// Velocity of a world-space point rigidly attached to the body
    pub fn point_velocity(&self, point: DVec3) -> DVec3 {
        self.lin_vel + self.ang_vel.cross(point - self.pose.loc)
    }

    pub(crate) fn integrate_forces(&mut self, gravity: DVec3, dt: f64) {
        if self.inv_mass > 0.0 {
            self.lin_vel += (gravity + self.force * self.inv_mass) * dt;
        }
        self.ang_vel += self.torque * self.inv_moment * dt;
    }

    pub(crate) fn integrate_pose(&mut self, dt: f64) {
        self.pose.loc += self.lin_vel * dt;
        let spin = self.ang_vel * dt;
        if spin != DVec3::ZERO {
            let q = (DQuat::from_scaled_axis(spin) * self.pose.rotation()).normalize();
            self.pose.basis = glam::DMat3::from_quat(q);
        }
    }

    pub(crate) fn clear_accumulators(&mut self) {
        self.force = DVec3::ZERO;
        self.torque = DVec3::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_fall() {
        let mut b = Body::from_desc(BodyDesc::new(Pose::IDENTITY, 2.0, 1.0));
        let g = DVec3::new(0.0, 0.0, -10.0);
        for _ in 0..10 {
            b.integrate_forces(g, 0.1);
            b.integrate_pose(0.1);
        }
        assert!((b.lin_vel.z + 10.0).abs() < 1.0e-9);
        assert!(b.pose.loc.z < -5.0);
    }

    #[test]
    fn test_spin_keeps_basis_orthonormal() {
        let mut desc = BodyDesc::new(Pose::IDENTITY, 1.0, 1.0);
        desc.ang_vel = DVec3::new(1.0, 2.0, 3.0);
        let mut b = Body::from_desc(desc);
        for _ in 0..500 {
            b.integrate_pose(0.01);
        }
        let m = b.pose.basis;
        assert!((m * m.transpose()).abs_diff_eq(glam::DMat3::IDENTITY, 1.0e-9));
    }
}
