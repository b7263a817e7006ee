//! Pose math shared by locators, the tree transforms and the physics runtime.
//!
//! A [`Pose`] is a location plus an orthonormal basis whose columns are the
//! local axes expressed in the parent frame.

use glam::{DMat3, DMat4, DQuat, DVec3};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Location and orientation of a frame relative to its parent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    #[serde(default)]
    pub loc: DVec3,
    #[serde(default = "identity_basis")]
    pub basis: DMat3,
}

fn identity_basis() -> DMat3 {
    DMat3::IDENTITY
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose {
    pub const IDENTITY: Self = Self {
        loc: DVec3::ZERO,
        basis: DMat3::IDENTITY,
    };

    pub fn new(loc: DVec3, basis: DMat3) -> Self {
        Self { loc, basis }
    }

    pub fn from_loc(loc: DVec3) -> Self {
        Self {
            loc,
            basis: DMat3::IDENTITY,
        }
    }

    pub fn from_axis_angle(loc: DVec3, axis: DVec3, angle: f64) -> Self {
        Self {
            loc,
            basis: DMat3::from_axis_angle(axis.normalize(), angle),
        }
    }

    /// Express `inner` (given in this pose's frame) in the parent frame
    pub fn apply(&self, inner: &Pose) -> Pose {
        Pose {
            loc: self.loc + self.basis * inner.loc,
            basis: self.basis * inner.basis,
        }
    }

    pub fn inverse(&self) -> Pose {
        let t = self.basis.transpose();
        Pose {
            loc: -(t * self.loc),
            basis: t,
        }
    }

    /// Express `pose` (given in the parent frame) in this pose's frame
    pub fn localize(&self, pose: &Pose) -> Pose {
        self.inverse().apply(pose)
    }

    pub fn transform_point(&self, p: DVec3) -> DVec3 {
        self.loc + self.basis * p
    }

    pub fn transform_vector(&self, v: DVec3) -> DVec3 {
        self.basis * v
    }

    pub fn rotation(&self) -> DQuat {
        DQuat::from_mat3(&self.basis)
    }

    /// Column-major homogeneous matrix for drawing
    pub fn to_mat4(&self) -> DMat4 {
        DMat4::from_cols(
            self.basis.x_axis.extend(0.0),
            self.basis.y_axis.extend(0.0),
            self.basis.z_axis.extend(0.0),
            self.loc.extend(1.0),
        )
    }

    pub fn abs_diff_eq(&self, other: &Pose, eps: f64) -> bool {
        self.loc.abs_diff_eq(other.loc, eps) && self.basis.abs_diff_eq(other.basis, eps)
    }

    /// Rotate about `center` (parent frame) by the rotation `rot`
    pub fn rotated_about(&self, center: DVec3, rot: DMat3) -> Pose {
        Pose {
            loc: center + rot * (self.loc - center),
            basis: rot * self.basis,
        }
    }
}

/// Rotate `basis` by the axis-angle vector `rotation` (axis * angle, parent frame)
pub fn rotate_basis(basis: DMat3, rotation: DVec3) -> DMat3 {
    let angle = rotation.length();
    if angle < 1.0e-12 {
        return basis;
    }
    DMat3::from_axis_angle(rotation / angle, angle) * basis
}

/// Gram-Schmidt on the x and y columns; z is rebuilt from them
pub fn orthonormalize(m: DMat3) -> DMat3 {
    let x = m.x_axis.normalize_or_zero();
    let y = (m.y_axis - x * x.dot(m.y_axis)).normalize_or_zero();
    if x == DVec3::ZERO || y == DVec3::ZERO {
        return DMat3::IDENTITY;
    }
    DMat3::from_cols(x, y, x.cross(y))
}

/// Basis turned 180 degrees about `axis` given in the basis' own frame
pub fn flip(basis: DMat3, axis: DVec3) -> DMat3 {
    let axis = axis.normalize_or_zero();
    if axis == DVec3::ZERO {
        return basis;
    }
    basis * DMat3::from_axis_angle(axis, PI)
}

/// Two unit vectors completing `n` to an orthonormal frame
pub fn orthonormal_pair(n: DVec3) -> (DVec3, DVec3) {
    let (ax, ay, az) = (n.x.abs(), n.y.abs(), n.z.abs());
    let base = if ax <= ay && ax <= az {
        DVec3::X
    } else if ay <= az {
        DVec3::Y
    } else {
        DVec3::Z
    };
    let t1 = base.cross(n).normalize_or_zero();
    let t2 = n.cross(t1);
    (t1, t2)
}

/// Wrap an angle into (-pi, pi]
pub fn wrap_angle(a: f64) -> f64 {
    let mut a = a % (2.0 * PI);
    if a <= -PI {
        a += 2.0 * PI;
    } else if a > PI {
        a -= 2.0 * PI;
    }
    a
}

/// Signed rotation of `q` about the unit `axis` (swing-twist twist angle)
pub fn twist_angle(q: DQuat, axis: DVec3) -> f64 {
    let q = if q.w < 0.0 { -q } else { q };
    wrap_angle(2.0 * q.xyz().dot(axis).atan2(q.w))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_inverse_roundtrip() {
        let outer = Pose::from_axis_angle(DVec3::new(1.0, -2.0, 0.5), DVec3::new(1.0, 1.0, 0.0), 0.7);
        let inner = Pose::from_axis_angle(DVec3::new(0.3, 0.1, -4.0), DVec3::Z, -1.2);
        let abs = outer.apply(&inner);
        assert!(outer.localize(&abs).abs_diff_eq(&inner, 1.0e-12));
    }

    #[test]
    fn test_orthonormalize_repairs_drift() {
        let skewed = DMat3::from_cols(
            DVec3::new(1.0001, 0.001, 0.0),
            DVec3::new(0.002, 0.999, 0.0),
            DVec3::new(0.0, 0.0, 1.01),
        );
        let m = orthonormalize(skewed);
        assert!((m.determinant() - 1.0).abs() < 1.0e-12);
        assert!((m * m.transpose()).abs_diff_eq(DMat3::IDENTITY, 1.0e-12));
    }

    #[test]
    fn test_flip_about_z() {
        let flipped = flip(DMat3::IDENTITY, DVec3::Z);
        assert!(flipped.x_axis.abs_diff_eq(-DVec3::X, 1.0e-12));
        assert!(flipped.z_axis.abs_diff_eq(DVec3::Z, 1.0e-12));
    }

    #[test]
    fn test_twist_angle() {
        let q = DQuat::from_axis_angle(DVec3::Z, 0.4) * DQuat::from_axis_angle(DVec3::X, 0.0);
        assert!((twist_angle(q, DVec3::Z) - 0.4).abs() < 1.0e-12);
        assert!((twist_angle(q.inverse(), DVec3::Z) + 0.4).abs() < 1.0e-12);
    }

    #[test]
    fn test_orthonormal_pair() {
        let n = DVec3::new(0.0, 0.6, 0.8);
        let (a, b) = orthonormal_pair(n);
        assert!(a.dot(n).abs() < 1.0e-12);
        assert!(b.dot(n).abs() < 1.0e-12);
        assert!((a.length() - 1.0).abs() < 1.0e-12);
    }
}
