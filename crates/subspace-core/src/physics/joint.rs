//! Joint kinds and their constraint rows.
//!
//! Anchors and axes are stored in each body's local frame at creation so
//! they follow the bodies. A missing body means the static world, whose
//! frame is the identity.

use glam::{DQuat, DVec3};
use slab::Slab;

use super::body::Body;
use super::solver::Row;
use super::BodyId;
use crate::components::SurfaceMaterial;
use crate::math::{orthonormal_pair, twist_angle, Pose};

/// Stops closer than this get a speculative limit row
const LIMIT_MARGIN: f64 = 0.1;

/// One point of contact; `normal` points from body a toward body b
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactPoint {
    pub position: DVec3,
    pub normal: DVec3,
    pub depth: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum JointKind {
    Ball,
    Hinge,
    Slider,
    Universal,
    Fixed,
    Contact {
        point: ContactPoint,
        surface: SurfaceMaterial,
    },
}

/// Velocity motor on one joint axis
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Motor {
    pub target_velocity: f64,
    /// Largest force/torque the motor may apply; zero disables it
    pub max_force: f64,
}

/// Creation parameters, all in absolute coordinates
#[derive(Debug, Clone, Copy)]
pub struct JointDesc {
    pub kind: JointKind,
    pub body_a: Option<BodyId>,
    pub body_b: Option<BodyId>,
    pub anchor: DVec3,
    pub axis1: DVec3,
    pub axis2: DVec3,
    /// Stops on the first axis (angle or displacement)
    pub limits: Option<(f64, f64)>,
}

impl JointDesc {
    pub fn new(kind: JointKind, body_a: Option<BodyId>, body_b: Option<BodyId>) -> Self {
        Self {
            kind,
            body_a,
            body_b,
            anchor: DVec3::ZERO,
            axis1: DVec3::Z,
            axis2: DVec3::X,
            limits: None,
        }
    }

    pub fn with_anchor(mut self, anchor: DVec3) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn with_axes(mut self, axis1: DVec3, axis2: DVec3) -> Self {
        self.axis1 = axis1;
        self.axis2 = axis2;
        self
    }

    pub fn with_limits(mut self, limits: Option<(f64, f64)>) -> Self {
        self.limits = limits;
        self
    }
}

/// Live readings on up to two joint axes
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct JointSensors {
    pub position: [f64; 2],
    pub rate: [f64; 2],
}

#[derive(Debug, Clone)]
pub struct Joint {
    pub(crate) kind: JointKind,
    pub(crate) body_a: Option<BodyId>,
    pub(crate) body_b: Option<BodyId>,
    anchor_a: DVec3,
    anchor_b: DVec3,
    axis1_a: DVec3,
    axis1_b: DVec3,
    axis2_a: DVec3,
    axis2_b: DVec3,
    rel0: DQuat,
    limits: Option<(f64, f64)>,
    pub(crate) motors: [Motor; 2],
    pub(crate) efforts: [f64; 2],
}

fn frame(bodies: &Slab<Body>, id: Option<BodyId>) -> Pose {
    id.and_then(|b| bodies.get(b.index()))
        .map(|b| b.pose)
        .unwrap_or(Pose::IDENTITY)
}

fn velocities(bodies: &Slab<Body>, id: Option<BodyId>) -> (DVec3, DVec3) {
    id.and_then(|b| bodies.get(b.index()))
        .map(|b| (b.lin_vel, b.ang_vel))
        .unwrap_or((DVec3::ZERO, DVec3::ZERO))
}

impl Joint {
    pub(crate) fn new(desc: &JointDesc, bodies: &Slab<Body>) -> Self {
        let fa = frame(bodies, desc.body_a);
        let fb = frame(bodies, desc.body_b);
        let to_a = fa.basis.transpose();
        let to_b = fb.basis.transpose();
        let axis1 = desc.axis1.normalize_or_zero();
        let axis2 = desc.axis2.normalize_or_zero();
        Self {
            kind: desc.kind,
            body_a: desc.body_a,
            body_b: desc.body_b,
            anchor_a: fa.inverse().transform_point(desc.anchor),
            anchor_b: fb.inverse().transform_point(desc.anchor),
            axis1_a: to_a * axis1,
            axis1_b: to_b * axis1,
            axis2_a: to_a * axis2,
            axis2_b: to_b * axis2,
            rel0: fa.rotation().inverse() * fb.rotation(),
            limits: desc.limits,
            motors: [Motor::default(); 2],
            efforts: [0.0; 2],
        }
    }

    pub fn kind(&self) -> &JointKind {
        &self.kind
    }

    pub fn bodies(&self) -> (Option<BodyId>, Option<BodyId>) {
        (self.body_a, self.body_b)
    }

    pub fn involves(&self, body: BodyId) -> bool {
        self.body_a == Some(body) || self.body_b == Some(body)
    }

    /// Rotation of b relative to a since creation, in a's frame
    fn drift(&self, fa: &Pose, fb: &Pose) -> DQuat {
        fa.rotation().inverse() * fb.rotation() * self.rel0.inverse()
    }

    fn anchors(&self, fa: &Pose, fb: &Pose) -> (DVec3, DVec3) {
        let pa = if self.body_a.is_some() { fa.transform_point(self.anchor_a) } else { self.anchor_a };
        let pb = if self.body_b.is_some() { fb.transform_point(self.anchor_b) } else { self.anchor_b };
        (pa, pb)
    }

    /// Joint-space axis in world coordinates for `slot`
    fn axis(&self, fa: &Pose, fb: &Pose, slot: usize) -> DVec3 {
        match (self.kind, slot) {
            (JointKind::Universal, 1) => fb.basis * self.axis2_b,
            _ => fa.basis * self.axis1_a,
        }
    }

    /// Angle (rotational joints) or displacement (slider) on `slot`
    pub fn position(&self, bodies: &Slab<Body>, slot: usize) -> f64 {
        let fa = frame(bodies, self.body_a);
        let fb = frame(bodies, self.body_b);
        match (self.kind, slot) {
            (JointKind::Hinge, 0) | (JointKind::Universal, 0) => {
                twist_angle(self.drift(&fa, &fb), self.axis1_a)
            }
            (JointKind::Universal, 1) => twist_angle(self.drift(&fa, &fb), self.axis2_a),
            (JointKind::Slider, 0) => {
                let (pa, pb) = self.anchors(&fa, &fb);
                (pb - pa).dot(self.axis(&fa, &fb, 0))
            }
            _ => 0.0,
        }
    }

    pub fn rate(&self, bodies: &Slab<Body>, slot: usize) -> f64 {
        let fa = frame(bodies, self.body_a);
        let fb = frame(bodies, self.body_b);
        let (va, wa) = velocities(bodies, self.body_a);
        let (vb, wb) = velocities(bodies, self.body_b);
        match (self.kind, slot) {
            (JointKind::Hinge, 0) | (JointKind::Universal, _) => (wb - wa).dot(self.axis(&fa, &fb, slot)),
            (JointKind::Slider, 0) => (vb - va).dot(self.axis(&fa, &fb, 0)),
            _ => 0.0,
        }
    }

    pub fn sensors(&self, bodies: &Slab<Body>) -> JointSensors {
        JointSensors {
            position: [self.position(bodies, 0), self.position(bodies, 1)],
            rate: [self.rate(bodies, 0), self.rate(bodies, 1)],
        }
    }

    /// Push direct torques/forces from the efforts into the body accumulators
    pub(crate) fn apply_efforts(&self, bodies: &mut Slab<Body>) {
        if self.efforts == [0.0; 2] {
            return;
        }
        let fa = frame(bodies, self.body_a);
        let fb = frame(bodies, self.body_b);
        for slot in 0..2 {
            let effort = self.efforts[slot];
            if effort == 0.0 {
                continue;
            }
            let axis = self.axis(&fa, &fb, slot) * effort;
            let linear = matches!(self.kind, JointKind::Slider);
            if let Some(a) = self.body_a.and_then(|b| bodies.get_mut(b.index())) {
                if linear { a.force -= axis } else { a.torque -= axis }
            }
            if let Some(b) = self.body_b.and_then(|b| bodies.get_mut(b.index())) {
                if linear { b.force += axis } else { b.torque += axis }
            }
        }
    }

    pub(crate) fn build_rows(&self, bodies: &Slab<Body>, dt: f64, erp: f64, slop: f64, rows: &mut Vec<Row>) {
        let fa = frame(bodies, self.body_a);
        let fb = frame(bodies, self.body_b);
        let a = self.body_a.map(|b| b.index());
        let b = self.body_b.map(|b| b.index());
        let k = erp / dt;

        match self.kind {
            JointKind::Ball => self.point_rows(&fa, &fb, k, rows),
            JointKind::Hinge => {
                self.point_rows(&fa, &fb, k, rows);
                let axis_a = fa.basis * self.axis1_a;
                let err = axis_a.cross(fb.basis * self.axis1_b);
                let (p, q) = orthonormal_pair(axis_a);
                for dir in [p, q] {
                    rows.push(Row::angular(a, b, dir).with_target(-k * err.dot(dir)));
                }
                self.motor_row(&fa, &fb, 0, dt, rows);
                self.limit_rows(bodies, &fa, &fb, dt, k, rows);
            }
            JointKind::Slider => {
                self.orientation_rows(&fa, &fb, k, rows);
                let axis = fa.basis * self.axis1_a;
                let (pa, pb) = self.anchors(&fa, &fb);
                let (p, q) = orthonormal_pair(axis);
                for dir in [p, q] {
                    rows.push(Row::linear(a, b, DVec3::ZERO, DVec3::ZERO, dir).with_target(-k * (pb - pa).dot(dir)));
                }
                self.motor_row(&fa, &fb, 0, dt, rows);
                self.limit_rows(bodies, &fa, &fb, dt, k, rows);
            }
            JointKind::Universal => {
                self.point_rows(&fa, &fb, k, rows);
                let a1 = fa.basis * self.axis1_a;
                let a2 = fb.basis * self.axis2_b;
                let n = a1.cross(a2);
                let mut row = Row::new(a, b).with_target(-k * a1.dot(a2));
                row.ang_a = n;
                row.ang_b = -n;
                rows.push(row);
                self.motor_row(&fa, &fb, 0, dt, rows);
                self.motor_row(&fa, &fb, 1, dt, rows);
            }
            JointKind::Fixed => {
                self.point_rows(&fa, &fb, k, rows);
                self.orientation_rows(&fa, &fb, k, rows);
            }
            JointKind::Contact { point, surface } => {
                let ra = point.position - fa.loc;
                let rb = point.position - fb.loc;
                let mut normal = Row::linear(a, b, ra, rb, point.normal).with_bounds(0.0, f64::INFINITY);
                let approach = normal.velocity(bodies);
                let mut target = k * (point.depth - slop).max(0.0);
                if -approach > surface.bounce_velocity {
                    target = target.max(-surface.bounce * approach);
                }
                normal.target = target;
                let normal_index = rows.len();
                rows.push(normal);
                let (t1, t2) = orthonormal_pair(point.normal);
                for dir in [t1, t2] {
                    let mut row = Row::linear(a, b, ra, rb, dir).with_bounds(0.0, 0.0);
                    row.friction = Some((normal_index, surface.friction));
                    rows.push(row);
                }
            }
        }
    }

    fn point_rows(&self, fa: &Pose, fb: &Pose, k: f64, rows: &mut Vec<Row>) {
        let a = self.body_a.map(|b| b.index());
        let b = self.body_b.map(|b| b.index());
        let (pa, pb) = self.anchors(fa, fb);
        let ra = pa - fa.loc;
        let rb = pb - fb.loc;
        let error = pb - pa;
        for dir in [DVec3::X, DVec3::Y, DVec3::Z] {
            rows.push(Row::linear(a, b, ra, rb, dir).with_target(-k * error.dot(dir)));
        }
    }

    fn orientation_rows(&self, fa: &Pose, fb: &Pose, k: f64, rows: &mut Vec<Row>) {
        let a = self.body_a.map(|b| b.index());
        let b = self.body_b.map(|b| b.index());
        let drift = self.drift(fa, fb);
        let drift = if drift.w < 0.0 { -drift } else { drift };
        let error = fa.basis * (drift.xyz() * 2.0);
        for dir in [DVec3::X, DVec3::Y, DVec3::Z] {
            rows.push(Row::angular(a, b, dir).with_target(-k * error.dot(dir)));
        }
    }

    fn axis_row(&self, fa: &Pose, fb: &Pose, slot: usize) -> Row {
        let a = self.body_a.map(|b| b.index());
        let b = self.body_b.map(|b| b.index());
        let axis = self.axis(fa, fb, slot);
        match self.kind {
            JointKind::Slider => Row::linear(a, b, DVec3::ZERO, DVec3::ZERO, axis),
            _ => Row::angular(a, b, axis),
        }
    }

    fn motor_row(&self, fa: &Pose, fb: &Pose, slot: usize, dt: f64, rows: &mut Vec<Row>) {
        let motor = self.motors[slot];
        if motor.max_force <= 0.0 {
            return;
        }
        let limit = motor.max_force * dt;
        rows.push(
            self.axis_row(fa, fb, slot)
                .with_target(motor.target_velocity)
                .with_bounds(-limit, limit),
        );
    }

    fn limit_rows(&self, bodies: &Slab<Body>, fa: &Pose, fb: &Pose, dt: f64, k: f64, rows: &mut Vec<Row>) {
        let Some((lo, hi)) = self.limits else { return };
        let position = self.position(bodies, 0);
        let gap_target = |gap: f64| if gap < 0.0 { -gap * k } else { -gap / dt };

        let lower_gap = position - lo;
        if lower_gap < LIMIT_MARGIN {
            rows.push(
                self.axis_row(fa, fb, 0)
                    .with_target(gap_target(lower_gap))
                    .with_bounds(0.0, f64::INFINITY),
            );
        }
        let upper_gap = hi - position;
        if upper_gap < LIMIT_MARGIN {
            let mut row = self.axis_row(fa, fb, 0);
            row.lin_a = -row.lin_a;
            row.ang_a = -row.ang_a;
            row.lin_b = -row.lin_b;
            row.ang_b = -row.ang_b;
            rows.push(row.with_target(gap_target(upper_gap)).with_bounds(0.0, f64::INFINITY));
        }
    }

    /// Move the bodies back onto a violated stop and cancel motion past it
    pub(crate) fn project_limits(&self, bodies: &mut Slab<Body>) {
        let Some((lo, hi)) = self.limits else { return };
        if !matches!(self.kind, JointKind::Hinge | JointKind::Slider) {
            return;
        }
        let position = self.position(bodies, 0);
        let excess = if position > hi {
            position - hi
        } else if position < lo {
            position - lo
        } else {
            return;
        };

        let fa = frame(bodies, self.body_a);
        let fb = frame(bodies, self.body_b);
        let axis = self.axis(&fa, &fb, 0);
        let (pivot, _) = self.anchors(&fa, &fb);
        let linear = matches!(self.kind, JointKind::Slider);

        let weight = |id: Option<BodyId>, bodies: &Slab<Body>| {
            id.and_then(|b| bodies.get(b.index()))
                .map(|b| if linear { b.inv_mass } else { b.inv_moment })
                .unwrap_or(0.0)
        };
        let wa = weight(self.body_a, bodies);
        let wb = weight(self.body_b, bodies);
        let total = wa + wb;
        if total <= 0.0 {
            return;
        }

        let rate = self.rate(bodies, 0);
        let closing = (excess > 0.0 && rate > 0.0) || (excess < 0.0 && rate < 0.0);

        for (id, share, sign) in [(self.body_a, wa / total, 1.0), (self.body_b, wb / total, -1.0)] {
            let Some(body) = id.and_then(|b| bodies.get_mut(b.index())) else { continue };
            let amount = sign * excess * share;
            if linear {
                body.pose.loc += axis * amount;
            } else {
                let turn = glam::DMat3::from_axis_angle(axis, amount);
                body.pose = body.pose.rotated_about(pivot, turn);
            }
            if closing {
                let cancel = axis * (sign * rate * share);
                if linear {
                    body.lin_vel += cancel;
                } else {
                    body.ang_vel += cancel;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::body::BodyDesc;

    fn two_bodies() -> (Slab<Body>, BodyId, BodyId) {
        let mut bodies = Slab::new();
        let a = bodies.insert(Body::from_desc(BodyDesc::new(Pose::IDENTITY, 1.0, 0.1)));
        let b = bodies.insert(Body::from_desc(BodyDesc::new(Pose::from_loc(DVec3::X), 1.0, 0.1)));
        (bodies, BodyId(a as u32), BodyId(b as u32))
    }

    #[test]
    fn test_hinge_angle_follows_relative_twist() {
        let (mut bodies, a, b) = two_bodies();
        let desc = JointDesc::new(JointKind::Hinge, Some(a), Some(b))
            .with_anchor(DVec3::new(0.5, 0.0, 0.0))
            .with_axes(DVec3::Z, DVec3::X);
        let joint = Joint::new(&desc, &bodies);
        assert!(joint.position(&bodies, 0).abs() < 1.0e-12);

        let pivot = DVec3::new(0.5, 0.0, 0.0);
        let turn = glam::DMat3::from_axis_angle(DVec3::Z, 0.3);
        let moved = bodies[b.index()].pose.rotated_about(pivot, turn);
        bodies[b.index()].pose = moved;
        assert!((joint.position(&bodies, 0) - 0.3).abs() < 1.0e-12);
    }

    #[test]
    fn test_projection_clamps_to_stop() {
        let (mut bodies, a, b) = two_bodies();
        let desc = JointDesc::new(JointKind::Hinge, Some(a), Some(b))
            .with_anchor(DVec3::new(0.5, 0.0, 0.0))
            .with_axes(DVec3::Z, DVec3::X)
            .with_limits(Some((-1.0, 0.0)));
        let joint = Joint::new(&desc, &bodies);

        let pivot = DVec3::new(0.5, 0.0, 0.0);
        let moved = bodies[b.index()].pose.rotated_about(pivot, glam::DMat3::from_axis_angle(DVec3::Z, 0.2));
        bodies[b.index()].pose = moved;
        bodies[b.index()].ang_vel = DVec3::new(0.0, 0.0, 1.0);

        joint.project_limits(&mut bodies);
        assert!(joint.position(&bodies, 0).abs() < 1.0e-12);
        assert!(joint.rate(&bodies, 0).abs() < 1.0e-12);
    }

    #[test]
    fn test_slider_position_along_axis() {
        let (mut bodies, a, b) = two_bodies();
        let desc = JointDesc::new(JointKind::Slider, Some(a), Some(b))
            .with_anchor(DVec3::new(0.5, 0.0, 0.0))
            .with_axes(DVec3::X, DVec3::Y);
        let joint = Joint::new(&desc, &bodies);
        bodies[b.index()].pose.loc += DVec3::new(0.25, 0.1, 0.0);
        assert!((joint.position(&bodies, 0) - 0.25).abs() < 1.0e-12);
    }

    #[test]
    fn test_world_anchored_ball_rows() {
        let (bodies, _, b) = two_bodies();
        let desc = JointDesc::new(JointKind::Ball, None, Some(b)).with_anchor(DVec3::new(1.0, 0.0, 1.0));
        let joint = Joint::new(&desc, &bodies);
        let mut rows = Vec::new();
        joint.build_rows(&bodies, 0.01, 0.2, 0.0, &mut rows);
        assert_eq!(rows.len(), 3);
        // Anchor coincides at creation, so no error correction
        assert!(rows.iter().all(|r| r.target.abs() < 1.0e-12));
    }
}
