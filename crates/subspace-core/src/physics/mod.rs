//! Rigid-body runtime backing engine locators.
//!
//! Owns bodies, joints, collision geoms and spaces in slabs addressed by
//! small copyable ids. All coordinates are absolute. One call to
//! [`PhysicsEngine::step`] runs:
//!
//! 1. joint efforts into the force accumulators
//! 2. gravity and forces into velocities
//! 3. constraint rows through the sequential-impulse solver
//! 4. velocities into poses
//! 5. projection of violated joint stops
//! 6. clearing of the accumulators

mod body;
mod collide;
mod joint;
mod solver;

use std::fmt;

use glam::DVec3;
use log::trace;
use slab::Slab;

pub use body::{Body, BodyDesc};
pub use collide::{collide, overlapping_pairs, Aabb, Geom, Space};
pub use joint::{ContactPoint, Joint, JointDesc, JointKind, JointSensors, Motor};

use crate::components::{Shape, SurfaceMaterial};
use crate::error::EngineError;
use crate::math::Pose;
use solver::Row;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct BodyId(pub u32);

impl fmt::Display for BodyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BodyId({})", self.0)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct JointId(pub u32);

impl fmt::Display for JointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JointId({})", self.0)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct GeomId(pub u32);

impl fmt::Display for GeomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GeomId({})", self.0)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct SpaceId(pub u32);

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpaceId({})", self.0)
    }
}

impl BodyId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Global solver settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineParams {
    pub gravity: DVec3,
    pub iterations: u32,
    /// Fraction of positional error corrected per step
    pub erp: f64,
    /// Penetration tolerated before contacts push apart
    pub slop: f64,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            gravity: DVec3::new(0.0, 0.0, -9.81),
            iterations: 20,
            erp: 0.2,
            slop: 0.001,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PhysicsEngine {
    params: EngineParams,
    bodies: Slab<Body>,
    joints: Slab<Joint>,
    geoms: Slab<Geom>,
    spaces: Slab<Space>,
}

impl PhysicsEngine {
    pub fn new(params: EngineParams) -> Self {
        Self {
            params,
            ..Default::default()
        }
    }

    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    pub fn set_gravity(&mut self, gravity: DVec3) {
        self.params.gravity = gravity;
    }

    // ---- bodies ----

    pub fn create_body(&mut self, desc: BodyDesc) -> BodyId {
        let id = BodyId(self.bodies.insert(Body::from_desc(desc)) as u32);
        trace!("created {}", id);
        id
    }

    /// Remove a body and every joint attached to it. Geoms riding on it
    /// stay behind as static geoms at the body's last pose.
    pub fn destroy_body(&mut self, id: BodyId) -> Result<Vec<JointId>, EngineError> {
        let body = self.bodies.try_remove(id.index()).ok_or(EngineError::NoSuchBody(id))?;
        let attached: Vec<JointId> = self
            .joints
            .iter()
            .filter(|(_, j)| j.involves(id))
            .map(|(k, _)| JointId(k as u32))
            .collect();
        for joint in &attached {
            self.joints.remove(joint.0 as usize);
        }
        for (_, geom) in self.geoms.iter_mut() {
            if geom.body == Some(id) {
                geom.pose = body.pose.apply(&geom.offset);
                geom.body = None;
            }
        }
        trace!("destroyed {} with {} joints", id, attached.len());
        Ok(attached)
    }

    pub fn body(&self, id: BodyId) -> Result<&Body, EngineError> {
        self.bodies.get(id.index()).ok_or(EngineError::NoSuchBody(id))
    }

    fn body_mut(&mut self, id: BodyId) -> Result<&mut Body, EngineError> {
        self.bodies.get_mut(id.index()).ok_or(EngineError::NoSuchBody(id))
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn set_body_pose(&mut self, id: BodyId, pose: Pose) -> Result<(), EngineError> {
        self.body_mut(id)?.pose = pose;
        Ok(())
    }

    pub fn set_body_velocity(&mut self, id: BodyId, velocity: DVec3) -> Result<(), EngineError> {
        self.body_mut(id)?.lin_vel = velocity;
        Ok(())
    }

    pub fn set_body_ang_vel(&mut self, id: BodyId, rot_rate: DVec3) -> Result<(), EngineError> {
        self.body_mut(id)?.ang_vel = rot_rate;
        Ok(())
    }

    pub fn add_force(&mut self, id: BodyId, force: DVec3) -> Result<(), EngineError> {
        self.body_mut(id)?.force += force;
        Ok(())
    }

    pub fn add_torque(&mut self, id: BodyId, torque: DVec3) -> Result<(), EngineError> {
        self.body_mut(id)?.torque += torque;
        Ok(())
    }

    // ---- joints ----

    pub fn create_joint(&mut self, desc: JointDesc) -> Result<JointId, EngineError> {
        if desc.body_a.is_none() && desc.body_b.is_none() {
            return Err(EngineError::NoBodies);
        }
        for id in [desc.body_a, desc.body_b].into_iter().flatten() {
            self.body(id)?;
        }
        let joint = Joint::new(&desc, &self.bodies);
        Ok(JointId(self.joints.insert(joint) as u32))
    }

    pub fn destroy_joint(&mut self, id: JointId) -> Result<(), EngineError> {
        self.joints
            .try_remove(id.0 as usize)
            .map(|_| ())
            .ok_or(EngineError::NoSuchJoint(id))
    }

    pub fn joint(&self, id: JointId) -> Result<&Joint, EngineError> {
        self.joints.get(id.0 as usize).ok_or(EngineError::NoSuchJoint(id))
    }

    fn joint_mut(&mut self, id: JointId) -> Result<&mut Joint, EngineError> {
        self.joints.get_mut(id.0 as usize).ok_or(EngineError::NoSuchJoint(id))
    }

    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    /// Velocity motor on axis `slot` (0 or 1); holds until replaced
    pub fn set_motor(&mut self, id: JointId, slot: usize, motor: Motor) -> Result<(), EngineError> {
        if let Some(m) = self.joint_mut(id)?.motors.get_mut(slot) {
            *m = motor;
        }
        Ok(())
    }

    /// Direct torque/force on axis `slot` for the next step only.
    /// A second call before the step replaces the first.
    pub fn set_effort(&mut self, id: JointId, slot: usize, effort: f64) -> Result<(), EngineError> {
        if let Some(e) = self.joint_mut(id)?.efforts.get_mut(slot) {
            *e = effort;
        }
        Ok(())
    }

    pub fn joint_sensors(&self, id: JointId) -> Result<JointSensors, EngineError> {
        Ok(self.joint(id)?.sensors(&self.bodies))
    }

    /// One-step contact joint between two bodies (either may be the world)
    pub fn create_contact(
        &mut self,
        body_a: Option<BodyId>,
        body_b: Option<BodyId>,
        point: ContactPoint,
        surface: SurfaceMaterial,
    ) -> Result<JointId, EngineError> {
        self.create_joint(
            JointDesc::new(JointKind::Contact { point, surface }, body_a, body_b).with_anchor(point.position),
        )
    }

    // ---- collision ----

    pub fn create_space(&mut self, parent: Option<SpaceId>) -> Result<SpaceId, EngineError> {
        if let Some(p) = parent {
            self.space(p)?;
        }
        let id = self.spaces.insert(Space { parent, enabled: true });
        Ok(SpaceId(id as u32))
    }

    /// Remove a space together with its geoms and nested spaces
    pub fn destroy_space(&mut self, id: SpaceId) -> Result<(), EngineError> {
        self.space(id)?;
        let mut doomed = vec![id];
        let mut i = 0;
        while i < doomed.len() {
            let current = doomed[i];
            doomed.extend(
                self.spaces
                    .iter()
                    .filter(|(_, s)| s.parent == Some(current))
                    .map(|(k, _)| SpaceId(k as u32)),
            );
            i += 1;
        }
        self.geoms.retain(|_, g| !doomed.contains(&g.space));
        for space in doomed {
            self.spaces.remove(space.0 as usize);
        }
        Ok(())
    }

    pub fn space(&self, id: SpaceId) -> Result<&Space, EngineError> {
        self.spaces.get(id.0 as usize).ok_or(EngineError::NoSuchSpace(id))
    }

    pub fn set_space_enabled(&mut self, id: SpaceId, enabled: bool) -> Result<(), EngineError> {
        self.spaces
            .get_mut(id.0 as usize)
            .ok_or(EngineError::NoSuchSpace(id))?
            .enabled = enabled;
        Ok(())
    }

    /// Whether the space and all its ancestors are enabled
    pub fn space_live(&self, id: SpaceId) -> bool {
        let mut current = Some(id);
        while let Some(s) = current {
            match self.spaces.get(s.0 as usize) {
                Some(space) if space.enabled => current = space.parent,
                _ => return false,
            }
        }
        true
    }

    /// Geom riding on `body` at `offset`, or static at the absolute `offset`
    pub fn create_geom(
        &mut self,
        space: SpaceId,
        shape: Shape,
        body: Option<BodyId>,
        offset: Pose,
    ) -> Result<GeomId, EngineError> {
        self.space(space)?;
        if let Some(b) = body {
            self.body(b)?;
        }
        let geom = Geom {
            shape,
            body,
            offset,
            pose: offset,
            space,
            enabled: true,
        };
        Ok(GeomId(self.geoms.insert(geom) as u32))
    }

    pub fn destroy_geom(&mut self, id: GeomId) -> Result<(), EngineError> {
        self.geoms
            .try_remove(id.0 as usize)
            .map(|_| ())
            .ok_or(EngineError::NoSuchGeom(id))
    }

    pub fn geom(&self, id: GeomId) -> Result<&Geom, EngineError> {
        self.geoms.get(id.0 as usize).ok_or(EngineError::NoSuchGeom(id))
    }

    /// Re-home a geom: onto `body` at offset `pose`, or static at the
    /// absolute `pose` when `body` is `None`
    pub fn attach_geom(&mut self, id: GeomId, body: Option<BodyId>, pose: Pose) -> Result<(), EngineError> {
        if let Some(b) = body {
            self.body(b)?;
        }
        let geom = self.geoms.get_mut(id.0 as usize).ok_or(EngineError::NoSuchGeom(id))?;
        geom.body = body;
        geom.offset = pose;
        geom.pose = pose;
        Ok(())
    }

    pub fn set_geom_enabled(&mut self, id: GeomId, enabled: bool) -> Result<(), EngineError> {
        self.geoms
            .get_mut(id.0 as usize)
            .ok_or(EngineError::NoSuchGeom(id))?
            .enabled = enabled;
        Ok(())
    }

    /// Absolute pose of a geom
    pub fn geom_pose(&self, id: GeomId) -> Result<Pose, EngineError> {
        let geom = self.geom(id)?;
        Ok(self.placed(geom))
    }

    fn placed(&self, geom: &Geom) -> Pose {
        match geom.body.and_then(|b| self.bodies.get(b.index())) {
            Some(body) => body.pose.apply(&geom.offset),
            None => geom.pose,
        }
    }

    /// Broad phase over every live geom. Pairs on the same body and pairs
    /// of two static geoms are skipped.
    pub fn candidate_pairs(&self) -> Vec<(GeomId, GeomId)> {
        let live: Vec<(GeomId, &Geom)> = self
            .geoms
            .iter()
            .filter(|(_, g)| g.enabled && self.space_live(g.space))
            .map(|(k, g)| (GeomId(k as u32), g))
            .collect();
        let boxes: Vec<Aabb> = live.iter().map(|(_, g)| Aabb::of(&g.shape, &self.placed(g))).collect();

        overlapping_pairs(&boxes)
            .into_iter()
            .filter(|&(i, k)| {
                let (a, b) = (live[i].1, live[k].1);
                match (a.body, b.body) {
                    (None, None) => false,
                    (Some(x), Some(y)) => x != y,
                    _ => true,
                }
            })
            .map(|(i, k)| (live[i].0, live[k].0))
            .collect()
    }

    /// Narrow phase for one pair; normals point from `a` toward `b`
    pub fn collide_geoms(&self, a: GeomId, b: GeomId, max: usize) -> Result<Vec<ContactPoint>, EngineError> {
        let ga = self.geom(a)?;
        let gb = self.geom(b)?;
        Ok(collide(&ga.shape, &self.placed(ga), &gb.shape, &self.placed(gb), max))
    }

    // ---- stepping ----

    pub fn step(&mut self, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        let params = self.params;

        for (_, joint) in self.joints.iter() {
            joint.apply_efforts(&mut self.bodies);
        }
        for (_, body) in self.bodies.iter_mut() {
            body.integrate_forces(params.gravity, dt);
        }

        let mut rows: Vec<Row> = Vec::new();
        for (_, joint) in self.joints.iter() {
            joint.build_rows(&self.bodies, dt, params.erp, params.slop, &mut rows);
        }
        // Rows that cannot act keep a zero effective mass and stay in place
        // so friction rows can still index their normal row.
        for row in rows.iter_mut() {
            row.finalize(&self.bodies);
        }
        solver::solve(&mut rows, &mut self.bodies, params.iterations);

        for (_, body) in self.bodies.iter_mut() {
            body.integrate_pose(dt);
        }
        for (_, joint) in self.joints.iter() {
            joint.project_limits(&mut self.bodies);
        }
        for (_, body) in self.bodies.iter_mut() {
            body.clear_accumulators();
        }
        for (_, joint) in self.joints.iter_mut() {
            joint.efforts = [0.0; 2];
        }
        trace!("stepped {} bodies, {} rows", self.bodies.len(), rows.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zero_g() -> PhysicsEngine {
        PhysicsEngine::new(EngineParams {
            gravity: DVec3::ZERO,
            ..Default::default()
        })
    }

    #[test]
    fn test_joint_needs_a_body() {
        let mut engine = zero_g();
        let err = engine.create_joint(JointDesc::new(JointKind::Ball, None, None)).unwrap_err();
        assert_eq!(err, EngineError::NoBodies);
    }

    #[test]
    fn test_destroy_body_removes_joints() {
        let mut engine = zero_g();
        let a = engine.create_body(BodyDesc::new(Pose::IDENTITY, 1.0, 1.0));
        let b = engine.create_body(BodyDesc::new(Pose::from_loc(DVec3::X), 1.0, 1.0));
        let j = engine
            .create_joint(JointDesc::new(JointKind::Ball, Some(a), Some(b)).with_anchor(DVec3::X * 0.5))
            .unwrap();
        assert_eq!(engine.destroy_body(a).unwrap(), vec![j]);
        assert_eq!(engine.joint(j).unwrap_err(), EngineError::NoSuchJoint(j));
    }

    #[test]
    fn test_ball_joint_holds_pendulum_length() {
        let mut engine = PhysicsEngine::new(EngineParams::default());
        let bob = engine.create_body(BodyDesc::new(Pose::from_loc(DVec3::new(1.0, 0.0, 0.0)), 1.0, 0.1));
        engine
            .create_joint(JointDesc::new(JointKind::Ball, None, Some(bob)).with_anchor(DVec3::ZERO))
            .unwrap();
        for _ in 0..100 {
            engine.step(0.01);
        }
        let loc = engine.body(bob).unwrap().pose().loc;
        assert!((loc.length() - 1.0).abs() < 0.02);
        assert!(loc.z < -0.1);
    }

    #[test]
    fn test_hinge_motor_reaches_speed() {
        let mut engine = zero_g();
        let wheel = engine.create_body(BodyDesc::new(Pose::IDENTITY, 1.0, 0.1));
        let hinge = engine
            .create_joint(JointDesc::new(JointKind::Hinge, None, Some(wheel)).with_axes(DVec3::Z, DVec3::X))
            .unwrap();
        engine
            .set_motor(hinge, 0, Motor { target_velocity: 2.0, max_force: 100.0 })
            .unwrap();
        for _ in 0..10 {
            engine.step(0.01);
        }
        let sensors = engine.joint_sensors(hinge).unwrap();
        assert!((sensors.rate[0] - 2.0).abs() < 1.0e-6);
        assert!(sensors.position[0] > 0.0);
    }

    #[test]
    fn test_hinge_stop_is_never_exceeded() {
        let mut engine = zero_g();
        let arm = engine.create_body(BodyDesc::new(Pose::from_loc(DVec3::X), 1.0, 0.1));
        let hinge = engine
            .create_joint(
                JointDesc::new(JointKind::Hinge, None, Some(arm))
                    .with_axes(DVec3::Z, DVec3::X)
                    .with_limits(Some((-0.5, 0.5))),
            )
            .unwrap();
        for _ in 0..100 {
            engine.set_effort(hinge, 0, 5.0).unwrap();
            engine.step(0.01);
            assert!(engine.joint_sensors(hinge).unwrap().position[0] <= 0.5 + 1.0e-9);
        }
    }

    #[test]
    fn test_sphere_rests_on_ground() {
        let mut engine = PhysicsEngine::new(EngineParams::default());
        let space = engine.create_space(None).unwrap();
        let ball = engine.create_body(BodyDesc::new(Pose::from_loc(DVec3::new(0.0, 0.0, 0.6)), 1.0, 0.1));
        engine.create_geom(space, Shape::ground(), None, Pose::IDENTITY).unwrap();
        engine.create_geom(space, Shape::sphere(0.5), Some(ball), Pose::IDENTITY).unwrap();

        for _ in 0..300 {
            let mut contacts = Vec::new();
            for (a, b) in engine.candidate_pairs() {
                for point in engine.collide_geoms(a, b, 4).unwrap() {
                    let body_a = engine.geom(a).unwrap().body();
                    let body_b = engine.geom(b).unwrap().body();
                    contacts.push(engine.create_contact(body_a, body_b, point, SurfaceMaterial::default()).unwrap());
                }
            }
            engine.step(0.01);
            for c in contacts {
                engine.destroy_joint(c).unwrap();
            }
        }
        let z = engine.body(ball).unwrap().pose().loc.z;
        assert!(z > 0.45 && z < 0.52, "ball settled at {}", z);
    }

    #[test]
    fn test_disabled_space_produces_no_pairs() {
        let mut engine = zero_g();
        let space = engine.create_space(None).unwrap();
        let inner = engine.create_space(Some(space)).unwrap();
        let a = engine.create_body(BodyDesc::new(Pose::IDENTITY, 1.0, 1.0));
        let b = engine.create_body(BodyDesc::new(Pose::from_loc(DVec3::X * 0.5), 1.0, 1.0));
        engine.create_geom(space, Shape::sphere(0.5), Some(a), Pose::IDENTITY).unwrap();
        engine.create_geom(inner, Shape::sphere(0.5), Some(b), Pose::IDENTITY).unwrap();
        assert_eq!(engine.candidate_pairs().len(), 1);

        engine.set_space_enabled(space, false).unwrap();
        assert!(engine.candidate_pairs().is_empty());
    }
}
