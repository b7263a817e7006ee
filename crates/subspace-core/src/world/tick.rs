//! The two-phase tick.
//!
//! `prepare(dt)` walks the tree depth-first in insertion order. Each
//! advancing object computes its tentative state, authoritative connectors
//! push their controls into the engine joints and engine bodies feel drag.
//! A `Paused` subspace stops the walk for everything inside it. The first
//! prepare of a tick then runs the contact pass. `prepare` may be repeated;
//! the last call's `dt` wins and nothing is consumed until `step`.
//!
//! `step()` advances the engine, commits locators, refreshes connector
//! sensors and lets pulse controls decay.

use glam::DVec3;
use hecs::Entity;
use log::trace;

use super::World;
use crate::components::{Integrator, Subspace};
use crate::connector::{ConnectorRef, Connectors};
use crate::controls::ControlSurface;
use crate::error::WorldError;
use crate::locator::{Inertia, Locator};
use crate::physics::BodyId;

impl World {
    /// Objects that advance this tick, depth-first in insertion order
    fn advancing(&self) -> Vec<Entity> {
        let mut out = Vec::new();
        let mut stack = vec![self.root()];
        while let Some(e) = stack.pop() {
            if e != self.root() {
                out.push(e);
            }
            if let Ok(sub) = self.ecs.get::<&Subspace>(e) {
                if sub.integrator == Integrator::Sequential {
                    stack.extend(sub.children.iter().rev().copied());
                }
            }
        }
        out
    }

    pub fn prepare(&mut self, dt: f64) -> Result<(), WorldError> {
        let first = self.pending_dt.is_none();
        for object in self.advancing() {
            self.prepare_object(object, dt)?;
        }
        self.pending_dt = Some(dt);

        if first && self.collisions.is_some() {
            self.last_report = self.collision_pass()?;
        }
        Ok(())
    }

    fn prepare_object(&mut self, object: Entity, dt: f64) -> Result<(), WorldError> {
        let undragged = match self.ecs.get::<&Locator>(object) {
            Ok(l) => match &*l {
                Locator::Engine(e) if !e.prepared => e.body().map(|b| (b, *e.inertia())),
                _ => None,
            },
            Err(_) => None,
        };
        if let Some((body, inertia)) = undragged {
            self.apply_body_drag(body, &inertia, dt)?;
        }

        if let Ok(mut l) = self.ecs.get::<&mut Locator>(object) {
            if l.advances() {
                l.prepare(dt)?;
            }
        }

        for c in self.connector_refs(object) {
            let connector = self.connector(c)?;
            let Some(joint) = connector.pairing().filter(|p| p.authoritative).and_then(|p| p.joint) else {
                continue;
            };
            let engine = self.engine_mut()?;
            for (slot, motor, effort) in connector.drive() {
                engine.set_motor(joint, slot, motor)?;
                engine.set_effort(joint, slot, effort)?;
            }
        }
        Ok(())
    }

    /// Drag on a body's live world velocity, pushed as an opposing force
    /// and torque. Motion that drag would stop within `dt`, or that is
    /// already below the rest threshold, is snapped to zero instead so the
    /// step can never reverse it.
    fn apply_body_drag(&mut self, body: BodyId, inertia: &Inertia, dt: f64) -> Result<(), WorldError> {
        let rest = self.config().rest_velocity_epsilon;
        let engine = self.engine_mut()?;
        let (lin, ang) = {
            let b = engine.body(body)?;
            (b.lin_vel(), b.ang_vel())
        };
        if !inertia.drag.is_none() {
            if lin.length() < rest || inertia.drag.stops(lin, inertia.mass, dt) {
                engine.set_body_velocity(body, DVec3::ZERO)?;
            } else {
                engine.add_force(body, inertia.drag.force(lin, inertia.mass, dt))?;
            }
        }
        if !inertia.angular_drag.is_none() {
            if ang.length() < rest || inertia.angular_drag.stops(ang, inertia.moment, dt) {
                engine.set_body_ang_vel(body, DVec3::ZERO)?;
            } else {
                engine.add_torque(body, inertia.angular_drag.force(ang, inertia.moment, dt))?;
            }
        }
        Ok(())
    }

    pub fn step(&mut self) -> Result<(), WorldError> {
        let dt = self.pending_dt.take().ok_or(WorldError::NotPrepared)?;
        if let Some(engine) = self.physics.as_mut() {
            engine.step(dt);
        }

        let advancing = self.advancing();
        for &object in &advancing {
            if let Ok(mut l) = self.ecs.get::<&mut Locator>(object) {
                // Inserted after prepare: joins next tick
                if l.is_prepared() {
                    l.step()?;
                }
            }
        }
        for (_, l) in self.ecs.query_mut::<&mut Locator>() {
            if let Locator::Engine(e) = l {
                e.invalidate();
            }
        }

        let hosts: Vec<Entity> = self.ecs.query::<&Connectors>().iter().map(|(e, _)| e).collect();
        for host in hosts {
            for c in self.connector_refs(host) {
                self.refresh_sensors(c)?;
            }
        }

        for object in advancing {
            if let Ok(mut cs) = self.ecs.get::<&mut Connectors>(object) {
                for connector in cs.0.values_mut() {
                    connector.controls.step();
                }
            }
            if let Ok(mut controls) = self.ecs.get::<&mut ControlSurface>(object) {
                controls.step();
            }
        }

        self.ticks += 1;
        trace!("tick {} done (dt {})", self.ticks, dt);
        Ok(())
    }

    /// Live joint readings on the authoritative side; zero elsewhere
    fn refresh_sensors(&mut self, c: ConnectorRef) -> Result<(), WorldError> {
        let connector = self.connector(c)?;
        let readings = match (connector.pairing(), self.physics.as_ref()) {
            (Some(p), Some(engine)) if p.authoritative => p.joint.and_then(|j| engine.joint_sensors(j).ok()),
            _ => None,
        };
        if let Ok(mut cs) = self.ecs.get::<&mut Connectors>(c.object) {
            if let Some(conn) = cs.get_mut(c.id) {
                conn.read_sensors(readings);
            }
        }
        Ok(())
    }

    /// `prepare` followed by `step`
    pub fn tick(&mut self, dt: f64) -> Result<(), WorldError> {
        self.prepare(dt)?;
        self.step()
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Align, ObjectDesc};
    use super::*;
    use crate::config::WorldConfig;
    use crate::connector::{hinge, Connector, JointType};
    use crate::controls::ControlMode;
    use crate::locator::{Drag, InertialLocator, MovingLocator};
    use crate::math::Pose;
    use glam::DMat3;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_step_requires_prepare() {
        let mut w = World::new(WorldConfig::default());
        assert_eq!(w.step(), Err(WorldError::NotPrepared));
        w.prepare(0.1).unwrap();
        w.step().unwrap();
        assert_eq!(w.step(), Err(WorldError::NotPrepared));
        assert_eq!(w.ticks(), 1);
    }

    #[test]
    fn test_last_prepare_wins() {
        let mut w = World::new(WorldConfig::default());
        let root = w.root();
        let cart = w
            .spawn_in(
                root,
                ObjectDesc::named("cart").with_locator(Locator::Moving(
                    MovingLocator::new(Pose::IDENTITY).with_velocity(DVec3::X),
                )),
            )
            .unwrap();
        w.prepare(1.0).unwrap();
        w.prepare(0.25).unwrap();
        w.step().unwrap();
        assert!((w.relative_pose(cart).unwrap().loc.x - 0.25).abs() < 1.0e-12);
    }

    #[test]
    fn test_repeated_prepare_is_idempotent() {
        let run = |prepares: usize| {
            let mut w = World::new(WorldConfig::default());
            let root = w.root();
            let rock = w
                .spawn_in(
                    root,
                    ObjectDesc::named("rock").with_locator(Locator::Inertial(
                        InertialLocator::new(Pose::IDENTITY, Inertia::new(2.0, 1.0)).with_velocity(DVec3::Y),
                    )),
                )
                .unwrap();
            w.add_force(rock, DVec3::new(4.0, 0.0, 0.0)).unwrap();
            for _ in 0..prepares {
                w.prepare(0.5).unwrap();
            }
            w.step().unwrap();
            (w.relative_pose(rock).unwrap(), w.velocity(rock).unwrap())
        };
        assert_eq!(run(1), run(3));
    }

    #[test]
    fn test_paused_subspace_holds_its_children() {
        let mut w = World::new(WorldConfig::default());
        let root = w.root();
        let moving = || Locator::Moving(MovingLocator::new(Pose::IDENTITY).with_velocity(DVec3::Z));
        let frozen = w
            .spawn_in(
                root,
                ObjectDesc::named("frozen").with_subspace(Subspace::new().with_integrator(Integrator::Paused)),
            )
            .unwrap();
        let inside = w.spawn_in(frozen, ObjectDesc::named("inside").with_locator(moving())).unwrap();
        let outside = w.spawn_in(root, ObjectDesc::named("outside").with_locator(moving())).unwrap();

        w.tick(1.0).unwrap();
        assert_eq!(w.relative_pose(inside).unwrap(), Pose::IDENTITY);
        assert_eq!(w.relative_pose(outside).unwrap().loc, DVec3::Z);

        w.set_integrator(frozen, Integrator::Sequential).unwrap();
        w.tick(1.0).unwrap();
        assert_eq!(w.relative_pose(inside).unwrap().loc, DVec3::Z);
    }

    #[test]
    fn test_pulse_controls_decay_after_step() {
        let mut w = World::new(WorldConfig::default());
        let root = w.root();
        let panel = w
            .spawn_in(
                root,
                ObjectDesc::named("panel").with_controls(
                    ControlSurface::new()
                        .with_control("throttle", ControlMode::Continuous)
                        .with_control("kick", ControlMode::Pulse),
                ),
            )
            .unwrap();
        w.use_control(panel, 0, 0.7).unwrap();
        w.use_control(panel, 1, 1.0).unwrap();
        w.use_control(panel, 1, 2.0).unwrap();

        w.prepare(0.1).unwrap();
        let controls = w.controls(panel).unwrap();
        assert_eq!(controls.control(1), Some(3.0));
        w.step().unwrap();
        let controls = w.controls(panel).unwrap();
        assert_eq!(controls.control(0), Some(0.7));
        assert_eq!(controls.control(1), Some(0.0));
    }

    #[test]
    fn test_engine_drag_stops_without_reversing() {
        let mut w = World::with_physics(WorldConfig::default().with_gravity(DVec3::ZERO));
        let root = w.root();
        let puck = w
            .spawn_in(
                root,
                ObjectDesc::named("puck").with_locator(Locator::engine(
                    Pose::IDENTITY,
                    Inertia::new(1.0, 1.0).with_drag(Drag::new(10.0, 0.0)),
                )),
            )
            .unwrap();
        w.activate(puck).unwrap();
        w.set_velocity(puck, DVec3::X).unwrap();

        for _ in 0..15 {
            w.prepare(0.01).unwrap();
            // A second prepare must not drag again
            w.prepare(0.01).unwrap();
            w.step().unwrap();
            let v = w.velocity(puck).unwrap();
            assert!(v.x >= 0.0, "drag reversed motion: {:?}", v);
        }
        assert_eq!(w.velocity(puck).unwrap(), DVec3::ZERO);
        let travelled = w.relative_pose(puck).unwrap().loc.x;
        assert!(travelled > 0.04 && travelled < 0.06, "travelled {}", travelled);
    }

    #[test]
    fn test_engine_drag_is_a_force_until_step() {
        let mut w = World::with_physics(WorldConfig::default().with_gravity(DVec3::ZERO));
        let root = w.root();
        let puck = w
            .spawn_in(
                root,
                ObjectDesc::named("puck").with_locator(Locator::engine(
                    Pose::IDENTITY,
                    Inertia::new(2.0, 1.0).with_drag(Drag::new(1.0, 0.0)).with_angular_drag(Drag::new(1.0, 0.0)),
                )),
            )
            .unwrap();
        w.activate(puck).unwrap();
        w.set_velocity(puck, DVec3::X).unwrap();
        w.set_rot_rate(puck, DVec3::Z).unwrap();

        w.prepare(0.1).unwrap();
        assert_eq!(w.velocity(puck).unwrap(), DVec3::X);
        assert_eq!(w.rot_rate(puck).unwrap(), DVec3::Z);

        w.step().unwrap();
        // F = 1 against m = 2 for 0.1 s; torque 1 against moment 1
        assert!((w.velocity(puck).unwrap().x - 0.95).abs() < 1.0e-12);
        assert!((w.rot_rate(puck).unwrap().z - 0.9).abs() < 1.0e-12);
    }

    #[test]
    fn test_hinge_rests_on_its_stop() {
        let mut w = World::with_physics(WorldConfig::default().with_gravity(DVec3::ZERO));
        let root = w.root();
        let hinge_type = JointType::Hinge { axis: DVec3::Z, stops: Some((-FRAC_PI_2, 0.0)) };
        let base = w
            .spawn_in(
                root,
                ObjectDesc::named("base")
                    .with_locator(Locator::fixed(Pose::IDENTITY))
                    .with_connector(0, Connector::new(Pose::from_loc(DVec3::new(0.5, 0.0, 0.0)), hinge_type).with_max_force(100.0)),
            )
            .unwrap();
        let arm = w
            .spawn_in(
                root,
                ObjectDesc::named("arm")
                    .with_locator(Locator::engine(Pose::from_loc(DVec3::new(3.0, 0.0, 0.0)), Inertia::new(1.0, 0.1)))
                    .with_connector(
                        0,
                        Connector::new(Pose::new(DVec3::new(-0.5, 0.0, 0.0), DMat3::from_rotation_z(PI)), hinge_type),
                    ),
            )
            .unwrap();
        w.activate(arm).unwrap();
        let motor = ConnectorRef::new(base, 0);
        w.connect(motor, ConnectorRef::new(arm, 0), Align::Auto).unwrap();
        w.use_connector_control(motor, hinge::FORCE_FACTOR, 1.0).unwrap();

        w.use_connector_control(motor, hinge::VELOCITY, -1.0).unwrap();
        for _ in 0..50 {
            w.tick(0.01).unwrap();
        }
        assert!(w.connector_sensor(motor, hinge::ANGLE).unwrap() < -0.3);

        w.use_connector_control(motor, hinge::VELOCITY, 1.0).unwrap();
        let mut highest = f64::MIN;
        for _ in 0..100 {
            w.tick(0.01).unwrap();
            highest = highest.max(w.connector_sensor(motor, hinge::ANGLE).unwrap());
        }
        assert!(highest <= 1.0e-9, "stop exceeded: {}", highest);
        assert!(w.connector_sensor(motor, hinge::ANGLE).unwrap().abs() < 1.0e-3);
        // The subordinate side reports nothing
        assert_eq!(w.connector_sensor(ConnectorRef::new(arm, 0), hinge::ANGLE), Ok(0.0));
    }
}
