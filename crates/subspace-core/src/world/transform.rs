//! Frame conversions through the container chain, and pose/motion access
//! that hides whether a locator is self-contained or engine-backed.
//!
//! An object's frame is its container's frame moved by its locator. Objects
//! without a locator sit at their container's origin.

use glam::DVec3;
use hecs::Entity;

use super::World;
use crate::error::WorldError;
use crate::locator::{EngineState, Locator};
use crate::math::Pose;
use crate::physics::BodyId;

impl World {
    /// Body backing the object's own locator, if it is engine-active
    pub fn body_of(&self, object: Entity) -> Option<BodyId> {
        self.ecs
            .get::<&Locator>(object)
            .ok()
            .and_then(|l| l.engine_state().and_then(|e| e.body()))
    }

    fn body_pose(&self, body: BodyId) -> Result<Pose, WorldError> {
        let engine = self.physics.as_ref().ok_or(WorldError::NoPhysics)?;
        Ok(engine.body(body)?.pose())
    }

    /// Absolute pose of the object's frame
    pub fn absolute_pose(&self, object: Entity) -> Result<Pose, WorldError> {
        if object == self.root {
            return Ok(Pose::IDENTITY);
        }
        if let Some(body) = self.body_of(object) {
            return self.body_pose(body);
        }
        let parent = self.node(object)?.parent.ok_or(WorldError::Detached(object))?;
        let rel = self.relative_pose(object)?;
        Ok(self.absolute_pose(parent)?.apply(&rel))
    }

    /// Current relative pose, computed from the body when the cache is dirty
    pub fn relative_pose(&self, object: Entity) -> Result<Pose, WorldError> {
        let stored = match self.ecs.get::<&Locator>(object) {
            Ok(l) => l.stored_pose(),
            Err(_) => {
                self.node(object)?;
                return Ok(Pose::IDENTITY);
            }
        };
        if let Some(pose) = stored {
            return Ok(pose);
        }
        let body = self.body_of(object).ok_or(WorldError::NoLocator(object))?;
        let parent = self.node(object)?.parent.ok_or(WorldError::Detached(object))?;
        Ok(self.absolute_pose(parent)?.localize(&self.body_pose(body)?))
    }

    /// Relative pose, filling the engine locator's cache on the way
    pub fn pose(&mut self, object: Entity) -> Result<Pose, WorldError> {
        let pose = self.relative_pose(object)?;
        if let Ok(mut l) = self.ecs.get::<&mut Locator>(object) {
            if let Locator::Engine(e) = &mut *l {
                e.fill_cache(pose);
            }
        }
        Ok(pose)
    }

    /// Recompute every dirty engine-locator cache
    pub fn refresh_pose_cache(&mut self) -> Result<(), WorldError> {
        let dirty: Vec<Entity> = self
            .ecs
            .query::<&Locator>()
            .iter()
            .filter(|(_, l)| l.is_active() && l.stored_pose().is_none())
            .map(|(e, _)| e)
            .collect();
        for object in dirty {
            self.pose(object)?;
        }
        Ok(())
    }

    /// `pose` given in `object`'s frame, expressed absolutely
    pub fn to_absolute(&self, object: Entity, pose: &Pose) -> Result<Pose, WorldError> {
        Ok(self.absolute_pose(object)?.apply(pose))
    }

    /// Inverse of [`World::to_absolute`]
    pub fn to_relative(&self, object: Entity, absolute: &Pose) -> Result<Pose, WorldError> {
        Ok(self.absolute_pose(object)?.localize(absolute))
    }

    /// `pose` given in `object`'s frame, expressed in `ancestor`'s frame.
    /// The ancestor's own locator is not applied.
    pub fn to_ancestor(&self, object: Entity, ancestor: Entity, pose: &Pose) -> Result<Pose, WorldError> {
        if !self.is_ancestor(ancestor, object)? {
            return Err(WorldError::NotAncestor { object, ancestor });
        }
        let direct = |e: Entity| e == self.root || self.body_of(e).is_some();
        if direct(object) && direct(ancestor) {
            let abs = self.absolute_pose(object)?.apply(pose);
            return Ok(self.absolute_pose(ancestor)?.localize(&abs));
        }

        let mut current = object;
        let mut result = *pose;
        while current != ancestor {
            result = self.relative_pose(current)?.apply(&result);
            current = self.node(current)?.parent.ok_or(WorldError::Detached(current))?;
        }
        Ok(result)
    }

    /// `pose` given in `from`'s frame, expressed in `to`'s frame
    pub fn to_sibling(&self, from: Entity, to: Entity, pose: &Pose) -> Result<Pose, WorldError> {
        let abs = self.to_absolute(from, pose)?;
        self.to_relative(to, &abs)
    }

    /// Set the relative pose; engine-active locators write through to the body
    pub fn set_pose(&mut self, object: Entity, pose: Pose) -> Result<(), WorldError> {
        if self.ecs.get::<&Locator>(object).is_err() {
            self.node(object)?;
            return Err(WorldError::NoLocator(object));
        }
        match self.body_of(object) {
            Some(body) => {
                let parent = self.node(object)?.parent.ok_or(WorldError::Detached(object))?;
                let abs = self.absolute_pose(parent)?.apply(&pose);
                self.engine_mut()?.set_body_pose(body, abs)?;
                self.invalidate_subtree(object);
            }
            None => {
                if let Ok(mut l) = self.ecs.get::<&mut Locator>(object) {
                    l.store_pose(pose);
                }
                self.invalidate_subtree(object);
            }
        }
        Ok(())
    }

    /// Place the object so its frame lands on `absolute`
    pub fn set_absolute_pose(&mut self, object: Entity, absolute: Pose) -> Result<(), WorldError> {
        let parent = self.node(object)?.parent.ok_or(WorldError::Detached(object))?;
        let rel = self.absolute_pose(parent)?.localize(&absolute);
        self.set_pose(object, rel)
    }

    /// Active descendants cache poses relative to a frame that just moved
    pub(crate) fn invalidate_subtree(&mut self, object: Entity) {
        for e in self.subtree(object) {
            if let Ok(mut l) = self.ecs.get::<&mut Locator>(e) {
                if let Locator::Engine(engine) = &mut *l {
                    engine.invalidate();
                }
            }
        }
    }

    /// Basis of the container, used to turn relative vectors absolute
    fn container_basis(&self, object: Entity) -> Result<glam::DMat3, WorldError> {
        let parent = self.node(object)?.parent.ok_or(WorldError::Detached(object))?;
        Ok(self.absolute_pose(parent)?.basis)
    }

    /// Velocity relative to the container frame
    pub fn velocity(&self, object: Entity) -> Result<DVec3, WorldError> {
        match self.body_of(object) {
            Some(body) => {
                let engine = self.physics.as_ref().ok_or(WorldError::NoPhysics)?;
                let v = engine.body(body)?.lin_vel();
                Ok(self.container_basis(object)?.transpose() * v)
            }
            None => Ok(self.with_locator(object, |l| l.velocity())??),
        }
    }

    pub fn rot_rate(&self, object: Entity) -> Result<DVec3, WorldError> {
        match self.body_of(object) {
            Some(body) => {
                let engine = self.physics.as_ref().ok_or(WorldError::NoPhysics)?;
                let w = engine.body(body)?.ang_vel();
                Ok(self.container_basis(object)?.transpose() * w)
            }
            None => Ok(self.with_locator(object, |l| l.rot_rate())??),
        }
    }

    pub fn set_velocity(&mut self, object: Entity, velocity: DVec3) -> Result<(), WorldError> {
        match self.body_of(object) {
            Some(body) => {
                let v = self.container_basis(object)? * velocity;
                self.engine_mut()?.set_body_velocity(body, v)?;
                self.invalidate_subtree(object);
                Ok(())
            }
            None => Ok(self.with_locator_mut(object, |l| l.set_velocity(velocity))??),
        }
    }

    pub fn set_rot_rate(&mut self, object: Entity, rot_rate: DVec3) -> Result<(), WorldError> {
        match self.body_of(object) {
            Some(body) => {
                let w = self.container_basis(object)? * rot_rate;
                self.engine_mut()?.set_body_ang_vel(body, w)?;
                self.invalidate_subtree(object);
                Ok(())
            }
            None => Ok(self.with_locator_mut(object, |l| l.set_rot_rate(rot_rate))??),
        }
    }

    /// Force in the container frame, through the center of mass
    pub fn add_force(&mut self, object: Entity, force: DVec3) -> Result<(), WorldError> {
        match self.body_of(object) {
            Some(body) => {
                let f = self.container_basis(object)? * force;
                Ok(self.engine_mut()?.add_force(body, f)?)
            }
            None => Ok(self.with_locator_mut(object, |l| l.add_force(force))??),
        }
    }

    pub fn add_torque(&mut self, object: Entity, torque: DVec3) -> Result<(), WorldError> {
        match self.body_of(object) {
            Some(body) => {
                let t = self.container_basis(object)? * torque;
                Ok(self.engine_mut()?.add_torque(body, t)?)
            }
            None => Ok(self.with_locator_mut(object, |l| l.add_torque(torque))??),
        }
    }

    fn with_locator<R>(&self, object: Entity, f: impl FnOnce(&Locator) -> R) -> Result<R, WorldError> {
        let l = self.ecs.get::<&Locator>(object).map_err(|_| WorldError::NoLocator(object))?;
        Ok(f(&l))
    }

    fn with_locator_mut<R>(&mut self, object: Entity, f: impl FnOnce(&mut Locator) -> R) -> Result<R, WorldError> {
        let mut l = self.ecs.get::<&mut Locator>(object).map_err(|_| WorldError::NoLocator(object))?;
        Ok(f(&mut l))
    }

    /// Engine state snapshot, for callers that only need to inspect it
    pub fn engine_state(&self, object: Entity) -> Option<EngineState> {
        self.ecs
            .get::<&Locator>(object)
            .ok()
            .and_then(|l| l.engine_state().map(|e| e.state))
    }
}
