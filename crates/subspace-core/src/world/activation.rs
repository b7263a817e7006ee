//! Binding engine locators to physics bodies.
//!
//! Activating an object creates one body per inactive engine locator in its
//! subtree (depth-first, insertion order) from the current absolute pose.
//! Each activated object adds one lock to itself and every container up to
//! the root. Deactivation snapshots relative poses first, then drops the
//! bodies, pairings and contacts, then unlocks.

use hecs::Entity;
use log::debug;

use super::World;
use crate::error::WorldError;
use crate::locator::Locator;
use crate::math::Pose;
use crate::physics::{BodyDesc, BodyId};

impl World {
    fn adjust_locks(&mut self, object: Entity, delta: i32) -> Result<(), WorldError> {
        let mut current = Some(object);
        while let Some(c) = current {
            let mut node = self.ecs.get::<&mut crate::components::Node>(c).map_err(|_| WorldError::NoSuchObject(c))?;
            node.locks = if delta >= 0 {
                node.locks + delta as u32
            } else {
                node.locks.saturating_sub(delta.unsigned_abs())
            };
            current = node.parent;
        }
        Ok(())
    }

    /// Bind every inactive engine locator in the subtree to a new body.
    /// Returns how many objects were activated.
    pub fn activate(&mut self, object: Entity) -> Result<usize, WorldError> {
        if self.physics.is_none() {
            return Err(WorldError::NoPhysics);
        }
        if !self.is_attached(object)? {
            return Err(WorldError::Detached(object));
        }

        let mut activated = 0;
        for e in self.subtree(object) {
            if self.bind_body(e)? {
                activated += 1;
            }
        }

        if activated > 0 && self.collisions.is_some() {
            for e in self.subtree(object) {
                self.refresh_geom_binding(e)?;
            }
        }
        Ok(activated)
    }

    /// Give one inactive engine locator a body at its current absolute
    /// pose. Returns false if the object has nothing to bind.
    pub(crate) fn bind_body(&mut self, e: Entity) -> Result<bool, WorldError> {
        let inertia = match self.ecs.get::<&Locator>(e) {
            Ok(l) => match &*l {
                Locator::Engine(engine) if !engine.is_active() => engine.inertia,
                _ => return Ok(false),
            },
            Err(_) => return Ok(false),
        };
        let absolute = self.absolute_pose(e)?;
        let relative = self.relative_pose(e)?;
        let body = self
            .engine_mut()?
            .create_body(BodyDesc::new(absolute, inertia.mass, inertia.moment));
        if let Ok(mut l) = self.ecs.get::<&mut Locator>(e) {
            if let Locator::Engine(engine) = &mut *l {
                engine.bind(body, relative);
            }
        }
        self.adjust_locks(e, 1)?;
        debug!("activated {:?} as {}", e, body);
        Ok(true)
    }

    /// Return every active engine locator in the subtree to a plain
    /// relative pose. Returns how many objects were deactivated.
    pub fn deactivate(&mut self, object: Entity) -> Result<usize, WorldError> {
        let mut bound: Vec<(Entity, BodyId, Pose)> = Vec::new();
        for e in self.subtree(object) {
            if let Some(body) = self.body_of(e) {
                bound.push((e, body, self.relative_pose(e)?));
            }
        }
        if bound.is_empty() {
            return Ok(0);
        }

        for &(e, _, _) in &bound {
            self.drop_pairings(e)?;
            self.retire_contacts(e)?;
        }
        for &(e, body, relative) in &bound {
            if let Ok(mut l) = self.ecs.get::<&mut Locator>(e) {
                if let Locator::Engine(engine) = &mut *l {
                    engine.unbind(relative);
                }
            }
            self.engine_mut()?.destroy_body(body)?;
            self.adjust_locks(e, -1)?;
            debug!("deactivated {:?}", e);
        }

        if self.collisions.is_some() {
            for e in self.subtree(object) {
                self.refresh_geom_binding(e)?;
            }
        }
        Ok(bound.len())
    }
}
