//! What a renderer needs from the world, and nothing about how it draws.
//!
//! [`World::draw_list`] flattens the tree into draw items in insertion
//! order. Each item carries the environment composed from every enclosing
//! subspace: outer lights first, inner toggles overriding outer ones.
//!
//! [`ViewRegistry`] is the one piece of cross-thread state: which view a
//! rendering thread is currently drawing. It must be initialised before use
//! and torn down explicitly; every read and write takes the same lock.

use std::collections::HashMap;
use std::fmt;
use std::thread::{self, ThreadId};

use glam::DMat4;
use hecs::Entity;
use parking_lot::{const_mutex, Mutex};

use crate::components::{Environment, Subspace, Visual};
use crate::error::WorldError;
use crate::world::World;

/// One object to draw
#[derive(Debug, Clone, PartialEq)]
pub struct DrawItem {
    pub object: Entity,
    pub visual: Visual,
    /// Absolute object-to-world transform
    pub transform: DMat4,
    pub environment: Environment,
}

impl World {
    /// Every attached object with a visual, in depth-first insertion order
    pub fn draw_list(&self) -> Result<Vec<DrawItem>, WorldError> {
        let mut items = Vec::new();
        let root_env = self.environment(self.root()).unwrap_or_default();
        let mut stack: Vec<(Entity, Environment)> = Vec::new();
        for child in self.children(self.root())?.into_iter().rev() {
            stack.push((child, root_env.clone()));
        }

        while let Some((object, env)) = stack.pop() {
            if let Some(visual) = self.visual(object) {
                items.push(DrawItem {
                    object,
                    visual,
                    transform: self.draw_transform(object)?,
                    environment: env.clone(),
                });
            }
            if let Ok(sub) = self.ecs.get::<&Subspace>(object) {
                let inner = env.compose(&sub.environment);
                for &child in sub.children.iter().rev() {
                    stack.push((child, inner.clone()));
                }
            }
        }
        Ok(items)
    }

    /// Absolute transform of the object's frame as a 4x4 matrix
    pub fn draw_transform(&self, object: Entity) -> Result<DMat4, WorldError> {
        Ok(self.absolute_pose(object)?.to_mat4())
    }

    /// Environment seen by the object: every enclosing subspace composed
    /// from the root inward
    pub fn composed_environment(&self, object: Entity) -> Result<Environment, WorldError> {
        let mut chain = Vec::new();
        let mut current = self.parent(object)?;
        while let Some(c) = current {
            chain.push(c);
            current = self.parent(c)?;
        }
        Ok(chain
            .iter()
            .rev()
            .filter_map(|&s| self.environment(s))
            .fold(Environment::default(), |outer, inner| outer.compose(&inner)))
    }
}

/// Opaque handle of a renderer's view
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ViewId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewError {
    /// `ViewRegistry::init` has not been called, or teardown already ran
    NotInitialized,
}

impl fmt::Display for ViewError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewError::NotInitialized => write!(f, "view registry is not initialized"),
        }
    }
}

impl std::error::Error for ViewError {}

static VIEWS: Mutex<Option<HashMap<ThreadId, ViewId>>> = const_mutex(None);

/// Process-wide thread to current-view table
pub struct ViewRegistry;

impl ViewRegistry {
    /// Create the table; a second call keeps existing entries
    pub fn init() {
        VIEWS.lock().get_or_insert_with(HashMap::new);
    }

    /// Drop the table and every entry in it
    pub fn teardown() {
        *VIEWS.lock() = None;
    }

    pub fn is_initialized() -> bool {
        VIEWS.lock().is_some()
    }

    /// Mark `view` as the one this thread is drawing; returns the previous one
    pub fn set_current(view: ViewId) -> Result<Option<ViewId>, ViewError> {
        let mut guard = VIEWS.lock();
        let table = guard.as_mut().ok_or(ViewError::NotInitialized)?;
        Ok(table.insert(thread::current().id(), view))
    }

    pub fn current() -> Option<ViewId> {
        VIEWS
            .lock()
            .as_ref()
            .and_then(|table| table.get(&thread::current().id()).copied())
    }

    pub fn clear_current() -> Option<ViewId> {
        VIEWS
            .lock()
            .as_mut()
            .and_then(|table| table.remove(&thread::current().id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Light, LightKind, Shape};
    use crate::config::WorldConfig;
    use crate::math::Pose;
    use crate::world::ObjectDesc;
    use glam::DVec3;

    fn lamp(color: [f32; 3]) -> Light {
        Light {
            kind: LightKind::Point { position: DVec3::Z },
            color,
            intensity: 1.0,
        }
    }

    #[test]
    fn test_draw_list_order_and_environment() {
        let mut w = World::new(WorldConfig::default());
        w.set_root_environment(Environment::default().with_light(lamp([1.0, 1.0, 1.0])).with_toggle("fog", true));
        let root = w.root();
        let shape = Visual::new(Shape::sphere(1.0));

        let first = w.spawn_in(root, ObjectDesc::named("first").with_visual(shape.clone())).unwrap();
        let room = w
            .spawn_in(
                root,
                ObjectDesc::named("room")
                    .with_locator(Pose::from_loc(DVec3::new(0.0, 5.0, 0.0)))
                    .with_subspace(
                        Subspace::new().with_environment(Environment::default().with_light(lamp([1.0, 0.0, 0.0])).with_toggle("fog", false)),
                    ),
            )
            .unwrap();
        let chair = w
            .spawn_in(room, ObjectDesc::named("chair").with_locator(Pose::from_loc(DVec3::X)).with_visual(shape.clone()))
            .unwrap();
        let last = w.spawn_in(root, ObjectDesc::named("last").with_visual(shape)).unwrap();

        let items = w.draw_list().unwrap();
        let order: Vec<Entity> = items.iter().map(|i| i.object).collect();
        assert_eq!(order, vec![first, chair, last]);

        let inside = &items[1];
        assert_eq!(inside.environment.lights.len(), 2);
        assert_eq!(inside.environment.lights[1].color, [1.0, 0.0, 0.0]);
        assert_eq!(inside.environment.toggles.get("fog"), Some(&false));
        assert_eq!(items[2].environment.toggles.get("fog"), Some(&true));
        assert_eq!(inside.transform.w_axis.truncate(), DVec3::new(1.0, 5.0, 0.0));
        assert_eq!(w.composed_environment(chair).unwrap(), inside.environment);
    }

    // The registry is process-wide; this is the only test that touches it
    #[test]
    fn test_view_registry_is_per_thread() {
        ViewRegistry::init();
        assert_eq!(ViewRegistry::set_current(ViewId(1)), Ok(None));
        assert_eq!(ViewRegistry::set_current(ViewId(2)), Ok(Some(ViewId(1))));
        assert_eq!(ViewRegistry::current(), Some(ViewId(2)));

        let other = std::thread::spawn(|| {
            let before = ViewRegistry::current();
            ViewRegistry::set_current(ViewId(9)).map(|_| before)
        })
        .join()
        .unwrap();
        assert_eq!(other, Ok(None));
        assert_eq!(ViewRegistry::current(), Some(ViewId(2)));

        assert_eq!(ViewRegistry::clear_current(), Some(ViewId(2)));
        ViewRegistry::teardown();
        assert!(!ViewRegistry::is_initialized());
        assert_eq!(ViewRegistry::set_current(ViewId(3)), Err(ViewError::NotInitialized));
    }
}
