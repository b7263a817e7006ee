//! Engine-backed locator state.
//!
//! While inactive the locator is a plain relative pose. While active the
//! truth lives in a physics body in absolute coordinates and the relative
//! pose is a cache that the world fills on demand; `cache == None` means
//! dirty. The world owns all transitions because they need the tree.

use super::inertial::Inertia;
use crate::math::Pose;
use crate::physics::BodyId;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineState {
    Inactive { pose: Pose },
    Active { body: BodyId, cache: Option<Pose> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineLocator {
    pub(crate) state: EngineState,
    pub(crate) inertia: Inertia,
    pub(crate) prepared: bool,
}

impl EngineLocator {
    pub fn new(pose: Pose, inertia: Inertia) -> Self {
        Self {
            state: EngineState::Inactive { pose },
            inertia,
            prepared: false,
        }
    }

    pub fn inertia(&self) -> &Inertia {
        &self.inertia
    }

    pub fn body(&self) -> Option<BodyId> {
        match self.state {
            EngineState::Active { body, .. } => Some(body),
            EngineState::Inactive { .. } => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.body().is_some()
    }

    /// Relative pose if it is known without consulting the engine
    pub fn stored_pose(&self) -> Option<Pose> {
        match self.state {
            EngineState::Inactive { pose } => Some(pose),
            EngineState::Active { cache, .. } => cache,
        }
    }

    pub(crate) fn invalidate(&mut self) {
        if let EngineState::Active { cache, .. } = &mut self.state {
            *cache = None;
        }
    }

    pub(crate) fn fill_cache(&mut self, pose: Pose) {
        if let EngineState::Active { cache, .. } = &mut self.state {
            *cache = Some(pose);
        }
    }

    pub(crate) fn bind(&mut self, body: BodyId, relative: Pose) {
        self.state = EngineState::Active {
            body,
            cache: Some(relative),
        };
    }

    pub(crate) fn unbind(&mut self, relative: Pose) {
        self.state = EngineState::Inactive { pose: relative };
        self.prepared = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    #[test]
    fn test_cache_lifecycle() {
        let mut l = EngineLocator::new(Pose::from_loc(DVec3::X), Inertia::default());
        assert_eq!(l.stored_pose(), Some(Pose::from_loc(DVec3::X)));
        assert!(!l.is_active());

        l.bind(BodyId(3), Pose::from_loc(DVec3::X));
        assert_eq!(l.body(), Some(BodyId(3)));
        assert!(l.stored_pose().is_some());

        l.invalidate();
        assert_eq!(l.stored_pose(), None);

        l.fill_cache(Pose::from_loc(DVec3::Y));
        assert_eq!(l.stored_pose(), Some(Pose::from_loc(DVec3::Y)));

        l.unbind(Pose::from_loc(DVec3::Z));
        assert_eq!(l.stored_pose(), Some(Pose::from_loc(DVec3::Z)));
        assert_eq!(l.body(), None);
    }
}
