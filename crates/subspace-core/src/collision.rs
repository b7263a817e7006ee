//! Collision-geometry synchronizer.
//!
//! [`World::enable_collisions`] mirrors the tree into the engine once: one
//! collision space per subspace (nested like the tree) and one geom per
//! object with [`Geometry`]. Later tree edits keep the mirror current.
//!
//! Every tick the contact pass re-places static geoms, asks the engine for
//! overlapping pairs, turns the narrow-phase points into one-step contact
//! joints and records them per object pair. Records not refreshed during a
//! pass are swept and their joints destroyed.

use std::collections::HashMap;

use hecs::Entity;
use log::{debug, trace, warn};

use crate::components::Geometry;
use crate::error::WorldError;
use crate::physics::{GeomId, JointId, SpaceId};
use crate::world::World;

/// What one contact pass did to the contact table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContactPassReport {
    pub created: usize,
    pub refreshed: usize,
    pub retired: usize,
}

#[derive(Debug)]
struct ContactRecord {
    joints: Vec<JointId>,
    seen: bool,
}

/// Contact joints per touching object pair, with a last-seen flag
#[derive(Debug, Default)]
pub struct ContactTable {
    records: HashMap<(Entity, Entity), ContactRecord>,
}

fn pair_key(a: Entity, b: Entity) -> (Entity, Entity) {
    if a.to_bits() <= b.to_bits() {
        (a, b)
    } else {
        (b, a)
    }
}

impl ContactTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, a: Entity, b: Entity) -> bool {
        self.records.contains_key(&pair_key(a, b))
    }

    pub fn joints(&self, a: Entity, b: Entity) -> &[JointId] {
        self.records
            .get(&pair_key(a, b))
            .map(|r| r.joints.as_slice())
            .unwrap_or(&[])
    }

    /// Clear every last-seen flag
    pub fn begin_pass(&mut self) {
        for record in self.records.values_mut() {
            record.seen = false;
        }
    }

    /// Record this pass's joints for a pair. Returns whether the record is
    /// new, and the joints it replaced.
    pub fn touch(&mut self, a: Entity, b: Entity, joints: Vec<JointId>) -> (bool, Vec<JointId>) {
        match self.records.get_mut(&pair_key(a, b)) {
            Some(record) => {
                record.seen = true;
                (false, std::mem::replace(&mut record.joints, joints))
            }
            None => {
                self.records.insert(pair_key(a, b), ContactRecord { joints, seen: true });
                (true, Vec::new())
            }
        }
    }

    /// Drop every record not touched since `begin_pass`
    pub fn sweep(&mut self) -> Vec<Vec<JointId>> {
        let stale: Vec<(Entity, Entity)> = self
            .records
            .iter()
            .filter(|(_, r)| !r.seen)
            .map(|(k, _)| *k)
            .collect();
        stale
            .into_iter()
            .filter_map(|k| self.records.remove(&k))
            .map(|r| r.joints)
            .collect()
    }

    /// Drop every record involving `object`
    pub fn forget(&mut self, object: Entity) -> Vec<JointId> {
        let keys: Vec<(Entity, Entity)> = self
            .records
            .keys()
            .filter(|(a, b)| *a == object || *b == object)
            .copied()
            .collect();
        keys.into_iter()
            .filter_map(|k| self.records.remove(&k))
            .flat_map(|r| r.joints)
            .collect()
    }
}

/// Mapping between tree objects and engine collision entities
#[derive(Debug)]
pub struct CollisionSync {
    spaces: HashMap<Entity, SpaceId>,
    geoms: HashMap<Entity, GeomId>,
    owners: HashMap<GeomId, Entity>,
    table: ContactTable,
}

impl CollisionSync {
    fn new(root: Entity, root_space: SpaceId) -> Self {
        let mut spaces = HashMap::new();
        spaces.insert(root, root_space);
        Self {
            spaces,
            geoms: HashMap::new(),
            owners: HashMap::new(),
            table: ContactTable::default(),
        }
    }

    pub fn space_of(&self, subspace: Entity) -> Option<SpaceId> {
        self.spaces.get(&subspace).copied()
    }

    pub fn geom_of(&self, object: Entity) -> Option<GeomId> {
        self.geoms.get(&object).copied()
    }

    pub fn owner(&self, geom: GeomId) -> Option<Entity> {
        self.owners.get(&geom).copied()
    }

    pub fn contacts(&self) -> &ContactTable {
        &self.table
    }
}

impl World {
    /// Mirror the whole tree into collision spaces and geoms. Calling it
    /// again is a no-op.
    pub fn enable_collisions(&mut self) -> Result<(), WorldError> {
        if self.collisions.is_some() {
            return Ok(());
        }
        let root = self.root();
        let root_space = self.engine_mut()?.create_space(None)?;
        self.collisions = Some(CollisionSync::new(root, root_space));
        self.mirror_subtree(root)?;
        debug!("collisions enabled");
        Ok(())
    }

    pub fn collision_sync(&self) -> Option<&CollisionSync> {
        self.collisions.as_ref()
    }

    /// Enable or disable collisions for everything inside a subspace
    pub fn set_collisions_enabled(&mut self, subspace: Entity, enabled: bool) -> Result<(), WorldError> {
        let sync = self.collisions.as_ref().ok_or(WorldError::NoCollisions)?;
        let space = sync.space_of(subspace).ok_or(WorldError::NotASubspace(subspace))?;
        self.engine_mut()?.set_space_enabled(space, enabled)?;
        Ok(())
    }

    fn sync_mut(&mut self) -> Result<&mut CollisionSync, WorldError> {
        self.collisions.as_mut().ok_or(WorldError::NoCollisions)
    }

    /// Create spaces and geoms for an attached subtree
    pub(crate) fn mirror_subtree(&mut self, object: Entity) -> Result<(), WorldError> {
        for e in self.subtree(object) {
            if self.is_subspace(e) && self.sync_mut()?.space_of(e).is_none() {
                let parent = self.parent(e)?.ok_or(WorldError::Detached(e))?;
                let outer = self.sync_mut()?.space_of(parent).ok_or(WorldError::Detached(e))?;
                let space = self.engine_mut()?.create_space(Some(outer))?;
                self.sync_mut()?.spaces.insert(e, space);
            }
            self.mirror_geom(e)?;
        }
        Ok(())
    }

    /// Drop the spaces, geoms and contacts of a subtree leaving the tree
    pub(crate) fn unmirror_subtree(&mut self, object: Entity) -> Result<(), WorldError> {
        let subtree = self.subtree(object);
        for &e in &subtree {
            self.drop_geom(e)?;
            self.retire_contacts(e)?;
        }
        for &e in &subtree {
            if let Some(space) = self.sync_mut()?.spaces.remove(&e) {
                // Nested spaces went with their outer space
                let _ = self.engine_mut()?.destroy_space(space);
            }
        }
        Ok(())
    }

    /// Create the geom for one object if it has geometry and none yet
    pub(crate) fn mirror_geom(&mut self, object: Entity) -> Result<(), WorldError> {
        let Some(geometry) = self.geometry(object) else {
            return Ok(());
        };
        let Some(container) = self.parent(object)? else {
            return Ok(());
        };
        let sync = self.sync_mut()?;
        if sync.geoms.contains_key(&object) {
            return Ok(());
        }
        let Some(space) = sync.space_of(container) else {
            return Ok(());
        };

        let body = self.body_of(object);
        let placement = match body {
            Some(_) => geometry.offset,
            None => self.absolute_pose(object)?.apply(&geometry.offset),
        };
        let geom = self.engine_mut()?.create_geom(space, geometry.shape, body, placement)?;
        let sync = self.sync_mut()?;
        sync.geoms.insert(object, geom);
        sync.owners.insert(geom, object);
        trace!("mirrored {:?} as {}", object, geom);
        Ok(())
    }

    pub(crate) fn drop_geom(&mut self, object: Entity) -> Result<(), WorldError> {
        let Some(sync) = self.collisions.as_mut() else {
            return Ok(());
        };
        if let Some(geom) = sync.geoms.remove(&object) {
            sync.owners.remove(&geom);
            // Already gone if its space was destroyed first
            let _ = self.engine_mut()?.destroy_geom(geom);
        }
        Ok(())
    }

    /// Re-home the object's geom after its body appeared or went away
    pub(crate) fn refresh_geom_binding(&mut self, object: Entity) -> Result<(), WorldError> {
        let Some(geom) = self.collisions.as_ref().and_then(|s| s.geom_of(object)) else {
            return Ok(());
        };
        let offset = self.geometry(object).map(|g| g.offset).unwrap_or_default();
        let body = self.body_of(object);
        let placement = match body {
            Some(_) => offset,
            None => self.absolute_pose(object)?.apply(&offset),
        };
        self.engine_mut()?.attach_geom(geom, body, placement)?;
        Ok(())
    }

    /// Destroy every contact the object takes part in
    pub(crate) fn retire_contacts(&mut self, object: Entity) -> Result<(), WorldError> {
        let Some(sync) = self.collisions.as_mut() else {
            return Ok(());
        };
        let joints = sync.table.forget(object);
        if let Some(engine) = self.physics.as_mut() {
            for joint in joints {
                // Destroying a body already removed its contacts
                let _ = engine.destroy_joint(joint);
            }
        }
        Ok(())
    }

    /// One contact pass: place, detect, create or refresh, sweep
    pub(crate) fn collision_pass(&mut self) -> Result<ContactPassReport, WorldError> {
        let max = self.config().max_contacts_per_pair;
        let mut report = ContactPassReport::default();

        let placed: Vec<(Entity, GeomId)> = self.sync_mut()?.geoms.iter().map(|(e, g)| (*e, *g)).collect();
        for (object, geom) in placed {
            if self.body_of(object).is_none() {
                let offset = self.geometry(object).map(|g| g.offset).unwrap_or_default();
                let pose = self.absolute_pose(object)?.apply(&offset);
                self.engine_mut()?.attach_geom(geom, None, pose)?;
            }
        }

        self.sync_mut()?.table.begin_pass();
        let pairs = self.engine_mut()?.candidate_pairs();
        for (ga, gb) in pairs {
            let sync = self.sync_mut()?;
            let (Some(ea), Some(eb)) = (sync.owner(ga), sync.owner(gb)) else {
                continue;
            };
            if self.collision_suppressed(ea, eb) || self.collision_suppressed(eb, ea) {
                continue;
            }

            let engine = self.physics.as_ref().ok_or(WorldError::NoPhysics)?;
            let mut points = engine.collide_geoms(ga, gb, max + 1)?;
            if points.is_empty() {
                continue;
            }
            if points.len() > max {
                warn!("contact buffer overflow between {:?} and {:?}; keeping {}", ea, eb, max);
                points.truncate(max);
            }
            let (body_a, body_b) = (engine.geom(ga)?.body(), engine.geom(gb)?.body());

            let material = |e: Entity| self.geometry(e).map(|g: Geometry| g.material).unwrap_or_default();
            let surface = material(ea).combine(&material(eb));

            let engine = self.engine_mut()?;
            let mut joints = Vec::with_capacity(points.len());
            for point in points {
                joints.push(engine.create_contact(body_a, body_b, point, surface)?);
            }

            let (created, replaced) = self.sync_mut()?.table.touch(ea, eb, joints);
            if created {
                report.created += 1;
            } else {
                report.refreshed += 1;
            }
            let engine = self.engine_mut()?;
            for joint in replaced {
                let _ = engine.destroy_joint(joint);
            }
        }

        let stale = self.sync_mut()?.table.sweep();
        report.retired = stale.len();
        let engine = self.engine_mut()?;
        for joint in stale.into_iter().flatten() {
            let _ = engine.destroy_joint(joint);
        }
        trace!("contact pass: {:?}", report);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::{Shape, Subspace};
    use crate::config::WorldConfig;
    use crate::connector::{Connector, ConnectorRef, JointType};
    use crate::locator::{Inertia, Locator};
    use crate::math::Pose;
    use crate::world::{Align, ObjectDesc};
    use glam::DVec3;

    fn ground_and_ball(z: f64) -> (World, Entity, Entity) {
        let mut w = World::with_physics(WorldConfig::default());
        let root = w.root();
        let ground = w
            .spawn_in(root, ObjectDesc::named("ground").with_geometry(Geometry::new(Shape::ground())))
            .unwrap();
        let ball = w
            .spawn_in(
                root,
                ObjectDesc::named("ball")
                    .with_locator(Locator::engine(Pose::from_loc(DVec3::new(0.0, 0.0, z)), Inertia::default()))
                    .with_geometry(Geometry::new(Shape::sphere(0.5))),
            )
            .unwrap();
        w.enable_collisions().unwrap();
        w.activate(ball).unwrap();
        (w, ground, ball)
    }

    #[test]
    fn test_table_touch_and_sweep() {
        let mut ecs = hecs::World::new();
        let a = ecs.spawn(());
        let b = ecs.spawn(());
        let mut table = ContactTable::default();

        table.begin_pass();
        assert_eq!(table.touch(a, b, vec![JointId(1)]), (true, vec![]));
        assert!(table.sweep().is_empty());

        table.begin_pass();
        assert_eq!(table.touch(b, a, vec![JointId(2)]), (false, vec![JointId(1)]));
        assert_eq!(table.joints(a, b), &[JointId(2)]);

        table.begin_pass();
        assert_eq!(table.sweep(), vec![vec![JointId(2)]]);
        assert!(table.is_empty());
    }

    #[test]
    fn test_mirror_follows_tree() {
        let mut w = World::with_physics(WorldConfig::default());
        let root = w.root();
        let room = w.spawn_in(root, ObjectDesc::named("room").with_subspace(Subspace::new())).unwrap();
        let crate_ = w
            .spawn_in(room, ObjectDesc::named("crate").with_geometry(Geometry::new(Shape::cuboid(1.0, 1.0, 1.0))))
            .unwrap();
        w.enable_collisions().unwrap();

        let sync = w.collision_sync().unwrap();
        let inner = sync.space_of(room).unwrap();
        let geom = sync.geom_of(crate_).unwrap();
        assert_eq!(w.physics().unwrap().geom(geom).unwrap().space(), inner);
        assert_eq!(sync.owner(geom), Some(crate_));

        w.remove(room).unwrap();
        let sync = w.collision_sync().unwrap();
        assert!(sync.space_of(room).is_none());
        assert!(sync.geom_of(crate_).is_none());

        w.insert(root, room).unwrap();
        assert!(w.collision_sync().unwrap().geom_of(crate_).is_some());
    }

    #[test]
    fn test_contact_lifecycle() {
        let (mut w, ground, ball) = ground_and_ball(0.45);

        w.prepare(0.01).unwrap();
        assert_eq!(w.last_contact_report(), ContactPassReport { created: 1, refreshed: 0, retired: 0 });
        let sync = w.collision_sync().unwrap();
        assert!(sync.contacts().contains(ground, ball));
        assert_eq!(w.physics().unwrap().joint_count(), 1);
        w.step().unwrap();

        w.prepare(0.01).unwrap();
        assert_eq!(w.last_contact_report(), ContactPassReport { created: 0, refreshed: 1, retired: 0 });
        w.step().unwrap();

        w.set_pose(ball, Pose::from_loc(DVec3::new(0.0, 0.0, 5.0))).unwrap();
        w.set_velocity(ball, DVec3::ZERO).unwrap();
        w.prepare(0.01).unwrap();
        assert_eq!(w.last_contact_report(), ContactPassReport { created: 0, refreshed: 0, retired: 1 });
        assert_eq!(w.physics().unwrap().joint_count(), 0);
        w.step().unwrap();
    }

    #[test]
    fn test_disabled_subspace_and_deactivation() {
        let (mut w, ground, ball) = ground_and_ball(0.45);
        let root = w.root();
        w.set_collisions_enabled(root, false).unwrap();
        w.prepare(0.01).unwrap();
        assert_eq!(w.last_contact_report(), ContactPassReport::default());
        w.step().unwrap();

        w.set_collisions_enabled(root, true).unwrap();
        w.prepare(0.01).unwrap();
        w.step().unwrap();
        assert!(w.collision_sync().unwrap().contacts().contains(ground, ball));

        w.deactivate(ball).unwrap();
        assert!(w.collision_sync().unwrap().contacts().is_empty());
        assert_eq!(w.physics().unwrap().joint_count(), 0);
    }

    #[test]
    fn test_paired_objects_do_not_collide() {
        let mut w = World::with_physics(WorldConfig::default().with_gravity(DVec3::ZERO));
        let root = w.root();
        let spawn_box = |w: &mut World, name: &str, x: f64| {
            w.spawn_in(
                root,
                ObjectDesc::named(name)
                    .with_locator(Locator::engine(Pose::from_loc(DVec3::new(x, 0.0, 0.0)), Inertia::default()))
                    .with_geometry(Geometry::new(Shape::cuboid(1.0, 1.0, 1.0)))
                    .with_connector(0, Connector::new(Pose::IDENTITY, JointType::Ball)),
            )
            .unwrap()
        };
        let a = spawn_box(&mut w, "a", 0.0);
        let b = spawn_box(&mut w, "b", 0.9);
        w.enable_collisions().unwrap();
        w.activate(root).unwrap();
        w.connect(ConnectorRef::new(a, 0), ConnectorRef::new(b, 0), Align::Keep).unwrap();

        w.prepare(0.01).unwrap();
        assert_eq!(w.last_contact_report().created, 0);
        assert!(w.collision_sync().unwrap().contacts().is_empty());
    }

    #[test]
    fn test_collisions_need_physics() {
        let mut w = World::new(WorldConfig::default());
        assert_eq!(w.enable_collisions(), Err(WorldError::NoPhysics));
        let root = w.root();
        assert_eq!(w.set_collisions_enabled(root, false), Err(WorldError::NoCollisions));
    }
}
