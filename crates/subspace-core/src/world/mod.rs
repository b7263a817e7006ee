//! The world - root subspace, object lifecycle and tree edits.
//!
//! Objects are hecs entities carrying a [`Node`] plus whichever capability
//! components they have. The root is a subspace entity created with the
//! world and never destroyed. A world built with [`World::with_physics`]
//! owns a [`PhysicsEngine`] and can activate engine locators.
//!
//! Behaviour is split across submodules, each adding methods to [`World`]:
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `transform` | frame conversions and pose/velocity access |
//! | `activation` | binding engine locators to bodies, lock counts |
//! | `connect` | connector pairing, joint controls and sensors |
//! | `tick` | the prepare/step protocol |

mod activation;
mod connect;
mod tick;
mod transform;

pub use connect::Align;

use hecs::{Entity, EntityBuilder};
use log::debug;

use crate::collision::{CollisionSync, ContactPassReport};
use crate::components::*;
use crate::config::WorldConfig;
use crate::connector::{Connector, Connectors};
use crate::controls::ControlSurface;
use crate::error::WorldError;
use crate::locator::Locator;
use crate::observer::{ObjectEvent, ObjectObserver, ObserverId, Observers};
use crate::physics::PhysicsEngine;

/// Characters that separate path, connector, property and value in
/// snapshot records
const RESERVED: [char; 4] = ['/', '@', ':', '.'];

fn valid_name(name: &str) -> bool {
    !name.is_empty() && !name.contains(RESERVED)
}

/// Everything needed to spawn one object
#[derive(Debug, Clone, Default)]
pub struct ObjectDesc {
    pub name: Option<String>,
    pub locator: Option<Locator>,
    pub visual: Option<Visual>,
    pub geometry: Option<Geometry>,
    pub subspace: Option<Subspace>,
    pub controls: Option<ControlSurface>,
    pub connectors: Connectors,
}

impl ObjectDesc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Named objects are addressable by path once inserted. Inserting one
    /// whose name is empty or contains `/`, `@`, `:` or `.` fails with
    /// [`WorldError::BadName`].
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_locator(mut self, locator: impl Into<Locator>) -> Self {
        self.locator = Some(locator.into());
        self
    }

    pub fn with_visual(mut self, visual: Visual) -> Self {
        self.visual = Some(visual);
        self
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn with_subspace(mut self, subspace: Subspace) -> Self {
        self.subspace = Some(subspace);
        self
    }

    pub fn with_controls(mut self, controls: ControlSurface) -> Self {
        self.controls = Some(controls);
        self
    }

    pub fn with_connector(mut self, id: u32, connector: Connector) -> Self {
        self.connectors.0.insert(id, connector);
        self
    }
}

/// Root of the object tree plus the optional physics runtime
pub struct World {
    /// ECS storage for every object
    pub(crate) ecs: hecs::World,
    root: Entity,
    config: WorldConfig,
    /// Present when the world was built physics-backed
    pub(crate) physics: Option<PhysicsEngine>,
    /// Present once collisions were enabled
    pub(crate) collisions: Option<CollisionSync>,
    observers: Observers,

    // Tick state
    pending_dt: Option<f64>,
    ticks: u64,
    last_report: ContactPassReport,
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("objects", &self.ecs.len())
            .field("physics", &self.physics.is_some())
            .field("collisions", &self.collisions.is_some())
            .field("ticks", &self.ticks)
            .finish()
    }
}

impl World {
    /// Create a world without a physics runtime
    pub fn new(config: WorldConfig) -> Self {
        let mut ecs = hecs::World::new();
        let root = ecs.spawn((Node::default(), Subspace::new()));
        Self {
            ecs,
            root,
            config,
            physics: None,
            collisions: None,
            observers: Observers::default(),
            pending_dt: None,
            ticks: 0,
            last_report: ContactPassReport::default(),
        }
    }

    /// Create a physics-backed world
    pub fn with_physics(config: WorldConfig) -> Self {
        let mut world = Self::new(config);
        world.physics = Some(PhysicsEngine::new(config.engine_params()));
        world
    }

    pub fn root(&self) -> Entity {
        self.root
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn physics(&self) -> Option<&PhysicsEngine> {
        self.physics.as_ref()
    }

    pub(crate) fn engine_mut(&mut self) -> Result<&mut PhysicsEngine, WorldError> {
        self.physics.as_mut().ok_or(WorldError::NoPhysics)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub(crate) fn restore_ticks(&mut self, ticks: u64) {
        self.ticks = ticks;
    }

    pub fn last_contact_report(&self) -> ContactPassReport {
        self.last_report
    }

    /// Number of objects, including the root
    pub fn len(&self) -> usize {
        self.ecs.len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }

    pub fn set_root_environment(&mut self, environment: Environment) {
        if let Ok(mut sub) = self.ecs.get::<&mut Subspace>(self.root) {
            sub.environment = environment;
        }
    }

    pub fn set_integrator(&mut self, subspace: Entity, integrator: Integrator) -> Result<(), WorldError> {
        let mut sub = self
            .ecs
            .get::<&mut Subspace>(subspace)
            .map_err(|_| WorldError::NotASubspace(subspace))?;
        sub.integrator = integrator;
        Ok(())
    }

    // ---- component access ----

    pub fn contains(&self, object: Entity) -> bool {
        self.ecs.contains(object)
    }

    pub(crate) fn node(&self, object: Entity) -> Result<Node, WorldError> {
        self.ecs
            .get::<&Node>(object)
            .map(|n| *n)
            .map_err(|_| WorldError::NoSuchObject(object))
    }

    pub fn parent(&self, object: Entity) -> Result<Option<Entity>, WorldError> {
        Ok(self.node(object)?.parent)
    }

    pub fn is_locked(&self, object: Entity) -> Result<bool, WorldError> {
        Ok(self.node(object)?.is_locked())
    }

    pub fn children(&self, subspace: Entity) -> Result<Vec<Entity>, WorldError> {
        self.ecs
            .get::<&Subspace>(subspace)
            .map(|s| s.children.clone())
            .map_err(|_| WorldError::NotASubspace(subspace))
    }

    pub fn is_subspace(&self, object: Entity) -> bool {
        self.ecs.get::<&Subspace>(object).is_ok()
    }

    pub fn name(&self, object: Entity) -> Option<String> {
        self.ecs.get::<&Name>(object).ok().map(|n| n.0.clone())
    }

    pub fn locator(&self, object: Entity) -> Option<Locator> {
        self.ecs.get::<&Locator>(object).ok().map(|l| (*l).clone())
    }

    pub fn visual(&self, object: Entity) -> Option<Visual> {
        self.ecs.get::<&Visual>(object).ok().map(|v| (*v).clone())
    }

    pub fn geometry(&self, object: Entity) -> Option<Geometry> {
        self.ecs.get::<&Geometry>(object).ok().map(|g| *g)
    }

    pub fn environment(&self, subspace: Entity) -> Option<Environment> {
        self.ecs.get::<&Subspace>(subspace).ok().map(|s| s.environment.clone())
    }

    pub fn integrator(&self, subspace: Entity) -> Option<Integrator> {
        self.ecs.get::<&Subspace>(subspace).ok().map(|s| s.integrator)
    }

    pub fn connectors(&self, object: Entity) -> Option<Connectors> {
        self.ecs.get::<&Connectors>(object).ok().map(|c| (*c).clone())
    }

    pub fn controls(&self, object: Entity) -> Option<ControlSurface> {
        self.ecs.get::<&ControlSurface>(object).ok().map(|c| (*c).clone())
    }

    /// Write one of the object's own controls
    pub fn use_control(&mut self, object: Entity, index: usize, value: f64) -> Result<(), WorldError> {
        let mut controls = self
            .ecs
            .get::<&mut ControlSurface>(object)
            .map_err(|_| WorldError::NoSuchObject(object))?;
        if controls.use_control(index, value) {
            Ok(())
        } else {
            Err(WorldError::NoSuchControl(index))
        }
    }

    pub fn set_sensor(&mut self, object: Entity, index: usize, value: f64) -> Result<(), WorldError> {
        let mut controls = self
            .ecs
            .get::<&mut ControlSurface>(object)
            .map_err(|_| WorldError::NoSuchObject(object))?;
        if controls.set_sensor(index, value) {
            Ok(())
        } else {
            Err(WorldError::NoSuchControl(index))
        }
    }

    // ---- observers ----

    /// Watch one object, or every object with `None`
    pub fn observe(&mut self, target: Option<Entity>, observer: impl ObjectObserver + 'static) -> ObserverId {
        self.observers.watch(target, Box::new(observer))
    }

    pub fn unobserve(&mut self, id: ObserverId) -> bool {
        self.observers.unwatch(id)
    }

    fn notify(&mut self, object: Entity, event: ObjectEvent) {
        self.observers.notify(object, event);
    }

    // ---- lifecycle ----

    /// Create a detached object
    pub fn spawn(&mut self, desc: ObjectDesc) -> Entity {
        let mut builder = EntityBuilder::new();
        builder.add(Node::default());
        if let Some(name) = desc.name {
            builder.add(Name(name));
        }
        if let Some(locator) = desc.locator {
            builder.add(locator);
        }
        if let Some(visual) = desc.visual {
            builder.add(visual);
        }
        if let Some(geometry) = desc.geometry {
            builder.add(geometry);
        }
        if let Some(subspace) = desc.subspace {
            builder.add(Subspace {
                children: Vec::new(),
                ..subspace
            });
        }
        if let Some(controls) = desc.controls {
            builder.add(controls);
        }
        if !desc.connectors.0.is_empty() {
            builder.add(desc.connectors);
        }
        self.ecs.spawn(builder.build())
    }

    /// Spawn and insert in one call
    pub fn spawn_in(&mut self, parent: Entity, desc: ObjectDesc) -> Result<Entity, WorldError> {
        let object = self.spawn(desc);
        if let Err(e) = self.insert(parent, object) {
            let _ = self.ecs.despawn(object);
            return Err(e);
        }
        Ok(object)
    }

    /// Whether `ancestor` is `object` or one of its containers
    pub fn is_ancestor(&self, ancestor: Entity, object: Entity) -> Result<bool, WorldError> {
        let mut current = Some(object);
        while let Some(c) = current {
            if c == ancestor {
                return Ok(true);
            }
            current = self.node(c)?.parent;
        }
        Ok(false)
    }

    /// Whether the container chain reaches the root
    pub fn is_attached(&self, object: Entity) -> Result<bool, WorldError> {
        self.is_ancestor(self.root, object)
    }

    pub fn insert(&mut self, parent: Entity, child: Entity) -> Result<(), WorldError> {
        if child == self.root {
            return Err(WorldError::IsRoot);
        }
        let node = self.node(child)?;
        self.node(parent)?;
        if !self.is_subspace(parent) {
            return Err(WorldError::NotASubspace(parent));
        }
        if let Some(container) = node.parent {
            return Err(WorldError::AlreadyContained { object: child, container });
        }
        if self.is_ancestor(child, parent)? {
            return Err(WorldError::Cycle { object: child, container: parent });
        }
        if let Some(name) = self.name(child).filter(|n| !valid_name(n)) {
            return Err(WorldError::BadName(name));
        }

        self.notify(child, ObjectEvent::ContainerAboutToChange { from: None, to: Some(parent) });
        if let Ok(mut sub) = self.ecs.get::<&mut Subspace>(parent) {
            sub.children.push(child);
        }
        if let Ok(mut n) = self.ecs.get::<&mut Node>(child) {
            n.parent = Some(parent);
        }
        debug!("inserted {:?} into {:?}", child, parent);

        if self.collisions.is_some() && self.is_attached(child)? {
            self.mirror_subtree(child)?;
        }
        Ok(())
    }

    pub fn remove(&mut self, child: Entity) -> Result<(), WorldError> {
        if child == self.root {
            return Err(WorldError::IsRoot);
        }
        let node = self.node(child)?;
        let parent = node.parent.ok_or(WorldError::NotContained(child))?;
        if node.is_locked() {
            return Err(WorldError::Locked(child));
        }

        self.notify(child, ObjectEvent::ContainerAboutToChange { from: Some(parent), to: None });
        if self.collisions.is_some() {
            self.unmirror_subtree(child)?;
        }
        if let Ok(mut sub) = self.ecs.get::<&mut Subspace>(parent) {
            sub.children.retain(|&c| c != child);
        }
        if let Ok(mut n) = self.ecs.get::<&mut Node>(child) {
            n.parent = None;
        }
        debug!("removed {:?} from {:?}", child, parent);
        Ok(())
    }

    /// Destroy an object and everything it contains. Active engine
    /// locators are deactivated and connector pairings dropped first.
    pub fn destroy(&mut self, object: Entity) -> Result<(), WorldError> {
        if object == self.root {
            return Err(WorldError::IsRoot);
        }
        let node = self.node(object)?;
        if node.is_locked() {
            self.deactivate(object)?;
        }
        if let Ok(children) = self.children(object) {
            for child in children {
                self.destroy(child)?;
            }
        }

        self.notify(object, ObjectEvent::AboutToDestruct);
        self.drop_pairings(object)?;
        if self.node(object)?.parent.is_some() {
            self.remove(object)?;
        }
        self.observers.forget(object);
        let _ = self.ecs.despawn(object);
        debug!("destroyed {:?}", object);
        Ok(())
    }

    /// Replace the locator; an engine-bound locator cannot be replaced
    pub fn set_locator(&mut self, object: Entity, locator: Option<Locator>) -> Result<(), WorldError> {
        self.node(object)?;
        if object == self.root {
            return Err(WorldError::IsRoot);
        }
        if self.locator(object).map(|l| l.is_active()).unwrap_or(false) {
            return Err(WorldError::Locked(object));
        }
        self.notify(object, ObjectEvent::LocatorAboutToChange);
        match locator {
            Some(l) => {
                let _ = self.ecs.insert_one(object, l);
            }
            None => {
                let _ = self.ecs.remove_one::<Locator>(object);
            }
        }
        self.invalidate_subtree(object);
        self.refresh_geom(object)?;
        Ok(())
    }

    pub fn set_visual(&mut self, object: Entity, visual: Option<Visual>) -> Result<(), WorldError> {
        self.node(object)?;
        self.notify(object, ObjectEvent::VisualAboutToChange);
        match visual {
            Some(v) => {
                let _ = self.ecs.insert_one(object, v);
            }
            None => {
                let _ = self.ecs.remove_one::<Visual>(object);
            }
        }
        Ok(())
    }

    pub fn set_geometry(&mut self, object: Entity, geometry: Option<Geometry>) -> Result<(), WorldError> {
        self.node(object)?;
        self.notify(object, ObjectEvent::GeometryAboutToChange);
        if self.collisions.is_some() {
            self.drop_geom(object)?;
        }
        match geometry {
            Some(g) => {
                let _ = self.ecs.insert_one(object, g);
            }
            None => {
                let _ = self.ecs.remove_one::<Geometry>(object);
            }
        }
        self.refresh_geom(object)?;
        Ok(())
    }

    /// Re-create the object's collision geom after a capability change
    fn refresh_geom(&mut self, object: Entity) -> Result<(), WorldError> {
        if self.collisions.is_none() || !self.is_attached(object)? {
            return Ok(());
        }
        self.drop_geom(object)?;
        self.mirror_geom(object)
    }

    // ---- paths ----

    /// Absolute '/'-separated path; `None` if any container is unnamed
    /// or the object is detached
    pub fn path_of(&self, object: Entity) -> Option<String> {
        if object == self.root {
            return Some("/".to_string());
        }
        let mut parts = Vec::new();
        let mut current = object;
        while current != self.root {
            parts.push(self.name(current)?);
            current = self.node(current).ok()?.parent?;
        }
        parts.reverse();
        Some(format!("/{}", parts.join("/")))
    }

    pub fn find_path(&self, path: &str) -> Result<Entity, WorldError> {
        let mut current = self.root;
        for part in path.split('/').filter(|p| !p.is_empty()) {
            let children = self
                .children(current)
                .map_err(|_| WorldError::UnknownPath(path.to_string()))?;
            current = children
                .into_iter()
                .find(|&c| self.name(c).as_deref() == Some(part))
                .ok_or_else(|| WorldError::UnknownPath(path.to_string()))?;
        }
        Ok(current)
    }

    /// Depth-first, insertion-ordered list of `object` and its descendants
    pub fn subtree(&self, object: Entity) -> Vec<Entity> {
        let mut out = Vec::new();
        let mut stack = vec![object];
        while let Some(e) = stack.pop() {
            out.push(e);
            if let Ok(children) = self.children(e) {
                stack.extend(children.into_iter().rev());
            }
        }
        out
    }
}
