//! Scene descriptions: the serde model shared by hand-written JSON scenes
//! and binary saves.
//!
//! A scene is the root's environment and integrator, a tree of object
//! nodes, and the connections between connectors addressed as
//! `"<path>@<id>"`. Engine locators marked `active` are bound to bodies
//! when the scene is built.

use glam::DVec3;
use hecs::Entity;
use log::info;
use serde::{Deserialize, Serialize};

use crate::components::{Environment, Geometry, Integrator, Subspace, Visual};
use crate::config::WorldConfig;
use crate::connector::{Connector, ConnectorRef, JointType, Role};
use crate::controls::ControlSurface;
use crate::error::WorldError;
use crate::locator::{Inertia, InertialLocator, Locator, MovingLocator};
use crate::math::Pose;
use crate::world::{Align, ObjectDesc, World};

fn yes() -> bool {
    true
}

fn z_axis() -> DVec3 {
    DVec3::Z
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneDesc {
    #[serde(default)]
    pub config: WorldConfig,
    /// Build the world with a physics runtime
    #[serde(default)]
    pub physics: bool,
    /// Mirror the tree into collision spaces
    #[serde(default)]
    pub collisions: bool,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub integrator: Integrator,
    #[serde(default)]
    pub objects: Vec<ObjectNode>,
    #[serde(default)]
    pub connections: Vec<ConnectionDesc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectNode {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub locator: Option<LocatorDesc>,
    #[serde(default)]
    pub visual: Option<Visual>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub subspace: Option<SubspaceDesc>,
    #[serde(default)]
    pub controls: Option<ControlSurface>,
    #[serde(default)]
    pub connectors: Vec<ConnectorDesc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubspaceDesc {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub integrator: Integrator,
    #[serde(default)]
    pub children: Vec<ObjectNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LocatorDesc {
    Static {
        #[serde(default)]
        pose: Pose,
    },
    Moving {
        #[serde(default)]
        pose: Pose,
        #[serde(default)]
        velocity: DVec3,
        #[serde(default)]
        rot_rate: DVec3,
    },
    Inertial {
        #[serde(default)]
        pose: Pose,
        #[serde(default)]
        velocity: DVec3,
        #[serde(default)]
        rot_rate: DVec3,
        inertia: Inertia,
    },
    Engine {
        #[serde(default)]
        pose: Pose,
        inertia: Inertia,
        #[serde(default)]
        active: bool,
        /// Applied after activation
        #[serde(default)]
        velocity: DVec3,
        #[serde(default)]
        rot_rate: DVec3,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorDesc {
    pub id: u32,
    #[serde(default)]
    pub pose: Pose,
    pub joint: JointType,
    #[serde(default)]
    pub role: Role,
    #[serde(default = "z_axis")]
    pub flip_axis: DVec3,
    #[serde(default = "yes")]
    pub suppress_collisions: bool,
    #[serde(default)]
    pub max_force: f64,
    /// Saved control and sensor values; a fresh layout when absent
    #[serde(default)]
    pub controls: Option<ControlSurface>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDesc {
    pub initiator: String,
    pub receiver: String,
    #[serde(default)]
    pub align: Align,
}

impl SceneDesc {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Number of object nodes in the whole tree
    pub fn object_count(&self) -> usize {
        fn count(nodes: &[ObjectNode]) -> usize {
            nodes
                .iter()
                .map(|n| 1 + n.subspace.as_ref().map_or(0, |s| count(&s.children)))
                .sum()
        }
        count(&self.objects)
    }
}

impl ConnectorDesc {
    fn to_connector(&self) -> Connector {
        let mut c = Connector::new(self.pose, self.joint)
            .with_role(self.role)
            .with_flip_axis(self.flip_axis)
            .with_collisions(self.suppress_collisions)
            .with_max_force(self.max_force);
        if let Some(controls) = &self.controls {
            c.controls = controls.clone();
        }
        c
    }

    fn from_connector(id: u32, c: &Connector) -> Self {
        Self {
            id,
            pose: c.pose,
            joint: c.joint_type,
            role: c.role,
            flip_axis: c.flip_axis,
            suppress_collisions: c.suppress_collisions,
            max_force: c.max_force,
            controls: Some(c.controls.clone()),
        }
    }
}

/// Objects whose engine state is applied once the whole tree exists
struct PendingEngine {
    object: Entity,
    velocity: DVec3,
    rot_rate: DVec3,
}

fn parse_connector_ref(world: &World, text: &str) -> Result<ConnectorRef, WorldError> {
    let (path, id) = text
        .rsplit_once('@')
        .ok_or_else(|| WorldError::UnknownPath(text.to_string()))?;
    let id = id
        .parse::<u32>()
        .map_err(|_| WorldError::UnknownPath(text.to_string()))?;
    Ok(ConnectorRef::new(world.find_path(path)?, id))
}

impl World {
    /// Build a world from a scene description
    pub fn from_scene(scene: &SceneDesc) -> Result<World, WorldError> {
        let mut world = if scene.physics {
            World::with_physics(scene.config)
        } else {
            World::new(scene.config)
        };
        world.set_root_environment(scene.environment.clone());
        let root = world.root();
        world.set_integrator(root, scene.integrator)?;

        let mut pending = Vec::new();
        for node in &scene.objects {
            world.build_node(root, node, &mut pending)?;
        }

        if scene.collisions {
            world.enable_collisions()?;
        }
        for p in &pending {
            world.bind_body(p.object)?;
        }
        for p in &pending {
            world.refresh_geom_binding(p.object)?;
            world.set_velocity(p.object, p.velocity)?;
            world.set_rot_rate(p.object, p.rot_rate)?;
        }

        for connection in &scene.connections {
            let initiator = parse_connector_ref(&world, &connection.initiator)?;
            let receiver = parse_connector_ref(&world, &connection.receiver)?;
            world.connect(initiator, receiver, connection.align)?;
        }
        info!(
            "loaded scene: {} objects, {} connections",
            scene.object_count(),
            scene.connections.len()
        );
        Ok(world)
    }

    fn build_node(&mut self, parent: Entity, node: &ObjectNode, pending: &mut Vec<PendingEngine>) -> Result<Entity, WorldError> {
        let mut desc = ObjectDesc::new();
        desc.name = node.name.clone();
        desc.visual = node.visual.clone();
        desc.geometry = node.geometry;
        desc.controls = node.controls.clone();
        desc.subspace = node.subspace.as_ref().map(|s| {
            Subspace::new()
                .with_environment(s.environment.clone())
                .with_integrator(s.integrator)
        });
        for c in &node.connectors {
            desc = desc.with_connector(c.id, c.to_connector());
        }

        let mut engine = None;
        desc.locator = node.locator.as_ref().map(|l| match *l {
            LocatorDesc::Static { pose } => Locator::Static(pose),
            LocatorDesc::Moving { pose, velocity, rot_rate } => {
                Locator::Moving(MovingLocator::new(pose).with_velocity(velocity).with_rot_rate(rot_rate))
            }
            LocatorDesc::Inertial { pose, velocity, rot_rate, inertia } => Locator::Inertial(
                InertialLocator::new(pose, inertia)
                    .with_velocity(velocity)
                    .with_rot_rate(rot_rate),
            ),
            LocatorDesc::Engine { pose, inertia, active, velocity, rot_rate } => {
                if active {
                    engine = Some((velocity, rot_rate));
                }
                Locator::engine(pose, inertia)
            }
        });

        let object = self.spawn_in(parent, desc)?;
        if let Some((velocity, rot_rate)) = engine {
            pending.push(PendingEngine { object, velocity, rot_rate });
        }
        if let Some(sub) = &node.subspace {
            for child in &sub.children {
                self.build_node(object, child, pending)?;
            }
        }
        Ok(object)
    }

    /// Describe the current world. Active engine locators are exported at
    /// their current pose and velocity; pairings become `Keep` connections.
    pub fn to_scene(&self) -> Result<SceneDesc, WorldError> {
        let root = self.root();
        let mut objects = Vec::new();
        for child in self.children(root)? {
            objects.push(self.export_node(child)?);
        }

        let mut connections = Vec::new();
        for e in self.subtree(root) {
            for c in self.connector_refs(e) {
                let Some(p) = self.connector(c)?.pairing().copied() else { continue };
                if !p.authoritative {
                    continue;
                }
                let address = |r: ConnectorRef| {
                    self.path_of(r.object)
                        .map(|path| format!("{}@{}", path, r.id))
                        .ok_or(WorldError::Unnamed(r.object))
                };
                connections.push(ConnectionDesc {
                    initiator: address(c)?,
                    receiver: address(p.peer)?,
                    align: Align::Keep,
                });
            }
        }

        Ok(SceneDesc {
            config: *self.config(),
            physics: self.physics().is_some(),
            collisions: self.collision_sync().is_some(),
            environment: self.environment(root).unwrap_or_default(),
            integrator: self.integrator(root).unwrap_or_default(),
            objects,
            connections,
        })
    }

    fn export_node(&self, object: Entity) -> Result<ObjectNode, WorldError> {
        let locator = match self.locator(object) {
            None => None,
            Some(Locator::Static(pose)) => Some(LocatorDesc::Static { pose }),
            Some(Locator::Moving(m)) => Some(LocatorDesc::Moving {
                pose: m.pose,
                velocity: m.velocity,
                rot_rate: m.rot_rate,
            }),
            Some(Locator::Inertial(i)) => Some(LocatorDesc::Inertial {
                pose: i.pose,
                velocity: i.velocity,
                rot_rate: i.rot_rate,
                inertia: i.inertia,
            }),
            Some(Locator::Engine(e)) => {
                let active = e.is_active();
                let (velocity, rot_rate) = if active {
                    (self.velocity(object)?, self.rot_rate(object)?)
                } else {
                    (DVec3::ZERO, DVec3::ZERO)
                };
                Some(LocatorDesc::Engine {
                    pose: self.relative_pose(object)?,
                    inertia: e.inertia,
                    active,
                    velocity,
                    rot_rate,
                })
            }
        };

        let subspace = match self.ecs.get::<&Subspace>(object) {
            Ok(sub) => Some((sub.environment.clone(), sub.integrator, sub.children.clone())),
            Err(_) => None,
        };
        let subspace = match subspace {
            Some((environment, integrator, children)) => Some(SubspaceDesc {
                environment,
                integrator,
                children: children
                    .into_iter()
                    .map(|c| self.export_node(c))
                    .collect::<Result<Vec<_>, _>>()?,
            }),
            None => None,
        };

        let connectors = self
            .connectors(object)
            .map(|cs| cs.iter().map(|(id, c)| ConnectorDesc::from_connector(id, c)).collect())
            .unwrap_or_default();

        Ok(ObjectNode {
            name: self.name(object),
            locator,
            visual: self.visual(object),
            geometry: self.geometry(object),
            subspace,
            controls: self.controls(object),
            connectors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::Shape;
    use crate::connector::hinge;

    const SCENE: &str = r#"{
        "physics": true,
        "config": { "gravity": [0.0, 0.0, 0.0] },
        "objects": [
            {
                "name": "base",
                "locator": { "Static": { "pose": { "loc": [0.0, 0.0, 1.0] } } },
                "connectors": [
                    { "id": 0, "pose": { "loc": [0.5, 0.0, 0.0] },
                      "joint": { "Hinge": { "axis": [0.0, 0.0, 1.0], "stops": null } },
                      "max_force": 20.0 }
                ]
            },
            {
                "name": "room",
                "subspace": {
                    "children": [
                        {
                            "name": "arm",
                            "locator": { "Engine": { "pose": { "loc": [4.0, 0.0, 0.0] },
                                                     "inertia": { "mass": 2.0, "moment": 0.5 },
                                                     "active": true } },
                            "geometry": { "shape": { "Sphere": { "radius": 0.25 } } },
                            "connectors": [
                                { "id": 3, "pose": { "loc": [-0.5, 0.0, 0.0] },
                                  "joint": { "Hinge": { "axis": [0.0, 0.0, 1.0], "stops": null } } }
                            ]
                        }
                    ]
                }
            }
        ],
        "connections": [
            { "initiator": "/base@0", "receiver": "/room/arm@3", "align": "MoveReceiver" }
        ]
    }"#;

    #[test]
    fn test_build_from_json() {
        let scene = SceneDesc::from_json(SCENE).unwrap();
        assert_eq!(scene.object_count(), 3);
        let mut w = World::from_scene(&scene).unwrap();

        let arm = w.find_path("/room/arm").unwrap();
        assert!(w.body_of(arm).is_some());
        assert!(w.is_locked(w.find_path("/room").unwrap()).unwrap());
        let base = ConnectorRef::new(w.find_path("/base").unwrap(), 0);
        assert!(w.connector(base).unwrap().is_authoritative());

        // Receiver connector is turned about z to face the base connector
        let at = w.connector_pose(ConnectorRef::new(arm, 3)).unwrap();
        assert!(at.loc.abs_diff_eq(DVec3::new(0.5, 0.0, 1.0), 1.0e-12));

        w.use_connector_control(base, hinge::FORCE_FACTOR, 1.0).unwrap();
        w.use_connector_control(base, hinge::VELOCITY, 0.5).unwrap();
        for _ in 0..10 {
            w.tick(0.01).unwrap();
        }
        assert!(w.connector_sensor(base, hinge::ANGLE).unwrap().abs() > 0.01);
    }

    #[test]
    fn test_export_rebuild() {
        let mut w = World::from_scene(&SceneDesc::from_json(SCENE).unwrap()).unwrap();
        w.set_velocity(w.find_path("/room/arm").unwrap(), DVec3::new(0.0, 0.25, 0.0)).unwrap();
        let lamp = w.spawn_in(w.root(), ObjectDesc::named("lamp").with_visual(Visual::new(Shape::sphere(0.1)))).unwrap();

        let exported = w.to_scene().unwrap();
        assert_eq!(exported.connections.len(), 1);
        assert_eq!(exported.connections[0].initiator, "/base@0");
        assert_eq!(exported.connections[0].align, Align::Keep);

        let json = exported.to_json().unwrap();
        let rebuilt = World::from_scene(&SceneDesc::from_json(&json).unwrap()).unwrap();
        for path in ["/base", "/room", "/room/arm", "/lamp"] {
            let a = w.find_path(path).unwrap();
            let b = rebuilt.find_path(path).unwrap();
            assert!(w.absolute_pose(a).unwrap().abs_diff_eq(&rebuilt.absolute_pose(b).unwrap(), 1.0e-12));
        }
        let arm = rebuilt.find_path("/room/arm").unwrap();
        assert!(rebuilt.velocity(arm).unwrap().abs_diff_eq(DVec3::new(0.0, 0.25, 0.0), 1.0e-12));
        assert!(rebuilt.visual(rebuilt.find_path("/lamp").unwrap()).is_some());
        assert!(w.contains(lamp));
    }

    #[test]
    fn test_unnamed_peer_cannot_be_exported() {
        let mut w = World::with_physics(WorldConfig::default());
        let root = w.root();
        let joint = JointType::Ball;
        let a = w
            .spawn_in(root, ObjectDesc::named("a").with_connector(0, Connector::new(Pose::IDENTITY, joint)))
            .unwrap();
        let b = w
            .spawn_in(
                root,
                ObjectDesc::new()
                    .with_locator(Locator::engine(Pose::IDENTITY, Inertia::default()))
                    .with_connector(0, Connector::new(Pose::IDENTITY, joint)),
            )
            .unwrap();
        w.activate(b).unwrap();
        w.connect(ConnectorRef::new(a, 0), ConnectorRef::new(b, 0), Align::Keep).unwrap();
        assert_eq!(w.to_scene().unwrap_err(), WorldError::Unnamed(b));
    }

    #[test]
    fn test_bad_connection_address() {
        let mut scene = SceneDesc::from_json(SCENE).unwrap();
        scene.connections[0].receiver = "/room/arm".into();
        assert_eq!(
            World::from_scene(&scene).unwrap_err(),
            WorldError::UnknownPath("/room/arm".into())
        );
    }
}
