//! Connectors - typed attachment points that pair objects through engine joints.
//!
//! A connector sits at a fixed pose relative to its host object. Two
//! connectors with the same [`JointType`] and compatible [`Role`]s can be
//! paired by [`crate::world::World::connect`]; the initiating side is
//! authoritative and owns the engine joint, the controls that drive it and
//! the sensors that read it back.

use std::collections::BTreeMap;
use std::fmt;

use glam::DVec3;
use hecs::Entity;
use serde::{Deserialize, Serialize};

use crate::controls::{ControlMode, ControlSurface};
use crate::math::Pose;
use crate::physics::{JointId, JointKind, JointSensors, Motor};

/// Control and sensor indices for hinge connectors
pub mod hinge {
    pub const VELOCITY: usize = 0;
    pub const FORCE_FACTOR: usize = 1;
    pub const TORQUE: usize = 2;

    pub const ANGLE: usize = 0;
    pub const ANGLE_RATE: usize = 1;
}

/// Control and sensor indices for slider connectors
pub mod slider {
    pub const VELOCITY: usize = 0;
    pub const FORCE_FACTOR: usize = 1;
    pub const FORCE: usize = 2;

    pub const POSITION: usize = 0;
    pub const POSITION_RATE: usize = 1;
}

/// Control and sensor indices for universal connectors
pub mod universal {
    pub const VELOCITY1: usize = 0;
    pub const VELOCITY2: usize = 1;
    pub const FORCE_FACTOR: usize = 2;
    pub const TORQUE1: usize = 3;
    pub const TORQUE2: usize = 4;

    pub const ANGLE1: usize = 0;
    pub const ANGLE2: usize = 1;
}

/// Which side of a pairing a connector may take
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Initiator,
    Receiver,
    #[default]
    Either,
}

impl Role {
    pub fn can_initiate(self) -> bool {
        self != Role::Receiver
    }

    pub fn can_receive(self) -> bool {
        self != Role::Initiator
    }
}

/// Joint built when two connectors pair. Axes are in the connector frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum JointType {
    Hinge { axis: DVec3, stops: Option<(f64, f64)> },
    Ball,
    Slider { axis: DVec3, stops: Option<(f64, f64)> },
    Universal { axis1: DVec3, axis2: DVec3 },
    Fixed,
}

impl JointType {
    pub fn hinge(axis: DVec3) -> Self {
        JointType::Hinge { axis, stops: None }
    }

    pub fn slider(axis: DVec3) -> Self {
        JointType::Slider { axis, stops: None }
    }

    /// Two connectors pair only when their joint types match in kind
    pub fn compatible(&self, other: &JointType) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }

    pub fn kind(&self) -> JointKind {
        match self {
            JointType::Hinge { .. } => JointKind::Hinge,
            JointType::Ball => JointKind::Ball,
            JointType::Slider { .. } => JointKind::Slider,
            JointType::Universal { .. } => JointKind::Universal,
            JointType::Fixed => JointKind::Fixed,
        }
    }

    /// Primary and secondary joint axes in the connector frame
    pub fn axes(&self) -> (DVec3, DVec3) {
        match *self {
            JointType::Hinge { axis, .. } | JointType::Slider { axis, .. } => {
                (axis, crate::math::orthonormal_pair(axis).0)
            }
            JointType::Universal { axis1, axis2 } => (axis1, axis2),
            JointType::Ball | JointType::Fixed => (DVec3::Z, DVec3::X),
        }
    }

    pub fn stops(&self) -> Option<(f64, f64)> {
        match *self {
            JointType::Hinge { stops, .. } | JointType::Slider { stops, .. } => stops,
            _ => None,
        }
    }

    /// Fresh control surface with this joint's layout
    pub fn control_surface(&self) -> ControlSurface {
        use ControlMode::*;
        match self {
            JointType::Hinge { .. } => ControlSurface::new()
                .with_control("velocity", Continuous)
                .with_control("force_factor", Continuous)
                .with_control("torque", Pulse)
                .with_sensor("angle")
                .with_sensor("angle_rate"),
            JointType::Slider { .. } => ControlSurface::new()
                .with_control("velocity", Continuous)
                .with_control("force_factor", Continuous)
                .with_control("force", Pulse)
                .with_sensor("position")
                .with_sensor("position_rate"),
            JointType::Universal { .. } => ControlSurface::new()
                .with_control("velocity1", Continuous)
                .with_control("velocity2", Continuous)
                .with_control("force_factor", Continuous)
                .with_control("torque1", Pulse)
                .with_control("torque2", Pulse)
                .with_sensor("angle1")
                .with_sensor("angle2"),
            JointType::Ball | JointType::Fixed => ControlSurface::new(),
        }
    }
}

/// Address of one connector: host object plus its small integer id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectorRef {
    pub object: Entity,
    pub id: u32,
}

impl ConnectorRef {
    pub fn new(object: Entity, id: u32) -> Self {
        Self { object, id }
    }
}

impl fmt::Display for ConnectorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{}", self.object, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pairing {
    pub peer: ConnectorRef,
    /// True on the initiating side, which owns the joint
    pub authoritative: bool,
    pub joint: Option<JointId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Connector {
    /// Attachment pose relative to the host object
    pub pose: Pose,
    pub role: Role,
    /// Axis (connector frame) the peer is turned about to face this one
    pub flip_axis: DVec3,
    /// Skip contacts between the two paired objects
    pub suppress_collisions: bool,
    pub joint_type: JointType,
    /// Force or torque limit at `force_factor == 1`
    pub max_force: f64,
    pub controls: ControlSurface,
    pub(crate) pairing: Option<Pairing>,
}

impl Connector {
    pub fn new(pose: Pose, joint_type: JointType) -> Self {
        Self {
            pose,
            role: Role::Either,
            flip_axis: DVec3::Z,
            suppress_collisions: true,
            joint_type,
            max_force: 0.0,
            controls: joint_type.control_surface(),
            pairing: None,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_flip_axis(mut self, axis: DVec3) -> Self {
        self.flip_axis = axis;
        self
    }

    pub fn with_max_force(mut self, max_force: f64) -> Self {
        self.max_force = max_force;
        self
    }

    pub fn with_collisions(mut self, suppressed: bool) -> Self {
        self.suppress_collisions = suppressed;
        self
    }

    pub fn pairing(&self) -> Option<&Pairing> {
        self.pairing.as_ref()
    }

    pub fn is_paired(&self) -> bool {
        self.pairing.is_some()
    }

    pub fn is_authoritative(&self) -> bool {
        self.pairing.map(|p| p.authoritative).unwrap_or(false)
    }

    /// Motor settings and one-tick efforts per joint axis slot
    pub(crate) fn drive(&self) -> Vec<(usize, Motor, f64)> {
        let c = |i: usize| self.controls.control(i).unwrap_or(0.0);
        match self.joint_type {
            JointType::Hinge { .. } => vec![(
                0,
                Motor {
                    target_velocity: c(hinge::VELOCITY),
                    max_force: c(hinge::FORCE_FACTOR) * self.max_force,
                },
                c(hinge::TORQUE),
            )],
            JointType::Slider { .. } => vec![(
                0,
                Motor {
                    target_velocity: c(slider::VELOCITY),
                    max_force: c(slider::FORCE_FACTOR) * self.max_force,
                },
                c(slider::FORCE),
            )],
            JointType::Universal { .. } => {
                let max_force = c(universal::FORCE_FACTOR) * self.max_force;
                vec![
                    (0, Motor { target_velocity: c(universal::VELOCITY1), max_force }, c(universal::TORQUE1)),
                    (1, Motor { target_velocity: c(universal::VELOCITY2), max_force }, c(universal::TORQUE2)),
                ]
            }
            JointType::Ball | JointType::Fixed => Vec::new(),
        }
    }

    /// Copy live joint readings into the sensors; `None` zeroes them
    pub(crate) fn read_sensors(&mut self, readings: Option<JointSensors>) {
        let Some(r) = readings else {
            self.controls.zero_sensors();
            return;
        };
        match self.joint_type {
            JointType::Hinge { .. } => {
                self.controls.set_sensor(hinge::ANGLE, r.position[0]);
                self.controls.set_sensor(hinge::ANGLE_RATE, r.rate[0]);
            }
            JointType::Slider { .. } => {
                self.controls.set_sensor(slider::POSITION, r.position[0]);
                self.controls.set_sensor(slider::POSITION_RATE, r.rate[0]);
            }
            JointType::Universal { .. } => {
                self.controls.set_sensor(universal::ANGLE1, r.position[0]);
                self.controls.set_sensor(universal::ANGLE2, r.position[1]);
            }
            JointType::Ball | JointType::Fixed => {}
        }
    }
}

/// Connector capability: host's connectors keyed by id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Connectors(pub BTreeMap<u32, Connector>);

impl Connectors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: u32, connector: Connector) -> Self {
        self.0.insert(id, connector);
        self
    }

    pub fn get(&self, id: u32) -> Option<&Connector> {
        self.0.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Connector> {
        self.0.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Connector)> {
        self.0.iter().map(|(id, c)| (*id, c))
    }

    pub fn ids(&self) -> Vec<u32> {
        self.0.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles() {
        assert!(Role::Initiator.can_initiate());
        assert!(!Role::Initiator.can_receive());
        assert!(Role::Either.can_initiate() && Role::Either.can_receive());
        assert!(!Role::Receiver.can_initiate());
    }

    #[test]
    fn test_compatibility_ignores_parameters() {
        let a = JointType::hinge(DVec3::Z);
        let b = JointType::Hinge { axis: DVec3::X, stops: Some((-1.0, 1.0)) };
        assert!(a.compatible(&b));
        assert!(!a.compatible(&JointType::Ball));
    }

    #[test]
    fn test_hinge_drive_scales_force_limit() {
        let mut c = Connector::new(Pose::IDENTITY, JointType::hinge(DVec3::Z)).with_max_force(50.0);
        c.controls.use_control(hinge::VELOCITY, 1.5);
        c.controls.use_control(hinge::FORCE_FACTOR, 0.5);
        c.controls.use_control(hinge::TORQUE, 2.0);
        c.controls.use_control(hinge::TORQUE, 1.0);
        let drive = c.drive();
        assert_eq!(drive.len(), 1);
        let (slot, motor, effort) = drive[0];
        assert_eq!(slot, 0);
        assert_eq!(motor.target_velocity, 1.5);
        assert_eq!(motor.max_force, 25.0);
        assert_eq!(effort, 3.0);
    }

    #[test]
    fn test_universal_layout() {
        let surface = JointType::Universal { axis1: DVec3::X, axis2: DVec3::Y }.control_surface();
        assert_eq!(surface.control_index("torque2"), Some(universal::TORQUE2));
        assert_eq!(surface.sensor_index("angle2"), Some(universal::ANGLE2));
        assert!(JointType::Fixed.control_surface().controls().is_empty());
    }

    #[test]
    fn test_unpaired_sensors_read_zero() {
        let mut c = Connector::new(Pose::IDENTITY, JointType::slider(DVec3::X));
        c.read_sensors(Some(JointSensors { position: [0.3, 0.0], rate: [1.0, 0.0] }));
        assert_eq!(c.controls.sensor(slider::POSITION), Some(0.3));
        c.read_sensors(None);
        assert_eq!(c.controls.sensor_values(), vec![0.0, 0.0]);
    }
}
