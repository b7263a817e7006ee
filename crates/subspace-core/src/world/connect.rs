//! Connector pairing: alignment, engine joints, controls and sensors.

use hecs::Entity;
use log::debug;
use serde::{Deserialize, Serialize};

use super::World;
use crate::connector::{Connector, ConnectorRef, Connectors, Pairing};
use crate::error::{ConnectError, WorldError};
use crate::math::{flip, Pose};
use crate::physics::{JointDesc, JointId};

/// Which object `connect` moves so the connectors meet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Align {
    /// Move the receiver if it has a direct absolute pose, else the
    /// initiator if it has one, else nothing
    #[default]
    Auto,
    MoveInitiator,
    MoveReceiver,
    /// Leave both objects where they are
    Keep,
}

impl World {
    pub fn connector(&self, c: ConnectorRef) -> Result<Connector, WorldError> {
        self.ecs
            .get::<&Connectors>(c.object)
            .ok()
            .and_then(|cs| cs.get(c.id).cloned())
            .ok_or(WorldError::Connect(ConnectError::NoSuchConnector(c)))
    }

    fn with_connector_mut<R>(&mut self, c: ConnectorRef, f: impl FnOnce(&mut Connector) -> R) -> Result<R, WorldError> {
        let mut cs = self
            .ecs
            .get::<&mut Connectors>(c.object)
            .map_err(|_| WorldError::Connect(ConnectError::NoSuchConnector(c)))?;
        let connector = cs.get_mut(c.id).ok_or(ConnectError::NoSuchConnector(c))?;
        Ok(f(connector))
    }

    /// Absolute pose of a connector
    pub fn connector_pose(&self, c: ConnectorRef) -> Result<Pose, WorldError> {
        let connector = self.connector(c)?;
        self.to_absolute(c.object, &connector.pose)
    }

    /// Every connector of the object, as references
    pub fn connector_refs(&self, object: Entity) -> Vec<ConnectorRef> {
        self.ecs
            .get::<&Connectors>(object)
            .map(|cs| cs.ids().into_iter().map(|id| ConnectorRef::new(object, id)).collect())
            .unwrap_or_default()
    }

    /// Pair two connectors and build the engine joint between their objects
    pub fn connect(&mut self, initiator: ConnectorRef, receiver: ConnectorRef, align: Align) -> Result<JointId, WorldError> {
        let init = self.connector(initiator)?;
        let recv = self.connector(receiver)?;
        if initiator.object == receiver.object {
            return Err(ConnectError::SameObject.into());
        }
        if init.is_paired() {
            return Err(ConnectError::AlreadyPaired(initiator).into());
        }
        if recv.is_paired() {
            return Err(ConnectError::AlreadyPaired(receiver).into());
        }
        if !init.role.can_initiate() || !recv.role.can_receive() {
            return Err(ConnectError::RoleMismatch { initiator: init.role, receiver: recv.role }.into());
        }
        if !init.joint_type.compatible(&recv.joint_type) {
            return Err(ConnectError::IncompatibleJoint.into());
        }

        let moving = match align {
            Align::Keep => None,
            Align::MoveInitiator => Some(initiator),
            Align::MoveReceiver => Some(receiver),
            Align::Auto => {
                if self.body_of(receiver.object).is_some() {
                    Some(receiver)
                } else if self.body_of(initiator.object).is_some() {
                    Some(initiator)
                } else {
                    None
                }
            }
        };

        let snapshot = match moving {
            Some(m) => {
                if self.locator(m.object).is_none() {
                    return Err(ConnectError::NotMovable(m.object).into());
                }
                Some((m.object, self.relative_pose(m.object)?))
            }
            None => None,
        };

        let result = self.pair(initiator, receiver, &init, &recv, moving);
        if result.is_err() {
            if let Some((object, pose)) = snapshot {
                self.set_pose(object, pose)?;
            }
        }
        result
    }

    fn pair(
        &mut self,
        initiator: ConnectorRef,
        receiver: ConnectorRef,
        init: &Connector,
        recv: &Connector,
        moving: Option<ConnectorRef>,
    ) -> Result<JointId, WorldError> {
        if let Some(m) = moving {
            let (stationary, still, moved) = if m == initiator {
                (receiver, recv, init)
            } else {
                (initiator, init, recv)
            };
            let anchor = self.connector_pose(stationary)?;
            let target = Pose::new(anchor.loc, flip(anchor.basis, still.flip_axis));
            self.set_absolute_pose(m.object, target.apply(&moved.pose.inverse()))?;
        }

        let body_a = self.body_of(initiator.object);
        let body_b = self.body_of(receiver.object);
        if body_a.is_none() && body_b.is_none() {
            return Err(ConnectError::NoEngineBody.into());
        }

        let frame = self.connector_pose(initiator)?;
        let (axis1, axis2) = init.joint_type.axes();
        let desc = JointDesc::new(init.joint_type.kind(), body_a, body_b)
            .with_anchor(frame.loc)
            .with_axes(frame.basis * axis1, frame.basis * axis2)
            .with_limits(init.joint_type.stops());
        let joint = self.engine_mut()?.create_joint(desc)?;

        self.with_connector_mut(initiator, |c| {
            c.pairing = Some(Pairing { peer: receiver, authoritative: true, joint: Some(joint) })
        })?;
        self.with_connector_mut(receiver, |c| {
            c.pairing = Some(Pairing { peer: initiator, authoritative: false, joint: None })
        })?;
        debug!("connected {} -> {} with {}", initiator, receiver, joint);
        Ok(joint)
    }

    /// Break a pairing from its authoritative side
    pub fn disconnect(&mut self, c: ConnectorRef) -> Result<(), WorldError> {
        let connector = self.connector(c)?;
        let pairing = connector.pairing.ok_or(ConnectError::NotPaired(c))?;
        if !pairing.authoritative {
            return Err(ConnectError::NotAuthoritative(c).into());
        }
        if let (Some(joint), Some(engine)) = (pairing.joint, self.physics.as_mut()) {
            // The joint is already gone if a body was destroyed under it
            let _ = engine.destroy_joint(joint);
        }
        for side in [c, pairing.peer] {
            let _ = self.with_connector_mut(side, |conn| {
                conn.pairing = None;
                conn.read_sensors(None);
            });
        }
        debug!("disconnected {} from {}", c, pairing.peer);
        Ok(())
    }

    /// Drop every pairing the object takes part in, on either side
    pub(crate) fn drop_pairings(&mut self, object: Entity) -> Result<(), WorldError> {
        for c in self.connector_refs(object) {
            if let Some(pairing) = self.connector(c)?.pairing {
                let owner = if pairing.authoritative { c } else { pairing.peer };
                self.disconnect(owner)?;
            }
        }
        Ok(())
    }

    /// Whether contacts between the two objects are suppressed by a pairing
    pub(crate) fn collision_suppressed(&self, a: Entity, b: Entity) -> bool {
        let Ok(cs) = self.ecs.get::<&Connectors>(a) else { return false };
        let suppressed = cs.iter().any(|(_, c)| match c.pairing {
            Some(p) if p.peer.object == b => {
                c.suppress_collisions
                    || self
                        .connector(p.peer)
                        .map(|peer| peer.suppress_collisions)
                        .unwrap_or(false)
            }
            _ => false,
        });
        suppressed
    }

    pub fn use_connector_control(&mut self, c: ConnectorRef, index: usize, value: f64) -> Result<(), WorldError> {
        if self.with_connector_mut(c, |conn| conn.controls.use_control(index, value))? {
            Ok(())
        } else {
            Err(WorldError::NoSuchControl(index))
        }
    }

    pub fn connector_control(&self, c: ConnectorRef, index: usize) -> Result<f64, WorldError> {
        self.connector(c)?
            .controls
            .control(index)
            .ok_or(WorldError::NoSuchControl(index))
    }

    pub fn connector_sensor(&self, c: ConnectorRef, index: usize) -> Result<f64, WorldError> {
        self.connector(c)?
            .controls
            .sensor(index)
            .ok_or(WorldError::NoSuchControl(index))
    }
}
