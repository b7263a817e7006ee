//! Error types for tree edits, locators, connectors and the physics runtime

use hecs::Entity;

use crate::connector::{ConnectorRef, Role};
use crate::locator::LocatorKind;
use crate::physics::{BodyId, GeomId, JointId, SpaceId};

/// Operations a locator variant cannot perform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatorError {
    /// The variant does not carry the state the operation needs
    Unsupported { op: &'static str, kind: LocatorKind },
    /// `step` called without a preceding `prepare`
    NotPrepared,
    /// Motion state requested from an engine locator that is not bound to a body
    Inactive,
}

impl std::fmt::Display for LocatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocatorError::Unsupported { op, kind } => {
                write!(f, "{} is not supported by a {:?} locator", op, kind)
            }
            LocatorError::NotPrepared => write!(f, "locator stepped without prepare"),
            LocatorError::Inactive => write!(f, "engine locator is not active"),
        }
    }
}

impl std::error::Error for LocatorError {}

/// Failures reported by the physics runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineError {
    NoSuchBody(BodyId),
    NoSuchJoint(JointId),
    NoSuchGeom(GeomId),
    NoSuchSpace(SpaceId),
    /// A joint needs at least one body; both sides were the static world
    NoBodies,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NoSuchBody(id) => write!(f, "no such body: {}", id),
            EngineError::NoSuchJoint(id) => write!(f, "no such joint: {}", id),
            EngineError::NoSuchGeom(id) => write!(f, "no such geom: {}", id),
            EngineError::NoSuchSpace(id) => write!(f, "no such space: {}", id),
            EngineError::NoBodies => write!(f, "joint must attach at least one body"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Connector pairing failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    NoSuchConnector(ConnectorRef),
    AlreadyPaired(ConnectorRef),
    RoleMismatch { initiator: Role, receiver: Role },
    IncompatibleJoint,
    SameObject,
    /// Neither side has an active engine body to build the joint on
    NoEngineBody,
    /// The side chosen for alignment has no locator to move
    NotMovable(Entity),
    NotPaired(ConnectorRef),
    NotAuthoritative(ConnectorRef),
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectError::NoSuchConnector(c) => write!(f, "no such connector: {}", c),
            ConnectError::AlreadyPaired(c) => write!(f, "connector {} is already paired", c),
            ConnectError::RoleMismatch { initiator, receiver } => write!(
                f,
                "role mismatch: {:?} cannot initiate with {:?}",
                initiator, receiver
            ),
            ConnectError::IncompatibleJoint => write!(f, "connectors carry different joint types"),
            ConnectError::SameObject => write!(f, "cannot connect an object to itself"),
            ConnectError::NoEngineBody => write!(f, "neither side is bound to a physics body"),
            ConnectError::NotMovable(e) => write!(f, "object {:?} has no locator to align", e),
            ConnectError::NotPaired(c) => write!(f, "connector {} is not paired", c),
            ConnectError::NotAuthoritative(c) => {
                write!(f, "connector {} is not the initiating side", c)
            }
        }
    }
}

impl std::error::Error for ConnectError {}

/// Errors raised by [`crate::world::World`] operations
#[derive(Debug, Clone, PartialEq)]
pub enum WorldError {
    NoSuchObject(Entity),
    NotASubspace(Entity),
    AlreadyContained { object: Entity, container: Entity },
    NotContained(Entity),
    /// Inserting would make an object its own ancestor
    Cycle { object: Entity, container: Entity },
    /// The root cannot be moved or destroyed
    IsRoot,
    /// The object (or a descendant) is bound to the physics engine
    Locked(Entity),
    /// A transform walk reached an object with no container
    Detached(Entity),
    NotAncestor { object: Entity, ancestor: Entity },
    NoLocator(Entity),
    /// The world was built without a physics runtime
    NoPhysics,
    /// Collision mirroring has not been enabled
    NoCollisions,
    /// `step` called without a preceding `prepare`
    NotPrepared,
    NoSuchControl(usize),
    UnknownPath(String),
    /// The object needs a path but it or a container has no name
    Unnamed(Entity),
    /// Names are path segments and cannot hold `/`, `@`, `:` or `.`
    BadName(String),
    Locator(LocatorError),
    Connect(ConnectError),
    Engine(EngineError),
}

impl std::fmt::Display for WorldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorldError::NoSuchObject(e) => write!(f, "no such object: {:?}", e),
            WorldError::NotASubspace(e) => write!(f, "object {:?} is not a subspace", e),
            WorldError::AlreadyContained { object, container } => write!(
                f,
                "object {:?} is already contained in {:?}",
                object, container
            ),
            WorldError::NotContained(e) => write!(f, "object {:?} has no container", e),
            WorldError::Cycle { object, container } => write!(
                f,
                "inserting {:?} into {:?} would create a cycle",
                object, container
            ),
            WorldError::IsRoot => write!(f, "operation not allowed on the world root"),
            WorldError::Locked(e) => write!(f, "object {:?} is locked by the physics engine", e),
            WorldError::Detached(e) => write!(f, "object {:?} is not attached to the world", e),
            WorldError::NotAncestor { object, ancestor } => {
                write!(f, "{:?} is not an ancestor of {:?}", ancestor, object)
            }
            WorldError::NoLocator(e) => write!(f, "object {:?} has no locator", e),
            WorldError::NoPhysics => write!(f, "world has no physics runtime"),
            WorldError::NoCollisions => write!(f, "collisions are not enabled"),
            WorldError::NotPrepared => write!(f, "world stepped without prepare"),
            WorldError::NoSuchControl(i) => write!(f, "no such control or sensor: {}", i),
            WorldError::UnknownPath(p) => write!(f, "unknown object path: {}", p),
            WorldError::Unnamed(e) => write!(f, "object {:?} has no path", e),
            WorldError::BadName(n) => write!(f, "object name {:?} is not a valid path segment", n),
            WorldError::Locator(e) => write!(f, "locator error: {}", e),
            WorldError::Connect(e) => write!(f, "connect error: {}", e),
            WorldError::Engine(e) => write!(f, "physics error: {}", e),
        }
    }
}

impl std::error::Error for WorldError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorldError::Locator(e) => Some(e),
            WorldError::Connect(e) => Some(e),
            WorldError::Engine(e) => Some(e),
            _ => None,
        }
    }
}

impl From<LocatorError> for WorldError {
    fn from(e: LocatorError) -> Self {
        WorldError::Locator(e)
    }
}

impl From<ConnectError> for WorldError {
    fn from(e: ConnectError) -> Self {
        WorldError::Connect(e)
    }
}

impl From<EngineError> for WorldError {
    fn from(e: EngineError) -> Self {
        WorldError::Engine(e)
    }
}
