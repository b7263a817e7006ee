//! Subspace Core - Hierarchical 3D Simulation World
//!
//! A tree of objects nested in subspaces, each placed by a locator relative
//! to its container, with engine-backed locators handing their motion to a
//! rigid-body physics runtime.
//!
//! # Architecture
//!
//! Objects are `hecs` entities; capabilities are components:
//! - **Locator**: where the object sits ([`locator`])
//! - **Subspace**: ordered children, environment, integrator ([`components`])
//! - **Visual / Geometry**: drawing and collision descriptors
//! - **Connectors / ControlSurface**: joints to other objects, controls and sensors
//!
//! [`world::World`] owns the tree, the optional [`physics::PhysicsEngine`]
//! and, once enabled, the [`collision::CollisionSync`] mirror. Time advances
//! in two phases: `prepare(dt)` computes tentative state, `step()` commits it.
//!
//! # Example
//!
//! ```rust,no_run
//! use subspace_core::prelude::*;
//!
//! let mut world = World::with_physics(WorldConfig::default());
//! let root = world.root();
//! let ball = world
//!     .spawn_in(
//!         root,
//!         ObjectDesc::named("ball")
//!             .with_locator(Locator::engine(Pose::from_loc(DVec3::Z), Inertia::new(1.0, 0.4)))
//!             .with_geometry(Geometry::new(Shape::sphere(0.5))),
//!     )
//!     .unwrap();
//! world.activate(ball).unwrap();
//!
//! loop {
//!     world.tick(1.0 / 60.0).unwrap();
//! }
//! ```

pub mod collision;
pub mod components;
pub mod config;
pub mod connector;
pub mod controls;
pub mod error;
pub mod locator;
pub mod math;
pub mod observer;
pub mod persistence;
pub mod physics;
pub mod record;
pub mod render;
pub mod scene;
pub mod world;

/// Commonly used types for convenient importing
pub mod prelude {
    pub use crate::components::*;
    pub use crate::config::WorldConfig;
    pub use crate::connector::{Connector, ConnectorRef, JointType, Role};
    pub use crate::controls::{ControlMode, ControlSurface};
    pub use crate::error::WorldError;
    pub use crate::locator::{Drag, Inertia, Locator};
    pub use crate::math::Pose;
    pub use crate::scene::SceneDesc;
    pub use crate::world::{Align, ObjectDesc, World};
    pub use glam::{DMat3, DVec3};
}
