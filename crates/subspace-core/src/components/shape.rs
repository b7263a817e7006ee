//! Visual and collision descriptors attached to objects.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::math::Pose;

/// Closed set of primitive shapes used by both visuals and collision
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    Sphere { radius: f64 },
    Box { half_extents: DVec3 },
    /// Capsule along the local z axis
    Capsule { radius: f64, half_length: f64 },
    /// Half-space `normal . x <= offset` (static only)
    Plane { normal: DVec3, offset: f64 },
}

impl Shape {
    pub fn sphere(radius: f64) -> Self {
        Shape::Sphere { radius }
    }

    pub fn cuboid(x: f64, y: f64, z: f64) -> Self {
        Shape::Box {
            half_extents: DVec3::new(x, y, z) * 0.5,
        }
    }

    pub fn capsule(radius: f64, length: f64) -> Self {
        Shape::Capsule {
            radius,
            half_length: length * 0.5,
        }
    }

    pub fn ground() -> Self {
        Shape::Plane {
            normal: DVec3::Z,
            offset: 0.0,
        }
    }

    /// Whether the shape can only exist without a body
    pub fn is_unbounded(&self) -> bool {
        matches!(self, Shape::Plane { .. })
    }
}

/// Drawing descriptor; opaque to the simulation core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Visual {
    pub shape: Shape,
    pub color: [f32; 4],
}

impl Visual {
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            color: [0.8, 0.8, 0.8, 1.0],
        }
    }

    pub fn with_color(mut self, color: [f32; 4]) -> Self {
        self.color = color;
        self
    }
}

/// Surface response used when combining two touching geometries
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceMaterial {
    pub friction: f64,
    pub bounce: f64,
    /// Approach speed below which a contact does not bounce
    pub bounce_velocity: f64,
}

impl Default for SurfaceMaterial {
    fn default() -> Self {
        Self {
            friction: 1.0,
            bounce: 0.0,
            bounce_velocity: 0.0,
        }
    }
}

impl SurfaceMaterial {
    /// Friction and bounce multiply; the bounce threshold adds
    pub fn combine(&self, other: &SurfaceMaterial) -> SurfaceMaterial {
        SurfaceMaterial {
            friction: self.friction * other.friction,
            bounce: self.bounce * other.bounce,
            bounce_velocity: self.bounce_velocity + other.bounce_velocity,
        }
    }
}

/// Collision descriptor: shape placed at `offset` in the object's frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub shape: Shape,
    #[serde(default)]
    pub material: SurfaceMaterial,
    #[serde(default)]
    pub offset: Pose,
}

impl Geometry {
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            material: SurfaceMaterial::default(),
            offset: Pose::IDENTITY,
        }
    }

    pub fn with_material(mut self, material: SurfaceMaterial) -> Self {
        self.material = material;
        self
    }

    pub fn with_offset(mut self, offset: Pose) -> Self {
        self.offset = offset;
        self
    }
}
