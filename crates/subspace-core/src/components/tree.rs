//! Tree components: names, container back-references and subspaces.

use std::collections::BTreeMap;

use glam::DVec3;
use hecs::Entity;
use serde::{Deserialize, Serialize};

/// Human-readable name; builds the '/'-separated absolute path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Name(pub String);

impl Name {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Present on every object: its container (lookup only) and lock count
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Node {
    pub parent: Option<Entity>,
    /// Number of active engine locators at or below this node
    pub locks: u32,
}

impl Node {
    pub fn is_locked(&self) -> bool {
        self.locks > 0
    }
}

/// How a subspace advances its direct children each tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Integrator {
    /// Prepare and step every child in insertion order
    #[default]
    Sequential,
    /// Children (and their subtrees) do not advance
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LightKind {
    Directional { direction: DVec3 },
    Point { position: DVec3 },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Light {
    pub kind: LightKind,
    pub color: [f32; 3],
    pub intensity: f32,
}

/// Rendering environment of a subspace: lights plus named state toggles
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Environment {
    pub lights: Vec<Light>,
    pub toggles: BTreeMap<String, bool>,
}

impl Environment {
    pub fn with_light(mut self, light: Light) -> Self {
        self.lights.push(light);
        self
    }

    pub fn with_toggle(mut self, name: impl Into<String>, on: bool) -> Self {
        self.toggles.insert(name.into(), on);
        self
    }

    /// Environment seen inside `inner` when nested in `self`
    pub fn compose(&self, inner: &Environment) -> Environment {
        let mut lights = self.lights.clone();
        lights.extend(inner.lights.iter().copied());
        let mut toggles = self.toggles.clone();
        for (k, v) in &inner.toggles {
            toggles.insert(k.clone(), *v);
        }
        Environment { lights, toggles }
    }
}

/// Container capability: ordered children, environment, integrator
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subspace {
    pub children: Vec<Entity>,
    pub environment: Environment,
    pub integrator: Integrator,
}

impl Subspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_integrator(mut self, integrator: Integrator) -> Self {
        self.integrator = integrator;
        self
    }
}
