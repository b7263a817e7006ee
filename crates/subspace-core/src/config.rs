//! World-wide simulation settings.
//!
//! Every field has a default, so a JSON document only needs to name the
//! values it changes: `{"gravity": [0.0, 0.0, 0.0]}` is a complete config.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::physics::EngineParams;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Absolute gravity applied to every engine body
    pub gravity: DVec3,
    pub solver_iterations: u32,
    /// Error reduction: fraction of joint drift corrected per step
    pub erp: f64,
    /// Penetration depth contacts tolerate before pushing apart
    pub contact_slop: f64,
    /// Contact points kept per colliding pair; extras are dropped
    pub max_contacts_per_pair: usize,
    /// Engine-body speeds below this snap to zero during drag
    pub rest_velocity_epsilon: f64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        let engine = EngineParams::default();
        Self {
            gravity: engine.gravity,
            solver_iterations: engine.iterations,
            erp: engine.erp,
            contact_slop: engine.slop,
            max_contacts_per_pair: 8,
            rest_velocity_epsilon: 1.0e-6,
        }
    }
}

impl WorldConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: WorldConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_gravity(mut self, gravity: DVec3) -> Self {
        self.gravity = gravity;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.solver_iterations == 0 {
            return Err(ConfigError::Invalid("solver_iterations must be at least 1"));
        }
        if !(self.erp > 0.0 && self.erp <= 1.0) {
            return Err(ConfigError::Invalid("erp must be in (0, 1]"));
        }
        if self.max_contacts_per_pair == 0 {
            return Err(ConfigError::Invalid("max_contacts_per_pair must be at least 1"));
        }
        if self.contact_slop < 0.0 || self.rest_velocity_epsilon < 0.0 {
            return Err(ConfigError::Invalid("tolerances cannot be negative"));
        }
        Ok(())
    }

    pub fn engine_params(&self) -> EngineParams {
        EngineParams {
            gravity: self.gravity,
            iterations: self.solver_iterations,
            erp: self.erp,
            slop: self.contact_slop,
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Json(serde_json::Error),
    Invalid(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Json(e) => write!(f, "config parse error: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Json(e)
    }
}
