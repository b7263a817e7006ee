//! Control surface - a flat indexed array of named controls and sensors.
//!
//! Continuous controls latch the last value written. Pulse controls
//! accumulate every write and drop back to zero on `step`. Sensors are
//! read-only to users and written by whatever owns the surface.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMode {
    Continuous,
    Pulse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Control {
    pub name: String,
    pub mode: ControlMode,
    #[serde(default)]
    value: f64,
}

impl Control {
    pub fn value(&self) -> f64 {
        self.value
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub name: String,
    #[serde(default)]
    value: f64,
}

impl Sensor {
    pub fn value(&self) -> f64 {
        self.value
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlSurface {
    controls: Vec<Control>,
    sensors: Vec<Sensor>,
}

impl ControlSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_control(mut self, name: impl Into<String>, mode: ControlMode) -> Self {
        self.controls.push(Control {
            name: name.into(),
            mode,
            value: 0.0,
        });
        self
    }

    pub fn with_sensor(mut self, name: impl Into<String>) -> Self {
        self.sensors.push(Sensor {
            name: name.into(),
            value: 0.0,
        });
        self
    }

    pub fn controls(&self) -> &[Control] {
        &self.controls
    }

    pub fn sensors(&self) -> &[Sensor] {
        &self.sensors
    }

    pub fn control_index(&self, name: &str) -> Option<usize> {
        self.controls.iter().position(|c| c.name == name)
    }

    pub fn sensor_index(&self, name: &str) -> Option<usize> {
        self.sensors.iter().position(|s| s.name == name)
    }

    /// Write a control; returns false if the index is out of range
    pub fn use_control(&mut self, index: usize, value: f64) -> bool {
        match self.controls.get_mut(index) {
            Some(c) => {
                match c.mode {
                    ControlMode::Continuous => c.value = value,
                    ControlMode::Pulse => c.value += value,
                }
                true
            }
            None => false,
        }
    }

    pub fn control(&self, index: usize) -> Option<f64> {
        self.controls.get(index).map(|c| c.value)
    }

    pub fn sensor(&self, index: usize) -> Option<f64> {
        self.sensors.get(index).map(|s| s.value)
    }

    pub fn set_sensor(&mut self, index: usize, value: f64) -> bool {
        match self.sensors.get_mut(index) {
            Some(s) => {
                s.value = value;
                true
            }
            None => false,
        }
    }

    pub fn sensor_values(&self) -> Vec<f64> {
        self.sensors.iter().map(|s| s.value).collect()
    }

    pub fn zero_sensors(&mut self) {
        for s in &mut self.sensors {
            s.value = 0.0;
        }
    }

    /// End of tick: pulse controls decay to zero
    pub fn step(&mut self) {
        for c in &mut self.controls {
            if c.mode == ControlMode::Pulse {
                c.value = 0.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface() -> ControlSurface {
        ControlSurface::new()
            .with_control("throttle", ControlMode::Continuous)
            .with_control("kick", ControlMode::Pulse)
            .with_sensor("speed")
    }

    #[test]
    fn test_pulse_accumulates_then_decays() {
        let mut s = surface();
        assert!(s.use_control(1, 1.5));
        assert!(s.use_control(1, 1.5));
        assert_eq!(s.control(1), Some(3.0));
        s.step();
        assert_eq!(s.control(1), Some(0.0));
    }

    #[test]
    fn test_continuous_latches() {
        let mut s = surface();
        s.use_control(0, 0.4);
        s.use_control(0, 0.7);
        s.step();
        assert_eq!(s.control(0), Some(0.7));
    }

    #[test]
    fn test_lookup_and_bounds() {
        let mut s = surface();
        assert_eq!(s.control_index("kick"), Some(1));
        assert_eq!(s.sensor_index("speed"), Some(0));
        assert_eq!(s.control_index("missing"), None);
        assert!(!s.use_control(9, 1.0));
        assert!(s.set_sensor(0, 12.0));
        assert_eq!(s.sensor_values(), vec![12.0]);
        s.zero_sensors();
        assert_eq!(s.sensor(0), Some(0.0));
    }
}
