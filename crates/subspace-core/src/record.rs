//! Text snapshots of object state for record and playback.
//!
//! A block looks like:
//!
//! ```text
//! #BEGIN SUBSPACE SNAPSHOT 1
//! /cart.locator: 1 0 0 1 0 0 0 1 0 0 0 1
//! /cart.actor_sensors: 0.5
//! /cart/arm@0.actor_sensors: -0.25 0
//! #END SUBSPACE SNAPSHOT 1
//! ```
//!
//! `locator` carries the position followed by the basis rows. Objects are
//! addressed by absolute path and connectors by `<path>@<id>`. Records that
//! cannot be applied are skipped and counted; only a broken header, trailer
//! or version rejects the whole block.

use std::fmt;
use std::fmt::Write as _;
use std::ops::BitOr;

use glam::{DMat3, DVec3};
use hecs::Entity;
use log::warn;

use crate::connector::{ConnectorRef, Connectors};
use crate::controls::ControlSurface;
use crate::math::Pose;
use crate::world::World;

pub const SNAPSHOT_VERSION: u32 = 1;

const HEADER: &str = "#BEGIN SUBSPACE SNAPSHOT";
const TRAILER: &str = "#END SUBSPACE SNAPSHOT";

/// Which properties a snapshot writes or accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyMask(u8);

impl PropertyMask {
    pub const NONE: PropertyMask = PropertyMask(0);
    pub const LOCATOR: PropertyMask = PropertyMask(1);
    pub const ACTOR_SENSORS: PropertyMask = PropertyMask(1 << 1);
    pub const ALL: PropertyMask = PropertyMask(0b11);

    pub fn contains(self, other: PropertyMask) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PropertyMask {
    type Output = PropertyMask;

    fn bitor(self, rhs: PropertyMask) -> PropertyMask {
        PropertyMask(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    MissingHeader,
    MissingTrailer,
    VersionMismatch { expected: u32, found: String },
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::MissingHeader => write!(f, "snapshot block has no header"),
            SnapshotError::MissingTrailer => write!(f, "snapshot block has no trailer"),
            SnapshotError::VersionMismatch { expected, found } => {
                write!(f, "snapshot version mismatch: expected {}, found {}", expected, found)
            }
        }
    }
}

impl std::error::Error for SnapshotError {}

/// Outcome of applying one block
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    pub applied: usize,
    pub skipped: usize,
}

fn join(values: impl IntoIterator<Item = f64>) -> String {
    values.into_iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" ")
}

fn pose_values(pose: &Pose) -> Vec<f64> {
    let rows = pose.basis.transpose();
    let mut values = pose.loc.to_array().to_vec();
    for row in [rows.x_axis, rows.y_axis, rows.z_axis] {
        values.extend(row.to_array());
    }
    values
}

fn pose_from_values(v: &[f64]) -> Option<Pose> {
    if v.len() != 12 {
        return None;
    }
    let rows = DMat3::from_cols(
        DVec3::new(v[3], v[4], v[5]),
        DVec3::new(v[6], v[7], v[8]),
        DVec3::new(v[9], v[10], v[11]),
    );
    Some(Pose::new(DVec3::new(v[0], v[1], v[2]), rows.transpose()))
}

fn check_version(line: Option<&str>, marker: &str, missing: SnapshotError) -> Result<(), SnapshotError> {
    let rest = line
        .and_then(|l| l.trim().strip_prefix(marker))
        .ok_or(missing)?
        .trim();
    if rest.parse::<u32>().ok() != Some(SNAPSHOT_VERSION) {
        return Err(SnapshotError::VersionMismatch {
            expected: SNAPSHOT_VERSION,
            found: rest.to_string(),
        });
    }
    Ok(())
}

impl World {
    /// One snapshot block for `object` and every named descendant
    pub fn write_snapshot(&self, object: Entity, mask: PropertyMask) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} {}", HEADER, SNAPSHOT_VERSION);
        for e in self.subtree(object) {
            let Some(path) = self.path_of(e) else { continue };
            if mask.contains(PropertyMask::LOCATOR) && self.locator(e).is_some() {
                if let Ok(pose) = self.relative_pose(e) {
                    let _ = writeln!(out, "{}.locator: {}", path, join(pose_values(&pose)));
                }
            }
            if !mask.contains(PropertyMask::ACTOR_SENSORS) {
                continue;
            }
            if let Some(controls) = self.controls(e) {
                if !controls.sensors().is_empty() {
                    let _ = writeln!(out, "{}.actor_sensors: {}", path, join(controls.sensor_values()));
                }
            }
            if let Some(connectors) = self.connectors(e) {
                for (id, c) in connectors.iter() {
                    if !c.controls.sensors().is_empty() {
                        let _ = writeln!(out, "{}@{}.actor_sensors: {}", path, id, join(c.controls.sensor_values()));
                    }
                }
            }
        }
        let _ = writeln!(out, "{} {}", TRAILER, SNAPSHOT_VERSION);
        out
    }

    /// Apply one snapshot block. Properties outside `mask` count as skipped.
    pub fn read_snapshot(&mut self, text: &str, mask: PropertyMask) -> Result<SnapshotStats, SnapshotError> {
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        check_version(lines.first().copied(), HEADER, SnapshotError::MissingHeader)?;
        if lines.len() < 2 {
            return Err(SnapshotError::MissingTrailer);
        }
        check_version(lines.last().copied(), TRAILER, SnapshotError::MissingTrailer)?;

        let mut stats = SnapshotStats::default();
        for line in &lines[1..lines.len() - 1] {
            if self.apply_record(line, mask) {
                stats.applied += 1;
            } else {
                warn!("skipped snapshot record: {}", line);
                stats.skipped += 1;
            }
        }
        Ok(stats)
    }

    fn apply_record(&mut self, line: &str, mask: PropertyMask) -> bool {
        let Some((target, values)) = line.split_once(':') else {
            return false;
        };
        let Some((target, property)) = target.trim().rsplit_once('.') else {
            return false;
        };
        let values: Option<Vec<f64>> = values.split_whitespace().map(|v| v.parse().ok()).collect();
        let Some(values) = values else {
            return false;
        };

        let (path, connector) = match target.rsplit_once('@') {
            Some((path, id)) => match id.parse::<u32>() {
                Ok(id) => (path, Some(id)),
                Err(_) => return false,
            },
            None => (target, None),
        };
        let Ok(object) = self.find_path(path) else {
            return false;
        };

        match (property, connector) {
            ("locator", None) if mask.contains(PropertyMask::LOCATOR) => match pose_from_values(&values) {
                Some(pose) => self.locator(object).is_some() && self.set_pose(object, pose).is_ok(),
                None => false,
            },
            ("actor_sensors", None) if mask.contains(PropertyMask::ACTOR_SENSORS) => {
                match self.ecs.get::<&mut ControlSurface>(object) {
                    Ok(mut controls) => write_sensors(&mut controls, &values),
                    Err(_) => false,
                }
            }
            ("actor_sensors", Some(id)) if mask.contains(PropertyMask::ACTOR_SENSORS) => {
                let c = ConnectorRef::new(object, id);
                match self.ecs.get::<&mut Connectors>(c.object) {
                    Ok(mut cs) => cs
                        .get_mut(c.id)
                        .map(|conn| write_sensors(&mut conn.controls, &values))
                        .unwrap_or(false),
                    Err(_) => false,
                }
            }
            _ => false,
        }
    }
}

fn write_sensors(controls: &mut ControlSurface, values: &[f64]) -> bool {
    if values.len() != controls.sensors().len() {
        return false;
    }
    for (i, v) in values.iter().enumerate() {
        controls.set_sensor(i, *v);
    }
    true
}

/// Appends one block per call
#[derive(Debug, Clone)]
pub struct Recorder {
    mask: PropertyMask,
    text: String,
    blocks: usize,
}

impl Recorder {
    pub fn new(mask: PropertyMask) -> Self {
        Self {
            mask,
            text: String::new(),
            blocks: 0,
        }
    }

    pub fn record(&mut self, world: &World, object: Entity) {
        self.text.push_str(&world.write_snapshot(object, self.mask));
        self.blocks += 1;
    }

    pub fn blocks(&self) -> usize {
        self.blocks
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

/// Replays a recording one block per call
#[derive(Debug, Clone)]
pub struct Playback {
    mask: PropertyMask,
    blocks: Vec<String>,
    next: usize,
}

impl Playback {
    /// Split a recording into blocks at each header line
    pub fn new(recording: &str, mask: PropertyMask) -> Self {
        let mut blocks: Vec<String> = Vec::new();
        for line in recording.lines() {
            if line.trim_start().starts_with(HEADER) || blocks.is_empty() {
                blocks.push(String::new());
            }
            if let Some(block) = blocks.last_mut() {
                block.push_str(line);
                block.push('\n');
            }
        }
        blocks.retain(|b| !b.trim().is_empty());
        Self { mask, blocks, next: 0 }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.blocks.len() - self.next
    }

    /// Apply the next block; `None` once the recording is exhausted
    pub fn apply_next(&mut self, world: &mut World) -> Option<Result<SnapshotStats, SnapshotError>> {
        let block = self.blocks.get(self.next)?;
        self.next += 1;
        Some(world.read_snapshot(block, self.mask))
    }

    pub fn rewind(&mut self) {
        self.next = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::Subspace;
    use crate::config::WorldConfig;
    use crate::connector::{hinge, Connector, JointType};
    use crate::controls::ControlMode;
    use crate::locator::{Locator, MovingLocator};
    use crate::world::ObjectDesc;

    fn scene() -> (World, Entity, Entity) {
        let mut w = World::new(WorldConfig::default());
        let root = w.root();
        let cart = w
            .spawn_in(
                root,
                ObjectDesc::named("cart")
                    .with_subspace(Subspace::new())
                    .with_locator(Locator::Moving(MovingLocator::new(Pose::from_axis_angle(
                        DVec3::new(1.0, 2.0, 3.0),
                        DVec3::Z,
                        0.3,
                    ))))
                    .with_controls(ControlSurface::new().with_sensor("speed").with_sensor("heading")),
            )
            .unwrap();
        let arm = w
            .spawn_in(
                cart,
                ObjectDesc::named("arm")
                    .with_locator(Pose::from_loc(DVec3::X))
                    .with_connector(0, Connector::new(Pose::IDENTITY, JointType::hinge(DVec3::Z))),
            )
            .unwrap();
        (w, cart, arm)
    }

    #[test]
    fn test_write_format() {
        let (mut w, cart, _) = scene();
        w.set_sensor(cart, 0, 0.5).unwrap();
        let text = w.write_snapshot(w.root(), PropertyMask::ALL);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "#BEGIN SUBSPACE SNAPSHOT 1");
        assert!(lines[1].starts_with("/cart.locator: 1 2 3 "));
        assert_eq!(lines[2], "/cart.actor_sensors: 0.5 0");
        assert_eq!(lines[3], "/cart/arm.locator: 1 0 0 1 0 0 0 1 0 0 0 1");
        assert_eq!(lines[4], "/cart/arm@0.actor_sensors: 0 0");
        assert_eq!(lines[5], "#END SUBSPACE SNAPSHOT 1");

        let only_poses = w.write_snapshot(w.root(), PropertyMask::LOCATOR);
        assert!(!only_poses.contains("actor_sensors"));
    }

    #[test]
    fn test_round_trip_skips_unknown_entries() {
        let (mut w, cart, _) = scene();
        w.set_sensor(cart, 1, -2.5).unwrap();
        let mut text = w.write_snapshot(w.root(), PropertyMask::ALL);
        text = text.replace("/cart/arm@0.actor_sensors: 0 0", "/cart/arm@0.actor_sensors: 0.75 0");
        text = text.replace(
            "#END",
            "/ghost.locator: 0 0 0 1 0 0 0 1 0 0 0 1\n/cart.colour: 1 2\n/cart.locator: nonsense\n#END",
        );

        let (mut other, cart2, arm2) = scene();
        let stats = other.read_snapshot(&text, PropertyMask::ALL).unwrap();
        assert_eq!(stats, SnapshotStats { applied: 4, skipped: 3 });
        assert!(other
            .relative_pose(cart2)
            .unwrap()
            .abs_diff_eq(&w.relative_pose(cart).unwrap(), 1.0e-15));
        assert_eq!(other.controls(cart2).unwrap().sensor(1), Some(-2.5));
        assert_eq!(other.connector_sensor(ConnectorRef::new(arm2, 0), hinge::ANGLE), Ok(0.75));
    }

    #[test]
    fn test_block_rejections() {
        let (mut w, _, _) = scene();
        assert_eq!(w.read_snapshot("/cart.locator: 0", PropertyMask::ALL), Err(SnapshotError::MissingHeader));
        assert_eq!(
            w.read_snapshot("#BEGIN SUBSPACE SNAPSHOT 1\n/cart.actor_sensors: 1 1\n", PropertyMask::ALL),
            Err(SnapshotError::MissingTrailer)
        );
        assert_eq!(
            w.read_snapshot("#BEGIN SUBSPACE SNAPSHOT 7\n#END SUBSPACE SNAPSHOT 7\n", PropertyMask::ALL),
            Err(SnapshotError::VersionMismatch { expected: 1, found: "7".into() })
        );
    }

    #[test]
    fn test_recorder_and_playback() {
        let mut w = World::new(WorldConfig::default());
        let root = w.root();
        let puck = w
            .spawn_in(
                root,
                ObjectDesc::named("puck")
                    .with_locator(Locator::Moving(MovingLocator::new(Pose::IDENTITY).with_velocity(DVec3::X)))
                    .with_controls(ControlSurface::new().with_control("push", ControlMode::Pulse)),
            )
            .unwrap();
        let mut recorder = Recorder::new(PropertyMask::LOCATOR);
        for _ in 0..3 {
            w.tick(1.0).unwrap();
            recorder.record(&w, root);
        }
        assert_eq!(recorder.blocks(), 3);

        let mut replay = World::new(WorldConfig::default());
        let ghost = replay
            .spawn_in(replay.root(), ObjectDesc::named("puck").with_locator(Pose::IDENTITY))
            .unwrap();
        let mut playback = Playback::new(recorder.as_str(), PropertyMask::LOCATOR);
        assert_eq!(playback.len(), 3);
        for expected in 1..=3 {
            let stats = playback.apply_next(&mut replay).unwrap().unwrap();
            assert_eq!(stats.applied, 1);
            assert_eq!(replay.relative_pose(ghost).unwrap().loc.x, expected as f64);
        }
        assert!(playback.apply_next(&mut replay).is_none());
        assert_eq!(w.relative_pose(puck).unwrap().loc.x, 3.0);
    }
}
