//! Save/load world state using bincode.
//!
//! A save is a versioned [`SceneDesc`]: the whole tree, active engine state
//! and connector pairings. Loading rebuilds a fresh world from it.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::WorldError;
use crate::scene::SceneDesc;
use crate::world::World;

/// Save format version for forward compatibility
const SAVE_VERSION: u32 = 1;

/// Complete saveable world state
#[derive(Serialize, Deserialize)]
struct SaveData {
    version: u32,
    ticks: u64,
    scene: SceneDesc,
}

/// Save a world to a writer
pub fn save_scene<W: Write>(world: &World, writer: W) -> Result<(), SaveError> {
    let save_data = SaveData {
        version: SAVE_VERSION,
        ticks: world.ticks(),
        scene: world.to_scene()?,
    };
    bincode::serialize_into(writer, &save_data)?;
    Ok(())
}

/// Load a world from a reader
pub fn load_scene<R: Read>(reader: R) -> Result<World, SaveError> {
    let save_data: SaveData = bincode::deserialize_from(reader)?;

    if save_data.version != SAVE_VERSION {
        return Err(SaveError::VersionMismatch {
            expected: SAVE_VERSION,
            found: save_data.version,
        });
    }

    let mut world = World::from_scene(&save_data.scene)?;
    world.restore_ticks(save_data.ticks);
    Ok(world)
}

impl World {
    pub fn save<W: Write>(&self, writer: W) -> Result<(), SaveError> {
        save_scene(self, writer)
    }

    pub fn load<R: Read>(reader: R) -> Result<World, SaveError> {
        load_scene(reader)
    }
}

#[derive(Debug)]
pub enum SaveError {
    Io(std::io::Error),
    Bincode(Box<bincode::ErrorKind>),
    VersionMismatch { expected: u32, found: u32 },
    World(WorldError),
}

impl From<std::io::Error> for SaveError {
    fn from(e: std::io::Error) -> Self {
        SaveError::Io(e)
    }
}

impl From<Box<bincode::ErrorKind>> for SaveError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        SaveError::Bincode(e)
    }
}

impl From<WorldError> for SaveError {
    fn from(e: WorldError) -> Self {
        SaveError::World(e)
    }
}

impl std::fmt::Display for SaveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveError::Io(e) => write!(f, "IO error: {}", e),
            SaveError::Bincode(e) => write!(f, "Serialization error: {}", e),
            SaveError::VersionMismatch { expected, found } => {
                write!(f, "Save version mismatch: expected {}, found {}", expected, found)
            }
            SaveError::World(e) => write!(f, "World error: {}", e),
        }
    }
}

impl std::error::Error for SaveError {}
