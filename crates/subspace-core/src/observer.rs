//! Lifecycle notifications.
//!
//! Observers hear about a change *before* it happens, so they can still read
//! the old state through the world they were given the entity for.

use hecs::Entity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectEvent {
    AboutToDestruct,
    LocatorAboutToChange,
    VisualAboutToChange,
    GeometryAboutToChange,
    ContainerAboutToChange { from: Option<Entity>, to: Option<Entity> },
}

pub trait ObjectObserver {
    fn notify(&mut self, object: Entity, event: &ObjectEvent);
}

impl<F> ObjectObserver for F
where
    F: FnMut(Entity, &ObjectEvent),
{
    fn notify(&mut self, object: Entity, event: &ObjectEvent) {
        self(object, event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u32);

struct Entry {
    id: ObserverId,
    /// `None` watches every object
    target: Option<Entity>,
    observer: Box<dyn ObjectObserver>,
}

/// Registry of observers, notified in registration order
#[derive(Default)]
pub struct Observers {
    next: u32,
    entries: Vec<Entry>,
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers").field("count", &self.entries.len()).finish()
    }
}

impl Observers {
    pub fn watch(&mut self, target: Option<Entity>, observer: Box<dyn ObjectObserver>) -> ObserverId {
        let id = ObserverId(self.next);
        self.next += 1;
        self.entries.push(Entry { id, target, observer });
        id
    }

    pub fn unwatch(&mut self, id: ObserverId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    /// Drop observers bound to a destroyed object
    pub fn forget(&mut self, object: Entity) {
        self.entries.retain(|e| e.target != Some(object));
    }

    pub fn notify(&mut self, object: Entity, event: ObjectEvent) {
        for entry in &mut self.entries {
            if entry.target.map_or(true, |t| t == object) {
                entry.observer.notify(object, &event);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
