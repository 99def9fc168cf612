//! Change notifications for views, plots and other observers.
//!
//! The merge engine and the local edit path never call into observers.
//! They push typed [`Event`]s onto an [`EventQueue`] that the owner of the
//! tree drains whenever it suits the presentation layer.

use std::collections::VecDeque;

use jsonwatch_path::Path;

use crate::tree::{EntryId, ItemValue};

/// Where a value change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Merged from a device line.
    Device,
    /// Applied optimistically from a local edit, ahead of the device echo.
    Local,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    NodeCreated { path: Path, id: EntryId },
    ItemCreated { path: Path, id: EntryId },
    ValueChanged { path: Path, id: EntryId, value: ItemValue, origin: Origin },
}

impl Event {
    pub fn path(&self) -> &Path {
        match self {
            Event::NodeCreated { path, .. }
            | Event::ItemCreated { path, .. }
            | Event::ValueChanged { path, .. } => path,
        }
    }

    pub fn id(&self) -> EntryId {
        match self {
            Event::NodeCreated { id, .. }
            | Event::ItemCreated { id, .. }
            | Event::ValueChanged { id, .. } => *id,
        }
    }
}

/// FIFO of pending notifications.
#[derive(Debug, Default)]
pub struct EventQueue {
    queue: VecDeque<Event>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        self.queue.push_back(event);
    }

    pub fn pop(&mut self) -> Option<Event> {
        self.queue.pop_front()
    }

    /// Take every pending event, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = Event> + '_ {
        self.queue.drain(..)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
