//! Identifier-ordered storage for clients.
//!
//! Entries live in a vector kept sorted by id, so lookups are a binary search
//! and iteration is always in ascending id order.

use std::{ops::Range, sync::Arc};

use log::debug;
use parking_lot::RwLock;

use crate::snowflake::{Identified, Snowflake};

#[derive(Debug)]
pub struct ClientDictionary<C> {
    elements: Vec<Arc<C>>,
}

impl<C> Default for ClientDictionary<C> {
    fn default() -> Self {
        Self {
            elements: Vec::new(),
        }
    }
}

impl<C: Identified> ClientDictionary<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Position of `id`: its index when present, the insertion point otherwise.
    pub fn relative_index(&self, id: Snowflake) -> usize {
        let mut bottom = 0;
        let mut top = self.elements.len();
        while bottom < top {
            let half = (bottom + top) / 2;
            if self.elements[half].id() < id {
                bottom = half + 1;
            } else {
                top = half;
            }
        }
        bottom
    }

    fn position(&self, id: Snowflake) -> Option<usize> {
        let index = self.relative_index(id);
        match self.elements.get(index) {
            Some(element) if element.id() == id => Some(index),
            _ => None,
        }
    }

    /// Inserts `client`, replacing and returning any entry with the same id.
    pub fn insert(&mut self, client: Arc<C>) -> Option<Arc<C>> {
        let id = client.id();
        let index = self.relative_index(id);
        match self.elements.get_mut(index) {
            Some(element) if element.id() == id => Some(std::mem::replace(element, client)),
            _ => {
                self.elements.insert(index, client);
                None
            }
        }
    }

    pub fn remove(&mut self, id: Snowflake) -> Option<Arc<C>> {
        self.position(id).map(|index| self.elements.remove(index))
    }

    pub fn get(&self, id: Snowflake) -> Option<&Arc<C>> {
        self.position(id).map(|index| &self.elements[index])
    }

    pub fn contains(&self, id: Snowflake) -> bool {
        self.position(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn first(&self) -> Option<&Arc<C>> {
        self.elements.first()
    }

    pub fn last(&self) -> Option<&Arc<C>> {
        self.elements.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<C>> + '_ {
        self.elements.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = Snowflake> + '_ {
        self.elements.iter().map(|element| element.id())
    }

    /// Entries with `range.start <= id < range.end`, ascending.
    pub fn range(&self, range: Range<Snowflake>) -> &[Arc<C>] {
        if range.start >= range.end {
            return &[];
        }
        let start = self.relative_index(range.start);
        let end = self.relative_index(range.end);
        &self.elements[start..end]
    }
}

/// Shared handle to a [`ClientDictionary`].
#[derive(Debug)]
pub struct ClientRegistry<C> {
    inner: Arc<RwLock<ClientDictionary<C>>>,
}

impl<C> Clone for ClientRegistry<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> Default for ClientRegistry<C> {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(ClientDictionary::default())),
        }
    }
}

impl<C: Identified> ClientRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, client: Arc<C>) -> Option<Arc<C>> {
        let id = client.id();
        let previous = self.inner.write().insert(client);
        debug!("registered client {} (replaced: {})", id, previous.is_some());
        previous
    }

    pub fn remove(&self, id: Snowflake) -> Option<Arc<C>> {
        let removed = self.inner.write().remove(id);
        if removed.is_some() {
            debug!("unregistered client {}", id);
        }
        removed
    }

    pub fn get(&self, id: Snowflake) -> Option<Arc<C>> {
        self.inner.read().get(id).cloned()
    }

    /// The client with `id`, or the lowest-id client when no id is given.
    pub fn get_or_first(&self, id: Option<Snowflake>) -> Option<Arc<C>> {
        let dictionary = self.inner.read();
        match id {
            Some(id) => dictionary.get(id).cloned(),
            None => dictionary.first().cloned(),
        }
    }

    pub fn contains(&self, id: Snowflake) -> bool {
        self.inner.read().contains(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn ids(&self) -> Vec<Snowflake> {
        self.inner.read().ids().collect()
    }

    /// Snapshot of every client, ascending by id.
    pub fn values(&self) -> Vec<Arc<C>> {
        self.inner.read().iter().cloned().collect()
    }
}
