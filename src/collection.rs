//! Ordered in-memory collections.
//!
//! Each collection mirrors the server order (newest first). Changes are
//! applied one at a time; the last change seen for an id wins.

use crate::models::{BlogPost, Destination, LiveTicket, Package, Record};

/// A row-level change for a typed collection
#[derive(Debug, Clone, PartialEq)]
pub enum Change<T> {
    Insert(T),
    Update(T),
    Delete(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Collection<T> {
    items: Vec<T>,
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: Record> Collection<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    pub fn replace_all(&mut self, items: Vec<T>) {
        self.items = items;
    }

    /// Put a record at the head. A record already present under the same id
    /// is replaced in place instead, so echoes of local inserts never
    /// duplicate.
    pub fn prepend(&mut self, record: T) {
        match self.position(record.id()) {
            Some(idx) => self.items[idx] = record,
            None => self.items.insert(0, record),
        }
    }

    /// Replace the record with the same id. Returns false if it's not here.
    pub fn replace(&mut self, record: T) -> bool {
        match self.position(record.id()) {
            Some(idx) => {
                self.items[idx] = record;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<T> {
        self.position(id).map(|idx| self.items.remove(idx))
    }

    /// Apply a change, returning whether local state was modified.
    pub fn apply(&mut self, change: Change<T>) -> bool {
        match change {
            Change::Insert(record) => {
                self.prepend(record);
                true
            }
            Change::Update(record) => self.replace(record),
            Change::Delete(id) => self.remove(&id).is_some(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.iter().find(|r| r.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position(id).is_some()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|r| r.id() == id)
    }
}

impl<T> Collection<T> {
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// All four collections held by the store
#[derive(Debug, Clone, Default)]
pub struct Collections {
    pub packages: Collection<Package>,
    pub blogs: Collection<BlogPost>,
    pub destinations: Collection<Destination>,
    pub live_tickets: Collection<LiveTicket>,
}
