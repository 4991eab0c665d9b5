use std::collections::HashMap;

use parking_lot::Mutex;

/// Purge generation of a [`HandleTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Epoch(u64);

struct Slots<T> {
    next: i64,
    epoch: u64,
    map: HashMap<i64, T>,
}

/// Registry of short-lived handles given to the client.
///
/// Handles are 1-based and strictly increasing within one purge epoch. [`HandleTable::purge`]
/// empties the table and restarts numbering, so every handle issued before the purge stops
/// resolving. Values derived from an earlier epoch go through [`HandleTable::add_in`], which
/// refuses them once the table has been purged.
pub struct HandleTable<T> {
    slots: Mutex<Slots<T>>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(Slots {
                next: 0,
                epoch: 0,
                map: HashMap::new(),
            }),
        }
    }
}

impl<T: Clone> HandleTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> Epoch {
        Epoch(self.slots.lock().epoch)
    }

    pub fn add(&self, value: T) -> i64 {
        Self::insert(&mut self.slots.lock(), value)
    }

    /// Like [`HandleTable::add`], but only while the table is still in `epoch`.
    pub fn add_in(&self, epoch: Epoch, value: T) -> Option<i64> {
        let mut slots = self.slots.lock();
        if slots.epoch != epoch.0 {
            return None;
        }
        Some(Self::insert(&mut slots, value))
    }

    pub fn get(&self, id: i64) -> Option<T> {
        self.slots.lock().map.get(&id).cloned()
    }

    /// The value behind `id` together with the epoch it belongs to.
    pub fn lookup(&self, id: i64) -> Option<(T, Epoch)> {
        let slots = self.slots.lock();
        let value = slots.map.get(&id).cloned()?;
        Some((value, Epoch(slots.epoch)))
    }

    pub fn purge(&self) {
        let mut slots = self.slots.lock();
        slots.next = 0;
        slots.epoch = slots.epoch.wrapping_add(1);
        slots.map.clear();
    }

    fn insert(slots: &mut Slots<T>, value: T) -> i64 {
        slots.next += 1;
        let id = slots.next;
        slots.map.insert(id, value);
        id
    }

    pub fn len(&self) -> usize {
        self.slots.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
