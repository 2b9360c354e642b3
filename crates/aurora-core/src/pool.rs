//! Fixed-capacity slot arena with stable IDs.
//!
//! Pooled GPU objects (command buffers in particular) are handed out by ID
//! rather than by address, so their owning pool can validate every access
//! and reclaim slots without dangling references. Capacity is fixed at
//! construction: running out of slots is a caller error, not a cue to grow.

use crate::error::{Error, Result};

/// Identifier of one slot in a [`SlotPool`].
///
/// IDs are stable for the lifetime of the pool and are reused after the
/// slot they name has been removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotId(u32);

impl SlotId {
    /// The slot index this ID names.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// The raw ID value.
    #[inline]
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// Rebuild an ID from its raw value.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for SlotId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Fixed-capacity arena of slots addressed by [`SlotId`].
///
/// Freed IDs are reused LIFO, so a recently vacated slot (likely still
/// cache-hot) is handed out before the backing store grows. The store only
/// grows while under capacity; exceeding capacity is an error.
pub struct SlotPool<T> {
    slots: Vec<Option<T>>,
    free: Vec<u32>,
    capacity: usize,
}

impl<T> SlotPool<T> {
    /// Create a pool that can hold at most `capacity` live entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            capacity,
        }
    }

    /// Maximum number of live entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Whether the pool holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` names a live entry.
    pub fn contains(&self, id: SlotId) -> bool {
        self.slots
            .get(id.index())
            .is_some_and(|slot| slot.is_some())
    }

    /// Insert a value, reusing the most recently freed slot if any.
    pub fn insert(&mut self, value: T) -> Result<SlotId> {
        self.insert_with(|_| value)
    }

    /// Insert a value constructed from the ID it will occupy.
    ///
    /// Needed when the value stores its own ID.
    pub fn insert_with(&mut self, f: impl FnOnce(SlotId) -> T) -> Result<SlotId> {
        if let Some(index) = self.free.pop() {
            let id = SlotId(index);
            self.slots[id.index()] = Some(f(id));
            return Ok(id);
        }

        if self.slots.len() >= self.capacity {
            return Err(Error::CapacityExceeded(format!(
                "slot pool is full ({} slots)",
                self.capacity
            )));
        }

        let id = SlotId(self.slots.len() as u32);
        self.slots.push(Some(f(id)));
        Ok(id)
    }

    /// Remove and return the entry at `id`.
    pub fn remove(&mut self, id: SlotId) -> Result<T> {
        let value = self
            .slots
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or_else(|| Error::InvalidSlot(format!("no live entry at {id}")))?;

        self.free.push(id.as_raw());
        Ok(value)
    }

    /// Borrow the entry at `id`.
    pub fn get(&self, id: SlotId) -> Option<&T> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    /// Mutably borrow the entry at `id`.
    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Iterate over live entries.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (SlotId(i as u32), v)))
    }

    /// Iterate mutably over live entries.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SlotId, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_mut().map(|v| (SlotId(i as u32), v)))
    }

    /// Remove every live entry, returning them in slot order.
    pub fn drain(&mut self) -> Vec<T> {
        self.free.clear();
        self.slots.drain(..).flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_sequential_from_empty() {
        let mut pool = SlotPool::with_capacity(4);
        let a = pool.insert("a").unwrap();
        let b = pool.insert("b").unwrap();
        let c = pool.insert("c").unwrap();
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(c.index(), 2);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn freed_id_is_reused_lifo() {
        let mut pool = SlotPool::with_capacity(4);
        let _a = pool.insert("a").unwrap();
        let b = pool.insert("b").unwrap();
        let _c = pool.insert("c").unwrap();

        pool.remove(b).unwrap();
        let d = pool.insert("d").unwrap();

        // The vacated slot comes back before the store grows.
        assert_eq!(d, b);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.get(d), Some(&"d"));
    }

    #[test]
    fn multiple_frees_reuse_most_recent_first() {
        let mut pool = SlotPool::with_capacity(4);
        let a = pool.insert(0).unwrap();
        let b = pool.insert(1).unwrap();
        pool.remove(a).unwrap();
        pool.remove(b).unwrap();

        assert_eq!(pool.insert(2).unwrap(), b);
        assert_eq!(pool.insert(3).unwrap(), a);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut pool = SlotPool::with_capacity(2);
        pool.insert(1).unwrap();
        pool.insert(2).unwrap();

        let err = pool.insert(3).unwrap_err();
        assert!(matches!(err, Error::CapacityExceeded(_)));
        // The failed insert must not have grown the pool.
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn capacity_frees_make_room() {
        let mut pool = SlotPool::with_capacity(2);
        let a = pool.insert(1).unwrap();
        pool.insert(2).unwrap();
        pool.remove(a).unwrap();
        assert!(pool.insert(3).is_ok());
    }

    #[test]
    fn double_remove_is_an_error() {
        let mut pool = SlotPool::with_capacity(2);
        let a = pool.insert(1).unwrap();
        pool.remove(a).unwrap();
        assert!(matches!(pool.remove(a), Err(Error::InvalidSlot(_))));
    }

    #[test]
    fn insert_with_sees_final_id() {
        let mut pool = SlotPool::with_capacity(2);
        let a = pool.insert_with(|id| id.index()).unwrap();
        assert_eq!(pool.get(a), Some(&a.index()));
    }

    #[test]
    fn drain_empties_the_pool() {
        let mut pool = SlotPool::with_capacity(3);
        pool.insert(1).unwrap();
        let b = pool.insert(2).unwrap();
        pool.remove(b).unwrap();
        pool.insert(3).unwrap();

        let values = pool.drain();
        assert_eq!(values.len(), 2);
        assert!(pool.is_empty());
    }
}
