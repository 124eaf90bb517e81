//! Fixed-capacity slot table used for every bounded list of the engine
//! (timers, transport sessions, node table). Insertion past the limit fails
//! closed and hands the value back instead of growing.

/// Array-backed collection addressed by slot index.
pub struct SlotTable<T, const N: usize> {
    slots: [Option<T>; N],
    limit: usize,
}

impl<T, const N: usize> Default for SlotTable<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> SlotTable<T, N> {
    /// Empty table using the full compiled capacity.
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
            limit: N,
        }
    }

    /// Empty table accepting at most `limit` entries (clamped to `N`).
    pub fn with_limit(limit: usize) -> Self {
        Self {
            slots: core::array::from_fn(|_| None),
            limit: limit.min(N),
        }
    }

    /// Maximum number of entries accepted.
    pub fn capacity(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.limit
    }

    /// Store `value` in the first free slot. Returns the value when full.
    pub fn insert(&mut self, value: T) -> Result<usize, T> {
        if self.is_full() {
            return Err(value);
        }
        match self.slots.iter().position(Option::is_none) {
            Some(index) => {
                self.slots[index] = Some(value);
                Ok(index)
            }
            None => Err(value),
        }
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    pub fn remove(&mut self, index: usize) -> Option<T> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    /// Index of the first entry matching `predicate`.
    pub fn position(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(&mut predicate))
    }

    pub fn find(&self, mut predicate: impl FnMut(&T) -> bool) -> Option<&T> {
        self.slots.iter().flatten().find(|value| predicate(value))
    }

    pub fn find_mut(&mut self, mut predicate: impl FnMut(&T) -> bool) -> Option<&mut T> {
        self.slots.iter_mut().flatten().find(|value| predicate(value))
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|value| (index, value)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_mut().map(|value| (index, value)))
    }

    /// Keep only entries for which `keep` returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(&mut T) -> bool) {
        for slot in self.slots.iter_mut() {
            if let Some(value) = slot {
                if !keep(value) {
                    *slot = None;
                }
            }
        }
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
