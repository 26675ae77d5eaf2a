//! Bidirectional map between dense 16-bit network ids and the
//! application's 64-bit entity ids.

use std::collections::HashMap;

use log::warn;

/// Allocates compact network ids for entities on first send and retires
/// them when the shared object is fully removed. Allocation wraps around
/// the configured range, skipping ids still in use.
#[derive(Debug)]
pub struct IdIndex {
    network_to_entity: HashMap<u16, u64>,
    entity_to_network: HashMap<u64, u16>,
    min_id: u16,
    max_id: u16,
    next_id: u16,
}

impl IdIndex {
    /// Ids are allocated from `min_id..=u16::MAX`. Id 0 is reserved as
    /// the wire's "no state" sentinel, so `min_id` must be nonzero.
    pub fn new(min_id: u16) -> Self {
        Self::with_range(min_id, u16::MAX)
    }

    pub fn with_range(min_id: u16, max_id: u16) -> Self {
        assert!(min_id > 0, "network id 0 is reserved");
        assert!(min_id <= max_id, "empty network id range");
        Self {
            network_to_entity: HashMap::new(),
            entity_to_network: HashMap::new(),
            min_id,
            max_id,
            next_id: min_id,
        }
    }

    fn increment_next_id(&mut self) {
        if self.next_id >= self.max_id {
            self.next_id = self.min_id;
        } else {
            self.next_id += 1;
        }
    }

    fn allocate(&mut self, entity: u64) -> u16 {
        let range = (self.max_id - self.min_id) as usize + 1;
        let mut scanned = 0;
        while self.network_to_entity.contains_key(&self.next_id) {
            warn!("network id already in use: {}", self.next_id);
            self.increment_next_id();
            scanned += 1;
            assert!(scanned < range, "network id space exhausted");
        }

        let result = self.next_id;
        self.network_to_entity.insert(result, entity);
        self.entity_to_network.insert(entity, result);
        self.increment_next_id();
        result
    }

    /// Looks up the network id for an entity, allocating one on first
    /// use.
    pub fn get_or_allocate(&mut self, entity: u64) -> u16 {
        match self.entity_to_network.get(&entity) {
            Some(&id) => id,
            None => self.allocate(entity),
        }
    }

    /// Looks up the network id for an entity without allocating.
    pub fn get(&self, entity: u64) -> Option<u16> {
        self.entity_to_network.get(&entity).copied()
    }

    pub fn entity(&self, id: u16) -> Option<u64> {
        self.network_to_entity.get(&id).copied()
    }

    /// Releases a network id for reuse.
    pub fn retire(&mut self, id: u16) {
        match self.network_to_entity.remove(&id) {
            Some(entity) => {
                self.entity_to_network.remove(&entity);
            }
            None => warn!("retired network id {id} with no mapped entity"),
        }
    }

    pub fn len(&self) -> usize {
        self.network_to_entity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.network_to_entity.is_empty()
    }
}
