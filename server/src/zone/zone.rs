use log::{trace, warn};
use zonecast_shared::{Quatd, Vec3d, ZoneKey};

use crate::zone::StateBlock;

/// Per-cell mutable state: the resident entities, the block currently
/// being filled, and a fixed ring of committed blocks awaiting purge.
#[derive(Debug)]
pub struct Zone {
    key: ZoneKey,
    children: std::collections::HashSet<u64>,
    current: Option<StateBlock>,
    history: Vec<StateBlock>,
    history_backlog: usize,
}

impl Zone {
    pub fn new(key: ZoneKey, history_backlog: usize) -> Self {
        Self {
            key,
            children: std::collections::HashSet::new(),
            current: None,
            history: Vec::with_capacity(history_backlog),
            history_backlog,
        }
    }

    pub fn key(&self) -> &ZoneKey {
        &self.key
    }

    /// Opens a fresh block for the new frame time.
    pub fn begin_update(&mut self, time: i64) {
        trace!("{}: begin_update({time})", self.key);
        self.current = Some(StateBlock::new(time, self.key));
    }

    /// Records an object pose in the open block.
    pub fn update(&mut self, parent: Option<u64>, id: u64, pos: Vec3d, rot: Quatd) {
        trace!("{}: update({id}, {pos:?})", self.key);
        match &mut self.current {
            Some(block) => block.add_update(parent, id, pos, rot),
            None => warn!("{}: update for {id} outside a frame", self.key),
        }
    }

    /// Records a warp discontinuity in the open block so receivers can
    /// skip interpolation across it.
    pub fn warp(&mut self, parent: Option<u64>, id: u64) {
        trace!("{}: warp({parent:?}, {id})", self.key);
        match &mut self.current {
            Some(block) => block.add_warp(parent, id),
            None => warn!("{}: warp for {id} outside a frame", self.key),
        }
    }

    pub fn add_child(&mut self, id: u64) {
        trace!("{}: add_child({id})", self.key);
        if !self.children.insert(id) {
            warn!("zone already had a child for id: {id}");
        }
    }

    /// Drops a resident entity and records the removal in the open
    /// block so watchers see it leave.
    pub fn remove_child(&mut self, id: u64) {
        trace!("{}: remove_child({id})", self.key);
        if !self.children.remove(&id) {
            warn!("zone did not have child to remove for id: {id}");
        }
        match &mut self.current {
            Some(block) => block.remove_entity(id),
            None => warn!("{}: child removal for {id} outside a frame", self.key),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Pushes the open block into history. Returns false only when the
    /// zone has nothing pending and no prior history either — the caller
    /// may then evict an empty zone.
    pub fn commit_update(&mut self) -> bool {
        let Some(block) = self.current.take() else {
            return !self.history.is_empty();
        };
        if block.is_empty() {
            return !self.history.is_empty();
        }
        if self.history.len() == self.history_backlog {
            // The manager's global backlog guard normally prevents this.
            warn!("{}: history ring full, dropping block", self.key);
            return true;
        }
        self.history.push(block);
        true
    }

    /// Snapshots and clears the committed history, oldest first.
    pub fn purge_history(&mut self) -> Vec<StateBlock> {
        std::mem::take(&mut self.history)
    }
}
