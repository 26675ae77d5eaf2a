use zonecast_shared::{Quatd, Vec3d, ZoneKey};

/// One object pose as recorded in a zone's open block.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEntry {
    pub parent: Option<u64>,
    pub entity: u64,
    pub position: Vec3d,
    pub rotation: Quatd,
}

/// The subset of one frame confined to a single zone: the updates,
/// removals, and warps that happened in that cell at one time.
///
/// The event lists stay unallocated until used; most blocks carry only
/// updates.
#[derive(Debug, Clone, PartialEq)]
pub struct StateBlock {
    time: i64,
    zone: ZoneKey,
    updates: Option<Vec<StateEntry>>,
    removes: Option<Vec<u64>>,
    warps: Option<Vec<u64>>,
}

impl StateBlock {
    pub fn new(time: i64, zone: ZoneKey) -> Self {
        Self {
            time,
            zone,
            updates: None,
            removes: None,
            warps: None,
        }
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn zone(&self) -> &ZoneKey {
        &self.zone
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_none() && self.removes.is_none() && self.warps.is_none()
    }

    pub fn add_update(&mut self, parent: Option<u64>, entity: u64, pos: Vec3d, rot: Quatd) {
        self.updates.get_or_insert_with(Vec::new).push(StateEntry {
            parent,
            entity,
            position: pos,
            rotation: rot,
        });
    }

    pub fn remove_entity(&mut self, entity: u64) {
        self.removes.get_or_insert_with(Vec::new).push(entity);
    }

    /// An entity with a warp discontinuity this frame. Parented
    /// entities are tracked too, in case a "self" rides another object.
    pub fn add_warp(&mut self, _parent: Option<u64>, entity: u64) {
        self.warps.get_or_insert_with(Vec::new).push(entity);
    }

    pub fn updates(&self) -> Option<&[StateEntry]> {
        self.updates.as_deref()
    }

    pub fn removals(&self) -> Option<&[u64]> {
        self.removes.as_deref()
    }

    pub fn warps(&self) -> Option<&[u64]> {
        self.warps.as_deref()
    }
}
