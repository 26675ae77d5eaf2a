//! A client's window into the zone grid: the box of cells around its
//! avatar, with a dense per-window id for each cell.

use std::collections::HashSet;

use crate::math::{Vec3d, Vec3i};
use crate::zone::{ZoneGrid, ZoneKey};

/// The lowest zone id handed out; 0 is the wire's removal sentinel.
const MIN_ZONE_ID: u32 = 1;

/// A (2r+1)^3 box of zone keys centered on a client, with a reverse map
/// assigning each contained key a small dense zone id starting at 1.
///
/// Zone ids are stable for the lifetime of a window but change meaning
/// when the center moves; consumers must finish interpreting a frame
/// against the window that was current when the frame was built.
#[derive(Debug)]
pub struct LocalZoneIndex {
    grid: ZoneGrid,
    x_extent: i32,
    y_extent: i32,
    z_extent: i32,
    x_size: i32,
    y_size: i32,
    center: Option<ZoneKey>,
    key_index: Vec<ZoneKey>,
    key_set: HashSet<ZoneKey>,
}

impl LocalZoneIndex {
    pub fn new(grid: ZoneGrid, radius: i32) -> Self {
        Self::with_extents(grid, Vec3i::new(radius, radius, radius))
    }

    pub fn with_extents(grid: ZoneGrid, extents: Vec3i) -> Self {
        // Flattened grid axes flatten the window the same way.
        let size = grid.zone_size();
        let x_extent = if size.x == 0 { 0 } else { extents.x };
        let y_extent = if size.y == 0 { 0 } else { extents.y };
        let z_extent = if size.z == 0 { 0 } else { extents.z };

        let x_size = x_extent * 2 + 1;
        let y_size = y_extent * 2 + 1;
        let z_size = z_extent * 2 + 1;

        Self {
            grid,
            x_extent,
            y_extent,
            z_extent,
            x_size,
            y_size,
            center: None,
            key_index: Vec::with_capacity((x_size * y_size * z_size) as usize),
            key_set: HashSet::new(),
        }
    }

    pub fn grid(&self) -> &ZoneGrid {
        &self.grid
    }

    pub fn index_size(&self) -> usize {
        (self.x_size * self.y_size * (self.z_extent * 2 + 1)) as usize
    }

    pub fn minimum_zone_id(&self) -> u32 {
        MIN_ZONE_ID
    }

    pub fn center(&self) -> Option<&ZoneKey> {
        self.center.as_ref()
    }

    /// Resolves a window-local zone id back to its key. Returns None for
    /// the removal sentinel (0), an unset center, or an out-of-window id.
    pub fn zone(&self, zone_id: u32) -> Option<ZoneKey> {
        if zone_id < MIN_ZONE_ID {
            return None;
        }
        self.center?;
        self.key_index.get((zone_id - MIN_ZONE_ID) as usize).copied()
    }

    /// The window-local id for a key, or None if the key is outside the
    /// current window.
    pub fn zone_id(&self, zone: &ZoneKey) -> Option<u32> {
        let center = self.center.as_ref()?;

        let x = zone.x - (center.x - self.x_extent);
        let y = zone.y - (center.y - self.y_extent);
        let z = zone.z - (center.z - self.z_extent);
        if x < 0 || x >= self.x_size || y < 0 || y >= self.y_size {
            return None;
        }
        if z < 0 || z >= self.z_extent * 2 + 1 {
            return None;
        }

        Some(MIN_ZONE_ID + ((z * self.y_size + y) * self.x_size + x) as u32)
    }

    pub fn set_center_world(
        &mut self,
        pos: Vec3d,
        entered: &mut Vec<ZoneKey>,
        exited: &mut Vec<ZoneKey>,
    ) -> bool {
        let key = self.grid.world_to_key(pos);
        self.set_center(key, entered, exited)
    }

    /// Moves the window. Returns false (and leaves the output lists
    /// untouched) when the center is unchanged; otherwise fills `entered`
    /// and `exited` with the symmetric difference of the old and new
    /// windows.
    pub fn set_center(
        &mut self,
        center: ZoneKey,
        entered: &mut Vec<ZoneKey>,
        exited: &mut Vec<ZoneKey>,
    ) -> bool {
        if self.center == Some(center) {
            return false;
        }

        entered.clear();
        exited.clear();

        self.center = Some(center);
        self.key_index.clear();
        for z in (center.z - self.z_extent)..=(center.z + self.z_extent) {
            for y in (center.y - self.y_extent)..=(center.y + self.y_extent) {
                for x in (center.x - self.x_extent)..=(center.x + self.x_extent) {
                    let key = ZoneKey::new(self.grid, x, y, z);
                    self.key_index.push(key);
                    if !self.key_set.contains(&key) {
                        entered.push(key);
                    }
                }
            }
        }

        let new_set: HashSet<ZoneKey> = self.key_index.iter().copied().collect();
        exited.extend(self.key_set.difference(&new_set).copied());
        self.key_set = new_set;

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> LocalZoneIndex {
        LocalZoneIndex::new(ZoneGrid::cube(32), 1)
    }

    #[test]
    fn first_center_enters_everything() {
        let mut zones = index();
        let mut entered = Vec::new();
        let mut exited = Vec::new();
        let center = ZoneKey::new(*zones.grid(), 0, 0, 0);
        assert!(zones.set_center(center, &mut entered, &mut exited));
        assert_eq!(entered.len(), 27);
        assert!(exited.is_empty());
    }

    #[test]
    fn zone_ids_are_dense_and_round_trip() {
        let mut zones = index();
        let mut entered = Vec::new();
        let mut exited = Vec::new();
        let center = ZoneKey::new(*zones.grid(), 2, 2, 2);
        zones.set_center(center, &mut entered, &mut exited);

        let mut seen = std::collections::HashSet::new();
        for key in entered {
            let id = zones.zone_id(&key).unwrap();
            assert!(id >= 1 && id <= 27, "id {id} out of window");
            assert!(seen.insert(id), "duplicate id {id}");
            assert_eq!(zones.zone(id), Some(key));
        }
    }

    #[test]
    fn recenter_returns_symmetric_difference() {
        let mut zones = index();
        let mut entered = Vec::new();
        let mut exited = Vec::new();
        let grid = *zones.grid();
        zones.set_center(ZoneKey::new(grid, 0, 0, 0), &mut entered, &mut exited);

        // Move one cell in +x: the x == -1 plane leaves, x == 2 enters.
        assert!(zones.set_center(ZoneKey::new(grid, 1, 0, 0), &mut entered, &mut exited));
        assert_eq!(entered.len(), 9);
        assert_eq!(exited.len(), 9);
        assert!(entered.iter().all(|k| k.x == 2));
        assert!(exited.iter().all(|k| k.x == -1));
    }

    #[test]
    fn same_center_is_a_no_op() {
        let mut zones = index();
        let mut entered = Vec::new();
        let mut exited = Vec::new();
        let center = ZoneKey::new(*zones.grid(), 0, 0, 0);
        zones.set_center(center, &mut entered, &mut exited);
        assert!(!zones.set_center(center, &mut entered, &mut exited));
    }

    #[test]
    fn out_of_window_lookups_return_none() {
        let mut zones = index();
        let mut entered = Vec::new();
        let mut exited = Vec::new();
        let grid = *zones.grid();
        zones.set_center(ZoneKey::new(grid, 0, 0, 0), &mut entered, &mut exited);

        assert_eq!(zones.zone_id(&ZoneKey::new(grid, 5, 0, 0)), None);
        assert_eq!(zones.zone(0), None);
        assert_eq!(zones.zone(28), None);
    }

    #[test]
    fn flattened_axis_flattens_the_window() {
        let grid = ZoneGrid::new(Vec3i::new(32, 0, 32));
        let mut zones = LocalZoneIndex::new(grid, 1);
        let mut entered = Vec::new();
        let mut exited = Vec::new();
        zones.set_center(ZoneKey::new(grid, 0, 0, 0), &mut entered, &mut exited);
        assert_eq!(entered.len(), 9);
    }
}
