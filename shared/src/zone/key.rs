use crate::math::{Vec3d, Vec3i};
use crate::zone::ZoneGrid;

/// Identity of a specific grid cell, with its world origin precomputed.
///
/// Equality is by grid and cell coordinates; the origin is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ZoneKey {
    pub grid: ZoneGrid,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub origin: Vec3i,
}

impl ZoneKey {
    pub fn new(grid: ZoneGrid, x: i32, y: i32, z: i32) -> Self {
        let origin = grid.zone_to_world(x, y, z);
        Self {
            grid,
            x,
            y,
            z,
            origin,
        }
    }

    /// Translates a zone-local coordinate back into world space.
    pub fn to_world(&self, relative: Vec3d) -> Vec3d {
        Vec3d::new(
            f64::from(self.origin.x) + relative.x,
            f64::from(self.origin.y) + relative.y,
            f64::from(self.origin.z) + relative.z,
        )
    }

    /// Translates a world coordinate into this zone's local space. This
    /// is the coordinate the protocol's position packer quantizes.
    pub fn to_local(&self, world: Vec3d) -> Vec3d {
        Vec3d::new(
            world.x - f64::from(self.origin.x),
            world.y - f64::from(self.origin.y),
            world.z - f64::from(self.origin.z),
        )
    }

    pub fn to_long_id(&self) -> i64 {
        self.grid.to_long_id(self)
    }
}

impl std::fmt::Display for ZoneKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.x, self.y, self.z)
    }
}
