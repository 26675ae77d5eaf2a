use crate::math::{Vec3d, Vec3i};
use crate::zone::ZoneKey;

const AXIS_MASK: i64 = 0x1f_ffff;
const AXIS_SIGN: i64 = 0x10_0000;

fn sign_extend_21(value: i64) -> i32 {
    if value & AXIS_SIGN != 0 {
        (value | !AXIS_MASK) as i32
    } else {
        value as i32
    }
}

/// Immutable description of how the world is partitioned into zones.
///
/// Each axis has an integer cell size; a size of 0 flattens that axis so
/// every coordinate maps to cell 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ZoneGrid {
    zone_size: Vec3i,
}

impl ZoneGrid {
    pub fn cube(zone_size: i32) -> Self {
        Self::new(Vec3i::new(zone_size, zone_size, zone_size))
    }

    pub fn new(zone_size: Vec3i) -> Self {
        assert!(
            zone_size.x >= 0 && zone_size.y >= 0 && zone_size.z >= 0,
            "negative zone size: {zone_size:?}"
        );
        Self { zone_size }
    }

    pub fn zone_size(&self) -> Vec3i {
        self.zone_size
    }

    fn world_to_zone_axis(d: f64, size: i32) -> i32 {
        if size == 0 {
            return 0;
        }
        (d.floor() as i32).div_euclid(size)
    }

    pub fn world_to_zone(&self, world: Vec3d) -> Vec3i {
        Vec3i::new(
            Self::world_to_zone_axis(world.x, self.zone_size.x),
            Self::world_to_zone_axis(world.y, self.zone_size.y),
            Self::world_to_zone_axis(world.z, self.zone_size.z),
        )
    }

    pub fn zone_to_world(&self, x: i32, y: i32, z: i32) -> Vec3i {
        Vec3i::new(
            x * self.zone_size.x,
            y * self.zone_size.y,
            z * self.zone_size.z,
        )
    }

    pub fn world_to_key(&self, world: Vec3d) -> ZoneKey {
        let cell = self.world_to_zone(world);
        ZoneKey::new(*self, cell.x, cell.y, cell.z)
    }

    /// Packs a cell coordinate into a 63-bit id: three sign-extended
    /// 21-bit fields laid out `x << 42 | y << 21 | z`.
    pub fn to_long_id(&self, key: &ZoneKey) -> i64 {
        let x = i64::from(key.x) & AXIS_MASK;
        let y = i64::from(key.y) & AXIS_MASK;
        let z = i64::from(key.z) & AXIS_MASK;
        (x << 42) | (y << 21) | z
    }

    pub fn from_long_id(&self, id: i64) -> ZoneKey {
        let z = sign_extend_21(id & AXIS_MASK);
        let y = sign_extend_21((id >> 21) & AXIS_MASK);
        let x = sign_extend_21((id >> 42) & AXIS_MASK);
        ZoneKey::new(*self, x, y, z)
    }
}
