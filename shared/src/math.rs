//! Minimal vector and quaternion value types used by the replication
//! engine. Only the operations the engine itself needs are provided;
//! applications are expected to convert from their own math types.

/// A double-precision 3D vector (world positions, local offsets).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3d {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3d {
    pub const ZERO: Vec3d = Vec3d {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl std::ops::Add for Vec3d {
    type Output = Vec3d;

    fn add(self, rhs: Vec3d) -> Vec3d {
        Vec3d::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Sub for Vec3d {
    type Output = Vec3d;

    fn sub(self, rhs: Vec3d) -> Vec3d {
        Vec3d::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// An integer 3D vector (zone coordinates, cell sizes, world origins).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Vec3i {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Vec3i {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// A double-precision quaternion. The engine never does quaternion math,
/// it only quantizes components for the wire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quatd {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quatd {
    pub const IDENTITY: Quatd = Quatd {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }
}

impl Default for Quatd {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// An axis-aligned bounding box in world space, used to classify an
/// object into the zones it intersects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3d,
    pub max: Vec3d,
}

impl Aabb {
    pub fn new(min: Vec3d, max: Vec3d) -> Self {
        Self { min, max }
    }

    /// A box of `radius` in every direction around `center`.
    pub fn around(center: Vec3d, radius: f64) -> Self {
        let r = Vec3d::new(radius, radius, radius);
        Self {
            min: center - r,
            max: center + r,
        }
    }
}
