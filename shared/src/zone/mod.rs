//! The world grid and the keys that identify its cells.

mod grid;
mod key;

pub use grid::ZoneGrid;
pub use key::ZoneKey;
