//! # Zonecast Serde
//! Bit-level I/O shared by the zonecast server & client crates.
//!
//! All wire formats in the engine are expressed as bit strings written
//! MSB-first into a byte stream. No byte alignment is assumed except at
//! the start of a logical message.

mod bit_reader;
mod bit_writer;
mod error;

pub use bit_reader::BitReader;
pub use bit_writer::BitWriter;
pub use error::SerdeError;
