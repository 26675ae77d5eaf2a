use thiserror::Error;

/// Errors that can occur while reading a bit stream.
///
/// Writing never fails: the writer grows its buffer as needed and panics
/// on caller misuse (zero-width or oversized counts), which is a bug in
/// the caller rather than a runtime condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerdeError {
    /// The underlying buffer ran out before the requested bits could be
    /// read. Always possible with untrusted network input.
    #[error("bit stream ended with {requested} bits still requested")]
    EndOfStream { requested: u32 },
}
