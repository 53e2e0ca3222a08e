use crate::contracts::error::IdError;

/// Hands out record ids.
///
/// # Invariants
/// - `next()` always returns a value greater than every earlier one
/// - A store reopened from disk resumes above its highest persisted id
pub trait IdGenerator: Send + Sync {
    /// Returns the next id.
    fn next(&self) -> Result<u64, IdError>;

    /// Returns the last id handed out (0 if none).
    fn current(&self) -> u64;
}
