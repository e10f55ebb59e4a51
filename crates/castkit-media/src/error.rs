//! Crate-level errors.
//!
//! Container-specific failures live in the container crates; this covers
//! only the shared session layer.

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("the recording session is closed")]
    InvalidState,
}
