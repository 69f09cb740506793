//! Error types for the core library.

use thiserror::Error;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core library.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A key was resolved while no member was registered.
    #[error("hash ring has no members")]
    EmptyRing,
    /// A ring was configured with zero virtual points per member.
    #[error("invalid replica count {0}: at least one point per member is required")]
    InvalidReplicas(usize),
}
