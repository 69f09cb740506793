//! Core token trait definitions.

use std::fmt::Debug;
use std::hash::Hash;

/// Minimal token trait for the hash ring.
///
/// Tokens are immutable, totally ordered positions; resolution walks them in
/// `Ord` order and wraps past the greatest one. Implementations must be
/// thread-safe and cheap to copy and compare.
pub trait Token: Copy + Ord + Hash + Send + Sync + Debug + 'static {}
