//! Consistent hash ring implementation.
//!
//! The ring manages member positions and resolves routing keys to the
//! member owning the nearest point clockwise.

pub mod ring;

pub use ring::{HashRing, RingBuilder, DEFAULT_REPLICAS};
