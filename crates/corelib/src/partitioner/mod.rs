//! Partitioner abstraction for consistent hashing.
//!
//! Partitioners are responsible for converting keys into tokens
//! that can be placed on the hash ring.

pub mod sip;
pub mod traits;

pub use sip::SipPartitioner;
pub use traits::Partitioner;
