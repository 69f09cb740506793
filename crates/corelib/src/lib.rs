//! Core library for consistent hashing.
//!
//! This crate holds the I/O-free half of the proxy:
//! - Token types and the partitioner that produces them
//! - Virtual nodes (points on the ring)
//! - The hash ring and its membership operations
//! - Backend node identity

pub mod error;
pub mod node;
pub mod partitioner;
pub mod ring;
pub mod token;
pub mod vnode;

pub use error::{Error, Result};
pub use node::Node;
pub use partitioner::Partitioner;
pub use ring::{HashRing, RingBuilder};
pub use token::Token;
pub use vnode::VirtualNode;
