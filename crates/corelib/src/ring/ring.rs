//! Hash ring data structure.
//!
//! Points are kept in a `BTreeSet` ordered by `(token, owner)`. A key is
//! routed to the first point whose token is greater than or equal to the
//! key's token, wrapping around to the lowest point.
//!
//! # Performance
//!
//! - **Lookup**: O(log p) where p = total points
//! - **Add**: O(r log p) where r = replicas per member
//! - **Remove**: O(p)
//!
//! The ring itself is not synchronized. Callers sharing it between tasks
//! wrap it in a lock together with whatever state must change atomically
//! with membership.

use crate::error::{Error, Result};
use crate::partitioner::{Partitioner, SipPartitioner};
use crate::vnode::VirtualNode;
use std::collections::BTreeSet;

/// Points per member when nothing else is configured.
pub const DEFAULT_REPLICAS: usize = 1;

/// Consistent hash ring over member names.
///
/// # Invariants
///
/// - A key resolves to exactly one member whenever the ring is non-empty.
/// - Adding a present member or removing an absent one changes nothing.
/// - Removing a member only moves the keys that member owned.
#[derive(Debug, Clone)]
pub struct HashRing<P: Partitioner = SipPartitioner> {
    partitioner: P,
    replicas: usize,
    points: BTreeSet<VirtualNode<P::TokenType>>,
    members: BTreeSet<String>,
}

impl HashRing<SipPartitioner> {
    /// Empty ring with the default partitioner and one point per member.
    pub fn new() -> Self {
        Self {
            partitioner: SipPartitioner,
            replicas: DEFAULT_REPLICAS,
            points: BTreeSet::new(),
            members: BTreeSet::new(),
        }
    }

    /// Empty ring with the default partitioner and `replicas` points per
    /// member.
    pub fn with_replicas(replicas: usize) -> Result<Self> {
        Self::with_partitioner(SipPartitioner, replicas)
    }
}

impl Default for HashRing<SipPartitioner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Partitioner> HashRing<P> {
    /// Empty ring with a custom partitioner.
    ///
    /// # Errors
    ///
    /// `Error::InvalidReplicas` if `replicas` is zero.
    pub fn with_partitioner(partitioner: P, replicas: usize) -> Result<Self> {
        if replicas == 0 {
            return Err(Error::InvalidReplicas(replicas));
        }
        Ok(Self {
            partitioner,
            replicas,
            points: BTreeSet::new(),
            members: BTreeSet::new(),
        })
    }

    /// Adds `name` with the configured number of points.
    ///
    /// Returns `false` if the member was already present.
    pub fn add(&mut self, name: &str) -> bool {
        if !self.members.insert(name.to_string()) {
            return false;
        }
        for replica in 0..self.replicas {
            self.points
                .insert(VirtualNode::from_replica(&self.partitioner, name, replica));
        }
        true
    }

    /// Removes `name` and all of its points.
    ///
    /// Returns `false` if the member was not present.
    pub fn remove(&mut self, name: &str) -> bool {
        if !self.members.remove(name) {
            return false;
        }
        self.points.retain(|point| point.owner() != name);
        true
    }

    /// Resolves `key` to the member owning the nearest point clockwise.
    ///
    /// # Errors
    ///
    /// `Error::EmptyRing` if no member is registered.
    pub fn resolve(&self, key: &[u8]) -> Result<&str> {
        let token = self.partitioner.partition(key);
        self.points
            .range(VirtualNode::probe(token)..)
            .next()
            .or_else(|| self.points.iter().next())
            .map(VirtualNode::owner)
            .ok_or(Error::EmptyRing)
    }

    /// True if `name` is a member.
    pub fn contains(&self, name: &str) -> bool {
        self.members.contains(name)
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Points per member.
    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Member names in sorted order.
    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(String::as_str)
    }

    /// All points in ring order.
    pub fn points(&self) -> impl Iterator<Item = &VirtualNode<P::TokenType>> {
        self.points.iter()
    }

    /// Number of points on the ring.
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    pub fn partitioner_name(&self) -> &'static str {
        self.partitioner.name()
    }
}

/// Builder for a pre-populated ring.
#[derive(Debug)]
pub struct RingBuilder<P: Partitioner = SipPartitioner> {
    partitioner: P,
    replicas: usize,
    members: Vec<String>,
}

impl RingBuilder<SipPartitioner> {
    pub fn new() -> Self {
        Self {
            partitioner: SipPartitioner,
            replicas: DEFAULT_REPLICAS,
            members: Vec::new(),
        }
    }
}

impl Default for RingBuilder<SipPartitioner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Partitioner> RingBuilder<P> {
    /// Points per member.
    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }

    /// Swap the partitioner.
    pub fn with_partitioner<Q: Partitioner>(self, partitioner: Q) -> RingBuilder<Q> {
        RingBuilder {
            partitioner,
            replicas: self.replicas,
            members: self.members,
        }
    }

    pub fn add_member(mut self, name: impl Into<String>) -> Self {
        self.members.push(name.into());
        self
    }

    /// # Errors
    ///
    /// `Error::InvalidReplicas` if the replica count is zero.
    pub fn build(self) -> Result<HashRing<P>> {
        let mut ring = HashRing::with_partitioner(self.partitioner, self.replicas)?;
        for name in &self.members {
            ring.add(name);
        }
        Ok(ring)
    }
}
