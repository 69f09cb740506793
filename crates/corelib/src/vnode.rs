//! Virtual node abstractions.
//!
//! Each ring member is placed on the ring as one or more virtual nodes.
//! The number of points per member is the ring's replication factor. More
//! points smooth out the key distribution at the cost of memory; the
//! reference deployment uses a single point per member.

use crate::partitioner::Partitioner;
use crate::token::Token;

/// A virtual node on the hash ring.
///
/// # Invariants
///
/// - Every `VirtualNode` belongs to exactly one member.
/// - Ordering is by token first, then by owner name. Two members whose
///   points collide on the same token are therefore ordered by name, which
///   keeps resolution independent of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualNode<T: Token> {
    /// Token position on the ring.
    pub token: T,

    /// Name of the member that owns this point.
    pub owner: String,
}

impl<T: Token> VirtualNode<T> {
    /// Create a new virtual node.
    #[inline]
    pub fn new(token: T, owner: impl Into<String>) -> Self {
        Self {
            token,
            owner: owner.into(),
        }
    }

    /// Create the `replica`-th point of `owner`.
    ///
    /// The point's token is the partition of `"{owner}#{replica}"`.
    pub fn from_replica<P>(partitioner: &P, owner: &str, replica: usize) -> Self
    where
        P: Partitioner<TokenType = T>,
    {
        let point_key = format!("{}#{}", owner, replica);
        Self::new(partitioner.partition(point_key.as_bytes()), owner)
    }

    /// Lowest possible point at `token`, used as a range-search probe.
    #[inline]
    pub(crate) fn probe(token: T) -> Self {
        Self {
            token,
            owner: String::new(),
        }
    }

    /// Get the token position.
    #[inline]
    pub fn token(&self) -> T {
        self.token
    }

    /// Get the owning member.
    #[inline]
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partitioner::SipPartitioner;
    use crate::token::SipToken;

    #[test]
    fn test_vnode_creation() {
        let vnode = VirtualNode::new(SipToken(100), "a:1");
        assert_eq!(vnode.token(), SipToken(100));
        assert_eq!(vnode.owner(), "a:1");
    }

    #[test]
    fn test_vnode_from_replica() {
        let vnode0 = VirtualNode::from_replica(&SipPartitioner, "a:1", 0);
        let vnode1 = VirtualNode::from_replica(&SipPartitioner, "a:1", 1);

        assert_ne!(vnode0.token(), vnode1.token());
        assert_eq!(vnode0.owner(), vnode1.owner());
        assert_eq!(vnode0.token(), SipToken::from_key("a:1#0"));
    }

    #[test]
    fn test_vnode_ordering() {
        let low = VirtualNode::new(SipToken(100), "z");
        let high = VirtualNode::new(SipToken(200), "a");
        assert!(low < high);

        // Same token: owner name breaks the tie.
        let a = VirtualNode::new(SipToken(7), "a");
        let b = VirtualNode::new(SipToken(7), "b");
        assert!(a < b);
        assert!(VirtualNode::probe(SipToken(7)) < a);
    }
}
