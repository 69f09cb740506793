//! SipHash partitioner implementation.

use crate::partitioner::traits::Partitioner;
use crate::token::sip::SipToken;

/// Default partitioner: SipHash-1-3 over the raw key bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct SipPartitioner;

impl Partitioner for SipPartitioner {
    type TokenType = SipToken;

    fn partition(&self, key: &[u8]) -> Self::TokenType {
        SipToken::from_bytes(key)
    }

    fn name(&self) -> &'static str {
        "SipPartitioner"
    }
}
