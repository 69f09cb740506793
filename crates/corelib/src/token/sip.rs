//! SipHash token implementation.

use crate::token::traits::Token;
use siphasher::sip::SipHasher13;
use std::hash::{Hash, Hasher};

/// Ring position produced by SipHash-1-3 with zero keys.
///
/// The keys are fixed so the same input lands on the same position in every
/// process, which keeps routing stable across restarts.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SipToken(pub u64);

impl Token for SipToken {}

impl SipToken {
    /// Creates a token from a byte slice.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = SipHasher13::new();
        data.hash(&mut hasher);
        SipToken(hasher.finish())
    }

    /// Creates a token from a string key.
    pub fn from_key(key: &str) -> Self {
        Self::from_bytes(key.as_bytes())
    }
}
