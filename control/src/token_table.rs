//! Pending token table (J) and the login-side token generator that feeds it.
//!
//! A token is single-use and non-zero; §8's "token uniqueness" property
//! requires no two pending tokens, across every channel, to collide at any
//! instant. Each channel gets its own [`PendingTokenTable`]; login keeps one
//! [`TokenGenerator`] per channel it has issued tokens to, so the two crates
//! combined guarantee project-wide uniqueness in an environment with one
//! login and many channels.

use std::collections::HashMap;

use rand::Rng;

use crate::error::{Error, Result};

/// Upper bound on the number of tokens a single channel may have pending
/// redemption at once, guarding against unbounded growth if clients never
/// connect after receiving their "go to channel" reply.
pub const MAX_PENDING_TOKENS: usize = 4096;

/// Login-side generator: mints unique, non-zero tokens and remembers which
/// ones it has issued but not yet seen acknowledged.
#[derive(Debug, Default)]
pub struct TokenGenerator {
    outstanding: HashMap<u32, u32>,
}

impl TokenGenerator {
    /// Creates an empty generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints a new token for `character_id`, guaranteed non-zero and not
    /// already outstanding.
    pub fn issue(&mut self, character_id: u32) -> Result<u32> {
        if self.outstanding.len() >= MAX_PENDING_TOKENS {
            return Err(Error::TokenTableFull);
        }
        let mut rng = rand::thread_rng();
        loop {
            let candidate: u32 = rng.gen_range(1..=u32::MAX);
            if !self.outstanding.contains_key(&candidate) {
                self.outstanding.insert(candidate, character_id);
                return Ok(candidate);
            }
        }
    }

    /// Forgets a token once the channel has acknowledged or redeemed it.
    pub fn forget(&mut self, token: u32) {
        self.outstanding.remove(&token);
    }

    /// Number of tokens minted but not yet acknowledged.
    pub fn pending_count(&self) -> usize {
        self.outstanding.len()
    }
}

/// Channel-side pending token table: tokens login has issued, waiting to be
/// redeemed by a connecting client.
#[derive(Debug, Default)]
pub struct PendingTokenTable {
    pending: HashMap<u32, u32>,
}

impl PendingTokenTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a freshly issued token. Rejects a zero token or a collision
    /// with an already-pending one.
    pub fn insert(&mut self, token: u32, character_id: u32) -> Result<()> {
        if token == 0 {
            return Err(Error::MalformedFrame("token must be non-zero"));
        }
        if self.pending.len() >= MAX_PENDING_TOKENS {
            return Err(Error::TokenTableFull);
        }
        self.pending.insert(token, character_id);
        Ok(())
    }

    /// Consumes `token` if pending, returning the character id it was
    /// issued for. A token can only ever be redeemed once.
    pub fn redeem(&mut self, token: u32) -> Option<u32> {
        self.pending.remove(&token)
    }

    /// Whether `token` is currently pending (for tests/diagnostics).
    pub fn contains(&self, token: u32) -> bool {
        self.pending.contains_key(&token)
    }

    /// Drops every pending token, used when a channel restart invalidates
    /// login's prior view (§4.4's "kick everyone" reconciliation path).
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Number of tokens currently pending redemption.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_tokens_are_nonzero_and_unique() {
        let mut gen = TokenGenerator::new();
        let mut seen = std::collections::HashSet::new();
        for i in 0..200 {
            let token = gen.issue(i).unwrap();
            assert_ne!(token, 0);
            assert!(seen.insert(token));
        }
    }

    #[test]
    fn redeem_is_single_use() {
        let mut table = PendingTokenTable::new();
        table.insert(42, 7).unwrap();
        assert_eq!(table.redeem(42), Some(7));
        assert_eq!(table.redeem(42), None);
    }

    #[test]
    fn zero_token_rejected() {
        let mut table = PendingTokenTable::new();
        assert!(table.insert(0, 1).is_err());
    }

    #[test]
    fn clear_drops_everything() {
        let mut table = PendingTokenTable::new();
        table.insert(1, 1).unwrap();
        table.insert(2, 2).unwrap();
        table.clear();
        assert!(table.is_empty());
    }
}
