//! Account-side state login tracks outside of what `dbengine`'s schema
//! models: PIN progress is never persisted (the Supplemented feature set
//! keeps it account-scoped but in-memory only), and each connected
//! session's login flow (authenticated? which character did it pick?).

use std::collections::HashMap;

/// Where an account sits in the PIN entry/registration flow. Tracked
/// in-memory, keyed by account id, and reset on process restart — a real
/// deployment would persist this alongside the account row, but the PIN
/// step is a client-side gate with no further server behavior depending on
/// it, so an in-memory table is a faithful, minimal stand-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinState {
    NotRegistered,
    AwaitingVerification,
    Verified,
}

/// Process-wide PIN state table, shared by every worker's [`crate::handler::LoginHandler`].
#[derive(Debug, Default)]
pub struct PinTable {
    state: std::sync::Mutex<HashMap<u32, PinState>>,
}

impl PinTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, account_id: u32) -> PinState {
        *self
            .state
            .lock()
            .unwrap()
            .entry(account_id)
            .or_insert(PinState::NotRegistered)
    }

    pub fn set(&self, account_id: u32, state: PinState) {
        self.state.lock().unwrap().insert(account_id, state);
    }
}

/// A connecting client's progress through the login flow, held per-session
/// by [`crate::handler::LoginHandler`].
#[derive(Debug, Default)]
pub struct SessionFlow {
    pub account_id: Option<u32>,
    pub account_name: Option<String>,
    pub tos: u8,
    pub gender: Option<u8>,
    pub pic: Option<String>,
    pub current_world: Option<u8>,
    /// World/channel/character the client picked from the character list,
    /// pending a successful PIC verification before a token is issued.
    pub pending_selection: Option<(u8, u8, u32)>,
}

/// Mixes `password` and `salt` into a fixed-size byte string suitable for
/// `dbengine`'s `ACCOUNT_HASH_LEN`-sized hash column. No cryptographic hash
/// crate is part of the dependency stack (the engine's Non-goals leave
/// password hashing to whatever the binaries pick); FNV-1a is a reasonable,
/// dependency-free placeholder that still makes the stored hash depend on
/// both inputs.
pub fn hash_password(password: &str, salt: u64) -> [u8; dbengine::types::ACCOUNT_HASH_LEN] {
    let mut out = [0u8; dbengine::types::ACCOUNT_HASH_LEN];
    let mut state = 0xcbf29ce484222325u64 ^ salt;
    for (i, byte) in password.bytes().enumerate() {
        state ^= byte as u64;
        state = state.wrapping_mul(0x100000001b3);
        out[i % out.len()] ^= (state >> ((i % 8) * 8)) as u8;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_salt_dependent() {
        assert_eq!(hash_password("hunter2", 1), hash_password("hunter2", 1));
        assert_ne!(hash_password("hunter2", 1), hash_password("hunter2", 2));
        assert_ne!(hash_password("hunter2", 1), hash_password("wrongpass", 1));
    }

    #[test]
    fn pin_table_defaults_to_not_registered() {
        let pins = PinTable::new();
        assert_eq!(pins.get(42), PinState::NotRegistered);
        pins.set(42, PinState::Verified);
        assert_eq!(pins.get(42), PinState::Verified);
        assert_eq!(pins.get(43), PinState::NotRegistered);
    }
}
