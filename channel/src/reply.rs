//! Client-facing opcodes this channel speaks. Distinct numbering space
//! from `wire::opcode` (login's client-to-server table) and from
//! `login::reply` (login's own server-to-client table) — a channel and a
//! login are never the same peer to a given client at the same time.

/// Client → channel.
pub mod request {
    /// `[u32 token]`: redeem a token issued by login.
    pub const ENTER_CHANNEL: u16 = 0x0000;
    /// `[u32 target_map]`: move to a different map (room).
    pub const CHANGE_MAP: u16 = 0x0001;
    /// `[string text]`: broadcast chat to the current room.
    pub const CHAT: u16 = 0x0002;
}

/// Channel → client.
pub const ENTER_RESULT: u16 = 0x0000;
pub const CHANGE_MAP_RESULT: u16 = 0x0001;
pub const CHAT_BROADCAST: u16 = 0x0002;
pub const KICKED: u16 = 0x0003;
