//! Observed login opcodes. The channel's opcode space is large and
//! game-logic-specific; the core only requires that each opcode be a single
//! callback point, so no exhaustive channel opcode table lives here.

/// Client presents account name, password, and HWID.
pub const LOGIN_CREDENTIALS: u16 = 0x0001;
/// Client requests the world list (first form).
pub const WORLD_LIST: u16 = 0x0004;
/// Client requests the character list for a world.
pub const CHARACTER_LIST: u16 = 0x0005;
/// Client requests server status (load, recommended world).
pub const SERVER_STATUS: u16 = 0x0006;
/// Client accepts the terms of service.
pub const ACCEPT_TOS: u16 = 0x0007;
/// Client sets its account gender.
pub const SET_GENDER: u16 = 0x0008;
/// Client advances the PIN entry/registration flow.
pub const PIN_STEP: u16 = 0x0009;
/// Client requests the world list (second form).
pub const WORLD_LIST_ALT: u16 = 0x000B;
/// Client checks whether a character name is available.
pub const CHECK_NAME: u16 = 0x0015;
/// Client creates a new character.
pub const CREATE_CHARACTER: u16 = 0x0016;
/// Client registers a PIC (second password).
pub const REGISTER_PIC: u16 = 0x001D;
/// Client verifies a previously-registered PIC.
pub const VERIFY_PIC: u16 = 0x001E;
