//! The control channel's tiny framed protocol (§4.4). Unlike the client-
//! facing wire protocol, none of this is encrypted — it runs over a
//! private login↔channel link — but it keeps the same "small tag, fixed
//! payload" shape as [`wire::frame`] rather than inventing a new framing
//! idiom.

use crate::error::{Error, Result};

/// A handshake byte's meaning, sent once per control-channel connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// First connection ever from this channel to this login.
    FirstConnection,
    /// A reconnect; the login's queued state is still considered current.
    Reconnect,
}

impl Handshake {
    /// The byte placed on the wire for this handshake kind.
    pub fn to_byte(self) -> u8 {
        match self {
            Handshake::FirstConnection => 0x00,
            Handshake::Reconnect => 0x01,
        }
    }

    /// Parses a handshake byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x00 => Ok(Handshake::FirstConnection),
            0x01 => Ok(Handshake::Reconnect),
            _ => Err(Error::MalformedFrame("unrecognized handshake byte")),
        }
    }
}

/// A message exchanged over an established control channel, after the
/// handshake byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// login → channel: a freshly issued token paired with the character
    /// that redeemed the login flow.
    IssueToken { token: u32, character_id: u32 },
    /// channel → login: a logged-in client disconnected.
    Logout { token: u32 },
}

const TAG_ISSUE_TOKEN: u8 = 0x00;
const TAG_LOGOUT: u8 = 0x01;

impl Message {
    /// Encodes this message as `[tag][fields...]`.
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            Message::IssueToken { token, character_id } => {
                let mut out = Vec::with_capacity(9);
                out.push(TAG_ISSUE_TOKEN);
                out.extend_from_slice(&token.to_le_bytes());
                out.extend_from_slice(&character_id.to_le_bytes());
                out
            }
            Message::Logout { token } => {
                let mut out = Vec::with_capacity(5);
                out.push(TAG_LOGOUT);
                out.extend_from_slice(&token.to_le_bytes());
                out
            }
        }
    }

    /// Decodes a message previously produced by [`Message::encode`].
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let (&tag, rest) = buf
            .split_first()
            .ok_or(Error::MalformedFrame("empty control message"))?;
        match tag {
            TAG_ISSUE_TOKEN => {
                if rest.len() != 8 {
                    return Err(Error::MalformedFrame("issue-token wrong length"));
                }
                let token = u32::from_le_bytes(rest[0..4].try_into().unwrap());
                let character_id = u32::from_le_bytes(rest[4..8].try_into().unwrap());
                Ok(Message::IssueToken { token, character_id })
            }
            TAG_LOGOUT => {
                if rest.len() != 4 {
                    return Err(Error::MalformedFrame("logout wrong length"));
                }
                let token = u32::from_le_bytes(rest[0..4].try_into().unwrap());
                Ok(Message::Logout { token })
            }
            _ => Err(Error::MalformedFrame("unrecognized message tag")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_byte_round_trips() {
        assert_eq!(Handshake::from_byte(0x00).unwrap(), Handshake::FirstConnection);
        assert_eq!(Handshake::from_byte(0x01).unwrap(), Handshake::Reconnect);
        assert!(Handshake::from_byte(0x02).is_err());
    }

    #[test]
    fn issue_token_round_trips() {
        let msg = Message::IssueToken { token: 12345, character_id: 99 };
        let bytes = msg.encode();
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn logout_round_trips() {
        let msg = Message::Logout { token: 77 };
        let bytes = msg.encode();
        assert_eq!(Message::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn truncated_message_is_rejected() {
        let bytes = [TAG_ISSUE_TOKEN, 1, 2, 3];
        assert!(Message::decode(&bytes).is_err());
    }
}
