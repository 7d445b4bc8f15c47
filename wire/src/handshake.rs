//! The fixed 16-byte, unencrypted handshake packet sent by the server the
//! instant a TCP connection is accepted.

use crate::Error;

/// Fixed sub-version string sent in every handshake: `"1"`.
const SUB_VERSION: u8 = b'1';
/// Fixed locale byte.
const LOCALE: u8 = 8;
/// Fixed declared packet length (14), independent of the true encoded size.
const PACKET_LEN: u16 = 14;

/// Decoded contents of a handshake packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    /// Protocol version advertised by the server.
    pub version: u16,
    /// IV the server will use to decrypt bytes the client sends.
    pub recv_iv: [u8; 4],
    /// IV the server will use to encrypt bytes sent to the client.
    pub send_iv: [u8; 4],
}

impl Handshake {
    /// Serializes this handshake into its wire layout:
    /// `[u16 packet_len=14][u16 version][u16 sub_version_len=1][u8 '1'][u8 0]
    /// [u8 locale][4 bytes recv_iv][4 bytes send_iv]`.
    ///
    /// The field list totals 18 bytes even though `packet_len` is always the
    /// constant 14 and an earlier summary calls this a "16 byte" packet; the
    /// field list is authoritative here (see `DESIGN.md`).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(18);
        out.extend_from_slice(&PACKET_LEN.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.push(SUB_VERSION);
        out.push(0);
        out.push(LOCALE);
        out.extend_from_slice(&self.recv_iv);
        out.extend_from_slice(&self.send_iv);
        out
    }

    /// Parses a handshake packet from exactly 18 bytes as produced by
    /// [`Handshake::encode`].
    pub fn decode(buf: &[u8]) -> crate::Result<Self> {
        if buf.len() != 18 {
            return Err(Error::MalformedHandshake("expected 18 bytes"));
        }
        let packet_len = u16::from_le_bytes([buf[0], buf[1]]);
        if packet_len != PACKET_LEN {
            return Err(Error::MalformedHandshake("packet_len field must be 14"));
        }
        let version = u16::from_le_bytes([buf[2], buf[3]]);
        let sub_version_len = u16::from_le_bytes([buf[4], buf[5]]);
        if sub_version_len != 1 {
            return Err(Error::MalformedHandshake("sub_version_len must be 1"));
        }
        if buf[6] != SUB_VERSION || buf[7] != 0 {
            return Err(Error::MalformedHandshake("sub_version bytes mismatch"));
        }
        if buf[8] != LOCALE {
            return Err(Error::MalformedHandshake("locale byte must be 8"));
        }
        let mut recv_iv = [0u8; 4];
        recv_iv.copy_from_slice(&buf[9..13]);
        let mut send_iv = [0u8; 4];
        send_iv.copy_from_slice(&buf[13..17]);

        Ok(Self {
            version,
            recv_iv,
            send_iv,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let hs = Handshake {
            version: 62,
            recv_iv: [1, 2, 3, 4],
            send_iv: [5, 6, 7, 8],
        };
        let bytes = hs.encode();
        assert_eq!(bytes.len(), 18);
        let decoded = Handshake::decode(&bytes).unwrap();
        assert_eq!(decoded, hs);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(Handshake::decode(&[0u8; 16]).is_err());
    }
}
