//! Error taxonomy for the wire layer.

/// Errors produced while decoding frames or handshake packets.
///
/// Every variant here corresponds to the "protocol violation" error kind: a
/// peer sent bytes that could not have come from a correctly-synchronized
/// encoder. Callers MUST treat any of these as fatal to the session.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The header's self-xor check failed, meaning the peer's IV is no
    /// longer in sync with ours (or the bytes were not produced by this
    /// protocol at all).
    #[error("frame header failed self-xor check: expected high={expected:#06x}, got={actual:#06x}")]
    HeaderMismatch {
        /// The high 16 bits this decoder expected given its own IV state.
        expected: u16,
        /// The high 16 bits actually present in the header.
        actual: u16,
    },

    /// A declared body length exceeds the configured maximum frame size.
    #[error("frame body length {0} exceeds maximum of {1}")]
    BodyTooLarge(u16, u16),

    /// The handshake packet did not match the fixed layout in length or
    /// fixed-value fields.
    #[error("malformed handshake packet: {0}")]
    MalformedHandshake(&'static str),
}
