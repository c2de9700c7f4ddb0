//! CORE API message framing, as far as this daemon needs it.
//!
//! The session engine owns the full message vocabulary. This module only
//! knows the 4-byte message header and string TLVs, which is enough to build
//! the register/execute trigger and to frame incoming traffic for logging.
//!
//! ```text
//! message: | type u8 | flags u8 | length u16 (BE) | tlv data ... |
//! tlv:     | type u8 | length u8 | value | pad to 4 bytes |
//! long:    | type u8 | 0 u8 | length u16 (BE) | value | pad to 4 bytes |
//! ```

use thiserror::Error;

/// Size of the message header.
pub const HEADER_LEN: usize = 4;

/// Register message type.
pub const MSG_REGISTER: u8 = 0x04;

/// Register TLV naming a session file for the daemon to execute.
pub const TLV_REG_EXECSRV: u8 = 0x04;

/// Largest value a long-form TLV can carry.
const MAX_TLV_LEN: usize = u16::MAX as usize;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("TLV value of {0} bytes exceeds the 65535 byte limit")]
    TlvTooLong(usize),

    #[error("message body of {0} bytes exceeds the 65535 byte limit")]
    MessageTooLong(usize),

    #[error("need 4 header bytes, got {0}")]
    ShortHeader(usize),
}

/// Encoder for control messages sent to a running daemon.
pub trait MessageCodec {
    /// Frame `payload` (already-packed TLVs) as a message of this codec's type.
    fn pack(&self, flags: u8, payload: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// Build the "execute this session file" message.
    fn pack_execute(&self, path: &str) -> Result<Vec<u8>, CodecError>;
}

/// Register-message codec used by the remote execute trigger.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterCodec;

impl MessageCodec for RegisterCodec {
    fn pack(&self, flags: u8, payload: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(MessageHeader::new(MSG_REGISTER, flags, payload.len())?.frame(payload))
    }

    fn pack_execute(&self, path: &str) -> Result<Vec<u8>, CodecError> {
        let tlv = pack_string_tlv(TLV_REG_EXECSRV, path)?;
        self.pack(0, &tlv)
    }
}

/// Pack a string TLV, zero-padded to a 4-byte boundary.
pub fn pack_string_tlv(tlv_type: u8, value: &str) -> Result<Vec<u8>, CodecError> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len() + 8);

    if bytes.len() <= u8::MAX as usize {
        out.push(tlv_type);
        out.push(bytes.len() as u8);
    } else if bytes.len() <= MAX_TLV_LEN {
        out.push(tlv_type);
        out.push(0);
        out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    } else {
        return Err(CodecError::TlvTooLong(bytes.len()));
    }

    out.extend_from_slice(bytes);
    let pad = (4 - out.len() % 4) % 4;
    out.resize(out.len() + pad, 0);
    Ok(out)
}

/// Decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub msg_type: u8,
    pub flags: u8,
    pub length: u16,
}

impl MessageHeader {
    pub fn new(msg_type: u8, flags: u8, length: usize) -> Result<Self, CodecError> {
        let length = u16::try_from(length).map_err(|_| CodecError::MessageTooLong(length))?;
        Ok(Self {
            msg_type,
            flags,
            length,
        })
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        match bytes {
            [msg_type, flags, hi, lo, ..] => Ok(Self {
                msg_type: *msg_type,
                flags: *flags,
                length: u16::from_be_bytes([*hi, *lo]),
            }),
            _ => Err(CodecError::ShortHeader(bytes.len())),
        }
    }

    pub fn to_bytes(self) -> [u8; HEADER_LEN] {
        let [hi, lo] = self.length.to_be_bytes();
        [self.msg_type, self.flags, hi, lo]
    }

    fn frame(self, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        out.extend_from_slice(&self.to_bytes());
        out.extend_from_slice(payload);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_tlv_is_padded() {
        let tlv = pack_string_tlv(TLV_REG_EXECSRV, "abc").unwrap();
        assert_eq!(tlv, vec![0x04, 3, b'a', b'b', b'c', 0, 0, 0]);
    }

    #[test]
    fn test_aligned_tlv_gets_no_padding() {
        let tlv = pack_string_tlv(1, "ab").unwrap();
        assert_eq!(tlv, vec![1, 2, b'a', b'b']);
    }

    #[test]
    fn test_long_tlv_uses_wide_length() {
        let value = "x".repeat(300);
        let tlv = pack_string_tlv(7, &value).unwrap();
        assert_eq!(&tlv[..4], &[7, 0, 0x01, 0x2c]);
        assert_eq!(tlv.len() % 4, 0);
        assert_eq!(tlv.len(), 4 + 300);
    }

    #[test]
    fn test_execute_message_layout() {
        let msg = RegisterCodec.pack_execute("/tmp/session.xml").unwrap();
        let header = MessageHeader::parse(&msg).unwrap();
        assert_eq!(header.msg_type, MSG_REGISTER);
        assert_eq!(header.flags, 0);
        assert_eq!(header.length as usize, msg.len() - HEADER_LEN);
        assert_eq!(msg[4], TLV_REG_EXECSRV);
        assert_eq!(msg[5] as usize, "/tmp/session.xml".len());
        assert_eq!(&msg[6..22], b"/tmp/session.xml");
    }

    #[test]
    fn test_short_header() {
        assert_eq!(MessageHeader::parse(&[1, 2]), Err(CodecError::ShortHeader(2)));
    }

    #[test]
    fn test_oversized_message_rejected() {
        let payload = vec![0u8; 70_000];
        assert_eq!(
            RegisterCodec.pack(0, &payload),
            Err(CodecError::MessageTooLong(70_000))
        );
    }
}
