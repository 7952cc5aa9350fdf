//! Validated wire frame.

use serde::{Serialize, Serializer};
use std::fmt;

use super::{
    CHECKSUM_OFFSET, CHECKSUM_RANGE, FRAME_LEN, HEADER, PAYLOAD_LEN, PREFIX, SUFFIX, TYPE_SEND,
    WALLPAD, checksum,
};
use crate::{Result, WallpadError};

/// One complete, checksum-verified frame.
///
/// A `Frame` can only be obtained through validation or through
/// [`Frame::build`], which computes the checksum itself.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Frame([u8; FRAME_LEN]);

impl Frame {
    /// Validates raw bytes as a frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; FRAME_LEN] = bytes.try_into().map_err(|_| {
            WallpadError::malformed(format!("expected {FRAME_LEN} bytes, got {}", bytes.len()))
        })?;
        if raw[..2] != PREFIX {
            return Err(WallpadError::malformed("missing AA55 prefix"));
        }
        if raw[FRAME_LEN - 2..] != SUFFIX {
            return Err(WallpadError::malformed("missing 0D0D suffix"));
        }
        let expected = checksum(&raw[CHECKSUM_RANGE]);
        if raw[CHECKSUM_OFFSET] != expected {
            return Err(WallpadError::malformed(format!(
                "checksum mismatch: got {:#04x}, expected {:#04x}",
                raw[CHECKSUM_OFFSET], expected
            )));
        }
        Ok(Self(raw))
    }

    /// Parses a hex string such as `aa5530bc00...0d0d`.
    pub fn from_hex(text: &str) -> Result<Self> {
        let bytes = hex::decode(text.trim())?;
        Self::from_bytes(&bytes)
    }

    /// Assembles a frame sent by the wallpad.
    pub fn build(dest: [u8; 2], src: [u8; 2], command: u8, payload: [u8; PAYLOAD_LEN]) -> Self {
        Self::build_with_type(TYPE_SEND, dest, src, command, payload)
    }

    /// Assembles a frame with an explicit packet type byte.
    pub fn build_with_type(
        type_byte: u8,
        dest: [u8; 2],
        src: [u8; 2],
        command: u8,
        payload: [u8; PAYLOAD_LEN],
    ) -> Self {
        let mut raw = [0u8; FRAME_LEN];
        raw[..2].copy_from_slice(&PREFIX);
        raw[2] = HEADER;
        raw[3] = type_byte;
        raw[4] = 0x00;
        raw[5..7].copy_from_slice(&dest);
        raw[7..9].copy_from_slice(&src);
        raw[9] = command;
        raw[10..18].copy_from_slice(&payload);
        raw[CHECKSUM_OFFSET] = checksum(&raw[CHECKSUM_RANGE]);
        raw[FRAME_LEN - 2..].copy_from_slice(&SUFFIX);
        Self(raw)
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// High nibble of the type byte (`0x0B` send, `0x0D` ack).
    pub fn packet_type(&self) -> u8 {
        self.0[3] >> 4
    }

    pub fn type_byte(&self) -> u8 {
        self.0[3]
    }

    pub fn dest(&self) -> [u8; 2] {
        [self.0[5], self.0[6]]
    }

    pub fn src(&self) -> [u8; 2] {
        [self.0[7], self.0[8]]
    }

    pub fn command(&self) -> u8 {
        self.0[9]
    }

    pub fn payload(&self) -> [u8; PAYLOAD_LEN] {
        let mut out = [0u8; PAYLOAD_LEN];
        out.copy_from_slice(&self.0[10..18]);
        out
    }

    pub fn checksum(&self) -> u8 {
        self.0[CHECKSUM_OFFSET]
    }

    /// Address of the device on the other end of the wallpad.
    ///
    /// `None` for chatter between two devices.
    pub fn peer(&self) -> Option<[u8; 2]> {
        if self.dest()[0] == WALLPAD[0] {
            Some(self.src())
        } else if self.src()[0] == WALLPAD[0] {
            Some(self.dest())
        } else {
            None
        }
    }

    /// The same frame as a device would echo it back to the wallpad.
    pub fn as_reply(&self) -> Self {
        Self::build_with_type(0xDC, self.src(), self.dest(), self.command(), self.payload())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({})", self.to_hex())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Frame {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl TryFrom<&[u8]> for Frame {
    type Error = WallpadError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        Self::from_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn light_state() -> Frame {
        Frame::build_with_type(0xDC, [0x01, 0x00], [0x0E, 0x01], 0x00, [0xFF, 0, 0, 0, 0, 0, 0, 0])
    }

    #[test]
    fn build_produces_valid_frame() {
        let frame = light_state();
        let reparsed = Frame::from_bytes(frame.as_bytes()).unwrap();
        assert_eq!(reparsed, frame);
        assert_eq!(frame.packet_type(), 0x0D);
        assert_eq!(frame.peer(), Some([0x0E, 0x01]));
        assert_eq!(frame.payload()[0], 0xFF);
    }

    #[test]
    fn rejects_bad_checksum() {
        let mut raw = *light_state().as_bytes();
        raw[12] ^= 0x01;
        let err = Frame::from_bytes(&raw).unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn rejects_wrong_length_and_markers() {
        assert!(Frame::from_bytes(&[0xAA, 0x55]).is_err());

        let mut raw = *light_state().as_bytes();
        raw[20] = 0x00;
        assert!(Frame::from_bytes(&raw).unwrap_err().to_string().contains("suffix"));

        let mut raw = *light_state().as_bytes();
        raw[0] = 0x00;
        assert!(Frame::from_bytes(&raw).unwrap_err().to_string().contains("prefix"));
    }

    #[test]
    fn hex_round_trip() {
        let frame = light_state();
        assert_eq!(Frame::from_hex(&frame.to_hex()).unwrap(), frame);
        assert!(Frame::from_hex("zz").is_err());
        assert!(Frame::from_hex(&frame.to_hex()[..40]).is_err());
    }

    #[test]
    fn inter_device_chatter_has_no_peer() {
        let frame = Frame::build([0x0E, 0x01], [0x36, 0x01], 0x00, [0; 8]);
        assert_eq!(frame.peer(), None);
    }

    #[test]
    fn reply_swaps_addresses() {
        let cmd = Frame::build([0x36, 0x02], WALLPAD, 0x00, [0x11, 0, 23, 0, 0, 0, 0, 0]);
        let reply = cmd.as_reply();
        assert_eq!(reply.dest(), WALLPAD);
        assert_eq!(reply.src(), [0x36, 0x02]);
        assert_eq!(reply.payload(), cmd.payload());
        assert_eq!(reply.packet_type(), 0x0D);
    }
}
