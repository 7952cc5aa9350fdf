//! Wire protocol: stream reassembly, frame validation and the packet codec.
//!
//! Every Kocom frame is exactly [`FRAME_LEN`] bytes:
//!
//! ```text
//! AA 55 | 30 | type | 00 | dest(2) | src(2) | cmd | payload(8) | sum | 0D 0D
//! ```
//!
//! The checksum is the low byte of the sum of bytes `2..18`.

pub mod codec;
pub mod frame;
pub mod parser;
pub mod ring;

pub use codec::{Control, PacketCodec};
pub use frame::Frame;
pub use parser::{FrameParser, ParserStats};
pub use ring::RingBuffer;

/// Total length of every frame on the bus.
pub const FRAME_LEN: usize = 21;
/// Sync marker opening each frame.
pub const PREFIX: [u8; 2] = [0xAA, 0x55];
/// Trailer closing each frame.
pub const SUFFIX: [u8; 2] = [0x0D, 0x0D];
/// Fixed header byte following the prefix.
pub const HEADER: u8 = 0x30;
/// Packet type byte for frames sent by the wallpad.
pub const TYPE_SEND: u8 = 0xBC;
/// Packet type nibble of device acknowledgements (`0xDC`).
pub const PACKET_TYPE_ACK: u8 = 0x0D;
/// Address of the wallpad itself.
pub const WALLPAD: [u8; 2] = [0x01, 0x00];

/// Range of bytes covered by the checksum.
pub(crate) const CHECKSUM_RANGE: std::ops::Range<usize> = 2..18;
pub(crate) const CHECKSUM_OFFSET: usize = 18;
pub(crate) const PAYLOAD_LEN: usize = 8;

/// Command bytes.
pub mod cmd {
    pub const STATE: u8 = 0x00;
    pub const GAS_OPEN: u8 = 0x01;
    pub const GAS_CLOSE: u8 = 0x02;
    pub const ELEVATOR_CALL: u8 = 0x01;
    pub const MOTION_DETECTED: u8 = 0x04;
    pub const QUERY: u8 = 0x3A;
    pub const CUTOFF_ON: u8 = 0x65;
    pub const CUTOFF_OFF: u8 = 0x66;
}

/// Additive checksum over a frame's header..payload region.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}
