//! Wire layout of a single link report.
//!
//! ```text
//! [0..2)  channel id (big endian)
//! [2]     tag
//! [3..5)  sequence number            (data chunks only)
//! [5..7)  total APDU length          (data chunk with sequence 0 only)
//! ...     payload, then zero filler
//! ```
//!
//! Control replies reuse the request buffer and carry their 4-byte answer in
//! `[3..7)`.

use core::fmt;

/// HID report size used when nothing else is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 64;

/// Channel id, tag and sequence number.
pub const HEADER_LEN: usize = 5;

/// Header of the first data chunk, which also carries the total length.
pub const FIRST_HEADER_LEN: usize = 7;

/// Size of the answer field of a version or channel-allocation reply.
pub const CONTROL_FIELD_LEN: usize = 4;

const CHANNEL: core::ops::Range<usize> = 0..2;
const TAG: usize = 2;
const SEQUENCE: core::ops::Range<usize> = 3..5;
const TOTAL_LENGTH: core::ops::Range<usize> = 5..7;
const CONTROL_FIELD: core::ops::Range<usize> = 3..3 + CONTROL_FIELD_LEN;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Tag {
    Version,
    AllocateChannel,
    Ping,
    Data,
    Unknown(u8),
}

impl Tag {
    pub const fn is_control(self) -> bool {
        matches!(self, Tag::Version | Tag::AllocateChannel | Tag::Ping)
    }
}

impl From<u8> for Tag {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Tag::Version,
            0x01 => Tag::AllocateChannel,
            0x02 => Tag::Ping,
            0x05 => Tag::Data,
            other => Tag::Unknown(other),
        }
    }
}

impl From<Tag> for u8 {
    fn from(tag: Tag) -> Self {
        match tag {
            Tag::Version => 0x00,
            Tag::AllocateChannel => 0x01,
            Tag::Ping => 0x02,
            Tag::Data => 0x05,
            Tag::Unknown(other) => other,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Version => f.write_str("version"),
            Tag::AllocateChannel => f.write_str("allocate-channel"),
            Tag::Ping => f.write_str("ping"),
            Tag::Data => f.write_str("data"),
            Tag::Unknown(value) => write!(f, "unknown(0x{value:02x})"),
        }
    }
}

/// Number of payload bytes a chunk of `N` bytes can carry.
pub const fn payload_capacity<const N: usize>(sequence: u16) -> usize {
    if sequence == 0 {
        N - FIRST_HEADER_LEN
    } else {
        N - HEADER_LEN
    }
}

/// One link report of `N` bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Chunk<const N: usize>(pub [u8; N]);

impl<const N: usize> Chunk<N> {
    // The first data chunk must fit its header plus one payload byte, and the
    // 16-bit length field bounds how much a single report may describe.
    const SIZE_OK: () = assert!(
        N > FIRST_HEADER_LEN && N <= u16::MAX as usize,
        "chunk size must be in 8..=65535"
    );

    pub const fn zeroed() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::SIZE_OK;
        Self([0u8; N])
    }

    /// Copies `data` into a zero-filled report, truncating anything past `N`.
    pub fn from_slice(data: &[u8]) -> Self {
        let mut chunk = Self::zeroed();
        let len = data.len().min(N);
        chunk.0[..len].copy_from_slice(&data[..len]);
        chunk
    }

    /// A control request: channel id and tag, nothing else.
    pub fn control(channel: u16, tag: Tag) -> Self {
        let mut chunk = Self::zeroed();
        chunk.set_header(channel, tag);
        chunk
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }

    pub fn channel_id(&self) -> u16 {
        u16::from_be_bytes([self.0[CHANNEL.start], self.0[CHANNEL.start + 1]])
    }

    pub fn tag(&self) -> Tag {
        Tag::from(self.0[TAG])
    }

    pub fn sequence(&self) -> u16 {
        u16::from_be_bytes([self.0[SEQUENCE.start], self.0[SEQUENCE.start + 1]])
    }

    /// Only meaningful on a data chunk with sequence 0.
    pub fn total_length(&self) -> u16 {
        u16::from_be_bytes([self.0[TOTAL_LENGTH.start], self.0[TOTAL_LENGTH.start + 1]])
    }

    pub fn control_field(&self) -> [u8; CONTROL_FIELD_LEN] {
        let mut field = [0u8; CONTROL_FIELD_LEN];
        field.copy_from_slice(&self.0[CONTROL_FIELD]);
        field
    }

    pub fn control_field_mut(&mut self) -> &mut [u8] {
        &mut self.0[CONTROL_FIELD]
    }

    pub fn set_header(&mut self, channel: u16, tag: Tag) {
        self.0[CHANNEL].copy_from_slice(&channel.to_be_bytes());
        self.0[TAG] = tag.into();
    }

    pub fn set_sequence(&mut self, sequence: u16) {
        self.0[SEQUENCE].copy_from_slice(&sequence.to_be_bytes());
    }

    pub fn set_total_length(&mut self, length: u16) {
        self.0[TOTAL_LENGTH].copy_from_slice(&length.to_be_bytes());
    }

    /// Payload area of a data chunk, filler included.
    pub fn payload(&self) -> &[u8] {
        &self.0[Self::payload_offset(self.sequence())..]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let offset = Self::payload_offset(self.sequence());
        &mut self.0[offset..]
    }

    fn payload_offset(sequence: u16) -> usize {
        if sequence == 0 {
            FIRST_HEADER_LEN
        } else {
            HEADER_LEN
        }
    }
}

impl<const N: usize> Default for Chunk<N> {
    fn default() -> Self {
        Self::zeroed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_byte_mapping() {
        for (byte, tag) in [
            (0x00, Tag::Version),
            (0x01, Tag::AllocateChannel),
            (0x02, Tag::Ping),
            (0x05, Tag::Data),
            (0x03, Tag::Unknown(0x03)),
        ] {
            assert_eq!(Tag::from(byte), tag);
            assert_eq!(u8::from(tag), byte);
        }
        assert!(Tag::Ping.is_control());
        assert!(!Tag::Data.is_control());
        assert!(!Tag::Unknown(0x03).is_control());
    }

    #[test]
    fn first_data_chunk_layout() {
        let mut chunk = Chunk::<32>::zeroed();
        chunk.set_header(0x0101, Tag::Data);
        chunk.set_sequence(0);
        chunk.set_total_length(40);
        chunk.payload_mut()[..3].copy_from_slice(&[0xAA, 0xBB, 0xCC]);

        assert_eq!(
            &chunk.as_bytes()[..10],
            &[0x01, 0x01, 0x05, 0x00, 0x00, 0x00, 0x28, 0xAA, 0xBB, 0xCC]
        );
        assert_eq!(chunk.channel_id(), 0x0101);
        assert_eq!(chunk.tag(), Tag::Data);
        assert_eq!(chunk.total_length(), 40);
        assert_eq!(chunk.payload().len(), 25);
    }

    #[test]
    fn continuation_payload_starts_after_sequence() {
        let mut chunk = Chunk::<32>::zeroed();
        chunk.set_header(0x0101, Tag::Data);
        chunk.set_sequence(0x0102);
        chunk.payload_mut()[0] = 0x77;

        assert_eq!(&chunk.as_bytes()[3..6], &[0x01, 0x02, 0x77]);
        assert_eq!(chunk.sequence(), 0x0102);
        assert_eq!(chunk.payload().len(), 27);
    }

    #[test]
    fn from_slice_pads_and_truncates() {
        let short = Chunk::<8>::from_slice(&[1, 2, 3]);
        assert_eq!(short.as_bytes(), &[1, 2, 3, 0, 0, 0, 0, 0]);

        let long = Chunk::<8>::from_slice(&[9u8; 20]);
        assert_eq!(long.as_bytes(), &[9u8; 8]);
    }

    #[test]
    fn payload_capacity_per_sequence() {
        assert_eq!(payload_capacity::<64>(0), 57);
        assert_eq!(payload_capacity::<64>(1), 59);
        assert_eq!(payload_capacity::<32>(0), 25);
    }
}
