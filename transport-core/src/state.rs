/// Which direction currently owns the shared session fields.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Phase {
    #[default]
    Idle,
    Receiving,
    Sending,
}

/// Progress of the exchange in flight.
///
/// Reception and transmission share these fields, so at most one of them is
/// active at a time. The cursor is an offset into the buffer the caller lends
/// on every call; the session never holds the buffer itself.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Session {
    pub(crate) sequence_number: u16,
    pub(crate) total_length: u32,
    pub(crate) remaining_length: u32,
    pub(crate) cursor: Option<usize>,
    pub(crate) channel_id: u16,
    pub(crate) phase: Phase,
}

impl Session {
    pub const fn new() -> Self {
        Self {
            sequence_number: 0,
            total_length: 0,
            remaining_length: 0,
            cursor: None,
            channel_id: 0,
            phase: Phase::Idle,
        }
    }

    /// Drops the exchange in flight.
    ///
    /// The channel id and the last total length survive so that a response
    /// goes out on the channel its command arrived on.
    pub fn reset(&mut self) {
        self.sequence_number = 0;
        self.remaining_length = 0;
        self.cursor = None;
        self.phase = Phase::Idle;
    }

    pub fn sequence_number(&self) -> u16 {
        self.sequence_number
    }

    pub fn total_length(&self) -> u32 {
        self.total_length
    }

    pub fn remaining_length(&self) -> u32 {
        self.remaining_length
    }

    pub fn cursor(&self) -> Option<usize> {
        self.cursor
    }

    pub fn channel_id(&self) -> u16 {
        self.channel_id
    }

    /// Channel used for the next outbound APDU.
    pub fn set_channel_id(&mut self, channel_id: u16) {
        self.channel_id = channel_id;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    pub(crate) fn begin_reception(&mut self, channel_id: u16, total_length: u32) {
        self.channel_id = channel_id;
        self.arm(Phase::Receiving, total_length);
    }

    pub(crate) fn begin_transmission(&mut self, total_length: u32) {
        self.arm(Phase::Sending, total_length);
    }

    fn arm(&mut self, phase: Phase, total_length: u32) {
        self.sequence_number = 0;
        self.total_length = total_length;
        self.remaining_length = total_length;
        self.cursor = Some(0);
        self.phase = phase;
    }

    /// Accounts for `copied` payload bytes of the current chunk.
    pub(crate) fn advance(&mut self, copied: usize) {
        debug_assert!(copied as u64 <= self.remaining_length as u64);
        self.cursor = self.cursor.map(|offset| offset + copied);
        self.remaining_length = self.remaining_length.saturating_sub(copied as u32);
        self.sequence_number = self.sequence_number.wrapping_add(1);
    }
}
