//! Segmentation and reassembly of APDUs over a link with fixed-size reports.
//!
//! A [`ChunkFramer`] owns one session: the shared sequence/length/cursor
//! state, a scratch report and the entropy source used for channel
//! allocation. It is driven from two events:
//!
//! * a report arrived: [`ChunkFramer::receive`] validates it, answers
//!   control requests (version, channel allocation, ping) in place and
//!   appends data payload to the caller's APDU buffer;
//! * the previous report left the link: [`ChunkFramer::continue_send`] emits
//!   the next report of the APDU armed by [`ChunkFramer::begin_send`].
//!
//! Nothing blocks and nothing is allocated. The caller lends its APDU buffer
//! on every call, so the session only ever stores an offset into it.

use std::time::Duration;

use rand::{rngs::OsRng, CryptoRng, RngCore};

pub mod chunk;
pub mod error;
pub mod link;
pub mod logging;
pub mod receive;
pub mod send;
pub mod state;

#[cfg(test)]
mod proptests;

pub use chunk::{Chunk, Tag, DEFAULT_CHUNK_SIZE, FIRST_HEADER_LEN, HEADER_LEN};
pub use error::{Result, TransportError};
pub use link::{ChunkWriter, NullWriter};
pub use receive::ReceiveOutcome;
pub use send::SendOutcome;
pub use state::{Phase, Session};

/// Reported by the version query. The current protocol generation is zero.
pub const PROTOCOL_VERSION: [u8; chunk::CONTROL_FIELD_LEN] = [0; chunk::CONTROL_FIELD_LEN];

/// Per-endpoint timeout armed after each outbound transfer.
pub const DEFAULT_TRANSMIT_TIMEOUT: Duration = Duration::from_millis(2000);

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Options {
    pub protocol_version: [u8; chunk::CONTROL_FIELD_LEN],
    pub transmit_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            transmit_timeout: DEFAULT_TRANSMIT_TIMEOUT,
        }
    }
}

pub struct ChunkFramer<const N: usize = DEFAULT_CHUNK_SIZE, R = OsRng> {
    session: Session,
    scratch: Chunk<N>,
    rng: R,
    options: Options,
}

impl<const N: usize> ChunkFramer<N, OsRng> {
    pub fn new(options: Options) -> Self {
        Self::with_rng(options, OsRng)
    }
}

impl<const N: usize, R> ChunkFramer<N, R>
where
    R: RngCore + CryptoRng,
{
    pub fn with_rng(options: Options, rng: R) -> Self {
        Self {
            session: Session::new(),
            scratch: Chunk::zeroed(),
            rng,
            options,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// Abandons whatever exchange is in flight. Safe to call repeatedly.
    pub fn reset(&mut self) {
        self.session.reset();
    }
}
