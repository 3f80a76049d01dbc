use log::{debug, error, warn};
use rand::{CryptoRng, RngCore};

use crate::chunk::{Tag, FIRST_HEADER_LEN, HEADER_LEN};
use crate::link::ChunkWriter;
use crate::logging::HexPreview;
use crate::state::Phase;
use crate::ChunkFramer;

/// What the dispatcher should do after a report was consumed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReceiveOutcome {
    /// The APDU is incomplete; keep feeding reports.
    MoreDataExpected,
    /// The destination buffer holds a complete APDU of this many bytes.
    Completed(usize),
    /// No APDU: the report was a control request or was rejected, and any
    /// partial reception is gone.
    Reset,
}

impl<const N: usize, R> ChunkFramer<N, R>
where
    R: RngCore + CryptoRng,
{
    /// Consumes one report read from the link.
    ///
    /// `chunk` may be shorter than `N` (it is zero-padded) or longer (the
    /// excess is ignored). Data payload is appended to `destination`, whose
    /// length bounds the total length a first chunk may declare. Control
    /// replies are written to `link`.
    pub fn receive<W: ChunkWriter<N>>(
        &mut self,
        link: &mut W,
        chunk: &[u8],
        destination: &mut [u8],
    ) -> ReceiveOutcome {
        self.scratch.0.fill(0);
        let read = chunk.len().min(N);
        self.scratch.0[..read].copy_from_slice(&chunk[..read]);

        match self.scratch.tag() {
            Tag::Version => {
                let version = self.options.protocol_version;
                self.scratch.control_field_mut().copy_from_slice(&version);
                self.answer_control(link, Tag::Version)
            }
            Tag::AllocateChannel => {
                self.rng.fill_bytes(self.scratch.control_field_mut());
                self.answer_control(link, Tag::AllocateChannel)
            }
            Tag::Ping => self.answer_control(link, Tag::Ping),
            Tag::Data => self.absorb_data(chunk.len(), destination),
            Tag::Unknown(value) => {
                debug!(
                    "RX unknown tag 0x{value:02x} cid={:04x} ignored",
                    self.scratch.channel_id()
                );
                self.settle()
            }
        }
    }

    // Control requests are answered in the report they arrived in and always
    // end the exchange in progress, even a half-received APDU.
    fn answer_control<W: ChunkWriter<N>>(&mut self, link: &mut W, tag: Tag) -> ReceiveOutcome {
        if !self.session.is_idle() {
            debug!(
                "{tag} request abandons {:?} exchange at seq={}",
                self.session.phase, self.session.sequence_number
            );
        }
        debug!(
            "TX {tag} reply cid={:04x} field={}",
            self.scratch.channel_id(),
            HexPreview(&self.scratch.control_field())
        );
        if let Err(err) = link.write_chunk(self.scratch.as_bytes()) {
            error!("failed to write {tag} reply: {err}");
        }
        self.session.reset();
        ReceiveOutcome::Reset
    }

    fn absorb_data(&mut self, read_len: usize, destination: &mut [u8]) -> ReceiveOutcome {
        let sequence = self.scratch.sequence();
        let expected = self.session.sequence_number;
        if sequence != expected {
            warn!("RX data seq={sequence} expected={expected}; dropping exchange");
            return self.abort();
        }

        let header = if sequence == 0 {
            let total = self.scratch.total_length();
            if usize::from(total) > destination.len() {
                warn!(
                    "RX first chunk declares {total} bytes, buffer holds {}; dropping exchange",
                    destination.len()
                );
                return self.abort();
            }
            self.session
                .begin_reception(self.scratch.channel_id(), u32::from(total));
            FIRST_HEADER_LEN
        } else {
            if self.session.phase != Phase::Receiving {
                warn!("RX continuation seq={sequence} without a reception; dropping");
                return self.abort();
            }
            HEADER_LEN
        };

        let Some(offset) = self.session.cursor else {
            return self.abort();
        };
        let len = read_len
            .saturating_sub(header)
            .min(self.session.remaining_length as usize)
            .min(N - header);
        let Some(target) = destination.get_mut(offset..offset + len) else {
            warn!(
                "RX data seq={sequence} overruns a {} byte buffer at offset {offset}",
                destination.len()
            );
            return self.abort();
        };
        let payload = &self.scratch.0[header..header + len];
        target.copy_from_slice(payload);
        self.session.advance(len);

        debug!(
            "RX data cid={:04x} seq={sequence} len={len} remaining={} preview={}",
            self.session.channel_id,
            self.session.remaining_length,
            HexPreview(payload)
        );
        self.settle()
    }

    // Shared tail of data and unknown-tag handling: report progress, or
    // close the exchange once nothing remains.
    fn settle(&mut self) -> ReceiveOutcome {
        if self.session.remaining_length > 0 {
            ReceiveOutcome::MoreDataExpected
        } else {
            let total = self.session.total_length as usize;
            self.session.reset();
            ReceiveOutcome::Completed(total)
        }
    }

    fn abort(&mut self) -> ReceiveOutcome {
        self.session.reset();
        ReceiveOutcome::Reset
    }
}
