use log::{debug, error, warn};
use rand::{CryptoRng, RngCore};

use crate::chunk::{payload_capacity, Chunk, Tag, FIRST_HEADER_LEN, HEADER_LEN};
use crate::error::{Result, TransportError};
use crate::link::ChunkWriter;
use crate::logging::HexPreview;
use crate::state::Phase;
use crate::ChunkFramer;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SendOutcome {
    /// Another report of the APDU went out.
    ChunkEmitted,
    /// Nothing left to send; the session is back to idle.
    Idle,
}

impl<const N: usize, R> ChunkFramer<N, R>
where
    R: RngCore + CryptoRng,
{
    /// Arms the session with `apdu` and emits its first report.
    ///
    /// An empty APDU is a no-op. The remaining reports go out one per
    /// [`continue_send`](Self::continue_send) call, each of which must lend
    /// the same buffer again.
    pub fn begin_send<W: ChunkWriter<N>>(&mut self, link: &mut W, apdu: &[u8]) -> Result<()> {
        if apdu.is_empty() {
            return Ok(());
        }
        let total = u16::try_from(apdu.len()).map_err(|_| TransportError::ApduTooLarge {
            len: apdu.len(),
            max: usize::from(u16::MAX),
        })?;

        match self.session.phase {
            Phase::Sending => return Err(TransportError::SendInProgress),
            Phase::Receiving => warn!(
                "send of {total} bytes abandons reception at seq={}",
                self.session.sequence_number
            ),
            Phase::Idle => {}
        }

        self.session.begin_transmission(u32::from(total));
        if !self.emit_chunk(link, apdu) {
            self.session.reset();
        }
        Ok(())
    }

    /// Called once the previous report has left the link.
    ///
    /// Emits the next report while payload remains. The call after the last
    /// report resets the session and reports [`SendOutcome::Idle`]; by then
    /// the final report is known to be on its way.
    pub fn continue_send<W: ChunkWriter<N>>(&mut self, link: &mut W, apdu: &[u8]) -> SendOutcome {
        match self.session.phase {
            // a stray completion event must not disturb a reception
            Phase::Receiving => return SendOutcome::Idle,
            Phase::Idle => {
                self.session.reset();
                return SendOutcome::Idle;
            }
            Phase::Sending => {}
        }

        if self.session.remaining_length == 0 {
            debug!(
                "TX complete cid={:04x} len={}",
                self.session.channel_id, self.session.total_length
            );
            self.session.reset();
            return SendOutcome::Idle;
        }

        if self.emit_chunk(link, apdu) {
            SendOutcome::ChunkEmitted
        } else {
            self.session.reset();
            SendOutcome::Idle
        }
    }

    pub fn is_sending(&self) -> bool {
        self.session.phase == Phase::Sending
    }

    fn emit_chunk<W: ChunkWriter<N>>(&mut self, link: &mut W, apdu: &[u8]) -> bool {
        let Some(offset) = self.session.cursor else {
            return false;
        };
        let sequence = self.session.sequence_number;
        let remaining = self.session.remaining_length as usize;
        let len = remaining.min(payload_capacity::<N>(sequence));
        let Some(source) = apdu.get(offset..offset + len) else {
            warn!(
                "TX seq={sequence} source buffer of {} bytes ends before offset {}",
                apdu.len(),
                offset + len
            );
            return false;
        };

        let mut chunk = Chunk::<N>::zeroed();
        chunk.set_header(self.session.channel_id, Tag::Data);
        chunk.set_sequence(sequence);
        let header = if sequence == 0 {
            // nothing sent yet, so the remaining length is still the total
            chunk.set_total_length(remaining as u16);
            FIRST_HEADER_LEN
        } else {
            HEADER_LEN
        };
        chunk.0[header..header + len].copy_from_slice(source);
        self.session.advance(len);

        debug!(
            "TX data cid={:04x} seq={sequence} len={len} remaining={} preview={}",
            self.session.channel_id,
            self.session.remaining_length,
            HexPreview(source)
        );
        if let Err(err) = link.write_chunk(chunk.as_bytes()) {
            error!("failed to write data chunk seq={sequence}: {err}");
        }
        true
    }
}
