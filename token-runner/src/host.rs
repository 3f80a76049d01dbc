//! Host side of the link: frames commands and reassembles responses with the
//! same engine the token runs.

use std::{
    io, thread,
    time::{Duration, Instant},
};

use log::{debug, info};
use transport_core::{
    logging::HexPreview, Chunk, ChunkFramer, NullWriter, Options, ReceiveOutcome, Result,
    SendOutcome, Tag, TransportError, DEFAULT_CHUNK_SIZE,
};

use crate::link::LinkEnd;

/// Largest response the length field can announce.
pub const MAX_RESPONSE_LEN: usize = u16::MAX as usize;

const CONSUMED_POLL: Duration = Duration::from_millis(1);

pub struct HostClient<const N: usize = DEFAULT_CHUNK_SIZE> {
    link: LinkEnd,
    framer: ChunkFramer<N>,
    response: Vec<u8>,
    timeout: Duration,
}

fn link_error(err: io::Error) -> TransportError {
    if err.kind() == io::ErrorKind::BrokenPipe {
        TransportError::LinkClosed
    } else {
        TransportError::Io(err)
    }
}

fn timed_out(what: &str) -> TransportError {
    TransportError::Io(io::Error::new(io::ErrorKind::TimedOut, what.to_owned()))
}

impl<const N: usize> HostClient<N> {
    pub fn new(link: LinkEnd, options: Options, timeout: Duration) -> Self {
        Self {
            link,
            framer: ChunkFramer::new(options),
            response: vec![0u8; MAX_RESPONSE_LEN],
            timeout,
        }
    }

    pub fn channel(&self) -> u16 {
        self.framer.session().channel_id()
    }

    pub fn set_channel(&mut self, channel: u16) {
        self.framer.session_mut().set_channel_id(channel);
    }

    pub fn version(&mut self) -> Result<[u8; 4]> {
        self.control(Tag::Version, [0; 4])
    }

    /// Asks the token for fresh channel bytes and adopts the first two as
    /// this client's channel id.
    pub fn allocate_channel(&mut self) -> Result<u16> {
        let field = self.control(Tag::AllocateChannel, [0; 4])?;
        let channel = u16::from_be_bytes([field[0], field[1]]);
        info!("allocated channel {channel:04x}");
        self.set_channel(channel);
        Ok(channel)
    }

    /// Returns the field echoed by the token.
    pub fn ping(&mut self, payload: [u8; 4]) -> Result<[u8; 4]> {
        self.control(Tag::Ping, payload)
    }

    /// Sends one command APDU and waits for its complete response.
    pub fn exchange(&mut self, apdu: &[u8]) -> Result<Vec<u8>> {
        if apdu.is_empty() {
            return Ok(Vec::new());
        }
        self.discard_stale()?;
        let deadline = Instant::now() + self.timeout;

        self.framer.begin_send(&mut self.link, apdu)?;
        loop {
            self.wait_consumed(deadline)?;
            if self.framer.continue_send(&mut self.link, apdu) == SendOutcome::Idle {
                break;
            }
        }

        loop {
            let report = self.next_report(deadline)?;
            let tag = Chunk::<N>::from_slice(&report).tag();
            if tag != Tag::Data {
                self.framer.reset();
                return Err(TransportError::UnexpectedReply(tag));
            }
            let sequence = self.framer.session().sequence_number();
            match self
                .framer
                .receive(&mut NullWriter, &report, &mut self.response)
            {
                ReceiveOutcome::MoreDataExpected => {}
                ReceiveOutcome::Completed(len) => {
                    debug!("response {len} bytes {}", HexPreview(&self.response[..len]));
                    return Ok(self.response[..len].to_vec());
                }
                ReceiveOutcome::Reset => return Err(TransportError::ResponseAborted { sequence }),
            }
        }
    }

    fn control(&mut self, tag: Tag, field: [u8; 4]) -> Result<[u8; 4]> {
        debug_assert!(tag.is_control());
        self.discard_stale()?;
        let deadline = Instant::now() + self.timeout;

        let mut request = Chunk::<N>::control(self.channel(), tag);
        request.control_field_mut().copy_from_slice(&field);
        self.link
            .write_transfer(request.as_bytes())
            .map_err(link_error)?;

        let reply = Chunk::<N>::from_slice(&self.next_report(deadline)?);
        if reply.tag() != tag {
            return Err(TransportError::UnexpectedReply(reply.tag()));
        }
        Ok(reply.control_field())
    }

    // Reports left over from an exchange that was given up on.
    fn discard_stale(&mut self) -> Result<()> {
        while let Some(report) = self.link.try_read_transfer().map_err(link_error)? {
            debug!("discarding stale report {}", HexPreview(&report));
        }
        self.framer.reset();
        Ok(())
    }

    fn wait_consumed(&mut self, deadline: Instant) -> Result<()> {
        while self.link.unread_by_peer() > 0 {
            if Instant::now() >= deadline {
                self.framer.reset();
                return Err(timed_out("token stopped reading the command"));
            }
            thread::sleep(CONSUMED_POLL);
        }
        Ok(())
    }

    fn next_report(&mut self, deadline: Instant) -> Result<Vec<u8>> {
        let left = deadline.saturating_duration_since(Instant::now());
        match self.link.read_transfer(left).map_err(link_error)? {
            Some(report) => Ok(report),
            None => {
                self.framer.reset();
                Err(timed_out("no reply from token"))
            }
        }
    }
}
