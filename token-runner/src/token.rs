use std::{
    io,
    time::{Duration, Instant},
};

use log::{debug, info, warn};
use transport_core::{
    Chunk, ChunkFramer, Options, ReceiveOutcome, SendOutcome, Tag, DEFAULT_CHUNK_SIZE,
};

use crate::endpoint::{Endpoints, APDU_ENDPOINT, APDU_OUT_ENDPOINT};
use crate::link::LinkEnd;
use crate::Transport;

/// The token's command processor.
pub trait ApduHandler {
    /// `apdu[..len]` holds a complete command. The response is written in
    /// place and its length returned.
    fn process(&mut self, apdu: &mut [u8], len: usize) -> usize;
}

impl<F> ApduHandler for F
where
    F: FnMut(&mut [u8], usize) -> usize,
{
    fn process(&mut self, apdu: &mut [u8], len: usize) -> usize {
        self(apdu, len)
    }
}

/// Answers every command with the command itself followed by `90 00`.
///
/// A command that leaves no room for the status word gets `67 00` instead,
/// and a buffer too small for even that gets an empty response.
#[derive(Copy, Clone, Debug, Default)]
pub struct EchoHandler;

impl ApduHandler for EchoHandler {
    fn process(&mut self, apdu: &mut [u8], len: usize) -> usize {
        if apdu.len() < 2 {
            return 0;
        }
        if len + 2 > apdu.len() {
            apdu[..2].copy_from_slice(&[0x67, 0x00]);
            return 2;
        }
        apdu[len..len + 2].copy_from_slice(&[0x90, 0x00]);
        len + 2
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ApduState {
    Idle,
    Processing,
    Responding,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ApduMedia {
    None,
    UsbHid,
}

pub struct Token<H, const N: usize = DEFAULT_CHUNK_SIZE> {
    framer: ChunkFramer<N>,
    endpoints: Endpoints,
    handler: H,
    apdu: Vec<u8>,
    response_len: usize,
    state: ApduState,
    media: ApduMedia,
    epoch: Instant,
}

impl<H: ApduHandler, const N: usize> Token<H, N> {
    pub fn new(link: LinkEnd, options: Options, capacity: usize, handler: H) -> Self {
        let endpoints = Endpoints::new(link, options.transmit_timeout);
        Self {
            framer: ChunkFramer::new(options),
            endpoints,
            handler,
            apdu: vec![0u8; capacity],
            response_len: 0,
            state: ApduState::Idle,
            media: ApduMedia::None,
            epoch: Instant::now(),
        }
    }

    pub fn state(&self) -> ApduState {
        self.state
    }

    pub fn media(&self) -> ApduMedia {
        self.media
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn handle_transfer(&mut self, transfer: &[u8]) {
        self.endpoints.record_rx(APDU_OUT_ENDPOINT, transfer.len());
        let tag = Chunk::<N>::from_slice(transfer).tag();
        let outcome = self
            .framer
            .receive(&mut self.endpoints, transfer, &mut self.apdu);
        match outcome {
            ReceiveOutcome::MoreDataExpected => self.media = ApduMedia::UsbHid,
            ReceiveOutcome::Completed(len) if tag == Tag::Data => self.respond(len),
            ReceiveOutcome::Completed(_) | ReceiveOutcome::Reset => {
                if self.state == ApduState::Responding && !self.framer.is_sending() {
                    debug!("response abandoned by an incoming {tag} report");
                    self.finish_response();
                }
            }
        }
    }

    fn respond(&mut self, len: usize) {
        self.media = ApduMedia::UsbHid;
        self.state = ApduState::Processing;
        let response_len = self.handler.process(&mut self.apdu, len);
        if response_len > self.apdu.len() {
            warn!(
                "handler claims {response_len} bytes of a {} byte buffer; dropping response",
                self.apdu.len()
            );
            self.finish_response();
            return;
        }
        debug!("APDU {len} bytes processed, responding with {response_len}");

        self.response_len = response_len;
        self.state = ApduState::Responding;
        let response = &self.apdu[..response_len];
        if let Err(err) = self.framer.begin_send(&mut self.endpoints, response) {
            warn!("cannot send response: {err}");
            self.finish_response();
        } else if !self.framer.is_sending() {
            // empty response, nothing went out
            self.finish_response();
        }
    }

    fn finish_response(&mut self) {
        self.response_len = 0;
        self.state = ApduState::Idle;
        self.media = ApduMedia::None;
    }
}

impl<H: ApduHandler, const N: usize> Transport for Token<H, N> {
    fn poll(&mut self) -> io::Result<bool> {
        let now = self.now_ms();
        self.endpoints.tick(now);
        let mut did_work = false;
        while let Some(transfer) = self.endpoints.link_mut().try_read_transfer()? {
            self.handle_transfer(&transfer);
            did_work = true;
        }
        Ok(did_work)
    }

    fn send(&mut self) -> io::Result<bool> {
        let now = self.now_ms();
        self.endpoints.tick(now);

        if self.endpoints.link().unread_by_peer() > 0 {
            if self.endpoints.expired(APDU_ENDPOINT, now) {
                warn!("ep 0x{APDU_ENDPOINT:02x}: host stopped reading, abandoning response");
                self.endpoints.acknowledge(APDU_ENDPOINT);
                if self.framer.is_sending() {
                    self.framer.reset();
                }
                self.finish_response();
                return Ok(true);
            }
            return Ok(false);
        }

        self.endpoints.acknowledge(APDU_ENDPOINT);
        if !self.framer.is_sending() {
            return Ok(false);
        }
        let response = &self.apdu[..self.response_len];
        match self.framer.continue_send(&mut self.endpoints, response) {
            SendOutcome::ChunkEmitted => {}
            SendOutcome::Idle => {
                info!("response of {} bytes delivered", self.response_len);
                self.finish_response();
            }
        }
        Ok(true)
    }

    fn wait(&mut self) -> io::Result<()> {
        self.endpoints.link_mut().wait(Duration::from_millis(10))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::pair;

    fn command(channel: u16, apdu: &[u8]) -> Chunk<64> {
        let mut chunk = Chunk::<64>::zeroed();
        chunk.set_header(channel, Tag::Data);
        chunk.set_total_length(apdu.len() as u16);
        chunk.payload_mut()[..apdu.len()].copy_from_slice(apdu);
        chunk
    }

    #[test]
    fn echo_handler_appends_status_word() {
        let mut buffer = [0u8; 8];
        buffer[..3].copy_from_slice(&[0x00, 0xA4, 0x04]);
        assert_eq!(EchoHandler.process(&mut buffer, 3), 5);
        assert_eq!(&buffer[..5], &[0x00, 0xA4, 0x04, 0x90, 0x00]);

        assert_eq!(EchoHandler.process(&mut buffer, 7), 2);
        assert_eq!(&buffer[..2], &[0x67, 0x00]);
    }

    #[test]
    fn echo_handler_survives_a_one_byte_buffer() {
        let mut buffer = [0xA5u8; 1];
        assert_eq!(EchoHandler.process(&mut buffer, 1), 0);
        assert_eq!(buffer, [0xA5]);
    }

    #[test]
    fn one_byte_capacity_token_stays_idle() {
        let (mut host, link) = pair();
        let mut token: Token<_> = Token::new(link, Options::default(), 1, EchoHandler);

        host.write_transfer(command(1, &[0x42]).as_bytes()).unwrap();
        token.poll().unwrap();
        assert_eq!(token.state(), ApduState::Idle);
        assert_eq!(host.try_read_transfer().unwrap(), None);
    }

    #[test]
    fn unknown_report_does_not_replay_the_last_command() {
        let (mut host, link) = pair();
        let mut calls = 0usize;
        let handler = move |_: &mut [u8], len: usize| -> usize {
            calls += 1;
            assert_eq!(calls, 1, "handler ran again");
            len
        };
        let mut token: Token<_> = Token::new(link, Options::default(), 64, handler);

        host.write_transfer(command(1, &[0x01, 0x02]).as_bytes()).unwrap();
        token.poll().unwrap();
        host.try_read_transfer().unwrap().expect("response");
        token.send().unwrap();
        assert_eq!(token.state(), ApduState::Idle);

        host.write_transfer(Chunk::<64>::control(1, Tag::Unknown(0x03)).as_bytes())
            .unwrap();
        token.poll().unwrap();
        assert_eq!(token.state(), ApduState::Idle);
        assert_eq!(host.try_read_transfer().unwrap(), None);
    }

    #[test]
    fn short_command_is_answered_in_one_report() {
        let (mut host, link) = pair();
        let mut token: Token<_> = Token::new(link, Options::default(), 256, EchoHandler);

        host.write_transfer(command(0x0102, &[0xB0, 0x01]).as_bytes())
            .unwrap();
        assert!(token.poll().unwrap());
        assert_eq!(token.state(), ApduState::Responding);
        assert_eq!(token.endpoints().rx_size(APDU_OUT_ENDPOINT), 64);

        let reply = host.try_read_transfer().unwrap().expect("response");
        assert_eq!(
            &reply[..11],
            &[0x01, 0x02, 0x05, 0, 0, 0, 4, 0xB0, 0x01, 0x90, 0x00]
        );

        // the read above completed the transfer; the next step cleans up
        assert!(token.send().unwrap());
        assert_eq!(token.state(), ApduState::Idle);
        assert_eq!(token.media(), ApduMedia::None);
    }

    #[test]
    fn long_response_waits_for_each_read() {
        let (mut host, link) = pair();
        let handler = |apdu: &mut [u8], _len: usize| -> usize {
            apdu[..100].fill(0x5A);
            100
        };
        let mut token: Token<_> = Token::new(link, Options::default(), 256, handler);

        host.write_transfer(command(1, &[0x01]).as_bytes()).unwrap();
        token.poll().unwrap();

        // unread first report holds back the second
        assert!(!token.send().unwrap());
        let first = host.try_read_transfer().unwrap().unwrap();
        assert_eq!(&first[5..7], &[0, 100]);

        assert!(token.send().unwrap());
        let second = host.try_read_transfer().unwrap().unwrap();
        assert_eq!(&second[3..5], &[0, 1]);
        assert_eq!(&second[5..48], &[0x5A; 43]);

        assert!(token.send().unwrap());
        assert_eq!(token.state(), ApduState::Idle);
        assert_eq!(host.try_read_transfer().unwrap(), None);
    }

    #[test]
    fn unread_response_times_out() {
        let (mut host, link) = pair();
        let options = Options {
            transmit_timeout: Duration::from_millis(0),
            ..Options::default()
        };
        let mut token: Token<_> = Token::new(link, options, 256, EchoHandler);

        host.write_transfer(command(1, &[0u8; 80]).as_bytes()).unwrap();
        host.write_transfer(&{
            let mut next = Chunk::<64>::zeroed();
            next.set_header(1, Tag::Data);
            next.set_sequence(1);
            next.0
        })
        .unwrap();
        token.poll().unwrap();
        assert_eq!(token.state(), ApduState::Responding);

        assert!(token.send().unwrap());
        assert_eq!(token.state(), ApduState::Idle);
        assert!(!token.framer.is_sending());
    }

    #[test]
    fn ping_is_echoed_on_the_apdu_endpoint() {
        let (mut host, link) = pair();
        let mut token: Token<_> = Token::new(link, Options::default(), 64, EchoHandler);

        let mut ping = Chunk::<64>::control(0x0042, Tag::Ping);
        ping.0[3..7].copy_from_slice(b"ping");
        host.write_transfer(ping.as_bytes()).unwrap();
        token.poll().unwrap();

        assert_eq!(host.try_read_transfer().unwrap(), Some(ping.0.to_vec()));
        assert_eq!(token.state(), ApduState::Idle);
    }
}
