//! Endpoint transmit primitive of the token.
//!
//! Transfers longer than [`MAX_TRANSFER`] do not fit the controller's
//! framing and are dropped without a word to the caller. Every accepted
//! transfer arms a per-endpoint timeout that the loop checks until the host
//! has read it.

use std::{io, time::Duration};

use log::{debug, warn};
use transport_core::ChunkWriter;

use crate::link::LinkEnd;

pub const MAX_ENDPOINTS: usize = 7;

/// Largest transfer the controller framing can carry.
pub const MAX_TRANSFER: usize = 255;

/// IN endpoint carrying APDU responses and control replies.
pub const APDU_ENDPOINT: u8 = 0x82;

/// OUT endpoint the host writes commands to.
pub const APDU_OUT_ENDPOINT: u8 = 0x02;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
struct Slot {
    rx_size: u16,
    deadline_ms: Option<u64>,
}

pub struct Endpoints {
    link: LinkEnd,
    slots: [Slot; MAX_ENDPOINTS],
    timeout_ms: u64,
    now_ms: u64,
}

fn slot_index(ep: u8) -> Option<usize> {
    let index = usize::from(ep & 0x7F);
    (index < MAX_ENDPOINTS).then_some(index)
}

impl Endpoints {
    pub fn new(link: LinkEnd, timeout: Duration) -> Self {
        Self {
            link,
            slots: [Slot::default(); MAX_ENDPOINTS],
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            now_ms: 0,
        }
    }

    pub fn link(&self) -> &LinkEnd {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut LinkEnd {
        &mut self.link
    }

    /// Advances the clock used to arm timeouts.
    pub fn tick(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
    }

    pub fn send(&mut self, ep: u8, data: &[u8]) -> io::Result<()> {
        if data.len() > MAX_TRANSFER {
            warn!(
                "ep 0x{ep:02x}: dropping {} byte transfer (limit {MAX_TRANSFER})",
                data.len()
            );
            return Ok(());
        }
        let index = slot_index(ep).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("no endpoint 0x{ep:02x}"))
        })?;
        self.link.write_transfer(data)?;
        self.slots[index].deadline_ms = Some(self.now_ms.saturating_add(self.timeout_ms));
        Ok(())
    }

    /// Records the length of a transfer that arrived on `ep`.
    pub fn record_rx(&mut self, ep: u8, len: usize) {
        if let Some(index) = slot_index(ep) {
            self.slots[index].rx_size = len.min(usize::from(u16::MAX)) as u16;
        }
    }

    /// Length of the last transfer received on `ep`, 0 for unknown endpoints.
    pub fn rx_size(&self, ep: u8) -> u16 {
        slot_index(ep).map_or(0, |index| self.slots[index].rx_size)
    }

    /// The host has read everything sent on `ep`.
    pub fn acknowledge(&mut self, ep: u8) {
        if let Some(index) = slot_index(ep) {
            if self.slots[index].deadline_ms.take().is_some() {
                debug!("ep 0x{ep:02x}: transfer acknowledged");
            }
        }
    }

    pub fn is_armed(&self, ep: u8) -> bool {
        slot_index(ep).map_or(false, |index| self.slots[index].deadline_ms.is_some())
    }

    pub fn expired(&self, ep: u8, now_ms: u64) -> bool {
        slot_index(ep)
            .and_then(|index| self.slots[index].deadline_ms)
            .map_or(false, |deadline| now_ms >= deadline)
    }
}

impl<const N: usize> ChunkWriter<N> for Endpoints {
    fn write_chunk(&mut self, chunk: &[u8; N]) -> io::Result<()> {
        self.send(APDU_ENDPOINT, chunk)
    }
}
