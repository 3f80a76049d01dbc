//! In-memory stand-in for a HID interrupt pipe.
//!
//! Each end writes transfers the peer reads in order. Transfers may be of any
//! length, like raw report reads. A writer can see how many of its transfers
//! the peer has not read yet, which is what a device learns from the
//! controller's "transfer complete" event.

use std::{
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc,
    },
    time::Duration,
};

use transport_core::ChunkWriter;

pub struct LinkEnd {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    // written by this end, not yet read by the peer
    outbound: Arc<AtomicUsize>,
    // written by the peer, not yet read by this end
    inbound: Arc<AtomicUsize>,
    stashed: Option<Vec<u8>>,
}

/// Two connected ends: `(host, token)`.
pub fn pair() -> (LinkEnd, LinkEnd) {
    let (host_tx, token_rx) = mpsc::channel();
    let (token_tx, host_rx) = mpsc::channel();
    let host_to_token = Arc::new(AtomicUsize::new(0));
    let token_to_host = Arc::new(AtomicUsize::new(0));

    let host = LinkEnd {
        tx: host_tx,
        rx: host_rx,
        outbound: Arc::clone(&host_to_token),
        inbound: Arc::clone(&token_to_host),
        stashed: None,
    };
    let token = LinkEnd {
        tx: token_tx,
        rx: token_rx,
        outbound: token_to_host,
        inbound: host_to_token,
        stashed: None,
    };
    (host, token)
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "link peer is gone")
}

impl LinkEnd {
    pub fn write_transfer(&mut self, data: &[u8]) -> io::Result<()> {
        self.outbound.fetch_add(1, Ordering::SeqCst);
        self.tx.send(data.to_vec()).map_err(|_| {
            self.outbound.fetch_sub(1, Ordering::SeqCst);
            closed()
        })
    }

    pub fn try_read_transfer(&mut self) -> io::Result<Option<Vec<u8>>> {
        if let Some(data) = self.stashed.take() {
            return Ok(Some(data));
        }
        match self.rx.try_recv() {
            Ok(data) => Ok(Some(self.consumed(data))),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(closed()),
        }
    }

    /// Blocks up to `timeout` for the next transfer.
    pub fn read_transfer(&mut self, timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        if let Some(data) = self.stashed.take() {
            return Ok(Some(data));
        }
        match self.rx.recv_timeout(timeout) {
            Ok(data) => Ok(Some(self.consumed(data))),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(closed()),
        }
    }

    /// Waits up to `timeout` for a transfer and keeps it for the next read.
    ///
    /// The transfer counts as read by the peer as soon as it is held here.
    pub fn wait(&mut self, timeout: Duration) -> io::Result<bool> {
        if self.stashed.is_none() {
            self.stashed = self.read_transfer(timeout)?;
        }
        Ok(self.stashed.is_some())
    }

    /// Transfers written by this end that the peer has not read.
    pub fn unread_by_peer(&self) -> usize {
        self.outbound.load(Ordering::SeqCst)
    }

    fn consumed(&self, data: Vec<u8>) -> Vec<u8> {
        self.inbound.fetch_sub(1, Ordering::SeqCst);
        data
    }
}

impl<const N: usize> ChunkWriter<N> for LinkEnd {
    fn write_chunk(&mut self, chunk: &[u8; N]) -> io::Result<()> {
        self.write_transfer(chunk)
    }
}
