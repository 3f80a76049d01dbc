pub mod endpoint;
pub mod host;
pub mod link;
pub mod service;
pub mod token;

use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

pub use host::HostClient;
pub use link::{pair, LinkEnd};
pub use service::{spawn, RunnerConfig, TokenHandle};
pub use token::{ApduHandler, ApduMedia, ApduState, EchoHandler, Token};
pub use transport_core::{Options, TransportError};

/// One side of the cooperative token loop.
pub trait Transport {
    /// Consumes whatever arrived on the link. Returns whether anything did.
    fn poll(&mut self) -> io::Result<bool>;

    /// Pushes pending output and checks link timeouts.
    fn send(&mut self) -> io::Result<bool>;

    /// Blocks briefly when neither side had work.
    fn wait(&mut self) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn poll(&mut self) -> io::Result<bool> {
        (**self).poll()
    }

    fn send(&mut self) -> io::Result<bool> {
        (**self).send()
    }

    fn wait(&mut self) -> io::Result<()> {
        (**self).wait()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ShutdownListener {
    flag: Arc<AtomicBool>,
}

impl ShutdownListener {
    pub fn should_stop(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn request_shutdown(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

pub fn shutdown_channel() -> (ShutdownSignal, ShutdownListener) {
    let flag = Arc::new(AtomicBool::new(false));
    (
        ShutdownSignal {
            flag: Arc::clone(&flag),
        },
        ShutdownListener { flag },
    )
}

/// Drives `transport` until `shutdown` fires or the link fails.
pub fn exec<T: Transport>(mut transport: T, shutdown: ShutdownListener) -> io::Result<()> {
    while !shutdown.should_stop() {
        let mut did_work = false;
        did_work |= transport.poll()?;
        did_work |= transport.send()?;
        if !did_work {
            transport.wait()?;
        }
    }
    log::debug!("shutdown requested, leaving token loop");
    Ok(())
}
