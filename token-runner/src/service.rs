use std::{
    io,
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, error, info};
use transport_core::Options;

use crate::{
    exec, host::HostClient, link::pair, shutdown_channel, token::ApduHandler, token::Token,
    ShutdownSignal,
};

/// Room for a short APDU with its status word.
pub const DEFAULT_APDU_CAPACITY: usize = 260;

/// How long the host waits for the token before giving up on a request.
pub const DEFAULT_LINK_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone, Debug)]
pub struct RunnerConfig {
    pub options: Options,
    /// Token APDU buffer size; longer commands are refused.
    pub apdu_capacity: usize,
    /// Channel the host starts with. Zero asks the token for one.
    pub channel: u16,
    pub link_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            options: Options::default(),
            apdu_capacity: DEFAULT_APDU_CAPACITY,
            channel: 0,
            link_timeout: DEFAULT_LINK_TIMEOUT,
        }
    }
}

/// Keeps the token thread alive. Dropping it stops the loop and joins.
pub struct TokenHandle {
    signal: ShutdownSignal,
    handle: Option<JoinHandle<()>>,
}

impl TokenHandle {
    pub fn signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.signal.request_shutdown();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("token thread panicked");
            }
        }
    }
}

impl Drop for TokenHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Starts a token running `handler` on its own thread and returns the host
/// end of its link.
pub fn spawn<H>(config: RunnerConfig, handler: H) -> io::Result<(HostClient, TokenHandle)>
where
    H: ApduHandler + Send + 'static,
{
    let RunnerConfig {
        options,
        apdu_capacity,
        channel,
        link_timeout,
    } = config;

    let (host_end, token_end) = pair();
    let token: Token<H> = Token::new(token_end, options.clone(), apdu_capacity, handler);
    let (signal, listener) = shutdown_channel();

    let handle = thread::Builder::new()
        .name("apdu-token".into())
        .spawn(move || {
            info!("token up, APDU buffer {apdu_capacity} bytes");
            match exec(token, listener) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                    debug!("host end closed, token loop done");
                }
                Err(err) => error!("token loop failed: {err}"),
            }
        })?;

    let mut host = HostClient::new(host_end, options, link_timeout);
    host.set_channel(channel);
    Ok((
        host,
        TokenHandle {
            signal,
            handle: Some(handle),
        },
    ))
}

/// Parses hex, ignoring spaces, colons and dashes between digit pairs.
pub fn parse_hex(input: &str) -> Result<Vec<u8>, String> {
    let mut cleaned = input.to_owned();
    cleaned.retain(|c| !matches!(c, ' ' | ':' | '-'));
    if cleaned.len() % 2 != 0 {
        return Err(format!("odd number of hex digits ({})", cleaned.len()));
    }
    cleaned
        .as_bytes()
        .chunks(2)
        .enumerate()
        .map(|(idx, pair)| {
            let digits = std::str::from_utf8(pair).map_err(|_| "invalid UTF-8".to_string())?;
            u8::from_str_radix(digits, 16).map_err(|_| format!("invalid hex at byte {idx}"))
        })
        .collect()
}

pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}
