use std::time::Duration;

use anyhow::{Context, Result};
use token_runner::{spawn, ApduHandler, HostClient, RunnerConfig, TokenHandle};

pub const CAPACITY: usize = 300;

pub struct TestRunner {
    pub host: HostClient,
    // dropped last: stops and joins the token thread
    _token: TokenHandle,
}

impl TestRunner {
    pub fn start<H>(handler: H) -> Result<Self>
    where
        H: ApduHandler + Send + 'static,
    {
        Self::with_config(
            RunnerConfig {
                apdu_capacity: CAPACITY,
                channel: 0x0101,
                link_timeout: Duration::from_millis(500),
                ..RunnerConfig::default()
            },
            handler,
        )
    }

    pub fn with_config<H>(config: RunnerConfig, handler: H) -> Result<Self>
    where
        H: ApduHandler + Send + 'static,
    {
        let (host, token) = spawn(config, handler).context("spawn token thread")?;
        Ok(Self {
            host,
            _token: token,
        })
    }
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn with_status(apdu: &[u8]) -> Vec<u8> {
    let mut expected = apdu.to_vec();
    expected.extend_from_slice(&[0x90, 0x00]);
    expected
}
