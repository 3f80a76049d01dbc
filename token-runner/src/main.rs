use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use clap_num::maybe_hex;
use token_runner::{
    service::{parse_hex, to_hex, DEFAULT_APDU_CAPACITY},
    spawn, EchoHandler, Options, RunnerConfig,
};

#[derive(Parser, Debug)]
#[clap(about, version, author)]
struct Args {
    /// Channel id to start with; 0 allocates one from the token
    #[clap(short, long, parse(try_from_str = maybe_hex), default_value_t = 0)]
    channel: u16,

    /// Token APDU buffer size in bytes
    #[clap(long, default_value_t = DEFAULT_APDU_CAPACITY)]
    capacity: usize,

    /// Host wait for each reply, in milliseconds
    #[clap(long, default_value_t = 3000)]
    timeout_ms: u64,

    /// Token endpoint transmit timeout, in milliseconds
    #[clap(long, default_value_t = 2000)]
    transmit_timeout_ms: u64,

    /// Protocol version reported by the token
    #[clap(long, parse(try_from_str = maybe_hex), default_value_t = 0)]
    protocol_version: u32,

    /// Send a ping before the APDUs
    #[clap(long)]
    ping: bool,

    /// Command APDUs in hex, exchanged in order
    apdus: Vec<String>,
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    let args = Args::parse();
    let commands = args
        .apdus
        .iter()
        .map(|apdu| parse_hex(apdu).map_err(anyhow::Error::msg))
        .collect::<Result<Vec<_>>>()
        .context("invalid APDU")?;

    let config = RunnerConfig {
        options: Options {
            protocol_version: args.protocol_version.to_be_bytes(),
            transmit_timeout: Duration::from_millis(args.transmit_timeout_ms),
        },
        apdu_capacity: args.capacity,
        channel: args.channel,
        link_timeout: Duration::from_millis(args.timeout_ms),
    };
    let (mut host, token) = spawn(config, EchoHandler).context("start token")?;

    let signal = token.signal();
    ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C, shutting down");
        signal.request_shutdown();
        std::process::exit(0);
    })
    .context("install Ctrl+C handler")?;

    let version = host.version().context("version query")?;
    println!("protocol version {}", to_hex(&version));

    if host.channel() == 0 {
        let channel = host.allocate_channel().context("channel allocation")?;
        println!("channel {channel:04X}");
    }

    if args.ping {
        let payload = *b"PING";
        if host.ping(payload).context("ping")? != payload {
            bail!("ping reply does not echo the request");
        }
        println!("ping ok");
    }

    for command in &commands {
        let response = host
            .exchange(command)
            .with_context(|| format!("exchange {}", to_hex(command)))?;
        println!("> {}", to_hex(command));
        println!("< {}", to_hex(&response));
    }

    token.stop();
    Ok(())
}
